// Copyright (C) 2024, Cloudflare, Inc.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS
// IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO,
// THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR
// PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::collections::HashMap;

use crate::buffer::Buffer;
use crate::transport::SendSource;

/// Unidirectional stream type bytes.
pub const CONTROL_STREAM_TYPE_ID: u8 = b'C';
pub const QPACK_ENCODER_STREAM_TYPE_ID: u8 = b'H';
pub const QPACK_DECODER_STREAM_TYPE_ID: u8 = b'h';

/// Initial send-buffer contents of the three egress unistreams opened at
/// connection setup: the stream type byte, plus an empty SETTINGS frame on
/// the control stream.
pub(crate) const CONTROL_STREAM_PREAMBLE: &[u8] = b"C\x00\x04";
pub(crate) const QPACK_ENCODER_STREAM_PREAMBLE: &[u8] = b"H";
pub(crate) const QPACK_DECODER_STREAM_PREAMBLE: &[u8] = b"h";

/// Role of an ingress unidirectional stream, fixed for life once its
/// leading type byte has been read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// The type byte has not arrived yet.
    Unknown,

    Control,

    QpackEncoder,

    QpackDecoder,

    /// Unrecognized type; remaining bytes are read and dropped.
    Drain,
}

/// A peer-initiated unidirectional stream.
#[derive(Debug)]
pub struct IngressUniStream {
    pub id: u64,
    pub recvbuf: Buffer,
    pub role: Role,
}

impl IngressUniStream {
    pub fn new(id: u64) -> IngressUniStream {
        IngressUniStream {
            id,
            recvbuf: Buffer::new(),
            role: Role::Unknown,
        }
    }
}

/// A self-initiated unidirectional stream.
#[derive(Debug)]
pub struct EgressUniStream {
    pub id: u64,
    pub sendbuf: Buffer,
}

impl EgressUniStream {
    pub fn new(id: u64) -> EgressUniStream {
        EgressUniStream {
            id,
            sendbuf: Buffer::new(),
        }
    }
}

/// The set of egress unistreams of one connection. The transport pulls
/// outbound bytes from it during packetization.
#[derive(Debug, Default)]
pub struct EgressStreams {
    streams: HashMap<u64, EgressUniStream>,
}

impl EgressStreams {
    pub fn insert(&mut self, stream: EgressUniStream) {
        self.streams.insert(stream.id, stream);
    }

    pub fn get(&self, stream_id: u64) -> Option<&EgressUniStream> {
        self.streams.get(&stream_id)
    }

    pub fn get_mut(&mut self, stream_id: u64) -> Option<&mut EgressUniStream> {
        self.streams.get_mut(&stream_id)
    }

    pub fn remove(&mut self, stream_id: u64) -> Option<EgressUniStream> {
        self.streams.remove(&stream_id)
    }
}

impl SendSource for EgressStreams {
    fn emit(
        &mut self, stream_id: u64, off: usize, dst: &mut [u8],
    ) -> (usize, bool) {
        match self.streams.get(&stream_id) {
            Some(stream) => stream.sendbuf.emit(off, dst),

            // nothing buffered for a stream we don't know about
            None => (0, true),
        }
    }
}

/// Ids of the three well-known unistreams in one direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlStreams {
    pub control: Option<u64>,
    pub qpack_encoder: Option<u64>,
    pub qpack_decoder: Option<u64>,
}

impl ControlStreams {
    /// Clears any binding that refers to `stream_id`.
    pub fn forget(&mut self, stream_id: u64) {
        if self.control == Some(stream_id) {
            self.control = None;
        }

        if self.qpack_encoder == Some(stream_id) {
            self.qpack_encoder = None;
        }

        if self.qpack_decoder == Some(stream_id) {
            self.qpack_decoder = None;
        }
    }
}
