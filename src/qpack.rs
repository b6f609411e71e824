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

//! Interfaces to the QPACK codecs.
//!
//! Header compression itself lives elsewhere; this module only defines the
//! byte-moving contract between the multiplexing core and the codecs that
//! sit on the QPACK encoder and decoder side-channel streams.

use crate::Result;

/// Upper bound on the size of a single decoder-stream instruction: one
/// prefix byte plus up to ten 7-bit continuation bytes.
pub const MAX_INSTRUCTION_LEN: usize = 11;

/// The header-compression decoder.
///
/// Consumes the peer's encoder-stream instructions and produces
/// decoder-stream instructions of its own (header acks, stream
/// cancellations, insert-count increments).
pub trait Decoder {
    /// Feeds bytes from the peer's encoder stream.
    ///
    /// Complete instructions are processed; a trailing partial instruction
    /// is left for a later call. Returns the number of bytes consumed and
    /// the ids of request streams unblocked by the processed instructions.
    fn feed_encoder_stream(&mut self, src: &[u8])
        -> Result<(usize, Vec<u64>)>;

    /// Writes a stream-cancel instruction for `stream_id` into `dst` (at
    /// least [`MAX_INSTRUCTION_LEN`] bytes) and returns its length.
    fn write_stream_cancel(&mut self, stream_id: u64, dst: &mut [u8])
        -> usize;
}

/// The header-compression encoder, created once the peer's SETTINGS have
/// negotiated the table size. Consumes the peer's decoder-stream
/// instructions.
pub trait Encoder {
    /// Feeds bytes from the peer's decoder stream; same consumption
    /// contract as [`Decoder::feed_encoder_stream`].
    fn feed_decoder_stream(&mut self, src: &[u8]) -> Result<usize>;
}
