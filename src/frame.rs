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

use crate::Error;
use crate::Result;

pub const DATA_FRAME_TYPE_ID: u8 = 0x0;
pub const HEADERS_FRAME_TYPE_ID: u8 = 0x1;
pub const PRIORITY_FRAME_TYPE_ID: u8 = 0x2;
pub const CANCEL_PUSH_FRAME_TYPE_ID: u8 = 0x3;
pub const SETTINGS_FRAME_TYPE_ID: u8 = 0x4;
pub const PUSH_PROMISE_FRAME_TYPE_ID: u8 = 0x5;
pub const GOAWAY_FRAME_TYPE_ID: u8 = 0x7;
pub const MAX_PUSH_ID_FRAME_TYPE_ID: u8 = 0xD;
pub const DUPLICATE_PUSH_FRAME_TYPE_ID: u8 = 0xE;

pub const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x1;
pub const SETTINGS_NUM_PLACEHOLDERS: u16 = 0x3;
pub const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 0x6;
pub const SETTINGS_QPACK_BLOCKED_STREAMS: u16 = 0x7;

/// Maximum payload size of any frame other than DATA; stream receive
/// windows must be at least this big.
pub const MAX_FRAME_SIZE: u64 = 16384;

/// QPACK header-table size assumed when the peer's SETTINGS omit it.
pub const DEFAULT_HEADER_TABLE_SIZE: u64 = 4096;

/// A single frame read off a control-type stream.
///
/// The wire layout in this profile is a varint payload length followed by a
/// one-byte type. DATA frames carry their payload implicitly: `payload` is
/// empty for them and the cursor stops right after the header, so the body
/// can be streamed by the request layer instead of being buffered here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub ty: u8,
    pub length: u64,
    pub header_size: usize,
    pub payload: &'a [u8],
}

/// Reads one frame from `src`, advancing the cursor past it (past the
/// header only for DATA).
///
/// [`Error::Incomplete`] means more bytes are needed; the cursor is left
/// untouched so the caller keeps the partial frame buffered and retries
/// when more data arrives.
pub fn read_frame<'a>(src: &mut octets::Octets<'a>) -> Result<Frame<'a>> {
    let mut b = octets::Octets::with_slice(&src.buf()[src.off()..]);

    let length = b.get_varint().map_err(|_| Error::Incomplete)?;
    let ty = b.get_u8().map_err(|_| Error::Incomplete)?;

    let header_size = b.off();

    let payload = if ty != DATA_FRAME_TYPE_ID {
        if length >= MAX_FRAME_SIZE {
            return Err(Error::MalformedFrame(ty));
        }

        b.get_bytes(length as usize)
            .map_err(|_| Error::Incomplete)?
            .buf()
    } else {
        &[]
    };

    src.skip(b.off())?;

    Ok(Frame {
        ty,
        length,
        header_size,
        payload,
    })
}

/// Writes a frame header (varint payload length, one-byte type) to `out`.
pub fn write_frame_header(out: &mut Vec<u8>, ty: u8, payload_len: u64) -> Result<()> {
    let mut hdr = [0; 9];

    let len = {
        let mut b = octets::OctetsMut::with_slice(&mut hdr);
        b.put_varint(payload_len)?;
        b.put_u8(ty)?;
        b.off()
    };

    out.extend_from_slice(&hdr[..len]);

    Ok(())
}

/// Connection parameters decoded from a SETTINGS payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: Option<u64>,
}

/// Parses a SETTINGS payload: pairs of a big-endian 16-bit identifier and a
/// varint value. Unknown identifiers are ignored; truncation of either
/// field is malformed.
pub fn parse_settings(payload: &[u8]) -> Result<Settings> {
    let mut b = octets::Octets::with_slice(payload);

    let mut settings = Settings::default();

    while b.cap() > 0 {
        let id = b
            .get_u16()
            .map_err(|_| Error::MalformedFrame(SETTINGS_FRAME_TYPE_ID))?;

        let value = b
            .get_varint()
            .map_err(|_| Error::MalformedFrame(SETTINGS_FRAME_TYPE_ID))?;

        match id {
            SETTINGS_HEADER_TABLE_SIZE => {
                settings.header_table_size = Some(value);
            },

            // unknown settings must be ignored
            _ => (),
        }
    }

    Ok(settings)
}
