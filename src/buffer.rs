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

/// A contiguous growable byte buffer backing one side of a unidirectional
/// stream.
///
/// The transport delivers receive-side data with explicit offsets to
/// accommodate out-of-order arrival. [`splice()`] places bytes at their
/// absolute position, growing the buffer as needed and implicitly
/// zero-filling any gap; readers only ever look at the prefix the transport
/// reports as contiguously available.
///
/// [`splice()`]: Buffer::splice
#[derive(Debug, Default)]
pub struct Buffer {
    bytes: Vec<u8>,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::default()
    }

    /// Copies `data` to the absolute position `off`, growing the buffer to
    /// at least `off + data.len()` bytes.
    ///
    /// Only fails when the allocator refuses to grow the buffer.
    pub fn splice(&mut self, off: usize, data: &[u8]) -> Result<()> {
        let end = off.checked_add(data.len()).ok_or(Error::InternalError)?;

        if self.bytes.len() < end {
            self.bytes
                .try_reserve(end - self.bytes.len())
                .map_err(|_| Error::InternalError)?;

            self.bytes.resize(end, 0);
        }

        self.bytes[off..end].copy_from_slice(data);

        Ok(())
    }

    /// Appends `data` at the current end of the buffer.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.splice(self.bytes.len(), data)
    }

    /// Drops the first `n` bytes.
    pub fn consume(&mut self, n: usize) {
        self.bytes.drain(..n);
    }

    /// Copies up to `dst.len()` bytes starting at `off` into `dst`.
    ///
    /// Returns the number of bytes copied and whether that exhausted the
    /// buffered bytes.
    pub fn emit(&self, off: usize, dst: &mut [u8]) -> (usize, bool) {
        let avail = self.bytes.len().saturating_sub(off);
        let len = dst.len().min(avail);

        dst[..len].copy_from_slice(&self.bytes[off..off + len]);

        (len, len == avail)
    }
}

impl std::ops::Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}
