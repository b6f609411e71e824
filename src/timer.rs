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

//! Event-loop facilities the core relies on.

/// A monotonic clock and one timer slot per connection.
///
/// The embedding event loop implements this; when a linked timer fires it
/// calls [`Context::on_timeout()`] with the connection's id. A fired timer
/// is implicitly unlinked.
///
/// [`Context::on_timeout()`]: crate::Context::on_timeout
pub trait EventLoop {
    /// Monotonic time in milliseconds.
    fn now(&self) -> u64;

    /// Arms the connection's timer to fire `delay` milliseconds from now,
    /// replacing any earlier deadline.
    fn link_timer(&mut self, conn_id: u64, delay: u64);

    /// Disarms the connection's timer.
    fn unlink_timer(&mut self, conn_id: u64);
}

/// Mirror of a connection's event-loop timer, kept so that rescheduling to
/// an unchanged deadline can skip the event loop entirely.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Timer {
    expire_at: Option<u64>,
}

impl Timer {
    pub fn is_linked(&self) -> bool {
        self.expire_at.is_some()
    }

    pub fn expire_at(&self) -> Option<u64> {
        self.expire_at
    }

    pub fn link(&mut self, deadline: u64) {
        self.expire_at = Some(deadline);
    }

    pub fn unlink(&mut self) {
        self.expire_at = None;
    }
}
