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

//! Connection-ID derived identities.

use std::net::SocketAddr;
use std::sync::OnceLock;

use ring::hmac;
use ring::rand::SecureRandom;

/// Authenticated plaintext of a locally-minted connection ID.
///
/// `node_id` and `thread_id` route packets across instances and shards; a
/// packet is handled locally only when both are zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaintextCid {
    pub master_id: u64,
    pub node_id: u64,
    pub thread_id: u64,
}

/// Largest connection ID the hash input accommodates (QUIC v1 limit).
const MAX_CID_LEN: usize = 20;

static ACCEPTING_KEY: OnceLock<hmac::Key> = OnceLock::new();

// Keyed to avoid collision attacks on the accepting map: without the secret
// a remote peer could craft CIDs that all land in one bucket.
fn accepting_key() -> &'static hmac::Key {
    ACCEPTING_KEY.get_or_init(|| {
        let rng = ring::rand::SystemRandom::new();

        let mut seed = [0; 32];
        rng.fill(&mut seed)
            .expect("failed to seed the accepting-key hash");

        hmac::Key::new(hmac::HMAC_SHA256, &seed)
    })
}

/// Keyed 64-bit hash of `(peer address, offered connection ID)`.
///
/// Server-side connections are looked up through this hash until the peer
/// switches to a locally-minted CID that can be authenticated directly. The
/// key lives for the whole process, so the hash is stable within a run but
/// meaningless outside of it.
pub fn accepting_hash(peer: SocketAddr, cid: &[u8]) -> u64 {
    debug_assert!(cid.len() <= MAX_CID_LEN);

    // family byte, address bytes, big-endian port, CID length byte, CID
    // bytes, packed without padding
    let mut input = [0; 1 + 16 + 2 + 1 + MAX_CID_LEN];
    let mut len = 0;

    match peer {
        SocketAddr::V4(addr) => {
            input[len] = libc::AF_INET as u8;
            len += 1;

            input[len..len + 4].copy_from_slice(&addr.ip().octets());
            len += 4;

            input[len..len + 2].copy_from_slice(&addr.port().to_be_bytes());
            len += 2;
        },

        SocketAddr::V6(addr) => {
            input[len] = libc::AF_INET6 as u8;
            len += 1;

            input[len..len + 16].copy_from_slice(&addr.ip().octets());
            len += 16;

            input[len..len + 2].copy_from_slice(&addr.port().to_be_bytes());
            len += 2;
        },
    }

    input[len] = cid.len() as u8;
    len += 1;

    input[len..len + cid.len()].copy_from_slice(cid);
    len += cid.len();

    let tag = hmac::sign(accepting_key(), &input[..len]);

    // the hash never leaves the process, so host byte order is fine
    let mut key = [0; 8];
    key.copy_from_slice(&tag.as_ref()[..8]);
    u64::from_ne_bytes(key)
}
