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

//! Interfaces consumed from the QUIC transport.
//!
//! The multiplexing core never looks inside QUIC packets itself; everything
//! it needs from the transport — packet decoding, per-connection receive,
//! stream events, outbound packetization and deadlines — comes through the
//! traits in this module.

use std::net::SocketAddr;

use crate::cid::PlaintextCid;
use crate::Result;

/// A QUIC packet decoded out of a datagram, borrowing the receive buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedPacket<'a> {
    /// The packet's full wire image.
    pub data: &'a [u8],

    /// Destination connection ID bytes as they appear on the wire.
    pub dcid: &'a [u8],

    /// Whether the destination CID may have been generated by the client
    /// (Initial and 0-RTT packets carry client-chosen IDs).
    pub dcid_client_generated: bool,

    /// Authenticated decode of a locally-minted destination CID, when it
    /// passed.
    pub dcid_plaintext: Option<PlaintextCid>,
}

/// A stream-level event surfaced by the transport after packets or buffer
/// updates have been fed to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// The peer opened a unidirectional stream.
    UniOpened { stream_id: u64 },

    /// Bytes arrived on a stream, at the given offset relative to the start
    /// of the stream's unconsumed window.
    Received {
        stream_id: u64,
        off: usize,
        data: Vec<u8>,
    },

    /// The peer reset the sending side of a stream.
    ReceiveReset { stream_id: u64, error_code: u64 },

    /// The transport durably handed off the first `delta` bytes of the
    /// stream's send buffer; they can be dropped.
    SendShift { stream_id: u64, delta: usize },

    /// The peer asked us to stop sending on a stream.
    SendStop { stream_id: u64, error_code: u64 },

    /// The transport destroyed the stream; any state held for it can be
    /// released.
    Destroyed { stream_id: u64 },
}

/// A datagram generated by the transport, ready for `sendmsg`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingDatagram {
    pub to: SocketAddr,
    pub data: Vec<u8>,
}

/// Outcome of a [`poll_send()`] call.
///
/// [`poll_send()`]: TransportConn::poll_send
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendStatus {
    /// Datagrams were generated into the output batch; a short batch means
    /// the transport has drained for now.
    Emitted,

    /// The connection has finished all of its work and its resources can be
    /// released.
    FreeConnection,
}

/// Borrowed view of stream send buffers, lent to the transport while it
/// packetizes outbound data.
pub trait SendSource {
    /// Copies up to `dst.len()` bytes starting at offset `off` of the
    /// stream's send buffer into `dst`.
    ///
    /// Returns the number of bytes written and whether that exhausted the
    /// buffered bytes.
    fn emit(&mut self, stream_id: u64, off: usize, dst: &mut [u8])
        -> (usize, bool);
}

/// Context-level transport operations shared by every connection.
pub trait Transport {
    type Conn: TransportConn;

    /// Decodes the QUIC packet at the head of `datagram`.
    ///
    /// Returns the packet and the number of bytes it spans (at least one),
    /// or `None` when the bytes are not a decodable packet, in which case
    /// the rest of the datagram is discarded.
    fn decode_packet<'a>(
        &mut self, datagram: &'a [u8],
    ) -> Option<(DecodedPacket<'a>, usize)>;
}

/// A single QUIC connection owned by the transport.
pub trait TransportConn {
    /// The authenticated numeric identity embedded in locally-minted CIDs.
    fn master_id(&self) -> u64;

    /// The destination CID the client offered in its first flight.
    fn offered_cid(&self) -> &[u8];

    fn peer_addr(&self) -> SocketAddr;

    fn is_client(&self) -> bool;

    /// Whether `packet` is destined for this connection.
    fn is_destination(&self, peer: SocketAddr, packet: &DecodedPacket)
        -> bool;

    /// Feeds a decoded packet to the connection. Packet-level errors are the
    /// transport's to handle; they surface later as stream events or
    /// connection teardown.
    fn receive(&mut self, peer: SocketAddr, packet: &DecodedPacket);

    /// Drains the next stream event produced by earlier calls.
    fn poll_event(&mut self) -> Option<StreamEvent>;

    /// Opens a self-initiated unidirectional stream.
    fn open_uni(&mut self) -> Result<u64>;

    /// Tells the transport the stream's send buffer changed; `activate`
    /// means new bytes became available for sending.
    fn sync_sendbuf(&mut self, stream_id: u64, activate: bool) -> Result<()>;

    /// Releases `len` consumed bytes of receive-side flow control.
    fn shift_recvbuf(&mut self, stream_id: u64, len: usize);

    /// Contiguous bytes currently readable at the head of the stream.
    fn recv_available(&self, stream_id: u64) -> usize;

    /// Whether the stream's receive side has been fully delivered and
    /// closed.
    fn recv_finished(&self, stream_id: u64) -> bool;

    /// Asks the peer to stop sending on the stream.
    fn stop_sending(&mut self, stream_id: u64, error_code: u64);

    /// Generates up to `max` outbound datagrams into `out`, pulling stream
    /// payload through `src`.
    fn poll_send(
        &mut self, src: &mut dyn SendSource, out: &mut Vec<OutgoingDatagram>,
        max: usize,
    ) -> Result<SendStatus>;

    /// The transport's next deadline, in milliseconds on the event loop's
    /// monotonic clock, if any timed work is pending.
    fn next_timeout(&self) -> Option<u64>;

    /// Closes the connection with an application-level error code.
    fn close(&mut self, error_code: u64);
}
