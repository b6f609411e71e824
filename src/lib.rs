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

//! 🥞 HTTP/3 framing and connection multiplexing over a pluggable QUIC
//! transport.
//!
//! This crate turns a stream of QUIC events — datagram arrival,
//! unidirectional stream creation, stream receive and send-buffer
//! callbacks, timer firings — into HTTP/3 protocol behavior: control-stream
//! framing, the QPACK encoder and decoder side-channels, connection lookup
//! and demultiplexing, and I/O scheduling against a UDP socket. The wire
//! profile is HTTP/3 draft-17; the ALPN identifier is exported as
//! [`APPLICATION_PROTOCOL`].
//!
//! A [`Context`] owns the socket, the transport context, and every
//! connection multiplexed over them. Incoming datagrams are read in
//! batches, decoded into packets, grouped by peer address and destination
//! connection ID, and routed through a two-stage lookup: an authenticated
//! map keyed by the CID's embedded master id, and a keyed-hash map that
//! finds server-side connections still addressed by a client-generated CID.
//! Unmatched packet groups are offered to an [`Acceptor`], if one is
//! configured.
//!
//! The QUIC transport, the QPACK codecs, the event loop and the socket are
//! collaborators behind traits ([`transport`], [`qpack`], [`timer::EventLoop`],
//! [`socket::DatagramSocket`]); the HTTP request layer hooks in through
//! [`ConnectionHandler`]. Everything runs on a single thread per context:
//! the event loop delivers read and timer callbacks sequentially and all
//! mutation happens inside them. Deployments that shard across threads must
//! route packets for a given connection ID to the same context; the
//! `node_id`/`thread_id` fields of the authenticated CID exist for that.

#![allow(clippy::upper_case_acronyms)]
#![warn(unused_qualifications)]

#[macro_use]
extern crate log;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::ops::Range;

use smallvec::SmallVec;

use crate::socket::DatagramSocket;
use crate::stream::ControlStreams;
use crate::stream::EgressStreams;
use crate::stream::EgressUniStream;
use crate::stream::IngressUniStream;
use crate::stream::Role;
use crate::timer::EventLoop;
use crate::timer::Timer;
use crate::transport::DecodedPacket;
use crate::transport::OutgoingDatagram;
use crate::transport::SendStatus;
use crate::transport::StreamEvent;
use crate::transport::Transport;
use crate::transport::TransportConn;

/// The ALPN protocol identifier of the HTTP/3 draft this crate speaks.
pub const APPLICATION_PROTOCOL: &[u8] = b"h3-17";

/// Number of datagrams read from the socket in one batch.
const MAX_RECV_BATCH: usize = 32;

/// Scratch space shared by one batch of received datagrams.
const RECV_BUF_SIZE: usize = 16384;

/// Batch reading stops once less than this much scratch space is left.
const MIN_RECV_ROOM: usize = 2048;

/// Bound on decoded packets grouped into one connection lookup.
const MAX_PACKET_GROUP: usize = 64;

/// Outbound datagrams requested from the transport per iteration.
const MAX_SEND_BATCH: usize = 16;

/// Blocked-streams limit handed to the QPACK codecs.
// TODO make this configurable
const MAX_BLOCKED_STREAMS: u64 = 100;

/// A specialized [`Result`] type for this crate's operations.
///
/// [`Result`]: std::result::Result
pub type Result<T> = std::result::Result<T, Error>;

/// An HTTP/3 multiplexing error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The provided buffer is too short.
    BufferTooShort,

    /// More bytes are needed to complete the current frame. Callers keep
    /// the partial input buffered and retry; this never reaches the peer.
    Incomplete,

    /// Out of memory, or another unrecoverable internal condition.
    InternalError,

    /// A required critical stream was closed.
    ClosedCriticalStream,

    /// A unidirectional stream carried an unrecognized type byte.
    UnknownStreamType,

    /// A frame violated framing, size or ordering rules; carries the frame
    /// type.
    MalformedFrame(u8),

    /// The transport failed with the given opaque code; the connection's
    /// state is no longer trustworthy.
    TransportError(u64),
}

impl Error {
    /// Maps the error to a draft-17 HTTP/3 wire error code.
    pub fn to_wire(self) -> u64 {
        match self {
            Error::InternalError => 0x02,         // HTTP_INTERNAL_ERROR
            Error::UnknownStreamType => 0x0C,     // HTTP_UNKNOWN_STREAM_TYPE
            Error::ClosedCriticalStream => 0x0E,  // HTTP_CLOSED_CRITICAL_STREAM
            Error::MalformedFrame(ty) => 0x100 + u64::from(ty),

            // internal sentinels and transport failures never map to a
            // meaningful code of their own
            Error::BufferTooShort |
            Error::Incomplete |
            Error::TransportError(..) => 0xFF, // HTTP_GENERAL_PROTOCOL_ERROR
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl From<octets::BufferTooShortError> for Error {
    fn from(_err: octets::BufferTooShortError) -> Self {
        Error::BufferTooShort
    }
}

/// Callbacks and factories the HTTP request layer provides.
///
/// One handler serves every connection of a [`Context`]: it supplies the
/// QPACK codecs, observes control-stream frames, and reclaims connections
/// the transport has finished with.
pub trait ConnectionHandler<T: TransportConn> {
    /// Creates the QPACK decoder for a new connection.
    fn new_qpack_decoder(
        &mut self, header_table_size: u64, max_blocked: u64,
    ) -> Box<dyn qpack::Decoder>;

    /// Creates the QPACK encoder once the peer's SETTINGS have negotiated
    /// the header-table size.
    fn new_qpack_encoder(
        &mut self, header_table_size: u64, max_blocked: u64,
    ) -> Box<dyn qpack::Encoder>;

    /// Called for every frame read off the ingress control stream, SETTINGS
    /// included.
    fn handle_control_stream_frame(
        &mut self, conn_id: u64, ty: u8, payload: &[u8],
    ) -> Result<()>;

    /// Called when the transport reports a connection as finished. The
    /// connection has already been unregistered; dropping it releases the
    /// transport handle and the QPACK codecs.
    fn destroy_connection(&mut self, conn: Connection<T>);
}

/// Server-side hook that may turn an unmatched packet group into a new
/// connection.
pub trait Acceptor<T: TransportConn> {
    /// Inspects packets that matched no existing connection. When they open
    /// a valid new connection, returns its transport handle with the
    /// packets already ingested; the context finishes setup and
    /// registration.
    fn accept(
        &mut self, peer: SocketAddr, packets: &[DecodedPacket<'_>],
    ) -> Option<T>;
}

/// A single HTTP/3 connection: the transport handle, its QPACK codecs, and
/// the discovered and created unidirectional streams.
pub struct Connection<T> {
    transport: T,
    trace_id: String,

    qpack_dec: Box<dyn qpack::Decoder>,
    qpack_enc: Option<Box<dyn qpack::Encoder>>,

    ingress_streams: HashMap<u64, IngressUniStream>,
    egress_streams: EgressStreams,

    ingress_ids: ControlStreams,
    egress_ids: ControlStreams,

    timer: Timer,
}

impl<T: TransportConn> Connection<T> {
    fn new(transport: T, qpack_dec: Box<dyn qpack::Decoder>) -> Connection<T> {
        let trace_id = format!("{:016x}", transport.master_id());

        Connection {
            transport,
            trace_id,

            qpack_dec,
            qpack_enc: None,

            ingress_streams: HashMap::new(),
            egress_streams: EgressStreams::default(),

            ingress_ids: ControlStreams::default(),
            egress_ids: ControlStreams::default(),

            timer: Timer::default(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// A connection-identifying string, stable for the connection's life.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Whether the peer's SETTINGS frame has been processed. The QPACK
    /// encoder exists exactly from that point on.
    pub fn has_received_settings(&self) -> bool {
        self.qpack_enc.is_some()
    }

    /// Opens the three egress unistreams with their type-byte preambles and
    /// an initial empty SETTINGS frame on the control stream.
    fn open_egress_streams(&mut self) -> Result<()> {
        let control =
            self.open_egress_stream(stream::CONTROL_STREAM_PREAMBLE)?;
        let qpack_encoder =
            self.open_egress_stream(stream::QPACK_ENCODER_STREAM_PREAMBLE)?;
        let qpack_decoder =
            self.open_egress_stream(stream::QPACK_DECODER_STREAM_PREAMBLE)?;

        self.egress_ids = ControlStreams {
            control: Some(control),
            qpack_encoder: Some(qpack_encoder),
            qpack_decoder: Some(qpack_decoder),
        };

        Ok(())
    }

    fn open_egress_stream(&mut self, initial_bytes: &[u8]) -> Result<u64> {
        let stream_id = self.transport.open_uni()?;

        let mut stream = EgressUniStream::new(stream_id);
        stream.sendbuf.append(initial_bytes)?;
        self.egress_streams.insert(stream);

        self.transport.sync_sendbuf(stream_id, true)?;

        Ok(stream_id)
    }

    /// Writes a QPACK stream-cancel instruction for `stream_id` on the
    /// egress QPACK-decoder stream and notifies the transport.
    pub fn send_qpack_stream_cancel(&mut self, stream_id: u64) -> Result<()> {
        let sid = self.egress_ids.qpack_decoder.ok_or(Error::InternalError)?;

        let mut instruction = [0; qpack::MAX_INSTRUCTION_LEN];
        let len = self.qpack_dec.write_stream_cancel(stream_id, &mut instruction);

        let stream =
            self.egress_streams.get_mut(sid).ok_or(Error::InternalError)?;
        stream.sendbuf.append(&instruction[..len])?;

        self.transport.sync_sendbuf(sid, true)
    }

    /// Appends raw QPACK header-ack bytes to the egress QPACK-encoder
    /// stream and notifies the transport.
    pub fn send_qpack_header_ack(&mut self, bytes: &[u8]) -> Result<()> {
        let sid = self.egress_ids.qpack_encoder.ok_or(Error::InternalError)?;

        let stream =
            self.egress_streams.get_mut(sid).ok_or(Error::InternalError)?;
        stream.sendbuf.append(bytes)?;

        self.transport.sync_sendbuf(sid, true)
    }

    /// Drains and dispatches the transport's pending stream events.
    ///
    /// An error return is a connection error; the caller closes the
    /// transport with its wire code.
    fn process_events<H: ConnectionHandler<T>>(
        &mut self, handler: &mut H,
    ) -> Result<()> {
        while let Some(event) = self.transport.poll_event() {
            match event {
                StreamEvent::UniOpened { stream_id } => {
                    trace!(
                        "{} new ingress unistream {}",
                        self.trace_id,
                        stream_id
                    );

                    self.ingress_streams
                        .insert(stream_id, IngressUniStream::new(stream_id));
                },

                StreamEvent::Received {
                    stream_id,
                    off,
                    data,
                } => self.stream_received(handler, stream_id, off, &data)?,

                StreamEvent::ReceiveReset { stream_id, .. } => {
                    trace!(
                        "{} reset on critical stream {}",
                        self.trace_id,
                        stream_id
                    );

                    return Err(Error::ClosedCriticalStream);
                },

                StreamEvent::SendShift { stream_id, delta } => {
                    if let Some(stream) = self.egress_streams.get_mut(stream_id)
                    {
                        stream.sendbuf.consume(delta);
                    }
                },

                StreamEvent::SendStop { stream_id, .. } => {
                    trace!(
                        "{} peer stopped critical stream {}",
                        self.trace_id,
                        stream_id
                    );

                    return Err(Error::ClosedCriticalStream);
                },

                StreamEvent::Destroyed { stream_id } => {
                    self.ingress_streams.remove(&stream_id);
                    self.egress_streams.remove(stream_id);
                    self.ingress_ids.forget(stream_id);
                    self.egress_ids.forget(stream_id);
                },
            }
        }

        Ok(())
    }

    /// Handles bytes arriving on an ingress unistream: splice into the
    /// receive buffer, then run the stream's role handler over the
    /// contiguous window, consuming whatever prefix it advanced over.
    fn stream_received<H: ConnectionHandler<T>>(
        &mut self, handler: &mut H, stream_id: u64, off: usize, data: &[u8],
    ) -> Result<()> {
        let conn_id = self.transport.master_id();

        let Some(st) = self.ingress_streams.get_mut(&stream_id) else {
            return Ok(());
        };

        st.recvbuf.splice(off, data)?;

        // every discovered unistream is critical; a completed receive side
        // means the peer tore one down
        if self.transport.recv_finished(stream_id) {
            return Err(Error::ClosedCriticalStream);
        }

        let available =
            self.transport.recv_available(stream_id).min(st.recvbuf.len());
        if available == 0 {
            return Ok(());
        }

        let window = &st.recvbuf[..available];
        let mut src = octets::Octets::with_slice(window);

        let mut res = Ok(());

        'dispatch: loop {
            match st.role {
                Role::Unknown => {
                    // the peer is allowed to close a unistream before
                    // sending its type byte
                    let Ok(ty) = src.get_u8() else {
                        break 'dispatch;
                    };

                    st.role = match ty {
                        stream::CONTROL_STREAM_TYPE_ID => {
                            self.ingress_ids.control = Some(stream_id);
                            Role::Control
                        },

                        stream::QPACK_ENCODER_STREAM_TYPE_ID => {
                            self.ingress_ids.qpack_encoder = Some(stream_id);
                            Role::QpackEncoder
                        },

                        stream::QPACK_DECODER_STREAM_TYPE_ID => {
                            self.ingress_ids.qpack_decoder = Some(stream_id);
                            Role::QpackDecoder
                        },

                        unknown => {
                            trace!(
                                "{} unknown stream type {:#x} on stream {}",
                                self.trace_id,
                                unknown,
                                stream_id
                            );

                            self.transport.stop_sending(
                                stream_id,
                                Error::UnknownStreamType.to_wire(),
                            );

                            Role::Drain
                        },
                    };

                    // re-enter the new role's handler with the remaining
                    // bytes
                    continue 'dispatch;
                },

                Role::Control => loop {
                    let frame = match frame::read_frame(&mut src) {
                        Ok(frame) => frame,

                        // partial frame stays buffered until more arrives
                        Err(Error::Incomplete) => break 'dispatch,

                        Err(e) => {
                            res = Err(e);
                            break 'dispatch;
                        },
                    };

                    // the first frame must be SETTINGS, exactly once, and
                    // DATA never appears on the control stream
                    if self.qpack_enc.is_some() ==
                        (frame.ty == frame::SETTINGS_FRAME_TYPE_ID) ||
                        frame.ty == frame::DATA_FRAME_TYPE_ID
                    {
                        res = Err(Error::MalformedFrame(frame.ty));
                        break 'dispatch;
                    }

                    if frame.ty == frame::SETTINGS_FRAME_TYPE_ID {
                        if let Err(e) = handle_settings::<T, H>(
                            &mut self.qpack_enc,
                            handler,
                            frame.payload,
                        ) {
                            res = Err(e);
                            break 'dispatch;
                        }
                    }

                    if let Err(e) = handler.handle_control_stream_frame(
                        conn_id,
                        frame.ty,
                        frame.payload,
                    ) {
                        res = Err(e);
                        break 'dispatch;
                    }
                },

                Role::QpackEncoder => {
                    let rest = &window[src.off()..];

                    match self.qpack_dec.feed_encoder_stream(rest) {
                        Ok((consumed, unblocked)) => {
                            // TODO surface unblocked request streams to the
                            // request layer
                            let _ = unblocked;

                            src.skip(consumed)?;
                        },

                        Err(e) => res = Err(e),
                    }

                    break 'dispatch;
                },

                Role::QpackDecoder => {
                    let rest = &window[src.off()..];

                    match self.qpack_enc.as_mut() {
                        Some(enc) => match enc.feed_decoder_stream(rest) {
                            Ok(consumed) => src.skip(consumed)?,
                            Err(e) => res = Err(e),
                        },

                        // the peer cannot legitimately ack header blocks
                        // before its SETTINGS created our encoder; leave the
                        // bytes buffered until it exists
                        None => (),
                    }

                    break 'dispatch;
                },

                Role::Drain => {
                    src.skip(src.cap())?;
                    break 'dispatch;
                },
            }
        }

        // drop the handled prefix even when the handler failed, so the
        // transport's flow-control view stays consistent
        let consumed = src.off();
        if consumed != 0 {
            st.recvbuf.consume(consumed);
            self.transport.shift_recvbuf(stream_id, consumed);
        }

        res
    }
}

/// Applies a SETTINGS payload: negotiates the QPACK header-table size and
/// creates the encoder. SETTINGS must not have been received before.
fn handle_settings<T, H>(
    qpack_enc: &mut Option<Box<dyn qpack::Encoder>>, handler: &mut H,
    payload: &[u8],
) -> Result<()>
where
    T: TransportConn,
    H: ConnectionHandler<T>,
{
    debug_assert!(qpack_enc.is_none());

    let settings = frame::parse_settings(payload)?;

    let header_table_size = settings
        .header_table_size
        .unwrap_or(frame::DEFAULT_HEADER_TABLE_SIZE);

    *qpack_enc =
        Some(handler.new_qpack_encoder(header_table_size, MAX_BLOCKED_STREAMS));

    Ok(())
}

/// Owner of the UDP socket, the QUIC transport context, and every
/// connection multiplexed over them.
///
/// The embedding event loop drives a context through two entry points:
/// [`on_read()`] when the socket becomes readable and [`on_timeout()`] when
/// a connection's timer fires.
///
/// [`on_read()`]: Context::on_read
/// [`on_timeout()`]: Context::on_timeout
pub struct Context<T, H, L, S = mio::net::UdpSocket>
where
    T: Transport,
    H: ConnectionHandler<T::Conn>,
    L: EventLoop,
    S: DatagramSocket,
{
    socket: S,
    transport: T,
    event_loop: L,
    handler: H,
    acceptor: Option<Box<dyn Acceptor<T::Conn>>>,

    conns_by_id: HashMap<u64, Connection<T::Conn>>,
    conns_accepting: HashMap<u64, u64>,
}

impl<T, H, L, S> Context<T, H, L, S>
where
    T: Transport,
    H: ConnectionHandler<T::Conn>,
    L: EventLoop,
    S: DatagramSocket,
{
    /// Creates a context over the given socket and transport context.
    /// `acceptor` is `None` for client-only contexts.
    pub fn new(
        socket: S, transport: T, event_loop: L, handler: H,
        acceptor: Option<Box<dyn Acceptor<T::Conn>>>,
    ) -> Context<T, H, L, S> {
        Context {
            socket,
            transport,
            event_loop,
            handler,
            acceptor,

            conns_by_id: HashMap::new(),
            conns_accepting: HashMap::new(),
        }
    }

    pub fn connection(&self, master_id: u64) -> Option<&Connection<T::Conn>> {
        self.conns_by_id.get(&master_id)
    }

    pub fn connection_mut(
        &mut self, master_id: u64,
    ) -> Option<&mut Connection<T::Conn>> {
        self.conns_by_id.get_mut(&master_id)
    }

    /// Attaches a transport connection: creates the QPACK decoder,
    /// registers the connection in the lookup maps, opens the three egress
    /// unistreams and schedules the timer. Returns the master id.
    pub fn setup(&mut self, transport: T::Conn) -> Result<u64> {
        let master_id = transport.master_id();

        let qpack_dec = self.handler.new_qpack_decoder(
            frame::DEFAULT_HEADER_TABLE_SIZE,
            MAX_BLOCKED_STREAMS,
        );

        let mut conn = Connection::new(transport, qpack_dec);
        conn.open_egress_streams()?;

        if !conn.transport.is_client() {
            let key = cid::accepting_hash(
                conn.transport.peer_addr(),
                conn.transport.offered_cid(),
            );

            self.conns_accepting.insert(key, master_id);
        }

        trace!("{} connection set up", conn.trace_id);

        self.conns_by_id.insert(master_id, conn);
        self.schedule_timer(master_id);

        Ok(master_id)
    }

    /// Unregisters the connection and returns it. The transport handle and
    /// the QPACK codecs are released when the returned value drops.
    pub fn dispose(&mut self, master_id: u64) -> Option<Connection<T::Conn>> {
        let conn = self.conns_by_id.remove(&master_id)?;

        if !conn.transport.is_client() {
            let key = cid::accepting_hash(
                conn.transport.peer_addr(),
                conn.transport.offered_cid(),
            );

            self.conns_accepting.remove(&key);
        }

        if conn.timer.is_linked() {
            self.event_loop.unlink_timer(master_id);
        }

        trace!("{} connection disposed", conn.trace_id);

        Some(conn)
    }

    /// Two-stage connection lookup for an incoming packet.
    fn lookup(
        &self, peer: SocketAddr, packet: &DecodedPacket,
    ) -> Option<u64> {
        // a server receiving Initial or 0-RTT packets sees the CID the
        // client made up; only the keyed hash can find the connection
        if packet.dcid_client_generated {
            let key = cid::accepting_hash(peer, packet.dcid);

            if let Some(&master_id) = self.conns_accepting.get(&key) {
                if let Some(conn) = self.conns_by_id.get(&master_id) {
                    debug_assert!(!conn.transport.is_client());

                    if conn.transport.is_destination(peer, packet) {
                        return Some(master_id);
                    }
                }
            }
        }

        // authenticated CIDs are trusted only when they name this instance
        if let Some(plaintext) = packet.dcid_plaintext {
            if plaintext.node_id == 0 && plaintext.thread_id == 0 {
                if let Some(conn) = self.conns_by_id.get(&plaintext.master_id) {
                    if conn.transport.is_destination(peer, packet) {
                        return Some(plaintext.master_id);
                    }
                }
            }
        }

        // TODO recognize stateless resets for connections no longer in the
        // maps

        None
    }

    /// Drains the socket: reads datagrams in batches, decodes and groups
    /// the packets, and feeds each group to its connection. Call when the
    /// event loop reports the socket readable.
    pub fn on_read(&mut self) -> Result<()> {
        loop {
            let mut buf = [0; RECV_BUF_SIZE];
            let mut dgrams: SmallVec<
                [(SocketAddr, Range<usize>); MAX_RECV_BATCH],
            > = SmallVec::new();

            let mut used = 0;

            while dgrams.len() < MAX_RECV_BATCH &&
                RECV_BUF_SIZE - used > MIN_RECV_ROOM
            {
                match self.socket.recv_from(&mut buf[used..]) {
                    Ok((0, _)) => break,

                    Ok((len, from)) => {
                        dgrams.push((from, used..used + len));
                        used += len;
                    },

                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock =>
                        break,

                    Err(e) => {
                        debug!("recvmsg failed: {e:?}");
                        break;
                    },
                }
            }

            if dgrams.is_empty() {
                return Ok(());
            }

            self.process_datagrams(&buf, &dgrams)?;
        }
    }

    /// Decodes a batch of datagrams into packets, grouping consecutive
    /// packets that share both the peer address and the destination CID
    /// bytes, and flushes each group through [`process_packets()`].
    ///
    /// [`process_packets()`]: Context::process_packets
    fn process_datagrams(
        &mut self, buf: &[u8], dgrams: &[(SocketAddr, Range<usize>)],
    ) -> Result<()> {
        let mut group: SmallVec<[DecodedPacket<'_>; MAX_PACKET_GROUP]> =
            SmallVec::new();
        let mut group_peer = dgrams[0].0;

        for (peer, range) in dgrams {
            if !group.is_empty() && group_peer != *peer {
                self.process_packets(group_peer, &group)?;
                group.clear();
            }

            let mut off = range.start;
            while off < range.end {
                let Some((packet, consumed)) =
                    self.transport.decode_packet(&buf[off..range.end])
                else {
                    // undecodable bytes void the rest of the datagram
                    break;
                };

                debug_assert!(consumed > 0);
                off += consumed;

                // a coalesced packet for another connection starts a new
                // group
                if !group.is_empty() && group[0].dcid != packet.dcid {
                    self.process_packets(group_peer, &group)?;
                    group.clear();
                }

                group.push(packet);
                group_peer = *peer;

                if group.len() == MAX_PACKET_GROUP {
                    self.process_packets(group_peer, &group)?;
                    group.clear();
                }
            }
        }

        if !group.is_empty() {
            self.process_packets(group_peer, &group)?;
        }

        Ok(())
    }

    /// Routes one group of packets: deliver to the owning connection, or
    /// offer the group to the acceptor. Either way the connection's
    /// outbound path runs immediately afterwards, while its state is hot.
    fn process_packets(
        &mut self, peer: SocketAddr, packets: &[DecodedPacket<'_>],
    ) -> Result<()> {
        let mut master_id = self.lookup(peer, &packets[0]);

        match master_id {
            Some(id) => {
                if let Some(conn) = self.conns_by_id.get_mut(&id) {
                    for packet in packets {
                        conn.transport.receive(peer, packet);
                    }

                    if let Err(e) = conn.process_events(&mut self.handler) {
                        trace!("{} connection error: {e:?}", conn.trace_id);

                        conn.transport.close(e.to_wire());
                    }
                }
            },

            None =>
                if let Some(acceptor) = self.acceptor.as_mut() {
                    if let Some(transport) = acceptor.accept(peer, packets) {
                        master_id = Some(self.setup(transport)?);
                    }
                },
        }

        if let Some(id) = master_id {
            self.send(id)?;
        }

        Ok(())
    }

    /// Drains the transport's outbound packets for one connection, emits
    /// them on the socket, and re-arms the connection's timer.
    ///
    /// A free-connection signal from the transport unregisters the
    /// connection and hands it to [`ConnectionHandler::destroy_connection`];
    /// any other transport failure is surfaced to the embedder, which must
    /// not keep the context running against unknown transport state.
    pub fn send(&mut self, master_id: u64) -> Result<()> {
        let mut out: Vec<OutgoingDatagram> = Vec::with_capacity(MAX_SEND_BATCH);

        loop {
            let Some(conn) = self.conns_by_id.get_mut(&master_id) else {
                return Ok(());
            };

            out.clear();

            match conn.transport.poll_send(
                &mut conn.egress_streams,
                &mut out,
                MAX_SEND_BATCH,
            ) {
                Ok(SendStatus::Emitted) => {
                    for dgram in &out {
                        if let Err(e) =
                            self.socket.send_to(&dgram.data, dgram.to)
                        {
                            error!(
                                "{} sendmsg failed: {e:?}",
                                conn.trace_id
                            );
                        }
                    }

                    if out.len() < MAX_SEND_BATCH {
                        break;
                    }
                },

                Ok(SendStatus::FreeConnection) => {
                    if let Some(conn) = self.dispose(master_id) {
                        self.handler.destroy_connection(conn);
                    }

                    return Ok(());
                },

                Err(e) => {
                    error!("{} transport send failed: {e:?}", conn.trace_id);

                    return Err(e);
                },
            }
        }

        self.schedule_timer(master_id);

        Ok(())
    }

    /// Timer callback: the connection's deadline fired.
    pub fn on_timeout(&mut self, master_id: u64) -> Result<()> {
        if let Some(conn) = self.conns_by_id.get_mut(&master_id) {
            // the event loop unlinks a timer when it fires
            conn.timer.unlink();
        }

        self.send(master_id)
    }

    /// Re-arms the connection's timer from the transport's next deadline.
    /// Rescheduling to an unchanged deadline leaves the event loop alone.
    fn schedule_timer(&mut self, master_id: u64) {
        let Some(conn) = self.conns_by_id.get_mut(&master_id) else {
            return;
        };

        let Some(deadline) = conn.transport.next_timeout() else {
            if conn.timer.is_linked() {
                conn.timer.unlink();
                self.event_loop.unlink_timer(master_id);
            }

            return;
        };

        if conn.timer.expire_at() == Some(deadline) {
            return;
        }

        if conn.timer.is_linked() {
            conn.timer.unlink();
            self.event_loop.unlink_timer(master_id);
        }

        let now = self.event_loop.now();

        conn.timer.link(deadline);
        self.event_loop
            .link_timer(master_id, deadline.saturating_sub(now));
    }
}

pub mod buffer;
pub mod cid;
pub mod frame;
pub mod qpack;
pub mod socket;
pub mod stream;
pub mod timer;
pub mod transport;

#[cfg(test)]
mod test_utils;
