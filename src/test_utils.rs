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

//! Scripted stand-ins for the collaborators — transport, socket, event
//! loop, QPACK codecs and HTTP layer — shared by the unit tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use crate::cid::PlaintextCid;
use crate::qpack;
use crate::socket::DatagramSocket;
use crate::timer::EventLoop;
use crate::transport::DecodedPacket;
use crate::transport::OutgoingDatagram;
use crate::transport::SendSource;
use crate::transport::SendStatus;
use crate::transport::StreamEvent;
use crate::transport::Transport;
use crate::transport::TransportConn;
use crate::Acceptor;
use crate::Connection;
use crate::ConnectionHandler;
use crate::Error;
use crate::Result;

pub fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

/// Encodes one packet in the mock wire format; packets can be concatenated
/// into a datagram.
///
/// Layout: total length byte, flags byte (0x1 client-generated CID, 0x2
/// carries an authenticated master id), CID length byte, CID bytes, and the
/// optional big-endian master id.
pub fn encode_packet(
    cid: &[u8], client_generated: bool, master_id: Option<u64>,
) -> Vec<u8> {
    let mut out = vec![0, 0, cid.len() as u8];

    if client_generated {
        out[1] |= 0x1;
    }

    out.extend_from_slice(cid);

    if let Some(id) = master_id {
        out[1] |= 0x2;
        out.extend_from_slice(&id.to_be_bytes());
    }

    out[0] = out.len() as u8;

    out
}

/// Context-level transport mock: decodes the format produced by
/// [`encode_packet`].
#[derive(Default)]
pub struct MockTransport;

impl Transport for MockTransport {
    type Conn = MockConn;

    fn decode_packet<'a>(
        &mut self, datagram: &'a [u8],
    ) -> Option<(DecodedPacket<'a>, usize)> {
        if datagram.len() < 3 {
            return None;
        }

        let len = usize::from(datagram[0]);
        if len < 3 || len > datagram.len() {
            return None;
        }

        let flags = datagram[1];
        let cid_len = usize::from(datagram[2]);

        let mut off = 3;
        if off + cid_len > len {
            return None;
        }

        let dcid = &datagram[off..off + cid_len];
        off += cid_len;

        let dcid_plaintext = if flags & 0x2 != 0 {
            if off + 8 > len {
                return None;
            }

            let mut id = [0; 8];
            id.copy_from_slice(&datagram[off..off + 8]);

            Some(PlaintextCid {
                master_id: u64::from_be_bytes(id),
                node_id: 0,
                thread_id: 0,
            })
        } else {
            None
        };

        let packet = DecodedPacket {
            data: &datagram[..len],
            dcid,
            dcid_client_generated: flags & 0x1 != 0,
            dcid_plaintext,
        };

        Some((packet, len))
    }
}

/// One step of a scripted [`MockConn::poll_send`] response.
pub enum SendScript {
    Batch(Vec<OutgoingDatagram>),
    Free,
    Fatal(u64),
}

/// Scripted per-connection transport.
///
/// Tests push [`StreamEvent`]s and send-script steps, then observe the
/// calls the core made back into the transport.
pub struct MockConn {
    pub master_id: u64,
    pub peer: SocketAddr,
    pub offered_cid: Vec<u8>,
    pub client: bool,

    /// events handed out by `poll_event`, in order
    pub events: VecDeque<StreamEvent>,

    /// contiguous window per stream; grown when a `Received` event is
    /// polled, shrunk by `shift_recvbuf`
    pub available: HashMap<u64, usize>,

    /// streams whose receive side has completed
    pub finished: Vec<u64>,

    /// batches handed out by `poll_send`; an exhausted script yields empty
    /// `Emitted` batches
    pub send_script: VecDeque<SendScript>,

    pub timeout: Option<u64>,
    pub destination_ok: bool,

    /// calls recorded for the tests to inspect
    pub received: Vec<Vec<u8>>,
    pub opened: Vec<u64>,
    pub synced: Vec<(u64, bool)>,
    pub shifted: Vec<(u64, usize)>,
    pub stopped: Vec<(u64, u64)>,
    pub closed: Option<u64>,

    next_uni_id: u64,
}

impl MockConn {
    fn new(
        master_id: u64, peer: SocketAddr, offered_cid: &[u8], client: bool,
    ) -> MockConn {
        MockConn {
            master_id,
            peer,
            offered_cid: offered_cid.to_vec(),
            client,

            events: VecDeque::new(),
            available: HashMap::new(),
            finished: Vec::new(),
            send_script: VecDeque::new(),
            timeout: None,
            destination_ok: true,

            received: Vec::new(),
            opened: Vec::new(),
            synced: Vec::new(),
            shifted: Vec::new(),
            stopped: Vec::new(),
            closed: None,

            // first self-initiated unidirectional stream id
            next_uni_id: if client { 2 } else { 3 },
        }
    }

    pub fn server(
        master_id: u64, peer: SocketAddr, offered_cid: &[u8],
    ) -> MockConn {
        MockConn::new(master_id, peer, offered_cid, false)
    }

    pub fn client(master_id: u64, peer: SocketAddr) -> MockConn {
        MockConn::new(master_id, peer, b"", true)
    }
}

impl TransportConn for MockConn {
    fn master_id(&self) -> u64 {
        self.master_id
    }

    fn offered_cid(&self) -> &[u8] {
        &self.offered_cid
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn is_client(&self) -> bool {
        self.client
    }

    fn is_destination(
        &self, _peer: SocketAddr, _packet: &DecodedPacket,
    ) -> bool {
        self.destination_ok
    }

    fn receive(&mut self, _peer: SocketAddr, packet: &DecodedPacket) {
        self.received.push(packet.data.to_vec());
    }

    fn poll_event(&mut self) -> Option<StreamEvent> {
        let event = self.events.pop_front()?;

        // data arrival extends the stream's contiguous window
        if let StreamEvent::Received {
            stream_id,
            off,
            data,
        } = &event
        {
            let avail = self.available.entry(*stream_id).or_insert(0);
            *avail = (*avail).max(off + data.len());
        }

        Some(event)
    }

    fn open_uni(&mut self) -> Result<u64> {
        let id = self.next_uni_id;
        self.next_uni_id += 4;

        self.opened.push(id);

        Ok(id)
    }

    fn sync_sendbuf(&mut self, stream_id: u64, activate: bool) -> Result<()> {
        self.synced.push((stream_id, activate));
        Ok(())
    }

    fn shift_recvbuf(&mut self, stream_id: u64, len: usize) {
        self.shifted.push((stream_id, len));

        if let Some(avail) = self.available.get_mut(&stream_id) {
            *avail = avail.saturating_sub(len);
        }
    }

    fn recv_available(&self, stream_id: u64) -> usize {
        self.available.get(&stream_id).copied().unwrap_or(0)
    }

    fn recv_finished(&self, stream_id: u64) -> bool {
        self.finished.contains(&stream_id)
    }

    fn stop_sending(&mut self, stream_id: u64, error_code: u64) {
        self.stopped.push((stream_id, error_code));
    }

    fn poll_send(
        &mut self, _src: &mut dyn SendSource, out: &mut Vec<OutgoingDatagram>,
        _max: usize,
    ) -> Result<SendStatus> {
        match self.send_script.pop_front() {
            Some(SendScript::Batch(dgrams)) => {
                out.extend(dgrams);
                Ok(SendStatus::Emitted)
            },

            Some(SendScript::Free) => Ok(SendStatus::FreeConnection),

            Some(SendScript::Fatal(code)) => Err(Error::TransportError(code)),

            None => Ok(SendStatus::Emitted),
        }
    }

    fn next_timeout(&self) -> Option<u64> {
        self.timeout
    }

    fn close(&mut self, error_code: u64) {
        self.closed = Some(error_code);
    }
}

/// Socket stand-in: reads pop scripted datagrams, writes are recorded.
#[derive(Default)]
pub struct MockSocket {
    pub inbound: VecDeque<(SocketAddr, Vec<u8>)>,
    pub sent: Vec<(SocketAddr, Vec<u8>)>,

    /// number of upcoming send calls that fail
    pub fail_sends: usize,
}

impl DatagramSocket for MockSocket {
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        match self.inbound.pop_front() {
            Some((from, data)) => {
                buf[..data.len()].copy_from_slice(&data);
                Ok((data.len(), from))
            },

            None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }

    fn send_to(&mut self, buf: &[u8], to: SocketAddr) -> io::Result<usize> {
        if self.fail_sends > 0 {
            self.fail_sends -= 1;
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }

        self.sent.push((to, buf.to_vec()));

        Ok(buf.len())
    }
}

/// Event loop stand-in with a settable clock and recorded timer calls.
#[derive(Default)]
pub struct MockLoop {
    pub now: u64,
    pub linked: Vec<(u64, u64)>,
    pub unlinked: Vec<u64>,
}

impl EventLoop for MockLoop {
    fn now(&self) -> u64 {
        self.now
    }

    fn link_timer(&mut self, conn_id: u64, delay: u64) {
        self.linked.push((conn_id, delay));
    }

    fn unlink_timer(&mut self, conn_id: u64) {
        self.unlinked.push(conn_id);
    }
}

/// Recording QPACK decoder; consumes everything it is fed.
pub struct MockDecoder {
    fed: Rc<RefCell<Vec<u8>>>,
}

impl qpack::Decoder for MockDecoder {
    fn feed_encoder_stream(&mut self, src: &[u8]) -> Result<(usize, Vec<u64>)> {
        self.fed.borrow_mut().extend_from_slice(src);
        Ok((src.len(), Vec::new()))
    }

    fn write_stream_cancel(&mut self, stream_id: u64, dst: &mut [u8]) -> usize {
        dst[0] = 0xee;
        dst[1] = stream_id as u8;
        2
    }
}

/// Recording QPACK encoder; consumes everything it is fed.
pub struct MockEncoder {
    fed: Rc<RefCell<Vec<u8>>>,
}

impl qpack::Encoder for MockEncoder {
    fn feed_decoder_stream(&mut self, src: &[u8]) -> Result<usize> {
        self.fed.borrow_mut().extend_from_slice(src);
        Ok(src.len())
    }
}

/// HTTP-layer stand-in: records control frames, destroyed connections, and
/// the QPACK codecs it was asked to create.
#[derive(Default)]
pub struct TestHandler {
    pub frames: Vec<(u64, u8, Vec<u8>)>,
    pub destroyed: Vec<u64>,

    /// `(header_table_size, max_blocked)` of every codec created
    pub decoders: Vec<(u64, u64)>,
    pub encoders: Vec<(u64, u64)>,

    /// bytes fed to any created codec
    pub decoder_fed: Rc<RefCell<Vec<u8>>>,
    pub encoder_fed: Rc<RefCell<Vec<u8>>>,
}

impl<T: TransportConn> ConnectionHandler<T> for TestHandler {
    fn new_qpack_decoder(
        &mut self, header_table_size: u64, max_blocked: u64,
    ) -> Box<dyn qpack::Decoder> {
        self.decoders.push((header_table_size, max_blocked));

        Box::new(MockDecoder {
            fed: Rc::clone(&self.decoder_fed),
        })
    }

    fn new_qpack_encoder(
        &mut self, header_table_size: u64, max_blocked: u64,
    ) -> Box<dyn qpack::Encoder> {
        self.encoders.push((header_table_size, max_blocked));

        Box::new(MockEncoder {
            fed: Rc::clone(&self.encoder_fed),
        })
    }

    fn handle_control_stream_frame(
        &mut self, conn_id: u64, ty: u8, payload: &[u8],
    ) -> Result<()> {
        self.frames.push((conn_id, ty, payload.to_vec()));
        Ok(())
    }

    fn destroy_connection(&mut self, conn: Connection<T>) {
        self.destroyed.push(conn.transport().master_id());
    }
}

/// Acceptor that records every offered group and hands out scripted
/// connections.
#[derive(Default)]
pub struct MockAcceptor {
    pub accepts: VecDeque<MockConn>,

    /// `(peer, group CIDs)` per call, shared with the test
    pub calls: Rc<RefCell<Vec<(SocketAddr, Vec<Vec<u8>>)>>>,
}

impl Acceptor<MockConn> for MockAcceptor {
    fn accept(
        &mut self, peer: SocketAddr, packets: &[DecodedPacket<'_>],
    ) -> Option<MockConn> {
        let cids = packets.iter().map(|p| p.dcid.to_vec()).collect();
        self.calls.borrow_mut().push((peer, cids));

        self.accepts.pop_front()
    }
}

pub type TestContext =
    crate::Context<MockTransport, TestHandler, MockLoop, MockSocket>;

pub fn test_context(
    acceptor: Option<Box<dyn Acceptor<MockConn>>>,
) -> TestContext {
    crate::Context::new(
        MockSocket::default(),
        MockTransport,
        MockLoop::default(),
        TestHandler::default(),
        acceptor,
    )
}
