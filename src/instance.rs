use std::any::Any;
use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::panic::{self, AssertUnwindSafe};

use crate::bytes::ReadFrame;
use crate::client::{Client, SyncState};
use crate::consts::MAX_DATAGRAM_SIZE;
use crate::error::RelayError;
use crate::packet::{
    classify, encode, Fragments, HelloRequest, HelloResponse, KeepAliveResponse, PacketKind,
    SyncHeader, SyncResponse, SyncStartRequest, SyncStartResponse,
};
use crate::rewrite::rewrite_for_recipient;
use crate::session::{std_deviation, Session};
use crate::socket::RelaySocket;
use crate::transceiver::Transceiver;

type Result<T> = std::result::Result<T, RelayError>;

/// Process-wide registry of clients and sessions, driven by one read loop.
///
/// Clients are keyed by their remote UDP port and sessions by their 32-bit
/// id; every cross-reference between the two is a key into these maps.
pub struct Instance<T: Transceiver> {
    transceiver: T,
    clients: HashMap<u16, Client>,
    sessions: HashMap<u32, Session>,
}

impl Instance<RelaySocket> {
    /// Binds a UDP socket on `addr` and wraps it in a fresh instance.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        Ok(Self::new(RelaySocket::new(addr)?))
    }
}

impl<T: Transceiver> Instance<T> {
    pub fn new(transceiver: T) -> Self {
        Self {
            transceiver,
            clients: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transceiver.addr()
    }

    /// Reads and handles datagrams until the socket fails. Handler faults
    /// never escape; only a receive error ends the loop.
    pub fn run(&mut self) -> Result<()> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            let packet = self.transceiver.recv(&mut buf).map_err(|e| e.into())?;
            let Some((len, addr)) = packet else { continue };
            self.process(addr, &buf[..len]);
        }
    }

    /// Handles one inbound datagram behind a fault barrier: protocol errors
    /// are logged and the datagram dropped, and a panicking handler is caught
    /// and reported with a hex dump of the offending bytes.
    pub fn process(&mut self, addr: SocketAddr, data: &[u8]) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(addr, data))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::warn!("dropping packet from {}: {}", addr, err),
            Err(payload) => {
                log::error!(
                    "handler panicked on packet from {}: {}\n{}",
                    addr,
                    panic_message(&payload),
                    hex_dump(data)
                );
            }
        }
    }

    fn dispatch(&mut self, addr: SocketAddr, data: &[u8]) -> Result<()> {
        let kind = classify(data);
        if kind == PacketKind::Hello {
            return self.handle_hello(addr, data);
        }
        let port = addr.port();
        let Some(client) = self.clients.get_mut(&port) else {
            return Err(RelayError::UnknownClient(addr));
        };
        client.touch();
        match kind {
            PacketKind::SyncStart => self.handle_sync_start(port, data),
            PacketKind::Sync => self.handle_sync(port),
            PacketKind::KeepAlive => self.handle_keep_alive(port),
            PacketKind::PeerRelay => self.handle_peer_relay(port, data),
            PacketKind::Hello | PacketKind::Unknown => Err(RelayError::UnknownPacket {
                addr,
                len: data.len(),
            }),
        }
    }

    fn handle_hello(&mut self, addr: SocketAddr, data: &[u8]) -> Result<()> {
        let req = HelloRequest::read(&mut &data[..])?;
        log::info!("client connected from {}", addr);
        let mut client = Client::new(addr, req.cli_hello_time);
        let response = encode(&HelloResponse {
            seq: client.next_control_seq(),
            cli_hello_time: client.cli_hello_time,
        });
        self.clients.insert(addr.port(), client);
        self.send_to(&response, addr);
        Ok(())
    }

    /// Joins the sender to the named session, creating it on first sight, and
    /// arrives at the barrier with a latched start state.
    fn handle_sync_start(&mut self, port: u16, data: &[u8]) -> Result<()> {
        let req = SyncStartRequest::read(&mut &data[..])?;
        let session = self.sessions.entry(req.session_id).or_insert_with(|| {
            log::info!(
                "creating session {} for {} players",
                req.session_id,
                req.max_clients
            );
            Session::new(req.session_id, req.max_clients)
        });

        let client = self
            .clients
            .get_mut(&port)
            .expect("caller resolved the client");
        client.session = Some(req.session_id);
        client.session_slot = req.session_slot;
        client.sync_state = SyncState::Start;
        let addr = client.address;

        let mut filled = false;
        match session.clients.get(&req.session_slot).copied() {
            None => {
                session.clients.insert(req.session_slot, port);
                session.client_count += 1;
                log::debug!(
                    "client {} took slot {} in session {} ({}/{})",
                    addr,
                    req.session_slot,
                    req.session_id,
                    session.client_count,
                    session.max_clients
                );
                filled = session.is_full();
            }
            Some(occupant) if occupant != port => {
                log::warn!(
                    "slot {} in session {} is occupied, {} rejoins without replacing it",
                    req.session_slot,
                    req.session_id,
                    addr
                );
            }
            Some(_) => {}
        }

        if filled {
            self.build_peer_tables(req.session_id);
        }
        self.advance_barrier(req.session_id);
        Ok(())
    }

    fn handle_sync(&mut self, port: u16) -> Result<()> {
        let client = self.client_mut(port);
        let Some(session_id) = client.session else {
            return Err(RelayError::NoSession(client.address));
        };
        if !client.sync_stopped {
            // The first sync only marks the client as done loading.
            client.sync_stopped = true;
            return Ok(());
        }
        client.sync_state = SyncState::Sync;
        self.advance_barrier(session_id);
        Ok(())
    }

    fn handle_keep_alive(&mut self, port: u16) -> Result<()> {
        let client = self.client_mut(port);
        let Some(session_id) = client.session else {
            return Err(RelayError::NoSession(client.address));
        };
        client.sync_state = SyncState::KeepAlive;
        self.advance_barrier(session_id);
        Ok(())
    }

    /// Forwards each fragment of a world packet to the peer it names,
    /// rewritten for that recipient. An unknown peer id or a truncated
    /// fragment abandons the rest of the datagram; fragments already relayed
    /// stand.
    fn handle_peer_relay(&mut self, port: u16, data: &[u8]) -> Result<()> {
        let client = self.client_mut(port);
        let Some(session_id) = client.session else {
            return Err(RelayError::NoSession(client.address));
        };
        let sender_slot = client.session_slot;
        let peers = client.peers.clone();

        match self.sessions.get(&session_id) {
            Some(session) if session.ready => {}
            // Expected while members are still loading.
            _ => return Ok(()),
        }

        for fragment in Fragments::new(data) {
            let (peer_id, msg) = fragment?;
            let &peer_port = peers.get(&peer_id).ok_or(RelayError::UnknownPeer {
                session_id,
                slot: sender_slot,
                peer_id,
            })?;
            let peer = self
                .clients
                .get(&peer_port)
                .expect("peer tables only reference registered clients");
            let out = rewrite_for_recipient(sender_slot, peer.time_diff(), msg)?;
            self.send_to(&out, peer.address);
        }
        Ok(())
    }

    /// Gives every member its local numbering of the other members, ordered
    /// by ascending seat slot, and marks the session ready.
    fn build_peer_tables(&mut self, session_id: u32) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        let mut members: Vec<(u8, u16)> = session
            .clients
            .iter()
            .map(|(&slot, &port)| (slot, port))
            .collect();
        members.sort_by_key(|&(slot, _)| slot);
        session.ready = true;

        for &(_, port) in &members {
            let Some(client) = self.clients.get_mut(&port) else {
                continue;
            };
            log::debug!("generating peers for client {}", client.address);
            client.peers.clear();
            let mut index = 0u8;
            for &(_, other) in &members {
                if other == port {
                    continue;
                }
                log::debug!("peer {} of port {} is port {}", index, port, other);
                client.peers.insert(index, other);
                index += 1;
            }
        }

        let hello_times: Vec<u16> = members
            .iter()
            .filter_map(|&(_, port)| self.clients.get(&port))
            .map(|c| c.cli_hello_time)
            .collect();
        log::debug!(
            "session {} ready, hello-time deviation {}ms",
            session_id,
            std_deviation(&hello_times)
        );
    }

    /// Records one barrier arrival; on the arrival that completes the round,
    /// fans a response out to every latched member and then advances the
    /// round counter.
    fn advance_barrier(&mut self, session_id: u32) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        if !session.arrive() {
            return;
        }
        let members = session.member_ports();
        for &port in &members {
            self.send_sync_response(port, session_id);
        }

        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        session.finish_round();
        let round = session.sync_count - 1;
        let pings: Vec<u16> = members
            .iter()
            .filter_map(|port| self.clients.get(port))
            .map(|c| c.ping)
            .collect();
        log::trace!(
            "session {} finished round {}, ping deviation {}ms",
            session_id,
            round,
            std_deviation(&pings)
        );
    }

    /// Sends the barrier response matching the client's latched state, if
    /// any, and resets the latch.
    fn send_sync_response(&mut self, port: u16, session_id: u32) {
        let Some((sync_count, response_session_id, peer_mask)) = self
            .sessions
            .get(&session_id)
            .map(|s| (s.sync_count, s.session_id, s.peer_mask()))
        else {
            return;
        };
        let Some(client) = self.clients.get_mut(&port) else {
            return;
        };
        let state = client.take_sync_state();
        if state == SyncState::None {
            return;
        }
        let header = SyncHeader {
            seq: client.next_control_seq(),
            time_diff: client.time_diff(),
            cli_hello_time: client.cli_hello_time,
            sync_count,
        };
        let addr = client.address;
        let response = match state {
            SyncState::Start => encode(&SyncStartResponse {
                header,
                session_slot: client.session_slot,
                session_id: response_session_id,
                peer_mask,
            }),
            SyncState::Sync => encode(&SyncResponse { header }),
            SyncState::KeepAlive => encode(&KeepAliveResponse { header }),
            SyncState::None => return,
        };
        self.send_to(&response, addr);
    }

    fn client_mut(&mut self, port: u16) -> &mut Client {
        self.clients
            .get_mut(&port)
            .expect("caller resolved the client")
    }

    /// Send failures are logged and never tear down a client or session.
    fn send_to(&self, buf: &[u8], addr: SocketAddr) {
        if let Err(e) = self.transceiver.send(buf, addr) {
            let err: RelayError = e.into();
            log::error!("failed to send {} bytes to {}: {}", buf.len(), addr, err);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

fn hex_dump(data: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(data.len() * 3 + 1);
    for (i, byte) in data.iter().enumerate() {
        let sep = if i == 0 {
            ""
        } else if i % 16 == 0 {
            "\n"
        } else {
            " "
        };
        let _ = write!(out, "{}{:02x}", sep, byte);
    }
    out
}
