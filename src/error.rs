use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
#[error("udp socket failure: {source}")]
pub struct SocketError {
    #[from]
    source: std::io::Error,
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("no client bound for {0}")]
    UnknownClient(SocketAddr),
    #[error("unrecognized {len}-byte packet from {addr}")]
    UnknownPacket { addr: SocketAddr, len: usize },
    #[error("{0} sent a state packet without joining a session")]
    NoSession(SocketAddr),
    #[error("no peer {peer_id} for slot {slot} in session {session_id}")]
    UnknownPeer {
        session_id: u32,
        slot: u8,
        peer_id: u8,
    },
    #[error("fragment at offset {offset} overruns {len}-byte datagram")]
    TruncatedFragment { offset: usize, len: usize },
    #[error("sub-packet table walks past end of payload at offset {0}")]
    MalformedSubPacket(usize),
}
