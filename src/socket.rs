use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

use crate::consts::{SOCKET_RECV_BUF_SIZE, SOCKET_SEND_BUF_SIZE};
use crate::error::SocketError;
use crate::transceiver::Transceiver;

/// Blocking UDP socket shared by every send and the read loop.
pub struct RelaySocket(UdpSocket);

impl RelaySocket {
    pub fn new(addr: impl ToSocketAddrs) -> Result<Self, SocketError> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no socket addresses found")
        })?;
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        if addr.is_ipv6() {
            socket.set_only_v6(true)?;
        }
        socket.set_send_buffer_size(SOCKET_SEND_BUF_SIZE)?;
        socket.set_recv_buffer_size(SOCKET_RECV_BUF_SIZE)?;
        socket.bind(&addr.into())?;
        Ok(Self(socket.into()))
    }
}

impl Transceiver for RelaySocket {
    type Error = SocketError;

    fn addr(&self) -> SocketAddr {
        self.0.local_addr().expect("address should be bound")
    }

    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, SocketError> {
        match self.0.recv_from(buf) {
            Ok((len, addr)) if len > 0 => Ok(Some((len, addr))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(SocketError::from(e)),
        }
    }

    fn send(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, SocketError> {
        match self.0.send_to(buf, addr) {
            Ok(len) => Ok(len),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(SocketError::from(e)),
        }
    }
}
