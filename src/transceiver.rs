use std::net::SocketAddr;

use crate::error::RelayError;

/// A source and sink for raw datagrams.
///
/// The instance drives a statically dispatched transceiver; [`RelaySocket`]
/// carries real traffic and tests substitute an in-memory implementation.
///
/// [`RelaySocket`]: crate::socket::RelaySocket
pub trait Transceiver {
    type Error: Into<RelayError>;
    fn addr(&self) -> SocketAddr;
    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, Self::Error>;
    fn send(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, Self::Error>;
}
