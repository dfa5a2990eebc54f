use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;

use crate::transceiver::Transceiver;

/// In-memory transceiver for protocol tests. Clones share the same capture
/// buffer, so a test can keep a handle while the instance owns the other.
#[derive(Clone, Default)]
pub(crate) struct SimSocket {
    sent: Rc<RefCell<Vec<(SocketAddr, Vec<u8>)>>>,
}

impl SimSocket {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Drains every datagram sent so far, in send order.
    pub(crate) fn take_sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.sent.borrow_mut().drain(..).collect()
    }

    /// Drains the datagrams addressed to one endpoint, in send order.
    pub(crate) fn take_sent_to(&self, addr: SocketAddr) -> Vec<Vec<u8>> {
        let mut sent = self.sent.borrow_mut();
        let (matched, rest): (Vec<_>, Vec<_>) = sent.drain(..).partition(|(to, _)| *to == addr);
        *sent = rest;
        matched.into_iter().map(|(_, buf)| buf).collect()
    }
}

impl Transceiver for SimSocket {
    type Error = std::io::Error;

    fn addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 9998))
    }

    fn recv(&self, _buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, Self::Error> {
        Ok(None)
    }

    fn send(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, Self::Error> {
        self.sent.borrow_mut().push((addr, buf.to_vec()));
        Ok(buf.len())
    }
}
