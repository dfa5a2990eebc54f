use std::collections::HashMap;
use std::mem;
use std::net::SocketAddr;
use std::time::Instant;

use crate::consts::CONTROL_SEQ_WRAP;

/// Barrier state latched from the client's most recent control packet,
/// consumed when the round's responses fan out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum SyncState {
    #[default]
    None,
    Start,
    Sync,
    KeepAlive,
}

/// Per-endpoint state, keyed in the instance by remote UDP port.
pub(crate) struct Client {
    pub(crate) address: SocketAddr,
    pub(crate) cli_hello_time: u16,
    pub(crate) joined_time: Instant,
    pub(crate) last_packet_time: Instant,
    pub(crate) ping: u16,
    pub(crate) session: Option<u32>,
    pub(crate) session_slot: u8,
    pub(crate) control_seq: u16,
    pub(crate) sync_stopped: bool,
    pub(crate) sync_state: SyncState,
    /// This client's local numbering of the other session members, built once
    /// when the session becomes ready.
    pub(crate) peers: HashMap<u8, u16>,
}

impl Client {
    pub(crate) fn new(address: SocketAddr, cli_hello_time: u16) -> Self {
        let now = Instant::now();
        Self {
            address,
            cli_hello_time,
            joined_time: now,
            last_packet_time: now,
            ping: 0,
            session: None,
            session_slot: 0,
            control_seq: 0,
            sync_stopped: false,
            sync_state: SyncState::None,
            peers: HashMap::new(),
        }
    }

    /// Hands out the client's next control-frame sequence number.
    pub(crate) fn next_control_seq(&mut self) -> u16 {
        let seq = self.control_seq;
        self.control_seq += 1;
        if self.control_seq > CONTROL_SEQ_WRAP {
            self.control_seq = 0;
        }
        seq
    }

    /// Milliseconds since the hello, truncated to the wire width.
    pub(crate) fn time_diff(&self) -> u16 {
        self.joined_time.elapsed().as_millis() as u16
    }

    /// Refreshes the ping estimate from the inter-packet gap.
    pub(crate) fn touch(&mut self) {
        self.ping = self.last_packet_time.elapsed().as_millis() as u16;
        self.last_packet_time = Instant::now();
    }

    pub(crate) fn take_sync_state(&mut self) -> SyncState {
        mem::take(&mut self.sync_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client::new("127.0.0.1:40000".parse().unwrap(), 0x1234)
    }

    #[test]
    fn control_seq_wraps_past_32767() {
        let mut c = client();
        c.control_seq = CONTROL_SEQ_WRAP;
        assert_eq!(c.next_control_seq(), CONTROL_SEQ_WRAP);
        assert_eq!(c.control_seq, 0);
        assert_eq!(c.next_control_seq(), 0);
        assert_eq!(c.next_control_seq(), 1);
    }

    #[test]
    fn take_sync_state_resets_to_none() {
        let mut c = client();
        c.sync_state = SyncState::KeepAlive;
        assert_eq!(c.take_sync_state(), SyncState::KeepAlive);
        assert_eq!(c.sync_state, SyncState::None);
        assert_eq!(c.take_sync_state(), SyncState::None);
    }
}
