/// Largest datagram the relay will read off the socket.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

pub(crate) const HELLO_LEN: usize = 75;
pub(crate) const SYNC_START_LEN: usize = 26;
pub(crate) const SYNC_LEN: usize = 22;
pub(crate) const KEEP_ALIVE_LEN: usize = 18;

pub(crate) const HELLO_TAG: u8 = 0x06;
pub(crate) const CONTROL_TAG: u8 = 0x07;
pub(crate) const RELAY_TYPE: u8 = 0x01;

pub(crate) const SUBPACKET_TABLE_OFFSET: usize = 6;
pub(crate) const SUBPACKET_END: u8 = 0xFF;
pub(crate) const SUBPACKET_CAR_STATE: u8 = 0x12;
pub(crate) const SUBPACKET_PLAYER_INFO: u8 = 0x02;
pub(crate) const PLAYER_NAME_LEN: usize = 15;

/// Written over an all-NUL player name before the packet is relayed.
pub(crate) const PLACEHOLDER_NAME: &[u8] = b"Report Me !";

/// The client expects this literal in place of a computed checksum.
pub(crate) const TRAILER: [u8; 4] = [0x01, 0x01, 0x01, 0x01];

/// Control sequence numbers wrap back to zero past this value.
pub(crate) const CONTROL_SEQ_WRAP: u16 = 0x7FFF;

pub(crate) const SOCKET_RECV_BUF_SIZE: usize = 4 * 1024 * 1024;
pub(crate) const SOCKET_SEND_BUF_SIZE: usize = 4 * 1024 * 1024;
