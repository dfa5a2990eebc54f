use std::io;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};

use crate::bytes::{ReadFrame, WriteFrame};
use crate::consts::{
    CONTROL_TAG, HELLO_LEN, HELLO_TAG, KEEP_ALIVE_LEN, RELAY_TYPE, SYNC_LEN, SYNC_START_LEN,
    TRAILER,
};
use crate::error::RelayError;

/// Fixed sub-packet body acknowledging a sync round.
const SYNC_ACK_BODY: [u8; 5] = [0x01, 0x03, 0x00, 0x4F, 0xED];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PacketKind {
    Hello,
    SyncStart,
    Sync,
    KeepAlive,
    PeerRelay,
    Unknown,
}

/// Classifies an inbound datagram by its length and tag bytes.
pub(crate) fn classify(data: &[u8]) -> PacketKind {
    if data.len() == HELLO_LEN && data[0] == 0x00 && data[3] == HELLO_TAG {
        PacketKind::Hello
    } else if data.len() == SYNC_START_LEN && data[3] == CONTROL_TAG {
        PacketKind::SyncStart
    } else if data.len() == SYNC_LEN && data[3] == CONTROL_TAG {
        PacketKind::Sync
    } else if data.len() == KEEP_ALIVE_LEN && data[3] == CONTROL_TAG {
        PacketKind::KeepAlive
    } else if data.first() == Some(&RELAY_TYPE) {
        PacketKind::PeerRelay
    } else {
        PacketKind::Unknown
    }
}

pub(crate) struct HelloRequest {
    pub(crate) cli_hello_time: u16,
}

impl ReadFrame for HelloRequest {
    fn read(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        let mut skipped = [0u8; 69];
        reader.read_exact(&mut skipped)?;
        Ok(Self {
            cli_hello_time: reader.read_u16::<BigEndian>()?,
        })
    }
}

pub(crate) struct SyncStartRequest {
    pub(crate) session_id: u32,
    pub(crate) session_slot: u8,
    pub(crate) max_clients: u8,
}

impl ReadFrame for SyncStartRequest {
    fn read(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        let mut skipped = [0u8; 16];
        reader.read_exact(&mut skipped)?;
        let session_id = reader.read_u32::<BigEndian>()?;
        let slot_byte = reader.read_u8()?;
        Ok(Self {
            session_id,
            session_slot: slot_byte >> 5,
            max_clients: (slot_byte & 0x0F) >> 1,
        })
    }
}

pub(crate) struct HelloResponse {
    pub(crate) seq: u16,
    pub(crate) cli_hello_time: u16,
}

impl WriteFrame for HelloResponse {
    fn write(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        writer.write_u8(0x00)?;
        writer.write_u16::<BigEndian>(self.seq)?;
        writer.write_u8(0x01)?;
        writer.write_u16::<BigEndian>(self.cli_hello_time)?;
        writer.write_u16::<BigEndian>(self.cli_hello_time)?;
        writer.write_all(&TRAILER)?;
        Ok(())
    }
}

/// Common 13-byte header of every barrier response.
pub(crate) struct SyncHeader {
    pub(crate) seq: u16,
    pub(crate) time_diff: u16,
    pub(crate) cli_hello_time: u16,
    pub(crate) sync_count: u32,
}

impl WriteFrame for SyncHeader {
    fn write(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        writer.write_u8(0x00)?;
        writer.write_u16::<BigEndian>(self.seq)?;
        writer.write_u8(0x02)?;
        writer.write_u16::<BigEndian>(self.time_diff)?;
        writer.write_u16::<BigEndian>(self.cli_hello_time)?;
        writer.write_u16::<BigEndian>(sync_counter(self.sync_count))?;
        writer.write_u16::<BigEndian>(sync_mask(self.sync_count))?;
        Ok(())
    }
}

pub(crate) struct SyncStartResponse {
    pub(crate) header: SyncHeader,
    pub(crate) session_slot: u8,
    pub(crate) session_id: u32,
    pub(crate) peer_mask: u8,
}

impl WriteFrame for SyncStartResponse {
    fn write(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        self.header.write(writer)?;
        writer.write_u8(0x00)?;
        writer.write_u8(0x06)?;
        writer.write_u8(self.session_slot)?;
        writer.write_u32::<BigEndian>(self.session_id)?;
        writer.write_u8(self.peer_mask)?;
        writer.write_u8(0xFF)?;
        writer.write_all(&TRAILER)?;
        Ok(())
    }
}

pub(crate) struct SyncResponse {
    pub(crate) header: SyncHeader,
}

impl WriteFrame for SyncResponse {
    fn write(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        self.header.write(writer)?;
        writer.write_all(&SYNC_ACK_BODY)?;
        writer.write_u8(0xFF)?;
        writer.write_all(&TRAILER)?;
        Ok(())
    }
}

pub(crate) struct KeepAliveResponse {
    pub(crate) header: SyncHeader,
}

impl WriteFrame for KeepAliveResponse {
    fn write(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        self.header.write(writer)?;
        writer.write_u8(0xFF)?;
        writer.write_all(&TRAILER)?;
        Ok(())
    }
}

pub(crate) fn encode(frame: &impl WriteFrame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    frame
        .write(&mut buf)
        .expect("writing to a vec should not fail");
    buf
}

/// Wire value of the barrier round counter. Zero means the barrier has not
/// produced a round yet and is emitted as the `0xFFFF` sentinel.
pub(crate) fn sync_counter(sync_count: u32) -> u16 {
    if sync_count == 0 {
        0xFFFF
    } else {
        sync_count as u16
    }
}

/// 16-bit round bitmap: all ones except the bit for the current round,
/// counted from the high end. Rounds past 16 wrap around the bitmap.
pub(crate) fn sync_mask(sync_count: u32) -> u16 {
    if sync_count == 0 {
        return 0xFFFF;
    }
    let round = (sync_count - 1) % 16 + 1;
    0xFFFF & !(1u16 << (16 - round))
}

/// Iterator over the `peer_id | size | msg` fragments of a peer-relay
/// payload. The datagram's final byte is a terminator and never part of a
/// fragment header.
pub(crate) struct Fragments<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Fragments<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 1 }
    }
}

impl<'a> Iterator for Fragments<'a> {
    type Item = Result<(u8, &'a [u8]), RelayError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos + 1 >= self.data.len() {
            return None;
        }
        let truncated = RelayError::TruncatedFragment {
            offset: self.pos,
            len: self.data.len(),
        };
        if self.pos + 3 > self.data.len() {
            return Some(Err(truncated));
        }
        let peer_id = self.data[self.pos];
        let size = BigEndian::read_u16(&self.data[self.pos + 1..self.pos + 3]) as usize;
        let start = self.pos + 3;
        let Some(msg) = self.data.get(start..start + size) else {
            return Some(Err(truncated));
        };
        self.pos = start + size;
        Some(Ok((peer_id, msg)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control_packet(len: usize, tag: u8) -> Vec<u8> {
        let mut data = vec![0u8; len];
        data[3] = tag;
        data
    }

    #[test]
    fn classify_by_length_and_tag() {
        let mut hello = control_packet(75, 0x06);
        assert_eq!(classify(&hello), PacketKind::Hello);
        hello[0] = 0x05;
        assert_eq!(classify(&hello), PacketKind::Unknown);

        assert_eq!(classify(&control_packet(26, 0x07)), PacketKind::SyncStart);
        assert_eq!(classify(&control_packet(22, 0x07)), PacketKind::Sync);
        assert_eq!(classify(&control_packet(18, 0x07)), PacketKind::KeepAlive);
        assert_eq!(classify(&[0x01, 0xAA, 0xFF]), PacketKind::PeerRelay);
        assert_eq!(classify(&control_packet(30, 0x07)), PacketKind::Unknown);
        assert_eq!(classify(&[]), PacketKind::Unknown);
    }

    #[test]
    fn hello_request_reads_time_field() {
        let mut data = control_packet(75, 0x06);
        data[69] = 0x12;
        data[70] = 0x34;
        let req = HelloRequest::read(&mut &data[..]).unwrap();
        assert_eq!(req.cli_hello_time, 0x1234);
    }

    #[test]
    fn sync_start_request_decodes_slot_byte() {
        let mut data = control_packet(26, 0x07);
        data[16..20].copy_from_slice(&1u32.to_be_bytes());
        data[20] = 0x24;
        let req = SyncStartRequest::read(&mut &data[..]).unwrap();
        assert_eq!(req.session_id, 1);
        assert_eq!(req.session_slot, 1);
        assert_eq!(req.max_clients, 2);

        data[20] = 0x04;
        let req = SyncStartRequest::read(&mut &data[..]).unwrap();
        assert_eq!(req.session_slot, 0);
        assert_eq!(req.max_clients, 2);
    }

    #[test]
    fn hello_response_layout() {
        let buf = encode(&HelloResponse {
            seq: 0,
            cli_hello_time: 0xABCD,
        });
        assert_eq!(
            buf,
            [0x00, 0x00, 0x00, 0x01, 0xAB, 0xCD, 0xAB, 0xCD, 0x01, 0x01, 0x01, 0x01]
        );
    }

    #[test]
    fn sync_start_response_layout() {
        let buf = encode(&SyncStartResponse {
            header: SyncHeader {
                seq: 1,
                time_diff: 0x0102,
                cli_hello_time: 0x0304,
                sync_count: 1,
            },
            session_slot: 0,
            session_id: 1,
            peer_mask: 0x03,
        });
        assert_eq!(buf.len(), 25);
        assert_eq!(
            buf,
            [
                0x00, 0x00, 0x01, 0x02, 0x01, 0x02, 0x03, 0x04, 0x00, 0x01, 0x7F, 0xFF, 0x00,
                0x06, 0x00, 0x00, 0x00, 0x00, 0x01, 0x03, 0xFF, 0x01, 0x01, 0x01, 0x01
            ]
        );
    }

    #[test]
    fn sync_response_layout() {
        let buf = encode(&SyncResponse {
            header: SyncHeader {
                seq: 2,
                time_diff: 0,
                cli_hello_time: 0,
                sync_count: 2,
            },
        });
        assert_eq!(buf.len(), 23);
        assert_eq!(&buf[13..18], &SYNC_ACK_BODY);
        assert_eq!(buf[18], 0xFF);
        assert_eq!(&buf[19..], &TRAILER);
    }

    #[test]
    fn keep_alive_response_layout() {
        let buf = encode(&KeepAliveResponse {
            header: SyncHeader {
                seq: 3,
                time_diff: 0,
                cli_hello_time: 0,
                sync_count: 3,
            },
        });
        assert_eq!(buf.len(), 18);
        assert_eq!(buf[13], 0xFF);
        assert_eq!(&buf[14..], &TRAILER);
    }

    #[test]
    fn sync_mask_clears_one_bit_per_round() {
        assert_eq!(sync_mask(1), 0x7FFF);
        assert_eq!(sync_mask(2), 0xBFFF);
        assert_eq!(sync_mask(16), 0xFFFE);
    }

    #[test]
    fn sync_mask_wraps_past_sixteen_rounds() {
        assert_eq!(sync_mask(17), sync_mask(1));
        assert_eq!(sync_mask(35), sync_mask(3));
    }

    #[test]
    fn inactive_barrier_emits_sentinel() {
        assert_eq!(sync_counter(0), 0xFFFF);
        assert_eq!(sync_mask(0), 0xFFFF);
        assert_eq!(sync_counter(5), 5);
    }

    #[test]
    fn fragments_iterate_in_order() {
        let data = [
            0x01, // relay type
            0x02, 0x00, 0x03, 0xAA, 0xBB, 0xCC, // peer 2, 3-byte msg
            0x00, 0x00, 0x01, 0xDD, // peer 0, 1-byte msg
            0xFF, // terminator
        ];
        let frags: Vec<_> = Fragments::new(&data).map(Result::unwrap).collect();
        assert_eq!(frags, vec![(2, &[0xAA, 0xBB, 0xCC][..]), (0, &[0xDD][..])]);
    }

    #[test]
    fn truncated_fragment_size_is_an_error() {
        let data = [0x01, 0x00, 0x00, 0x09, 0xAA, 0xFF];
        let mut frags = Fragments::new(&data);
        assert!(matches!(
            frags.next(),
            Some(Err(RelayError::TruncatedFragment { .. }))
        ));
    }

    #[test]
    fn truncated_fragment_header_is_an_error() {
        let data = [0x01, 0x00, 0x00];
        let mut frags = Fragments::new(&data);
        assert!(matches!(
            frags.next(),
            Some(Err(RelayError::TruncatedFragment { .. }))
        ));
    }
}
