use byteorder::{BigEndian, ByteOrder};

use crate::consts::{
    PLACEHOLDER_NAME, PLAYER_NAME_LEN, RELAY_TYPE, SUBPACKET_CAR_STATE, SUBPACKET_END,
    SUBPACKET_PLAYER_INFO, SUBPACKET_TABLE_OFFSET,
};
use crate::error::RelayError;

/// Builds the datagram a recipient sees for one relayed peer message: the
/// relay tag, the sender's seat slot, and the message with its time and name
/// fields rewritten.
pub(crate) fn rewrite_for_recipient(
    sender_slot: u8,
    recipient_time: u16,
    msg: &[u8],
) -> Result<Vec<u8>, RelayError> {
    let mut out = Vec::with_capacity(msg.len() + 2);
    out.push(RELAY_TYPE);
    out.push(sender_slot);
    out.extend_from_slice(msg);
    patch_subpackets(&mut out[2..], recipient_time)?;
    Ok(out)
}

/// Walks the `id | len | body` sub-packet table starting at the fixed offset
/// and patches car-state and player-info entries in place. The table must be
/// terminated by `0xFF` inside the payload.
fn patch_subpackets(payload: &mut [u8], recipient_time: u16) -> Result<(), RelayError> {
    let mut pos = SUBPACKET_TABLE_OFFSET;
    loop {
        let id = *payload
            .get(pos)
            .ok_or(RelayError::MalformedSubPacket(pos))?;
        if id == SUBPACKET_END {
            return Ok(());
        }
        let len = *payload
            .get(pos + 1)
            .ok_or(RelayError::MalformedSubPacket(pos))? as usize;
        if pos + 2 + len > payload.len() {
            return Err(RelayError::MalformedSubPacket(pos));
        }
        match id {
            SUBPACKET_CAR_STATE => {
                // The recipient reads the sender's car state against its own
                // relative clock.
                if pos + 4 > payload.len() {
                    return Err(RelayError::MalformedSubPacket(pos));
                }
                BigEndian::write_u16(&mut payload[pos + 2..pos + 4], recipient_time);
            }
            SUBPACKET_PLAYER_INFO => {
                let name_start = pos + 3;
                let name_end = name_start + PLAYER_NAME_LEN;
                let Some(name) = payload.get(name_start..name_end) else {
                    return Err(RelayError::MalformedSubPacket(pos));
                };
                if name.iter().all(|&b| b == 0) {
                    payload[name_start..name_start + PLACEHOLDER_NAME.len()]
                        .copy_from_slice(PLACEHOLDER_NAME);
                }
            }
            _ => {}
        }
        pos += 2 + len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(subpackets: &[&[u8]]) -> Vec<u8> {
        let mut msg = vec![0x10u8; SUBPACKET_TABLE_OFFSET];
        for sub in subpackets {
            msg.extend_from_slice(sub);
        }
        msg.push(SUBPACKET_END);
        msg
    }

    #[test]
    fn prepends_relay_tag_and_sender_slot() {
        let msg = payload(&[]);
        let out = rewrite_for_recipient(3, 0, &msg).unwrap();
        assert_eq!(out[0], 0x01);
        assert_eq!(out[1], 3);
        assert_eq!(&out[2..], &msg[..]);
    }

    #[test]
    fn patches_car_state_time() {
        let msg = payload(&[&[0x12, 0x04, 0xAA, 0xBB, 0xCC, 0xDD]]);
        let out = rewrite_for_recipient(0, 0x0203, &msg).unwrap();
        let sub = &out[2 + SUBPACKET_TABLE_OFFSET..];
        assert_eq!(&sub[..6], &[0x12, 0x04, 0x02, 0x03, 0xCC, 0xDD]);
    }

    #[test]
    fn substitutes_all_nul_player_name() {
        let mut body = vec![0u8; 0x13];
        body[16] = 0x55; // trailing non-name bytes stay put
        let sub: Vec<u8> = [0x02, 0x13].iter().copied().chain(body).collect();
        let msg = payload(&[&sub]);
        let out = rewrite_for_recipient(0, 0, &msg).unwrap();
        let name_start = 2 + SUBPACKET_TABLE_OFFSET + 3;
        assert_eq!(&out[name_start..name_start + 11], b"Report Me !");
        assert_eq!(out[name_start + 11], 0);
        assert_eq!(out[2 + SUBPACKET_TABLE_OFFSET + 2 + 16], 0x55);
    }

    #[test]
    fn keeps_populated_player_name() {
        let mut body = vec![0u8; 0x13];
        body[1..6].copy_from_slice(b"Racer");
        let sub: Vec<u8> = [0x02, 0x13].iter().copied().chain(body).collect();
        let msg = payload(&[&sub]);
        let out = rewrite_for_recipient(0, 0, &msg).unwrap();
        assert_eq!(&out[2..], &msg[..]);
    }

    #[test]
    fn passes_unrelated_subpackets_through() {
        let msg = payload(&[&[0x30, 0x02, 0xDE, 0xAD], &[0x07, 0x01, 0x99]]);
        let out = rewrite_for_recipient(1, 0xFFFF, &msg).unwrap();
        assert_eq!(&out[2..], &msg[..]);

        // Re-running the rewrite changes nothing.
        let again = rewrite_for_recipient(1, 0xFFFF, &out[2..]).unwrap();
        assert_eq!(&again[2..], &out[2..]);
    }

    #[test]
    fn missing_terminator_is_malformed() {
        let mut msg = payload(&[&[0x30, 0x02, 0xDE, 0xAD]]);
        msg.pop();
        assert!(matches!(
            rewrite_for_recipient(0, 0, &msg),
            Err(RelayError::MalformedSubPacket(_))
        ));
    }

    #[test]
    fn overrunning_subpacket_length_is_malformed() {
        let msg = payload(&[&[0x30, 0x7F, 0x00]]);
        assert!(matches!(
            rewrite_for_recipient(0, 0, &msg),
            Err(RelayError::MalformedSubPacket(_))
        ));
    }

    #[test]
    fn short_payload_is_malformed() {
        assert!(matches!(
            rewrite_for_recipient(0, 0, &[0x00, 0x01, 0x02]),
            Err(RelayError::MalformedSubPacket(_))
        ));
    }
}
