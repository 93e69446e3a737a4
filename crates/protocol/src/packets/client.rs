//! Client -> Server packet parsing.

use super::ClientOpcode;
use crate::{BinaryReader, ProtocolError};

/// Parsed client packet.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket {
    /// Join (0x00).
    Join {
        room: String,
        name: String,
        /// Empty when the player is a guest.
        user_id: String,
        ticket: String,
        stake: u64,
    },
    /// Input (0x10). The direction is trusted for heading only.
    Input { sequence: u32, dx: f32, dy: f32 },
    /// Split (0x11) toward a world-space point.
    Split { target_x: f32, target_y: f32 },
    /// Leave (0x12).
    Leave,
}

impl ClientPacket {
    /// Parse a client packet from raw bytes.
    ///
    /// Non-finite coordinates and trailing bytes are rejected so a malformed
    /// packet never reaches the simulation.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.is_empty() {
            return Err(ProtocolError::UnexpectedEof);
        }

        let mut reader = BinaryReader::new(data.to_vec());
        let opcode = reader.get_u8()?;

        let packet = match opcode {
            x if x == ClientOpcode::Join as u8 => ClientPacket::Join {
                room: reader.get_string()?,
                name: reader.get_string()?,
                user_id: reader.get_string()?,
                ticket: reader.get_string()?,
                stake: reader.get_u64()?,
            },
            x if x == ClientOpcode::Input as u8 => {
                let sequence = reader.get_u32()?;
                let dx = reader.get_f32()?;
                let dy = reader.get_f32()?;
                if !dx.is_finite() || !dy.is_finite() {
                    return Err(ProtocolError::NonFinite(opcode));
                }
                ClientPacket::Input { sequence, dx, dy }
            }
            x if x == ClientOpcode::Split as u8 => {
                let target_x = reader.get_f32()?;
                let target_y = reader.get_f32()?;
                if !target_x.is_finite() || !target_y.is_finite() {
                    return Err(ProtocolError::NonFinite(opcode));
                }
                ClientPacket::Split { target_x, target_y }
            }
            x if x == ClientOpcode::Leave as u8 => ClientPacket::Leave,
            _ => return Err(ProtocolError::InvalidOpcode(opcode)),
        };

        if reader.remaining() > 0 {
            return Err(ProtocolError::TrailingBytes(reader.remaining()));
        }
        Ok(packet)
    }
}

/// Build a Join packet (0x00). Used by clients and test harnesses.
pub fn build_join(room: &str, name: &str, user_id: &str, ticket: &str, stake: u64) -> crate::BinaryWriter {
    let mut w = crate::BinaryWriter::with_capacity(12 + room.len() + name.len() + user_id.len() + ticket.len());
    w.put_u8(ClientOpcode::Join as u8);
    w.put_string(room);
    w.put_string(name);
    w.put_string(user_id);
    w.put_string(ticket);
    w.put_u64(stake);
    w
}

/// Build an Input packet (0x10).
pub fn build_input(sequence: u32, dx: f32, dy: f32) -> crate::BinaryWriter {
    let mut w = crate::BinaryWriter::with_capacity(13);
    w.put_u8(ClientOpcode::Input as u8);
    w.put_u32(sequence);
    w.put_f32(dx);
    w.put_f32(dy);
    w
}

/// Build a Split packet (0x11).
pub fn build_split(target_x: f32, target_y: f32) -> crate::BinaryWriter {
    let mut w = crate::BinaryWriter::with_capacity(9);
    w.put_u8(ClientOpcode::Split as u8);
    w.put_f32(target_x);
    w.put_f32(target_y);
    w
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join() {
        let data = build_join("main", "alice", "user-1", "t0k3n", 10).finish();
        let packet = ClientPacket::parse(&data).unwrap();
        assert_eq!(
            packet,
            ClientPacket::Join {
                room: "main".into(),
                name: "alice".into(),
                user_id: "user-1".into(),
                ticket: "t0k3n".into(),
                stake: 10,
            }
        );
    }

    #[test]
    fn test_parse_input() {
        let data = build_input(7, 0.6, -0.8).finish();
        assert_eq!(
            ClientPacket::parse(&data).unwrap(),
            ClientPacket::Input { sequence: 7, dx: 0.6, dy: -0.8 }
        );
    }

    #[test]
    fn test_truncated_input_rejected() {
        let data = build_input(7, 0.6, -0.8).finish();
        assert!(matches!(
            ClientPacket::parse(&data[..9]),
            Err(ProtocolError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_nan_split_rejected() {
        let data = build_split(f32::NAN, 1.0).finish();
        assert!(matches!(
            ClientPacket::parse(&data),
            Err(ProtocolError::NonFinite(0x11))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        assert!(matches!(
            ClientPacket::parse(&[0x12, 0x00]),
            Err(ProtocolError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_unknown_opcode() {
        assert!(matches!(
            ClientPacket::parse(&[0x99]),
            Err(ProtocolError::InvalidOpcode(0x99))
        ));
    }
}
