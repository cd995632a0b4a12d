// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk

use bincode::{
    config,
    error::{DecodeError, EncodeError},
    Decode, Encode,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

pub mod helper_types;
pub mod pkt_event;
pub mod pkt_field;
pub mod pkt_login;

pub use helper_types::*;

/// Bytes of little-endian opcode leading every decrypted packet.
pub const OPCODE_LEN: usize = 2;

/// Server → client opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum SendOp {
    RequestVersion = 0x0001,
    RequestKey = 0x0002,
    RequestFieldEnter = 0x0016,
    RequestLogin = 0x0017,
    LoginResult = 0x0021,
    CharacterList = 0x0024,
    LoginToGame = 0x0025,
    FieldAddUser = 0x0039,
    FieldAddNpc = 0x003d,
    FieldRemoveNpc = 0x003e,
    SkillUse = 0x006d,
    SkillDamage = 0x006e,
    ResponseTimeSync = 0x0079,
    RequestHeartbeat = 0x007c,
}

/// Client → server opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum RecvOp {
    ResponseVersion = 0x0001,
    ResponseKey = 0x0002,
    ResponseLogin = 0x0003,
    CharacterManagement = 0x0008,
    ResponseFieldEnter = 0x0010,
    UserChat = 0x0012,
    Skill = 0x0020,
    RequestTimeSync = 0x0044,
    ResponseHeartbeat = 0x0048,
}

/// A packet body the client sends. `to_wire` yields opcode + body, ready
/// for the encryptor.
pub trait ClientPacket: Encode {
    const OPCODE: RecvOp;

    fn to_wire(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&u16::from(Self::OPCODE).to_le_bytes());
        bincode::encode_into_std_write(self, &mut buf, config::legacy())?;
        Ok(buf)
    }
}

/// A packet body the server sends. Decoding tolerates trailing bytes:
/// several server packets carry variable-length tails without a stable
/// schema, and readers only consume the leading fields they understand.
pub trait ServerPacket: Encode + Decode {
    const OPCODE: SendOp;

    fn to_wire(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&u16::from(Self::OPCODE).to_le_bytes());
        bincode::encode_into_std_write(self, &mut buf, config::legacy())?;
        Ok(buf)
    }

    fn from_body(body: &[u8]) -> Result<Self, DecodeError>
    where
        Self: Sized,
    {
        let (pkt, _len) = bincode::decode_from_slice(body, config::legacy())?;
        Ok(pkt)
    }
}

/// Opcode of a decrypted packet, or `None` for short frames.
pub fn wire_opcode(packet: &[u8]) -> Option<u16> {
    if packet.len() < OPCODE_LEN {
        return None;
    }
    Some(u16::from_le_bytes([packet[0], packet[1]]))
}

#[macro_export]
macro_rules! assert_packet_size {
    ($pkt:ident, $size:expr) => {
        paste::paste! {
            #[cfg(test)]
            #[allow(non_snake_case)]
            mod [<$pkt _test_packet_size>] {
                use super:: $pkt;
                #[test]
                fn test() {
                    let mut buf = [0u8; 4096];
                    let len = bincode::encode_into_slice($pkt::default(), &mut buf, bincode::config::legacy()).unwrap();
                    assert_eq!(len, $size);
                }
            }
        }
    };
}
