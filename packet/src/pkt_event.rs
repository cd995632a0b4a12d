// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk
// Framed payloads of the world-service IPC link: channel/api hello, the
// time-event request/response pair, and the world → channel broadcasts.

use bincode::{
    config,
    de::BorrowDecoder,
    error::{DecodeError, EncodeError},
    BorrowDecode, Decode, Encode,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

#[derive(Debug, PartialEq, Encode, Decode)]
pub struct EventHeader {
    pub magic: u16,
    pub len: u16,
    pub id: u16,
}

impl EventHeader {
    pub const MAGIC: u16 = 0x7e31;
    pub const SIZE: usize = 6;

    pub fn new(id: u16, len: u16) -> EventHeader {
        EventHeader {
            magic: EventHeader::MAGIC,
            len,
            id,
        }
    }

    pub fn encode(&self, dst: &mut [u8]) -> Result<usize, EncodeError> {
        let hdr_len = bincode::encode_into_slice(self, dst, config::legacy())?;
        debug_assert_eq!(hdr_len, EventHeader::SIZE);
        Ok(hdr_len)
    }

    pub fn decode(src: &[u8]) -> Result<Self, EventDecodeError> {
        let (hdr, len) = bincode::decode_from_slice::<EventHeader, _>(src, config::legacy())?;
        debug_assert_eq!(len, EventHeader::SIZE);
        if hdr.magic != EventHeader::MAGIC {
            return Err(EventDecodeError::InvalidMagic { found: hdr.magic });
        }
        if (hdr.len as usize) < EventHeader::SIZE {
            return Err(EventDecodeError::TooSmall { size: hdr.len });
        }
        Ok(hdr)
    }
}

#[derive(Error, Debug)]
pub enum EventDecodeError {
    #[error(
        "Invalid header magic (expected {:#06x}, got {found:#06x})",
        EventHeader::MAGIC
    )]
    InvalidMagic { found: u16 },
    #[error(
        "Packet size smaller than header size (header is {} bytes, got {size})",
        EventHeader::SIZE
    )]
    TooSmall { size: u16 },
    #[error("Non-recognized packet ID {id:#06x}")]
    UnknownPacket { id: u16 },
    #[error("Packet {id:#06x} has {len} trailing bytes")]
    TrailingBytes { id: u16, len: usize },
    #[error("Decoding failed ({0})")]
    DecodeError(#[from] DecodeError),
}

#[derive(Error, Debug)]
pub enum EventEncodeError {
    #[error("Payload is too long ({payload_len:#x}); length field is u16")]
    PayloadTooLong { payload_len: usize },
    #[error("Encoding failed ({0})")]
    EncodeError(#[from] EncodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ServiceKind {
    #[default]
    GameChannel = 0xa1,
    Api = 0xc3,
}

impl Encode for ServiceKind {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> std::result::Result<(), EncodeError> {
        u8::from(*self).encode(encoder)
    }
}

impl Decode for ServiceKind {
    fn decode<D: bincode::de::Decoder>(decoder: &mut D) -> std::result::Result<Self, DecodeError> {
        let raw = u8::decode(decoder)?;
        ServiceKind::try_from(raw).map_err(|_| DecodeError::Other("invalid service kind"))
    }
}

impl<'a> BorrowDecode<'a> for ServiceKind {
    fn borrow_decode<D: BorrowDecoder<'a>>(_decoder: &mut D) -> Result<Self, DecodeError> {
        unimplemented!();
    }
}

/// First payload on every link; declares who is connecting.
#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct Connect {
    pub kind: ServiceKind,
    /// Meaningful for `GameChannel` links only.
    pub channel_id: i16,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct ConnectAck {
    pub kind: ServiceKind,
    pub channel_id: i16,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum TimeEventRequest {
    JoinGlobalPortal { event_id: i32, index: i32 },
    GetGlobalPortal,
    GetActiveFieldBosses,
    FieldBossKilled { metadata_id: i32, channel: i16 },
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum TimeEventResponse {
    Empty,
    GlobalPortalInfo {
        channel: i16,
        room_id: i32,
        map_id: i32,
        portal_id: i32,
    },
    GlobalPortal {
        metadata_id: i32,
        event_id: i32,
    },
    FieldBosses {
        bosses: Vec<FieldBossEntry>,
    },
}

impl Default for TimeEventResponse {
    fn default() -> Self {
        TimeEventResponse::Empty
    }
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct FieldBossEntry {
    pub metadata_id: i32,
    pub event_id: i32,
    pub spawn_timestamp: i64,
    pub next_spawn_timestamp: i64,
    pub alive_channels: Vec<i16>,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct FieldBossSpawn {
    pub metadata_id: i32,
    pub event_id: i32,
    pub field_id: i32,
    pub npc_id: i32,
    pub end_tick: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct FieldBossWarn {
    pub metadata_id: i32,
    pub event_id: i32,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct FieldBossClear {
    pub metadata_id: i32,
    pub event_id: i32,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct CreateFieldRoom {
    pub map_id: i32,
    pub index: i32,
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct FieldRoomCreated {
    pub room_id: i32,
}

#[derive(Debug, PartialEq)]
pub enum EventPayload {
    Connect(Connect),
    ConnectAck(ConnectAck),
    Request(TimeEventRequest),
    Response(TimeEventResponse),
    FieldBossSpawn(FieldBossSpawn),
    FieldBossWarn(FieldBossWarn),
    FieldBossClear(FieldBossClear),
    CreateFieldRoom(CreateFieldRoom),
    FieldRoomCreated(FieldRoomCreated),
}

macro_rules! for_each_event_payload {
    ($mac:ident) => {
        $mac! {
            Connect = 0x01,
            ConnectAck = 0x02,
            Request = 0x10,
            Response = 0x11,
            FieldBossSpawn = 0x20,
            FieldBossWarn = 0x21,
            FieldBossClear = 0x22,
            CreateFieldRoom = 0x30,
            FieldRoomCreated = 0x31,
        }
    };
}

impl EventPayload {
    pub fn id(&self) -> u16 {
        macro_rules! id_match {
            ($($variant:ident = $id:literal,)+) => {
                match self {
                    $(EventPayload::$variant(..) => $id,)+
                }
            };
        }
        for_each_event_payload!(id_match)
    }

    fn encode_raw(&self, dst: &mut Vec<u8>) -> Result<usize, EncodeError> {
        macro_rules! encode_match {
            ($($variant:ident = $id:literal,)+) => {
                match self {
                    $(EventPayload::$variant(inner) => {
                        bincode::encode_into_std_write(inner, dst, config::legacy())
                    })+
                }
            };
        }
        for_each_event_payload!(encode_match)
    }

    /// Serialize header + payload into `dst`, returning the total length.
    pub fn encode(&self, dst: &mut Vec<u8>) -> Result<usize, EventEncodeError> {
        // reserve size for the header, encode into the rest of the vector
        dst.resize(EventHeader::SIZE, 0u8);
        let len = EventHeader::SIZE + self.encode_raw(dst)?;
        let len: u16 = len
            .try_into()
            .map_err(|_| EventEncodeError::PayloadTooLong { payload_len: len })?;

        let hdr = EventHeader::new(self.id(), len);
        hdr.encode(&mut dst[0..EventHeader::SIZE])?;
        Ok(len as usize)
    }

    pub fn decode(hdr: &EventHeader, data: &[u8]) -> Result<Self, EventDecodeError> {
        macro_rules! decode_match {
            ($($variant:ident = $id:literal,)+) => {
                match hdr.id {
                    $($id => {
                        let (inner, len) = bincode::decode_from_slice(data, config::legacy())?;
                        if len != data.len() {
                            return Err(EventDecodeError::TrailingBytes {
                                id: hdr.id,
                                len: data.len() - len,
                            });
                        }
                        Ok(EventPayload::$variant(inner))
                    })+
                    id => Err(EventDecodeError::UnknownPacket { id }),
                }
            };
        }
        for_each_event_payload!(decode_match)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrip() {
        let payloads = [
            EventPayload::Connect(Connect {
                kind: ServiceKind::GameChannel,
                channel_id: 3,
            }),
            EventPayload::Request(TimeEventRequest::FieldBossKilled {
                metadata_id: 23000101,
                channel: 2,
            }),
            EventPayload::Response(TimeEventResponse::FieldBosses {
                bosses: vec![FieldBossEntry {
                    metadata_id: 23000101,
                    event_id: 7,
                    spawn_timestamp: 1700000000,
                    next_spawn_timestamp: 1700003600,
                    alive_channels: vec![1, 2, 3],
                }],
            }),
            EventPayload::FieldRoomCreated(FieldRoomCreated { room_id: 4001 }),
        ];

        for payload in payloads {
            let mut buf = Vec::new();
            let len = payload.encode(&mut buf).unwrap();
            assert_eq!(len, buf.len());

            let hdr = EventHeader::decode(&buf).unwrap();
            assert_eq!(hdr.len as usize, buf.len());
            let decoded = EventPayload::decode(&hdr, &buf[EventHeader::SIZE..]).unwrap();
            assert_eq!(decoded, payload);
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = Vec::new();
        EventPayload::ConnectAck(ConnectAck::default())
            .encode(&mut buf)
            .unwrap();
        buf[0] ^= 0xff;
        assert!(matches!(
            EventHeader::decode(&buf),
            Err(EventDecodeError::InvalidMagic { .. })
        ));
    }
}
