// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk

use bincode::{
    de::BorrowDecoder,
    error::{DecodeError, EncodeError},
    BorrowDecode, Decode, Encode,
};

use crate::helper_types::UnicodeString;
use crate::{assert_packet_size, ClientPacket, RecvOp, SendOp, ServerPacket};

#[derive(Debug, Clone, Copy, PartialEq, Default, Encode, Decode)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Vec3 { x, y, z }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct ResponseKey {
    pub account_id: i64,
    pub token: u64,
    pub machine_id: [u8; 16],
}

impl ClientPacket for ResponseKey {
    const OPCODE: RecvOp = RecvOp::ResponseKey;
}
assert_packet_size!(ResponseKey, 32);

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct RequestFieldEnter {
    pub migration_error: u8,
    pub map_id: i32,
    pub field_type: u8,
    pub instance_type: u8,
    pub instance_id: i32,
    pub dungeon_id: i32,
    pub position: Vec3,
}

impl ServerPacket for RequestFieldEnter {
    const OPCODE: SendOp = SendOp::RequestFieldEnter;
}
assert_packet_size!(RequestFieldEnter, 27);

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct ResponseFieldEnter {
    pub field_key: i32,
}

impl ClientPacket for ResponseFieldEnter {
    const OPCODE: RecvOp = RecvOp::ResponseFieldEnter;
}
assert_packet_size!(ResponseFieldEnter, 4);

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct RequestHeartbeat {
    pub server_tick: i32,
}

impl ServerPacket for RequestHeartbeat {
    const OPCODE: SendOp = SendOp::RequestHeartbeat;
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct ResponseHeartbeat {
    pub server_tick: i32,
    pub client_tick: i32,
}

impl ClientPacket for ResponseHeartbeat {
    const OPCODE: RecvOp = RecvOp::ResponseHeartbeat;
}
assert_packet_size!(ResponseHeartbeat, 8);

/// `ResponseTimeSync` command byte that demands a client reply.
pub const TIME_SYNC_REQUEST: u8 = 2;

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct ResponseTimeSync {
    pub command: u8,
    pub key: i32,
}

impl ServerPacket for ResponseTimeSync {
    const OPCODE: SendOp = SendOp::ResponseTimeSync;
}
assert_packet_size!(ResponseTimeSync, 5);

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct RequestTimeSync {
    pub key: i32,
}

impl ClientPacket for RequestTimeSync {
    const OPCODE: RecvOp = RecvOp::RequestTimeSync;
}

/// Leading field of `FieldAddUser`; the rest of the body is the player's
/// full appearance blob and is not parsed here.
#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct FieldAddUserPrefix {
    pub object_id: i32,
}

impl ServerPacket for FieldAddUserPrefix {
    const OPCODE: SendOp = SendOp::FieldAddUser;
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct FieldAddNpc {
    pub object_id: i32,
    pub npc_id: i32,
    pub position: Vec3,
}

impl ServerPacket for FieldAddNpc {
    const OPCODE: SendOp = SendOp::FieldAddNpc;
}
assert_packet_size!(FieldAddNpc, 20);

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct FieldRemoveNpc {
    pub object_id: i32,
}

impl ServerPacket for FieldRemoveNpc {
    const OPCODE: SendOp = SendOp::FieldRemoveNpc;
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct SkillDamage {
    pub skill_uid: i64,
    pub object_id: i32,
    pub damage: i32,
}

impl ServerPacket for SkillDamage {
    const OPCODE: SendOp = SendOp::SkillDamage;
}

pub const CHAT_TYPE_ALL: u32 = 0;

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct UserChat {
    pub chat_type: u32,
    pub message: UnicodeString,
    pub recipient: UnicodeString,
    pub club_id: i64,
}

impl ClientPacket for UserChat {
    const OPCODE: RecvOp = RecvOp::UserChat;
}

/// First byte of every `Skill` packet.
pub const SKILL_MODE_USE: u8 = 0;
pub const SKILL_MODE_ATTACK: u8 = 1;
/// Second byte of an attack: damage applied to explicit targets.
pub const SKILL_ATTACK_TARGET: u8 = 1;

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct SkillUse {
    pub mode: u8,
    pub skill_uid: i64,
    pub server_tick: i32,
    pub skill_id: i32,
    pub level: i16,
    pub motion_point: u8,
    pub position: Vec3,
    pub direction: Vec3,
    pub rotation: Vec3,
    pub rotate2z: f32,
    pub client_tick: i32,
    pub unk1: bool,
    pub item_uid: i64,
    pub is_hold: bool,
}

impl ClientPacket for SkillUse {
    const OPCODE: RecvOp = RecvOp::Skill;
}
assert_packet_size!(SkillUse, 74);

#[derive(Debug, Clone, Copy, PartialEq, Default, Encode, Decode)]
pub struct SkillTarget {
    pub object_id: i32,
    pub unk1: u8,
}

/// Targeted skill attack. `targets` is written back-to-back with no length
/// prefix; `target_count` drives decoding, so the impls are hand-rolled.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SkillAttack {
    pub mode: u8,
    pub attack_mode: u8,
    pub skill_uid: i64,
    pub target_uid: i64,
    pub impact_pos: Vec3,
    pub impact_pos2: Vec3,
    pub direction: Vec3,
    pub attack_point: u8,
    pub target_count: u8,
    pub iterations: i32,
    pub targets: Vec<SkillTarget>,
}

impl Encode for SkillAttack {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> std::result::Result<(), EncodeError> {
        self.mode.encode(encoder)?;
        self.attack_mode.encode(encoder)?;
        self.skill_uid.encode(encoder)?;
        self.target_uid.encode(encoder)?;
        self.impact_pos.encode(encoder)?;
        self.impact_pos2.encode(encoder)?;
        self.direction.encode(encoder)?;
        self.attack_point.encode(encoder)?;
        self.target_count.encode(encoder)?;
        self.iterations.encode(encoder)?;
        for target in &self.targets {
            target.encode(encoder)?;
        }
        Ok(())
    }
}

impl Decode for SkillAttack {
    fn decode<D: bincode::de::Decoder>(decoder: &mut D) -> std::result::Result<Self, DecodeError> {
        let mode = u8::decode(decoder)?;
        let attack_mode = u8::decode(decoder)?;
        let skill_uid = i64::decode(decoder)?;
        let target_uid = i64::decode(decoder)?;
        let impact_pos = Vec3::decode(decoder)?;
        let impact_pos2 = Vec3::decode(decoder)?;
        let direction = Vec3::decode(decoder)?;
        let attack_point = u8::decode(decoder)?;
        let target_count = u8::decode(decoder)?;
        let iterations = i32::decode(decoder)?;
        let mut targets = Vec::with_capacity(target_count as usize);
        for _ in 0..target_count {
            targets.push(SkillTarget::decode(decoder)?);
        }
        Ok(SkillAttack {
            mode,
            attack_mode,
            skill_uid,
            target_uid,
            impact_pos,
            impact_pos2,
            direction,
            attack_point,
            target_count,
            iterations,
            targets,
        })
    }
}

impl<'a> BorrowDecode<'a> for SkillAttack {
    fn borrow_decode<D: BorrowDecoder<'a>>(_decoder: &mut D) -> Result<Self, DecodeError> {
        unimplemented!();
    }
}

impl ClientPacket for SkillAttack {
    const OPCODE: RecvOp = RecvOp::Skill;
}
