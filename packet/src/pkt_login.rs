// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk

use bincode::{Decode, Encode};

use crate::helper_types::UnicodeString;
use crate::{assert_packet_size, ClientPacket, RecvOp, SendOp, ServerPacket};

/// Body of the plaintext `RequestVersion` handshake, minus the opcode.
/// `riv`/`siv` are the server's receive/send IV seeds; the client swaps
/// them when constructing its own cipher pair.
#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct Handshake {
    pub version: u32,
    pub riv: u32,
    pub siv: u32,
    pub block_iv: u32,
    pub patch_type: u8,
}

impl ServerPacket for Handshake {
    const OPCODE: SendOp = SendOp::RequestVersion;
}
assert_packet_size!(Handshake, 17);

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct ResponseVersion {
    pub version: u32,
    /// Hardcoded 47 in every client build seen so far.
    pub unk1: i16,
    pub locale: u32,
}

impl ClientPacket for ResponseVersion {
    const OPCODE: RecvOp = RecvOp::ResponseVersion;
}
assert_packet_size!(ResponseVersion, 10);

pub const RESPONSE_VERSION_UNK1: i16 = 47;
pub const LOCALE_NA: u32 = 0x4e41;

/// `ResponseLogin` sub-command requesting the character list.
pub const LOGIN_MODE_CHARACTER_LIST: u8 = 2;

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct ResponseLogin {
    pub mode: u8,
    pub username: UnicodeString,
    pub password: UnicodeString,
    /// Hardcoded 1.
    pub session_salt: i16,
    pub machine_id: [u8; 16],
}

impl ClientPacket for ResponseLogin {
    const OPCODE: RecvOp = RecvOp::ResponseLogin;
}

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct LoginResult {
    /// 0 on success, otherwise a ban/rejection code.
    pub state: u8,
    pub unk1: i32,
    pub ban_reason: UnicodeString,
    pub account_id: i64,
}

impl ServerPacket for LoginResult {
    const OPCODE: SendOp = SendOp::LoginResult;
}

/// `CharacterList` sub-command carrying entries.
pub const CHAR_LIST_ADD: u8 = 0;
/// `CharacterList` terminal sub-command.
pub const CHAR_LIST_END: u8 = 4;

/// Leading fields of one character-list entry. The rest of the entry is
/// variable-length appearance/gear data without a stable schema, so
/// readers stop after the name.
#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct CharacterEntryPrefix {
    pub account_id: i64,
    pub character_id: i64,
    pub name: UnicodeString,
}

/// `CharacterManagement` sub-command selecting a character.
pub const CHAR_CMD_SELECT: u8 = 0;

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct CharacterManagement {
    pub command: u8,
    pub character_id: i64,
    /// Hardcoded 1.
    pub world_channel: i16,
}

impl ClientPacket for CharacterManagement {
    const OPCODE: RecvOp = RecvOp::CharacterManagement;
}
assert_packet_size!(CharacterManagement, 11);

#[derive(Debug, Clone, PartialEq, Default, Encode, Decode)]
pub struct LoginToGame {
    pub migration_error: u8,
    pub ip: [u8; 4],
    pub port: u16,
    pub token: u64,
    pub map_id: i32,
}

impl ServerPacket for LoginToGame {
    const OPCODE: SendOp = SendOp::LoginToGame;
}
assert_packet_size!(LoginToGame, 19);
