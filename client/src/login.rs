// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk
// Login-server flow: version exchange, credential submission, character
// list and the migration hand-off to a game server.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use futures::channel::oneshot;
use futures::FutureExt;
use log::{debug, info, trace};
use packet::pkt_login::{
    self, CharacterEntryPrefix, CharacterManagement, ResponseLogin, ResponseVersion,
    CHAR_CMD_SELECT, CHAR_LIST_ADD, CHAR_LIST_END, LOCALE_NA, LOGIN_MODE_CHARACTER_LIST,
    RESPONSE_VERSION_UNK1,
};
use packet::{SendOp, ServerPacket, OPCODE_LEN};
use smol::Timer;

use crate::session::{Result, Session, SessionConfig, SessionError, DEFAULT_DEADLINE};

#[derive(Debug, Clone, PartialEq)]
pub struct CharacterInfo {
    pub character_id: i64,
    pub name: String,
}

/// Domain-level outcome of a login attempt. A rejected login is a value,
/// not an error; `success` holds iff `error_code == 0`.
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub success: bool,
    pub account_id: i64,
    pub characters: Vec<CharacterInfo>,
    pub error_code: u8,
    pub error_message: String,
}

/// Where the login server migrated us to, with the one-time auth token.
#[derive(Debug, Clone, PartialEq)]
pub struct GameServerInfo {
    pub ip: [u8; 4],
    pub port: u16,
    pub token: u64,
    pub map_id: i32,
}

impl GameServerInfo {
    pub fn addr(&self) -> SocketAddr {
        (Ipv4Addr::from(self.ip), self.port).into()
    }
}

pub struct LoginClient {
    pub session: Arc<Session>,
    machine_id: [u8; 16],
}

impl LoginClient {
    /// Connect to the login server and run the version exchange. Resolves
    /// once the server asks for credentials.
    pub async fn connect(addr: SocketAddr, config: SessionConfig) -> Result<LoginClient> {
        let session = Session::connect(addr, config).await?;

        // RequestLogin follows our version reply immediately; the waiter
        // must be armed before the send
        let request_login = session.wait_for(SendOp::RequestLogin, DEFAULT_DEADLINE);
        session
            .send(&ResponseVersion {
                version: config.version,
                unk1: RESPONSE_VERSION_UNK1,
                locale: LOCALE_NA,
            })
            .await?;
        request_login.await?;

        Ok(LoginClient {
            session,
            machine_id: rand::random(),
        })
    }

    /// Random per-client hardware id; the game server expects the same one
    /// we presented at login.
    pub fn machine_id(&self) -> [u8; 16] {
        self.machine_id
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResult> {
        let entries = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = oneshot::channel::<std::result::Result<(), SessionError>>();
        let done_tx = Arc::new(Mutex::new(Some(done_tx)));
        {
            let entries = entries.clone();
            let done_tx = done_tx.clone();
            self.session.on(SendOp::CharacterList, move |packet| {
                handle_character_list(&entries, &done_tx, packet)
            });
        }

        let login_result = self.session.wait_for(SendOp::LoginResult, DEFAULT_DEADLINE);
        self.session
            .send(&ResponseLogin {
                mode: LOGIN_MODE_CHARACTER_LIST,
                username: username.into(),
                password: password.into(),
                session_salt: 1,
                machine_id: self.machine_id,
            })
            .await?;

        let packet = login_result.await?;
        let result = pkt_login::LoginResult::from_body(&packet[OPCODE_LEN..])?;
        if result.state != 0 {
            info!(
                "{}: login rejected (state {}): {}",
                self.session, result.state, result.ban_reason
            );
            return Ok(LoginResult {
                success: false,
                account_id: result.account_id,
                characters: Vec::new(),
                error_code: result.state,
                error_message: result.ban_reason.0,
            });
        }

        // the character list streams in on its own; wait for the terminal
        // sub-command
        {
            let mut done = done_rx.fuse();
            let mut deadline = Timer::after(DEFAULT_DEADLINE).fuse();
            futures::select! {
                r = done => r.map_err(|_| SessionError::Cancelled)??,
                _ = deadline => return Err(SessionError::Timeout(SendOp::CharacterList)),
            }
        }

        let characters = entries.lock().unwrap().clone();
        info!(
            "{}: logged into account {} ({} character(s))",
            self.session,
            result.account_id,
            characters.len()
        );
        Ok(LoginResult {
            success: true,
            account_id: result.account_id,
            characters,
            error_code: 0,
            error_message: String::new(),
        })
    }

    /// Pick a character; on success the server hands out the game-server
    /// address, migration token and target map.
    pub async fn select_character(&self, character_id: i64) -> Result<GameServerInfo> {
        let reply = self.session.wait_for(SendOp::LoginToGame, DEFAULT_DEADLINE);
        self.session
            .send(&CharacterManagement {
                command: CHAR_CMD_SELECT,
                character_id,
                world_channel: 1,
            })
            .await?;

        let packet = reply.await?;
        let p = pkt_login::LoginToGame::from_body(&packet[OPCODE_LEN..])?;
        if p.migration_error != 0 {
            return Err(SessionError::MigrationFailed(p.migration_error));
        }

        let info = GameServerInfo {
            ip: p.ip,
            port: p.port,
            token: p.token,
            map_id: p.map_id,
        };
        info!(
            "{}: migrating to {} (map {})",
            self.session,
            info.addr(),
            info.map_id
        );
        Ok(info)
    }

    pub async fn dispose(&self) {
        self.session.dispose().await;
    }
}

fn handle_character_list(
    entries: &Mutex<Vec<CharacterInfo>>,
    done_tx: &Mutex<Option<oneshot::Sender<std::result::Result<(), SessionError>>>>,
    packet: &[u8],
) -> anyhow::Result<()> {
    let command = *packet
        .get(OPCODE_LEN)
        .context("empty character list packet")?;
    match command {
        CHAR_LIST_ADD => {
            let count = *packet
                .get(OPCODE_LEN + 1)
                .context("truncated character list packet")?;
            if count == 0 {
                return Ok(());
            }
            if count > 1 || !entries.lock().unwrap().is_empty() {
                // an entry is variable-length and only its leading fields
                // have a known schema, so anything past the first cannot
                // be parsed; fail loudly instead of guessing
                let msg = "account has more than one character; only single-character accounts are supported";
                if let Some(tx) = done_tx.lock().unwrap().take() {
                    let _ = tx.send(Err(SessionError::InvalidArgument(msg)));
                }
                bail!(msg);
            }

            let (prefix, _) = bincode::decode_from_slice::<CharacterEntryPrefix, _>(
                &packet[OPCODE_LEN + 2..],
                bincode::config::legacy(),
            )?;
            debug!(
                "character list entry: id={} name={}",
                prefix.character_id, prefix.name
            );
            entries.lock().unwrap().push(CharacterInfo {
                character_id: prefix.character_id,
                name: prefix.name.0,
            });
        }
        CHAR_LIST_END => {
            if let Some(tx) = done_tx.lock().unwrap().take() {
                let _ = tx.send(Ok(()));
            }
        }
        other => trace!("ignoring character list sub-command {other}"),
    }
    Ok(())
}
