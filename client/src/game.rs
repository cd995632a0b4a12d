// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk
// Game-server flow: key auth, field entry, the few combat verbs the bot
// exercises, and the keep-alive handlers that make the session long-lived.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use futures::Future;
use log::{debug, info, trace, warn};
use packet::pkt_field::{
    FieldAddNpc, FieldAddUserPrefix, FieldRemoveNpc, RequestFieldEnter, RequestHeartbeat,
    RequestTimeSync, ResponseFieldEnter, ResponseHeartbeat, ResponseKey, ResponseTimeSync,
    SkillAttack, SkillDamage, SkillTarget, SkillUse, UserChat, Vec3, CHAT_TYPE_ALL,
    SKILL_ATTACK_TARGET, SKILL_MODE_ATTACK, SKILL_MODE_USE, TIME_SYNC_REQUEST,
};
use packet::pkt_login::{ResponseVersion, LOCALE_NA, RESPONSE_VERSION_UNK1};
use packet::{SendOp, ServerPacket, OPCODE_LEN};

use crate::login::GameServerInfo;
use crate::session::{Result, Session, SessionConfig, SessionError, DEFAULT_DEADLINE};

const FIELD_ENTER_DEADLINE: Duration = Duration::from_secs(30);
const COMBAT_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct NpcInfo {
    pub object_id: i32,
    pub npc_id: i32,
    pub position: Vec3,
}

/// Client-side mirror of the field we inhabit, maintained by the
/// persistent handlers.
#[derive(Debug, Default)]
pub struct FieldState {
    pub map_id: i32,
    /// Object id of our own character. The first `FieldAddUser` after
    /// field entry is us; every later one is another player.
    pub own_object_id: Option<i32>,
    pub position: Vec3,
    pub server_tick: i32,
    pub npcs: HashMap<i32, NpcInfo>,
}

#[derive(Debug)]
pub struct GameClient {
    pub session: Arc<Session>,
    field: Arc<Mutex<FieldState>>,
    /// Shared allocator for skill and attack uids.
    next_uid: Arc<AtomicI64>,
    epoch: Instant,
}

impl GameClient {
    /// Migrate onto a game server: transport connect, key auth, field
    /// entry. The keep-alive and field handlers are installed before the
    /// key handshake because the server starts broadcasting the moment we
    /// enter the field.
    pub async fn connect(
        info: &GameServerInfo,
        account_id: i64,
        machine_id: [u8; 16],
        config: SessionConfig,
    ) -> Result<GameClient> {
        let session = Session::connect(info.addr(), config).await?;
        let client = GameClient {
            session: session.clone(),
            field: Arc::new(Mutex::new(FieldState::default())),
            next_uid: Arc::new(AtomicI64::new(1)),
            epoch: Instant::now(),
        };
        client.install_handlers();

        let key_req = session.wait_for(SendOp::RequestKey, DEFAULT_DEADLINE);
        session
            .send(&ResponseVersion {
                version: config.version,
                unk1: RESPONSE_VERSION_UNK1,
                locale: LOCALE_NA,
            })
            .await?;
        key_req.await?;

        let field_enter = session.wait_for(SendOp::RequestFieldEnter, FIELD_ENTER_DEADLINE);
        session
            .send(&ResponseKey {
                account_id,
                token: info.token,
                machine_id,
            })
            .await?;
        let packet = field_enter.await?;
        let p = RequestFieldEnter::from_body(&packet[OPCODE_LEN..])?;
        if p.migration_error != 0 {
            return Err(SessionError::MigrationFailed(p.migration_error));
        }
        {
            let mut field = client.field.lock().unwrap();
            field.map_id = p.map_id;
            field.position = p.position;
        }
        session
            .send(&ResponseFieldEnter {
                field_key: config.field_key,
            })
            .await?;
        info!("{session}: entered field {} at {:?}", p.map_id, p.position);

        Ok(client)
    }

    pub fn field(&self) -> MutexGuard<'_, FieldState> {
        self.field.lock().unwrap()
    }

    fn install_handlers(&self) {
        let session = Arc::downgrade(&self.session);
        self.session.on(SendOp::ResponseTimeSync, move |packet| {
            let p = ResponseTimeSync::from_body(&packet[OPCODE_LEN..])?;
            if p.command == TIME_SYNC_REQUEST {
                reply(&session, RequestTimeSync { key: 0 });
            }
            Ok(())
        });

        let session = Arc::downgrade(&self.session);
        let field = self.field.clone();
        let epoch = self.epoch;
        self.session.on(SendOp::RequestHeartbeat, move |packet| {
            let p = RequestHeartbeat::from_body(&packet[OPCODE_LEN..])?;
            field.lock().unwrap().server_tick = p.server_tick;
            reply(
                &session,
                ResponseHeartbeat {
                    server_tick: p.server_tick,
                    client_tick: epoch.elapsed().as_millis() as i32,
                },
            );
            Ok(())
        });

        let field = self.field.clone();
        self.session.on(SendOp::FieldAddUser, move |packet| {
            let p = FieldAddUserPrefix::from_body(&packet[OPCODE_LEN..])?;
            let mut field = field.lock().unwrap();
            if field.own_object_id.is_none() {
                debug!("own object id is {}", p.object_id);
                field.own_object_id = Some(p.object_id);
            }
            Ok(())
        });

        let field = self.field.clone();
        self.session.on(SendOp::FieldAddNpc, move |packet| {
            let p = FieldAddNpc::from_body(&packet[OPCODE_LEN..])?;
            debug!("npc {} entered as object {}", p.npc_id, p.object_id);
            field.lock().unwrap().npcs.insert(
                p.object_id,
                NpcInfo {
                    object_id: p.object_id,
                    npc_id: p.npc_id,
                    position: p.position,
                },
            );
            Ok(())
        });

        let field = self.field.clone();
        self.session.on(SendOp::FieldRemoveNpc, move |packet| {
            let p = FieldRemoveNpc::from_body(&packet[OPCODE_LEN..])?;
            field.lock().unwrap().npcs.remove(&p.object_id);
            Ok(())
        });

        self.session.on(SendOp::SkillDamage, move |packet| {
            let p = SkillDamage::from_body(&packet[OPCODE_LEN..])?;
            trace!(
                "skill {:#x} hit object {} for {}",
                p.skill_uid,
                p.object_id,
                p.damage
            );
            Ok(())
        });
    }

    pub async fn chat(&self, message: &str) -> Result<()> {
        self.session
            .send(&UserChat {
                chat_type: CHAT_TYPE_ALL,
                message: message.into(),
                recipient: "".into(),
                club_id: 0,
            })
            .await
    }

    /// Ask the server to spawn an npc via the chat command and wait for it
    /// to appear. `None` when nothing spawned in time; the command may
    /// simply have been refused.
    pub async fn spawn_npc(&self, npc_id: i32) -> Result<Option<NpcInfo>> {
        let added = self.session.wait_for(SendOp::FieldAddNpc, COMBAT_DEADLINE);
        self.chat(&format!("/npc {npc_id}")).await?;

        let packet = match added.await {
            Ok(packet) => packet,
            Err(SessionError::Timeout(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let p = FieldAddNpc::from_body(&packet[OPCODE_LEN..])?;
        let npc = NpcInfo {
            object_id: p.object_id,
            npc_id: p.npc_id,
            position: p.position,
        };
        // the waiter consumed this packet, so the persistent FieldAddNpc
        // handler never saw it; mirror its insert
        self.field.lock().unwrap().npcs.insert(p.object_id, npc.clone());
        Ok(Some(npc))
    }

    fn alloc_uid(&self) -> i64 {
        self.next_uid.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Cast a skill. Returns the allocated skill uid even when the server
    /// echo times out, so the caller can still chain an attack.
    pub async fn cast_skill(&self, skill_id: i32, level: i16) -> Result<i64> {
        let skill_uid = self.alloc_uid();
        let (position, server_tick) = {
            let field = self.field.lock().unwrap();
            (field.position, field.server_tick)
        };

        let ack = self.session.wait_for(SendOp::SkillUse, COMBAT_DEADLINE);
        self.session
            .send(&SkillUse {
                mode: SKILL_MODE_USE,
                skill_uid,
                server_tick,
                skill_id,
                level,
                motion_point: 0,
                position,
                direction: Vec3::default(),
                rotation: Vec3::default(),
                rotate2z: 0.0,
                client_tick: self.epoch.elapsed().as_millis() as i32,
                unk1: false,
                item_uid: 0,
                is_hold: false,
            })
            .await?;

        if let Err(e) = ack.await {
            warn!("{}: no SkillUse echo for {skill_id}: {e}", self.session);
        }
        Ok(skill_uid)
    }

    /// Apply a cast skill to explicit targets.
    pub async fn attack_target(
        &self,
        skill_uid: i64,
        target_object_ids: &[i32],
        target_count: u8,
    ) -> Result<()> {
        if target_object_ids.len() < target_count as usize {
            return Err(SessionError::InvalidArgument(
                "fewer target object ids than target_count",
            ));
        }
        let target_uid = self.alloc_uid();
        let position = self.field.lock().unwrap().position;

        let damage = self.session.wait_for(SendOp::SkillDamage, COMBAT_DEADLINE);
        self.session
            .send(&SkillAttack {
                mode: SKILL_MODE_ATTACK,
                attack_mode: SKILL_ATTACK_TARGET,
                skill_uid,
                target_uid,
                impact_pos: position,
                impact_pos2: position,
                direction: Vec3::default(),
                attack_point: 0,
                target_count,
                iterations: 0,
                targets: target_object_ids[..target_count as usize]
                    .iter()
                    .map(|&object_id| SkillTarget { object_id, unk1: 0 })
                    .collect(),
            })
            .await?;

        if let Err(e) = damage.await {
            warn!("{}: no SkillDamage for {skill_uid:#x}: {e}", self.session);
        }
        Ok(())
    }

    /// Park until `until` completes. The receive loop and the persistent
    /// handlers answer every server-initiated probe in the meantime.
    pub async fn stay_alive(&self, until: impl Future<Output = ()>) {
        until.await;
    }
}

fn reply(session: &Weak<Session>, pkt: impl packet::ClientPacket + Send + Sync + 'static) {
    let Some(session) = session.upgrade() else {
        return;
    };
    smol::spawn(async move {
        if let Err(e) = session.send(&pkt).await {
            warn!("{session}: keep-alive reply failed: {e}");
        }
    })
    .detach();
}
