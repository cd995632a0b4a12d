// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk
// Field-boss windows: one manager per open boss, broadcast to every game
// channel, with per-channel kill accounting.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use log::{error, info, warn};
use packet::pkt_event::{EventPayload, FieldBossClear, FieldBossSpawn, FieldBossWarn};
use thiserror::Error;

use crate::channel::{ChannelError, ChannelRegistry};

#[derive(Debug, Clone, PartialEq)]
pub struct FieldBossMetadata {
    pub id: i32,
    pub npc_id: i32,
    pub field_id: i32,
    /// Unix seconds of the first possible spawn.
    pub start_time: i64,
    /// Unix seconds after which the boss never spawns again.
    pub end_time: i64,
    /// Seconds between spawns; 0 disables the boss.
    pub cycle_time: i64,
}

/// Unix seconds of the next `start_time + k * cycle_time` strictly after
/// `now`, or 0 when there is none within the boss's lifetime.
pub fn next_spawn_timestamp(start_time: i64, end_time: i64, cycle_time: i64, now: i64) -> i64 {
    if cycle_time == 0 || end_time < now {
        return 0;
    }
    let candidate = if now < start_time {
        start_time
    } else {
        let k = (now - start_time) / cycle_time + 1;
        start_time + k * cycle_time
    };
    if candidate > end_time {
        return 0;
    }
    candidate
}

#[derive(Debug, Clone)]
pub struct FieldBossEvent {
    pub metadata_id: i32,
    pub event_id: i32,
    /// Unix seconds when this window closes.
    pub end_tick: i64,
    pub spawn_timestamp: i64,
    pub next_spawn_timestamp: i64,
    pub metadata: FieldBossMetadata,
}

#[derive(Debug)]
pub struct FieldBossManager {
    pub boss: FieldBossEvent,
    /// Channels the boss is alive on. Inserts happen on successful
    /// announce only; removes via `FieldBossKilled`.
    alive_channels: Mutex<BTreeSet<i16>>,
    announced: AtomicBool,
    warned: AtomicBool,
}

impl std::fmt::Display for FieldBossManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FieldBoss #{}", self.boss.metadata_id)
    }
}

impl FieldBossManager {
    fn new(boss: FieldBossEvent) -> Self {
        FieldBossManager {
            boss,
            alive_channels: Mutex::new(BTreeSet::new()),
            announced: AtomicBool::new(false),
            warned: AtomicBool::new(false),
        }
    }

    /// Tell every connected channel to spawn the boss. A channel is
    /// accounted alive iff its broadcast went through.
    pub async fn announce(&self, channels: &ChannelRegistry) {
        let pkt = EventPayload::FieldBossSpawn(FieldBossSpawn {
            metadata_id: self.boss.metadata_id,
            event_id: self.boss.event_id,
            field_id: self.boss.metadata.field_id,
            npc_id: self.boss.metadata.npc_id,
            end_tick: self.boss.end_tick,
        });
        for link in channels.cloned() {
            match link.send(&pkt).await {
                Ok(()) => {
                    self.alive_channels.lock().unwrap().insert(link.channel_id);
                    self.announced.store(true, Ordering::Relaxed);
                }
                Err(ChannelError::Unavailable(e)) => {
                    warn!("{self}: {link} is down, skipping announce: {e}");
                }
                Err(e) => error!("{self}: announce to {link} failed: {e}"),
            }
        }
        info!(
            "{self}: announced on {} channel(s)",
            self.alive_channels.lock().unwrap().len()
        );
    }

    /// Warn the channels that the window is about to close.
    pub async fn warn_channels(&self, channels: &ChannelRegistry) {
        let pkt = EventPayload::FieldBossWarn(FieldBossWarn {
            metadata_id: self.boss.metadata_id,
            event_id: self.boss.event_id,
        });
        for link in channels.cloned() {
            match link.send(&pkt).await {
                Ok(()) => {}
                Err(ChannelError::Unavailable(e)) => {
                    warn!("{self}: {link} is down, skipping warn: {e}");
                }
                Err(e) => error!("{self}: warn to {link} failed: {e}"),
            }
        }
    }

    /// Tell the channels to despawn the boss.
    pub async fn dispose(&self, channels: &ChannelRegistry) {
        let pkt = EventPayload::FieldBossClear(FieldBossClear {
            metadata_id: self.boss.metadata_id,
            event_id: self.boss.event_id,
        });
        for link in channels.cloned() {
            match link.send(&pkt).await {
                Ok(()) => {}
                Err(ChannelError::Unavailable(e)) => {
                    warn!("{self}: {link} is down, skipping clear: {e}");
                }
                Err(e) => error!("{self}: clear to {link} failed: {e}"),
            }
        }
    }

    pub fn remove_channel(&self, channel: i16) -> bool {
        self.alive_channels.lock().unwrap().remove(&channel)
    }

    pub fn alive_channels(&self) -> Vec<i16> {
        self.alive_channels.lock().unwrap().iter().copied().collect()
    }

    /// True once per manager, when `now` enters the pre-close warn lead.
    pub fn needs_warning(&self, now: i64, lead: i64) -> bool {
        now >= self.boss.end_tick - lead && !self.warned.swap(true, Ordering::Relaxed)
    }

    /// The boss was announced somewhere and every channel reported a kill.
    pub fn cleared(&self) -> bool {
        self.announced.load(Ordering::Relaxed) && self.alive_channels.lock().unwrap().is_empty()
    }

    #[cfg(test)]
    fn insert_alive(&self, channels: &[i16]) {
        self.alive_channels.lock().unwrap().extend(channels.iter().copied());
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum CreateError {
    /// A manager for this boss already exists. Whether the caller should
    /// have disposed it first is its call to make; nothing is replaced.
    #[error("field boss {0} already has an active event")]
    Conflict(i32),
}

/// All open boss windows, keyed by metadata id.
#[derive(Default)]
pub struct FieldBossLookup {
    entries: Mutex<HashMap<i32, Arc<FieldBossManager>>>,
    next_event_id: AtomicI32,
}

impl FieldBossLookup {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn create(
        &self,
        metadata: FieldBossMetadata,
        end_tick: i64,
        spawn_timestamp: i64,
        next_spawn_timestamp: i64,
    ) -> Result<Arc<FieldBossManager>, CreateError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&metadata.id) {
            return Err(CreateError::Conflict(metadata.id));
        }

        let event_id = self.next_event_id.fetch_add(1, Ordering::Relaxed) + 1;
        let manager = Arc::new(FieldBossManager::new(FieldBossEvent {
            metadata_id: metadata.id,
            event_id,
            end_tick,
            spawn_timestamp,
            next_spawn_timestamp,
            metadata,
        }));
        entries.insert(manager.boss.metadata_id, manager.clone());
        Ok(manager)
    }

    pub fn get(&self, metadata_id: i32) -> Option<Arc<FieldBossManager>> {
        self.entries.lock().unwrap().get(&metadata_id).cloned()
    }

    pub fn get_all(&self) -> Vec<Arc<FieldBossManager>> {
        self.entries.lock().unwrap().values().cloned().collect()
    }

    /// Drop one channel from a boss's alive set. The manager itself stays;
    /// disposal is the scheduler's business when the window closes.
    pub fn remove_channel(&self, metadata_id: i32, channel: i16) {
        match self.get(metadata_id) {
            Some(manager) => {
                manager.remove_channel(channel);
            }
            None => warn!("FieldBossKilled for unknown boss {metadata_id} (channel {channel})"),
        }
    }

    pub fn remove(&self, metadata_id: i32) -> Option<Arc<FieldBossManager>> {
        self.entries.lock().unwrap().remove(&metadata_id)
    }
}
