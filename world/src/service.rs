// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk
// The time-event RPC: one tagged request in, one tagged response out.
// State lives in the boss lookup and the portal singleton; the dispatch
// itself is stateless and safe to call from any task.

use std::sync::{Arc, Mutex};

use log::warn;
use packet::pkt_event::{FieldBossEntry, TimeEventRequest, TimeEventResponse};

use crate::channel::ChannelRegistry;
use crate::field_boss::FieldBossLookup;
use crate::global_portal::{GlobalPortalManager, GlobalPortalMetadata};

#[derive(Default)]
pub struct TimeEventService {
    pub channels: ChannelRegistry,
    pub bosses: FieldBossLookup,
    portal: Mutex<Option<Arc<GlobalPortalManager>>>,
    next_event_id: std::sync::atomic::AtomicI32,
}

impl TimeEventService {
    pub fn new() -> Self {
        Default::default()
    }

    /// Open a global portal hosted on `channel`, replacing any previous
    /// one. Returns the allocated event id.
    pub fn set_global_portal(&self, metadata: GlobalPortalMetadata, channel: i16) -> i32 {
        let event_id = self
            .next_event_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        let manager = Arc::new(GlobalPortalManager::new(metadata, event_id, channel));
        *self.portal.lock().unwrap() = Some(manager);
        event_id
    }

    pub fn clear_global_portal(&self) {
        *self.portal.lock().unwrap() = None;
    }

    pub fn global_portal(&self) -> Option<Arc<GlobalPortalManager>> {
        self.portal.lock().unwrap().clone()
    }

    pub async fn handle(&self, request: TimeEventRequest) -> TimeEventResponse {
        match request {
            TimeEventRequest::JoinGlobalPortal { event_id, index } => {
                self.handle_join_global_portal(event_id, index).await
            }
            TimeEventRequest::GetGlobalPortal => match self.global_portal() {
                Some(portal) => TimeEventResponse::GlobalPortal {
                    metadata_id: portal.metadata.id,
                    event_id: portal.event_id,
                },
                None => TimeEventResponse::Empty,
            },
            TimeEventRequest::GetActiveFieldBosses => {
                let bosses = self
                    .bosses
                    .get_all()
                    .iter()
                    .map(|manager| FieldBossEntry {
                        metadata_id: manager.boss.metadata_id,
                        event_id: manager.boss.event_id,
                        spawn_timestamp: manager.boss.spawn_timestamp,
                        next_spawn_timestamp: manager.boss.next_spawn_timestamp,
                        alive_channels: manager.alive_channels(),
                    })
                    .collect();
                TimeEventResponse::FieldBosses { bosses }
            }
            TimeEventRequest::FieldBossKilled {
                metadata_id,
                channel,
            } => {
                self.bosses.remove_channel(metadata_id, channel);
                TimeEventResponse::Empty
            }
        }
    }

    async fn handle_join_global_portal(&self, event_id: i32, index: i32) -> TimeEventResponse {
        let Some(portal) = self.global_portal() else {
            return TimeEventResponse::Empty;
        };
        if portal.event_id != event_id {
            return TimeEventResponse::Empty;
        }
        let Some(entry) = usize::try_from(index)
            .ok()
            .and_then(|i| portal.metadata.entries.get(i))
        else {
            return TimeEventResponse::Empty;
        };
        if entry.map_id == 0 {
            return TimeEventResponse::Empty;
        }

        match portal.join(&self.channels, entry.map_id, index).await {
            Ok(room_id) => TimeEventResponse::GlobalPortalInfo {
                channel: portal.channel,
                room_id,
                map_id: entry.map_id,
                portal_id: entry.portal_id,
            },
            Err(e) => {
                warn!("global portal join (event {event_id}, entry {index}) failed: {e}");
                TimeEventResponse::Empty
            }
        }
    }
}
