// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk
// At most one global portal is open at a time. Joining an entry allocates
// a field room on the hosting channel exactly once; later joins of the
// same entry land in the same room.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use futures::FutureExt;
use log::info;
use smol::Timer;

use crate::channel::{ChannelError, ChannelRegistry};

const ROOM_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct PortalEntry {
    /// 0 marks a hole in the entry table; such entries cannot be joined.
    pub map_id: i32,
    pub portal_id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalPortalMetadata {
    pub id: i32,
    pub entries: Vec<PortalEntry>,
}

pub struct GlobalPortalManager {
    pub metadata: GlobalPortalMetadata,
    pub event_id: i32,
    /// Channel hosting the portal rooms.
    pub channel: i16,
    room_ids: Mutex<HashMap<i32, i32>>,
}

impl GlobalPortalManager {
    pub fn new(metadata: GlobalPortalMetadata, event_id: i32, channel: i16) -> Self {
        GlobalPortalManager {
            metadata,
            event_id,
            channel,
            room_ids: Mutex::new(HashMap::new()),
        }
    }

    /// Room id for `index`, creating the room on the hosting channel on
    /// first use. Concurrent joins of one index agree on a single room:
    /// the first id published wins and later round-trips are discarded.
    pub async fn join(
        &self,
        channels: &ChannelRegistry,
        map_id: i32,
        index: i32,
    ) -> Result<i32, ChannelError> {
        if let Some(room_id) = self.room_ids.lock().unwrap().get(&index).copied() {
            return Ok(room_id);
        }

        let link = channels
            .get(self.channel)
            .ok_or_else(|| ChannelError::Unavailable(format!("channel {} not connected", self.channel)))?;
        let reply = link.create_room(map_id, index).await?;

        let mut reply = reply.fuse();
        let mut deadline = Timer::after(ROOM_DEADLINE).fuse();
        let room_id = futures::select! {
            r = reply => r.map_err(|_| ChannelError::Unavailable("channel link closed".into()))?,
            _ = deadline => return Err(ChannelError::Timeout),
        };

        let mut rooms = self.room_ids.lock().unwrap();
        let room_id = *rooms.entry(index).or_insert(room_id);
        info!(
            "global portal {}: entry {index} resolves to room {room_id}",
            self.metadata.id
        );
        Ok(room_id)
    }
}
