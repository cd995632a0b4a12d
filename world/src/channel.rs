// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk
// Send-side handle of a connected game channel. The receive side lives in
// the channel's own connection task; everything here may be called from
// any task.

use std::collections::VecDeque;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use futures::channel::oneshot;
use futures::AsyncWriteExt;
use log::warn;
use packet::pkt_event::{CreateFieldRoom, EventEncodeError, EventPayload};
use smol::Async;
use thiserror::Error;

use crate::locked_vec::LockedVec;

#[derive(Error, Debug)]
pub enum ChannelError {
    /// The channel is down; callers log a warning and move on.
    #[error("channel unavailable: {0}")]
    Unavailable(String),
    #[error("room creation timed out")]
    Timeout,
    #[error(transparent)]
    Encode(#[from] EventEncodeError),
}

pub struct ChannelLink {
    pub channel_id: i16,
    stream: Arc<Async<TcpStream>>,
    /// Encode scratch buffer doubling as the write lock; frames written
    /// under it never interleave.
    send_buf: smol::lock::Mutex<Vec<u8>>,
    /// Pending room-creation replies, in request order.
    room_waiters: Mutex<VecDeque<oneshot::Sender<i32>>>,
}

impl std::fmt::Display for ChannelLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Channel #{}", self.channel_id)
    }
}

impl ChannelLink {
    pub fn new(channel_id: i16, stream: Arc<Async<TcpStream>>) -> Self {
        ChannelLink {
            channel_id,
            stream,
            send_buf: smol::lock::Mutex::new(Vec::with_capacity(256)),
            room_waiters: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn send(&self, pkt: &EventPayload) -> Result<(), ChannelError> {
        let mut buf = self.send_buf.lock().await;
        self.write_frame(&mut buf, pkt).await
    }

    async fn write_frame(
        &self,
        buf: &mut Vec<u8>,
        pkt: &EventPayload,
    ) -> Result<(), ChannelError> {
        buf.clear();
        let len = pkt.encode(buf)?;
        (&*self.stream)
            .write_all(&buf[..len])
            .await
            .map_err(|e| ChannelError::Unavailable(e.to_string()))?;
        Ok(())
    }

    /// Ask the channel to create a field room. The write lock is held
    /// across waiter registration and the send, so replies resolve waiters
    /// in request order.
    pub async fn create_room(
        &self,
        map_id: i32,
        index: i32,
    ) -> Result<oneshot::Receiver<i32>, ChannelError> {
        let mut buf = self.send_buf.lock().await;
        let (tx, rx) = oneshot::channel();
        self.room_waiters.lock().unwrap().push_back(tx);

        let pkt = EventPayload::CreateFieldRoom(CreateFieldRoom { map_id, index });
        match self.write_frame(&mut buf, &pkt).await {
            Ok(()) => Ok(rx),
            Err(e) => {
                // still under the write lock, so the back is ours
                self.room_waiters.lock().unwrap().pop_back();
                Err(e)
            }
        }
    }

    /// Called by the connection task when the channel reports a created
    /// room.
    pub fn complete_room(&self, room_id: i32) {
        match self.room_waiters.lock().unwrap().pop_front() {
            Some(tx) => {
                let _ = tx.send(room_id);
            }
            None => warn!("{self}: unsolicited room reply ({room_id})"),
        }
    }
}

/// Live channel links, deregistered when their connection task exits.
#[derive(Default)]
pub struct ChannelRegistry {
    links: LockedVec<Arc<ChannelLink>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&self, link: Arc<ChannelLink>) {
        self.links.push(link);
    }

    pub fn remove(&self, link: &Arc<ChannelLink>) {
        self.links.retain(|l| !Arc::ptr_eq(l, link));
    }

    pub fn get(&self, channel_id: i16) -> Option<Arc<ChannelLink>> {
        self.links.find(|l| l.channel_id == channel_id)
    }

    pub fn cloned(&self) -> Vec<Arc<ChannelLink>> {
        self.links.cloned()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
