// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk
// Drives field-boss windows from metadata: open on a cycle boundary,
// warn shortly before close, clear on close or full kill.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{error, info};
use smol::Timer;

use crate::field_boss::{next_spawn_timestamp, FieldBossMetadata};
use crate::now_secs;
use crate::service::TimeEventService;

const TICK: Duration = Duration::from_secs(5);
/// Seconds before a window closes when channels get the closing warning.
const WARN_LEAD: i64 = 60;

pub async fn run(service: Arc<TimeEventService>, bosses: Vec<FieldBossMetadata>) -> Result<()> {
    // spawn timestamps already handled, so a fully-killed boss does not
    // reopen within the same window
    let mut opened: HashMap<i32, i64> = HashMap::new();

    loop {
        let now = now_secs();
        for metadata in &bosses {
            tick_boss(&service, metadata, now, &mut opened).await;
        }
        Timer::after(TICK).await;
    }
}

async fn tick_boss(
    service: &TimeEventService,
    metadata: &FieldBossMetadata,
    now: i64,
    opened: &mut HashMap<i32, i64>,
) {
    match service.bosses.get(metadata.id) {
        None => {
            if metadata.cycle_time == 0 || now < metadata.start_time || now > metadata.end_time {
                return;
            }
            // the window containing `now` opened on the previous boundary
            let k = (now - metadata.start_time) / metadata.cycle_time;
            let spawn_timestamp = metadata.start_time + k * metadata.cycle_time;
            if opened.get(&metadata.id) == Some(&spawn_timestamp) {
                return;
            }

            let next = next_spawn_timestamp(
                metadata.start_time,
                metadata.end_time,
                metadata.cycle_time,
                now,
            );
            let end_tick = if next != 0 { next } else { metadata.end_time };
            match service
                .bosses
                .create(metadata.clone(), end_tick, spawn_timestamp, next)
            {
                Ok(manager) => {
                    info!("{manager}: window open until {end_tick}");
                    opened.insert(metadata.id, spawn_timestamp);
                    manager.announce(&service.channels).await;
                }
                Err(e) => error!("cannot open a boss window: {e}"),
            }
        }
        Some(manager) => {
            if now >= manager.boss.end_tick || manager.cleared() {
                manager.dispose(&service.channels).await;
                service.bosses.remove(metadata.id);
                info!("{manager}: window closed");
            } else if manager.needs_warning(now, WARN_LEAD) {
                manager.warn_channels(&service.channels).await;
            }
        }
    }
}
