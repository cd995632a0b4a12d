// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(name = "maple2-bot", version)]
pub struct Args {
    /// Login server host
    #[clap(default_value = "127.0.0.1")]
    pub host: String,
    /// Login server port
    #[clap(default_value_t = 20001)]
    pub port: u16,
    #[clap(default_value = "testbot")]
    pub username: String,
    #[clap(default_value = "testbot")]
    pub password: String,
    /// Spawn this npc after entering the field
    #[clap(long)]
    pub npc: Option<i32>,
    /// Cast this skill, targeting the spawned npc if there is one
    #[clap(long)]
    pub skill: Option<i32>,
    #[clap(long, default_value_t = 1)]
    pub skill_level: i16,
    /// Seconds to keep answering keep-alives before exiting
    #[clap(long, default_value_t = 5)]
    pub linger: u64,
}
