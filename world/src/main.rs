// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk

// Binary part of the application.
// Everything else is in lib.rs so it can be unit tested.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use futures::try_join;
use smol::Async;

use world::field_boss::FieldBossMetadata;
use world::listener::Listener;
use world::scheduler;
use world::service::TimeEventService;

#[derive(Parser, Debug)]
#[clap(name = "maple2-world", version)]
struct Args {
    /// Address to accept channel and api links on
    #[clap(long, default_value = "127.0.0.1:20501")]
    bind: SocketAddr,
}

fn main() -> Result<()> {
    world::setup_log(false);
    let args = Args::parse();

    let tcp_listener =
        Async::<TcpListener>::bind(args.bind).expect("Cannot bind the listen address");

    let service = Arc::new(TimeEventService::new());
    let listener = Listener::new(tcp_listener, service.clone());

    // TODO: read the boss table from metadata storage once it exists;
    // until then drive the one boss the test bots use
    let bosses = vec![FieldBossMetadata {
        id: 23000101,
        npc_id: 23000101,
        field_id: 2000062,
        start_time: 0,
        end_time: i64::MAX,
        cycle_time: 3600,
    }];

    smol::block_on(async move {
        try_join!(listener.listen(), scheduler::run(service, bosses))?;
        Ok(())
    })
}
