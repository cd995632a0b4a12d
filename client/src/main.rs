// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk

// Binary part of the application.
// Everything else is in lib.rs so it can be unit tested.

use std::net::ToSocketAddrs;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use smol::Timer;

use client::args::Args;
use client::game::GameClient;
use client::login::LoginClient;
use client::session::SessionConfig;

fn main() -> Result<()> {
    client::setup_log(false);
    let args = Args::parse();
    smol::block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    let config = SessionConfig::default();
    let addr = (args.host.as_str(), args.port)
        .to_socket_addrs()?
        .next()
        .with_context(|| format!("cannot resolve {}", args.host))?;

    let login = LoginClient::connect(addr, config).await?;
    let result = login.login(&args.username, &args.password).await?;
    if !result.success {
        bail!(
            "login rejected (code {}): {}",
            result.error_code,
            result.error_message
        );
    }
    let Some(character) = result.characters.first().cloned() else {
        bail!("account {} has no characters", result.account_id);
    };
    info!(
        "playing {} ({}) on account {}",
        character.name, character.character_id, result.account_id
    );

    let server = login.select_character(character.character_id).await?;
    let machine_id = login.machine_id();
    login.dispose().await;

    let game = GameClient::connect(&server, result.account_id, machine_id, config).await?;

    // let the field settle before acting
    Timer::after(Duration::from_millis(400)).await;

    let npc = match args.npc {
        Some(npc_id) => {
            let npc = game.spawn_npc(npc_id).await?;
            match &npc {
                Some(npc) => info!("npc {} is up as object {}", npc.npc_id, npc.object_id),
                None => info!("npc {npc_id} did not spawn"),
            }
            npc
        }
        None => None,
    };

    if let Some(skill_id) = args.skill {
        let skill_uid = game.cast_skill(skill_id, args.skill_level).await?;
        if let Some(npc) = &npc {
            game.attack_target(skill_uid, &[npc.object_id], 1).await?;
        }
    }

    game.stay_alive(async {
        Timer::after(Duration::from_secs(args.linger)).await;
    })
    .await;

    game.session.dispose().await;
    info!("all done");
    Ok(())
}
