// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk
// Dispatch semantics of the session transport: waiter precedence, FIFO
// order, timeouts, disposal, and send framing under concurrency.

mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use client::session::{Session, SessionConfig, SessionError};
use common::{listen, wait_until, MockServer};
use packet::pkt_field::{FieldAddNpc, RequestTimeSync, Vec3};
use packet::{RecvOp, SendOp, ServerPacket, OPCODE_LEN};

fn npc(object_id: i32) -> FieldAddNpc {
    FieldAddNpc {
        object_id,
        npc_id: 7,
        position: Vec3::default(),
    }
}

fn npc_id_of(packet: &[u8]) -> i32 {
    FieldAddNpc::from_body(&packet[OPCODE_LEN..])
        .unwrap()
        .object_id
}

#[test]
fn waiter_takes_precedence_over_handler() {
    smol::block_on(async {
        let (listener, addr) = listen();
        let server = smol::spawn(async move {
            let mut s = MockServer::accept(&listener).await;
            // wait for the go signal so the client has everything armed
            s.expect(RecvOp::RequestTimeSync).await;
            s.send(&npc(1)).await;
            s.send(&npc(2)).await;
            s
        });

        let session = Session::connect(addr, SessionConfig::default())
            .await
            .unwrap();
        let handled = Arc::new(Mutex::new(Vec::new()));
        {
            let handled = handled.clone();
            session.on(SendOp::FieldAddNpc, move |packet| {
                handled.lock().unwrap().push(npc_id_of(packet));
                Ok(())
            });
        }

        let waiter = session.wait_for(SendOp::FieldAddNpc, Duration::from_secs(5));
        session.send(&RequestTimeSync { key: 0 }).await.unwrap();

        // the waiter consumes the first packet to the handler's exclusion
        let packet = waiter.await.unwrap();
        assert_eq!(npc_id_of(&packet), 1);

        // the handler sees only the second
        wait_until(|| *handled.lock().unwrap() == [2]).await;

        let _s = server.await;
        session.dispose().await;
    });
}

#[test]
fn waiters_resolve_in_fifo_order() {
    smol::block_on(async {
        let (listener, addr) = listen();
        let server = smol::spawn(async move {
            let mut s = MockServer::accept(&listener).await;
            s.expect(RecvOp::RequestTimeSync).await;
            s.send(&npc(1)).await;
            s.send(&npc(2)).await;
            s
        });

        let session = Session::connect(addr, SessionConfig::default())
            .await
            .unwrap();
        let first = session.wait_for(SendOp::FieldAddNpc, Duration::from_secs(5));
        let second = session.wait_for(SendOp::FieldAddNpc, Duration::from_secs(5));
        session.send(&RequestTimeSync { key: 0 }).await.unwrap();

        assert_eq!(npc_id_of(&first.await.unwrap()), 1);
        assert_eq!(npc_id_of(&second.await.unwrap()), 2);

        let _s = server.await;
        session.dispose().await;
    });
}

#[test]
fn timeout_leaves_the_session_live() {
    smol::block_on(async {
        let (listener, addr) = listen();
        let server = smol::spawn(async move {
            let mut s = MockServer::accept(&listener).await;
            s.expect(RecvOp::RequestTimeSync).await;
            s.send(&npc(5)).await;
            s
        });

        let session = Session::connect(addr, SessionConfig::default())
            .await
            .unwrap();

        // nothing is coming yet, so this deadline lapses
        let err = session
            .wait_for(SendOp::FieldAddNpc, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout(SendOp::FieldAddNpc)));

        // the connection survives, and the dead waiter does not swallow
        // the next packet
        let waiter = session.wait_for(SendOp::FieldAddNpc, Duration::from_secs(5));
        session.send(&RequestTimeSync { key: 0 }).await.unwrap();
        assert_eq!(npc_id_of(&waiter.await.unwrap()), 5);

        let _s = server.await;
        session.dispose().await;
    });
}

#[test]
fn dispose_cancels_pending_waiters() {
    smol::block_on(async {
        let (listener, addr) = listen();
        let server = smol::spawn(async move { MockServer::accept(&listener).await });

        let session = Session::connect(addr, SessionConfig::default())
            .await
            .unwrap();
        let waiter = session.wait_for(SendOp::LoginResult, Duration::from_secs(60));

        let started = Instant::now();
        session.dispose().await;

        let err = waiter.await.unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));

        // sends after disposal fail fast
        let err = session.send(&RequestTimeSync { key: 0 }).await.unwrap_err();
        assert!(matches!(err, SessionError::NotConnected));

        drop(server);
    });
}

#[test]
fn concurrent_sends_come_out_as_whole_frames() {
    smol::block_on(async {
        const SENDS: i32 = 20;

        let (listener, addr) = listen();
        let server = smol::spawn(async move {
            let mut s = MockServer::accept(&listener).await;
            let mut keys = Vec::new();
            for _ in 0..SENDS {
                // decryption itself fails if any frame interleaved
                let packet = s.expect(RecvOp::RequestTimeSync).await;
                let (p, _) = bincode::decode_from_slice::<RequestTimeSync, _>(
                    &packet[OPCODE_LEN..],
                    bincode::config::legacy(),
                )
                .unwrap();
                keys.push(p.key);
            }
            keys.sort_unstable();
            keys
        });

        let session = Session::connect(addr, SessionConfig::default())
            .await
            .unwrap();
        let tasks: Vec<_> = (0..SENDS)
            .map(|key| {
                let session = session.clone();
                smol::spawn(async move { session.send(&RequestTimeSync { key }).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let keys = server.await;
        assert_eq!(keys, (0..SENDS).collect::<Vec<_>>());
        session.dispose().await;
    });
}
