// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk
// Game flow against a scripted game server: key auth, field entry, npc
// spawn, combat verbs and the server-initiated keep-alive probes.

mod common;

use std::time::Duration;

use bincode::config;
use client::game::GameClient;
use client::login::GameServerInfo;
use client::session::{SessionConfig, SessionError};
use common::{listen, wait_until, MockServer};
use packet::pkt_field::{
    FieldAddNpc, RequestFieldEnter, RequestHeartbeat, RequestTimeSync, ResponseFieldEnter,
    ResponseHeartbeat, ResponseKey, ResponseTimeSync, SkillAttack, SkillDamage, SkillUse,
    UserChat, Vec3, CHAT_TYPE_ALL, SKILL_ATTACK_TARGET, SKILL_MODE_ATTACK, SKILL_MODE_USE,
    TIME_SYNC_REQUEST,
};
use packet::{RecvOp, SendOp, OPCODE_LEN};
use smol::Timer;

const MACHINE_ID: [u8; 16] = [7; 16];

fn decode<T: bincode::Decode>(packet: &[u8]) -> T {
    bincode::decode_from_slice(&packet[OPCODE_LEN..], config::legacy())
        .unwrap()
        .0
}

fn add_user_body(object_id: i32) -> Vec<u8> {
    // known prefix + the appearance blob the client must skip
    let mut body = object_id.to_le_bytes().to_vec();
    body.extend_from_slice(&[0xbb; 21]);
    body
}

#[test]
fn game_flow_end_to_end() {
    smol::block_on(async {
        let (listener, addr) = listen();
        let server = smol::spawn(async move {
            let mut s = MockServer::accept(&listener).await;

            s.expect(RecvOp::ResponseVersion).await;
            s.send_wire(SendOp::RequestKey, &[]).await;

            let packet = s.expect(RecvOp::ResponseKey).await;
            let key: ResponseKey = decode(&packet);
            assert_eq!(key.account_id, 42);
            assert_eq!(key.token, 0xaabbccdd);
            assert_eq!(key.machine_id, MACHINE_ID);

            s.send(&RequestFieldEnter {
                migration_error: 0,
                map_id: 2000062,
                field_type: 0,
                instance_type: 0,
                instance_id: 0,
                dungeon_id: 0,
                position: Vec3::new(100.0, 200.0, 300.0),
            })
            .await;

            let packet = s.expect(RecvOp::ResponseFieldEnter).await;
            let enter: ResponseFieldEnter = decode(&packet);
            assert_eq!(enter.field_key, 0x1234);

            // the first add-user is the bot itself, the second is not
            s.send_wire(SendOp::FieldAddUser, &add_user_body(9001)).await;
            s.send_wire(SendOp::FieldAddUser, &add_user_body(9002)).await;

            // npc spawn request comes in as an admin chat command
            let packet = s.expect(RecvOp::UserChat).await;
            let chat: UserChat = decode(&packet);
            assert_eq!(chat.chat_type, CHAT_TYPE_ALL);
            assert_eq!(&*chat.message, "/npc 11000101");
            s.send(&FieldAddNpc {
                object_id: 5001,
                npc_id: 11000101,
                position: Vec3::new(1.0, 2.0, 3.0),
            })
            .await;

            let packet = s.expect(RecvOp::Skill).await;
            let skill: SkillUse = decode(&packet);
            assert_eq!(skill.mode, SKILL_MODE_USE);
            assert_eq!(skill.skill_uid, 2);
            assert_eq!(skill.skill_id, 10500001);
            assert_eq!(skill.level, 1);
            s.send_wire(SendOp::SkillUse, &[]).await;

            let packet = s.expect(RecvOp::Skill).await;
            let attack: SkillAttack = decode(&packet);
            assert_eq!(attack.mode, SKILL_MODE_ATTACK);
            assert_eq!(attack.attack_mode, SKILL_ATTACK_TARGET);
            assert_eq!(attack.skill_uid, 2);
            // the attack uid comes from the same allocator as the skill uid
            assert_eq!(attack.target_uid, 3);
            assert_eq!(attack.target_count, 1);
            assert_eq!(attack.targets[0].object_id, 5001);
            s.send(&SkillDamage {
                skill_uid: 2,
                object_id: 5001,
                damage: 999,
            })
            .await;

            // server-initiated probes; the bot must answer both unprompted
            s.send(&RequestHeartbeat { server_tick: 777 }).await;
            let packet = s.expect(RecvOp::ResponseHeartbeat).await;
            let hb: ResponseHeartbeat = decode(&packet);
            assert_eq!(hb.server_tick, 777);

            s.send(&ResponseTimeSync {
                command: TIME_SYNC_REQUEST,
                key: 5,
            })
            .await;
            let packet = s.expect(RecvOp::RequestTimeSync).await;
            let ts: RequestTimeSync = decode(&packet);
            assert_eq!(ts.key, 0);
            s
        });

        let info = GameServerInfo {
            ip: [127, 0, 0, 1],
            port: addr.port(),
            token: 0xaabbccdd,
            map_id: 2000062,
        };
        let game = GameClient::connect(&info, 42, MACHINE_ID, SessionConfig::default())
            .await
            .unwrap();

        {
            let field = game.field();
            assert_eq!(field.map_id, 2000062);
            assert_eq!(field.position, Vec3::new(100.0, 200.0, 300.0));
        }

        // only the first FieldAddUser sets our own object id
        wait_until(|| game.field().own_object_id == Some(9001)).await;

        let npc = game
            .spawn_npc(11000101)
            .await
            .unwrap()
            .expect("npc should spawn");
        assert_eq!(npc.object_id, 5001);
        assert_eq!(npc.npc_id, 11000101);
        // the waiter consumed the packet; the manual insert keeps the
        // tracked field in sync anyway
        assert!(game.field().npcs.contains_key(&5001));

        let skill_uid = game.cast_skill(10500001, 1).await.unwrap();
        assert_eq!(skill_uid, 2);

        let err = game.attack_target(skill_uid, &[], 1).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));

        game.attack_target(skill_uid, &[npc.object_id], 1)
            .await
            .unwrap();

        // park; the persistent handlers answer the heartbeat and the time
        // sync while we do nothing
        game.stay_alive(async {
            Timer::after(Duration::from_millis(300)).await;
        })
        .await;

        let _s = server.await;
        game.session.dispose().await;
    });
}

#[test]
fn field_enter_refusal_is_fatal() {
    smol::block_on(async {
        let (listener, addr) = listen();
        let server = smol::spawn(async move {
            let mut s = MockServer::accept(&listener).await;
            s.expect(RecvOp::ResponseVersion).await;
            s.send_wire(SendOp::RequestKey, &[]).await;
            s.expect(RecvOp::ResponseKey).await;
            s.send(&RequestFieldEnter {
                migration_error: 1,
                ..Default::default()
            })
            .await;
            s
        });

        let info = GameServerInfo {
            ip: [127, 0, 0, 1],
            port: addr.port(),
            token: 1,
            map_id: 0,
        };
        let err = GameClient::connect(&info, 42, MACHINE_ID, SessionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::MigrationFailed(1)));

        drop(server);
    });
}
