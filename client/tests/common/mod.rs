// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk
// Scripted game/login server used by the flow tests: real TCP, real
// cipher, fully deterministic packet scripts.

#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use futures::{AsyncReadExt, AsyncWriteExt};
use maple_cipher::{Decryptor, Encryptor};
use packet::pkt_login::Handshake;
use packet::{wire_opcode, RecvOp, SendOp, ServerPacket};
use smol::{Async, Timer};

pub const VERSION: u32 = 12;
pub const RIV: u32 = 0xdeadbeef;
pub const SIV: u32 = 0xcafebabe;
pub const BLOCK_IV: u32 = 0x12345678;

pub fn listen() -> (Async<TcpListener>, SocketAddr) {
    let listener = Async::<TcpListener>::bind(([127, 0, 0, 1], 0)).unwrap();
    let addr = listener.get_ref().local_addr().unwrap();
    (listener, addr)
}

pub struct MockServer {
    stream: Async<TcpStream>,
    enc: Encryptor,
    dec: Decryptor,
    acc: Vec<u8>,
}

impl MockServer {
    pub async fn accept(listener: &Async<TcpListener>) -> MockServer {
        Self::accept_with_version(listener, VERSION).await
    }

    pub async fn accept_with_version(listener: &Async<TcpListener>, version: u32) -> MockServer {
        let (stream, _) = listener.accept().await.unwrap();
        let mut server = MockServer {
            stream,
            enc: Encryptor::new(version, SIV, BLOCK_IV),
            dec: Decryptor::new(version, RIV, BLOCK_IV),
            acc: Vec::new(),
        };

        // every connection starts with the plaintext version handshake,
        // framed by the send cipher so its IV advances once
        let hs = Handshake {
            version,
            riv: RIV,
            siv: SIV,
            block_iv: BLOCK_IV,
            patch_type: 0,
        };
        let frame = server.enc.write_header(&hs.to_wire().unwrap());
        server.stream.write_all(&frame).await.unwrap();
        server
    }

    pub async fn send(&mut self, pkt: &impl ServerPacket) {
        let frame = self.enc.encrypt(&pkt.to_wire().unwrap());
        self.stream.write_all(&frame).await.unwrap();
    }

    /// Send a handcrafted body under `op`; used for packets whose wire
    /// form has no full struct (character list, appearance blobs).
    pub async fn send_wire(&mut self, op: SendOp, body: &[u8]) {
        let mut wire = u16::from(op).to_le_bytes().to_vec();
        wire.extend_from_slice(body);
        let frame = self.enc.encrypt(&wire);
        self.stream.write_all(&frame).await.unwrap();
    }

    /// Receive one decrypted client packet (opcode included).
    pub async fn recv(&mut self) -> Vec<u8> {
        loop {
            if let Some((consumed, packet)) = self.dec.try_decrypt(&self.acc).unwrap() {
                self.acc.drain(..consumed);
                return packet;
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed the connection mid-script");
            self.acc.extend_from_slice(&chunk[..n]);
        }
    }

    pub async fn expect(&mut self, op: RecvOp) -> Vec<u8> {
        let packet = self.recv().await;
        assert_eq!(
            wire_opcode(&packet),
            Some(u16::from(op)),
            "unexpected opcode (packet {packet:02x?})"
        );
        packet
    }
}

pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        Timer::after(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
