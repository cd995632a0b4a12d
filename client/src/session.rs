// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk
// Encrypted session transport: TCP connect + version handshake, then a
// background receive loop that frames the stream and dispatches packets
// to one-shot waiters and persistent handlers.

use std::collections::{HashMap, VecDeque};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::channel::oneshot;
use futures::{AsyncReadExt, AsyncWriteExt, Future, FutureExt};
use log::{debug, error, info, trace, warn};
use maple_cipher::{CipherError, Decryptor, Encryptor};
use packet::pkt_login::Handshake;
use packet::{wire_opcode, ClientPacket, SendOp, ServerPacket, OPCODE_LEN};
use smol::{Async, Timer};
use thiserror::Error;

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);
const RECV_CHUNK: usize = 4096;
const DISPOSE_JOIN: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("server runs protocol version {server}, client is built for {client}")]
    VersionMismatch { server: u32, client: u32 },
    #[error("expected a RequestVersion handshake, got opcode {0:#06x}")]
    UnexpectedHandshakeOpcode(u16),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("session is disposed")]
    NotConnected,
    #[error("timed out waiting for {0:?}")]
    Timeout(SendOp),
    #[error("wait cancelled")]
    Cancelled,
    #[error("server refused migration (error {0})")]
    MigrationFailed(u8),
    #[error("dispatched packet shorter than an opcode")]
    ShortPacket,
    #[error("{0}")]
    InvalidArgument(&'static str),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error("packet encode failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("packet decode failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Process-wide wire constants, injected instead of living in globals.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub version: u32,
    pub field_key: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            version: 12,
            field_key: 0x1234,
        }
    }
}

pub type PacketHandler = Box<dyn FnMut(&[u8]) -> anyhow::Result<()> + Send>;

#[derive(Default)]
struct Dispatch {
    /// One-shot waiters, FIFO per opcode. The receive loop resolves the
    /// oldest live waiter and the packet is consumed.
    waiters: HashMap<u16, VecDeque<oneshot::Sender<Vec<u8>>>>,
    /// At most one persistent handler per opcode; sees every packet no
    /// waiter consumed.
    handlers: HashMap<u16, PacketHandler>,
}

pub struct Session {
    stream: Arc<Async<TcpStream>>,
    /// Send-side cipher state. Encrypt + write happen under this lock, so
    /// concurrent sends come out as whole frames.
    send_cipher: smol::lock::Mutex<Encryptor>,
    dispatch: Mutex<Dispatch>,
    disposed: AtomicBool,
    recv_task: Mutex<Option<smol::Task<()>>>,
    config: SessionConfig,
    peer: SocketAddr,
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Conn {}", self.peer)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session {{ peer: {} }}", self.peer)
    }
}

impl Session {
    /// Connect, consume the plaintext version handshake, set up the cipher
    /// pair and start the receive loop.
    pub async fn connect(addr: SocketAddr, config: SessionConfig) -> Result<Arc<Session>> {
        let stream = Arc::new(Async::<TcpStream>::connect(addr).await?);

        // Plaintext handshake: a frame header in the clear, then the
        // RequestVersion body.
        let mut hdr = [0u8; maple_cipher::HEADER_LEN];
        (&*stream).read_exact(&mut hdr).await.map_err(map_eof)?;
        let payload_len = u32::from_le_bytes([hdr[2], hdr[3], hdr[4], hdr[5]]) as usize;
        let mut payload = vec![0u8; payload_len];
        (&*stream).read_exact(&mut payload).await.map_err(map_eof)?;

        let opcode = wire_opcode(&payload).ok_or(SessionError::ShortPacket)?;
        if opcode != u16::from(SendOp::RequestVersion) {
            return Err(SessionError::UnexpectedHandshakeOpcode(opcode));
        }
        let hs = Handshake::from_body(&payload[OPCODE_LEN..])?;
        if hs.version != config.version {
            return Err(SessionError::VersionMismatch {
                server: hs.version,
                client: config.version,
            });
        }

        // One end's read channel is the other end's write channel, so the
        // IV seeds are used swapped: we encrypt under the server's receive
        // IV and decrypt under its send IV.
        let encryptor = Encryptor::new(hs.version, hs.riv, hs.block_iv);
        let mut decryptor = Decryptor::new(hs.version, hs.siv, hs.block_iv);

        // The server's encryptor advanced once while framing the plaintext
        // handshake. Run the raw handshake bytes through the decryptor so
        // the receive IV lands on the matching position; every later frame
        // depends on this.
        let mut raw = hdr.to_vec();
        raw.extend_from_slice(&payload);
        let consumed = decryptor.try_decrypt(&raw)?.map(|(n, _)| n).unwrap_or(0);
        debug_assert_eq!(consumed, raw.len());

        let peer = stream.get_ref().peer_addr()?;
        let session = Arc::new(Session {
            stream,
            send_cipher: smol::lock::Mutex::new(encryptor),
            dispatch: Mutex::new(Dispatch::default()),
            disposed: AtomicBool::new(false),
            recv_task: Mutex::new(None),
            config,
            peer,
        });

        let task = smol::spawn(Self::recv_loop(session.clone(), decryptor));
        *session.recv_task.lock().unwrap() = Some(task);

        info!("{session}: connected (protocol version {})", hs.version);
        Ok(session)
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Encrypt and write one packet. The cipher lock is held across the
    /// socket write, serializing all writers.
    pub async fn send(&self, pkt: &impl ClientPacket) -> Result<()> {
        if self.disposed.load(Ordering::Relaxed) {
            return Err(SessionError::NotConnected);
        }
        let wire = pkt.to_wire()?;
        trace!("{self}: send {:#06x} ({} bytes)", wire_opcode(&wire).unwrap(), wire.len());

        let mut encryptor = self.send_cipher.lock().await;
        let frame = encryptor.encrypt(&wire);
        (&*self.stream).write_all(&frame).await?;
        Ok(())
    }

    /// Register a one-shot waiter for the next `op` packet.
    ///
    /// The waiter is enqueued before this function returns, so calling it
    /// ahead of the triggering `send` is race-free even against a server
    /// that replies immediately.
    pub fn wait_for(&self, op: SendOp, deadline: Duration) -> impl Future<Output = Result<Vec<u8>>> {
        let (tx, rx) = oneshot::channel();
        if self.disposed.load(Ordering::Relaxed) {
            // dropping the sender resolves the future to Cancelled
            drop(tx);
        } else {
            self.dispatch
                .lock()
                .unwrap()
                .waiters
                .entry(u16::from(op))
                .or_default()
                .push_back(tx);
        }

        async move {
            let mut rx = rx.fuse();
            let mut deadline = Timer::after(deadline).fuse();
            futures::select! {
                r = rx => r.map_err(|_| SessionError::Cancelled),
                _ = deadline => Err(SessionError::Timeout(op)),
            }
        }
    }

    /// Install or replace the persistent handler for `op`. Handler errors
    /// are logged and never terminate the receive loop.
    pub fn on(&self, op: SendOp, handler: impl FnMut(&[u8]) -> anyhow::Result<()> + Send + 'static) {
        self.dispatch
            .lock()
            .unwrap()
            .handlers
            .insert(u16::from(op), Box::new(handler));
    }

    async fn recv_loop(session: Arc<Session>, mut decryptor: Decryptor) {
        let mut acc: Vec<u8> = Vec::with_capacity(RECV_CHUNK);
        let mut chunk = [0u8; RECV_CHUNK];

        'conn: loop {
            let n = match (&*session.stream).read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    // errors after dispose are part of teardown
                    if !session.disposed.load(Ordering::Relaxed) {
                        error!("{session}: receive failed: {e}");
                    }
                    break;
                }
            };
            acc.extend_from_slice(&chunk[..n]);

            loop {
                match decryptor.try_decrypt(&acc) {
                    Ok(None) => break,
                    Ok(Some((consumed, packet))) => {
                        acc.drain(..consumed);
                        if let Err(e) = session.dispatch_packet(packet) {
                            error!("{session}: {e}; dropping the connection");
                            break 'conn;
                        }
                    }
                    Err(e) => {
                        error!("{session}: {e}; dropping the connection");
                        break 'conn;
                    }
                }
            }
        }

        debug!("{session}: receive loop finished");
        session.cancel_waiters();
    }

    fn dispatch_packet(&self, mut packet: Vec<u8>) -> Result<()> {
        let opcode = wire_opcode(&packet).ok_or(SessionError::ShortPacket)?;
        trace!("{self}: recv {:#06x} ({} bytes)", opcode, packet.len());

        {
            let mut dispatch = self.dispatch.lock().unwrap();
            if let Some(fifo) = dispatch.waiters.get_mut(&opcode) {
                while let Some(tx) = fifo.pop_front() {
                    match tx.send(packet) {
                        // a resolved waiter consumes the packet; the
                        // persistent handler never sees it
                        Ok(()) => return Ok(()),
                        // that waiter already timed out, try the next one
                        Err(returned) => packet = returned,
                    }
                }
            }
        }

        // the handler is taken out of the map for the duration of the call
        // so it may use the session without deadlocking
        let handler = self.dispatch.lock().unwrap().handlers.remove(&opcode);
        if let Some(mut handler) = handler {
            if let Err(e) = handler(&packet) {
                error!("{self}: handler for {opcode:#06x} failed: {e:#}");
            }
            self.dispatch
                .lock()
                .unwrap()
                .handlers
                .entry(opcode)
                .or_insert(handler);
        } else {
            trace!("{self}: no consumer for {opcode:#06x}, dropping");
        }
        Ok(())
    }

    fn cancel_waiters(&self) {
        let waiters = std::mem::take(&mut self.dispatch.lock().unwrap().waiters);
        let pending: usize = waiters.values().map(|q| q.len()).sum();
        if pending > 0 {
            debug!("{self}: cancelling {pending} pending waiters");
        }
        // dropping the senders fails the matching futures
    }

    /// Tear the session down: close the socket, stop the receive loop
    /// (bounded wait) and cancel every pending waiter.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("{self}: disposing");
        if let Err(e) = self.stream.get_ref().shutdown(Shutdown::Both) {
            debug!("{self}: socket shutdown: {e}");
        }

        let task = self.recv_task.lock().unwrap().take();
        if let Some(task) = task {
            let mut task = task.fuse();
            let mut deadline = Timer::after(DISPOSE_JOIN).fuse();
            futures::select! {
                _ = task => {}
                _ = deadline => warn!("{self}: receive loop did not stop within {DISPOSE_JOIN:?}"),
            }
        }
        self.cancel_waiters();
    }
}

fn map_eof(e: std::io::Error) -> SessionError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        SessionError::ConnectionClosed
    } else {
        SessionError::Io(e)
    }
}
