// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk

use futures::{AsyncRead, AsyncWrite};
use log::{debug, trace};
use packet::pkt_event::{EventHeader, EventPayload};

use anyhow::{anyhow, Result};
use smol::io::{AsyncReadExt, AsyncWriteExt};

/// Framed IPC stream between the world service and its peers.
#[derive(Debug)]
pub struct PacketStream<T: Unpin> {
    pub stream: T,
    buf: Vec<u8>,
}

impl<T: Unpin> PacketStream<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            buf: Vec::with_capacity(4096),
        }
    }
}

impl<T: Unpin + AsyncRead> PacketStream<T> {
    pub async fn recv(&mut self) -> Result<EventPayload> {
        let mut hdrbuf = [0u8; EventHeader::SIZE];
        self.stream.read_exact(&mut hdrbuf).await?;
        let hdr = EventHeader::decode(&hdrbuf)?;
        trace!("got hdr: {hdr:x?}");

        let payload_len = hdr.len as usize - EventHeader::SIZE;
        self.buf.resize(payload_len, 0u8);
        self.stream.read_exact(&mut self.buf[..]).await?;

        let p = EventPayload::decode(&hdr, &self.buf[..])
            .map_err(|e| anyhow!("Can't decode packet {hdr:x?}: {e}\nPayload: {:x?}", &self.buf));

        debug!("decoded packet: {p:?}");
        p
    }
}

impl<T: Unpin + AsyncWrite> PacketStream<T> {
    pub async fn send(&mut self, pkt: &EventPayload) -> Result<()> {
        trace!("sent pkt: {pkt:?}");
        self.buf.clear();
        let len = pkt.encode(&mut self.buf)?;
        self.stream.write_all(&self.buf[..len]).await?;
        Ok(())
    }
}
