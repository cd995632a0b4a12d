// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk

use std::net::{TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::{Arc, Weak};

use anyhow::{anyhow, bail, Result};
use log::{error, info, warn};
use packet::pkt_event::{
    ConnectAck, EventPayload, ServiceKind, TimeEventRequest, TimeEventResponse,
};
use smol::Async;

use crate::channel::ChannelLink;
use crate::packet_stream::PacketStream;
use crate::service::TimeEventService;

pub struct Listener {
    me: Weak<Listener>,
    tcp_listener: Async<TcpListener>,
    pub service: Arc<TimeEventService>,
}

impl Listener {
    pub fn new(tcp_listener: Async<TcpListener>, service: Arc<TimeEventService>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            tcp_listener,
            service,
        })
    }

    pub async fn listen(&self) -> Result<()> {
        info!(
            "Listener: started on {}",
            self.tcp_listener.get_ref().local_addr()?
        );

        loop {
            let (stream, _) = self.tcp_listener.accept().await?;
            let listener = self.me.upgrade().unwrap();

            // Give the connection handler its own background task
            smol::spawn(async move {
                let id = stream.as_raw_fd();
                info!("Listener: new connection #{id}");
                if let Err(err) = listener.handle_new_conn(stream).await {
                    error!("Listener: connection #{id} error: {err}");
                }
                info!("Listener: closing connection #{id}");
            })
            .detach();
        }
    }

    async fn handle_new_conn(self: Arc<Listener>, stream: Async<TcpStream>) -> Result<()> {
        let stream = Arc::new(stream);
        let mut reader = PacketStream::new(&*stream);

        let hello = reader.recv().await?;
        let EventPayload::Connect(hello) = hello else {
            bail!("Expected Connect payload, got {hello:?}");
        };

        match hello.kind {
            ServiceKind::GameChannel => {
                let link = Arc::new(ChannelLink::new(hello.channel_id, stream.clone()));
                link.send(&EventPayload::ConnectAck(ConnectAck {
                    kind: ServiceKind::GameChannel,
                    channel_id: hello.channel_id,
                }))
                .await
                .map_err(|e| anyhow!("{link}: ack failed: {e}"))?;

                self.service.channels.insert(link.clone());
                info!("{link}: connected");
                let ret = self.channel_loop(&link, &mut reader).await;
                self.service.channels.remove(&link);
                ret
            }
            ServiceKind::Api => {
                let mut writer = PacketStream::new(&*stream);
                writer
                    .send(&EventPayload::ConnectAck(ConnectAck {
                        kind: ServiceKind::Api,
                        channel_id: 0,
                    }))
                    .await?;
                self.api_loop(&mut reader, &mut writer).await
            }
        }
    }

    async fn channel_loop(
        &self,
        link: &Arc<ChannelLink>,
        reader: &mut PacketStream<&Async<TcpStream>>,
    ) -> Result<()> {
        loop {
            let p = reader.recv().await?;
            match p {
                EventPayload::Request(TimeEventRequest::FieldBossKilled {
                    metadata_id,
                    channel,
                }) => {
                    self.service.bosses.remove_channel(metadata_id, channel);
                    link.send(&EventPayload::Response(TimeEventResponse::Empty))
                        .await?;
                }
                EventPayload::FieldRoomCreated(p) => link.complete_room(p.room_id),
                EventPayload::Request(request) => {
                    // Requests that may round-trip through a channel link
                    // are served on api links; answering one here could
                    // end up waiting on this very connection.
                    warn!("{link}: unexpected request: {request:?}");
                    link.send(&EventPayload::Response(TimeEventResponse::Empty))
                        .await?;
                }
                p => warn!("{link}: unexpected payload: {p:?}"),
            }
        }
    }

    async fn api_loop(
        &self,
        reader: &mut PacketStream<&Async<TcpStream>>,
        writer: &mut PacketStream<&Async<TcpStream>>,
    ) -> Result<()> {
        loop {
            let p = reader.recv().await?;
            let EventPayload::Request(request) = p else {
                warn!("Api link: unexpected payload: {p:?}");
                continue;
            };
            let response = self.service.handle(request).await;
            writer.send(&EventPayload::Response(response)).await?;
        }
    }
}
