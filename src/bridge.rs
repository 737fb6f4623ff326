//! Raw-stream bridge and the client-as-invoker proxy.
//!
//! An established [`MsgStream`] is itself a perfectly good packet duplex:
//! each message payload carries one encoded [`Packet`]. That turns a running
//! call into a transport for further calls (nested streams), and lets a
//! [`Client`] stand in as an [`Invoker`] that forwards calls it receives to
//! a remote server.

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::call::ServerCall;
use crate::client::{Client, StreamOpener};
use crate::error::{Error, Result};
use crate::invoker::{ArcInvoker, Invoker};
use crate::proto::Packet;
use crate::stream::{ArcMsgStream, BoxMsgStream, MsgStream};
use crate::transport::{ArcPacketSink, PacketReceiver, PacketSink};

/// [`PacketSink`] that writes each packet as one message on a stream.
pub struct StreamPacketSink<S> {
    stream: S,
}

impl<S: MsgStream> StreamPacketSink<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S: MsgStream> PacketSink for StreamPacketSink<S> {
    async fn send(&self, packet: Packet) -> Result<()> {
        self.stream
            .send_raw(Bytes::from(packet.encode_to_vec()))
            .await
    }

    async fn shutdown(&self) -> Result<()> {
        self.stream.close_send().await
    }
}

/// Adapts a stream factory into a [`StreamOpener`].
///
/// Each open calls `connect` for a fresh stream, then speaks packets over
/// it: outbound through a [`StreamPacketSink`], inbound through a pump that
/// decodes message payloads back into packets.
pub fn stream_opener<F, Fut>(connect: F) -> impl StreamOpener
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<BoxMsgStream>> + Send + 'static,
{
    BridgeOpener { connect }
}

struct BridgeOpener<F> {
    connect: F,
}

#[async_trait]
impl<F, Fut> StreamOpener for BridgeOpener<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<BoxMsgStream>> + Send + 'static,
{
    async fn open_substream(&self) -> Result<(ArcPacketSink, PacketReceiver)> {
        let stream: ArcMsgStream = Arc::from((self.connect)().await?);
        let sink: ArcPacketSink = Arc::new(StreamPacketSink::new(stream.clone()));

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            loop {
                let payload = match stream.recv_raw().await {
                    Ok(p) => p,
                    Err(Error::StreamClosed) => return,
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };
                let item = Packet::decode(payload).map_err(Error::InvalidMessage);
                let fatal = item.is_err();
                if tx.send(item).await.is_err() || fatal {
                    return;
                }
            }
        });

        Ok((sink, rx))
    }
}

/// Serves one call arriving as packets on an established stream.
///
/// Server-side counterpart of [`stream_opener`]: the stream's message
/// payloads are decoded as packets and driven through a [`ServerCall`]
/// whose replies ride back over the same stream. Returns when the nested
/// call ends or the carrier stream does.
pub async fn serve_stream(stream: ArcMsgStream, invoker: ArcInvoker) -> Result<()> {
    let sink: ArcPacketSink = Arc::new(StreamPacketSink::new(stream.clone()));
    let ctx = stream.context().child();
    let call = ServerCall::new(ctx.clone(), invoker, sink);

    loop {
        tokio::select! {
            payload = stream.recv_raw() => {
                let pkt = match payload {
                    Ok(bytes) => match Packet::decode(bytes) {
                        Ok(pkt) => pkt,
                        Err(err) => {
                            let err = Error::InvalidMessage(err);
                            call.handle_stream_close(Some(err.to_string())).await;
                            return Err(err);
                        }
                    },
                    Err(Error::StreamClosed) => {
                        call.handle_stream_close(None).await;
                        return Ok(());
                    }
                    Err(err) => {
                        call.handle_stream_close(Some(err.to_string())).await;
                        return Err(err);
                    }
                };
                if let Err(err) = call.clone().handle_packet(pkt).await {
                    call.handle_stream_close(Some(err.to_string())).await;
                    return Err(err);
                }
            }
            _ = ctx.cancelled() => return Ok(()),
        }
    }
}

/// An [`Invoker`] that forwards every call to a remote server through a
/// [`Client`].
///
/// Registered as a mux fallback, it makes an in-process server proxy the
/// calls it cannot answer itself.
pub struct ClientInvoker<C> {
    client: C,
}

impl<C: Client> ClientInvoker<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: Client + 'static> Invoker for ClientInvoker<C> {
    async fn invoke(
        &self,
        service: &str,
        method: &str,
        stream: ArcMsgStream,
    ) -> (bool, Result<()>) {
        let remote = match self.client.new_stream(service, method, None).await {
            Ok(s) => s,
            Err(err) => return (true, Err(err)),
        };
        let remote: ArcMsgStream = Arc::from(remote);

        // Pump frames both ways until each direction drains.
        let upstream = relay(stream.clone(), remote.clone());
        let downstream = relay(remote.clone(), stream);
        let (up, down) = tokio::join!(upstream, downstream);

        let _ = remote.close().await;
        (true, up.and(down))
    }
}

/// Copies frames `from` → `to`; end-of-stream becomes close-send, anything
/// else propagates.
async fn relay(from: ArcMsgStream, to: ArcMsgStream) -> Result<()> {
    loop {
        match from.recv_raw().await {
            Ok(frame) => to.send_raw(frame).await?,
            Err(Error::StreamClosed) => {
                let _ = to.close_send().await;
                return Ok(());
            }
            Err(err) => return Err(err),
        }
    }
}
