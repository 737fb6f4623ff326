//! Packet transport over an `AsyncRead`/`AsyncWrite` duplex.
//!
//! One substream is driven by a [`PacketSink`] on the write half and a read
//! pump on the read half. The pump forwards decoded packets (or the single
//! terminating error) over a channel; the channel closing with no error is
//! end-of-stream.

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{Encoder, FramedRead};

use crate::error::{Error, Result};
use crate::framing::FrameCodec;
use crate::proto::Packet;

/// Outbound half of a substream.
#[async_trait]
pub trait PacketSink: Send + Sync {
    /// Frames and writes one packet. Serialized against concurrent senders.
    async fn send(&self, packet: Packet) -> Result<()>;

    /// Closes the write side. Later sends fail with `StreamClosed`.
    async fn shutdown(&self) -> Result<()>;
}

/// Shared sink handle.
pub type ArcPacketSink = Arc<dyn PacketSink>;

/// Inbound half of a substream: packets in arrival order, then either an
/// `Err` item (transport failure) or channel close (EOF).
pub type PacketReceiver = mpsc::Receiver<Result<Packet>>;

const PACKET_CHANNEL_CAPACITY: usize = 32;

/// [`PacketSink`] over any `AsyncWrite`.
pub struct DuplexPacketSink<W> {
    writer: Mutex<W>,
    closed: AtomicBool,
}

impl<W: AsyncWrite + Send + Unpin> DuplexPacketSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<W: AsyncWrite + Send + Unpin + 'static> PacketSink for DuplexPacketSink<W> {
    async fn send(&self, packet: Packet) -> Result<()> {
        if self.is_closed() {
            return Err(Error::StreamClosed);
        }

        let mut buf = BytesMut::new();
        FrameCodec::new().encode(packet, &mut buf)?;

        // One logical write per frame: the mutex keeps concurrent frames
        // from interleaving.
        let mut writer = self.writer.lock().await;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

/// Spawns the read pump for a substream.
///
/// Decodes frames until the transport ends. Each packet is forwarded in
/// order; a decode or IO failure is forwarded once and ends the pump.
pub fn spawn_read_pump<R>(reader: R, tx: mpsc::Sender<Result<Packet>>) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut frames = FramedRead::new(reader, FrameCodec::new());
        while let Some(next) = frames.next().await {
            let fatal = next.is_err();
            if tx.send(next).await.is_err() {
                // Receiver gone; nobody cares about the rest.
                return;
            }
            if fatal {
                tracing::debug!("read pump stopping on transport error");
                return;
            }
        }
        tracing::trace!("read pump reached end of stream");
    })
}

/// Wires a split duplex into a packet sink and a packet receiver, spawning
/// the read pump. This is the building block behind every stream opener.
pub fn open_packet_pipe<R, W>(reader: R, writer: W) -> (ArcPacketSink, PacketReceiver)
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let sink: ArcPacketSink = Arc::new(DuplexPacketSink::new(writer));
    let (tx, rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);
    spawn_read_pump(reader, tx);
    (sink, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{call_complete, call_data, call_start};
    use bytes::Bytes;

    #[tokio::test]
    async fn pipe_delivers_packets_in_order() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, _server_write) = tokio::io::split(server);

        let sink = DuplexPacketSink::new(client_write);
        let (tx, mut rx) = mpsc::channel(8);
        spawn_read_pump(server_read, tx);

        let sent = vec![
            call_start("svc", "mth", None),
            call_data(Some(Bytes::from_static(b"one")), false, None),
            call_complete(),
        ];
        for pkt in &sent {
            sink.send(pkt.clone()).await.unwrap();
        }

        for pkt in &sent {
            let got = rx.recv().await.unwrap().unwrap();
            assert_eq!(&got, pkt);
        }

        drop(client_read);
        sink.shutdown().await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_after_shutdown_fails() {
        let (client, _server) = tokio::io::duplex(64);
        let (_read, write) = tokio::io::split(client);
        let sink = DuplexPacketSink::new(write);

        sink.shutdown().await.unwrap();
        assert!(sink.is_closed());
        let err = sink.send(call_complete()).await.unwrap_err();
        assert!(matches!(err, Error::StreamClosed));
    }

    #[tokio::test]
    async fn pump_forwards_fatal_error_once() {
        use tokio::io::AsyncWriteExt;

        let (client, server) = tokio::io::duplex(64);
        let (_client_read, mut client_write) = tokio::io::split(client);
        let (server_read, _server_write) = tokio::io::split(server);

        let (tx, mut rx) = mpsc::channel(8);
        spawn_read_pump(server_read, tx);

        // A zero length prefix is a protocol violation.
        client_write.write_all(&[0, 0, 0, 0]).await.unwrap();
        client_write.flush().await.unwrap();

        let item = rx.recv().await.unwrap();
        assert!(matches!(item, Err(Error::ZeroLengthFrame)));
        assert!(rx.recv().await.is_none());
    }
}
