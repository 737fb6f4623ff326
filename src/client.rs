//! Client façade: unary calls and streams over a transport-supplied opener.

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

use crate::call::ClientCall;
use crate::error::{Error, Result};
use crate::stream::{BoxMsgStream, Context, MsgStream, MsgStreamExt};
use crate::transport::{open_packet_pipe, ArcPacketSink, PacketReceiver};

/// Transport capability: produces a fresh packet substream per call.
///
/// Implementations must tolerate concurrent opens; every call gets its own
/// substream.
#[async_trait]
pub trait StreamOpener: Send + Sync {
    async fn open_substream(&self) -> Result<(ArcPacketSink, PacketReceiver)>;
}

/// Client-side entry points for making calls.
#[async_trait]
pub trait Client: Send + Sync {
    /// Unary call: send one request, decode one reply.
    async fn exec_call<I, O>(&self, service: &str, method: &str, input: &I) -> Result<O>
    where
        I: Message + Send + Sync,
        O: Message + Default;

    /// Opens a streaming call. `first_msg`, when present, rides inside
    /// CallStart (an empty slice is an empty-but-present message).
    async fn new_stream(
        &self,
        service: &str,
        method: &str,
        first_msg: Option<&[u8]>,
    ) -> Result<BoxMsgStream>;
}

/// Standard client over any [`StreamOpener`].
pub struct RpcClient<T> {
    opener: T,
}

impl<T: StreamOpener> RpcClient<T> {
    pub fn new(opener: T) -> Self {
        Self { opener }
    }

    /// Hands out a raw substream, bypassing the call layer. The bridge and
    /// proxy plumbing build on this.
    pub async fn open_raw_substream(&self) -> Result<(ArcPacketSink, PacketReceiver)> {
        self.opener.open_substream().await
    }

    async fn start_call(
        &self,
        service: &str,
        method: &str,
        first_msg: Option<Bytes>,
    ) -> Result<(Arc<ClientCall>, JoinHandle<()>)> {
        let (sink, packets) = self.opener.open_substream().await?;
        let call = Arc::new(ClientCall::new(Context::new(), service, method, sink));
        let driver = spawn_call_driver(call.clone(), packets);
        if let Err(err) = call.start(first_msg).await {
            driver.abort();
            return Err(err);
        }
        Ok((call, driver))
    }
}

/// Feeds inbound packets into the call until the substream ends.
fn spawn_call_driver(call: Arc<ClientCall>, mut packets: PacketReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match packets.recv().await {
                Some(Ok(pkt)) => {
                    if let Err(err) = call.handle_packet(pkt).await {
                        call.handle_stream_close(Some(err.to_string())).await;
                        return;
                    }
                }
                Some(Err(err)) => {
                    call.handle_stream_close(Some(err.to_string())).await;
                    return;
                }
                None => {
                    call.handle_stream_close(None).await;
                    return;
                }
            }
        }
    })
}

#[async_trait]
impl<T: StreamOpener + 'static> Client for RpcClient<T> {
    async fn exec_call<I, O>(&self, service: &str, method: &str, input: &I) -> Result<O>
    where
        I: Message + Send + Sync,
        O: Message + Default,
    {
        let request = Bytes::from(input.encode_to_vec());
        let (call, driver) = self.start_call(service, method, Some(request)).await?;
        // The driver must not outlive this call, whichever way we exit.
        let driver = scopeguard::guard(driver, |d| d.abort());

        // If the substream already died, the read below surfaces the
        // recorded error; a failed close-send must not mask it.
        let _ = call.close_send().await;
        let reply: O = call.msg_recv().await?;

        // Drain the server's terminal frame before tearing down.
        let _ = call.wait().await;
        ClientCall::close(&call).await;
        drop(driver);

        Ok(reply)
    }

    async fn new_stream(
        &self,
        service: &str,
        method: &str,
        first_msg: Option<&[u8]>,
    ) -> Result<BoxMsgStream> {
        let first = first_msg.map(Bytes::copy_from_slice);
        let (call, driver) = self.start_call(service, method, first).await?;
        Ok(Box::new(LiveStream {
            call,
            driver: Mutex::new(Some(driver)),
        }))
    }
}

/// Stream handle returned by [`Client::new_stream`]; owns the driver task.
struct LiveStream {
    call: Arc<ClientCall>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl MsgStream for LiveStream {
    fn context(&self) -> &Context {
        self.call.context()
    }

    async fn send_raw(&self, data: Bytes) -> Result<()> {
        self.call.send_raw(data).await
    }

    async fn recv_raw(&self) -> Result<Bytes> {
        self.call.recv_raw().await
    }

    async fn close_send(&self) -> Result<()> {
        MsgStream::close_send(self.call.as_ref()).await
    }

    async fn close(&self) -> Result<()> {
        ClientCall::close(&self.call).await;
        if let Some(driver) = self.driver.lock().unwrap().take() {
            driver.abort();
        }
        Ok(())
    }
}

/// Opener over exactly one duplex connection.
///
/// The first open consumes the transport; later opens fail with
/// `StreamClosed`. Multiplexing transports should implement
/// [`StreamOpener`] themselves, one substream per call.
pub struct SingleStreamOpener<T> {
    transport: Mutex<Option<T>>,
}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> SingleStreamOpener<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Mutex::new(Some(transport)),
        }
    }
}

#[async_trait]
impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> StreamOpener for SingleStreamOpener<T> {
    async fn open_substream(&self) -> Result<(ArcPacketSink, PacketReceiver)> {
        let transport = self
            .transport
            .lock()
            .unwrap()
            .take()
            .ok_or(Error::StreamClosed)?;
        let (reader, writer) = tokio::io::split(transport);
        Ok(open_packet_pipe(reader, writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::test_support::RecordingSink;
    use crate::proto::packet::Body;
    use crate::transport::PacketSink;
    use tokio::sync::mpsc;

    struct StubOpener {
        sink: Arc<RecordingSink>,
        packets: Mutex<Option<PacketReceiver>>,
    }

    impl StubOpener {
        fn new() -> (Self, mpsc::Sender<Result<crate::proto::Packet>>) {
            let (tx, rx) = mpsc::channel(8);
            (
                Self {
                    sink: Arc::new(RecordingSink::new()),
                    packets: Mutex::new(Some(rx)),
                },
                tx,
            )
        }
    }

    #[async_trait]
    impl StreamOpener for StubOpener {
        async fn open_substream(&self) -> Result<(ArcPacketSink, PacketReceiver)> {
            let rx = self
                .packets
                .lock()
                .unwrap()
                .take()
                .ok_or(Error::StreamClosed)?;
            Ok((self.sink.clone(), rx))
        }
    }

    #[tokio::test]
    async fn new_stream_sends_call_start() {
        let (opener, _tx) = StubOpener::new();
        let sink = opener.sink.clone();
        let client = RpcClient::new(opener);

        let stream = client
            .new_stream("demo.Svc", "Method", Some(b"first"))
            .await
            .unwrap();
        assert!(!stream.context().is_cancelled());

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0].body {
            Some(Body::CallStart(cs)) => {
                assert_eq!(cs.rpc_service, "demo.Svc");
                assert_eq!(cs.rpc_method, "Method");
                assert_eq!(cs.data, Bytes::from_static(b"first"));
            }
            other => panic!("expected CallStart, got {:?}", other),
        }

        stream.close().await.unwrap();
    }

    #[tokio::test]
    async fn driver_feeds_inbound_packets() {
        let (opener, tx) = StubOpener::new();
        let client = RpcClient::new(opener);

        let stream = client.new_stream("demo.Svc", "Method", None).await.unwrap();
        tx.send(Ok(crate::packet::call_data(
            Some(Bytes::from_static(b"pong")),
            false,
            None,
        )))
        .await
        .unwrap();

        assert_eq!(
            stream.recv_raw().await.unwrap(),
            Bytes::from_static(b"pong")
        );
        stream.close().await.unwrap();
    }

    #[tokio::test]
    async fn transport_error_surfaces_as_remote() {
        let (opener, tx) = StubOpener::new();
        let client = RpcClient::new(opener);

        let stream = client.new_stream("demo.Svc", "Method", None).await.unwrap();
        tx.send(Err(Error::ZeroLengthFrame)).await.unwrap();

        match stream.recv_raw().await {
            Err(Error::Remote(text)) => assert!(text.contains("zero length")),
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn eof_surfaces_as_stream_closed() {
        let (opener, tx) = StubOpener::new();
        let client = RpcClient::new(opener);

        let stream = client.new_stream("demo.Svc", "Method", None).await.unwrap();
        drop(tx);

        assert!(matches!(stream.recv_raw().await, Err(Error::StreamClosed)));
    }

    #[tokio::test]
    async fn raw_substream_bypasses_the_call_layer() {
        let (opener, tx) = StubOpener::new();
        let sink = opener.sink.clone();
        let client = RpcClient::new(opener);

        let (raw_sink, mut packets) = client.open_raw_substream().await.unwrap();
        raw_sink.send(crate::packet::call_cancel()).await.unwrap();
        assert_eq!(sink.sent().len(), 1);

        tx.send(Ok(crate::packet::call_complete())).await.unwrap();
        let got = packets.recv().await.unwrap().unwrap();
        assert!(got.is_terminal());
    }

    #[tokio::test]
    async fn single_stream_opener_consumes_its_transport() {
        let (left, _right) = tokio::io::duplex(256);
        let opener = SingleStreamOpener::new(left);

        assert!(opener.open_substream().await.is_ok());
        assert!(matches!(
            opener.open_substream().await,
            Err(Error::StreamClosed)
        ));
    }
}
