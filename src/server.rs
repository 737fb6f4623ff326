//! Server façade: drives one call per incoming substream.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::call::ServerCall;
use crate::error::{Error, Result};
use crate::invoker::Invoker;
use crate::stream::Context;
use crate::transport::open_packet_pipe;

/// How long to keep draining a substream after the call finished, so the
/// peer's trailing frames don't race the teardown.
const DEFAULT_LINGER: Duration = Duration::from_millis(100);

/// Tunables for [`Server`].
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Grace period between handler completion and substream teardown.
    pub linger: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            linger: DEFAULT_LINGER,
        }
    }
}

/// Accepts substreams and routes each one's call through an [`Invoker`],
/// typically a [`crate::mux::Mux`].
pub struct Server<I> {
    invoker: Arc<I>,
    config: ServerConfig,
    on_error: Option<Arc<dyn Fn(Error) + Send + Sync>>,
}

impl<I: Invoker + 'static> Server<I> {
    pub fn new(invoker: I) -> Self {
        Self::with_arc(Arc::new(invoker))
    }

    pub fn with_arc(invoker: Arc<I>) -> Self {
        Self {
            invoker,
            config: ServerConfig::default(),
            on_error: None,
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Observes per-connection failures from the accept loop.
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    pub fn invoker(&self) -> &Arc<I> {
        &self.invoker
    }

    fn report(&self, err: Error) {
        tracing::warn!(error = %err, "connection failed");
        if let Some(handler) = &self.on_error {
            handler(err);
        }
    }

    /// Runs one call over one substream; returns when the call ends.
    ///
    /// The first packet must be a CallStart; the handler worker spawned by
    /// the call writes the terminal frame and trips the call context, after
    /// which the substream is drained briefly and dropped. Protocol
    /// violations end the substream with an error.
    pub async fn handle_stream<T>(&self, transport: T) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(transport);
        let (sink, mut packets) = open_packet_pipe(reader, writer);

        let ctx = Context::new();
        let call = ServerCall::new(ctx.clone(), self.invoker.clone(), sink);

        loop {
            tokio::select! {
                inbound = packets.recv() => match inbound {
                    Some(Ok(pkt)) => {
                        let variant = pkt.variant();
                        if let Err(err) = call.clone().handle_packet(pkt).await {
                            tracing::warn!(packet = variant, error = %err, "protocol violation");
                            call.handle_stream_close(Some(err.to_string())).await;
                            return Err(err);
                        }
                    }
                    Some(Err(err)) => {
                        call.handle_stream_close(Some(err.to_string())).await;
                        return Err(err);
                    }
                    None => {
                        call.handle_stream_close(None).await;
                        // A substream that ends before CallStart never was
                        // a call.
                        return if call.identity().is_none() {
                            Err(Error::StreamClosed)
                        } else {
                            Ok(())
                        };
                    }
                },
                _ = ctx.cancelled() => {
                    // Call finished; give the peer a moment to stop talking.
                    let _ = tokio::time::timeout(self.config.linger, async {
                        while packets.recv().await.is_some() {}
                    })
                    .await;
                    return Ok(());
                }
            }
        }
    }

    /// Accept loop: one task per incoming substream.
    ///
    /// Per-connection failures are reported and swallowed; the loop only
    /// ends when the listener does.
    pub async fn serve<L, T>(&self, mut listener: L) -> Result<()>
    where
        L: futures::Stream<Item = std::io::Result<T>> + Unpin,
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        while let Some(accepted) = listener.next().await {
            match accepted {
                Ok(substream) => {
                    let server = self.task_clone();
                    tokio::spawn(async move {
                        if let Err(err) = server.handle_stream(substream).await {
                            server.report(err);
                        }
                    });
                }
                Err(err) => self.report(Error::Io(err)),
            }
        }
        Ok(())
    }

    fn task_clone(&self) -> Server<I> {
        Server {
            invoker: self.invoker.clone(),
            config: self.config.clone(),
            on_error: self.on_error.clone(),
        }
    }
}
