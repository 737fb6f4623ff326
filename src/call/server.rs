//! Server side of a call.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinError;

use super::CallCore;
use crate::error::{Error, Result};
use crate::invoker::ArcInvoker;
use crate::packet::Validate;
use crate::proto::{packet::Body, unpack_payload, CallStart, Packet};
use crate::stream::{ArcMsgStream, Context, MsgStream};
use crate::transport::ArcPacketSink;

/// Accepting side of one call.
///
/// Starts unbound; the first CallStart binds the service and method and
/// spawns the handler worker. The worker owns the terminal frame: when the
/// handler returns (or panics, or was never found) it writes one completing
/// CallData, shuts the sink and cancels the call context.
pub struct ServerCall {
    core: CallCore,
    invoker: ArcInvoker,
    identity: Mutex<Option<(String, String)>>,
    started: AtomicBool,
}

impl ServerCall {
    pub fn new(ctx: Context, invoker: ArcInvoker, sink: ArcPacketSink) -> Arc<Self> {
        Arc::new(Self {
            core: CallCore::new(ctx, sink),
            invoker,
            identity: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    pub fn context(&self) -> &Context {
        self.core.context()
    }

    /// (service, method) once CallStart has been accepted.
    pub fn identity(&self) -> Option<(String, String)> {
        self.identity.lock().unwrap().clone()
    }

    /// Routes one inbound packet into the call machine.
    ///
    /// Takes the shared handle because an accepted CallStart hands a clone
    /// of it to the spawned handler worker.
    pub async fn handle_packet(self: Arc<Self>, pkt: Packet) -> Result<()> {
        pkt.validate()?;
        match pkt.body {
            Some(Body::CallStart(start)) => self.accept_call_start(start).await,
            Some(Body::CallData(frame)) => {
                if !self.started.load(Ordering::SeqCst) {
                    return Err(Error::CallStartMissing);
                }
                self.core.handle_call_data(frame).await
            }
            Some(Body::CallCancel(true)) => self.core.handle_call_cancel().await,
            Some(Body::CallCancel(false)) => Ok(()),
            None => Err(Error::EmptyPacket),
        }
    }

    /// Substream ended underneath the call.
    pub async fn handle_stream_close(&self, error: Option<String>) {
        self.core.handle_stream_close(error).await;
    }

    async fn accept_call_start(self: Arc<Self>, start: CallStart) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::CallStartAlreadyReceived);
        }

        *self.identity.lock().unwrap() = Some((start.rpc_service, start.rpc_method));
        if let Some(first) = unpack_payload(start.data, start.data_is_zero) {
            self.core.push_inbound(first);
        }

        let call = self.clone();
        tokio::spawn(async move { call.run_handler().await });
        Ok(())
    }

    /// Handler worker: dispatch, then terminate the stream.
    async fn run_handler(self: Arc<Self>) {
        let (service, method) = self
            .identity()
            .unwrap_or_else(|| (String::new(), String::new()));
        tracing::debug!(service = %service, method = %method, "dispatching call");

        // The invoker runs on its own task so that a panicking handler
        // surfaces as a JoinError instead of taking the call down with it.
        let invoker = self.invoker.clone();
        let stream: ArcMsgStream = self.clone();
        let outcome = tokio::spawn(async move {
            invoker.invoke(&service, &method, stream).await
        })
        .await;

        let error = match outcome {
            Ok((true, Ok(()))) => None,
            Ok((true, Err(err))) => Some(err.to_string()),
            Ok((false, _)) => Some(Error::Unimplemented.to_string()),
            Err(join_err) => Some(worker_failure_text(join_err)),
        };

        if let Some(text) = &error {
            tracing::debug!(error = %text, "call finished with error");
        }

        let _ = self.core.write_call_data(None, true, error).await;
        let _ = self.core.sink().shutdown().await;
        self.core.context().cancel();
    }
}

fn worker_failure_text(err: JoinError) -> String {
    if err.is_panic() {
        let payload = err.into_panic();
        let text = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        if text.is_empty() {
            "handler panicked".to_string()
        } else {
            format!("handler panicked: {text}")
        }
    } else {
        Error::Cancelled.to_string()
    }
}

#[async_trait]
impl MsgStream for ServerCall {
    fn context(&self) -> &Context {
        self.core.context()
    }

    async fn send_raw(&self, data: Bytes) -> Result<()> {
        self.core.write_call_data(Some(data), false, None).await
    }

    async fn recv_raw(&self) -> Result<Bytes> {
        self.core.read_one().await
    }

    async fn close_send(&self) -> Result<()> {
        self.core.write_call_data(None, true, None).await
    }

    async fn close(&self) -> Result<()> {
        self.core.abort().await;
        Ok(())
    }
}
