//! Client side of a call.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};

use super::CallCore;
use crate::error::{Error, Result};
use crate::packet::{call_start, Validate};
use crate::proto::{packet::Body, Packet};
use crate::stream::{Context, MsgStream};
use crate::transport::ArcPacketSink;

/// Initiating side of one call.
///
/// Sends the single CallStart, then behaves as a plain message stream over
/// the shared call machine. The server never initiates, so an inbound
/// CallStart here is a protocol error.
pub struct ClientCall {
    core: CallCore,
    service: String,
    method: String,
    started: AtomicBool,
}

impl ClientCall {
    pub fn new(
        ctx: Context,
        service: impl Into<String>,
        method: impl Into<String>,
        sink: ArcPacketSink,
    ) -> Self {
        Self {
            core: CallCore::new(ctx, sink),
            service: service.into(),
            method: method.into(),
            started: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Context {
        self.core.context()
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Opens the call, embedding `first_msg` in CallStart when present.
    ///
    /// At most one CallStart goes out; a second `start` fails with
    /// `Completed`.
    pub async fn start(&self, first_msg: Option<Bytes>) -> Result<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Completed);
        }

        if self.context().is_cancelled() {
            self.core.abort().await;
            return Err(Error::Cancelled);
        }

        let pkt = call_start(self.service.clone(), self.method.clone(), first_msg);
        if let Err(err) = self.core.sink().send(pkt).await {
            self.core.abort().await;
            return Err(err);
        }
        Ok(())
    }

    /// Routes one inbound packet into the call machine.
    pub async fn handle_packet(&self, pkt: Packet) -> Result<()> {
        pkt.validate()?;
        match pkt.body {
            Some(Body::CallData(frame)) => self.core.handle_call_data(frame).await,
            Some(Body::CallCancel(true)) => self.core.handle_call_cancel().await,
            Some(Body::CallCancel(false)) => Ok(()),
            Some(Body::CallStart(_)) => Err(Error::UnrecognizedPacket),
            None => Err(Error::EmptyPacket),
        }
    }

    /// Substream ended underneath the call.
    pub async fn handle_stream_close(&self, error: Option<String>) {
        self.core.handle_stream_close(error).await;
    }

    /// Suspends until the server terminates the call.
    pub async fn wait(&self) -> Result<()> {
        self.core.wait().await
    }

    /// Aborts the call: best-effort CallCancel, then local teardown.
    pub async fn close(&self) {
        if self.started.load(Ordering::SeqCst) {
            let _ = self.core.write_call_cancel().await;
        }
        self.core.abort().await;
    }
}

#[async_trait]
impl MsgStream for ClientCall {
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
        ClientCall::close(self).await;
        Ok(())
    }
}
