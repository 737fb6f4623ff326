//! Call context and the message stream surface handed to user code.

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Cancellation scope of one call.
///
/// Wraps a [`CancellationToken`]; cloning shares the same token, `child`
/// derives a scope that trips with its parent.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context over an existing token, e.g. one owned by a
    /// surrounding connection.
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Derives a context cancelled together with this one.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the context is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Bidirectional message stream bound to one call.
///
/// This is the handle passed to handler implementations and returned to call
/// initiators. It is object safe; the typed helpers live on
/// [`MsgStreamExt`].
#[async_trait]
pub trait MsgStream: Send + Sync {
    /// Cancellation scope of the call.
    fn context(&self) -> &Context;

    /// Sends one already-encoded message. A zero-length payload is delivered
    /// to the peer as an empty-but-present message.
    ///
    /// Fails with [`Error::Completed`] after `close_send`.
    async fn send_raw(&self, data: Bytes) -> Result<()>;

    /// Receives one message payload.
    ///
    /// Returns [`Error::StreamClosed`] once the peer completed and the queue
    /// is drained, [`Error::Remote`] if the peer failed, and
    /// [`Error::Cancelled`] when the call context trips first.
    async fn recv_raw(&self) -> Result<Bytes>;

    /// Signals that this side will send no further messages. Duplicate calls
    /// are a no-op.
    async fn close_send(&self) -> Result<()>;

    /// Aborts the call: best-effort cancel to the peer, then releases local
    /// resources and cancels the context.
    async fn close(&self) -> Result<()>;
}

/// Typed send/receive over any [`MsgStream`].
#[async_trait]
pub trait MsgStreamExt: MsgStream {
    /// Encodes `msg` and sends it as one frame.
    async fn msg_send<M: Message + Send + Sync>(&self, msg: &M) -> Result<()> {
        if self.context().is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.send_raw(Bytes::from(msg.encode_to_vec())).await
    }

    /// Receives one frame and decodes it as `M`.
    async fn msg_recv<M: Message + Default>(&self) -> Result<M> {
        let data = self.recv_raw().await?;
        M::decode(data).map_err(Error::InvalidMessage)
    }
}

impl<T: MsgStream + ?Sized> MsgStreamExt for T {}

#[async_trait]
impl<T: MsgStream + ?Sized> MsgStream for Arc<T> {
    fn context(&self) -> &Context {
        (**self).context()
    }

    async fn send_raw(&self, data: Bytes) -> Result<()> {
        (**self).send_raw(data).await
    }

    async fn recv_raw(&self) -> Result<Bytes> {
        (**self).recv_raw().await
    }

    async fn close_send(&self) -> Result<()> {
        (**self).close_send().await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

#[async_trait]
impl<T: MsgStream + ?Sized> MsgStream for Box<T> {
    fn context(&self) -> &Context {
        (**self).context()
    }

    async fn send_raw(&self, data: Bytes) -> Result<()> {
        (**self).send_raw(data).await
    }

    async fn recv_raw(&self) -> Result<Bytes> {
        (**self).recv_raw().await
    }

    async fn close_send(&self) -> Result<()> {
        (**self).close_send().await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

/// Shared stream handle.
pub type ArcMsgStream = Arc<dyn MsgStream>;

/// Owned stream handle.
pub type BoxMsgStream = Box<dyn MsgStream>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_live() {
        let ctx = Context::new();
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn context_over_an_external_token() {
        let token = CancellationToken::new();
        let ctx = Context::from_token(token.clone());
        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(ctx.token().is_cancelled());
    }

    #[test]
    fn child_trips_with_parent() {
        let parent = Context::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_does_not_trip_parent() {
        let parent = Context::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves() {
        let ctx = Context::new();
        let waiter = ctx.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        ctx.cancel();
        task.await.unwrap();
    }
}
