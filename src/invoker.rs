//! Dispatch seam between the runtime and service implementations.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::stream::ArcMsgStream;

/// Dispatches one call to an implementation.
///
/// Returns `(handled, result)`:
/// - `(true, Ok(()))`: matched and ran to completion;
/// - `(true, Err(_))`: matched and failed;
/// - `(false, _)`: not claimed; the caller may try another invoker.
///
/// The stream is shared so a dispatcher can offer the call to a fallback
/// chain; an invoker that declines must not have touched it.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, service: &str, method: &str, stream: ArcMsgStream)
        -> (bool, Result<()>);
}

/// Shared invoker handle.
pub type ArcInvoker = Arc<dyn Invoker>;

#[async_trait]
impl<T: Invoker + ?Sized> Invoker for Arc<T> {
    async fn invoke(
        &self,
        service: &str,
        method: &str,
        stream: ArcMsgStream,
    ) -> (bool, Result<()>) {
        (**self).invoke(service, method, stream).await
    }
}

#[async_trait]
impl<T: Invoker + ?Sized> Invoker for Box<T> {
    async fn invoke(
        &self,
        service: &str,
        method: &str,
        stream: ArcMsgStream,
    ) -> (bool, Result<()>) {
        (**self).invoke(service, method, stream).await
    }
}
