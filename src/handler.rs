//! Service handler metadata.

use std::sync::Arc;

use crate::invoker::Invoker;

/// An [`Invoker`] that advertises which service and methods it implements,
/// so a registry can route to it. Generated service glue and hand-rolled
/// implementations both end up here.
pub trait Handler: Invoker {
    /// Fully qualified service id, e.g. `"echo.Echoer"`.
    fn service_id(&self) -> &'static str;

    /// Method names this handler claims within its service.
    fn method_ids(&self) -> &'static [&'static str];
}

/// Shared handler handle.
pub type ArcHandler = Arc<dyn Handler>;
