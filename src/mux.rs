//! Handler registry and call dispatch.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::handler::ArcHandler;
use crate::invoker::{ArcInvoker, Invoker};
use crate::stream::ArcMsgStream;

type MethodTable = HashMap<String, ArcHandler>;

/// Routes incoming calls to registered handlers.
///
/// Registration is additive: several handler objects may populate the same
/// service. Lookups take the registry read lock only; handler invocation
/// runs with no lock held. Calls nothing claims fall through an ordered list
/// of fallback invokers, which is how a front server chains to an upstream.
pub struct Mux {
    services: RwLock<HashMap<String, MethodTable>>,
    fallbacks: RwLock<Vec<ArcInvoker>>,
}

impl Default for Mux {
    fn default() -> Self {
        Self::new()
    }
}

impl Mux {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            fallbacks: RwLock::new(Vec::new()),
        }
    }

    /// Registers a handler under its advertised service and method ids.
    pub fn register(&self, handler: ArcHandler) -> Result<()> {
        let service_id = handler.service_id();
        if service_id.is_empty() {
            return Err(Error::EmptyServiceId);
        }

        let mut services = self.services.write().unwrap();
        let methods = services.entry(service_id.to_string()).or_default();
        for method_id in handler.method_ids() {
            if !method_id.is_empty() {
                methods.insert((*method_id).to_string(), handler.clone());
            }
        }
        Ok(())
    }

    /// Appends a fallback invoker, tried in registration order when no
    /// handler matches.
    pub fn add_fallback(&self, invoker: ArcInvoker) {
        self.fallbacks.write().unwrap().push(invoker);
    }

    pub fn has_service(&self, service_id: &str) -> bool {
        if service_id.is_empty() {
            return false;
        }
        self.services
            .read()
            .unwrap()
            .get(service_id)
            .is_some_and(|methods| !methods.is_empty())
    }

    pub fn has_method(&self, service_id: &str, method_id: &str) -> bool {
        if service_id.is_empty() || method_id.is_empty() {
            return false;
        }
        self.services
            .read()
            .unwrap()
            .get(service_id)
            .is_some_and(|methods| methods.contains_key(method_id))
    }

    fn lookup(&self, service_id: &str, method_id: &str) -> Option<ArcHandler> {
        let services = self.services.read().unwrap();
        if service_id.is_empty() {
            // Proxied calls may arrive without a service id; scan every
            // service for the method name.
            services
                .values()
                .find_map(|methods| methods.get(method_id))
                .cloned()
        } else {
            services
                .get(service_id)
                .and_then(|methods| methods.get(method_id))
                .cloned()
        }
    }
}

#[async_trait]
impl Invoker for Mux {
    async fn invoke(
        &self,
        service: &str,
        method: &str,
        stream: ArcMsgStream,
    ) -> (bool, Result<()>) {
        if let Some(handler) = self.lookup(service, method) {
            return handler.invoke(service, method, stream).await;
        }

        let fallbacks: Vec<ArcInvoker> = self.fallbacks.read().unwrap().clone();
        for fallback in fallbacks {
            let (handled, result) = fallback.invoke(service, method, stream.clone()).await;
            if handled || result.is_err() {
                return (handled, result);
            }
        }

        (false, Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::invoker::test_support::NullStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        service_id: &'static str,
        method_ids: &'static [&'static str],
        hits: AtomicUsize,
    }

    impl CountingHandler {
        fn new(service_id: &'static str, method_ids: &'static [&'static str]) -> Arc<Self> {
            Arc::new(Self {
                service_id,
                method_ids,
                hits: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Invoker for CountingHandler {
        async fn invoke(
            &self,
            _service: &str,
            _method: &str,
            _stream: ArcMsgStream,
        ) -> (bool, Result<()>) {
            self.hits.fetch_add(1, Ordering::SeqCst);
            (true, Ok(()))
        }
    }

    impl Handler for CountingHandler {
        fn service_id(&self) -> &'static str {
            self.service_id
        }

        fn method_ids(&self) -> &'static [&'static str] {
            self.method_ids
        }
    }

    struct CountingFallback {
        claims: bool,
        hits: AtomicUsize,
    }

    #[async_trait]
    impl Invoker for CountingFallback {
        async fn invoke(
            &self,
            _service: &str,
            _method: &str,
            _stream: ArcMsgStream,
        ) -> (bool, Result<()>) {
            self.hits.fetch_add(1, Ordering::SeqCst);
            if self.claims {
                (true, Ok(()))
            } else {
                (false, Ok(()))
            }
        }
    }

    #[test]
    fn register_and_query() {
        let mux = Mux::new();
        mux.register(CountingHandler::new("demo.Svc", &["A", "B"]))
            .unwrap();

        assert!(mux.has_service("demo.Svc"));
        assert!(mux.has_method("demo.Svc", "A"));
        assert!(mux.has_method("demo.Svc", "B"));
        assert!(!mux.has_method("demo.Svc", "C"));
        assert!(!mux.has_service("other.Svc"));
        assert!(!mux.has_service(""));
        assert!(!mux.has_method("", "A"));
        assert!(!mux.has_method("demo.Svc", ""));
    }

    #[test]
    fn registration_is_additive_per_service() {
        let mux = Mux::new();
        mux.register(CountingHandler::new("demo.Svc", &["A"])).unwrap();
        mux.register(CountingHandler::new("demo.Svc", &["B"])).unwrap();

        assert!(mux.has_method("demo.Svc", "A"));
        assert!(mux.has_method("demo.Svc", "B"));
    }

    #[test]
    fn empty_service_id_is_rejected() {
        let mux = Mux::new();
        let result = mux.register(CountingHandler::new("", &["A"]));
        assert!(matches!(result, Err(Error::EmptyServiceId)));
    }

    #[tokio::test]
    async fn exact_lookup_dispatches() {
        let mux = Mux::new();
        let handler = CountingHandler::new("demo.Svc", &["A"]);
        mux.register(handler.clone()).unwrap();

        let (handled, result) = mux.invoke("demo.Svc", "A", NullStream::shared()).await;
        assert!(handled);
        assert!(result.is_ok());
        assert_eq!(handler.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_service_scans_all_services() {
        let mux = Mux::new();
        let handler = CountingHandler::new("demo.Svc", &["OnlyHere"]);
        mux.register(handler.clone()).unwrap();

        let (handled, _) = mux.invoke("", "OnlyHere", NullStream::shared()).await;
        assert!(handled);
        assert_eq!(handler.hits.load(Ordering::SeqCst), 1);

        let (handled, result) = mux.invoke("", "Missing", NullStream::shared()).await;
        assert!(!handled);
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn registered_handler_beats_fallback() {
        let mux = Mux::new();
        let handler = CountingHandler::new("demo.Svc", &["A"]);
        mux.register(handler.clone()).unwrap();

        let fallback = Arc::new(CountingFallback {
            claims: true,
            hits: AtomicUsize::new(0),
        });
        mux.add_fallback(fallback.clone());

        let (handled, _) = mux.invoke("demo.Svc", "A", NullStream::shared()).await;
        assert!(handled);
        assert_eq!(handler.hits.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fallbacks_run_in_order_until_claimed() {
        let mux = Mux::new();
        let declines = Arc::new(CountingFallback {
            claims: false,
            hits: AtomicUsize::new(0),
        });
        let claims = Arc::new(CountingFallback {
            claims: true,
            hits: AtomicUsize::new(0),
        });
        mux.add_fallback(declines.clone());
        mux.add_fallback(claims.clone());

        let (handled, result) = mux.invoke("any.Svc", "Any", NullStream::shared()).await;
        assert!(handled);
        assert!(result.is_ok());
        assert_eq!(declines.hits.load(Ordering::SeqCst), 1);
        assert_eq!(claims.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unclaimed_call_is_not_handled() {
        let mux = Mux::new();
        let (handled, result) = mux.invoke("ghost.Svc", "Ghost", NullStream::shared()).await;
        assert!(!handled);
        assert!(result.is_ok());
    }
}
