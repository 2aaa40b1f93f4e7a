//! Registry of handlers supplied by the embedding process.
//!
//! Configuration refers to transforms, predicates, routers, and services by
//! name; the graph builder resolves every reference against this registry
//! once, at build time. An unknown name is a build failure, never a runtime
//! lookup.

use std::collections::HashMap;
use std::sync::Arc;

use fluxline_types::{Headers, Message, Payload};

/// Custom message transform: produces a derived message or fails.
pub type TransformFn = dyn Fn(&Message) -> anyhow::Result<Message> + Send + Sync;

/// Custom filter predicate.
pub type PredicateFn = dyn Fn(&Message) -> bool + Send + Sync;

/// Custom router: returns the output channel name, or `None` to fall back to
/// the configured default.
pub type RouterFn = dyn Fn(&Message) -> Option<String> + Send + Sync;

/// External collaborator invoked by a service activator.
///
/// Calls run on a blocking thread with a caller-supplied timeout, so
/// implementations may block.
pub trait ServiceHandler: Send + Sync {
    /// Process the payload, returning the reply payload.
    ///
    /// # Errors
    ///
    /// Any error fails the activation and enters the endpoint's retry/error
    /// path.
    fn call(&self, payload: &Payload, headers: &Headers) -> anyhow::Result<Payload>;
}

impl<F> ServiceHandler for F
where
    F: Fn(&Payload, &Headers) -> anyhow::Result<Payload> + Send + Sync,
{
    fn call(&self, payload: &Payload, headers: &Headers) -> anyhow::Result<Payload> {
        self(payload, headers)
    }
}

/// Named handlers available to the graph builder.
#[derive(Default)]
pub struct HandlerRegistry {
    transforms: HashMap<String, Arc<TransformFn>>,
    predicates: HashMap<String, Arc<PredicateFn>>,
    routers: HashMap<String, Arc<RouterFn>>,
    services: HashMap<String, Arc<dyn ServiceHandler>>,
}

impl HandlerRegistry {
    /// Empty registry; sufficient for pipelines that only use builtin specs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named transform.
    pub fn register_transform<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Message) -> anyhow::Result<Message> + Send + Sync + 'static,
    {
        self.transforms.insert(name.into(), Arc::new(f));
    }

    /// Register a named predicate.
    pub fn register_predicate<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.predicates.insert(name.into(), Arc::new(f));
    }

    /// Register a named router.
    pub fn register_router<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Message) -> Option<String> + Send + Sync + 'static,
    {
        self.routers.insert(name.into(), Arc::new(f));
    }

    /// Register a named service-activator collaborator.
    pub fn register_service(
        &mut self,
        name: impl Into<String>,
        handler: impl ServiceHandler + 'static,
    ) {
        self.services.insert(name.into(), Arc::new(handler));
    }

    pub(crate) fn transform(&self, name: &str) -> Option<Arc<TransformFn>> {
        self.transforms.get(name).map(Arc::clone)
    }

    pub(crate) fn predicate(&self, name: &str) -> Option<Arc<PredicateFn>> {
        self.predicates.get(name).map(Arc::clone)
    }

    pub(crate) fn router(&self, name: &str) -> Option<Arc<RouterFn>> {
        self.routers.get(name).map(Arc::clone)
    }

    pub(crate) fn service(&self, name: &str) -> Option<Arc<dyn ServiceHandler>> {
        self.services.get(name).map(Arc::clone)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("transforms", &self.transforms.keys().collect::<Vec<_>>())
            .field("predicates", &self.predicates.keys().collect::<Vec<_>>())
            .field("routers", &self.routers.keys().collect::<Vec<_>>())
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_handlers_resolve_by_name() {
        let mut registry = HandlerRegistry::new();
        registry.register_predicate("always", |_msg: &Message| true);
        registry.register_router("to_orders", |_msg: &Message| Some("orders".to_string()));

        assert!(registry.predicate("always").is_some());
        assert!(registry.predicate("never").is_none());
        assert!(registry.router("to_orders").is_some());
    }

    #[test]
    fn closure_service_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register_service("echo", |payload: &Payload, _headers: &Headers| {
            Ok(payload.clone())
        });

        let handler = registry.service("echo").unwrap();
        let reply = handler
            .call(&Payload::from("ping"), &Headers::new())
            .unwrap();
        assert_eq!(reply, Payload::from("ping"));
    }
}
