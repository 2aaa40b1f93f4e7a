//! Processing endpoints: one module per kind, a tagged variant overall.
//!
//! Every kind implements the same capability, `process(Message) ->
//! EndpointResult`. Kinds are enum cases rather than trait objects, so the
//! dispatcher can match on structure (filters route discards, aggregators
//! get swept) without downcasting.

pub mod activator;
pub mod aggregator;
pub mod filter;
pub mod router;
pub mod splitter;
pub mod transformer;

use std::sync::atomic::{AtomicBool, Ordering};

pub use activator::ServiceActivator;
pub use aggregator::Aggregator;
pub use filter::Filter;
pub use router::Router;
pub use splitter::Splitter;
pub use transformer::Transformer;

use fluxline_types::{Message, RuntimeError};

use crate::errors::RetryPolicy;

/// Outcome of processing one message at one endpoint.
#[derive(Debug)]
pub enum EndpointResult {
    /// Forward the message to the output channel at the given index.
    Forward(Message, usize),
    /// Forward every message to the first output channel (splitters).
    ForwardAll(Vec<Message>),
    /// Consume the message without forwarding (filter rejection, or an
    /// aggregator holding a partial group).
    Drop,
    /// Processing failed; enters the retry/error path.
    Fail(RuntimeError),
}

/// Kind-specific behavior of an endpoint.
pub enum EndpointKind {
    Transformer(Transformer),
    Filter(Filter),
    Router(Router),
    Splitter(Splitter),
    Aggregator(Aggregator),
    ServiceActivator(ServiceActivator),
    /// Pass-through; the first output channel is used.
    Bridge,
}

/// A processing node bound to one input channel and zero or more outputs.
pub struct Endpoint {
    id: String,
    input: String,
    outputs: Vec<String>,
    kind: EndpointKind,
    retry: RetryPolicy,
    running: AtomicBool,
}

impl Endpoint {
    pub(crate) fn new(
        id: String,
        input: String,
        outputs: Vec<String>,
        kind: EndpointKind,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            id,
            input,
            outputs,
            kind,
            retry,
            running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the channel this endpoint subscribes to.
    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Ordered output channel names. Empty for terminal endpoints.
    #[must_use]
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    #[must_use]
    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            EndpointKind::Transformer(_) => "transformer",
            EndpointKind::Filter(_) => "filter",
            EndpointKind::Router(_) => "router",
            EndpointKind::Splitter(_) => "splitter",
            EndpointKind::Aggregator(_) => "aggregator",
            EndpointKind::ServiceActivator(_) => "service_activator",
            EndpointKind::Bridge => "bridge",
        }
    }

    /// Where this filter routes rejected messages, if configured.
    #[must_use]
    pub fn discard_channel(&self) -> Option<&str> {
        match &self.kind {
            EndpointKind::Filter(f) => f.discard_channel(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_filter(&self) -> bool {
        matches!(self.kind, EndpointKind::Filter(_))
    }

    /// Aggregator view, for the dispatcher's expiry sweep.
    #[must_use]
    pub(crate) fn as_aggregator(&self) -> Option<&Aggregator> {
        match &self.kind {
            EndpointKind::Aggregator(a) => Some(a),
            _ => None,
        }
    }

    /// Process one message. Only meaningful in the RUNNING state; a stopped
    /// endpoint fails the message rather than silently eating it.
    pub async fn process(&self, msg: Message) -> EndpointResult {
        if !self.is_running() {
            return EndpointResult::Fail(RuntimeError::EndpointProcessing {
                endpoint: self.id.clone(),
                message: "endpoint is not running".to_string(),
            });
        }

        match &self.kind {
            EndpointKind::Transformer(t) => t.apply(&self.id, msg),
            EndpointKind::Filter(f) => f.apply(msg),
            EndpointKind::Router(r) => r.route(&self.id, msg),
            EndpointKind::Splitter(s) => s.split(&self.id, msg),
            EndpointKind::Aggregator(a) => a.offer(&self.id, msg),
            EndpointKind::ServiceActivator(s) => s.invoke(&self.id, &msg).await,
            EndpointKind::Bridge => EndpointResult::Forward(msg, 0),
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("kind", &self.kind_name())
            .field("input", &self.input)
            .field("outputs", &self.outputs)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Render a header value as a routing/correlation key. Strings are used
/// verbatim; other scalars use their JSON rendering.
pub(crate) fn header_key(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stopped_endpoint_fails_processing() {
        let ep = Endpoint::new(
            "forward".to_string(),
            "in".to_string(),
            vec!["out".to_string()],
            EndpointKind::Bridge,
            RetryPolicy::default(),
        );
        let result = ep.process(Message::new("x")).await;
        assert!(matches!(result, EndpointResult::Fail(_)));
    }

    #[tokio::test]
    async fn bridge_forwards_to_first_output() {
        let ep = Endpoint::new(
            "forward".to_string(),
            "in".to_string(),
            vec!["out".to_string()],
            EndpointKind::Bridge,
            RetryPolicy::default(),
        );
        ep.set_running(true);
        let msg = Message::new("x");
        let id = msg.id();
        match ep.process(msg).await {
            EndpointResult::Forward(out, 0) => assert_eq!(out.id(), id),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn header_key_rendering() {
        assert_eq!(header_key(&serde_json::json!("order")), "order");
        assert_eq!(header_key(&serde_json::json!(7)), "7");
        assert_eq!(header_key(&serde_json::json!(true)), "true");
    }
}
