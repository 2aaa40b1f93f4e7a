//! Integration tests for pipeline parsing, validation, build, and dispatch.
//!
//! These tests verify the full processing path from YAML parsing through
//! graph build and message delivery, using real fixture files.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fluxline_engine::config::parser;
use fluxline_engine::config::types::ChannelKindConfig;
use fluxline_engine::config::validator;
use fluxline_engine::{Dispatcher, Graph, HandlerRegistry};
use fluxline_types::{BuildError, Headers, Message, Payload, RuntimeError};

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(std::path::Path::parent)
        .map(|root| root.join("tests/fixtures/pipelines").join(name))
        .unwrap_or_default()
}

fn capture_service(
    registry: &mut HandlerRegistry,
    name: &str,
) -> Arc<Mutex<Vec<serde_json::Value>>> {
    let seen: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
    let capture = Arc::clone(&seen);
    registry.register_service(name, move |payload: &Payload, _headers: &Headers| {
        if let Ok(mut store) = capture.lock() {
            store.push(payload.render_json());
        }
        Ok(payload.clone())
    });
    seen
}

/// Parse and validate the well-formed fixture.
#[test]
fn test_parse_and_validate_fixture_pipeline() {
    let config = parser::parse_pipeline(&fixture_path("order_routing.yaml"))
        .expect("Failed to parse fixture pipeline");

    assert_eq!(config.pipeline, "order_routing");
    assert_eq!(config.channels.len(), 9);
    assert_eq!(config.channels[0].name, "inbound");
    assert_eq!(config.channels[0].kind, ChannelKindConfig::Queued);
    assert_eq!(config.channels[0].capacity, Some(32));
    assert_eq!(config.endpoints.len(), 6);
    assert_eq!(config.errors.channel.as_deref(), Some("errors"));
    assert_eq!(config.errors.dead_letter.as_deref(), Some("dead_letters"));
    assert_eq!(config.resources.shutdown_grace, "2s");

    validator::validate_pipeline(&config).expect("Validation should pass");
}

/// The invalid fixture fails validation with a `MissingParameter` naming the
/// router, and the graph never builds.
#[test]
fn test_invalid_fixture_does_not_build() {
    let config = parser::parse_pipeline(&fixture_path("invalid_pipeline.yaml"))
        .expect("Fixture should still parse as YAML");

    let err = Graph::build(&config, &HandlerRegistry::new()).unwrap_err();
    assert!(err.each().any(|e| matches!(
        e,
        BuildError::MissingParameter { endpoint, parameter }
            if endpoint == "route_by_type" && parameter == "route"
    )));
}

/// Build followed by start leaves every declared channel and endpoint
/// RUNNING, with no unresolved references.
#[tokio::test]
async fn test_build_and_start_reaches_running_state() {
    let config = parser::parse_pipeline(&fixture_path("order_routing.yaml")).unwrap();
    let mut registry = HandlerRegistry::new();
    capture_service(&mut registry, "archive");
    capture_service(&mut registry, "refund_service");

    let graph = Graph::build(&config, &registry).expect("fixture should build");
    for endpoint in graph.endpoints() {
        for output in endpoint.outputs() {
            assert!(graph.channel(output).is_some(), "unresolved {output}");
        }
        assert!(graph.channel(endpoint.input()).is_some());
    }

    let mut dispatcher = Dispatcher::new(graph);
    dispatcher.start();
    assert!(dispatcher.graph().channels().all(|c| c.is_running()));
    assert!(dispatcher.graph().endpoints().all(|e| e.is_running()));

    dispatcher.stop(Duration::from_millis(200)).await.unwrap();
    assert!(dispatcher.graph().channels().all(|c| !c.is_running()));
    assert!(dispatcher.graph().endpoints().all(|e| !e.is_running()));
}

/// End-to-end run over the fixture: typed messages are routed, untyped
/// messages are filtered out, refunds take their own branch.
#[tokio::test]
async fn test_fixture_routes_orders_and_refunds() {
    let config = parser::parse_pipeline(&fixture_path("order_routing.yaml")).unwrap();
    let mut registry = HandlerRegistry::new();
    let archived = capture_service(&mut registry, "archive");
    let refunded = capture_service(&mut registry, "refund_service");

    let mut dispatcher = Dispatcher::new(Graph::build(&config, &registry).unwrap());
    dispatcher.start();

    let order = Message::new(serde_json::json!({"order": 1}))
        .with_header("type", serde_json::json!("order"));
    let refund = Message::new(serde_json::json!({"refund": 2}))
        .with_header("type", serde_json::json!("refund"));
    let untyped = Message::new(serde_json::json!({"junk": true}));

    dispatcher.send("inbound", order).await.unwrap();
    dispatcher.send("inbound", refund).await.unwrap();
    dispatcher.send("inbound", untyped).await.unwrap();

    assert!(dispatcher.quiesce(Duration::from_secs(2)).await);

    assert_eq!(
        archived.lock().unwrap().clone(),
        vec![serde_json::json!({"order": 1})]
    );
    assert_eq!(
        refunded.lock().unwrap().clone(),
        vec![serde_json::json!({"refund": 2})]
    );

    let stats = dispatcher.stats();
    assert_eq!(stats.sent, 3);
    assert_eq!(stats.filtered, 1);
    assert_eq!(stats.failed, 0);

    dispatcher.stop(Duration::from_millis(500)).await.unwrap();
}

/// A filter forwards exactly the stable sub-sequence satisfying its
/// predicate.
#[tokio::test]
async fn test_filter_emits_stable_subsequence() {
    let yaml = r#"
version: "1.0"
pipeline: subsequence
channels:
  - name: ingress
  - name: kept
endpoints:
  - id: evens_only
    kind: filter
    input: ingress
    predicate:
      type: header_equals
      header: parity
      value: even
    output: kept
  - id: collect
    kind: service_activator
    input: kept
    service: sink
"#;
    let mut registry = HandlerRegistry::new();
    let seen = capture_service(&mut registry, "sink");
    let config = parser::parse_pipeline_str(yaml).unwrap();
    let mut dispatcher = Dispatcher::new(Graph::build(&config, &registry).unwrap());
    dispatcher.start();

    for i in 0..10 {
        let parity = if i % 2 == 0 { "even" } else { "odd" };
        dispatcher
            .send(
                "ingress",
                Message::new(serde_json::json!(i)).with_header("parity", serde_json::json!(parity)),
            )
            .await
            .unwrap();
    }

    let collected = seen.lock().unwrap().clone();
    let expected: Vec<serde_json::Value> =
        (0..10).step_by(2).map(|i| serde_json::json!(i)).collect();
    assert_eq!(collected, expected);
    dispatcher.stop(Duration::from_millis(100)).await.unwrap();
}

/// A blocked bounded channel fails the send within the configured timeout
/// instead of hanging.
#[tokio::test]
async fn test_backpressure_block_times_out() {
    let yaml = r#"
version: "1.0"
pipeline: backpressure
channels:
  - name: ingress
    kind: queued
    capacity: 1
    backpressure:
      policy: block
      timeout: 100ms
endpoints:
  - id: slow
    kind: service_activator
    input: ingress
    service: slow
"#;
    let mut registry = HandlerRegistry::new();
    registry.register_service("slow", |payload: &Payload, _headers: &Headers| {
        std::thread::sleep(Duration::from_millis(400));
        Ok(payload.clone())
    });
    let config = parser::parse_pipeline_str(yaml).unwrap();
    let mut dispatcher = Dispatcher::new(Graph::build(&config, &registry).unwrap());
    dispatcher.start();

    // First message occupies the worker, second fills the buffer.
    dispatcher.send("ingress", Message::new("busy")).await.unwrap();
    dispatcher.send("ingress", Message::new("buffered")).await.unwrap();

    let started = Instant::now();
    let err = dispatcher
        .send("ingress", Message::new("overflow"))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(
        err,
        RuntimeError::ChannelCapacityExceeded { ref channel } if channel == "ingress"
    ));
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2), "send must not hang");

    let _ = dispatcher.stop(Duration::from_secs(1)).await;
}

/// Splitter children reassemble through an aggregator keyed on the
/// correlation id stamped at split time.
#[tokio::test]
async fn test_split_transform_aggregate_chain() {
    let yaml = r#"
version: "1.0"
pipeline: scatter_gather
channels:
  - name: ingress
  - name: parts
  - name: shouted
  - name: whole
endpoints:
  - id: explode
    kind: splitter
    input: ingress
    output: parts
  - id: shout
    kind: transformer
    input: parts
    transform:
      type: uppercase
    output: shouted
  - id: assemble
    kind: aggregator
    input: shouted
    correlation_header: correlation_id
    release_count: 3
    output: whole
  - id: collect
    kind: service_activator
    input: whole
    service: sink
"#;
    let mut registry = HandlerRegistry::new();
    let seen = capture_service(&mut registry, "sink");
    let config = parser::parse_pipeline_str(yaml).unwrap();
    let mut dispatcher = Dispatcher::new(Graph::build(&config, &registry).unwrap());
    dispatcher.start();

    dispatcher
        .send("ingress", Message::new(serde_json::json!(["a", "b", "c"])))
        .await
        .unwrap();

    let collected = seen.lock().unwrap().clone();
    assert_eq!(collected, vec![serde_json::json!(["A", "B", "C"])]);
    dispatcher.stop(Duration::from_millis(100)).await.unwrap();
}
