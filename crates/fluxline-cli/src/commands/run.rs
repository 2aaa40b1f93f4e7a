//! `fluxline run`: build, start, inject, drain, stop, summarize.

use std::path::Path;

use anyhow::Context;
use fluxline_engine::config::parser;
use fluxline_engine::{Dispatcher, Graph, HandlerRegistry};
use fluxline_types::{Headers, Message};

pub async fn execute(
    pipeline: &Path,
    entry: Option<&str>,
    input: Option<&Path>,
) -> anyhow::Result<()> {
    let config = parser::parse_pipeline(pipeline)?;
    let graph = Graph::build(&config, &HandlerRegistry::new())?;
    let grace = graph.shutdown_grace();

    let mut dispatcher = Dispatcher::new(graph);
    dispatcher.start();

    if let (Some(entry), Some(input)) = (entry, input) {
        inject_messages(&dispatcher, entry, input).await?;
    }

    dispatcher.quiesce(grace).await;
    if let Err(e) = dispatcher.stop(grace).await {
        tracing::warn!("{e}");
    }

    let stats = dispatcher.stats();
    println!("Pipeline '{}' finished", config.pipeline);
    println!(
        "  sent: {}  delivered: {}  filtered: {}  failed: {}  retried: {}",
        stats.sent, stats.delivered, stats.filtered, stats.failed, stats.retried
    );
    println!(
        "  dropped at capacity: {}  dead-lettered: {}",
        stats.dropped_capacity, stats.dead_lettered
    );

    let dead = dispatcher.dead_letters();
    if !dead.is_empty() {
        println!("Dead letters:");
        for record in &dead {
            println!(
                "  {:?} message {} after {} attempt(s): {}",
                record.origin, record.message_id, record.attempts, record.cause
            );
        }
    }
    Ok(())
}

/// Read newline-delimited JSON messages and inject them into the entry
/// channel. Each line is either a bare payload value or an envelope object
/// `{"payload": ..., "headers": {...}}`.
async fn inject_messages(
    dispatcher: &Dispatcher,
    entry: &str,
    input: &Path,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read input file: {}", input.display()))?;

    let mut injected = 0usize;
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(line)
            .with_context(|| format!("Invalid JSON on input line {}", line_no + 1))?;
        let msg = to_message(value);
        match dispatcher.send(entry, msg).await {
            Ok(accepted) => {
                injected += 1;
                if !accepted {
                    tracing::debug!(line = line_no + 1, "Message rejected by a filter");
                }
            }
            Err(e) => tracing::error!(line = line_no + 1, error = %e, "Send failed"),
        }
    }
    tracing::info!(injected, channel = entry, "Injected input messages");
    Ok(())
}

fn to_message(value: serde_json::Value) -> Message {
    if let serde_json::Value::Object(map) = &value {
        if let Some(payload) = map.get("payload") {
            let headers: Headers = map
                .get("headers")
                .and_then(serde_json::Value::as_object)
                .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            return Message::with_initial_headers(payload.clone(), headers);
        }
    }
    Message::new(value)
}
