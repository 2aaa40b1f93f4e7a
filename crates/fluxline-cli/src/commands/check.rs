//! `fluxline check`: parse, validate, and resolve a pipeline without
//! starting it.
//!
//! Builds against an empty handler registry, so configs referencing
//! in-process handlers fail here; CLI-run pipelines can only use builtins.

use std::path::Path;

use fluxline_engine::config::parser;
use fluxline_engine::{Graph, HandlerRegistry};

pub fn execute(pipeline: &Path) -> anyhow::Result<()> {
    let config = parser::parse_pipeline(pipeline)?;
    let graph = Graph::build(&config, &HandlerRegistry::new())?;

    println!(
        "Pipeline '{}' is valid: {} channel(s), {} endpoint(s)",
        graph.pipeline(),
        graph.channels().count(),
        graph.endpoints().count()
    );
    if let Some(error_channel) = graph.error_channel() {
        println!("  error channel: {error_channel}");
    }
    if let Some(dead_letter) = graph.dead_letter_channel() {
        println!("  dead-letter channel: {dead_letter}");
    }
    Ok(())
}
