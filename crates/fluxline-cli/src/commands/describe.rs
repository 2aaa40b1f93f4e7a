//! `fluxline describe`: print the declared topology of a pipeline.

use std::path::Path;

use fluxline_engine::config::parser;
use fluxline_engine::config::validator;

pub fn execute(pipeline: &Path) -> anyhow::Result<()> {
    let config = parser::parse_pipeline(pipeline)?;
    validator::validate_pipeline(&config)?;

    println!("Pipeline: {}", config.pipeline);
    println!("Channels:");
    for channel in &config.channels {
        let capacity = channel
            .capacity
            .map_or_else(|| "unbounded".to_string(), |c| c.to_string());
        println!("  {} ({}, capacity {})", channel.name, channel.kind, capacity);
    }
    println!("Endpoints:");
    for endpoint in &config.endpoints {
        let outputs = endpoint.output_channels();
        let outputs = if outputs.is_empty() {
            "(terminal)".to_string()
        } else {
            outputs.join(", ")
        };
        println!(
            "  {} ({}): {} -> {}",
            endpoint.id, endpoint.kind, endpoint.input, outputs
        );
    }
    if let Some(error_channel) = &config.errors.channel {
        println!("Error channel: {error_channel}");
    }
    if let Some(dead_letter) = &config.errors.dead_letter {
        println!("Dead-letter channel: {dead_letter}");
    }
    Ok(())
}
