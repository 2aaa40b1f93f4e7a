//! Semantic validation for parsed pipeline configuration values.
//!
//! Structural checks only: name uniqueness, kind-specific parameter
//! completeness, policy sanity, duration syntax. Reference resolution
//! (channel and handler lookups) happens in the graph builder.

use fluxline_types::BuildError;

use crate::config::types::{
    parse_duration, BackpressurePolicyConfig, ChannelConfig, ChannelKindConfig, EndpointConfig,
    EndpointKindConfig, PipelineConfig,
};

fn validate_channel(channel: &ChannelConfig, errors: &mut Vec<BuildError>) {
    if channel.name.trim().is_empty() {
        errors.push(BuildError::ConfigParse(
            "channel with an empty name".to_string(),
        ));
    }

    if channel.kind != ChannelKindConfig::Queued {
        if channel.capacity.is_some() {
            errors.push(BuildError::ConfigParse(format!(
                "channel '{}': capacity is only valid for queued channels",
                channel.name
            )));
        }
        if channel.backpressure.is_some() {
            errors.push(BuildError::ConfigParse(format!(
                "channel '{}': backpressure is only valid for queued channels",
                channel.name
            )));
        }
    }

    if channel.capacity == Some(0) {
        errors.push(BuildError::ConfigParse(format!(
            "channel '{}': capacity must be at least 1",
            channel.name
        )));
    }

    if let Some(bp) = &channel.backpressure {
        if channel.capacity.is_none() {
            errors.push(BuildError::ConfigParse(format!(
                "channel '{}': backpressure requires a capacity bound",
                channel.name
            )));
        }
        if let Some(timeout) = &bp.timeout {
            if bp.policy != BackpressurePolicyConfig::Block {
                errors.push(BuildError::ConfigParse(format!(
                    "channel '{}': backpressure timeout is only valid with the block policy",
                    channel.name
                )));
            }
            if let Err(e) = parse_duration(timeout) {
                errors.push(BuildError::ConfigParse(format!(
                    "channel '{}': {e}",
                    channel.name
                )));
            }
        }
    }
}

fn missing(endpoint: &EndpointConfig, parameter: &str) -> BuildError {
    BuildError::MissingParameter {
        endpoint: endpoint.id.clone(),
        parameter: parameter.to_string(),
    }
}

fn validate_endpoint(endpoint: &EndpointConfig, errors: &mut Vec<BuildError>) {
    if endpoint.id.trim().is_empty() {
        errors.push(BuildError::ConfigParse(
            "endpoint with an empty id".to_string(),
        ));
    }
    if endpoint.input.trim().is_empty() {
        errors.push(missing(endpoint, "input"));
    }

    let outputs = endpoint.output_channels();
    match endpoint.kind {
        EndpointKindConfig::Transformer => {
            if endpoint.transform.is_none() {
                errors.push(missing(endpoint, "transform"));
            }
            require_single_output(endpoint, &outputs, errors);
        }
        EndpointKindConfig::Filter => {
            if endpoint.predicate.is_none() {
                errors.push(missing(endpoint, "predicate"));
            }
            require_single_output(endpoint, &outputs, errors);
        }
        EndpointKindConfig::Router => {
            if endpoint.route.is_none() {
                errors.push(missing(endpoint, "route"));
            }
            if outputs.is_empty() {
                errors.push(missing(endpoint, "outputs"));
            }
        }
        EndpointKindConfig::Splitter | EndpointKindConfig::Bridge => {
            require_single_output(endpoint, &outputs, errors);
        }
        EndpointKindConfig::Aggregator => {
            if endpoint.correlation_header.is_none() {
                errors.push(missing(endpoint, "correlation_header"));
            }
            if endpoint.release_count == Some(0) {
                errors.push(BuildError::ConfigParse(format!(
                    "endpoint '{}': release_count must be at least 1",
                    endpoint.id
                )));
            }
            if endpoint.max_groups == Some(0) {
                errors.push(BuildError::ConfigParse(format!(
                    "endpoint '{}': max_groups must be at least 1",
                    endpoint.id
                )));
            }
            if let Some(timeout) = &endpoint.group_timeout {
                if let Err(e) = parse_duration(timeout) {
                    errors.push(BuildError::ConfigParse(format!(
                        "endpoint '{}': {e}",
                        endpoint.id
                    )));
                }
            }
            require_single_output(endpoint, &outputs, errors);
        }
        EndpointKindConfig::ServiceActivator => {
            if endpoint.service.is_none() {
                errors.push(missing(endpoint, "service"));
            }
            if let Some(timeout) = &endpoint.timeout {
                if let Err(e) = parse_duration(timeout) {
                    errors.push(BuildError::ConfigParse(format!(
                        "endpoint '{}': {e}",
                        endpoint.id
                    )));
                }
            }
            // Zero outputs makes an activator a terminal endpoint.
            if outputs.len() > 1 {
                errors.push(BuildError::ConfigParse(format!(
                    "endpoint '{}': service_activator takes at most one output",
                    endpoint.id
                )));
            }
        }
    }

    if endpoint.discard_channel.is_some() && endpoint.kind != EndpointKindConfig::Filter {
        errors.push(BuildError::ConfigParse(format!(
            "endpoint '{}': discard_channel is only valid for filters",
            endpoint.id
        )));
    }

    if let Some(retry) = &endpoint.retry {
        if retry.max_attempts == 0 {
            errors.push(BuildError::ConfigParse(format!(
                "endpoint '{}': retry max_attempts must be at least 1",
                endpoint.id
            )));
        }
    }
}

fn require_single_output(
    endpoint: &EndpointConfig,
    outputs: &[String],
    errors: &mut Vec<BuildError>,
) {
    match outputs.len() {
        0 => errors.push(missing(endpoint, "output")),
        1 => {}
        _ => errors.push(BuildError::ConfigParse(format!(
            "endpoint '{}': {} takes exactly one output",
            endpoint.id, endpoint.kind
        ))),
    }
}

/// Validate a parsed pipeline configuration.
///
/// Collects every failure before reporting, so one pass surfaces the full
/// list.
///
/// # Errors
///
/// Returns a single [`BuildError`], or [`BuildError::Multiple`] listing all
/// validation failures found in the pipeline config.
pub fn validate_pipeline(config: &PipelineConfig) -> Result<(), BuildError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(BuildError::ConfigParse(format!(
            "unsupported pipeline version '{}', expected '1.0'",
            config.version
        )));
    }

    if config.pipeline.trim().is_empty() {
        errors.push(BuildError::ConfigParse(
            "pipeline name must not be empty".to_string(),
        ));
    }

    if config.channels.is_empty() {
        errors.push(BuildError::ConfigParse(
            "pipeline must declare at least one channel".to_string(),
        ));
    }

    let mut seen_channels = std::collections::HashSet::new();
    for channel in &config.channels {
        if !seen_channels.insert(channel.name.as_str()) {
            errors.push(BuildError::DuplicateName {
                kind: "channel".to_string(),
                name: channel.name.clone(),
            });
        }
        validate_channel(channel, &mut errors);
    }

    let mut seen_endpoints = std::collections::HashSet::new();
    for endpoint in &config.endpoints {
        if !seen_endpoints.insert(endpoint.id.as_str()) {
            errors.push(BuildError::DuplicateName {
                kind: "endpoint".to_string(),
                name: endpoint.id.clone(),
            });
        }
        validate_endpoint(endpoint, &mut errors);
    }

    for field in [&config.resources.shutdown_grace, &config.resources.sweep_interval] {
        if let Err(e) = parse_duration(field) {
            errors.push(BuildError::ConfigParse(format!("resources: {e}")));
        }
    }

    BuildError::aggregate(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_pipeline_str;

    fn valid_yaml() -> &'static str {
        r#"
version: "1.0"
pipeline: order_routing
channels:
  - name: inbound
    kind: queued
    capacity: 16
  - name: orders
  - name: refunds
endpoints:
  - id: route_by_type
    kind: router
    input: inbound
    outputs: [orders, refunds]
    route:
      type: header
      header: type
      mapping:
        order: orders
        refund: refunds
"#
    }

    #[test]
    fn test_valid_pipeline_passes() {
        let config = parse_pipeline_str(valid_yaml()).unwrap();
        assert!(validate_pipeline(&config).is_ok());
    }

    #[test]
    fn test_wrong_version_fails() {
        let yaml = valid_yaml().replace("\"1.0\"", "\"2.0\"");
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("unsupported pipeline version"));
    }

    #[test]
    fn test_empty_pipeline_name_fails() {
        let yaml = valid_yaml().replace("order_routing", "\"\"");
        let config = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("pipeline name must not be empty"));
    }

    #[test]
    fn test_router_without_route_is_missing_parameter() {
        let yaml = r#"
version: "1.0"
pipeline: test
channels:
  - name: inbound
  - name: out
endpoints:
  - id: route_by_type
    kind: router
    input: inbound
    outputs: [out]
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err();
        assert!(matches!(
            err,
            BuildError::MissingParameter { ref endpoint, ref parameter }
                if endpoint == "route_by_type" && parameter == "route"
        ));
    }

    #[test]
    fn test_duplicate_channel_name_fails() {
        let yaml = r#"
version: "1.0"
pipeline: test
channels:
  - name: inbound
  - name: inbound
endpoints: []
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err();
        assert!(err.each().any(|e| matches!(
            e,
            BuildError::DuplicateName { ref kind, ref name } if kind == "channel" && name == "inbound"
        )));
    }

    #[test]
    fn test_zero_capacity_fails() {
        let yaml = r#"
version: "1.0"
pipeline: test
channels:
  - name: inbound
    kind: queued
    capacity: 0
endpoints: []
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("capacity must be at least 1"));
    }

    #[test]
    fn test_capacity_on_direct_channel_fails() {
        let yaml = r#"
version: "1.0"
pipeline: test
channels:
  - name: inbound
    capacity: 8
endpoints: []
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("only valid for queued channels"));
    }

    #[test]
    fn test_backpressure_without_capacity_fails() {
        let yaml = r#"
version: "1.0"
pipeline: test
channels:
  - name: inbound
    kind: queued
    backpressure:
      policy: block
      timeout: 100ms
endpoints: []
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("requires a capacity bound"));
    }

    #[test]
    fn test_bad_backpressure_timeout_fails() {
        let yaml = r#"
version: "1.0"
pipeline: test
channels:
  - name: inbound
    kind: queued
    capacity: 4
    backpressure:
      policy: block
      timeout: fast
endpoints: []
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("inbound"));
    }

    #[test]
    fn test_aggregator_requires_correlation_header() {
        let yaml = r#"
version: "1.0"
pipeline: test
channels:
  - name: parts
  - name: whole
endpoints:
  - id: assemble
    kind: aggregator
    input: parts
    output: whole
    release_count: 3
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err();
        assert!(matches!(
            err,
            BuildError::MissingParameter { ref endpoint, ref parameter }
                if endpoint == "assemble" && parameter == "correlation_header"
        ));
    }

    #[test]
    fn test_transformer_requires_transform_and_output() {
        let yaml = r#"
version: "1.0"
pipeline: test
channels:
  - name: a
endpoints:
  - id: enrich
    kind: transformer
    input: a
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err();
        let params: Vec<_> = err
            .each()
            .filter_map(|e| match e {
                BuildError::MissingParameter { parameter, .. } => Some(parameter.clone()),
                _ => None,
            })
            .collect();
        assert!(params.contains(&"transform".to_string()));
        assert!(params.contains(&"output".to_string()));
    }

    #[test]
    fn test_zero_retry_attempts_fails() {
        let yaml = r#"
version: "1.0"
pipeline: test
channels:
  - name: a
  - name: b
endpoints:
  - id: forward
    kind: bridge
    input: a
    output: b
    retry:
      max_attempts: 0
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("max_attempts must be at least 1"));
    }

    #[test]
    fn test_terminal_activator_passes() {
        let yaml = r#"
version: "1.0"
pipeline: test
channels:
  - name: outbound
endpoints:
  - id: ship
    kind: service_activator
    input: outbound
    service: shipping_gateway
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        assert!(validate_pipeline(&config).is_ok());
    }

    #[test]
    fn test_discard_channel_on_non_filter_fails() {
        let yaml = r#"
version: "1.0"
pipeline: test
channels:
  - name: a
  - name: b
endpoints:
  - id: forward
    kind: bridge
    input: a
    output: b
    discard_channel: rejects
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("only valid for filters"));
    }

    #[test]
    fn test_bad_resource_duration_fails() {
        let yaml = r#"
version: "1.0"
pipeline: test
channels:
  - name: a
endpoints: []
resources:
  shutdown_grace: whenever
"#;
        let config = parse_pipeline_str(yaml).unwrap();
        let err = validate_pipeline(&config).unwrap_err().to_string();
        assert!(err.contains("resources"));
    }
}
