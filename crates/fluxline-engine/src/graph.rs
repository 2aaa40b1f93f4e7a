//! Build-once pipeline graph.
//!
//! The graph exclusively owns every channel and endpoint; edges are
//! name-indexed lookups, never owning references, so cyclic topologies
//! (retry loops, feedback routers) need no special handling. Construction is
//! a single pass over the validated config followed by a second validation
//! pass over the resolved graph; any failure aborts the build.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use fluxline_types::BuildError;

use crate::channel::{Backpressure, Channel};
use crate::config::types::{
    parse_duration, BackpressurePolicyConfig, ChannelConfig, EndpointConfig, EndpointKindConfig,
    PipelineConfig, PredicateSpec, RouteSpec, TransformSpec,
};
use crate::config::validator;
use crate::endpoint::filter::Predicate;
use crate::endpoint::router::RouteStrategy;
use crate::endpoint::transformer::TransformOp;
use crate::endpoint::{
    Aggregator, Endpoint, EndpointKind, Filter, Router, ServiceActivator, Splitter, Transformer,
};
use crate::errors::RetryPolicy;
use crate::handler::HandlerRegistry;

const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_GROUP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SERVICE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_GROUPS: usize = 1024;

/// The assembled pipeline: all channels and endpoints, error-flow bindings,
/// and engine timing settings. Immutable after build apart from lifecycle
/// flags and queue state.
#[derive(Debug)]
pub struct Graph {
    pipeline: String,
    channels: HashMap<String, Channel>,
    endpoints: HashMap<String, Endpoint>,
    error_channel: Option<String>,
    dead_letter_channel: Option<String>,
    shutdown_grace: Duration,
    sweep_interval: Duration,
}

impl Graph {
    /// Build a graph from a validated configuration and handler registry.
    ///
    /// # Errors
    ///
    /// Returns every validation and resolution failure found; the process
    /// must not start on any error.
    pub fn build(config: &PipelineConfig, registry: &HandlerRegistry) -> Result<Self, BuildError> {
        validator::validate_pipeline(config)?;

        let mut errors = Vec::new();
        let channel_names: HashSet<&str> =
            config.channels.iter().map(|c| c.name.as_str()).collect();

        // Subscriber lists, in endpoint declaration order.
        let mut subscribers: HashMap<String, Vec<String>> = HashMap::new();
        for endpoint in &config.endpoints {
            if channel_names.contains(endpoint.input.as_str()) {
                subscribers
                    .entry(endpoint.input.clone())
                    .or_default()
                    .push(endpoint.id.clone());
            } else {
                errors.push(unresolved(&endpoint.id, "channel", &endpoint.input));
            }
        }

        let mut channels = HashMap::new();
        for channel_cfg in &config.channels {
            match resolve_backpressure(channel_cfg) {
                Ok(backpressure) => {
                    let subs = subscribers.remove(&channel_cfg.name).unwrap_or_default();
                    channels.insert(
                        channel_cfg.name.clone(),
                        Channel::new(
                            channel_cfg.name.clone(),
                            channel_cfg.kind,
                            channel_cfg.capacity,
                            backpressure,
                            channel_cfg.on_unsubscribed,
                            subs,
                        ),
                    );
                }
                Err(e) => errors.push(e),
            }
        }

        let mut endpoints = HashMap::new();
        for endpoint_cfg in &config.endpoints {
            let outputs = endpoint_cfg.output_channels();
            for output in &outputs {
                if !channel_names.contains(output.as_str()) {
                    errors.push(unresolved(&endpoint_cfg.id, "channel", output));
                }
            }
            if let Some(discard) = &endpoint_cfg.discard_channel {
                if !channel_names.contains(discard.as_str()) {
                    errors.push(unresolved(&endpoint_cfg.id, "channel", discard));
                }
            }

            if let Some(kind) = build_kind(endpoint_cfg, &outputs, registry, &mut errors) {
                let retry = endpoint_cfg
                    .retry
                    .map(|r| RetryPolicy {
                        max_attempts: r.max_attempts,
                        backoff: r.backoff,
                    })
                    .unwrap_or_default();
                endpoints.insert(
                    endpoint_cfg.id.clone(),
                    Endpoint::new(
                        endpoint_cfg.id.clone(),
                        endpoint_cfg.input.clone(),
                        outputs,
                        kind,
                        retry,
                    ),
                );
            }
        }

        for name in [&config.errors.channel, &config.errors.dead_letter]
            .into_iter()
            .flatten()
        {
            if !channel_names.contains(name.as_str()) {
                errors.push(unresolved("errors", "channel", name));
            }
        }

        // Second pass over the resolved graph: a channel nothing produces
        // into and nothing consumes from is almost certainly a config typo.
        let mut produced: HashSet<String> = HashSet::new();
        for endpoint in &config.endpoints {
            produced.extend(endpoint.output_channels());
            if let Some(discard) = &endpoint.discard_channel {
                produced.insert(discard.clone());
            }
        }
        for name in [&config.errors.channel, &config.errors.dead_letter]
            .into_iter()
            .flatten()
        {
            produced.insert(name.clone());
        }
        for channel in channels.values() {
            if channel.subscribers().is_empty() && !produced.contains(channel.name()) {
                tracing::warn!(
                    channel = channel.name(),
                    "Channel has no producers and no consumers"
                );
            }
        }

        BuildError::aggregate(errors)?;

        let shutdown_grace = parse_duration(&config.resources.shutdown_grace)
            .map_err(|e| BuildError::ConfigParse(e.to_string()))?;
        let sweep_interval = parse_duration(&config.resources.sweep_interval)
            .map_err(|e| BuildError::ConfigParse(e.to_string()))?;

        Ok(Self {
            pipeline: config.pipeline.clone(),
            channels,
            endpoints,
            error_channel: config.errors.channel.clone(),
            dead_letter_channel: config.errors.dead_letter.clone(),
            shutdown_grace,
            sweep_interval,
        })
    }

    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    #[must_use]
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    #[must_use]
    pub fn endpoint(&self, id: &str) -> Option<&Endpoint> {
        self.endpoints.get(id)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    #[must_use]
    pub fn error_channel(&self) -> Option<&str> {
        self.error_channel.as_deref()
    }

    #[must_use]
    pub fn dead_letter_channel(&self) -> Option<&str> {
        self.dead_letter_channel.as_deref()
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }
}

fn unresolved(referrer: &str, kind: &str, name: &str) -> BuildError {
    BuildError::UnresolvedReference {
        referrer: referrer.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn resolve_backpressure(channel: &ChannelConfig) -> Result<Backpressure, BuildError> {
    let Some(bp) = &channel.backpressure else {
        return Ok(Backpressure::Block(DEFAULT_BLOCK_TIMEOUT));
    };
    match bp.policy {
        BackpressurePolicyConfig::Drop => Ok(Backpressure::Drop),
        BackpressurePolicyConfig::Fail => Ok(Backpressure::Fail),
        BackpressurePolicyConfig::Block => {
            let timeout = match &bp.timeout {
                Some(raw) => parse_duration(raw).map_err(|e| {
                    BuildError::ConfigParse(format!("channel '{}': {e}", channel.name))
                })?,
                None => DEFAULT_BLOCK_TIMEOUT,
            };
            Ok(Backpressure::Block(timeout))
        }
    }
}

/// Map one declared output channel name to its index in `outputs`.
fn output_index(
    endpoint: &EndpointConfig,
    outputs: &[String],
    target: &str,
    errors: &mut Vec<BuildError>,
) -> Option<usize> {
    let index = outputs.iter().position(|o| o == target);
    if index.is_none() {
        errors.push(BuildError::ConfigParse(format!(
            "endpoint '{}': route target '{}' is not among its outputs",
            endpoint.id, target
        )));
    }
    index
}

fn build_kind(
    endpoint: &EndpointConfig,
    outputs: &[String],
    registry: &HandlerRegistry,
    errors: &mut Vec<BuildError>,
) -> Option<EndpointKind> {
    match endpoint.kind {
        EndpointKindConfig::Bridge => Some(EndpointKind::Bridge),
        EndpointKindConfig::Splitter => Some(EndpointKind::Splitter(Splitter)),
        EndpointKindConfig::Transformer => {
            let op = match endpoint.transform.as_ref()? {
                TransformSpec::Uppercase => TransformOp::Uppercase,
                TransformSpec::Lowercase => TransformOp::Lowercase,
                TransformSpec::SetHeader { name, value } => TransformOp::SetHeader {
                    name: name.clone(),
                    value: value.clone(),
                },
                TransformSpec::JsonPointer { pointer } => TransformOp::JsonPointer {
                    pointer: pointer.clone(),
                },
                TransformSpec::Ref { name } => match registry.transform(name) {
                    Some(f) => TransformOp::Custom(f),
                    None => {
                        errors.push(unresolved(&endpoint.id, "transform", name));
                        return None;
                    }
                },
            };
            Some(EndpointKind::Transformer(Transformer::new(op)))
        }
        EndpointKindConfig::Filter => {
            let predicate = match endpoint.predicate.as_ref()? {
                PredicateSpec::NonEmpty => Predicate::NonEmpty,
                PredicateSpec::HeaderExists { header } => {
                    Predicate::HeaderExists(header.clone())
                }
                PredicateSpec::HeaderEquals { header, value } => Predicate::HeaderEquals {
                    header: header.clone(),
                    value: value.clone(),
                },
                PredicateSpec::Ref { name } => match registry.predicate(name) {
                    Some(f) => Predicate::Custom(f),
                    None => {
                        errors.push(unresolved(&endpoint.id, "predicate", name));
                        return None;
                    }
                },
            };
            Some(EndpointKind::Filter(Filter::new(
                predicate,
                endpoint.discard_channel.clone(),
            )))
        }
        EndpointKindConfig::Router => {
            let (strategy, default) = match endpoint.route.as_ref()? {
                RouteSpec::Header {
                    header,
                    mapping,
                    default,
                } => {
                    let mut resolved = HashMap::new();
                    for (value, target) in mapping {
                        if let Some(index) = output_index(endpoint, outputs, target, errors) {
                            resolved.insert(value.clone(), index);
                        }
                    }
                    (
                        RouteStrategy::Header {
                            header: header.clone(),
                            mapping: resolved,
                        },
                        default.as_deref(),
                    )
                }
                RouteSpec::Ref { name, default } => match registry.router(name) {
                    Some(f) => {
                        let index_of = outputs
                            .iter()
                            .enumerate()
                            .map(|(i, o)| (o.clone(), i))
                            .collect();
                        (RouteStrategy::Custom { f, index_of }, default.as_deref())
                    }
                    None => {
                        errors.push(unresolved(&endpoint.id, "router", name));
                        return None;
                    }
                },
            };
            let default_index = match default {
                Some(target) => Some(output_index(endpoint, outputs, target, errors)?),
                None => None,
            };
            Some(EndpointKind::Router(Router::new(strategy, default_index)))
        }
        EndpointKindConfig::Aggregator => {
            let correlation_header = endpoint.correlation_header.clone()?;
            let group_timeout = match &endpoint.group_timeout {
                Some(raw) => parse_duration(raw).ok()?,
                None => DEFAULT_GROUP_TIMEOUT,
            };
            Some(EndpointKind::Aggregator(Aggregator::new(
                correlation_header,
                endpoint.release_count,
                group_timeout,
                endpoint.max_groups.unwrap_or(DEFAULT_MAX_GROUPS),
            )))
        }
        EndpointKindConfig::ServiceActivator => {
            let name = endpoint.service.as_ref()?;
            let Some(service) = registry.service(name) else {
                errors.push(unresolved(&endpoint.id, "service", name));
                return None;
            };
            let timeout = match &endpoint.timeout {
                Some(raw) => parse_duration(raw).ok()?,
                None => DEFAULT_SERVICE_TIMEOUT,
            };
            Some(EndpointKind::ServiceActivator(ServiceActivator::new(
                service, timeout,
            )))
        }
    }
}
