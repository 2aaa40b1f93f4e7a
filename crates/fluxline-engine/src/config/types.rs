//! Serde model of the pipeline YAML document.
//!
//! Durations are kept as strings in the model (`"100ms"`, `"5s"`) and parsed
//! with [`parse_duration`] at validation and build time.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level pipeline document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub version: String,
    pub pipeline: String,
    pub channels: Vec<ChannelConfig>,
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub errors: ErrorFlowConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
}

/// Delivery semantics of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKindConfig {
    /// Synchronous delivery on the sender's task.
    Direct,
    /// Buffered delivery through a dedicated worker.
    Queued,
    /// Synchronous fan-out of an independent copy per subscriber.
    Pubsub,
}

impl Default for ChannelKindConfig {
    fn default() -> Self {
        Self::Direct
    }
}

impl std::fmt::Display for ChannelKindConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Direct => "direct",
            Self::Queued => "queued",
            Self::Pubsub => "pubsub",
        };
        f.write_str(s)
    }
}

/// Behavior when a bounded queued channel is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicyConfig {
    /// Wait for space, up to the configured timeout.
    Block,
    /// Discard the message and log.
    Drop,
    /// Fail the send with `ChannelCapacityExceeded`.
    Fail,
}

/// Backpressure settings for a bounded queued channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackpressureConfig {
    pub policy: BackpressurePolicyConfig,
    /// Block timeout (`block` policy only). Default 30s.
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Behavior when a message reaches a channel with no subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsubscribedPolicy {
    /// Log and discard (default).
    Drop,
    /// Fail the send.
    Fail,
}

impl Default for UnsubscribedPolicy {
    fn default() -> Self {
        Self::Drop
    }
}

/// One declared channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default)]
    pub kind: ChannelKindConfig,
    /// Queue bound; omitted means unbounded (queued channels only).
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub backpressure: Option<BackpressureConfig>,
    #[serde(default)]
    pub on_unsubscribed: UnsubscribedPolicy,
}

/// Endpoint kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKindConfig {
    Transformer,
    Filter,
    Router,
    Splitter,
    Aggregator,
    ServiceActivator,
    Bridge,
}

impl std::fmt::Display for EndpointKindConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Transformer => "transformer",
            Self::Filter => "filter",
            Self::Router => "router",
            Self::Splitter => "splitter",
            Self::Aggregator => "aggregator",
            Self::ServiceActivator => "service_activator",
            Self::Bridge => "bridge",
        };
        f.write_str(s)
    }
}

/// Declarative transformer operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformSpec {
    /// Uppercase a text payload.
    Uppercase,
    /// Lowercase a text payload.
    Lowercase,
    /// Set (or override) a header on the message.
    SetHeader { name: String, value: serde_json::Value },
    /// Replace the payload with the value at a JSON pointer.
    JsonPointer { pointer: String },
    /// Invoke a transform registered by the embedding process.
    Ref { name: String },
}

/// Declarative filter predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PredicateSpec {
    /// Accept messages with a non-empty payload.
    NonEmpty,
    /// Accept messages carrying the header.
    HeaderExists { header: String },
    /// Accept messages whose header equals the value.
    HeaderEquals { header: String, value: serde_json::Value },
    /// Invoke a predicate registered by the embedding process.
    Ref { name: String },
}

/// Declarative routing strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouteSpec {
    /// Select an output channel by header value.
    Header {
        header: String,
        /// Header value to output channel name.
        mapping: BTreeMap<String, String>,
        /// Fallback channel when no mapping entry matches.
        #[serde(default)]
        default: Option<String>,
    },
    /// Invoke a router registered by the embedding process; it returns an
    /// output channel name.
    Ref {
        name: String,
        #[serde(default)]
        default: Option<String>,
    },
}

/// Retry backoff scale (exponential within each class).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffClass {
    /// Millisecond-scale retry.
    Fast,
    /// Second-scale retry.
    Normal,
    /// Multi-second-scale retry.
    Slow,
}

impl Default for BackoffClass {
    fn default() -> Self {
        Self::Normal
    }
}

/// Per-endpoint retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total processing attempts, including the first. 1 disables retry.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffClass,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffClass::default(),
        }
    }
}

/// One declared endpoint. Kind-specific parameters are optional fields,
/// checked for completeness by the validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub id: String,
    pub kind: EndpointKindConfig,
    pub input: String,
    /// Single output channel (most kinds).
    #[serde(default)]
    pub output: Option<String>,
    /// Ordered output channels (routers).
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub transform: Option<TransformSpec>,
    #[serde(default)]
    pub predicate: Option<PredicateSpec>,
    /// Where a filter sends rejected messages, if anywhere.
    #[serde(default)]
    pub discard_channel: Option<String>,
    #[serde(default)]
    pub route: Option<RouteSpec>,
    /// Aggregator: header whose value groups related messages.
    #[serde(default)]
    pub correlation_header: Option<String>,
    /// Aggregator: release a group once it reaches this size.
    #[serde(default)]
    pub release_count: Option<usize>,
    /// Aggregator: flush incomplete groups after this long. Default 30s.
    #[serde(default)]
    pub group_timeout: Option<String>,
    /// Aggregator: bound on in-flight groups. Default 1024.
    #[serde(default)]
    pub max_groups: Option<usize>,
    /// Service activator: registered handler name.
    #[serde(default)]
    pub service: Option<String>,
    /// Service activator: call timeout. Default 30s.
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl EndpointConfig {
    /// Declared output channels, normalized across `output` and `outputs`.
    #[must_use]
    pub fn output_channels(&self) -> Vec<String> {
        match &self.output {
            Some(single) => {
                let mut all = vec![single.clone()];
                all.extend(self.outputs.iter().cloned());
                all
            }
            None => self.outputs.clone(),
        }
    }
}

/// Error-flow channel bindings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorFlowConfig {
    /// Channel receiving error messages after retries are exhausted.
    /// Unconfigured: log and drop.
    #[serde(default)]
    pub channel: Option<String>,
    /// Terminal sink for failures the error flow itself cannot absorb.
    #[serde(default)]
    pub dead_letter: Option<String>,
}

/// Engine-level resource settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// How long `stop` waits for queued messages to drain.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: String,
    /// Aggregator expiry sweep interval.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,
}

fn default_shutdown_grace() -> String {
    "5s".to_string()
}

fn default_sweep_interval() -> String {
    "250ms".to_string()
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: default_shutdown_grace(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// Parse a human-readable duration: `"250ms"`, `"5s"`, `"2m"`.
///
/// # Errors
///
/// Returns an error for an empty string, a missing or unknown unit, or a
/// non-numeric magnitude.
pub fn parse_duration(input: &str) -> anyhow::Result<Duration> {
    let s = input.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow::anyhow!("duration '{input}' is missing a unit (ms, s, m)"))?;
    let (magnitude, unit) = s.split_at(split);
    let value: u64 = magnitude
        .parse()
        .map_err(|_| anyhow::anyhow!("duration '{input}' has no numeric magnitude"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        other => anyhow::bail!("duration '{input}' has unknown unit '{other}'"),
    }
}
