//! Error taxonomy for the pipeline engine.
//!
//! [`BuildError`] is fatal and aborts startup. [`RuntimeError`] is recovered
//! locally by routing into the error flow and never crosses the dispatcher
//! boundary. [`ShutdownError`] is logged while forced shutdown proceeds.

/// Fatal configuration or wiring error detected while building the graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// The configuration document is malformed or semantically invalid.
    #[error("invalid pipeline configuration: {0}")]
    ConfigParse(String),

    /// A named reference (channel or registered handler) does not resolve.
    #[error("'{referrer}' references unknown {kind} '{name}'")]
    UnresolvedReference {
        /// Endpoint id (or config section) holding the reference.
        referrer: String,
        /// What was being referenced (`channel`, `transform`, ...).
        kind: String,
        /// The unresolved name.
        name: String,
    },

    /// An endpoint is missing a parameter its kind requires.
    #[error("endpoint '{endpoint}' is missing required parameter '{parameter}'")]
    MissingParameter { endpoint: String, parameter: String },

    /// Two channels or two endpoints share a name.
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: String, name: String },

    /// Several independent build failures, reported together.
    #[error("pipeline validation failed:\n  - {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n  - "))]
    Multiple(Vec<BuildError>),
}

impl BuildError {
    /// Collapse a list of failures into a single error: `Ok(())` when empty,
    /// the sole error when singular, [`BuildError::Multiple`] otherwise.
    pub fn aggregate(mut errors: Vec<BuildError>) -> Result<(), BuildError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(BuildError::Multiple(errors)),
        }
    }

    /// Iterate the individual failures (self, unless [`BuildError::Multiple`]).
    pub fn each(&self) -> impl Iterator<Item = &BuildError> {
        match self {
            BuildError::Multiple(list) => list.iter().collect::<Vec<_>>().into_iter(),
            other => vec![other].into_iter(),
        }
    }
}

/// Recoverable failure during message processing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// An endpoint's processing function failed.
    #[error("endpoint '{endpoint}' failed: {message}")]
    EndpointProcessing { endpoint: String, message: String },

    /// A router produced no output channel and has no default.
    #[error("router '{endpoint}' could not resolve a route: {detail}")]
    RoutingUnresolved { endpoint: String, detail: String },

    /// A bounded queued channel rejected a send.
    #[error("channel '{channel}' is at capacity")]
    ChannelCapacityExceeded { channel: String },

    /// An aggregation group expired before its release condition was met.
    #[error("aggregator '{endpoint}' flushed incomplete group '{correlation_key}'")]
    AggregationTimeout {
        endpoint: String,
        correlation_key: String,
    },
}

impl RuntimeError {
    /// Endpoint the failure is attributed to, when one exists.
    #[must_use]
    pub fn endpoint_id(&self) -> Option<&str> {
        match self {
            Self::EndpointProcessing { endpoint, .. }
            | Self::RoutingUnresolved { endpoint, .. }
            | Self::AggregationTimeout { endpoint, .. } => Some(endpoint),
            Self::ChannelCapacityExceeded { .. } => None,
        }
    }

    /// Stable label for logs and error-message headers.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EndpointProcessing { .. } => "endpoint_processing",
            Self::RoutingUnresolved { .. } => "routing_unresolved",
            Self::ChannelCapacityExceeded { .. } => "channel_capacity_exceeded",
            Self::AggregationTimeout { .. } => "aggregation_timeout",
        }
    }
}

/// Failure while stopping the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShutdownError {
    /// The drain grace period lapsed with messages still queued.
    #[error("drain grace period exceeded with {pending} queued message(s) pending")]
    DrainTimeoutExceeded { pending: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_empty_is_ok() {
        assert!(BuildError::aggregate(vec![]).is_ok());
    }

    #[test]
    fn aggregate_single_returns_it_unwrapped() {
        let err = BuildError::aggregate(vec![BuildError::DuplicateName {
            kind: "channel".into(),
            name: "orders".into(),
        }])
        .unwrap_err();
        assert!(matches!(err, BuildError::DuplicateName { .. }));
    }

    #[test]
    fn aggregate_many_lists_each_failure() {
        let err = BuildError::aggregate(vec![
            BuildError::MissingParameter {
                endpoint: "route_orders".into(),
                parameter: "route".into(),
            },
            BuildError::UnresolvedReference {
                referrer: "enrich".into(),
                kind: "channel".into(),
                name: "nowhere".into(),
            },
        ])
        .unwrap_err();

        let text = err.to_string();
        assert!(text.contains("pipeline validation failed"));
        assert!(text.contains("route_orders"));
        assert!(text.contains("nowhere"));
        assert_eq!(err.each().count(), 2);
    }

    #[test]
    fn missing_parameter_names_the_endpoint() {
        let err = BuildError::MissingParameter {
            endpoint: "route_orders".into(),
            parameter: "route".into(),
        };
        let text = err.to_string();
        assert!(text.contains("route_orders"));
        assert!(text.contains("route"));
    }

    #[test]
    fn runtime_error_endpoint_attribution() {
        let err = RuntimeError::ChannelCapacityExceeded {
            channel: "inbound".into(),
        };
        assert!(err.endpoint_id().is_none());
        assert_eq!(err.kind(), "channel_capacity_exceeded");

        let err = RuntimeError::RoutingUnresolved {
            endpoint: "route_orders".into(),
            detail: "no mapping for 'refund'".into(),
        };
        assert_eq!(err.endpoint_id(), Some("route_orders"));
    }
}
