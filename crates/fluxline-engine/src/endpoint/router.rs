//! Router endpoint: selects one output channel per message.
//!
//! Mapping targets are resolved to output indices at build time, so routing
//! never performs a by-name graph lookup at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use fluxline_types::{Message, RuntimeError};

use crate::endpoint::{EndpointResult, header_key};
use crate::handler::RouterFn;

/// Resolved routing strategy.
pub(crate) enum RouteStrategy {
    /// Header value to output index.
    Header {
        header: String,
        mapping: HashMap<String, usize>,
    },
    /// Registered router returning an output channel name.
    Custom {
        f: Arc<RouterFn>,
        index_of: HashMap<String, usize>,
    },
}

/// Computes an output index from the message; unresolvable routes fail
/// unless a default output is configured.
pub struct Router {
    strategy: RouteStrategy,
    default_index: Option<usize>,
}

impl Router {
    pub(crate) fn new(strategy: RouteStrategy, default_index: Option<usize>) -> Self {
        Self {
            strategy,
            default_index,
        }
    }

    pub(crate) fn route(&self, id: &str, msg: Message) -> EndpointResult {
        match self.resolve(&msg) {
            Ok(index) => EndpointResult::Forward(msg, index),
            Err(detail) => match self.default_index {
                Some(index) => EndpointResult::Forward(msg, index),
                None => EndpointResult::Fail(RuntimeError::RoutingUnresolved {
                    endpoint: id.to_string(),
                    detail,
                }),
            },
        }
    }

    fn resolve(&self, msg: &Message) -> Result<usize, String> {
        match &self.strategy {
            RouteStrategy::Header { header, mapping } => {
                let value = msg
                    .header(header)
                    .ok_or_else(|| format!("missing routing header '{header}'"))?;
                let key = header_key(value);
                mapping
                    .get(&key)
                    .copied()
                    .ok_or_else(|| format!("no mapping for header value '{key}'"))
            }
            RouteStrategy::Custom { f, index_of } => {
                let name = f(msg).ok_or_else(|| "router returned no channel".to_string())?;
                index_of
                    .get(&name)
                    .copied()
                    .ok_or_else(|| format!("router returned unknown channel '{name}'"))
            }
        }
    }
}
