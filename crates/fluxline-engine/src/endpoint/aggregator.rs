//! Aggregator endpoint: groups messages by correlation key.
//!
//! The group store is the only shared mutable runtime state in the engine.
//! It is bounded: a full store evicts its oldest group, and the dispatcher
//! sweeps expired groups on an interval. Evicted and expired groups leave
//! through the error flow, never silently.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use fluxline_types::{headers, Message, RuntimeError};

use crate::endpoint::{EndpointResult, header_key};

/// An incomplete group removed from the store before release.
pub(crate) struct ExpiredGroup {
    pub key: String,
    pub members: Vec<Message>,
}

struct Group {
    members: Vec<Message>,
    created_at: Instant,
}

struct Store {
    groups: HashMap<String, Group>,
    evicted: Vec<ExpiredGroup>,
}

/// Correlates messages into groups and releases each group as one combined
/// message once a release condition is met.
pub struct Aggregator {
    correlation_header: String,
    release_count: Option<usize>,
    group_timeout: Duration,
    max_groups: usize,
    store: Mutex<Store>,
}

impl Aggregator {
    pub(crate) fn new(
        correlation_header: String,
        release_count: Option<usize>,
        group_timeout: Duration,
        max_groups: usize,
    ) -> Self {
        Self {
            correlation_header,
            release_count,
            group_timeout,
            max_groups,
            store: Mutex::new(Store {
                groups: HashMap::new(),
                evicted: Vec::new(),
            }),
        }
    }

    pub(crate) fn offer(&self, id: &str, msg: Message) -> EndpointResult {
        let key = match msg.header(&self.correlation_header) {
            Some(value) => header_key(value),
            None => {
                return EndpointResult::Fail(RuntimeError::EndpointProcessing {
                    endpoint: id.to_string(),
                    message: format!(
                        "message has no correlation header '{}'",
                        self.correlation_header
                    ),
                });
            }
        };
        let complete = msg
            .header(headers::AGGREGATION_COMPLETE)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        let Ok(mut store) = self.store.lock() else {
            return EndpointResult::Fail(RuntimeError::EndpointProcessing {
                endpoint: id.to_string(),
                message: "aggregator group store poisoned".to_string(),
            });
        };

        if !store.groups.contains_key(&key) && store.groups.len() >= self.max_groups {
            if let Some(oldest) = store
                .groups
                .iter()
                .min_by_key(|(_, g)| g.created_at)
                .map(|(k, _)| k.clone())
            {
                if let Some(group) = store.groups.remove(&oldest) {
                    tracing::warn!(
                        aggregator = id,
                        correlation = oldest.as_str(),
                        members = group.members.len(),
                        "Group store full, evicting oldest group"
                    );
                    store.evicted.push(ExpiredGroup {
                        key: oldest,
                        members: group.members,
                    });
                }
            }
        }

        let group = store.groups.entry(key.clone()).or_insert_with(|| Group {
            members: Vec::new(),
            created_at: Instant::now(),
        });
        group.members.push(msg);

        let release = complete
            || self
                .release_count
                .is_some_and(|count| group.members.len() >= count);
        if !release {
            return EndpointResult::Drop;
        }

        match store.groups.remove(&key) {
            Some(group) => EndpointResult::Forward(self.combine(&key, group.members), 0),
            None => EndpointResult::Drop,
        }
    }

    /// Combine a released group into one message: payloads in arrival order,
    /// headers inherited from the first member.
    fn combine(&self, key: &str, members: Vec<Message>) -> Message {
        let payloads: Vec<serde_json::Value> =
            members.iter().map(|m| m.payload().render_json()).collect();
        let size = members.len();
        match members.first() {
            Some(first) => first
                .with_payload(serde_json::Value::Array(payloads))
                .with_headers([
                    (
                        self.correlation_header.clone(),
                        serde_json::json!(key),
                    ),
                    (headers::SEQUENCE_SIZE.to_string(), serde_json::json!(size)),
                ]),
            None => Message::new(serde_json::Value::Array(payloads)),
        }
    }

    /// Drain groups evicted for capacity since the last call.
    pub(crate) fn take_evicted(&self) -> Vec<ExpiredGroup> {
        match self.store.lock() {
            Ok(mut store) => std::mem::take(&mut store.evicted),
            Err(_) => Vec::new(),
        }
    }

    /// Remove and return groups older than the configured timeout.
    pub(crate) fn expire(&self, now: Instant) -> Vec<ExpiredGroup> {
        let Ok(mut store) = self.store.lock() else {
            return Vec::new();
        };
        let expired_keys: Vec<String> = store
            .groups
            .iter()
            .filter(|(_, g)| now.duration_since(g.created_at) >= self.group_timeout)
            .map(|(k, _)| k.clone())
            .collect();
        expired_keys
            .into_iter()
            .filter_map(|key| {
                store.groups.remove(&key).map(|group| ExpiredGroup {
                    key,
                    members: group.members,
                })
            })
            .collect()
    }

    /// Remove every in-flight group (shutdown flush).
    pub(crate) fn drain_all(&self) -> Vec<ExpiredGroup> {
        let Ok(mut store) = self.store.lock() else {
            return Vec::new();
        };
        let mut all: Vec<ExpiredGroup> = store
            .groups
            .drain()
            .map(|(key, group)| ExpiredGroup {
                key,
                members: group.members,
            })
            .collect();
        all.extend(std::mem::take(&mut store.evicted));
        all
    }

    /// In-flight group count.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.store.lock().map(|s| s.groups.len()).unwrap_or(0)
    }
}
