//! Immutable message envelope flowing through the pipeline.
//!
//! A [`Message`] is a payload plus headers, identified by a v4 UUID. Messages
//! are never mutated in place: the `with_*` builders derive a new message with
//! a fresh identity, and headers are shared copy-on-write between the original
//! and its derivatives.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use uuid::Uuid;

/// Ordered header map. Values are JSON so headers stay expressible from
/// declarative configuration.
pub type Headers = BTreeMap<String, serde_json::Value>;

/// Message body: raw bytes or a structured JSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Opaque byte payload.
    Bytes(Vec<u8>),
    /// Structured payload.
    Value(serde_json::Value),
}

impl Payload {
    /// Returns the structured value, if this is a [`Payload::Value`].
    #[must_use]
    pub fn as_value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Bytes(_) => None,
        }
    }

    /// Returns the raw bytes, if this is a [`Payload::Bytes`].
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::Value(_) => None,
        }
    }

    /// True for empty byte payloads and JSON `null`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Bytes(b) => b.is_empty(),
            Self::Value(v) => v.is_null(),
        }
    }

    /// JSON rendering for diagnostics and dead-letter records.
    ///
    /// Byte payloads are rendered lossily as UTF-8 text; structured payloads
    /// are cloned as-is.
    #[must_use]
    pub fn render_json(&self) -> serde_json::Value {
        match self {
            Self::Bytes(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
            Self::Value(v) => v.clone(),
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Value(serde_json::Value::String(s.to_string()))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Value(serde_json::Value::String(s))
    }
}

/// Immutable message envelope.
///
/// Equality and hashing are by `id` only: two messages with identical payloads
/// are distinct entities.
#[derive(Debug, Clone)]
pub struct Message {
    id: Uuid,
    timestamp: SystemTime,
    payload: Payload,
    headers: Arc<Headers>,
}

impl Message {
    /// Create a message with empty headers.
    #[must_use]
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: SystemTime::now(),
            payload: payload.into(),
            headers: Arc::new(Headers::new()),
        }
    }

    /// Create a message with the given headers.
    #[must_use]
    pub fn with_initial_headers(payload: impl Into<Payload>, headers: Headers) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: SystemTime::now(),
            payload: payload.into(),
            headers: Arc::new(headers),
        }
    }

    /// Message identity.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Creation time of this message instance.
    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Message body.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// All headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Single header lookup.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&serde_json::Value> {
        self.headers.get(key)
    }

    /// Derive a new message with a replaced payload. Headers are inherited
    /// (shared, copy-on-write); the derivative gets a fresh id and timestamp.
    #[must_use]
    pub fn with_payload(&self, payload: impl Into<Payload>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: SystemTime::now(),
            payload: payload.into(),
            headers: Arc::clone(&self.headers),
        }
    }

    /// Derive a new message with one header added or overridden. The original
    /// message's header map is untouched.
    #[must_use]
    pub fn with_header(&self, key: impl Into<String>, value: serde_json::Value) -> Self {
        let mut headers = Arc::clone(&self.headers);
        Arc::make_mut(&mut headers).insert(key.into(), value);
        Self {
            id: Uuid::new_v4(),
            timestamp: SystemTime::now(),
            payload: self.payload.clone(),
            headers,
        }
    }

    /// Derive a new message with several headers added or overridden.
    #[must_use]
    pub fn with_headers<I>(&self, entries: I) -> Self
    where
        I: IntoIterator<Item = (String, serde_json::Value)>,
    {
        let mut headers = Arc::clone(&self.headers);
        let map = Arc::make_mut(&mut headers);
        for (key, value) in entries {
            map.insert(key, value);
        }
        Self {
            id: Uuid::new_v4(),
            timestamp: SystemTime::now(),
            payload: self.payload.clone(),
            headers,
        }
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Message {}

impl std::hash::Hash for Message {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
