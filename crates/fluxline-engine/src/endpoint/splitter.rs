//! Splitter endpoint: one message per element of a sequence payload.

use fluxline_types::{headers, Message, Payload, RuntimeError};

use crate::endpoint::EndpointResult;

/// Splits an array payload into individual messages. Children inherit the
/// original headers plus sequence and correlation metadata for later
/// reassembly.
pub struct Splitter;

impl Splitter {
    pub(crate) fn split(&self, id: &str, msg: Message) -> EndpointResult {
        let items = match msg.payload() {
            Payload::Value(serde_json::Value::Array(items)) => items.clone(),
            _ => {
                return EndpointResult::Fail(RuntimeError::EndpointProcessing {
                    endpoint: id.to_string(),
                    message: "payload is not a sequence".to_string(),
                });
            }
        };

        let size = items.len();
        let correlation = msg.id().to_string();
        let children = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                msg.with_payload(item).with_headers([
                    (
                        headers::SEQUENCE_INDEX.to_string(),
                        serde_json::json!(index),
                    ),
                    (headers::SEQUENCE_SIZE.to_string(), serde_json::json!(size)),
                    (
                        headers::CORRELATION_ID.to_string(),
                        serde_json::json!(correlation),
                    ),
                ])
            })
            .collect();

        EndpointResult::ForwardAll(children)
    }
}
