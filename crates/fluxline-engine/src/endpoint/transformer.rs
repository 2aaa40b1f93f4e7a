//! Transformer endpoint: pure function from message to message.

use std::sync::Arc;

use fluxline_types::{Message, Payload, RuntimeError};

use crate::endpoint::EndpointResult;
use crate::handler::TransformFn;

/// Resolved transformer operation.
pub(crate) enum TransformOp {
    Uppercase,
    Lowercase,
    SetHeader {
        name: String,
        value: serde_json::Value,
    },
    JsonPointer {
        pointer: String,
    },
    Custom(Arc<TransformFn>),
}

/// Applies one [`TransformOp`] per message; any failure in the function body
/// yields `Fail`.
pub struct Transformer {
    op: TransformOp,
}

impl Transformer {
    pub(crate) fn new(op: TransformOp) -> Self {
        Self { op }
    }

    pub(crate) fn apply(&self, id: &str, msg: Message) -> EndpointResult {
        match self.transform(&msg) {
            Ok(out) => EndpointResult::Forward(out, 0),
            Err(message) => EndpointResult::Fail(RuntimeError::EndpointProcessing {
                endpoint: id.to_string(),
                message,
            }),
        }
    }

    fn transform(&self, msg: &Message) -> Result<Message, String> {
        match &self.op {
            TransformOp::Uppercase => recase(msg, str::to_uppercase, |b| {
                b.to_ascii_uppercase()
            }),
            TransformOp::Lowercase => recase(msg, str::to_lowercase, |b| {
                b.to_ascii_lowercase()
            }),
            TransformOp::SetHeader { name, value } => {
                Ok(msg.with_header(name.clone(), value.clone()))
            }
            TransformOp::JsonPointer { pointer } => {
                let value = msg
                    .payload()
                    .as_value()
                    .ok_or_else(|| "payload is not structured".to_string())?;
                let extracted = value
                    .pointer(pointer)
                    .ok_or_else(|| format!("no value at pointer '{pointer}'"))?;
                Ok(msg.with_payload(extracted.clone()))
            }
            TransformOp::Custom(f) => f(msg).map_err(|e| e.to_string()),
        }
    }
}

fn recase(
    msg: &Message,
    text: impl Fn(&str) -> String,
    bytes: impl Fn(&[u8]) -> Vec<u8>,
) -> Result<Message, String> {
    match msg.payload() {
        Payload::Value(serde_json::Value::String(s)) => Ok(msg.with_payload(text(s))),
        Payload::Bytes(b) => Ok(msg.with_payload(bytes(b))),
        _ => Err("payload is not text".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(op: TransformOp, msg: Message) -> EndpointResult {
        Transformer::new(op).apply("enrich", msg)
    }

    #[test]
    fn uppercase_text_payload() {
        match apply(TransformOp::Uppercase, Message::new("hello")) {
            EndpointResult::Forward(out, 0) => {
                assert_eq!(out.payload().as_value(), Some(&serde_json::json!("HELLO")));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn uppercase_rejects_object_payload() {
        match apply(TransformOp::Uppercase, Message::new(serde_json::json!({"a": 1}))) {
            EndpointResult::Fail(RuntimeError::EndpointProcessing { endpoint, message }) => {
                assert_eq!(endpoint, "enrich");
                assert!(message.contains("not text"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn set_header_overrides_without_touching_payload() {
        let msg = Message::new("body");
        match apply(
            TransformOp::SetHeader {
                name: "tenant".to_string(),
                value: serde_json::json!("acme"),
            },
            msg,
        ) {
            EndpointResult::Forward(out, 0) => {
                assert_eq!(out.header("tenant"), Some(&serde_json::json!("acme")));
                assert_eq!(out.payload().as_value(), Some(&serde_json::json!("body")));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn json_pointer_extracts_nested_value() {
        let msg = Message::new(serde_json::json!({"order": {"total": 42}}));
        match apply(
            TransformOp::JsonPointer {
                pointer: "/order/total".to_string(),
            },
            msg,
        ) {
            EndpointResult::Forward(out, 0) => {
                assert_eq!(out.payload().as_value(), Some(&serde_json::json!(42)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn json_pointer_miss_fails() {
        let msg = Message::new(serde_json::json!({"order": {}}));
        let result = apply(
            TransformOp::JsonPointer {
                pointer: "/order/total".to_string(),
            },
            msg,
        );
        assert!(matches!(result, EndpointResult::Fail(_)));
    }

    #[test]
    fn custom_transform_failure_becomes_fail() {
        let op = TransformOp::Custom(Arc::new(|_msg: &Message| {
            anyhow::bail!("collaborator exploded")
        }));
        match apply(op, Message::new("x")) {
            EndpointResult::Fail(RuntimeError::EndpointProcessing { message, .. }) => {
                assert!(message.contains("collaborator exploded"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
