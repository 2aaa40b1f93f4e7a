//! Filter endpoint: predicate gate with optional discard routing.

use std::sync::Arc;

use fluxline_types::Message;

use crate::endpoint::{EndpointResult, header_key};
use crate::handler::PredicateFn;

/// Resolved filter predicate.
pub(crate) enum Predicate {
    NonEmpty,
    HeaderExists(String),
    HeaderEquals {
        header: String,
        value: serde_json::Value,
    },
    Custom(Arc<PredicateFn>),
}

/// Forwards messages satisfying the predicate, drops the rest (optionally
/// into a discard channel).
pub struct Filter {
    predicate: Predicate,
    discard_channel: Option<String>,
}

impl Filter {
    pub(crate) fn new(predicate: Predicate, discard_channel: Option<String>) -> Self {
        Self {
            predicate,
            discard_channel,
        }
    }

    pub(crate) fn discard_channel(&self) -> Option<&str> {
        self.discard_channel.as_deref()
    }

    pub(crate) fn accepts(&self, msg: &Message) -> bool {
        match &self.predicate {
            Predicate::NonEmpty => !msg.payload().is_empty(),
            Predicate::HeaderExists(header) => msg.header(header).is_some(),
            Predicate::HeaderEquals { header, value } => msg
                .header(header)
                .is_some_and(|actual| header_key(actual) == header_key(value)),
            Predicate::Custom(f) => f(msg),
        }
    }

    pub(crate) fn apply(&self, msg: Message) -> EndpointResult {
        if self.accepts(&msg) {
            EndpointResult::Forward(msg, 0)
        } else {
            EndpointResult::Drop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_rejects_null_payload() {
        let filter = Filter::new(Predicate::NonEmpty, None);
        assert!(matches!(
            filter.apply(Message::new(serde_json::Value::Null)),
            EndpointResult::Drop
        ));
        assert!(matches!(
            filter.apply(Message::new("content")),
            EndpointResult::Forward(_, 0)
        ));
    }

    #[test]
    fn header_exists_gate() {
        let filter = Filter::new(Predicate::HeaderExists("order_id".to_string()), None);
        let without = Message::new("x");
        let with = without.with_header("order_id", serde_json::json!(9));

        assert!(!filter.accepts(&without));
        assert!(filter.accepts(&with));
    }

    #[test]
    fn header_equals_compares_scalars_as_keys() {
        let filter = Filter::new(
            Predicate::HeaderEquals {
                header: "priority".to_string(),
                value: serde_json::json!("high"),
            },
            None,
        );
        let high = Message::new("x").with_header("priority", serde_json::json!("high"));
        let low = Message::new("x").with_header("priority", serde_json::json!("low"));

        assert!(filter.accepts(&high));
        assert!(!filter.accepts(&low));
    }

    #[test]
    fn custom_predicate() {
        let filter = Filter::new(
            Predicate::Custom(Arc::new(|msg: &Message| {
                msg.payload().as_value().is_some_and(|v| v.is_number())
            })),
            Some("rejects".to_string()),
        );
        assert!(filter.accepts(&Message::new(serde_json::json!(5))));
        assert!(!filter.accepts(&Message::new("text")));
        assert_eq!(filter.discard_channel(), Some("rejects"));
    }

    #[test]
    fn filtering_is_stable_over_a_sequence() {
        let filter = Filter::new(
            Predicate::HeaderEquals {
                header: "keep".to_string(),
                value: serde_json::json!(true),
            },
            None,
        );
        let input: Vec<Message> = (0..6)
            .map(|i| {
                Message::new(serde_json::json!(i))
                    .with_header("keep", serde_json::json!(i % 2 == 0))
            })
            .collect();

        let kept: Vec<i64> = input
            .iter()
            .filter(|m| filter.accepts(m))
            .filter_map(|m| m.payload().as_value().and_then(serde_json::Value::as_i64))
            .collect();
        assert_eq!(kept, vec![0, 2, 4]);
    }
}
