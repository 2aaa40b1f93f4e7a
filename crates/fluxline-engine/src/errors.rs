//! Retry policy, backoff computation, and error-flow message construction.

use std::time::{Duration, SystemTime};

use fluxline_types::envelope::DeadLetterOrigin;
use fluxline_types::{headers, DeadLetter, ErrorMessage, Message, RuntimeError};

use crate::config::types::BackoffClass;

const BACKOFF_FAST_BASE_MS: u64 = 100;
const BACKOFF_NORMAL_BASE_MS: u64 = 1_000;
const BACKOFF_SLOW_BASE_MS: u64 = 5_000;
const BACKOFF_MAX_MS: u64 = 60_000;

/// Resolved per-endpoint retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. 1 disables retry.
    pub max_attempts: u32,
    pub backoff: BackoffClass,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffClass::Normal,
        }
    }
}

/// Compute the retry delay for an attempt: exponential within the backoff
/// class, capped at 60s.
pub(crate) fn compute_backoff(class: BackoffClass, attempt: u32) -> Duration {
    let base_ms: u64 = match class {
        BackoffClass::Fast => BACKOFF_FAST_BASE_MS,
        BackoffClass::Normal => BACKOFF_NORMAL_BASE_MS,
        BackoffClass::Slow => BACKOFF_SLOW_BASE_MS,
    };

    let delay_ms = base_ms.saturating_mul(2u64.pow(attempt.saturating_sub(1).min(16)));
    Duration::from_millis(delay_ms.min(BACKOFF_MAX_MS))
}

/// True once a message is already traveling the error flow; such messages
/// never retry and never re-enter the error channel.
pub(crate) fn is_error_flow_message(msg: &Message) -> bool {
    msg.header(headers::ERROR_ENDPOINT).is_some()
}

/// Typed error context for a failed message.
pub(crate) fn error_context(
    msg: &Message,
    err: &RuntimeError,
    endpoint: &str,
    attempts: u32,
) -> ErrorMessage {
    ErrorMessage {
        original_id: msg.id(),
        payload: msg.payload().render_json(),
        failed_endpoint: endpoint.to_string(),
        cause: err.to_string(),
        attempts,
    }
}

/// Wrap a failed message for the error channel: the original payload travels
/// on, with the [`ErrorMessage`] context spread into headers.
pub(crate) fn error_flow_message(msg: &Message, ctx: &ErrorMessage) -> Message {
    msg.with_headers([
        (
            headers::ERROR_ENDPOINT.to_string(),
            serde_json::json!(ctx.failed_endpoint),
        ),
        (
            headers::ERROR_CAUSE.to_string(),
            serde_json::json!(ctx.cause),
        ),
        (
            headers::ERROR_ATTEMPTS.to_string(),
            serde_json::json!(ctx.attempts),
        ),
        (
            headers::ORIGINAL_ID.to_string(),
            serde_json::json!(ctx.original_id.to_string()),
        ),
    ])
}

/// Terminal record for the dead-letter store.
pub(crate) fn dead_letter(origin: DeadLetterOrigin, msg: &Message, cause: &str, attempts: u32) -> DeadLetter {
    DeadLetter {
        origin,
        message_id: msg.id(),
        payload: msg.payload().render_json(),
        cause: cause.to_string(),
        attempts,
        failed_at: SystemTime::now(),
    }
}
