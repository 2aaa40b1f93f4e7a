//! Service activator: invokes an external collaborator with the payload.

use std::sync::Arc;
use std::time::Duration;

use fluxline_types::{Message, RuntimeError};

use crate::endpoint::EndpointResult;
use crate::handler::ServiceHandler;

/// Calls a registered [`ServiceHandler`] on a blocking thread and wraps the
/// reply payload as the forwarded message.
pub struct ServiceActivator {
    service: Arc<dyn ServiceHandler>,
    timeout: Duration,
}

impl ServiceActivator {
    pub(crate) fn new(service: Arc<dyn ServiceHandler>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    pub(crate) async fn invoke(&self, id: &str, msg: &Message) -> EndpointResult {
        let service = Arc::clone(&self.service);
        let payload = msg.payload().clone();
        let headers = msg.headers().clone();
        let call = tokio::task::spawn_blocking(move || service.call(&payload, &headers));

        // On timeout the blocking call is abandoned, not interrupted; the
        // handler thread finishes on its own.
        let fail = |message: String| {
            EndpointResult::Fail(RuntimeError::EndpointProcessing {
                endpoint: id.to_string(),
                message,
            })
        };
        match tokio::time::timeout(self.timeout, call).await {
            Err(_) => fail(format!(
                "service call timed out after {:?}",
                self.timeout
            )),
            Ok(Err(join_err)) => fail(format!("service call panicked: {join_err}")),
            Ok(Ok(Err(service_err))) => fail(service_err.to_string()),
            Ok(Ok(Ok(reply))) => EndpointResult::Forward(msg.with_payload(reply), 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxline_types::{Headers, Payload};

    #[tokio::test]
    async fn wraps_reply_as_forwarded_message() {
        let activator = ServiceActivator::new(
            Arc::new(|payload: &Payload, _headers: &Headers| {
                let text = payload
                    .as_value()
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default();
                Ok(Payload::from(format!("{text}!")))
            }),
            Duration::from_secs(1),
        );

        let msg = Message::new("pong").with_header("tenant", serde_json::json!("acme"));
        match activator.invoke("notify", &msg).await {
            EndpointResult::Forward(out, 0) => {
                assert_eq!(out.payload().as_value(), Some(&serde_json::json!("pong!")));
                // Reply inherits request headers
                assert_eq!(out.header("tenant"), Some(&serde_json::json!("acme")));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn collaborator_error_becomes_fail() {
        let activator = ServiceActivator::new(
            Arc::new(|_payload: &Payload, _headers: &Headers| {
                anyhow::bail!("downstream unavailable")
            }),
            Duration::from_secs(1),
        );

        match activator.invoke("notify", &Message::new("x")).await {
            EndpointResult::Fail(RuntimeError::EndpointProcessing { endpoint, message }) => {
                assert_eq!(endpoint, "notify");
                assert!(message.contains("downstream unavailable"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_collaborator_times_out() {
        let activator = ServiceActivator::new(
            Arc::new(|payload: &Payload, _headers: &Headers| {
                std::thread::sleep(Duration::from_millis(500));
                Ok(payload.clone())
            }),
            Duration::from_millis(50),
        );

        match activator.invoke("notify", &Message::new("x")).await {
            EndpointResult::Fail(RuntimeError::EndpointProcessing { message, .. }) => {
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
