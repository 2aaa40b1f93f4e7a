//! Runtime channel: named conduit with per-kind delivery semantics.
//!
//! Direct and pubsub channels carry no state beyond their subscriber list;
//! delivery happens synchronously on the sender's task. Queued channels own a
//! tokio mpsc queue drained by a dedicated dispatcher worker.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use fluxline_types::{Message, RuntimeError};
use tokio::sync::mpsc;

use crate::config::types::{ChannelKindConfig, UnsubscribedPolicy};

/// Resolved backpressure policy for a bounded queued channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// Wait for space, up to the timeout.
    Block(Duration),
    /// Discard the message and log.
    Drop,
    /// Fail the send.
    Fail,
}

/// Result of a queued enqueue attempt that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnqueueOutcome {
    Enqueued,
    /// Discarded by the `drop` policy.
    Dropped,
}

enum QueueSender {
    Bounded(mpsc::Sender<Message>),
    Unbounded(mpsc::UnboundedSender<Message>),
}

/// Receiving half of a queued channel, taken once by its worker.
pub(crate) enum QueueReceiver {
    Bounded(mpsc::Receiver<Message>),
    Unbounded(mpsc::UnboundedReceiver<Message>),
}

impl QueueReceiver {
    pub(crate) async fn recv(&mut self) -> Option<Message> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Non-blocking receive, used when draining at shutdown.
    pub(crate) fn try_recv(&mut self) -> Option<Message> {
        match self {
            Self::Bounded(rx) => rx.try_recv().ok(),
            Self::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}

struct QueueHandle {
    tx: QueueSender,
    rx: Mutex<Option<QueueReceiver>>,
}

/// Named conduit between endpoints. Owned by the graph; immutable after
/// build apart from the running flag and queue depth.
pub struct Channel {
    name: String,
    kind: ChannelKindConfig,
    backpressure: Backpressure,
    on_unsubscribed: UnsubscribedPolicy,
    subscribers: Vec<String>,
    queue: Option<QueueHandle>,
    running: AtomicBool,
    depth: AtomicUsize,
}

impl Channel {
    pub(crate) fn new(
        name: String,
        kind: ChannelKindConfig,
        capacity: Option<usize>,
        backpressure: Backpressure,
        on_unsubscribed: UnsubscribedPolicy,
        subscribers: Vec<String>,
    ) -> Self {
        let queue = (kind == ChannelKindConfig::Queued).then(|| match capacity {
            Some(bound) => {
                let (tx, rx) = mpsc::channel(bound);
                QueueHandle {
                    tx: QueueSender::Bounded(tx),
                    rx: Mutex::new(Some(QueueReceiver::Bounded(rx))),
                }
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                QueueHandle {
                    tx: QueueSender::Unbounded(tx),
                    rx: Mutex::new(Some(QueueReceiver::Unbounded(rx))),
                }
            }
        });

        Self {
            name,
            kind,
            backpressure,
            on_unsubscribed,
            subscribers,
            queue,
            running: AtomicBool::new(false),
            depth: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> ChannelKindConfig {
        self.kind
    }

    #[must_use]
    pub fn subscribers(&self) -> &[String] {
        &self.subscribers
    }

    #[must_use]
    pub fn on_unsubscribed(&self) -> UnsubscribedPolicy {
        self.on_unsubscribed
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Messages enqueued but not yet fully processed by the worker.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub(crate) fn decrement_depth(&self) {
        self.depth.fetch_sub(1, Ordering::AcqRel);
    }

    /// Take the queue receiver; the dispatcher worker calls this once at
    /// start.
    pub(crate) fn take_receiver(&self) -> Option<QueueReceiver> {
        let handle = self.queue.as_ref()?;
        handle.rx.lock().ok()?.take()
    }

    /// Enqueue onto a queued channel, applying the backpressure policy.
    pub(crate) async fn enqueue(&self, msg: Message) -> Result<EnqueueOutcome, RuntimeError> {
        let Some(queue) = &self.queue else {
            return Err(RuntimeError::EndpointProcessing {
                endpoint: self.name.clone(),
                message: "enqueue on a non-queued channel".to_string(),
            });
        };

        // A closed queue only happens after shutdown; it surfaces as a
        // capacity failure on the sender.
        let outcome = match &queue.tx {
            QueueSender::Unbounded(tx) => match tx.send(msg) {
                Ok(()) => EnqueueOutcome::Enqueued,
                Err(_) => return Err(self.at_capacity()),
            },
            QueueSender::Bounded(tx) => match self.backpressure {
                Backpressure::Block(timeout) => {
                    match tokio::time::timeout(timeout, tx.send(msg)).await {
                        Ok(Ok(())) => EnqueueOutcome::Enqueued,
                        Ok(Err(_)) | Err(_) => return Err(self.at_capacity()),
                    }
                }
                Backpressure::Drop => match tx.try_send(msg) {
                    Ok(()) => EnqueueOutcome::Enqueued,
                    Err(mpsc::error::TrySendError::Full(_)) => EnqueueOutcome::Dropped,
                    Err(mpsc::error::TrySendError::Closed(_)) => return Err(self.at_capacity()),
                },
                Backpressure::Fail => match tx.try_send(msg) {
                    Ok(()) => EnqueueOutcome::Enqueued,
                    Err(_) => return Err(self.at_capacity()),
                },
            },
        };

        if outcome == EnqueueOutcome::Enqueued {
            self.depth.fetch_add(1, Ordering::AcqRel);
        }
        Ok(outcome)
    }

    fn at_capacity(&self) -> RuntimeError {
        RuntimeError::ChannelCapacityExceeded {
            channel: self.name.clone(),
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("subscribers", &self.subscribers)
            .field("running", &self.is_running())
            .field("depth", &self.depth())
            .finish()
    }
}
