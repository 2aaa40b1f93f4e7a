//! Dispatcher: owns the running lifecycle and drives message delivery.
//!
//! Direct and pubsub delivery happens inline on the sending task as an
//! iterative work-queue walk (no recursion, so arbitrarily long chains and
//! cyclic routes are fine). Each queued channel gets one dedicated worker
//! task, which preserves per-channel FIFO order while channels run
//! concurrently. Endpoint failures are retried per policy, then routed to
//! the error flow; they never propagate past this module.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fluxline_types::envelope::DeadLetterOrigin;
use fluxline_types::{
    DeadLetter, FlowSnapshot, FlowStats, Message, RuntimeError, ShutdownError,
};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::channel::{EnqueueOutcome, QueueReceiver};
use crate::config::types::{ChannelKindConfig, UnsubscribedPolicy};
use crate::endpoint::aggregator::ExpiredGroup;
use crate::endpoint::{Endpoint, EndpointResult};
use crate::errors::{self, compute_backoff};
use crate::graph::Graph;

const STATE_STOPPED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_DRAINING: u8 = 2;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);
const WORKER_JOIN_GRACE: Duration = Duration::from_secs(1);

/// One unit of delivery work.
enum Work {
    /// Deliver a message to a channel. `origin` is the sending endpoint, or
    /// `None` for ingress sends.
    Channel {
        name: String,
        msg: Message,
        origin: Option<String>,
    },
    /// Process a message at an endpoint. `surface_rejection` is false for
    /// pubsub deliveries, whose filter rejections do not affect the send
    /// result.
    Endpoint {
        id: String,
        msg: Message,
        surface_rejection: bool,
    },
}

struct Core {
    graph: Graph,
    stats: FlowStats,
    dead_letters: Mutex<Vec<DeadLetter>>,
    state: AtomicU8,
}

impl Core {
    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }
}

/// Runs a built [`Graph`]: start, inject, stop. One dispatcher instance per
/// pipeline run; there is no global runtime state.
pub struct Dispatcher {
    core: Arc<Core>,
    shutdown: watch::Sender<bool>,
    workers: JoinSet<()>,
    launched: bool,
}

impl Dispatcher {
    #[must_use]
    pub fn new(graph: Graph) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            core: Arc::new(Core {
                graph,
                stats: FlowStats::default(),
                dead_letters: Mutex::new(Vec::new()),
                state: AtomicU8::new(STATE_STOPPED),
            }),
            shutdown,
            workers: JoinSet::new(),
            launched: false,
        }
    }

    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.core.graph
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.core.state() == STATE_RUNNING
    }

    /// Point-in-time flow counters.
    #[must_use]
    pub fn stats(&self) -> FlowSnapshot {
        self.core.stats.snapshot()
    }

    /// Copy of the dead-letter store.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.core
            .dead_letters
            .lock()
            .map(|dl| dl.clone())
            .unwrap_or_default()
    }

    /// Mark every channel, then every endpoint, RUNNING, and spawn the
    /// queued-channel workers and the aggregator sweeper.
    ///
    /// A dispatcher runs once; starting again after `stop` is a no-op.
    pub fn start(&mut self) {
        if self.launched {
            tracing::warn!("Dispatcher already started");
            return;
        }
        self.launched = true;
        tracing::info!(pipeline = self.core.graph.pipeline(), "Starting dispatcher");

        // Channels before endpoints: no endpoint can send before its
        // targets exist.
        for channel in self.core.graph.channels() {
            channel.set_running(true);
        }
        for endpoint in self.core.graph.endpoints() {
            endpoint.set_running(true);
        }

        let mut workers_to_spawn = Vec::new();
        for channel in self.core.graph.channels() {
            if channel.kind() != ChannelKindConfig::Queued {
                continue;
            }
            let Some(rx) = channel.take_receiver() else {
                tracing::warn!(
                    channel = channel.name(),
                    "Queue receiver already taken, skipping worker"
                );
                continue;
            };
            workers_to_spawn.push((channel.name().to_string(), rx));
        }
        for (name, rx) in workers_to_spawn {
            self.spawn_worker(name, rx);
        }
        self.spawn_sweeper();

        self.core.state.store(STATE_RUNNING, Ordering::Release);
    }

    /// Inject a message into a named channel.
    ///
    /// Returns `Ok(false)` when a filter on a synchronous path rejected the
    /// message, `Ok(true)` otherwise.
    ///
    /// # Errors
    ///
    /// Fails when the dispatcher is not running, the channel is unknown, or
    /// a bounded queued channel rejected the send under its backpressure
    /// policy.
    pub async fn send(&self, channel: &str, msg: Message) -> Result<bool, RuntimeError> {
        if self.core.state() != STATE_RUNNING {
            return Err(RuntimeError::EndpointProcessing {
                endpoint: channel.to_string(),
                message: "dispatcher is not running".to_string(),
            });
        }
        self.core.stats.record_sent();
        let mut queue = VecDeque::new();
        queue.push_back(Work::Channel {
            name: channel.to_string(),
            msg,
            origin: None,
        });
        walk(&self.core, queue).await
    }

    /// Wait until every queued channel is empty, up to `timeout`.
    pub async fn quiesce(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.pending() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    fn pending(&self) -> usize {
        self.core.graph.channels().map(|c| c.depth()).sum()
    }

    /// Stop the dispatcher: reject new ingress, drain queued messages within
    /// the grace period, then stop endpoints and channels in reverse start
    /// order. Messages still queued after the grace period are recorded in
    /// the dead-letter store and dropped with a warning.
    ///
    /// # Errors
    ///
    /// [`ShutdownError::DrainTimeoutExceeded`] when the grace period lapsed
    /// with messages pending; forced shutdown has already proceeded.
    pub async fn stop(&mut self, grace: Duration) -> Result<(), ShutdownError> {
        if self.core.state() == STATE_STOPPED {
            return Ok(());
        }
        self.core.state.store(STATE_DRAINING, Ordering::Release);
        tracing::info!(
            pipeline = self.core.graph.pipeline(),
            grace_ms = grace.as_millis() as u64,
            "Stopping dispatcher, draining queued messages"
        );

        let deadline = Instant::now() + grace;
        while self.pending() > 0 && Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        let pending = self.pending();

        // Open aggregation groups cannot complete anymore; capture them.
        for endpoint in self.core.graph.endpoints() {
            if let Some(agg) = endpoint.as_aggregator() {
                for group in agg.drain_all() {
                    for member in group.members {
                        record_dead_letter(
                            &self.core,
                            DeadLetterOrigin::Endpoint(endpoint.id().to_string()),
                            &member,
                            "aggregation group still open at shutdown",
                            0,
                        );
                    }
                }
            }
        }

        // Reverse of start order: endpoints first, then channels.
        for endpoint in self.core.graph.endpoints() {
            endpoint.set_running(false);
        }
        let _ = self.shutdown.send(true);

        let join_all = async {
            while self.workers.join_next().await.is_some() {}
        };
        if tokio::time::timeout(WORKER_JOIN_GRACE, join_all).await.is_err() {
            tracing::warn!("Worker join grace lapsed, aborting workers");
            self.workers.abort_all();
        }

        for channel in self.core.graph.channels() {
            channel.set_running(false);
        }
        self.core.state.store(STATE_STOPPED, Ordering::Release);

        if pending > 0 {
            let err = ShutdownError::DrainTimeoutExceeded { pending };
            tracing::warn!(pending, "{err}");
            Err(err)
        } else {
            Ok(())
        }
    }

    fn spawn_worker(&mut self, channel_name: String, mut rx: QueueReceiver) {
        let core = Arc::clone(&self.core);
        let mut shutdown = self.shutdown.subscribe();
        self.workers.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        drain_to_dead_letters(&core, &channel_name, &mut rx);
                        break;
                    }
                    maybe = rx.recv() => {
                        let Some(msg) = maybe else { break };
                        let items: VecDeque<Work> = core
                            .graph
                            .channel(&channel_name)
                            .map(|channel| {
                                channel
                                    .subscribers()
                                    .iter()
                                    .map(|id| Work::Endpoint {
                                        id: id.clone(),
                                        msg: msg.clone(),
                                        surface_rejection: false,
                                    })
                                    .collect()
                            })
                            .unwrap_or_default();
                        let _ = walk(&core, items).await;
                        if let Some(channel) = core.graph.channel(&channel_name) {
                            channel.decrement_depth();
                        }
                    }
                }
            }
        });
    }

    fn spawn_sweeper(&mut self) {
        let core = Arc::clone(&self.core);
        let mut shutdown = self.shutdown.subscribe();
        let period = self.core.graph.sweep_interval();
        self.workers.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => sweep_aggregators(&core).await,
                }
            }
        });
    }
}

/// Flush expired and evicted aggregation groups into the error flow.
async fn sweep_aggregators(core: &Core) {
    let now = Instant::now();
    for endpoint in core.graph.endpoints() {
        let Some(agg) = endpoint.as_aggregator() else {
            continue;
        };
        let mut groups = agg.expire(now);
        groups.extend(agg.take_evicted());
        if groups.is_empty() {
            continue;
        }
        let mut staged = VecDeque::new();
        for group in groups {
            flush_group(core, endpoint, group, &mut staged);
        }
        let _ = walk(core, staged).await;
    }
}

fn flush_group(core: &Core, endpoint: &Endpoint, group: ExpiredGroup, out: &mut VecDeque<Work>) {
    let err = RuntimeError::AggregationTimeout {
        endpoint: endpoint.id().to_string(),
        correlation_key: group.key.clone(),
    };
    tracing::warn!(
        endpoint = endpoint.id(),
        correlation = group.key.as_str(),
        members = group.members.len(),
        "Flushing incomplete aggregation group"
    );
    for member in &group.members {
        fail_message(core, endpoint.id(), member, &err, 1, out);
    }
}

fn drain_to_dead_letters(core: &Core, channel_name: &str, rx: &mut QueueReceiver) {
    let mut drained = 0usize;
    while let Some(msg) = rx.try_recv() {
        record_dead_letter(
            core,
            DeadLetterOrigin::ChannelDrain(channel_name.to_string()),
            &msg,
            "queued at shutdown after drain grace period",
            0,
        );
        if let Some(channel) = core.graph.channel(channel_name) {
            channel.decrement_depth();
        }
        drained += 1;
    }
    if drained > 0 {
        tracing::warn!(
            channel = channel_name,
            drained,
            "Dropped undrained queued messages at shutdown"
        );
    }
}

fn record_dead_letter(
    core: &Core,
    origin: DeadLetterOrigin,
    msg: &Message,
    cause: &str,
    attempts: u32,
) {
    core.stats.record_dead_lettered();
    if let Ok(mut store) = core.dead_letters.lock() {
        store.push(errors::dead_letter(origin, msg, cause, attempts));
    }
}

/// Drive a work queue to completion. Returns `false` when any filter on the
/// walk rejected a message. `Err` only surfaces for ingress sends (items
/// with no origin endpoint); internal failures are absorbed by the error
/// flow.
async fn walk(core: &Core, mut queue: VecDeque<Work>) -> Result<bool, RuntimeError> {
    let mut accepted = true;
    while let Some(item) = queue.pop_front() {
        match item {
            Work::Channel { name, msg, origin } => {
                if !deliver_to_channel(core, &name, msg, origin.as_deref(), &mut queue).await? {
                    accepted = false;
                }
            }
            Work::Endpoint {
                id,
                msg,
                surface_rejection,
            } => {
                if !run_endpoint(core, &id, msg, &mut queue).await && surface_rejection {
                    accepted = false;
                }
            }
        }
    }
    Ok(accepted)
}

async fn deliver_to_channel(
    core: &Core,
    name: &str,
    msg: Message,
    origin: Option<&str>,
    out: &mut VecDeque<Work>,
) -> Result<bool, RuntimeError> {
    let Some(channel) = core.graph.channel(name) else {
        // Post-build this only happens for a bad ingress channel name.
        return Err(RuntimeError::RoutingUnresolved {
            endpoint: origin.unwrap_or("ingress").to_string(),
            detail: format!("unknown channel '{name}'"),
        });
    };

    if channel.subscribers().is_empty() {
        match channel.on_unsubscribed() {
            UnsubscribedPolicy::Drop => {
                tracing::warn!(channel = name, "Dropping message sent to channel with no subscribers");
                return Ok(true);
            }
            UnsubscribedPolicy::Fail => {
                let err = RuntimeError::EndpointProcessing {
                    endpoint: origin.unwrap_or("ingress").to_string(),
                    message: format!("channel '{name}' has no subscribers"),
                };
                return match origin {
                    None => Err(err),
                    Some(origin_id) => {
                        fail_message(core, origin_id, &msg, &err, 1, out);
                        Ok(true)
                    }
                };
            }
        }
    }

    match channel.kind() {
        // Both deliver to every subscriber in registration order; only
        // direct sends report filter rejections back to the sender.
        ChannelKindConfig::Direct | ChannelKindConfig::Pubsub => {
            let surface_rejection = channel.kind() == ChannelKindConfig::Direct;
            for id in channel.subscribers() {
                out.push_back(Work::Endpoint {
                    id: id.clone(),
                    msg: msg.clone(),
                    surface_rejection,
                });
            }
            Ok(true)
        }
        ChannelKindConfig::Queued => {
            if !channel.is_running() {
                tracing::warn!(channel = name, "Dropping message sent to stopped channel");
                return Ok(true);
            }
            match channel.enqueue(msg.clone()).await {
                Ok(EnqueueOutcome::Enqueued) => Ok(true),
                Ok(EnqueueOutcome::Dropped) => {
                    core.stats.record_dropped_capacity();
                    tracing::warn!(channel = name, "Channel at capacity, dropping message");
                    Ok(true)
                }
                Err(err) => match origin {
                    None => Err(err),
                    Some(origin_id) => {
                        fail_message(core, origin_id, &msg, &err, 1, out);
                        Ok(true)
                    }
                },
            }
        }
    }
}

/// Process one message at one endpoint, applying the retry policy, and stage
/// any follow-on deliveries. Returns `false` for a filter rejection.
async fn run_endpoint(core: &Core, id: &str, msg: Message, out: &mut VecDeque<Work>) -> bool {
    let Some(endpoint) = core.graph.endpoint(id) else {
        tracing::warn!(endpoint = id, "Unknown endpoint in delivery walk");
        return true;
    };
    if !endpoint.is_running() {
        tracing::warn!(endpoint = id, "Dropping message for stopped endpoint");
        return true;
    }

    let retry = endpoint.retry();
    // Messages already on the error flow never retry; a second failure goes
    // straight to the dead-letter store.
    let max_attempts = if errors::is_error_flow_message(&msg) {
        1
    } else {
        retry.max_attempts
    };

    let mut attempt = 1u32;
    let result = loop {
        match endpoint.process(msg.clone()).await {
            EndpointResult::Fail(err) if attempt < max_attempts => {
                core.stats.record_retried();
                let delay = compute_backoff(retry.backoff, attempt);
                tracing::warn!(
                    endpoint = id,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Endpoint failure, will retry"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => break other,
        }
    };

    let accepted = match result {
        EndpointResult::Forward(forwarded, index) => {
            core.stats.record_delivered();
            if endpoint.outputs().is_empty() {
                // Terminal endpoint: the flow ends here.
                true
            } else {
                match endpoint.outputs().get(index) {
                    Some(target) => {
                        out.push_back(Work::Channel {
                            name: target.clone(),
                            msg: forwarded,
                            origin: Some(id.to_string()),
                        });
                        true
                    }
                    None => {
                        let err = RuntimeError::RoutingUnresolved {
                            endpoint: id.to_string(),
                            detail: format!("output index {index} out of range"),
                        };
                        fail_message(core, id, &msg, &err, attempt, out);
                        true
                    }
                }
            }
        }
        EndpointResult::ForwardAll(children) => {
            core.stats.record_delivered();
            if let Some(target) = endpoint.outputs().first() {
                for child in children {
                    core.stats.record_sent();
                    out.push_back(Work::Channel {
                        name: target.clone(),
                        msg: child,
                        origin: Some(id.to_string()),
                    });
                }
            }
            true
        }
        EndpointResult::Drop => {
            if endpoint.is_filter() {
                core.stats.record_filtered();
                if let Some(discard) = endpoint.discard_channel() {
                    out.push_back(Work::Channel {
                        name: discard.to_string(),
                        msg,
                        origin: Some(id.to_string()),
                    });
                }
                false
            } else {
                // Aggregator holding a partial group.
                true
            }
        }
        EndpointResult::Fail(err) => {
            fail_message(core, id, &msg, &err, attempt, out);
            true
        }
    };

    // Capacity evictions surface through the error flow immediately.
    if let Some(agg) = endpoint.as_aggregator() {
        for group in agg.take_evicted() {
            flush_group(core, endpoint, group, out);
        }
    }

    accepted
}

/// Route a failed message into the error flow (or the dead-letter store when
/// the error flow cannot absorb it). Never propagates.
fn fail_message(
    core: &Core,
    endpoint_id: &str,
    msg: &Message,
    err: &RuntimeError,
    attempts: u32,
    out: &mut VecDeque<Work>,
) {
    core.stats.record_failed();
    tracing::error!(
        endpoint = endpoint_id,
        kind = err.kind(),
        attempts,
        error = %err,
        "Endpoint failure entering error flow"
    );

    if errors::is_error_flow_message(msg) {
        record_dead_letter(
            core,
            DeadLetterOrigin::Endpoint(endpoint_id.to_string()),
            msg,
            &err.to_string(),
            attempts,
        );
        if let Some(dead_letter) = core.graph.dead_letter_channel() {
            let already_there = core
                .graph
                .endpoint(endpoint_id)
                .is_some_and(|e| e.input() == dead_letter);
            if !already_there {
                out.push_back(Work::Channel {
                    name: dead_letter.to_string(),
                    msg: msg.clone(),
                    origin: Some(endpoint_id.to_string()),
                });
            }
        }
        return;
    }

    let context = errors::error_context(msg, err, endpoint_id, attempts);
    let error_msg = errors::error_flow_message(msg, &context);
    if let Some(error_channel) = core.graph.error_channel() {
        out.push_back(Work::Channel {
            name: error_channel.to_string(),
            msg: error_msg,
            origin: Some(endpoint_id.to_string()),
        });
    } else if let Some(dead_letter) = core.graph.dead_letter_channel() {
        out.push_back(Work::Channel {
            name: dead_letter.to_string(),
            msg: error_msg,
            origin: Some(endpoint_id.to_string()),
        });
    } else {
        tracing::error!(
            endpoint = endpoint_id,
            "No error channel configured, dropping failed message"
        );
        record_dead_letter(
            core,
            DeadLetterOrigin::Endpoint(endpoint_id.to_string()),
            msg,
            &err.to_string(),
            attempts,
        );
    }
}
