// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decides when buffered entries are handed to the [`Dispatcher`].
//!
//! Two background loops trigger flushes:
//!
//! - the threshold watcher wakes on every buffer insert (and on a short poll
//!   tick) and sends a threshold-sized batch once `size >= threshold`;
//! - the flush timer ticks every `flush_interval` and sends everything that is
//!   buffered once an interval has passed without a successful flush.
//!
//! Both go through the same gate, so at most one delivery is in flight per
//! controller. A failed delivery leaves the entries buffered and starts a
//! cooldown during which neither loop tries again. Manual and shutdown flushes
//! still respect the gate but ignore the cooldown.

use derive_more::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::buffer::EntryBuffer;
use crate::config::Config;
use crate::dispatcher::{BatchPayload, DeliveryMetadata, Dispatcher};

/// Upper bound on how long the threshold watcher sleeps between checks when
/// no insert wakes it.
pub const THRESHOLD_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How many entries a single flush may take from the head of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushLimit {
    Batch(usize),
    All,
}

impl FlushLimit {
    fn max_count(self) -> usize {
        match self {
            FlushLimit::Batch(n) => n,
            FlushLimit::All => usize::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The dispatcher confirmed this many entries, which are now removed.
    Delivered(usize),
    /// Nothing was buffered.
    Empty,
    /// The dispatcher failed; entries stay buffered and the cooldown starts.
    Failed,
    /// Another flush held the gate.
    Busy,
    /// A recent failure is still cooling down.
    CoolingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
enum Trigger {
    #[display("threshold")]
    Threshold,
    #[display("timer")]
    Timer,
    #[display("manual")]
    Manual,
    #[display("shutdown")]
    Shutdown,
}

impl Trigger {
    fn respects_cooldown(self) -> bool {
        matches!(self, Trigger::Threshold | Trigger::Timer)
    }
}

#[derive(Debug, Clone, Copy)]
struct FlushTimes {
    last_success: Instant,
    last_failure: Option<Instant>,
}

/// The in-progress gate plus the flush timestamps of one controller.
#[derive(Debug)]
pub struct FlushState {
    in_progress: AtomicBool,
    times: Mutex<FlushTimes>,
    cooldown: Duration,
}

/// Holds the gate until dropped, on every exit path of a flush.
struct GateGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl FlushState {
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        FlushState {
            in_progress: AtomicBool::new(false),
            times: Mutex::new(FlushTimes {
                last_success: Instant::now(),
                last_failure: None,
            }),
            cooldown,
        }
    }

    fn times(&self) -> MutexGuard<'_, FlushTimes> {
        self.times.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_acquire(&self) -> Option<GateGuard<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GateGuard {
                flag: &self.in_progress,
            })
    }

    #[must_use]
    pub fn is_flushing(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Construction time until the first successful flush.
    #[must_use]
    pub fn last_success(&self) -> Instant {
        self.times().last_success
    }

    #[must_use]
    pub fn last_failure(&self) -> Option<Instant> {
        self.times().last_failure
    }

    #[must_use]
    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.times()
            .last_failure
            .is_some_and(|failed| now.saturating_duration_since(failed) < self.cooldown)
    }

    fn record_success(&self, now: Instant) {
        let mut times = self.times();
        times.last_success = now;
        times.last_failure = None;
    }

    fn record_failure(&self, now: Instant) {
        self.times().last_failure = Some(now);
    }
}

/// Everything a flush needs, shared by the loops and the controller handle.
struct FlushCore {
    buffer: Arc<EntryBuffer>,
    dispatcher: Arc<dyn Dispatcher>,
    metadata: DeliveryMetadata,
    state: FlushState,
    threshold: usize,
    flush_interval: Duration,
}

impl FlushCore {
    async fn flush(&self, limit: FlushLimit, trigger: Trigger) -> FlushOutcome {
        let Some(_gate) = self.state.try_acquire() else {
            return FlushOutcome::Busy;
        };
        if trigger.respects_cooldown() && self.state.in_cooldown(Instant::now()) {
            return FlushOutcome::CoolingDown;
        }

        let snapshot = self.buffer.snapshot(limit.max_count());
        if snapshot.is_empty() {
            return FlushOutcome::Empty;
        }

        let start_seq = snapshot.start_seq;
        let batch = BatchPayload::new(snapshot.entries, self.metadata.clone());
        let count = batch.len();
        debug!("Flushing {count} entries ({trigger})");
        match self.dispatcher.deliver(&batch).await {
            Ok(()) => {
                let removed = self.buffer.remove_front(start_seq, count);
                self.state.record_success(Instant::now());
                if removed < count {
                    debug!(
                        "Delivered {count} entries ({trigger}), {} of them were evicted in flight",
                        count - removed
                    );
                } else {
                    debug!("Delivered {count} entries ({trigger})");
                }
                FlushOutcome::Delivered(count)
            }
            Err(e) => {
                self.state.record_failure(Instant::now());
                warn!(
                    "Failed to deliver {count} entries ({trigger}): {e}. Keeping them buffered, next attempt in {} ms",
                    self.state.cooldown().as_millis()
                );
                FlushOutcome::Failed
            }
        }
    }

    async fn run_threshold_watcher(self: Arc<Self>, cancel: CancellationToken) {
        let mut poll = interval(THRESHOLD_POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.buffer.size() >= self.threshold {
                let outcome = self
                    .flush(FlushLimit::Batch(self.threshold), Trigger::Threshold)
                    .await;
                // A backlog drains batch after batch without waiting.
                if matches!(outcome, FlushOutcome::Delivered(_)) {
                    continue;
                }
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = self.buffer.added() => {}
                _ = poll.tick() => {}
            }
        }
        debug!("Threshold watcher stopped");
    }

    async fn run_flush_timer(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let since_success = Instant::now().saturating_duration_since(self.state.last_success());
            if since_success >= self.flush_interval {
                self.flush(FlushLimit::All, Trigger::Timer).await;
            }
        }
        debug!("Flush timer stopped");
    }
}

/// Owns the flush loops for one [`EntryBuffer`].
pub struct FlushController {
    core: Arc<FlushCore>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FlushController {
    /// Creates a controller without starting its loops.
    #[must_use]
    pub fn new(config: &Config, buffer: Arc<EntryBuffer>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        FlushController {
            core: Arc::new(FlushCore {
                buffer,
                dispatcher,
                metadata: DeliveryMetadata::from_config(config),
                state: FlushState::new(config.cooldown),
                threshold: config.threshold.max(1),
                flush_interval: config.flush_interval,
            }),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the threshold watcher and the flush timer on the current tokio
    /// runtime. Calling it again while the loops run does nothing.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            warn!("Flush loops already running");
            return;
        }
        if self.cancel.is_cancelled() {
            warn!("Flush controller was shut down, not starting loops");
            return;
        }

        tasks.push(tokio::spawn(
            Arc::clone(&self.core).run_threshold_watcher(self.cancel.clone()),
        ));
        tasks.push(tokio::spawn(
            Arc::clone(&self.core).run_flush_timer(self.cancel.clone()),
        ));
        debug!(
            "Flush loops started: threshold {}, interval {} ms, cooldown {} ms",
            self.core.threshold,
            self.core.flush_interval.as_millis(),
            self.core.state.cooldown.as_millis()
        );
    }

    /// Flushes up to `limit` entries. Respects the gate, ignores the cooldown.
    pub async fn flush(&self, limit: FlushLimit) -> FlushOutcome {
        self.core.flush(limit, Trigger::Manual).await
    }

    /// Flushes everything buffered, ignoring the cooldown. Still returns
    /// [`FlushOutcome::Busy`] when another flush is in flight.
    pub async fn flush_now(&self) -> FlushOutcome {
        self.core.flush(FlushLimit::All, Trigger::Manual).await
    }

    #[must_use]
    pub fn state(&self) -> &FlushState {
        &self.core.state
    }

    #[must_use]
    pub fn buffer(&self) -> &Arc<EntryBuffer> {
        &self.core.buffer
    }

    /// Stops both loops, waits for them to finish, then makes one last attempt
    /// to deliver everything still buffered.
    pub async fn shutdown(&self) -> FlushOutcome {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.drain(..).collect()
        };
        for task in tasks {
            if let Err(e) = task.await {
                error!("Flush loop ended abnormally: {e}");
            }
        }

        let outcome = self.core.flush(FlushLimit::All, Trigger::Shutdown).await;
        match outcome {
            FlushOutcome::Delivered(n) => debug!("Final flush delivered {n} entries"),
            FlushOutcome::Failed => warn!(
                "Final flush failed, dropping {} entries",
                self.core.buffer.size()
            ),
            _ => {}
        }
        outcome
    }
}

impl Drop for FlushController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
