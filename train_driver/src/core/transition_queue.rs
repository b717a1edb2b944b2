//! Bounded FIFO transition queue between the actor and the learner.
//!
//! # Design
//!
//! - Backed by a bounded `crossbeam-channel`, so at most `capacity`
//!   transitions are ever buffered.
//! - The producer either blocks on a full queue or drops and counts,
//!   depending on [`Overflow`].
//! - The consumer waits until a full batch is buffered, then takes it in
//!   one go. Partial batches never leave the queue.
//! - Every blocking point polls the [`CancelToken`] and the closed flag,
//!   and reports a [`Stall`](IncidentKind::Stall) incident once per wait
//!   when the stall threshold elapses.
//!
//! ```text
//! Actor ── push ──> [ t0 t1 t2 ... t(C-1) ] ── pop_batch(n) ──> Learner
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::core::cancel::CancelToken;
use crate::core::counter::SharedCounter;
use crate::incident::{Incident, IncidentKind, Incidents};

/// Interval at which blocked calls re-check cancellation and closure.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Behaviour of `push` on a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overflow {
    /// Block the producer until space frees up.
    #[default]
    Block,
    /// Discard the transition and count it.
    Drop,
}

/// Result of a `push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// Queue was full under [`Overflow::Drop`].
    Dropped,
    Cancelled,
    /// The consumer is gone; no further transitions are accepted.
    Closed,
}

/// Result of a `pop_batch`.
#[derive(Debug, PartialEq, Eq)]
pub enum PopOutcome<T> {
    Batch(Vec<T>),
    Cancelled,
    /// Closed with fewer than one batch left.
    Closed,
}

/// Bounded single-producer/single-consumer transition queue.
pub struct TransitionQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
    overflow: Overflow,
    closed: AtomicBool,

    /// Wakes a consumer waiting for a full batch.
    ready_lock: Mutex<()>,
    ready: Condvar,

    pushed: AtomicU64,
    dropped: AtomicU64,
    drop_streak: AtomicBool,

    producer_waiting: AtomicBool,
    consumer_waiting: AtomicBool,

    stall_threshold: Option<Duration>,
    step_counter: Option<SharedCounter>,
    incidents: Arc<Incidents>,
}

impl<T> TransitionQueue<T> {
    /// Create a queue holding at most `capacity` transitions (at least 1).
    pub fn new(capacity: usize, overflow: Overflow, incidents: Arc<Incidents>) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            overflow,
            closed: AtomicBool::new(false),
            ready_lock: Mutex::new(()),
            ready: Condvar::new(),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            drop_streak: AtomicBool::new(false),
            producer_waiting: AtomicBool::new(false),
            consumer_waiting: AtomicBool::new(false),
            stall_threshold: None,
            step_counter: None,
            incidents,
        }
    }

    /// Report a stall incident when a blocking call waits longer than `threshold`.
    pub fn with_stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = (!threshold.is_zero()).then_some(threshold);
        self
    }

    /// Stamp incidents with this counter's reading.
    pub fn with_step_counter(mut self, counter: SharedCounter) -> Self {
        self.step_counter = Some(counter);
        self
    }

    fn step(&self) -> u64 {
        self.step_counter.as_ref().map(|c| c.get()).unwrap_or_default()
    }

    fn notify_consumer(&self) {
        let _guard = self.ready_lock.lock();
        self.ready.notify_one();
    }

    fn report_stall(&self, role: &str, waited: Duration) {
        self.incidents.report(Incident::new(
            IncidentKind::Stall,
            role,
            self.step(),
            format!("blocked on transition queue for {:.1}s", waited.as_secs_f64()),
        ));
    }

    fn accepted(&self) -> PushOutcome {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.drop_streak.store(false, Ordering::Relaxed);
        self.notify_consumer();
        PushOutcome::Pushed
    }

    /// Enqueue one transition according to the overflow policy.
    ///
    /// Under [`Overflow::Block`] this waits for space, returning early on
    /// cancellation or closure.
    pub fn push(&self, item: T, cancel: &CancelToken) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }
        match self.overflow {
            Overflow::Drop => self.try_push(item),
            Overflow::Block => self.push_blocking(item, cancel),
        }
    }

    /// Enqueue without blocking. A full queue drops and counts the item.
    pub fn try_push(&self, item: T) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }
        match self.tx.try_send(item) {
            Ok(()) => self.accepted(),
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if !self.drop_streak.swap(true, Ordering::Relaxed) {
                    self.incidents.report(Incident::new(
                        IncidentKind::Dropped,
                        "actor",
                        self.step(),
                        format!("transition queue full, {total} transitions dropped so far"),
                    ));
                }
                PushOutcome::Dropped
            }
            Err(TrySendError::Disconnected(_)) => PushOutcome::Closed,
        }
    }

    fn push_blocking(&self, mut item: T, cancel: &CancelToken) -> PushOutcome {
        let started = Instant::now();
        let mut stall_reported = false;
        let outcome = loop {
            if cancel.is_cancelled() {
                break PushOutcome::Cancelled;
            }
            if self.is_closed() {
                break PushOutcome::Closed;
            }
            match self.tx.send_timeout(item, POLL_INTERVAL) {
                Ok(()) => break self.accepted(),
                Err(SendTimeoutError::Timeout(back)) => {
                    item = back;
                    self.producer_waiting.store(true, Ordering::Relaxed);
                    if let Some(threshold) = self.stall_threshold {
                        let waited = started.elapsed();
                        if !stall_reported && waited >= threshold {
                            self.report_stall("actor", waited);
                            stall_reported = true;
                        }
                    }
                }
                Err(SendTimeoutError::Disconnected(_)) => break PushOutcome::Closed,
            }
        };
        self.producer_waiting.store(false, Ordering::Relaxed);
        outcome
    }

    /// Dequeue exactly `n` transitions in FIFO order.
    ///
    /// Waits until `n` transitions are buffered. After `close`, remaining
    /// full batches are still delivered; a trailing partial batch is not.
    pub fn pop_batch(&self, n: usize, cancel: &CancelToken) -> PopOutcome<T> {
        let n = n.clamp(1, self.capacity);
        let started = Instant::now();
        let mut stall_reported = false;
        let mut guard = self.ready_lock.lock();
        let outcome = loop {
            if cancel.is_cancelled() {
                break PopOutcome::Cancelled;
            }
            if self.rx.len() >= n {
                break PopOutcome::Batch(self.rx.try_iter().take(n).collect());
            }
            if self.is_closed() {
                break PopOutcome::Closed;
            }
            self.consumer_waiting.store(true, Ordering::Relaxed);
            if let Some(threshold) = self.stall_threshold {
                let waited = started.elapsed();
                if !stall_reported && waited >= threshold {
                    self.report_stall("learner", waited);
                    stall_reported = true;
                }
            }
            self.ready.wait_for(&mut guard, POLL_INTERVAL);
        };
        self.consumer_waiting.store(false, Ordering::Relaxed);
        outcome
    }

    /// Stop accepting transitions and wake a waiting consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify_consumer();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of buffered transitions.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn overflow(&self) -> Overflow {
        self.overflow
    }

    /// Total transitions accepted.
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Total transitions dropped under [`Overflow::Drop`].
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the producer is currently blocked on a full queue.
    pub fn producer_waiting(&self) -> bool {
        self.producer_waiting.load(Ordering::Relaxed)
    }

    /// Whether the consumer is currently waiting for a full batch.
    pub fn consumer_waiting(&self) -> bool {
        self.consumer_waiting.load(Ordering::Relaxed)
    }
}

/// Queue shared by the actor and learner threads.
pub type SharedTransitionQueue<T> = Arc<TransitionQueue<T>>;
