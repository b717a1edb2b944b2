//! The chunked run loop.
//!
//! One generic loop drives every run mode. It repeatedly runs the step
//! function for a bounded chunk, advances the counter by the steps actually
//! executed, then evaluates every scheduled trigger in phase order.
//!
//! Chunk size is `max(1, min(max_chunk, tightest step interval))` over the
//! step triggers reading the loop's own counter. Each chunk is further cut
//! short at the next boundary of any such trigger and at the step budget,
//! so a step trigger fires exactly at each of its multiples whenever the
//! step function honours its request.
//!
//! Triggers reading a foreign counter (the learner evaluating on the
//! actor's `env_step`) cannot size chunks. While any of them is scheduled
//! the loop requests one step at a time and ends the chunk as soon as a
//! foreign counter reaches that trigger's next boundary, so no foreign
//! boundary is crossed without an evaluation.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crate::core::cancel::CancelToken;
use crate::core::counter::SharedCounter;
use crate::error::{panic_message, CallbackError, DriverError, Result};
use crate::incident::{incidents, Incident, IncidentKind, Incidents};
use crate::metrics::SharedLogger;
use crate::trigger::Trigger;

use super::schedule::{Callback, Phase, Scheduled};
use super::step::StepFn;

/// Default upper bound on steps per chunk.
pub const DEFAULT_MAX_CHUNK: u64 = 100;

/// How a run ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Budget reached or the step function is exhausted.
    Completed,
    /// The cancellation token was set.
    Cancelled,
}

/// One callback invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firing {
    pub name: String,
    pub phase: Phase,
    /// Counter reading the trigger fired at.
    pub step: u64,
    /// Whether the callback returned without error or panic.
    pub ok: bool,
}

/// Outcome of [`RunLoop::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub status: RunStatus,
    /// Counter value when the run started.
    pub start: u64,
    /// Counter value when the run ended.
    pub steps: u64,
    pub chunks: u64,
    /// Callback invocations in firing order.
    pub firings: Vec<Firing>,
}

impl RunSummary {
    fn new(start: u64) -> Self {
        Self {
            status: RunStatus::Completed,
            start,
            steps: start,
            chunks: 0,
            firings: Vec::new(),
        }
    }

    /// Steps executed by this run.
    pub fn executed(&self) -> u64 {
        self.steps - self.start
    }

    /// Steps at which the named callback fired.
    pub fn fired_at(&self, name: &str) -> Vec<u64> {
        self.firings
            .iter()
            .filter(|f| f.name == name)
            .map(|f| f.step)
            .collect()
    }

    /// Number of callback invocations that failed.
    pub fn failed_firings(&self) -> usize {
        self.firings.iter().filter(|f| !f.ok).count()
    }
}

/// Builder for [`RunLoop`].
pub struct RunLoopBuilder<S> {
    counter: SharedCounter,
    step_fn: S,
    schedule: Vec<Scheduled>,
    max_chunk: u64,
    budget: Option<u64>,
    cancel: CancelToken,
    logger: Option<SharedLogger>,
    incidents: Option<Arc<Incidents>>,
    role: &'static str,
}

impl<S: StepFn> RunLoopBuilder<S> {
    /// Upper bound on steps per chunk (at least 1).
    pub fn max_chunk(mut self, steps: u64) -> Self {
        self.max_chunk = steps.max(1);
        self
    }

    /// Stop once the counter reaches `budget`. `None` runs until cancelled
    /// or exhausted.
    pub fn budget(mut self, budget: Option<u64>) -> Self {
        self.budget = budget;
        self
    }

    pub fn cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Logger flushed when the run ends, including on failure.
    pub fn logger(mut self, logger: SharedLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Incident log for callback failures. Defaults to the logger's.
    pub fn incidents(mut self, incidents: Arc<Incidents>) -> Self {
        self.incidents = Some(incidents);
        self
    }

    /// Name used in log lines (e.g. `actor`, `learner`).
    pub fn role(mut self, role: &'static str) -> Self {
        self.role = role;
        self
    }

    pub fn schedule(mut self, entry: Scheduled) -> Self {
        self.schedule.push(entry);
        self
    }

    /// Schedule `callback` on `trigger` over the loop's own counter.
    pub fn on(
        self,
        name: impl Into<String>,
        phase: Phase,
        trigger: Trigger,
        callback: impl Callback + 'static,
    ) -> Self {
        self.schedule(Scheduled::new(name, phase, trigger, callback))
    }

    /// Finish the loop.
    ///
    /// Disabled triggers are dropped, the rest are ordered by phase
    /// (stable within a phase) and restored to their counter's current
    /// value so a resumed run does not replay past boundaries.
    pub fn build(self) -> RunLoop<S> {
        let mut schedule: Vec<Scheduled> = self
            .schedule
            .into_iter()
            .filter(|entry| !entry.trigger.is_disabled())
            .collect();
        schedule.sort_by_key(|entry| entry.phase);
        for entry in &mut schedule {
            let reading = entry
                .counter
                .as_ref()
                .map_or_else(|| self.counter.get(), |c| c.get());
            entry.trigger.restore(reading);
        }

        let incidents = self
            .incidents
            .or_else(|| self.logger.as_ref().map(|l| Arc::clone(l.incidents())))
            .unwrap_or_else(incidents);

        RunLoop {
            counter: self.counter,
            step_fn: self.step_fn,
            schedule,
            max_chunk: self.max_chunk,
            budget: self.budget,
            cancel: self.cancel,
            logger: self.logger,
            incidents,
            role: self.role,
        }
    }
}

/// Generic chunked loop over a step function and a set of scheduled triggers.
pub struct RunLoop<S> {
    counter: SharedCounter,
    step_fn: S,
    schedule: Vec<Scheduled>,
    max_chunk: u64,
    budget: Option<u64>,
    cancel: CancelToken,
    logger: Option<SharedLogger>,
    incidents: Arc<Incidents>,
    role: &'static str,
}

impl<S: StepFn> RunLoop<S> {
    pub fn builder(counter: SharedCounter, step_fn: S) -> RunLoopBuilder<S> {
        RunLoopBuilder {
            counter,
            step_fn,
            schedule: Vec::new(),
            max_chunk: DEFAULT_MAX_CHUNK,
            budget: None,
            cancel: CancelToken::new(),
            logger: None,
            incidents: None,
            role: "driver",
        }
    }

    pub fn counter(&self) -> &SharedCounter {
        &self.counter
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn incidents(&self) -> &Arc<Incidents> {
        &self.incidents
    }

    pub fn step_fn(&self) -> &S {
        &self.step_fn
    }

    /// Scheduled callbacks in evaluation order.
    pub fn schedule(&self) -> &[Scheduled] {
        &self.schedule
    }

    fn is_own(&self, entry: &Scheduled) -> bool {
        entry
            .counter
            .as_ref()
            .map_or(true, |c| Arc::ptr_eq(c, &self.counter))
    }

    /// Adaptive chunk size: never larger than the tightest own step interval.
    pub fn chunk_size(&self) -> u64 {
        let tightest = self
            .schedule
            .iter()
            .filter(|entry| self.is_own(entry))
            .filter_map(|entry| entry.trigger.step_interval())
            .min();
        tightest
            .map_or(self.max_chunk, |interval| self.max_chunk.min(interval))
            .max(1)
    }

    /// Next boundary of every trigger reading a foreign counter.
    fn foreign_boundaries(&self) -> Vec<(SharedCounter, u64)> {
        self.schedule
            .iter()
            .filter_map(|entry| {
                let counter = entry
                    .counter
                    .as_ref()
                    .filter(|c| !Arc::ptr_eq(c, &self.counter))?;
                let boundary = entry.trigger.next_boundary(counter.get())?;
                Some((Arc::clone(counter), boundary))
            })
            .collect()
    }

    /// Steps to request for the chunk starting at `step`.
    fn next_chunk(&self, step: u64) -> u64 {
        let mut n = self.chunk_size();
        for entry in self.schedule.iter().filter(|entry| self.is_own(entry)) {
            if let Some(boundary) = entry.trigger.next_boundary(step) {
                n = n.min(boundary.saturating_sub(step));
            }
        }
        if let Some(budget) = self.budget {
            n = n.min(budget.saturating_sub(step));
        }
        n.max(1)
    }

    /// Run until the budget is reached, the step function is exhausted, or
    /// the run is cancelled.
    ///
    /// A step failure is fatal: sinks are flushed best-effort and the error
    /// is returned. Callback failures and panics become incidents.
    pub fn run(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::new(self.counter.get());
        log::info!(
            "{} loop starting at {} (chunk size {}, budget {:?})",
            self.role,
            self.counter,
            self.chunk_size(),
            self.budget
        );

        // Boundaries at the starting reading, e.g. an initial evaluation.
        self.fire_due(&mut summary);

        let status = loop {
            if self.cancel.is_cancelled() {
                break RunStatus::Cancelled;
            }
            let step = self.counter.get();
            if self.budget.is_some_and(|budget| step >= budget) || self.step_fn.is_exhausted() {
                break RunStatus::Completed;
            }

            let requested = self.next_chunk(step);
            let executed = match self.run_chunk(requested) {
                Ok(executed) => executed,
                Err(e) => {
                    log::error!("{} loop failed: {e}", self.role);
                    self.flush();
                    return Err(e);
                }
            };
            summary.chunks += 1;

            if self.cancel.is_cancelled() {
                break RunStatus::Cancelled;
            }
            if executed == 0 {
                if self.step_fn.is_exhausted() {
                    // Foreign counters may have moved since the last chunk.
                    self.fire_due(&mut summary);
                    break RunStatus::Completed;
                }
                self.flush();
                return Err(DriverError::NoProgress { step, requested });
            }
            self.fire_due(&mut summary);
        };

        self.flush();
        summary.status = status;
        summary.steps = self.counter.get();
        log::info!(
            "{} loop {:?} at {} after {} chunks",
            self.role,
            status,
            self.counter,
            summary.chunks
        );
        Ok(summary)
    }

    /// Execute up to `n` steps, checking cancellation between step calls.
    ///
    /// Ends early once a foreign counter reaches a watched boundary.
    fn run_chunk(&mut self, n: u64) -> Result<u64> {
        let watched = self.foreign_boundaries();
        let mut done = 0;
        while done < n && !self.cancel.is_cancelled() {
            let request = if watched.is_empty() { n - done } else { 1 };
            let reported = self.step_fn.step(request).map_err(|source| DriverError::Step {
                step: self.counter.get(),
                source,
            })?;
            let credited = reported.min(request);
            if credited == 0 {
                break;
            }
            self.counter.add(credited);
            done += credited;
            if self.step_fn.is_exhausted() {
                break;
            }
            if watched
                .iter()
                .any(|(counter, boundary)| counter.get() >= *boundary)
            {
                break;
            }
        }
        Ok(done)
    }

    fn fire_due(&mut self, summary: &mut RunSummary) {
        let now = Instant::now();
        let own = self.counter.get();
        for entry in &mut self.schedule {
            let reading = entry.counter.as_ref().map_or(own, |c| c.get());
            if !entry.trigger.should_fire(reading, now) {
                continue;
            }
            log::debug!("{} fired at {}", entry.name, reading);

            let callback = &mut entry.callback;
            let error = match panic::catch_unwind(AssertUnwindSafe(|| callback.call(reading))) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(payload) => Some(CallbackError::Panicked(panic_message(payload.as_ref()))),
            };
            if let Some(e) = &error {
                self.incidents.report(Incident::new(
                    IncidentKind::Callback,
                    entry.name.as_str(),
                    reading,
                    e.to_string(),
                ));
            }
            summary.firings.push(Firing {
                name: entry.name.clone(),
                phase: entry.phase,
                step: reading,
                ok: error.is_none(),
            });
        }
    }

    fn flush(&self) {
        if let Some(logger) = &self.logger {
            let failed = logger.flush();
            if failed > 0 {
                log::warn!("{} loop: {failed} sinks failed to flush", self.role);
            }
        }
    }
}
