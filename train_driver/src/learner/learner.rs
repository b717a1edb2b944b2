//! Learner side of the parallel pipeline.
//!
//! The learner pulls full batches from the [`TransitionQueue`] and performs
//! one update per batch. Each update is one `train_step`.
//!
//! # Pacing
//!
//! With a positive train ratio the learner earns updates from the actor's
//! `env_step` counter through a [`Ratio`] and idles while it has none left.
//! With a zero ratio it trains whenever a batch is available. A full
//! queue overrides pacing.
//!
//! # Lifecycle
//!
//! The learner stops when cancelled, when its budget is reached, or when
//! the queue is closed and fewer than one batch remains.

use std::marker::PhantomData;
use std::thread;
use std::time::Duration;

use crate::core::cancel::CancelToken;
use crate::core::counter::SharedCounter;
use crate::core::transition_queue::{PopOutcome, SharedTransitionQueue};
use crate::error::StepError;
use crate::metrics::{SharedTrainingMetrics, TrainingMetrics};
use crate::runners::status::{LearnerState, SharedPipelineStatus};
use crate::runners::step::StepFn;
use crate::trigger::Ratio;

/// Poll interval while paced out by the train ratio.
const IDLE_POLL: Duration = Duration::from_millis(1);

/// Parameter update run on the learner thread.
pub trait Learner<T>: Send {
    /// Consume one batch, recording losses and other statistics in `metrics`.
    fn train(&mut self, batch: Vec<T>, metrics: &mut TrainingMetrics) -> Result<(), StepError>;
}

impl<T, F> Learner<T> for F
where
    F: FnMut(Vec<T>, &mut TrainingMetrics) -> Result<(), StepError> + Send,
{
    fn train(&mut self, batch: Vec<T>, metrics: &mut TrainingMetrics) -> Result<(), StepError> {
        self(batch, metrics)
    }
}

/// Learner pacing over the actor's counter.
struct Pacing {
    ratio: Ratio,
    env_step: SharedCounter,
    allowance: u64,
}

/// Adapts a [`Learner`] to the run loop's step contract.
pub struct LearnerStep<T, L> {
    learner: L,
    queue: SharedTransitionQueue<T>,
    cancel: CancelToken,
    batch_size: usize,
    metrics: SharedTrainingMetrics,
    status: SharedPipelineStatus,
    pacing: Option<Pacing>,
    /// Update failure held back until the updates before it are credited.
    failed: Option<StepError>,
    exhausted: bool,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send, L: Learner<T>> LearnerStep<T, L> {
    pub fn new(
        learner: L,
        queue: SharedTransitionQueue<T>,
        cancel: CancelToken,
        batch_size: usize,
        metrics: SharedTrainingMetrics,
        status: SharedPipelineStatus,
    ) -> Self {
        Self {
            learner,
            queue,
            cancel,
            batch_size: batch_size.max(1),
            metrics,
            status,
            pacing: None,
            failed: None,
            exhausted: false,
            _marker: PhantomData,
        }
    }

    /// Perform `train_ratio` updates per step of `env_step`.
    ///
    /// A non-positive ratio leaves the learner unpaced.
    pub fn with_train_ratio(mut self, train_ratio: f64, env_step: SharedCounter) -> Self {
        let ratio = Ratio::new(train_ratio);
        self.pacing = (ratio.ratio() > 0.0).then(|| {
            let mut ratio = ratio;
            // Start earning from the actor's current position.
            ratio.call(env_step.get());
            Pacing {
                ratio,
                env_step,
                allowance: 0,
            }
        });
        self
    }

    /// Block until at least one update is allowed.
    ///
    /// A full queue always allows an update: the actor cannot advance its
    /// counter while blocked on the learner.
    ///
    /// Returns `false` when cancelled.
    fn wait_for_allowance(&mut self) -> bool {
        let Some(pacing) = self.pacing.as_mut() else {
            return true;
        };
        loop {
            if pacing.allowance > 0 {
                return true;
            }
            pacing.allowance += pacing.ratio.call(pacing.env_step.get());
            if pacing.allowance > 0 {
                return true;
            }
            // A closed queue is drained without pacing.
            if self.queue.is_closed() || self.queue.len() >= self.queue.capacity() {
                return true;
            }
            if self.cancel.is_cancelled() {
                return false;
            }
            self.status.set_learner(LearnerState::Idle);
            thread::sleep(IDLE_POLL);
        }
    }
}

impl<T: Send, L: Learner<T>> StepFn for LearnerStep<T, L> {
    fn step(&mut self, n: u64) -> Result<u64, StepError> {
        if let Some(e) = self.failed.take() {
            return Err(e);
        }
        let mut done = 0;
        while done < n {
            if !self.wait_for_allowance() {
                break;
            }
            self.status.set_learner(LearnerState::WaitingForData);
            let batch = match self.queue.pop_batch(self.batch_size, &self.cancel) {
                PopOutcome::Batch(batch) => batch,
                PopOutcome::Cancelled => break,
                PopOutcome::Closed => {
                    self.exhausted = true;
                    break;
                }
            };

            self.status.set_learner(LearnerState::Training);
            let result = {
                let mut metrics = self.metrics.lock();
                self.learner.train(batch, &mut metrics)
            };
            if let Err(e) = result {
                self.status.set_learner(LearnerState::Idle);
                if done == 0 {
                    return Err(e);
                }
                self.failed = Some(e);
                return Ok(done);
            }
            if let Some(pacing) = self.pacing.as_mut() {
                pacing.allowance = pacing.allowance.saturating_sub(1);
            }
            done += 1;
        }
        self.status.set_learner(if self.exhausted {
            LearnerState::Idle
        } else {
            LearnerState::WaitingForData
        });
        Ok(done)
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
