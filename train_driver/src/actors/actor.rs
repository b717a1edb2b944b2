//! Actor side of the parallel pipeline.
//!
//! The actor steps the environment and pushes the produced transitions into
//! the bounded [`TransitionQueue`]. It is driven by its own [`RunLoop`]
//! over the `env_step` counter.
//!
//! [`RunLoop`]: crate::runners::RunLoop

use std::marker::PhantomData;

use crate::core::cancel::CancelToken;
use crate::core::transition_queue::{PushOutcome, SharedTransitionQueue};
use crate::error::StepError;
use crate::metrics::{SharedTrainingMetrics, TrainingMetrics};
use crate::runners::status::{ActorState, SharedPipelineStatus};
use crate::runners::step::StepFn;

/// Environment interaction run on the actor thread.
///
/// `act` runs at most `n` agent steps, appends the resulting transitions to
/// `out` in order, records episode statistics in `metrics`, and returns the
/// number of steps executed.
pub trait Actor<T>: Send {
    fn act(
        &mut self,
        n: u64,
        out: &mut Vec<T>,
        metrics: &mut TrainingMetrics,
    ) -> Result<u64, StepError>;
}

impl<T, F> Actor<T> for F
where
    F: FnMut(u64, &mut Vec<T>, &mut TrainingMetrics) -> Result<u64, StepError> + Send,
{
    fn act(
        &mut self,
        n: u64,
        out: &mut Vec<T>,
        metrics: &mut TrainingMetrics,
    ) -> Result<u64, StepError> {
        self(n, out, metrics)
    }
}

/// Adapts an [`Actor`] to the run loop's step contract.
///
/// Transitions are pushed in production order; the queue's overflow policy
/// decides between blocking and dropping. Once the queue is closed (the
/// learner has exited) the actor is exhausted.
pub struct ActorStep<T, A> {
    actor: A,
    queue: SharedTransitionQueue<T>,
    cancel: CancelToken,
    metrics: SharedTrainingMetrics,
    status: SharedPipelineStatus,
    buffer: Vec<T>,
    exhausted: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send, A: Actor<T>> ActorStep<T, A> {
    pub fn new(
        actor: A,
        queue: SharedTransitionQueue<T>,
        cancel: CancelToken,
        metrics: SharedTrainingMetrics,
        status: SharedPipelineStatus,
    ) -> Self {
        Self {
            actor,
            queue,
            cancel,
            metrics,
            status,
            buffer: Vec::new(),
            exhausted: false,
            _marker: PhantomData,
        }
    }

    fn push_all(&mut self) {
        // Transitions left after cancellation or closure are discarded.
        for item in self.buffer.drain(..) {
            if self.queue.len() >= self.queue.capacity() {
                self.status.set_actor(ActorState::Idle);
            }
            match self.queue.push(item, &self.cancel) {
                PushOutcome::Pushed | PushOutcome::Dropped => {}
                PushOutcome::Cancelled => break,
                PushOutcome::Closed => {
                    self.exhausted = true;
                    break;
                }
            }
        }
    }
}

impl<T: Send, A: Actor<T>> StepFn for ActorStep<T, A> {
    fn step(&mut self, n: u64) -> Result<u64, StepError> {
        if self.queue.is_closed() {
            self.exhausted = true;
            return Ok(0);
        }
        self.status.set_actor(ActorState::Stepping);
        let result = {
            let mut metrics = self.metrics.lock();
            self.actor.act(n, &mut self.buffer, &mut metrics)
        };
        let executed = match result {
            Ok(executed) => executed,
            Err(e) => {
                self.status.set_actor(ActorState::Idle);
                return Err(e);
            }
        };
        self.push_all();
        self.status.set_actor(ActorState::Idle);
        Ok(executed)
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
