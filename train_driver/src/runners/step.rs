//! Step function contract.

use crate::error::StepError;

/// Interaction or training step function driven by a [`RunLoop`](super::RunLoop).
///
/// `step(n)` runs at most `n` steps and returns how many it executed. It may
/// return early at a natural boundary (end of an episode, a full queue) but
/// must not block indefinitely. The loop, not the step function, advances
/// the counter, and it never credits more than `n` steps for one call.
pub trait StepFn: Send {
    fn step(&mut self, n: u64) -> Result<u64, StepError>;

    /// Whether no further steps will ever be produced (e.g. the consumer
    /// of its output has gone away). An exhausted step function ends the
    /// run as completed instead of failing with no progress.
    fn is_exhausted(&self) -> bool {
        false
    }
}

impl<F> StepFn for F
where
    F: FnMut(u64) -> Result<u64, StepError> + Send,
{
    fn step(&mut self, n: u64) -> Result<u64, StepError> {
        self(n)
    }
}
