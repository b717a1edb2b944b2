//! Observable actor/learner states.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// What the actor is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActorState {
    Stepping = 0,
    /// Between chunks, finished, or blocked on a full queue.
    Idle = 1,
}

/// What the learner is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LearnerState {
    /// Fewer than one batch is buffered.
    WaitingForData = 0,
    Training = 1,
    /// Paced out by the train ratio, or finished.
    Idle = 2,
}

impl ActorState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ActorState::Stepping,
            _ => ActorState::Idle,
        }
    }
}

impl LearnerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LearnerState::WaitingForData,
            1 => LearnerState::Training,
            _ => LearnerState::Idle,
        }
    }
}

/// Lock-free snapshot of both units' states.
#[derive(Debug)]
pub struct PipelineStatus {
    actor: AtomicU8,
    learner: AtomicU8,
}

impl PipelineStatus {
    pub fn new() -> Self {
        Self {
            actor: AtomicU8::new(ActorState::Idle as u8),
            learner: AtomicU8::new(LearnerState::WaitingForData as u8),
        }
    }

    pub fn actor(&self) -> ActorState {
        ActorState::from_u8(self.actor.load(Ordering::Relaxed))
    }

    pub fn learner(&self) -> LearnerState {
        LearnerState::from_u8(self.learner.load(Ordering::Relaxed))
    }

    pub fn set_actor(&self, state: ActorState) {
        self.actor.store(state as u8, Ordering::Relaxed);
    }

    pub fn set_learner(&self, state: LearnerState) {
        self.learner.store(state as u8, Ordering::Relaxed);
    }
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor={:?} learner={:?}", self.actor(), self.learner())
    }
}

pub type SharedPipelineStatus = Arc<PipelineStatus>;

pub fn pipeline_status() -> SharedPipelineStatus {
    Arc::new(PipelineStatus::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let status = PipelineStatus::new();
        assert_eq!(status.actor(), ActorState::Idle);
        assert_eq!(status.learner(), LearnerState::WaitingForData);

        status.set_actor(ActorState::Stepping);
        status.set_learner(LearnerState::Training);
        assert_eq!(status.to_string(), "actor=Stepping learner=Training");

        status.set_learner(LearnerState::Idle);
        assert_eq!(status.learner(), LearnerState::Idle);
    }
}
