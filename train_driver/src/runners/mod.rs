//! Run loops and the drivers built on them.
//!
//! # Drivers
//!
//! - [`TrainingDriver`]: one step function, one counter, one loop
//! - [`ParallelDriver`]: an actor loop and a learner loop on separate
//!   threads, joined by a bounded transition queue
//!
//! Both are thin wiring over [`RunLoop`], which owns the counter, sizes
//! chunks from the scheduled step triggers and runs the callbacks in
//! [`Phase`] order at chunk boundaries.

pub mod parallel_runner;
pub mod run_loop;
pub mod schedule;
pub mod status;
pub mod step;
pub mod training_runner;

#[cfg(test)]
mod tests;

pub use parallel_runner::{ParallelDriver, ParallelSummary};
pub use run_loop::{Firing, RunLoop, RunLoopBuilder, RunStatus, RunSummary, DEFAULT_MAX_CHUNK};
pub use schedule::{Callback, Phase, Scheduled};
pub use status::{pipeline_status, ActorState, LearnerState, PipelineStatus, SharedPipelineStatus};
pub use step::StepFn;
pub use training_runner::{logger_for, EvalMetrics, Evaluator, TrainingDriver, EVAL_NAMESPACE};
