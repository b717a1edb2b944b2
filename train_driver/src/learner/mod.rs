//! Learner side of the parallel pipeline.
//!
//! - [`Learner`]: parameter update consuming transition batches
//! - [`LearnerStep`]: step-function adapter with optional train-ratio pacing

pub mod learner;

#[cfg(test)]
mod tests;

pub use learner::{Learner, LearnerStep};
