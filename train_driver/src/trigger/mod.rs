//! Triggers deciding when periodic side effects fire.
//!
//! - [`Trigger::every`]: step-exact, replay-stable cadence
//! - [`Trigger::clock`]: wall-clock cadence for time-amortised effects
//! - [`Trigger::once`]: one-shot gate (e.g. an initial evaluation)
//! - [`Ratio`]: paces repetitions against another counter

pub mod ratio;
pub mod trigger;


pub use ratio::Ratio;
pub use trigger::Trigger;
