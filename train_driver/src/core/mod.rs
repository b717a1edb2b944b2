//! Core primitives shared by every run mode.

pub mod cancel;
pub mod counter;
pub mod transition_queue;

pub use cancel::CancelToken;
pub use counter::{counter, Counter, SharedCounter};
pub use transition_queue::{
    Overflow, PopOutcome, PushOutcome, SharedTransitionQueue, TransitionQueue,
};
