//! Actor side of the parallel pipeline.
//!
//! - [`Actor`]: environment interaction producing transitions
//! - [`ActorStep`]: step-function adapter pushing into the transition queue

pub mod actor;

pub use actor::{Actor, ActorStep};
