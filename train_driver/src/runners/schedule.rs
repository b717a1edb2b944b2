//! Trigger-bound callbacks evaluated at chunk boundaries.

use std::fmt;

use crate::core::counter::SharedCounter;
use crate::error::CallbackError;
use crate::trigger::Trigger;

/// Priority class of a callback. Callbacks firing at the same boundary run
/// in this order, so a save always sees the latest logged metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Log,
    Eval,
    Save,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Log => "log",
            Phase::Eval => "eval",
            Phase::Save => "save",
        };
        f.write_str(name)
    }
}

/// Side effect invoked when its trigger fires. Receives the trigger's
/// counter reading. Failures are reported as incidents, never fatal.
pub trait Callback: Send {
    fn call(&mut self, step: u64) -> Result<(), CallbackError>;
}

impl<F> Callback for F
where
    F: FnMut(u64) -> Result<(), CallbackError> + Send,
{
    fn call(&mut self, step: u64) -> Result<(), CallbackError> {
        self(step)
    }
}

/// A trigger, the counter it reads, and the callback it fires.
pub struct Scheduled {
    pub(crate) name: String,
    pub(crate) phase: Phase,
    pub(crate) trigger: Trigger,
    /// `None` reads the loop's own counter.
    pub(crate) counter: Option<SharedCounter>,
    pub(crate) callback: Box<dyn Callback>,
}

impl Scheduled {
    pub fn new(
        name: impl Into<String>,
        phase: Phase,
        trigger: Trigger,
        callback: impl Callback + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            phase,
            trigger,
            counter: None,
            callback: Box::new(callback),
        }
    }

    /// Read `counter` instead of the loop's own counter.
    ///
    /// Foreign counters do not take part in chunk sizing.
    pub fn reading(mut self, counter: SharedCounter) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }
}

impl fmt::Debug for Scheduled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduled")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("trigger", &self.trigger)
            .field("counter", &self.counter.as_ref().map(|c| c.name().to_string()))
            .finish_non_exhaustive()
    }
}
