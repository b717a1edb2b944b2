//! Non-fatal incident channel.
//!
//! Callback failures, sink failures, queue stalls and dropped transitions
//! never stop a run. They are recorded here and echoed through `log::warn!`.

use crossbeam_queue::SegQueue;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Category of a recovered problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncidentKind {
    /// A log, evaluation or save callback failed or panicked.
    Callback,
    /// A sink failed to write or flush.
    Sink,
    /// A queue blocking point exceeded the stall threshold.
    Stall,
    /// Transitions were dropped because the queue was full.
    Dropped,
}

impl IncidentKind {
    fn index(self) -> usize {
        match self {
            IncidentKind::Callback => 0,
            IncidentKind::Sink => 1,
            IncidentKind::Stall => 2,
            IncidentKind::Dropped => 3,
        }
    }
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IncidentKind::Callback => "callback",
            IncidentKind::Sink => "sink",
            IncidentKind::Stall => "stall",
            IncidentKind::Dropped => "dropped",
        };
        f.write_str(name)
    }
}

/// One recovered problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incident {
    pub kind: IncidentKind,
    /// Trigger, sink or role name that produced the incident.
    pub source: String,
    /// Counter value at the time of the incident.
    pub step: u64,
    pub message: String,
    /// How many times in a row this source has failed (1 for a first failure).
    pub repeat: u64,
}

impl Incident {
    pub fn new(
        kind: IncidentKind,
        source: impl Into<String>,
        step: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            source: source.into(),
            step,
            message: message.into(),
            repeat: 1,
        }
    }

    /// Set the consecutive failure count.
    pub fn with_repeat(mut self, repeat: u64) -> Self {
        self.repeat = repeat;
        self
    }
}

impl fmt::Display for Incident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} incident from '{}' at step {}: {}",
            self.kind, self.source, self.step, self.message
        )?;
        if self.repeat > 1 {
            write!(f, " (repeated {} times)", self.repeat)?;
        }
        Ok(())
    }
}

/// Lock-free incident log shared by every unit of a run.
#[derive(Debug, Default)]
pub struct Incidents {
    queue: SegQueue<Incident>,
    counts: [AtomicU64; 4],
}

impl Incidents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an incident and echo it to the log.
    pub fn report(&self, incident: Incident) {
        log::warn!("{incident}");
        self.counts[incident.kind.index()].fetch_add(1, Ordering::Relaxed);
        self.queue.push(incident);
    }

    /// Take every incident recorded so far, oldest first.
    pub fn drain(&self) -> Vec<Incident> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(incident) = self.queue.pop() {
            out.push(incident);
        }
        out
    }

    /// Number of incidents waiting to be drained.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Lifetime count for one kind (not affected by `drain`).
    pub fn count(&self, kind: IncidentKind) -> u64 {
        self.counts[kind.index()].load(Ordering::Relaxed)
    }

    /// Lifetime count over all kinds.
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

/// Create a new shared incident log.
pub fn incidents() -> Arc<Incidents> {
    Arc::new(Incidents::new())
}
