//! Stateful firing predicates.
//!
//! Step triggers are deterministic functions of the counter reading and
//! replay identically across runs. Clock triggers sample wall time and are
//! only meant for effects whose cost should be amortised over time, such as
//! checkpointing.

use std::time::{Duration, Instant};

/// Predicate deciding whether a periodic effect fires at a given reading.
///
/// `should_fire` updates the internal last-fired state exactly when it
/// returns `true`. A counter that jumps across several intervals between
/// two calls still yields a single firing; sizing chunks so that no
/// boundary is skipped is the run loop's job.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Never fires. Produced by a non-positive interval.
    Disabled,

    /// Fires whenever `step / interval` moves past the last recorded bucket.
    EveryN { interval: u64, last_bucket: u64 },

    /// Fires when at least `interval` wall time passed since the last firing.
    /// Arms itself on the first evaluation.
    ClockSeconds {
        interval: Duration,
        last: Option<Instant>,
    },

    /// Fires once, the first time the counter reaches `threshold`.
    Once { threshold: u64, fired: bool },
}

impl Trigger {
    /// Step trigger. `interval <= 0` yields [`Trigger::Disabled`].
    pub fn every(interval: i64) -> Self {
        if interval <= 0 {
            Trigger::Disabled
        } else {
            Trigger::EveryN {
                interval: interval as u64,
                last_bucket: 0,
            }
        }
    }

    /// Wall-clock trigger. Non-positive, non-finite or unrepresentable
    /// seconds yield [`Trigger::Disabled`]: an interval longer than any
    /// [`Duration`] never elapses.
    pub fn clock(seconds: f64) -> Self {
        if seconds <= 0.0 {
            return Trigger::Disabled;
        }
        match Duration::try_from_secs_f64(seconds) {
            Ok(interval) => Trigger::ClockSeconds {
                interval,
                last: None,
            },
            Err(_) => Trigger::Disabled,
        }
    }

    /// One-shot trigger at `threshold`.
    pub fn once(threshold: u64) -> Self {
        Trigger::Once {
            threshold,
            fired: false,
        }
    }

    pub fn disabled() -> Self {
        Trigger::Disabled
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Trigger::Disabled)
    }

    /// Evaluate against a counter reading and a clock reading.
    pub fn should_fire(&mut self, step: u64, now: Instant) -> bool {
        match self {
            Trigger::Disabled => false,
            Trigger::EveryN {
                interval,
                last_bucket,
            } => {
                let bucket = step / *interval;
                if bucket > *last_bucket {
                    *last_bucket = bucket;
                    true
                } else {
                    false
                }
            }
            Trigger::ClockSeconds { interval, last } => match last {
                None => {
                    *last = Some(now);
                    false
                }
                Some(prev) => {
                    if now.saturating_duration_since(*prev) >= *interval {
                        *last = Some(now);
                        true
                    } else {
                        false
                    }
                }
            },
            Trigger::Once { threshold, fired } => {
                if !*fired && step >= *threshold {
                    *fired = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Evaluate against the current wall time.
    pub fn should_fire_now(&mut self, step: u64) -> bool {
        self.should_fire(step, Instant::now())
    }

    /// Step interval used for chunk sizing. `None` for clock, one-shot and disabled triggers.
    pub fn step_interval(&self) -> Option<u64> {
        match self {
            Trigger::EveryN { interval, .. } => Some(*interval),
            _ => None,
        }
    }

    /// Smallest counter value strictly greater than `step` at which this trigger could fire.
    pub fn next_boundary(&self, step: u64) -> Option<u64> {
        match self {
            Trigger::EveryN { interval, .. } => {
                (step / interval).checked_add(1)?.checked_mul(*interval)
            }
            Trigger::Once { threshold, fired } if !*fired && *threshold > step => Some(*threshold),
            _ => None,
        }
    }

    /// Re-seed step state from a restored counter so already crossed
    /// boundaries do not fire again.
    pub fn restore(&mut self, step: u64) {
        if let Trigger::EveryN {
            interval,
            last_bucket,
        } = self
        {
            *last_bucket = (*last_bucket).max(step / *interval);
        }
    }

    /// Forget all firing history.
    pub fn reset(&mut self) {
        match self {
            Trigger::Disabled => {}
            Trigger::EveryN { last_bucket, .. } => *last_bucket = 0,
            Trigger::ClockSeconds { last, .. } => *last = None,
            Trigger::Once { fired, .. } => *fired = false,
        }
    }
}
