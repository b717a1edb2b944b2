//! Named monotonic step counters.
//!
//! A counter is the only clock step-based triggers read. It is advanced by
//! the run loop that owns it and may be read from any thread. Reads from
//! another unit only need eventual visibility.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Atomic, monotonically non-decreasing step counter.
#[derive(Debug)]
pub struct Counter {
    name: String,
    value: AtomicU64,
}

impl Counter {
    /// Create a counter starting at 0.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: AtomicU64::new(0),
        }
    }

    /// Counter name (e.g. `env_step`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Advance by `n` and return the new value.
    ///
    /// Saturates at `u64::MAX` rather than wrapping.
    pub fn add(&self, n: u64) -> u64 {
        let mut current = self.value.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(n);
            match self.value.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Advance by one and return the new value.
    pub fn increment(&self) -> u64 {
        self.add(1)
    }

    /// Raise the counter to a checkpointed value.
    ///
    /// Never lowers it. Returns the value after the call.
    pub fn restore(&self, value: u64) -> u64 {
        self.value.fetch_max(value, Ordering::AcqRel).max(value)
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.get())
    }
}

/// Shared counter (thread-safe reference).
pub type SharedCounter = Arc<Counter>;

/// Create a new shared counter.
pub fn counter(name: impl Into<String>) -> SharedCounter {
    Arc::new(Counter::new(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_counter_new() {
        let counter = Counter::new("env_step");
        assert_eq!(counter.get(), 0);
        assert_eq!(counter.name(), "env_step");
    }

    #[test]
    fn test_counter_add_and_increment() {
        let counter = Counter::new("train_step");
        assert_eq!(counter.add(10), 10);
        assert_eq!(counter.increment(), 11);
        assert_eq!(counter.get(), 11);
    }

    #[test]
    fn test_counter_saturates() {
        let counter = Counter::new("c");
        counter.restore(u64::MAX - 1);
        assert_eq!(counter.add(10), u64::MAX);
    }

    #[test]
    fn test_counter_restore_never_lowers() {
        let counter = Counter::new("c");
        counter.add(100);
        assert_eq!(counter.restore(50), 100);
        assert_eq!(counter.restore(250), 250);
        assert_eq!(counter.get(), 250);
    }

    #[test]
    fn test_counter_display() {
        let counter = Counter::new("env_step");
        counter.add(7);
        assert_eq!(counter.to_string(), "env_step=7");
    }

    #[test]
    fn test_shared_counter_concurrent_adds() {
        let counter = counter("env_step");
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        c.increment();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.get(), 4000);
    }
}
