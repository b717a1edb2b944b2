//! Counter-to-repetition conversion.
//!
//! Used to pace one unit against another unit's counter, e.g. the learner
//! performing `train_ratio` updates per agent step.

/// Converts counter progress into a whole number of repetitions while
/// carrying the fractional remainder, so the long-run ratio is exact.
#[derive(Debug, Clone, PartialEq)]
pub struct Ratio {
    ratio: f64,
    prev: Option<f64>,
}

impl Ratio {
    /// Create a ratio. Non-positive or non-finite ratios never yield repetitions.
    pub fn new(ratio: f64) -> Self {
        let ratio = if ratio.is_finite() && ratio > 0.0 { ratio } else { 0.0 };
        Self { ratio, prev: None }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Repetitions earned since the previous call.
    ///
    /// The first call only records the starting point.
    pub fn call(&mut self, step: u64) -> u64 {
        if self.ratio == 0.0 {
            return 0;
        }
        let step = step as f64;
        let prev = match self.prev {
            None => {
                self.prev = Some(step);
                return 0;
            }
            Some(prev) => prev,
        };
        if step <= prev {
            return 0;
        }
        let repeats = ((step - prev) * self.ratio).floor();
        if repeats >= 1.0 {
            self.prev = Some(prev + repeats / self.ratio);
        }
        repeats as u64
    }
}
