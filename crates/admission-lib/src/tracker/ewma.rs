//! Exponentially weighted moving average

/// Default smoothing factor
pub const DEFAULT_ALPHA: f64 = 0.3;

/// EWMA where each update computes `alpha * sample + (1 - alpha) * previous`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ewma {
    alpha: f64,
    average: f64,
}

impl Ewma {
    /// Create an average starting at `initial`.
    ///
    /// `alpha` outside `(0, 1]` is clamped into range.
    pub fn new(alpha: f64, initial: f64) -> Self {
        let alpha = if alpha.is_finite() {
            alpha.clamp(f64::MIN_POSITIVE, 1.0)
        } else {
            DEFAULT_ALPHA
        };
        Self {
            alpha,
            average: initial,
        }
    }

    pub fn add_value(&mut self, sample: f64) {
        self.average = self.alpha * sample + (1.0 - self.alpha) * self.average;
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Default for Ewma {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recurrence_holds_for_every_update() {
        let samples = [50.0, 80.0, 10.0, 95.0, 0.0, 33.3];
        let alpha = 0.3;
        let mut ewma = Ewma::new(alpha, 5.0);
        let mut expected = 5.0;

        for sample in samples {
            ewma.add_value(sample);
            expected = alpha * sample + (1.0 - alpha) * expected;
            assert!((ewma.average() - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_alpha_one_tracks_latest() {
        let mut ewma = Ewma::new(1.0, 0.0);
        ewma.add_value(42.0);
        assert_eq!(ewma.average(), 42.0);
        ewma.add_value(7.0);
        assert_eq!(ewma.average(), 7.0);
    }

    #[test]
    fn test_alpha_clamped() {
        assert_eq!(Ewma::new(3.0, 0.0).alpha(), 1.0);
        assert!(Ewma::new(-1.0, 0.0).alpha() > 0.0);
        assert_eq!(Ewma::new(f64::NAN, 0.0).alpha(), DEFAULT_ALPHA);
    }
}
