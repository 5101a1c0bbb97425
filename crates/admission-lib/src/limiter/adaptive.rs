//! Self-tuning ratio limiter used by the I/O controller
//!
//! The bucket is clocked by completed requests rather than wall time and
//! refills at `ratio` tokens per completion, so a taken token marks roughly
//! `ratio` of the breaching requests as rejection candidates. The ratio adapts
//! to sustained pressure and the bucket is replaced, never mutated, when the
//! ratio or burst changes.

use super::token_bucket::{Clock, TokenBucket};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Minimum spacing between two tuning steps
pub const DEFAULT_TUNING_INTERVAL: Duration = Duration::from_secs(15);

/// A ratio adjustment made by [`AdaptiveTokenBucket::tune`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatioChange {
    pub previous: f64,
    pub current: f64,
}

#[derive(Debug)]
struct RatioLimiter {
    bucket: TokenBucket,
    ratio: f64,
    baseline: f64,
    burst: f64,
}

#[derive(Debug, Clone, Copy)]
struct LastBreach {
    tuned_at: Instant,
    usage: f64,
}

/// Token bucket whose refill ratio self-tunes from observed pressure
#[derive(Debug)]
pub struct AdaptiveTokenBucket {
    completions: Arc<AtomicU64>,
    limiter: RwLock<Arc<RatioLimiter>>,
    last_breach: Mutex<Option<LastBreach>>,
    tuning_interval: Duration,
}

fn clamp_ratio(ratio: f64) -> f64 {
    if ratio.is_nan() {
        return f64::MIN_POSITIVE;
    }
    ratio.clamp(f64::MIN_POSITIVE, 1.0)
}

impl AdaptiveTokenBucket {
    pub fn new(baseline: f64, burst: f64) -> Self {
        Self::with_tuning_interval(baseline, burst, DEFAULT_TUNING_INTERVAL)
    }

    pub fn with_tuning_interval(baseline: f64, burst: f64, tuning_interval: Duration) -> Self {
        let completions = Arc::new(AtomicU64::new(0));
        let baseline = clamp_ratio(baseline);
        let limiter = Self::build(&completions, baseline, baseline, burst);
        Self {
            completions,
            limiter: RwLock::new(Arc::new(limiter)),
            last_breach: Mutex::new(None),
            tuning_interval,
        }
    }

    fn build(completions: &Arc<AtomicU64>, ratio: f64, baseline: f64, burst: f64) -> RatioLimiter {
        let counter = completions.clone();
        let clock: Clock = Arc::new(move || counter.load(Ordering::Acquire));
        RatioLimiter {
            bucket: TokenBucket::new(clock, ratio, burst),
            ratio,
            baseline,
            burst,
        }
    }

    fn current(&self) -> Arc<RatioLimiter> {
        self.limiter.read().clone()
    }

    fn replace(&self, ratio: f64, baseline: f64, burst: f64) {
        let limiter = Self::build(&self.completions, ratio, baseline, burst);
        *self.limiter.write() = Arc::new(limiter);
    }

    /// Take one token; `true` marks the caller as a rejection candidate
    pub fn request(&self) -> bool {
        self.current().bucket.request()
    }

    /// Advance the completion clock
    pub fn record_completion(&self) {
        self.completions.fetch_add(1, Ordering::AcqRel);
    }

    pub fn completions(&self) -> u64 {
        self.completions.load(Ordering::Acquire)
    }

    /// Effective rejection ratio
    pub fn ratio(&self) -> f64 {
        self.current().ratio
    }

    pub fn baseline(&self) -> f64 {
        self.current().baseline
    }

    pub fn burst(&self) -> f64 {
        self.current().burst
    }

    /// Rebuild at the configured baseline when it or the burst changed.
    /// Returns whether the limiter was replaced.
    pub fn sync_settings(&self, baseline: f64, burst: f64) -> bool {
        let baseline = clamp_ratio(baseline);
        // Serialized with tune so a rebuild never starts from a replaced limiter
        let mut last_breach = self.last_breach.lock();
        let current = self.current();
        if current.baseline == baseline && current.burst == burst {
            return false;
        }
        self.replace(baseline, baseline, burst);
        *last_breach = None;
        true
    }

    /// Drop back to the baseline ratio once pressure is gone.
    /// Returns whether the ratio changed.
    pub fn reset_ratio(&self) -> bool {
        let mut last_breach = self.last_breach.lock();
        *last_breach = None;
        let current = self.current();
        if current.ratio == current.baseline {
            return false;
        }
        self.replace(current.baseline, current.baseline, current.burst);
        true
    }

    /// Feed one breach observation.
    ///
    /// At most once per tuning interval the ratio is multiplied by `rate` when
    /// usage did not drop since the previous tuned breach, and divided by it
    /// otherwise. The first breach only records the usage.
    pub fn tune(&self, usage: f64, rate: f64) -> Option<RatioChange> {
        let now = Instant::now();
        let mut last_breach = self.last_breach.lock();

        let Some(previous) = *last_breach else {
            *last_breach = Some(LastBreach {
                tuned_at: now,
                usage,
            });
            return None;
        };
        if now.duration_since(previous.tuned_at) < self.tuning_interval {
            return None;
        }

        *last_breach = Some(LastBreach {
            tuned_at: now,
            usage,
        });

        let current = self.current();
        let next = if usage >= previous.usage {
            current.ratio * rate
        } else {
            current.ratio / rate
        };
        let next = clamp_ratio(next);
        if next == current.ratio {
            return None;
        }

        self.replace(next, current.baseline, current.burst);
        Some(RatioChange {
            previous: current.ratio,
            current: next,
        })
    }
}
