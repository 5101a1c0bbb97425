//! Token bucket over an arbitrary monotonic clock

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Monotonic counter the bucket refills against.
///
/// Units are up to the caller: nanoseconds, completed requests, ...
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Clock counting nanoseconds since its creation
pub fn nanos_clock() -> Clock {
    let start = Instant::now();
    Arc::new(move || start.elapsed().as_nanos() as u64)
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refilled_at: u64,
}

/// Token bucket refilled at `rate` tokens per clock unit, capped at `burst`.
///
/// Starts full.
pub struct TokenBucket {
    clock: Clock,
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(clock: Clock, rate: f64, burst: f64) -> Self {
        let now = clock();
        Self {
            clock,
            rate: rate.max(0.0),
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refilled_at: now,
            }),
        }
    }

    /// Bucket refilling at `rate_per_sec` tokens per second of wall time
    pub fn per_second(rate_per_sec: f64, burst: f64) -> Self {
        Self::new(nanos_clock(), rate_per_sec / 1e9, burst)
    }

    /// Take one token if available
    pub fn request(&self) -> bool {
        self.request_n(1.0)
    }

    /// Take `n` tokens if that many are available; takes nothing otherwise
    pub fn request_n(&self, n: f64) -> bool {
        let now = (self.clock)();
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        if state.tokens < n {
            return false;
        }
        state.tokens -= n;
        true
    }

    /// Tokens currently available
    pub fn tokens(&self) -> f64 {
        let now = (self.clock)();
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.tokens
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> f64 {
        self.burst
    }

    fn refill(&self, state: &mut BucketState, now: u64) {
        let elapsed = now.saturating_sub(state.last_refilled_at);
        if elapsed == 0 {
            return;
        }
        state.tokens = (state.tokens + elapsed as f64 * self.rate).min(self.burst);
        state.last_refilled_at = now;
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucket")
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .field("tokens", &self.state.lock().tokens)
            .finish()
    }
}
