//! Rate limiting primitives

mod adaptive;
mod token_bucket;

pub use adaptive::{AdaptiveTokenBucket, RatioChange, DEFAULT_TUNING_INTERVAL};
pub use token_bucket::{nanos_clock, Clock, TokenBucket};
