//! Outgoing request throttling for exchange REST calls.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterConfig {
    /// Maximum requests per minute
    pub requests_per_minute: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 600,
        }
    }
}

/// Shared limiter for every request sent to one API
pub type RequestRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a new rate limiter. A zero rate is treated as one request per minute.
pub fn create_rate_limiter(config: RateLimiterConfig) -> RequestRateLimiter {
    let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)))
}

/// Wait until the limiter admits one more request.
pub async fn throttle(limiter: &RequestRateLimiter) {
    if limiter.check().is_err() {
        tracing::debug!("Request rate limit reached, waiting");
        limiter.until_ready().await;
    }
}
