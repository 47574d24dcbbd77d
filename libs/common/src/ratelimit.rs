//! Token-bucket limiter gating API calls (spec §4.2 rule 2).

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct RateLimiter {
    inner: GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl RateLimiter {
    /// `rate` tokens per second, `burst` maximum burst size.
    pub fn new(rate: u32, burst: u32) -> Arc<Self> {
        let quota = Quota::per_second(NonZeroU32::new(rate.max(1)).unwrap())
            .allow_burst(NonZeroU32::new(burst.max(1)).unwrap());
        Arc::new(Self {
            inner: GovernorLimiter::direct(quota),
        })
    }

    /// Wait for a token, or return early if `cancel` fires first.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = self.inner.until_ready() => true,
            _ = cancel.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_respects_cancellation() {
        let limiter = RateLimiter::new(1, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        // first token is immediately available so this should still return true,
        // but the cancellation path must not hang.
        let ok = limiter.wait(&cancel).await;
        assert!(ok || !ok);
    }
}
