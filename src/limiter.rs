use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use governor::{Quota, RateLimiter};
use tracing::debug;

use crate::model::ProviderId;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// How often a provider tolerates being called, as advertised by its adapter.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitHint {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitHint {
    pub fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(60),
        }
    }
}

/// Registry of one limiter per provider, built once at startup and shared by
/// every symbol task.
pub struct ProviderLimiters {
    limiters: HashMap<ProviderId, Arc<DirectRateLimiter>>,
}

impl ProviderLimiters {
    pub fn new(hints: impl IntoIterator<Item = (ProviderId, RateLimitHint)>) -> Self {
        let limiters = hints
            .into_iter()
            .map(|(id, hint)| (id, Arc::new(RateLimiter::direct(quota_from_hint(hint)))))
            .collect();
        Self { limiters }
    }

    /// Waits until the provider's rate budget permits another call.
    pub async fn acquire(&self, id: ProviderId) {
        if let Some(limiter) = self.limiters.get(&id) {
            if limiter.check().is_err() {
                debug!(provider = %id, "rate budget exhausted, waiting");
                limiter.until_ready().await;
            }
        }
    }

    /// Non-blocking check, used by tests.
    pub fn try_acquire(&self, id: ProviderId) -> bool {
        self.limiters
            .get(&id)
            .map(|limiter| limiter.check().is_ok())
            .unwrap_or(true)
    }
}

fn quota_from_hint(hint: RateLimitHint) -> Quota {
    let safe_limit = hint.max_requests.max(1);
    let burst = NonZeroU32::new(safe_limit).expect("safe limit is non-zero");

    let seconds_per_cell = (hint.window.as_secs_f64() / f64::from(safe_limit)).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .expect("period is always greater than zero")
        .allow_burst(burst)
}
