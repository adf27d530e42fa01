//! Per-IP request rate limiting in front of `/drip`
//!
//! Each origin gets its own governor limiter allowing `max_requests` per
//! window. Limiters live in a moka cache and are evicted once idle.

use crate::api::{client_origin, AppState};
use crate::config::RateLimitSettings;
use crate::error::FaucetError;
use crate::metrics::outcome;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type RateLimiterImpl = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct OriginRateLimiter {
    quota: Quota,
    clock: DefaultClock,
    limiters: moka::future::Cache<String, Arc<RateLimiterImpl>>,
}

impl OriginRateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        let burst = NonZeroU32::new(settings.max_requests).unwrap_or(NonZeroU32::MIN);
        let period = settings.window / burst.get();
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);

        let limiters = moka::future::Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(settings.window.saturating_mul(2))
            .build();

        Self {
            quota,
            clock: DefaultClock::default(),
            limiters,
        }
    }

    /// `Err` carries how long the origin has to wait.
    pub async fn check(&self, origin: &str) -> Result<(), Duration> {
        let quota = self.quota;
        let limiter = self
            .limiters
            .get_with(origin.to_string(), async move {
                Arc::new(RateLimiter::direct(quota))
            })
            .await;

        limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

/// Middleware rejecting origins over their request budget
pub async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let origin = client_origin(request.headers(), peer, state.trust_proxy_headers);

    if let Err(wait) = state.rate_limiter.check(&origin).await {
        warn!("Rate limit exceeded for {}", origin);
        state.service.metrics().record_outcome(outcome::RATE_LIMITED);
        let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        return FaucetError::RateLimitExceeded(secs).into_response();
    }

    debug!("Rate limit passed for {}", origin);
    next.run(request).await
}
