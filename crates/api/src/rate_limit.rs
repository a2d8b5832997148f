//! Per-client request quota keyed by IP.
//!
//! Each client gets `limit` requests per `period`, replenished continuously
//! (GCRA). Idle keys are evicted once the key map grows past a threshold.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{Quota, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use tracing::debug;

use crate::app::errors::ApiError;

/// Key count at which idle clients are evicted.
const SWEEP_THRESHOLD: usize = 4096;

type KeyedLimiter = governor::RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

pub struct RateLimiter {
    quota: Option<Quota>,
    inner: Option<KeyedLimiter>,
}

impl core::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("quota", &self.quota)
            .field("clients", &self.inner.as_ref().map(KeyedLimiter::len))
            .finish()
    }
}

impl RateLimiter {
    /// `limit` requests per `period` for each client. A zero limit or period
    /// disables limiting.
    pub fn new(period: Duration, limit: u64) -> Self {
        let quota = NonZeroU32::new(u32::try_from(limit).unwrap_or(u32::MAX)).and_then(|burst| {
            let interval = (period / burst.get()).max(Duration::from_nanos(1));
            Quota::with_period(interval)
                .filter(|_| !period.is_zero())
                .map(|q| q.allow_burst(burst))
        });

        Self {
            quota,
            inner: quota.map(KeyedLimiter::keyed),
        }
    }

    /// Count one request from `client`. `false` once its quota is spent.
    pub fn check(&self, client: IpAddr) -> bool {
        let Some(limiter) = &self.inner else {
            return true;
        };

        if limiter.len() >= SWEEP_THRESHOLD {
            limiter.retain_recent();
        }
        limiter.check_key(&client).is_ok()
    }
}

pub async fn rate_limit(State(limiter): State<Arc<RateLimiter>>, req: Request, next: Next) -> Result<Response, ApiError> {
    let client = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    if !limiter.check(client) {
        debug!(%client, "rate limit exceeded");
        return Err(ApiError::TooManyRequests);
    }
    Ok(next.run(req).await)
}
