//! Rate limiting.
//!
//! Two limiters with different scopes: a governor-backed per-IP connection
//! limiter consulted at accept, and a per-client token bucket consumed by
//! expensive commands (WHOIS, LIST, MONITOR).

use std::net::IpAddr;
use std::num::NonZeroU32;

use dashmap::DashMap;
use governor::{Quota, RateLimiter as GovRateLimiter};
use nonzero_ext::nonzero;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::GeneralConfig;

type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Per-client command token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last: f64,
}

pub struct RateLimitManager {
    /// Connection attempts per IP.
    connection_limiters: DashMap<IpAddr, DirectRateLimiter>,
    /// Expensive-command buckets per UID.
    command_buckets: DashMap<String, Mutex<TokenBucket>>,
    max_tokens: f64,
    /// Seconds to replenish one token.
    period: f64,
}

impl RateLimitManager {
    pub fn new(general: &GeneralConfig) -> Self {
        RateLimitManager {
            connection_limiters: DashMap::new(),
            command_buckets: DashMap::new(),
            max_tokens: general.max_ratelimit_tokens as f64,
            period: general.ratelimit_period.max(1) as f64,
        }
    }

    /// One connection per second per IP with a small burst.
    pub fn check_connection_rate(&self, ip: IpAddr) -> bool {
        let limiter = self.connection_limiters.entry(ip).or_insert_with(|| {
            GovRateLimiter::direct(
                Quota::per_second(nonzero!(1u32)).allow_burst(NonZeroU32::new(4).unwrap()),
            )
        });
        let allowed = limiter.check().is_ok();
        if !allowed {
            debug!(ip = %ip, "connection rate limit exceeded");
        }
        allowed
    }

    /// Consume `cost` tokens for an expensive command. `now` is seconds on
    /// any monotonic scale. Returns false when the bucket is empty.
    pub fn ratelimit_client(&self, uid: &str, cost: u32, now: f64) -> bool {
        let bucket = self
            .command_buckets
            .entry(uid.to_string())
            .or_insert_with(|| {
                Mutex::new(TokenBucket {
                    tokens: self.max_tokens,
                    last: now,
                })
            });
        let mut bucket = bucket.lock();
        let elapsed = (now - bucket.last).max(0.0);
        bucket.last = now;
        bucket.tokens = (bucket.tokens + elapsed / self.period).min(self.max_tokens);
        if bucket.tokens < cost as f64 {
            debug!(uid = %uid, cost, "command rate limit exceeded");
            return false;
        }
        bucket.tokens -= cost as f64;
        true
    }

    /// Drop per-client state on disconnect.
    pub fn remove_client(&self, uid: &str) {
        self.command_buckets.remove(uid);
    }

    /// Bound memory; called from the maintenance task.
    pub fn cleanup(&self) {
        const MAX_ENTRIES: usize = 10_000;
        if self.connection_limiters.len() > MAX_ENTRIES {
            self.connection_limiters.clear();
            debug!("cleared connection rate limiters");
        }
        if self.command_buckets.len() > MAX_ENTRIES {
            self.command_buckets.clear();
            debug!("cleared command rate limit buckets");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(tokens: u32, period: u64) -> RateLimitManager {
        let mut general = GeneralConfig::default();
        general.max_ratelimit_tokens = tokens;
        general.ratelimit_period = period;
        RateLimitManager::new(&general)
    }

    #[test]
    fn test_bucket_drains_and_refills() {
        let mgr = manager(3, 2);
        assert!(mgr.ratelimit_client("u1", 1, 0.0));
        assert!(mgr.ratelimit_client("u1", 2, 0.0));
        assert!(!mgr.ratelimit_client("u1", 1, 0.0));
        // 2 seconds replenishes one token
        assert!(mgr.ratelimit_client("u1", 1, 2.0));
        assert!(!mgr.ratelimit_client("u1", 1, 2.0));
    }

    #[test]
    fn test_bucket_caps_at_max() {
        let mgr = manager(3, 1);
        assert!(mgr.ratelimit_client("u1", 3, 0.0));
        // a long quiet period cannot bank more than max tokens
        assert!(mgr.ratelimit_client("u1", 3, 1000.0));
        assert!(!mgr.ratelimit_client("u1", 1, 1000.0));
    }

    #[test]
    fn test_buckets_are_per_client() {
        let mgr = manager(1, 1);
        assert!(mgr.ratelimit_client("u1", 1, 0.0));
        assert!(mgr.ratelimit_client("u2", 1, 0.0));
        assert!(!mgr.ratelimit_client("u1", 1, 0.0));
    }

    #[test]
    fn test_connection_rate_burst_then_blocked() {
        let mgr = manager(1, 1);
        let ip: IpAddr = "9.9.9.9".parse().unwrap();
        let mut allowed = 0;
        for _ in 0..10 {
            if mgr.check_connection_rate(ip) {
                allowed += 1;
            }
        }
        assert!(allowed >= 1 && allowed <= 5);
    }
}
