//! Reject cache.
//!
//! A client refused at registration (K-lined, banned, class full) tends to
//! reconnect immediately and repeatedly. The reject cache remembers the IP
//! for a configured window so the retry is cut off at accept, before any
//! parsing or lookups happen.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

#[derive(Debug)]
struct RejectEntry {
    expires: i64,
    count: u64,
}

#[derive(Default)]
pub struct RejectCache {
    entries: DashMap<IpAddr, RejectEntry>,
    hits: AtomicU64,
}

impl RejectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a rejection for `duration` seconds.
    pub fn add(&self, ip: IpAddr, now: i64, duration: u64) {
        self.entries
            .entry(ip)
            .and_modify(|e| {
                e.expires = now + duration as i64;
                e.count += 1;
            })
            .or_insert(RejectEntry {
                expires: now + duration as i64,
                count: 1,
            });
    }

    /// Whether a fresh connection from this IP should be cut off.
    /// A hit refreshes nothing; the entry ages out on schedule.
    pub fn check(&self, ip: IpAddr, now: i64) -> bool {
        match self.entries.get(&ip) {
            Some(entry) if entry.expires > now => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Total accepted-then-dropped connections, for STATS.
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Periodic sweep of aged-out entries.
    pub fn prune(&self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires > now);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_rejected_ip_short_circuits() {
        let cache = RejectCache::new();
        cache.add(ip("1.2.3.4"), 100, 60);
        assert!(cache.check(ip("1.2.3.4"), 110));
        assert!(!cache.check(ip("4.3.2.1"), 110));
        assert_eq!(cache.hit_count(), 1);
    }

    #[test]
    fn test_entries_age_out() {
        let cache = RejectCache::new();
        cache.add(ip("1.2.3.4"), 100, 60);
        assert!(!cache.check(ip("1.2.3.4"), 161));
        assert_eq!(cache.prune(161), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_repeat_rejection_extends() {
        let cache = RejectCache::new();
        cache.add(ip("1.2.3.4"), 100, 60);
        cache.add(ip("1.2.3.4"), 150, 60);
        assert!(cache.check(ip("1.2.3.4"), 200));
    }
}
