//! Connection classes: named quota pools with per-CIDR limits.
//!
//! `current_users` counts every client whose attached auth block names the
//! class. A class removed by rehash is marked with `max_users = -1` and
//! freed once its last client detaches.

use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use ipnet::IpNet;

use crate::config::ClassBlock;

/// Why a class refused an attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    /// The class user quota is exhausted.
    ClassFull,
    /// Too many connections from this prefix.
    CidrFull,
}

#[derive(Debug)]
pub struct Class {
    pub name: String,
    max_users: AtomicI64,
    current: AtomicI64,
    pub ping_frequency: u64,
    pub connect_frequency: u64,
    pub sendq: usize,
    pub max_autoconn: usize,
    cidr_ipv4_bitlen: Option<u8>,
    cidr_ipv6_bitlen: Option<u8>,
    number_per_cidr: Option<u32>,
    cidr_counts: DashMap<IpNet, u32>,
}

impl Class {
    pub fn from_block(block: &ClassBlock) -> Class {
        Class {
            name: block.name.clone(),
            max_users: AtomicI64::new(block.max_users),
            current: AtomicI64::new(0),
            ping_frequency: block.ping_frequency,
            connect_frequency: block.connect_frequency,
            sendq: block.sendq,
            max_autoconn: block.max_autoconn,
            cidr_ipv4_bitlen: block.cidr_ipv4_bitlen,
            cidr_ipv6_bitlen: block.cidr_ipv6_bitlen,
            number_per_cidr: block.number_per_cidr,
            cidr_counts: DashMap::new(),
        }
    }

    /// A permissive default class for configs that name none.
    pub fn default_class() -> Class {
        Class {
            name: "default".to_string(),
            max_users: AtomicI64::new(100),
            current: AtomicI64::new(0),
            ping_frequency: 180,
            connect_frequency: 300,
            sendq: 400_000,
            max_autoconn: 0,
            cidr_ipv4_bitlen: None,
            cidr_ipv6_bitlen: None,
            number_per_cidr: None,
            cidr_counts: DashMap::new(),
        }
    }

    pub fn current_users(&self) -> i64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn max_users(&self) -> i64 {
        self.max_users.load(Ordering::Acquire)
    }

    /// Mark the class as removed from config; reaped when drained.
    pub fn retire(&self) {
        self.max_users.store(-1, Ordering::Release);
    }

    pub fn retired(&self) -> bool {
        self.max_users() < 0
    }

    fn prefix_of(&self, ip: IpAddr) -> Option<IpNet> {
        let bits = match ip {
            IpAddr::V4(_) => self.cidr_ipv4_bitlen?,
            IpAddr::V6(_) => self.cidr_ipv6_bitlen?,
        };
        IpNet::new(ip, bits).ok().map(|net| net.trunc())
    }

    /// Count a client in. `exempt` skips both limits but still counts, so
    /// STATS and the class invariant stay truthful.
    pub fn try_attach(&self, ip: IpAddr, exempt: bool) -> Result<(), AttachError> {
        if !exempt {
            let max = self.max_users();
            if max >= 0 && self.current_users() >= max {
                return Err(AttachError::ClassFull);
            }
        }

        if let (Some(prefix), Some(limit)) = (self.prefix_of(ip), self.number_per_cidr) {
            let mut count = self.cidr_counts.entry(prefix).or_insert(0);
            if !exempt && *count >= limit {
                return Err(AttachError::CidrFull);
            }
            *count += 1;
        }

        self.current.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    pub fn detach(&self, ip: IpAddr) {
        if let Some(prefix) = self.prefix_of(ip) {
            if let Some(mut count) = self.cidr_counts.get_mut(&prefix) {
                *count = count.saturating_sub(1);
            }
            self.cidr_counts.retain(|_, v| *v > 0);
        }
        self.current.fetch_sub(1, Ordering::AcqRel);
    }
}

/// All configured classes.
#[derive(Default)]
pub struct ClassTable {
    classes: DashMap<String, Arc<Class>>,
}

impl ClassTable {
    pub fn from_config(blocks: &[ClassBlock]) -> ClassTable {
        let table = ClassTable::default();
        table
            .classes
            .insert("default".to_string(), Arc::new(Class::default_class()));
        for block in blocks {
            table
                .classes
                .insert(block.name.clone(), Arc::new(Class::from_block(block)));
        }
        table
    }

    pub fn get(&self, name: &str) -> Option<Arc<Class>> {
        self.classes.get(name).map(|e| e.value().clone())
    }

    pub fn all(&self) -> Vec<Arc<Class>> {
        self.classes.iter().map(|e| e.value().clone()).collect()
    }

    /// Rehash: install the new set, retire classes that disappeared.
    /// A retired class with clients still attached lingers until empty.
    pub fn reload(&self, blocks: &[ClassBlock]) {
        let keep: Vec<String> = blocks.iter().map(|b| b.name.clone()).collect();
        self.classes.retain(|name, class| {
            if name == "default" || keep.contains(name) {
                true
            } else {
                class.retire();
                class.current_users() > 0
            }
        });
        for block in blocks {
            match self.classes.get(&block.name) {
                // keep the live counter; adopt new limits
                Some(existing) => {
                    existing
                        .max_users
                        .store(block.max_users, Ordering::Release);
                }
                None => {
                    self.classes
                        .insert(block.name.clone(), Arc::new(Class::from_block(block)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(max: i64, v4_bits: Option<u8>, per_cidr: Option<u32>) -> Class {
        Class::from_block(&ClassBlock {
            name: "users".to_string(),
            max_users: max,
            ping_frequency: 30,
            connect_frequency: 300,
            sendq: 400_000,
            max_autoconn: 0,
            cidr_ipv4_bitlen: v4_bits,
            cidr_ipv6_bitlen: None,
            number_per_cidr: per_cidr,
        })
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_class_quota() {
        let class = class(2, None, None);
        assert!(class.try_attach(ip("1.1.1.1"), false).is_ok());
        assert!(class.try_attach(ip("1.1.1.2"), false).is_ok());
        assert_eq!(
            class.try_attach(ip("1.1.1.3"), false),
            Err(AttachError::ClassFull)
        );
        class.detach(ip("1.1.1.1"));
        assert!(class.try_attach(ip("1.1.1.3"), false).is_ok());
        assert_eq!(class.current_users(), 2);
    }

    #[test]
    fn test_cidr_limit_per_prefix() {
        let class = class(100, Some(24), Some(2));
        assert!(class.try_attach(ip("10.0.0.1"), false).is_ok());
        assert!(class.try_attach(ip("10.0.0.2"), false).is_ok());
        assert_eq!(
            class.try_attach(ip("10.0.0.3"), false),
            Err(AttachError::CidrFull)
        );
        // a different /24 is unaffected
        assert!(class.try_attach(ip("10.0.1.1"), false).is_ok());
        class.detach(ip("10.0.0.1"));
        assert!(class.try_attach(ip("10.0.0.3"), false).is_ok());
    }

    #[test]
    fn test_exempt_bypasses_but_still_counts() {
        let class = class(1, Some(24), Some(1));
        assert!(class.try_attach(ip("10.0.0.1"), false).is_ok());
        assert!(class.try_attach(ip("10.0.0.2"), true).is_ok());
        assert_eq!(class.current_users(), 2);
    }

    #[test]
    fn test_reload_retires_missing_classes() {
        let table = ClassTable::from_config(&[ClassBlock {
            name: "users".to_string(),
            max_users: 10,
            ping_frequency: 30,
            connect_frequency: 300,
            sendq: 1,
            max_autoconn: 0,
            cidr_ipv4_bitlen: None,
            cidr_ipv6_bitlen: None,
            number_per_cidr: None,
        }]);
        let users = table.get("users").unwrap();
        users.try_attach(ip("1.1.1.1"), false).unwrap();

        table.reload(&[]);
        // still reachable for the attached client, but retired
        assert!(users.retired());

        users.detach(ip("1.1.1.1"));
        table.reload(&[]);
        assert!(table.get("users").is_none());
    }
}
