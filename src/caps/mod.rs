//! Capability registries.
//!
//! Two disjoint namespaces: client capabilities negotiated over CAP, and
//! server capabilities exchanged in the CAPAB handshake. Each registered
//! capability owns one bitmask slot; visibility predicates hide internal
//! pseudo-capabilities (the `?oper_*` buckets) from advertisement while
//! their bits still gate outbound tags.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::state::Client;

/// Advertisement gate: may this client see the capability in CAP LS?
pub type VisibleFn = fn(&Client) -> bool;
/// CAP LS 302 value callback.
pub type ValueFn = fn(&Client) -> Option<String>;

/// A capability being registered.
#[derive(Default)]
pub struct CapDef {
    /// Survives CAP REQ -... attempts to disable it.
    pub sticky: bool,
    pub visible: Option<VisibleFn>,
    pub value: Option<ValueFn>,
}

struct RegisteredCap {
    name: String,
    mask: u64,
    sticky: bool,
    visible: Option<VisibleFn>,
    value: Option<ValueFn>,
}

/// One capability namespace.
#[derive(Default)]
pub struct CapIndex {
    caps: RwLock<Vec<RegisteredCap>>,
    by_name: DashMap<String, u64>,
}

impl CapIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability, allocating the next bitmask slot.
    pub fn register(&self, name: &str, def: CapDef) -> u64 {
        let mut caps = self.caps.write();
        assert!(caps.len() < 64, "capability slots exhausted");
        let mask = 1u64 << caps.len();
        caps.push(RegisteredCap {
            name: name.to_string(),
            mask,
            sticky: def.sticky,
            visible: def.visible,
            value: def.value,
        });
        self.by_name.insert(name.to_string(), mask);
        mask
    }

    pub fn mask_of(&self, name: &str) -> Option<u64> {
        self.by_name.get(name).map(|e| *e.value())
    }

    pub fn is_sticky(&self, mask: u64) -> bool {
        self.caps
            .read()
            .iter()
            .any(|cap| cap.mask & mask != 0 && cap.sticky)
    }

    /// Capability names to advertise to this client, with 302 values.
    pub fn advertised(&self, client: &Client, with_values: bool) -> Vec<String> {
        self.caps
            .read()
            .iter()
            .filter(|cap| cap.visible.map_or(true, |f| f(client)))
            .map(|cap| {
                match (with_values, cap.value.and_then(|f| f(client))) {
                    (true, Some(value)) => format!("{}={}", cap.name, value),
                    _ => cap.name.clone(),
                }
            })
            .collect()
    }

    /// Resolve a REQ list like `cap1 -cap2` into (add, remove) masks.
    /// Returns `None` when any name is unknown, which NAKs the request.
    pub fn resolve_req(&self, request: &str) -> Option<(u64, u64)> {
        let mut add = 0u64;
        let mut remove = 0u64;
        for word in request.split_ascii_whitespace() {
            match word.strip_prefix('-') {
                Some(name) => remove |= self.mask_of(name)?,
                None => add |= self.mask_of(word)?,
            }
        }
        Some((add, remove))
    }
}

/// Split a capability word list into lines under `limit` bytes, for the
/// `CAP * LS :...` continuation protocol.
pub fn paginate(words: &[String], limit: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in words {
        if !current.is_empty() && current.len() + word.len() + 1 > limit {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Masks of the standard client capabilities, registered at startup.
pub struct ClientCaps {
    pub index: Arc<CapIndex>,
    pub message_tags: u64,
    pub server_time: u64,
    pub multi_prefix: u64,
    pub account_notify: u64,
    pub echo_message: u64,
    pub extended_join: u64,
    pub batch: u64,
    pub cap_notify: u64,
    /// `solanum.chat/oper` and its hidden recipient buckets.
    pub oper: u64,
    pub oper_auspex: u64,
    pub oper_justoper: u64,
    pub oper_normal: u64,
}

fn never_visible(_: &Client) -> bool {
    false
}

impl ClientCaps {
    pub fn register() -> ClientCaps {
        let index = Arc::new(CapIndex::new());
        let hidden = CapDef {
            visible: Some(never_visible as VisibleFn),
            ..CapDef::default()
        };
        ClientCaps {
            message_tags: index.register("message-tags", CapDef::default()),
            server_time: index.register("server-time", CapDef::default()),
            multi_prefix: index.register("multi-prefix", CapDef::default()),
            account_notify: index.register("account-notify", CapDef::default()),
            echo_message: index.register("echo-message", CapDef::default()),
            extended_join: index.register("extended-join", CapDef::default()),
            batch: index.register("batch", CapDef::default()),
            cap_notify: index.register("cap-notify", CapDef { sticky: true, ..CapDef::default() }),
            oper: index.register("solanum.chat/oper", CapDef::default()),
            oper_auspex: index.register(
                "?oper_auspex",
                CapDef {
                    visible: Some(never_visible as VisibleFn),
                    ..CapDef::default()
                },
            ),
            oper_justoper: index.register(
                "?oper_justoper",
                CapDef {
                    visible: Some(never_visible as VisibleFn),
                    ..CapDef::default()
                },
            ),
            oper_normal: index.register("?oper_normal", hidden),
            index,
        }
    }
}

/// Masks of the server-link capabilities we speak.
pub struct ServerCaps {
    pub index: Arc<CapIndex>,
    pub qs: u64,
    pub ex: u64,
    pub ie: u64,
    pub kln: u64,
    pub unkln: u64,
    pub encap: u64,
    pub euid: u64,
    pub ban: u64,
    pub services: u64,
}

impl ServerCaps {
    pub fn register() -> ServerCaps {
        let index = Arc::new(CapIndex::new());
        ServerCaps {
            qs: index.register("QS", CapDef::default()),
            ex: index.register("EX", CapDef::default()),
            ie: index.register("IE", CapDef::default()),
            kln: index.register("KLN", CapDef::default()),
            unkln: index.register("UNKLN", CapDef::default()),
            encap: index.register("ENCAP", CapDef::default()),
            euid: index.register("EUID", CapDef::default()),
            ban: index.register("BAN", CapDef::default()),
            services: index.register("SERVICES", CapDef::default()),
            index,
        }
    }

    /// The CAPAB token list for the handshake.
    pub fn capab_string(&self) -> String {
        "QS EX IE KLN UNKLN ENCAP EUID BAN SERVICES".to_string()
    }

    /// Parse a peer's CAPAB token list into a mask.
    pub fn parse_capab(&self, tokens: &str) -> u64 {
        tokens
            .split_ascii_whitespace()
            .filter_map(|t| self.index.mask_of(t))
            .fold(0, |acc, m| acc | m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LocalLink;
    use tokio::sync::mpsc;

    fn test_client() -> Client {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (link, _) = LocalLink::new(tx, 6667, false);
        Client::local("42XAAAAAA".into(), "127.0.0.1".parse().unwrap(), link, 0)
    }

    #[test]
    fn test_masks_double() {
        let index = CapIndex::new();
        let a = index.register("a", CapDef::default());
        let b = index.register("b", CapDef::default());
        let c = index.register("c", CapDef::default());
        assert_eq!((a, b, c), (1, 2, 4));
        assert_eq!(index.mask_of("b"), Some(2));
    }

    #[test]
    fn test_hidden_caps_not_advertised_but_allocated() {
        let caps = ClientCaps::register();
        let client = test_client();
        let names = caps.index.advertised(&client, false);
        assert!(names.iter().any(|n| n == "message-tags"));
        assert!(names.iter().any(|n| n == "solanum.chat/oper"));
        assert!(!names.iter().any(|n| n.starts_with('?')));
        assert_ne!(caps.oper_auspex, 0);
    }

    #[test]
    fn test_resolve_req() {
        let caps = ClientCaps::register();
        let (add, remove) = caps
            .index
            .resolve_req("message-tags -echo-message server-time")
            .unwrap();
        assert_eq!(add, caps.message_tags | caps.server_time);
        assert_eq!(remove, caps.echo_message);
        assert!(caps.index.resolve_req("no-such-cap").is_none());
    }

    #[test]
    fn test_paginate_at_limit() {
        let words: Vec<String> = (0..40).map(|i| format!("capability-{i:02}")).collect();
        let lines = paginate(&words, 100);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.len() <= 100));
        let rejoined: Vec<String> = lines
            .join(" ")
            .split_ascii_whitespace()
            .map(String::from)
            .collect();
        assert_eq!(rejoined, words);
    }

    #[test]
    fn test_server_capab_roundtrip() {
        let caps = ServerCaps::register();
        let mask = caps.parse_capab("QS ENCAP BAN UNKNOWN-TOKEN");
        assert_eq!(mask, caps.qs | caps.encap | caps.ban);
    }
}
