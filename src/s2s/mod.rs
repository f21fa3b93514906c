//! Server-to-server linking.

pub mod ban;
pub mod propagate;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A linked peer server.
#[derive(Debug)]
pub struct Server {
    pub name: String,
    pub sid: String,
    /// Negotiated server-capability mask.
    pub caps: u64,
    tx: mpsc::UnboundedSender<String>,
}

impl Server {
    pub fn new(name: String, sid: String, caps: u64, tx: mpsc::UnboundedSender<String>) -> Server {
        Server { name, sid, caps, tx }
    }

    pub fn send(&self, line: String) {
        // a failed send means the link task is tearing down; the SQUIT
        // path owns cleanup
        let _ = self.tx.send(line);
    }

    pub fn has_cap(&self, mask: u64) -> bool {
        mask == 0 || self.caps & mask == mask
    }
}

/// All directly linked peers, keyed by SID.
#[derive(Default)]
pub struct ServerList {
    peers: DashMap<String, Arc<Server>>,
}

impl ServerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, server: Arc<Server>) {
        self.peers.insert(server.sid.clone(), server);
    }

    pub fn remove(&self, sid: &str) -> Option<Arc<Server>> {
        self.peers.remove(sid).map(|(_, s)| s)
    }

    pub fn by_sid(&self, sid: &str) -> Option<Arc<Server>> {
        self.peers.get(sid).map(|e| e.value().clone())
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<Server>> {
        self.peers
            .iter()
            .find(|e| solanum_proto::casemap::irccmp(&e.value().name, name))
            .map(|e| e.value().clone())
    }

    pub fn all(&self) -> Vec<Arc<Server>> {
        self.peers.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Send to every peer whose name matches `target` and which holds
    /// `caps`, excluding `except_sid` (normally the message's origin).
    pub fn send_to_matching(&self, target: &str, caps: u64, except_sid: Option<&str>, line: &str) {
        for entry in self.peers.iter() {
            let server = entry.value();
            if Some(server.sid.as_str()) == except_sid {
                continue;
            }
            if !server.has_cap(caps) {
                continue;
            }
            if !solanum_proto::mask_match(target, &server.name) {
                continue;
            }
            server.send(line.to_string());
        }
    }
}
