//! Global client and channel state.

pub mod channel;
pub mod client;
pub mod uid;

pub use channel::{cmode, Channel, ChannelTable, MemberStatus};
pub use client::{cflags, snomask, umode, Client, LocalLink, Prereg};
pub use uid::UidGenerator;

use std::sync::Arc;

use dashmap::DashMap;
use solanum_proto::casemap::to_irc_lower;

/// Client tables: UID is the primary key, nicks are an index over it.
/// Dead clients are filtered from fresh lookups but stay in the table
/// until their connection task reaps them.
#[derive(Default)]
pub struct ClientTable {
    by_uid: DashMap<String, Arc<Client>>,
    nick_index: DashMap<String, String>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, client: Arc<Client>) {
        self.by_uid.insert(client.uid.clone(), client);
    }

    pub fn by_uid(&self, uid: &str) -> Option<Arc<Client>> {
        self.by_uid
            .get(uid)
            .map(|e| e.value().clone())
            .filter(|c| !c.is_dead())
    }

    pub fn by_nick(&self, nick: &str) -> Option<Arc<Client>> {
        let uid = self.nick_index.get(&to_irc_lower(nick))?.value().clone();
        self.by_uid(&uid)
    }

    /// Claim a nick. Fails when another live client holds it.
    pub fn claim_nick(&self, client: &Arc<Client>, nick: &str) -> bool {
        let key = to_irc_lower(nick);
        if let Some(holder) = self.nick_index.get(&key) {
            if let Some(other) = self.by_uid(holder.value()) {
                if other.uid != client.uid {
                    return false;
                }
            }
        }
        let old_key = client.nick_key();
        self.nick_index.remove(&old_key);
        self.nick_index.insert(key, client.uid.clone());
        *client.nick.write() = nick.to_string();
        true
    }

    /// Remove a client from all indexes.
    pub fn remove(&self, client: &Arc<Client>) {
        self.by_uid.remove(&client.uid);
        let key = client.nick_key();
        self.nick_index
            .remove_if(&key, |_, uid| uid == &client.uid);
    }

    pub fn local_clients(&self) -> Vec<Arc<Client>> {
        self.by_uid
            .iter()
            .map(|e| e.value().clone())
            .filter(|c| c.is_local() && !c.is_dead())
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<Client>> {
        self.by_uid
            .iter()
            .map(|e| e.value().clone())
            .filter(|c| !c.is_dead())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uid.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn local(uid: &str) -> Arc<Client> {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (link, _) = LocalLink::new(tx, 6667, false);
        Arc::new(Client::local(
            uid.to_string(),
            "127.0.0.1".parse().unwrap(),
            link,
            0,
        ))
    }

    #[test]
    fn test_nick_claim_conflicts_fold_case() {
        let table = ClientTable::new();
        let a = local("42XAAAAAA");
        let b = local("42XAAAAAB");
        table.insert(a.clone());
        table.insert(b.clone());

        assert!(table.claim_nick(&a, "Alice[1]"));
        assert!(!table.claim_nick(&b, "ALICE[1]"));
        // RFC1459 folding: {} are the lowercase of []
        assert!(!table.claim_nick(&b, "alice{1}"));
        assert!(table.claim_nick(&b, "bob"));
        assert!(Arc::ptr_eq(&table.by_nick("ALICE[1]").unwrap(), &a));
    }

    #[test]
    fn test_own_nick_change_is_allowed() {
        let table = ClientTable::new();
        let a = local("42XAAAAAA");
        table.insert(a.clone());
        assert!(table.claim_nick(&a, "alice"));
        assert!(table.claim_nick(&a, "AliCe"));
    }

    #[test]
    fn test_dead_clients_hidden_from_lookup() {
        let table = ClientTable::new();
        let a = local("42XAAAAAA");
        table.insert(a.clone());
        table.claim_nick(&a, "alice");
        a.set_flag(cflags::DEAD);
        assert!(table.by_nick("alice").is_none());
        assert!(table.by_uid("42XAAAAAA").is_none());
        // and the nick is claimable again
        let b = local("42XAAAAAB");
        table.insert(b.clone());
        assert!(table.claim_nick(&b, "alice"));
    }

    #[test]
    fn test_remove_clears_both_indexes() {
        let table = ClientTable::new();
        let a = local("42XAAAAAA");
        table.insert(a.clone());
        table.claim_nick(&a, "alice");
        table.remove(&a);
        assert!(table.is_empty());
        assert!(table.by_nick("alice").is_none());
    }
}
