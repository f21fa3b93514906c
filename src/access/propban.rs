//! Network-propagated bans.
//!
//! Every ban carried by the BAN message lives in this index keyed by
//! `(kind, user, host)`, in addition to the address hash while active. An
//! expired ban stays here as a tombstone until its lifetime passes so that
//! replayed BAN messages from slow peers cannot resurrect it.

use std::sync::Arc;

use dashmap::DashMap;
use solanum_proto::casemap::to_irc_lower;

use super::conf::{BanKind, ConfItem};
use super::hostmask::AddressTable;

/// Index key; user is absent for xlines and resvs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropKey {
    pub kind: BanKind,
    pub user: Option<String>,
    pub host: String,
}

impl PropKey {
    pub fn new(kind: BanKind, user: Option<&str>, host: &str) -> PropKey {
        PropKey {
            kind,
            user: user.map(to_irc_lower),
            host: to_irc_lower(host),
        }
    }
}

/// One inbound or locally-issued BAN, in wire units: `created` is an
/// instant, `duration` and `lifetime_duration` are relative to it.
#[derive(Debug, Clone)]
pub struct BanUpdate {
    pub kind: BanKind,
    pub user: Option<String>,
    pub host: String,
    pub created: i64,
    pub duration: i64,
    pub lifetime_duration: i64,
    pub set_by: String,
    pub reason: String,
    pub oper_reason: Option<String>,
}

impl BanUpdate {
    /// A duration of zero unsets the ban, leaving only the tombstone.
    pub fn is_removal(&self) -> bool {
        self.duration == 0
    }
}

/// Outcome of applying a BAN to the index.
pub enum Applied {
    /// No record existed; this one is now live.
    Inserted(Arc<ConfItem>),
    /// An existing record was deactivated and superseded.
    Replaced {
        old: Arc<ConfItem>,
        new: Arc<ConfItem>,
    },
    /// Exact replay of what we already hold.
    Unchanged,
    /// Our stored record is strictly newer; the caller should re-advertise
    /// it toward the message's origin.
    Rejected(Arc<ConfItem>),
}

#[derive(Default)]
pub struct PropBans {
    index: DashMap<PropKey, Arc<ConfItem>>,
}

impl PropBans {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &PropKey) -> Option<Arc<ConfItem>> {
        self.index.get(key).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Snapshot for bursting to a newly linked peer.
    pub fn all(&self) -> Vec<Arc<ConfItem>> {
        self.index.iter().map(|e| e.value().clone()).collect()
    }

    /// Apply one BAN. The caller owns the follow-up in fixed order:
    /// detach the old record from the address hash, install the new one
    /// (unless already expired), then emit onward.
    pub fn apply(&self, update: &BanUpdate) -> Applied {
        let key = PropKey::new(update.kind, update.user.as_deref(), &update.host);

        let Some(old) = self.get(&key) else {
            let new = Arc::new(self.materialize(update, update.created));
            self.index.insert(key, new.clone());
            return Applied::Inserted(new);
        };

        if update.created < old.created {
            return Applied::Rejected(old);
        }

        let incoming_hold = update.created + update.duration;
        let incoming_lifetime =
            (update.created + update.lifetime_duration).max(incoming_hold);
        if update.created == old.created
            && incoming_hold == old.hold
            && incoming_lifetime == old.lifetime
        {
            return Applied::Unchanged;
        }

        // lifetime only grows; created is forced monotonic so that the
        // replacement always wins subsequent comparisons
        let created = update.created.max(old.created + 1);
        let mut new = self.materialize(update, created);
        new.hold = new.hold.max(created + 1);
        new.lifetime = new.lifetime.max(old.lifetime).max(new.hold);
        let new = Arc::new(new);

        old.set_illegal();
        self.index.insert(key, new.clone());
        Applied::Replaced { old, new }
    }

    fn materialize(&self, update: &BanUpdate, created: i64) -> ConfItem {
        let mut conf = ConfItem::new(
            update.kind.conf_kind(&update.host),
            update.user.clone(),
            update.host.clone(),
            update.reason.clone(),
        );
        conf.oper_reason = update.oper_reason.clone();
        conf.set_by = Some(update.set_by.clone());
        conf.created = created;
        conf.hold = created + update.duration;
        conf.lifetime = (created + update.lifetime_duration).max(conf.hold);
        conf
    }

    /// 60-second scan: deactivate newly expired bans (removing them from
    /// the address hash), drop tombstones whose lifetime has passed.
    /// Returns the newly deactivated records for oper notices.
    pub fn expire(&self, table: &AddressTable, now: i64) -> Vec<Arc<ConfItem>> {
        let mut deactivated = Vec::new();
        self.index.retain(|_, conf| {
            if conf.lifetime <= now {
                if !conf.is_illegal() {
                    conf.set_illegal();
                    table.remove(conf);
                    deactivated.push(conf.clone());
                }
                return false;
            }
            if conf.expired(now) && !conf.is_illegal() {
                conf.set_illegal();
                table.remove(conf);
                deactivated.push(conf.clone());
            }
            true
        });
        deactivated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::conf::ConfKind;

    fn update(created: i64, duration: i64, lifetime: i64) -> BanUpdate {
        BanUpdate {
            kind: BanKind::Kline,
            user: Some("foo".into()),
            host: "bar".into(),
            created,
            duration,
            lifetime_duration: lifetime,
            set_by: "oper!u@h{oper}".into(),
            reason: "r".into(),
            oper_reason: None,
        }
    }

    #[test]
    fn test_fresh_insert() {
        let bans = PropBans::new();
        let Applied::Inserted(conf) = bans.apply(&update(1000, 10, 100)) else {
            panic!("expected insert");
        };
        assert_eq!(conf.kind, ConfKind::Kline);
        assert_eq!((conf.created, conf.hold, conf.lifetime), (1000, 1010, 1100));
        assert!(conf.created <= conf.hold && conf.hold <= conf.lifetime);
    }

    #[test]
    fn test_lifetime_extension_forces_monotonic_created() {
        let bans = PropBans::new();
        bans.apply(&update(1000, 10, 100));
        let Applied::Replaced { old, new } = bans.apply(&update(1000, 5, 200)) else {
            panic!("expected replace");
        };
        assert!(old.is_illegal());
        assert_eq!(new.created, 1001);
        assert_eq!(new.hold, 1006);
        assert_eq!(new.lifetime - new.created, 200);

        // a later shorter lifetime never shrinks the stored one
        let Applied::Replaced { new: third, .. } = bans.apply(&update(1001, 10, 150)) else {
            panic!("expected replace");
        };
        assert_eq!(third.lifetime, new.lifetime);
        assert!(third.created > new.created);
    }

    #[test]
    fn test_replay_is_idempotent() {
        let bans = PropBans::new();
        bans.apply(&update(1000, 10, 100));
        let stored = bans
            .get(&PropKey::new(BanKind::Kline, Some("foo"), "bar"))
            .unwrap();
        assert!(matches!(bans.apply(&update(1000, 10, 100)), Applied::Unchanged));
        let after = bans
            .get(&PropKey::new(BanKind::Kline, Some("foo"), "bar"))
            .unwrap();
        assert!(Arc::ptr_eq(&stored, &after));
    }

    #[test]
    fn test_stale_created_rejected() {
        let bans = PropBans::new();
        bans.apply(&update(1000, 10, 100));
        bans.apply(&update(1000, 5, 200)); // bumps created to 1001
        match bans.apply(&update(1000, 60, 600)) {
            Applied::Rejected(ours) => assert_eq!(ours.created, 1001),
            _ => panic!("expected rejection of stale created"),
        }
    }

    #[test]
    fn test_no_two_live_records_share_a_key() {
        let bans = PropBans::new();
        bans.apply(&update(1000, 10, 100));
        let Applied::Replaced { old, new } = bans.apply(&update(1005, 10, 100)) else {
            panic!("expected replace");
        };
        assert!(old.is_illegal() || new.is_illegal());
        assert_eq!(bans.len(), 1);
    }

    #[test]
    fn test_keys_fold_case() {
        let bans = PropBans::new();
        bans.apply(&update(1000, 10, 100));
        let mut upper = update(1000, 10, 100);
        upper.user = Some("FOO".into());
        upper.host = "BAR".into();
        assert!(matches!(bans.apply(&upper), Applied::Unchanged));
    }

    #[test]
    fn test_expire_tombstones_then_drops() {
        let table = AddressTable::new();
        let bans = PropBans::new();
        let Applied::Inserted(conf) = bans.apply(&update(1000, 10, 100)) else {
            panic!();
        };
        table.add(conf.clone());

        // hold passed, lifetime not: tombstone stays, hash entry goes
        let gone = bans.expire(&table, 1011);
        assert_eq!(gone.len(), 1);
        assert!(conf.is_illegal());
        assert!(table.all_of_kind(ConfKind::Kline).is_empty());
        assert_eq!(bans.len(), 1);

        // replay while tombstoned is still suppressed
        assert!(matches!(bans.apply(&update(1000, 10, 100)), Applied::Unchanged));

        // lifetime passed: record fully dropped
        bans.expire(&table, 1101);
        assert!(bans.is_empty());
    }

    #[test]
    fn test_removal_keeps_tombstone() {
        let table = AddressTable::new();
        let bans = PropBans::new();
        bans.apply(&update(1000, 10, 100));
        let mut unset = update(1001, 0, 100);
        unset.reason = "*".into();
        let Applied::Replaced { new, .. } = bans.apply(&unset) else {
            panic!("expected replace");
        };
        assert!(unset.is_removal());
        assert!(new.expired(1002));
        assert!(new.lifetime > 1002);
        bans.expire(&table, 1002);
        assert_eq!(bans.len(), 1);
    }
}
