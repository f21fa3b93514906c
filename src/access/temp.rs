//! TTL-bucketed temporary K-lines and D-lines.
//!
//! Temporary bans live on one of four lists by remaining TTL. Only the MIN
//! list is scanned every 60 seconds; the HOUR/DAY/WEEK lists are scanned at
//! their own period and demote entries one bucket as their remaining TTL
//! shrinks, which amortizes expiry checks: a ban is always on the MIN list
//! before its hold time, so true expiry is observed within one MIN cycle.

use std::sync::Arc;

use parking_lot::Mutex;

use super::conf::{ConfItem, ConfKind};
use super::hostmask::AddressTable;

const HOUR_SECS: i64 = 60 * 60;
const DAY_SECS: i64 = 24 * HOUR_SECS;
const WEEK_SECS: i64 = 7 * DAY_SECS;

/// The four TTL buckets, narrowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempSlot {
    Min = 0,
    Hour = 1,
    Day = 2,
    Week = 3,
}

impl TempSlot {
    /// Bucket for a ban with this many seconds remaining.
    pub fn for_duration(secs: i64) -> TempSlot {
        if secs >= WEEK_SECS {
            TempSlot::Week
        } else if secs >= DAY_SECS {
            TempSlot::Day
        } else if secs >= HOUR_SECS {
            TempSlot::Hour
        } else {
            TempSlot::Min
        }
    }

    /// Lower TTL bound of this bucket; entries under it belong one level
    /// down.
    fn floor(self) -> i64 {
        match self {
            TempSlot::Min => 0,
            TempSlot::Hour => HOUR_SECS,
            TempSlot::Day => DAY_SECS,
            TempSlot::Week => WEEK_SECS,
        }
    }

    fn lower(self) -> TempSlot {
        match self {
            TempSlot::Min | TempSlot::Hour => TempSlot::Min,
            TempSlot::Day => TempSlot::Hour,
            TempSlot::Week => TempSlot::Day,
        }
    }
}

/// The bucketed lists, split by ban family as the old tree kept them.
#[derive(Default)]
pub struct TempBans {
    klines: [Mutex<Vec<Arc<ConfItem>>>; 4],
    dlines: [Mutex<Vec<Arc<ConfItem>>>; 4],
}

impl TempBans {
    pub fn new() -> Self {
        Self::default()
    }

    fn family(&self, kind: ConfKind) -> &[Mutex<Vec<Arc<ConfItem>>>; 4] {
        match kind {
            ConfKind::Dline => &self.dlines,
            _ => &self.klines,
        }
    }

    /// File a temporary ban into the bucket matching its remaining TTL.
    pub fn add(&self, conf: Arc<ConfItem>, now: i64) {
        let slot = TempSlot::for_duration(conf.hold - now);
        self.family(conf.kind)[slot as usize].lock().push(conf);
    }

    /// Remove a specific record from whichever bucket holds it.
    pub fn remove(&self, conf: &Arc<ConfItem>) {
        for list in self.family(conf.kind) {
            let mut list = list.lock();
            let before = list.len();
            list.retain(|c| !Arc::ptr_eq(c, conf));
            if list.len() != before {
                return;
            }
        }
    }

    /// 60-second scan of both MIN lists: drop expired records, detach them
    /// from the address hash. Returns what expired, for oper notices.
    pub fn expire_min(&self, table: &AddressTable, now: i64) -> Vec<Arc<ConfItem>> {
        let mut expired = Vec::new();
        for lists in [&self.klines, &self.dlines] {
            let mut list = lists[TempSlot::Min as usize].lock();
            list.retain(|conf| {
                if conf.expired(now) || conf.is_illegal() {
                    if !conf.is_illegal() {
                        conf.set_illegal();
                        table.remove(conf);
                        expired.push(conf.clone());
                    }
                    false
                } else {
                    true
                }
            });
        }
        expired
    }

    /// Periodic scan of a wider bucket: demote entries whose remaining TTL
    /// has dropped below the bucket floor. Expired stragglers demote too
    /// and are caught by the next MIN scan.
    pub fn reorganize(&self, slot: TempSlot, now: i64) {
        debug_assert_ne!(slot, TempSlot::Min);
        for lists in [&self.klines, &self.dlines] {
            let mut demoted = Vec::new();
            {
                let mut list = lists[slot as usize].lock();
                list.retain(|conf| {
                    if conf.is_illegal() {
                        return false;
                    }
                    if conf.hold - now < slot.floor() {
                        demoted.push(conf.clone());
                        false
                    } else {
                        true
                    }
                });
            }
            if !demoted.is_empty() {
                lists[slot.lower() as usize].lock().extend(demoted);
            }
        }
    }

    /// Which bucket currently holds the record, for tests and STATS.
    pub fn slot_of(&self, conf: &Arc<ConfItem>) -> Option<TempSlot> {
        for (i, list) in self.family(conf.kind).iter().enumerate() {
            if list.lock().iter().any(|c| Arc::ptr_eq(c, conf)) {
                return Some(match i {
                    0 => TempSlot::Min,
                    1 => TempSlot::Hour,
                    2 => TempSlot::Day,
                    _ => TempSlot::Week,
                });
            }
        }
        None
    }

    /// Snapshot of the temporary bans of one family, for STATS k/d.
    pub fn snapshot(&self, kind: ConfKind) -> Vec<Arc<ConfItem>> {
        let mut out = Vec::new();
        for list in self.family(kind) {
            out.extend(list.lock().iter().cloned());
        }
        out
    }
}
