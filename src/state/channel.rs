//! Channel state, as far as the access core needs it.
//!
//! Channels here are a sink for can-join and can-send decisions: a name,
//! a mode bitmask, members and the four list modes. Full channel semantics
//! (TS resolution, forwarding chains, mode paragraphs) live elsewhere.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use solanum_proto::casemap::to_irc_lower;

/// Channel mode bits.
pub mod cmode {
    pub const INVITEONLY: u32 = 1 << 0; // +i
    pub const MODERATED: u32 = 1 << 1; // +m
    pub const NOEXTERNAL: u32 = 1 << 2; // +n
    pub const SECRET: u32 = 1 << 3; // +s
    pub const TOPICLIMIT: u32 = 1 << 4; // +t
    pub const KEY: u32 = 1 << 5; // +k
    pub const LIMIT: u32 = 1 << 6; // +l
    /// Op-moderated: blocked sends go to ops instead of erroring.
    pub const OPMODERATE: u32 = 1 << 7; // +z
    pub const SSLONLY: u32 = 1 << 8; // +S
    pub const REGMSG: u32 = 1 << 9; // +R
    pub const NOCTCP: u32 = 1 << 10; // +C
    pub const OPERONLY: u32 = 1 << 11; // +O

    pub fn from_char(c: char) -> Option<u32> {
        TABLE.iter().find(|(_, mc)| *mc == c).map(|(bit, _)| *bit)
    }

    pub fn to_string(modes: u32) -> String {
        let mut out = String::from("+");
        for (bit, c) in TABLE {
            if modes & bit != 0 {
                out.push(*c);
            }
        }
        out
    }

    const TABLE: &[(u32, char)] = &[
        (INVITEONLY, 'i'),
        (MODERATED, 'm'),
        (NOEXTERNAL, 'n'),
        (SECRET, 's'),
        (TOPICLIMIT, 't'),
        (KEY, 'k'),
        (LIMIT, 'l'),
        (OPMODERATE, 'z'),
        (SSLONLY, 'S'),
        (REGMSG, 'R'),
        (NOCTCP, 'C'),
        (OPERONLY, 'O'),
    ];
}

/// Membership status bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberStatus {
    pub op: bool,
    pub voice: bool,
}

impl MemberStatus {
    pub fn is_privileged(self) -> bool {
        self.op || self.voice
    }
}

/// The four ban-type lists.
#[derive(Debug, Default)]
pub struct BanLists {
    pub ban: RwLock<Vec<String>>,
    pub except: RwLock<Vec<String>>,
    pub invex: RwLock<Vec<String>>,
    pub quiet: RwLock<Vec<String>>,
}

#[derive(Debug)]
pub struct Channel {
    pub name: String,
    modes: AtomicU32,
    pub topic: RwLock<Option<String>>,
    /// uid -> membership status
    pub members: DashMap<String, MemberStatus>,
    pub lists: BanLists,
    pub key: RwLock<Option<String>>,
    pub limit: AtomicUsize,
    pub forward: RwLock<Option<String>>,
}

impl Channel {
    pub fn new(name: &str) -> Channel {
        Channel {
            name: name.to_string(),
            modes: AtomicU32::new(cmode::NOEXTERNAL | cmode::TOPICLIMIT),
            topic: RwLock::new(None),
            members: DashMap::new(),
            lists: BanLists::default(),
            key: RwLock::new(None),
            limit: AtomicUsize::new(0),
            forward: RwLock::new(None),
        }
    }

    pub fn modes(&self) -> u32 {
        self.modes.load(Ordering::Acquire)
    }

    pub fn has_mode(&self, bit: u32) -> bool {
        self.modes() & bit != 0
    }

    pub fn set_mode(&self, bit: u32) {
        self.modes.fetch_or(bit, Ordering::AcqRel);
    }

    pub fn clear_mode(&self, bit: u32) {
        self.modes.fetch_and(!bit, Ordering::AcqRel);
    }

    pub fn status_of(&self, uid: &str) -> Option<MemberStatus> {
        self.members.get(uid).map(|m| *m.value())
    }

    pub fn is_member(&self, uid: &str) -> bool {
        self.members.contains_key(uid)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Whether a ban list entry matches this client mask.
    pub fn mask_on_list(list: &RwLock<Vec<String>>, mask: &str) -> bool {
        list.read()
            .iter()
            .any(|entry| solanum_proto::mask_match(entry, mask))
    }
}

/// Global channel table keyed by folded name.
#[derive(Default)]
pub struct ChannelTable {
    channels: DashMap<String, Arc<Channel>>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.get(&to_irc_lower(name)).map(|e| e.value().clone())
    }

    pub fn get_or_create(&self, name: &str) -> Arc<Channel> {
        self.channels
            .entry(to_irc_lower(name))
            .or_insert_with(|| Arc::new(Channel::new(name)))
            .value()
            .clone()
    }

    /// Drop a channel once its last member leaves.
    pub fn remove_if_empty(&self, name: &str) {
        let key = to_irc_lower(name);
        self.channels
            .remove_if(&key, |_, chan| chan.members.is_empty());
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn all(&self) -> Vec<Arc<Channel>> {
        self.channels.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_bits_roundtrip() {
        let chan = Channel::new("#test");
        chan.set_mode(cmode::SSLONLY | cmode::REGMSG);
        assert!(chan.has_mode(cmode::SSLONLY));
        chan.clear_mode(cmode::SSLONLY);
        assert!(!chan.has_mode(cmode::SSLONLY));
        assert!(chan.has_mode(cmode::NOEXTERNAL));
    }

    #[test]
    fn test_mode_char_mapping() {
        assert_eq!(cmode::from_char('z'), Some(cmode::OPMODERATE));
        assert_eq!(cmode::from_char('S'), Some(cmode::SSLONLY));
        assert_eq!(cmode::from_char('x'), None);
    }

    #[test]
    fn test_table_case_folds_names() {
        let table = ChannelTable::new();
        let a = table.get_or_create("#Help");
        let b = table.get("#HELP").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name, "#Help");
    }

    #[test]
    fn test_empty_channels_reaped() {
        let table = ChannelTable::new();
        let chan = table.get_or_create("#gone");
        chan.members.insert("42XAAAAAA".into(), MemberStatus::default());
        table.remove_if_empty("#gone");
        assert!(table.get("#gone").is_some());
        chan.members.clear();
        table.remove_if_empty("#gone");
        assert!(table.get("#gone").is_none());
    }
}
