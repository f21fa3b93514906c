//! Access-control records.
//!
//! A [`ConfItem`] is one typed entry matching users by mask: auth blocks,
//! K-lines, D-lines, exemptions, gecos bans, nick/channel reservations.
//! Records are shared (`Arc`) between the address-match index, the TTL
//! buckets, the propagated-ban index and the clients attached to them;
//! deletion marks the record illegal and the last index drop frees it.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicUsize, Ordering};

/// What a record matches and what matching it means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfKind {
    /// Auth block: permits a connection and names its class.
    Client,
    /// K-line: user@host ban checked at registration.
    Kline,
    /// D-line: IP ban checked at accept.
    Dline,
    /// Exemption from D-lines.
    Exempt,
    /// Gecos (real name) ban.
    Xline,
    /// Reserved nick.
    ResvNick,
    /// Reserved channel.
    ResvChannel,
    /// Requires a TLS connection.
    Secure,
}

/// Behavior flags on a record.
pub mod flags {
    /// Pending deletion; invisible to fresh lookups.
    pub const ILLEGAL: u32 = 1 << 0;
    /// Password field is a bcrypt hash.
    pub const ENCRYPTED: u32 = 1 << 1;
    pub const NEED_SSL: u32 = 1 << 2;
    /// Class and CIDR limits do not apply.
    pub const EXEMPT_LIMITS: u32 = 1 << 3;
    /// Matching clients cannot be K-lined.
    pub const EXEMPT_KLINE: u32 = 1 << 4;
    pub const SPOOF_IP: u32 = 1 << 5;
    pub const KLINE_SPOOF: u32 = 1 << 6;
    pub const NO_TILDE: u32 = 1 << 7;
    pub const REDIRECT: u32 = 1 << 8;
    /// On one of the four TTL bucket lists.
    pub const TEMPORARY: u32 = 1 << 9;
    /// Set by an oper on this server rather than by config.
    pub const MYOPER: u32 = 1 << 10;
}

/// One access-control record.
#[derive(Debug)]
pub struct ConfItem {
    pub kind: ConfKind,
    /// Username mask; `None` for kinds that do not match a username.
    pub user: Option<String>,
    /// Host mask, IP/CIDR, gecos mask or reserved name, per kind.
    pub host: String,
    pub reason: String,
    pub oper_reason: Option<String>,
    /// Class an auth block attaches its clients to.
    pub class_name: Option<String>,
    pub spoof: Option<String>,
    pub password: Option<String>,
    /// Required services account, when the auth block names one.
    pub auth_user: Option<String>,
    pub redir_serv: Option<String>,
    pub redir_port: Option<u16>,
    /// Oper (or server) that created the record.
    pub set_by: Option<String>,
    bits: AtomicU32,
    /// Creation instant, epoch seconds.
    pub created: i64,
    /// Expiry instant; 0 means permanent.
    pub hold: i64,
    /// Propagated-ban tombstone instant; 0 means local.
    pub lifetime: i64,
    /// Clients currently attached (auth blocks only).
    attached: AtomicUsize,
    /// Times this record matched, reported by STATS.
    hits: AtomicI64,
}

impl ConfItem {
    pub fn new(kind: ConfKind, user: Option<String>, host: String, reason: String) -> Self {
        ConfItem {
            kind,
            user,
            host,
            reason,
            oper_reason: None,
            class_name: None,
            spoof: None,
            password: None,
            auth_user: None,
            redir_serv: None,
            redir_port: None,
            set_by: None,
            bits: AtomicU32::new(0),
            created: 0,
            hold: 0,
            lifetime: 0,
            attached: AtomicUsize::new(0),
            hits: AtomicI64::new(0),
        }
    }

    #[inline]
    pub fn has_flag(&self, flag: u32) -> bool {
        self.bits.load(Ordering::Acquire) & flag != 0
    }

    #[inline]
    pub fn set_flag(&self, flag: u32) {
        self.bits.fetch_or(flag, Ordering::AcqRel);
    }

    #[inline]
    pub fn clear_flag(&self, flag: u32) {
        self.bits.fetch_and(!flag, Ordering::AcqRel);
    }

    #[inline]
    pub fn is_illegal(&self) -> bool {
        self.has_flag(flags::ILLEGAL)
    }

    /// Mark for deletion. The record stays allocated until every index and
    /// attached client lets go.
    #[inline]
    pub fn set_illegal(&self) {
        self.set_flag(flags::ILLEGAL);
    }

    #[inline]
    pub fn is_temporary(&self) -> bool {
        self.has_flag(flags::TEMPORARY)
    }

    /// Propagated records carry a tombstone lifetime.
    #[inline]
    pub fn is_propagated(&self) -> bool {
        self.lifetime > 0
    }

    /// Whether the ban has passed its hold time.
    #[inline]
    pub fn expired(&self, now: i64) -> bool {
        self.hold != 0 && self.hold <= now
    }

    pub fn attach(&self) {
        self.attached.fetch_add(1, Ordering::AcqRel);
    }

    pub fn detach(&self) {
        self.attached.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn attached_count(&self) -> usize {
        self.attached.load(Ordering::Acquire)
    }

    pub fn note_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// TESTLINE reports without counting as a real match.
    pub fn forget_hit(&self) {
        self.hits.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn hit_count(&self) -> i64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// The `user@host` form used in notices and STATS output.
    pub fn display_mask(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

/// Ban kinds carried by the network BAN message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BanKind {
    Kline,
    Xline,
    Resv,
}

impl BanKind {
    /// Single-letter wire form.
    pub fn letter(self) -> char {
        match self {
            BanKind::Kline => 'K',
            BanKind::Xline => 'X',
            BanKind::Resv => 'R',
        }
    }

    pub fn from_letter(c: char) -> Option<BanKind> {
        match c {
            'K' => Some(BanKind::Kline),
            'X' => Some(BanKind::Xline),
            'R' => Some(BanKind::Resv),
            _ => None,
        }
    }

    /// Conf kind a ban of this kind materializes as.
    pub fn conf_kind(self, mask: &str) -> ConfKind {
        match self {
            BanKind::Kline => ConfKind::Kline,
            BanKind::Xline => ConfKind::Xline,
            BanKind::Resv => {
                if solanum_proto::casemap::is_channel_name(mask) {
                    ConfKind::ResvChannel
                } else {
                    ConfKind::ResvNick
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_toggling() {
        let conf = ConfItem::new(ConfKind::Kline, Some("*".into()), "example.com".into(), "r".into());
        assert!(!conf.is_illegal());
        conf.set_illegal();
        assert!(conf.is_illegal());
        conf.set_flag(flags::TEMPORARY);
        assert!(conf.is_temporary());
        conf.clear_flag(flags::TEMPORARY);
        assert!(!conf.is_temporary());
    }

    #[test]
    fn test_expiry() {
        let mut conf = ConfItem::new(ConfKind::Kline, Some("*".into()), "h".into(), "r".into());
        conf.hold = 100;
        assert!(!conf.expired(99));
        assert!(conf.expired(100));
        conf.hold = 0;
        assert!(!conf.expired(i64::MAX));
    }

    #[test]
    fn test_refcount() {
        let conf = ConfItem::new(ConfKind::Client, Some("*".into()), "*".into(), String::new());
        conf.attach();
        conf.attach();
        conf.detach();
        assert_eq!(conf.attached_count(), 1);
    }

    #[test]
    fn test_ban_kind_letters() {
        assert_eq!(BanKind::from_letter('K'), Some(BanKind::Kline));
        assert_eq!(BanKind::Kline.letter(), 'K');
        assert_eq!(BanKind::from_letter('Z'), None);
    }

    #[test]
    fn test_resv_conf_kind_by_mask() {
        assert_eq!(BanKind::Resv.conf_kind("#chan"), ConfKind::ResvChannel);
        assert_eq!(BanKind::Resv.conf_kind("badnick"), ConfKind::ResvNick);
    }
}
