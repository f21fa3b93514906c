//! Address-match index: hashed lookup of access-control records.
//!
//! A 4096-bucket hash over the "head" of each mask. Hostname patterns hash
//! the longest wildcard-free label suffix (so `*.bar.com` lands in the
//! bucket for `bar.com`); IP records hash their network address masked to
//! the prefix length rounded down to a multiple of 8 (v4) or 16 (v6);
//! fully-wild masks share the empty-string bucket. A lookup therefore
//! probes one bucket per label suffix of the host plus one per octet
//! boundary of the address plus the wildcard bucket.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use solanum_proto::wildcard::{has_wildcard, mask_match};

use super::conf::{flags, ConfItem, ConfKind};

const ATABLE_SIZE: usize = 4096;

/// How a record's host field matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMask {
    /// Hostname, possibly with wildcards.
    Host(String),
    /// Address network with prefix length.
    Ip(ipnet::IpNet),
}

/// One indexed record.
#[derive(Debug, Clone)]
pub struct AddressRec {
    pub masktype: HostMask,
    pub kind: ConfKind,
    pub username: String,
    pub auth_user: Option<String>,
    pub precedence: u32,
    seq: u64,
    pub conf: Arc<ConfItem>,
}

/// The index itself.
pub struct AddressTable {
    buckets: Vec<RwLock<Vec<AddressRec>>>,
    seq: AtomicU64,
}

impl Default for AddressTable {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_text(s: &str) -> usize {
    let mut hv: u64 = 0;
    for b in s.bytes() {
        let c = solanum_proto::casemap::to_lower(b) as u64;
        hv = hv.wrapping_mul(33).wrapping_add(c);
    }
    (hv as usize) & (ATABLE_SIZE - 1)
}

/// Bucket for a hostname pattern: hash of the label suffix right of the
/// last wildcard; the whole name when there is none.
fn hash_host_pattern(pattern: &str) -> usize {
    let bytes = pattern.as_bytes();
    let mut suffix = "";
    for i in (0..bytes.len()).rev() {
        match bytes[i] {
            b'*' | b'?' => return hash_text(suffix),
            b'.' => suffix = &pattern[i + 1..],
            _ => {}
        }
    }
    hash_text(pattern)
}

fn hash_ipv4(addr: u32, bits: u8) -> usize {
    if bits == 0 {
        return 0;
    }
    let av = (addr & (u32::MAX << (32 - bits as u32))) as u64;
    ((av ^ (av >> 12) ^ (av >> 24)) as usize) & (ATABLE_SIZE - 1)
}

fn hash_ipv6(addr: u128, bits: u8) -> usize {
    if bits == 0 {
        return 0;
    }
    let masked = addr & (u128::MAX << (128 - bits as u32));
    let av = ((masked >> 64) as u64) ^ (masked as u64);
    (((av ^ (av >> 17) ^ (av >> 41)) as usize)) & (ATABLE_SIZE - 1)
}

/// Probe buckets for an IP, widest-to-narrowest octet boundaries.
fn ip_probe_buckets(ip: IpAddr) -> Vec<usize> {
    let mut out = Vec::new();
    match ip {
        IpAddr::V4(v4) => {
            let addr = u32::from(v4);
            let mut b = 32i16;
            while b >= 0 {
                out.push(hash_ipv4(addr, b as u8));
                b -= 8;
            }
        }
        IpAddr::V6(v6) => {
            let addr = u128::from(v6);
            let mut b = 128i16;
            while b >= 0 {
                out.push(hash_ipv6(addr, b as u8));
                b -= 16;
            }
        }
    }
    out
}

impl AddressTable {
    pub fn new() -> Self {
        AddressTable {
            buckets: (0..ATABLE_SIZE).map(|_| RwLock::new(Vec::new())).collect(),
            seq: AtomicU64::new(0),
        }
    }

    /// Index a record. The host field is interpreted as CIDR/address when
    /// it parses as one, otherwise as a hostname pattern.
    pub fn add(&self, conf: Arc<ConfItem>) {
        let masktype = parse_mask(&conf.host);
        let bucket = match &masktype {
            HostMask::Host(p) => hash_host_pattern(p),
            HostMask::Ip(net) => match net.network() {
                IpAddr::V4(v4) => {
                    let bits = net.prefix_len() - net.prefix_len() % 8;
                    hash_ipv4(u32::from(v4), bits)
                }
                IpAddr::V6(v6) => {
                    let bits = net.prefix_len() - net.prefix_len() % 16;
                    hash_ipv6(u128::from(v6), bits)
                }
            },
        };

        let precedence = match &masktype {
            HostMask::Host(p) => p.bytes().filter(|&c| c != b'*' && c != b'?').count() as u32,
            HostMask::Ip(net) => 128 + net.prefix_len() as u32,
        };

        let rec = AddressRec {
            masktype,
            kind: conf.kind,
            username: conf.user.clone().unwrap_or_else(|| "*".to_string()),
            auth_user: conf.auth_user.clone(),
            precedence,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            conf,
        };
        self.buckets[bucket].write().push(rec);
    }

    /// Unlink a record from its bucket. The conf stays allocated for any
    /// remaining holders.
    pub fn remove(&self, conf: &Arc<ConfItem>) {
        for bucket in &self.buckets {
            let mut bucket = bucket.write();
            let before = bucket.len();
            bucket.retain(|rec| !Arc::ptr_eq(&rec.conf, conf));
            if bucket.len() != before {
                return;
            }
        }
    }

    /// Generic best-match walk over the buckets applicable to this client.
    ///
    /// `notildeuser` is the username with any leading `~` stripped; records
    /// flagged NO_TILDE match against it instead.
    #[allow(clippy::too_many_arguments)]
    fn find_best(
        &self,
        kinds: &[ConfKind],
        host: Option<&str>,
        sockhost: Option<&str>,
        username: &str,
        notildeuser: &str,
        ip: Option<IpAddr>,
        auth_user: Option<&str>,
    ) -> Option<Arc<ConfItem>> {
        let mut probes: Vec<usize> = Vec::new();
        for name in [host, sockhost].into_iter().flatten() {
            let mut rest = name;
            loop {
                probes.push(hash_text(rest));
                match rest.split_once('.') {
                    Some((_, tail)) => rest = tail,
                    None => break,
                }
            }
        }
        if let Some(ip) = ip {
            probes.extend(ip_probe_buckets(ip));
        }
        probes.push(hash_text(""));
        probes.sort_unstable();
        probes.dedup();

        let mut best: Option<AddressRec> = None;
        for bucket in probes {
            for rec in self.buckets[bucket].read().iter() {
                if !kinds.contains(&rec.kind) || rec.conf.is_illegal() {
                    continue;
                }
                if !rec_matches(rec, host, sockhost, username, notildeuser, ip, auth_user) {
                    continue;
                }
                let better = match &best {
                    None => true,
                    Some(b) => {
                        rec.precedence > b.precedence
                            || (rec.precedence == b.precedence && rec.seq < b.seq)
                    }
                };
                if better {
                    best = Some(rec.clone());
                }
            }
        }
        best.map(|rec| rec.conf)
    }

    /// Auth-block lookup at registration time.
    pub fn find_client_conf(
        &self,
        host: Option<&str>,
        sockhost: &str,
        username: &str,
        ip: IpAddr,
        auth_user: Option<&str>,
    ) -> Option<Arc<ConfItem>> {
        let notilde = username.strip_prefix('~').unwrap_or(username);
        self.find_best(
            &[ConfKind::Client],
            host,
            Some(sockhost),
            username,
            notilde,
            Some(ip),
            auth_user,
        )
    }

    /// K-line lookup. The attached auth block may exempt the client.
    pub fn find_kline(
        &self,
        host: Option<&str>,
        sockhost: &str,
        username: &str,
        ip: IpAddr,
        attached: Option<&Arc<ConfItem>>,
    ) -> Option<Arc<ConfItem>> {
        if let Some(auth) = attached {
            if auth.has_flag(flags::EXEMPT_KLINE) {
                return None;
            }
        }
        let notilde = username.strip_prefix('~').unwrap_or(username);
        self.find_best(
            &[ConfKind::Kline],
            host,
            Some(sockhost),
            username,
            notilde,
            Some(ip),
            None,
        )
    }

    /// D-line lookup at accept time; an EXEMPT record overrides.
    pub fn find_dline(&self, ip: IpAddr) -> Option<Arc<ConfItem>> {
        if let Some(exempt) = self.find_best(&[ConfKind::Exempt], None, None, "*", "*", Some(ip), None)
        {
            return Some(exempt);
        }
        self.find_best(&[ConfKind::Dline], None, None, "*", "*", Some(ip), None)
    }

    /// Secure-network lookup: IPs treated as TLS-equivalent.
    pub fn find_secure(&self, ip: IpAddr) -> Option<Arc<ConfItem>> {
        self.find_best(&[ConfKind::Secure], None, None, "*", "*", Some(ip), None)
    }

    /// Unlink every record the predicate selects, marking each illegal.
    /// Rehash uses this to drop config-derived records wholesale.
    pub fn remove_where<F: Fn(&ConfItem) -> bool>(&self, pred: F) {
        for bucket in &self.buckets {
            bucket.write().retain(|rec| {
                if pred(&rec.conf) {
                    rec.conf.set_illegal();
                    false
                } else {
                    true
                }
            });
        }
    }

    /// Snapshot every live record of a kind, for STATS and TESTLINE.
    pub fn all_of_kind(&self, kind: ConfKind) -> Vec<Arc<ConfItem>> {
        let mut out = Vec::new();
        for bucket in &self.buckets {
            for rec in bucket.read().iter() {
                if rec.kind == kind && !rec.conf.is_illegal() {
                    out.push(rec.conf.clone());
                }
            }
        }
        out
    }
}

fn rec_matches(
    rec: &AddressRec,
    host: Option<&str>,
    sockhost: Option<&str>,
    username: &str,
    notildeuser: &str,
    ip: Option<IpAddr>,
    auth_user: Option<&str>,
) -> bool {
    let user = if rec.conf.has_flag(flags::NO_TILDE) {
        notildeuser
    } else {
        username
    };
    if !mask_match(&rec.username, user) {
        return false;
    }
    if let Some(required) = &rec.auth_user {
        match auth_user {
            Some(have) if mask_match(required, have) => {}
            _ => return false,
        }
    }
    match &rec.masktype {
        HostMask::Ip(net) => match ip {
            Some(ip) => net.contains(&ip),
            None => false,
        },
        HostMask::Host(pattern) => {
            host.is_some_and(|h| mask_match(pattern, h))
                || sockhost.is_some_and(|s| mask_match(pattern, s))
        }
    }
}

/// Parse a conf host field into its match form.
pub fn parse_mask(host: &str) -> HostMask {
    if let Ok(net) = host.parse::<ipnet::IpNet>() {
        return HostMask::Ip(net.trunc());
    }
    if let Ok(addr) = host.parse::<IpAddr>() {
        let net = match addr {
            IpAddr::V4(_) => ipnet::IpNet::new(addr, 32),
            IpAddr::V6(_) => ipnet::IpNet::new(addr, 128),
        };
        if let Ok(net) = net {
            return HostMask::Ip(net);
        }
    }
    HostMask::Host(host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kline(user: &str, host: &str) -> Arc<ConfItem> {
        Arc::new(ConfItem::new(
            ConfKind::Kline,
            Some(user.to_string()),
            host.to_string(),
            "no reason".to_string(),
        ))
    }

    fn client(user: &str, host: &str) -> Arc<ConfItem> {
        Arc::new(ConfItem::new(
            ConfKind::Client,
            Some(user.to_string()),
            host.to_string(),
            String::new(),
        ))
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_hostname_suffix_hashing_finds_wildcard_mask() {
        let table = AddressTable::new();
        table.add(kline("*", "*.example.com"));
        let found = table
            .find_kline(Some("irc.example.com"), "1.2.3.4", "user", ip("1.2.3.4"), None)
            .unwrap();
        assert_eq!(found.host, "*.example.com");
    }

    #[test]
    fn test_fully_wild_mask_lands_in_wildcard_bucket() {
        let table = AddressTable::new();
        table.add(kline("baduser", "*"));
        let found = table.find_kline(None, "9.9.9.9", "baduser", ip("9.9.9.9"), None);
        assert!(found.is_some());
        assert!(table
            .find_kline(None, "9.9.9.9", "gooduser", ip("9.9.9.9"), None)
            .is_none());
    }

    #[test]
    fn test_cidr_matching_on_octet_and_off_octet_prefixes() {
        let table = AddressTable::new();
        table.add(kline("*", "10.1.0.0/16"));
        table.add(kline("*", "10.2.3.128/27"));
        assert!(table
            .find_kline(None, "10.1.200.7", "u", ip("10.1.200.7"), None)
            .is_some());
        assert!(table
            .find_kline(None, "10.2.3.130", "u", ip("10.2.3.130"), None)
            .is_some());
        assert!(table
            .find_kline(None, "10.2.3.1", "u", ip("10.2.3.1"), None)
            .is_none());
    }

    #[test]
    fn test_ipv6_prefix_match() {
        let table = AddressTable::new();
        table.add(kline("*", "2001:db8::/32"));
        assert!(table
            .find_kline(None, "2001:db8::1", "u", ip("2001:db8::1"), None)
            .is_some());
        assert!(table
            .find_kline(None, "2001:db9::1", "u", ip("2001:db9::1"), None)
            .is_none());
    }

    #[test]
    fn test_precedence_prefers_more_specific() {
        let table = AddressTable::new();
        let broad = client("*", "*");
        let narrow = client("*", "*.trusted.net");
        table.add(broad);
        table.add(narrow);
        let found = table
            .find_client_conf(Some("shell.trusted.net"), "5.5.5.5", "u", ip("5.5.5.5"), None)
            .unwrap();
        assert_eq!(found.host, "*.trusted.net");
    }

    #[test]
    fn test_insertion_order_breaks_ties() {
        let table = AddressTable::new();
        let first = kline("*", "*.tie.net");
        let second = kline("*", "*.tie.net");
        table.add(first.clone());
        table.add(second);
        let found = table
            .find_kline(Some("a.tie.net"), "6.6.6.6", "u", ip("6.6.6.6"), None)
            .unwrap();
        assert!(Arc::ptr_eq(&found, &first));
    }

    #[test]
    fn test_no_tilde_flag_strips_ident_prefix() {
        let table = AddressTable::new();
        let conf = kline("bad", "*.tilde.net");
        conf.set_flag(flags::NO_TILDE);
        table.add(conf);
        assert!(table
            .find_kline(Some("x.tilde.net"), "7.7.7.7", "~bad", ip("7.7.7.7"), None)
            .is_some());
    }

    #[test]
    fn test_dline_exempt_overrides() {
        let table = AddressTable::new();
        table.add(Arc::new(ConfItem::new(
            ConfKind::Dline,
            None,
            "10.0.0.0/8".to_string(),
            "bad net".to_string(),
        )));
        table.add(Arc::new(ConfItem::new(
            ConfKind::Exempt,
            None,
            "10.0.0.5".to_string(),
            String::new(),
        )));
        assert_eq!(table.find_dline(ip("10.0.0.1")).unwrap().kind, ConfKind::Dline);
        assert_eq!(table.find_dline(ip("10.0.0.5")).unwrap().kind, ConfKind::Exempt);
    }

    #[test]
    fn test_illegal_records_invisible() {
        let table = AddressTable::new();
        let conf = kline("*", "*.gone.net");
        table.add(conf.clone());
        conf.set_illegal();
        assert!(table
            .find_kline(Some("a.gone.net"), "8.8.8.8", "u", ip("8.8.8.8"), None)
            .is_none());
    }

    #[test]
    fn test_remove_unlinks() {
        let table = AddressTable::new();
        let conf = kline("*", "*.rm.net");
        table.add(conf.clone());
        table.remove(&conf);
        assert!(table.all_of_kind(ConfKind::Kline).is_empty());
    }

    #[test]
    fn test_exempt_kline_auth_flag() {
        let table = AddressTable::new();
        table.add(kline("*", "*"));
        let auth = client("*", "*");
        auth.set_flag(flags::EXEMPT_KLINE);
        assert!(table
            .find_kline(None, "1.1.1.1", "u", ip("1.1.1.1"), Some(&auth))
            .is_none());
    }
}
