//! Per-connection client state.
//!
//! A [`Client`] is shared (`Arc`) between its connection task, the global
//! tables, channels and hooks. Mutable fields use atomics or small locks;
//! the connection task is the only place a client is destroyed, and a
//! client marked dead is never written to again, only reaped.

use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::access::{Class, ConfItem};

/// Lifecycle and identity flags.
pub mod cflags {
    pub const REGISTERED: u32 = 1 << 0;
    pub const PERSON: u32 = 1 << 1;
    pub const SERVER: u32 = 1 << 2;
    pub const SERVICE: u32 = 1 << 3;
    /// TLS connection, or matched a secure {} block.
    pub const SECURE: u32 = 1 << 4;
    /// Ident lookup answered.
    pub const GOTID: u32 = 1 << 5;
    /// No further writes; awaiting reap.
    pub const DEAD: u32 = 1 << 6;
    pub const KILLED: u32 = 1 << 7;
    pub const SENTUSER: u32 = 1 << 8;
    /// Host was replaced by an auth-block or WEBIRC spoof.
    pub const IPSPOOF: u32 = 1 << 9;
}

/// User modes.
pub mod umode {
    pub const INVISIBLE: u32 = 1 << 0; // +i
    pub const OPER: u32 = 1 << 1; // +o
    pub const WALLOP: u32 = 1 << 2; // +w
    pub const SERVNOTICE: u32 = 1 << 3; // +s
    pub const QUARANTINE: u32 = 1 << 4; // +q
    pub const SECURE_UMODE: u32 = 1 << 5; // +Z

    /// Wire representation of a umode bitmask, e.g. `+iwZ`.
    pub fn to_string(modes: u32) -> String {
        let mut out = String::from("+");
        for (bit, c) in TABLE {
            if modes & bit != 0 {
                out.push(*c);
            }
        }
        out
    }

    pub fn from_char(c: char) -> Option<u32> {
        TABLE.iter().find(|(_, mc)| *mc == c).map(|(bit, _)| *bit)
    }

    const TABLE: &[(u32, char)] = &[
        (INVISIBLE, 'i'),
        (OPER, 'o'),
        (WALLOP, 'w'),
        (SERVNOTICE, 's'),
        (QUARANTINE, 'q'),
        (SECURE_UMODE, 'Z'),
    ];
}

/// Server-notice categories an oper can subscribe to.
pub mod snomask {
    pub const GENERAL: u32 = 1 << 0; // s
    pub const BANNED: u32 = 1 << 1; // b
    pub const FULL: u32 = 1 << 2; // f
    pub const REJ: u32 = 1 << 3; // r
    pub const SKILL: u32 = 1 << 4; // k

    pub fn from_char(c: char) -> Option<u32> {
        match c {
            's' => Some(GENERAL),
            'b' => Some(BANNED),
            'f' => Some(FULL),
            'r' => Some(REJ),
            'k' => Some(SKILL),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> u32 {
        s.chars().filter_map(from_char).fold(0, |acc, b| acc | b)
    }
}

/// Pre-registration handshake state.
#[derive(Debug, Default)]
pub struct Prereg {
    pub password: Option<String>,
    /// CAP LS/REQ seen without CAP END yet; registration is held open.
    pub cap_negotiating: bool,
    /// Trusted-gateway spoof from WEBIRC, applied at registration.
    pub webirc_host: Option<String>,
    pub webirc_ip: Option<std::net::IpAddr>,
}

/// The local-connection half: send queue and socket facts. Remote clients
/// introduced by peer servers have none.
#[derive(Debug)]
pub struct LocalLink {
    tx: mpsc::UnboundedSender<String>,
    /// Bytes sitting in the send queue, bounded by the class sendq.
    pub queued_bytes: Arc<AtomicUsize>,
    pub sendq_cap: AtomicUsize,
    /// Listener port the client connected to.
    pub listen_port: u16,
    pub tls: bool,
}

impl LocalLink {
    pub fn new(
        tx: mpsc::UnboundedSender<String>,
        listen_port: u16,
        tls: bool,
    ) -> (LocalLink, Arc<AtomicUsize>) {
        let queued = Arc::new(AtomicUsize::new(0));
        (
            LocalLink {
                tx,
                queued_bytes: queued.clone(),
                sendq_cap: AtomicUsize::new(400_000),
                listen_port,
                tls,
            },
            queued,
        )
    }

    /// Queue one line. Returns false when the queue is gone or the sendq
    /// cap is exceeded; the caller marks the client dead.
    pub fn push(&self, line: String) -> bool {
        let len = line.len() + 2;
        let queued = self.queued_bytes.fetch_add(len, Ordering::AcqRel) + len;
        if queued > self.sendq_cap.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(line).is_ok()
    }
}

#[derive(Debug)]
pub struct Client {
    pub uid: String,
    pub nick: RwLock<String>,
    pub username: RwLock<String>,
    /// Displayed host, possibly spoofed.
    pub host: RwLock<String>,
    /// Host before any spoofing.
    pub orig_host: RwLock<String>,
    /// Textual IP.
    pub sockhost: String,
    pub ip: Option<IpAddr>,
    pub gecos: RwLock<String>,
    /// Services account; empty when logged out.
    pub suser: RwLock<String>,
    pub opername: RwLock<Option<String>>,
    pub privs: RwLock<Vec<String>>,
    pub away: RwLock<Option<String>>,
    pub certfp: RwLock<Option<String>>,
    pub snomask: AtomicU32,

    flags: AtomicU32,
    umodes: AtomicU32,
    caps: AtomicU64,

    pub att_conf: RwLock<Option<Arc<ConfItem>>>,
    pub att_class: RwLock<Option<Arc<Class>>>,
    /// Folded channel names this client is on.
    pub channels: RwLock<Vec<String>>,

    pub link: Option<LocalLink>,
    /// SID of the server that introduced a remote client.
    pub from_server: Option<String>,
    /// Handshake scratch; dropped once registration completes.
    pub prereg: RwLock<Option<Prereg>>,

    pub first_seen: i64,
    pub last_ping: AtomicI64,
}

impl Client {
    /// A freshly accepted local connection, not yet registered.
    pub fn local(uid: String, ip: IpAddr, link: LocalLink, now: i64) -> Client {
        Client {
            uid,
            nick: RwLock::new("*".to_string()),
            username: RwLock::new(String::new()),
            host: RwLock::new(ip.to_string()),
            orig_host: RwLock::new(ip.to_string()),
            sockhost: ip.to_string(),
            ip: Some(ip),
            gecos: RwLock::new(String::new()),
            suser: RwLock::new(String::new()),
            opername: RwLock::new(None),
            privs: RwLock::new(Vec::new()),
            away: RwLock::new(None),
            certfp: RwLock::new(None),
            snomask: AtomicU32::new(0),
            flags: AtomicU32::new(0),
            umodes: AtomicU32::new(0),
            caps: AtomicU64::new(0),
            att_conf: RwLock::new(None),
            att_class: RwLock::new(None),
            channels: RwLock::new(Vec::new()),
            link: Some(link),
            from_server: None,
            prereg: RwLock::new(Some(Prereg::default())),
            first_seen: now,
            last_ping: AtomicI64::new(now),
        }
    }

    /// A remote client introduced over a server link (EUID).
    #[allow(clippy::too_many_arguments)]
    pub fn remote(
        uid: String,
        nick: String,
        username: String,
        host: String,
        sockhost: String,
        gecos: String,
        from_server: String,
        now: i64,
    ) -> Client {
        let client = Client {
            uid,
            nick: RwLock::new(nick),
            username: RwLock::new(username),
            host: RwLock::new(host.clone()),
            orig_host: RwLock::new(host),
            sockhost,
            ip: None,
            gecos: RwLock::new(gecos),
            suser: RwLock::new(String::new()),
            opername: RwLock::new(None),
            privs: RwLock::new(Vec::new()),
            away: RwLock::new(None),
            certfp: RwLock::new(None),
            snomask: AtomicU32::new(0),
            flags: AtomicU32::new(0),
            umodes: AtomicU32::new(0),
            caps: AtomicU64::new(0),
            att_conf: RwLock::new(None),
            att_class: RwLock::new(None),
            channels: RwLock::new(Vec::new()),
            link: None,
            from_server: Some(from_server),
            prereg: RwLock::new(None),
            first_seen: now,
            last_ping: AtomicI64::new(now),
        };
        client.set_flag(cflags::REGISTERED | cflags::PERSON);
        client
    }

    #[inline]
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags.load(Ordering::Acquire) & flag != 0
    }

    #[inline]
    pub fn set_flag(&self, flag: u32) {
        self.flags.fetch_or(flag, Ordering::AcqRel);
    }

    #[inline]
    pub fn clear_flag(&self, flag: u32) {
        self.flags.fetch_and(!flag, Ordering::AcqRel);
    }

    #[inline]
    pub fn is_registered(&self) -> bool {
        self.has_flag(cflags::REGISTERED)
    }

    #[inline]
    pub fn is_person(&self) -> bool {
        self.has_flag(cflags::PERSON)
    }

    #[inline]
    pub fn is_local(&self) -> bool {
        self.link.is_some()
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.has_flag(cflags::DEAD)
    }

    #[inline]
    pub fn is_secure(&self) -> bool {
        self.has_flag(cflags::SECURE)
    }

    #[inline]
    pub fn is_service(&self) -> bool {
        self.has_flag(cflags::SERVICE)
    }

    pub fn umodes(&self) -> u32 {
        self.umodes.load(Ordering::Acquire)
    }

    pub fn set_umode(&self, bits: u32) {
        self.umodes.fetch_or(bits, Ordering::AcqRel);
    }

    pub fn clear_umode(&self, bits: u32) {
        self.umodes.fetch_and(!bits, Ordering::AcqRel);
    }

    #[inline]
    pub fn is_oper(&self) -> bool {
        self.umodes() & umode::OPER != 0
    }

    #[inline]
    pub fn is_quarantined(&self) -> bool {
        self.umodes() & umode::QUARANTINE != 0
    }

    pub fn caps(&self) -> u64 {
        self.caps.load(Ordering::Acquire)
    }

    pub fn add_caps(&self, mask: u64) {
        self.caps.fetch_or(mask, Ordering::AcqRel);
    }

    pub fn clear_caps(&self, mask: u64) {
        self.caps.fetch_and(!mask, Ordering::AcqRel);
    }

    pub fn has_priv(&self, name: &str) -> bool {
        self.privs.read().iter().any(|p| p == name)
    }

    /// Logged in to services?
    pub fn has_account(&self) -> bool {
        !self.suser.read().is_empty()
    }

    /// `nick!user@host` as peers see it.
    pub fn mask(&self) -> String {
        format!(
            "{}!{}@{}",
            self.nick.read(),
            self.username.read(),
            self.host.read()
        )
    }

    /// Queue a raw line to a local client. Dead or remote clients drop it.
    /// Returns false when the sendq overflowed, which kills the client.
    pub fn push_line(&self, line: String) -> bool {
        if self.is_dead() {
            return true;
        }
        match &self.link {
            Some(link) => link.push(line),
            None => true,
        }
    }

    /// Casefolded nick, the key in the nick index.
    pub fn nick_key(&self) -> String {
        solanum_proto::casemap::to_irc_lower(&self.nick.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> (Client, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (link, _) = LocalLink::new(tx, 6667, false);
        (Client::local("42XAAAAAA".into(), "127.0.0.1".parse().unwrap(), link, 0), rx)
    }

    #[test]
    fn test_flags_and_umodes() {
        let (client, _rx) = test_client();
        assert!(!client.is_registered());
        client.set_flag(cflags::REGISTERED | cflags::PERSON);
        assert!(client.is_registered() && client.is_person());

        client.set_umode(umode::OPER | umode::WALLOP);
        assert!(client.is_oper());
        client.clear_umode(umode::OPER);
        assert!(!client.is_oper());
        assert_eq!(umode::to_string(client.umodes()), "+w");
    }

    #[test]
    fn test_dead_client_drops_writes() {
        let (client, mut rx) = test_client();
        client.set_flag(cflags::DEAD);
        assert!(client.push_line("PING :x".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sendq_cap_overflow() {
        let (client, _rx) = test_client();
        let link = client.link.as_ref().unwrap();
        link.sendq_cap.store(10, Ordering::Release);
        assert!(client.push_line("12345".into()));
        assert!(!client.push_line("6789012345".into()));
    }

    #[test]
    fn test_snomask_parse() {
        let mask = snomask::parse("+bfs");
        assert!(mask & snomask::BANNED != 0);
        assert!(mask & snomask::FULL != 0);
        assert!(mask & snomask::GENERAL != 0);
        assert!(mask & snomask::REJ == 0);
    }

    #[test]
    fn test_mask_format() {
        let (client, _rx) = test_client();
        *client.nick.write() = "alice".into();
        *client.username.write() = "~a".into();
        *client.host.write() = "example.com".into();
        assert_eq!(client.mask(), "alice!~a@example.com");
    }
}
