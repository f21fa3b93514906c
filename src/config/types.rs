//! Configuration type definitions.

use serde::Deserialize;

use super::defaults::*;

/// The `serverinfo` block: identity of this server in the mesh.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    /// Server name, e.g. `irc.example.net`.
    pub name: String,
    /// TS6 server id: one digit followed by two alphanumerics.
    pub sid: String,
    pub description: String,
    pub network_name: String,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Number of TLS acceptor services to keep alive.
    #[serde(default = "default_ssld_count")]
    pub ssld_count: usize,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// The `admin` block, reported by ADMIN and STATS.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub email: String,
}

/// A connection class: quota pool for clients or servers.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassBlock {
    pub name: String,
    #[serde(default = "default_max_users")]
    pub max_users: i64,
    #[serde(default = "default_ping_frequency")]
    pub ping_frequency: u64,
    /// Seconds between autoconnect attempts (server classes).
    #[serde(default = "default_connect_frequency")]
    pub connect_frequency: u64,
    #[serde(default = "default_sendq")]
    pub sendq: usize,
    #[serde(default)]
    pub max_autoconn: usize,
    /// Per-prefix connection limiting; absent means unlimited.
    pub cidr_ipv4_bitlen: Option<u8>,
    pub cidr_ipv6_bitlen: Option<u8>,
    pub number_per_cidr: Option<u32>,
}

/// An `auth` block: who may connect, into which class, with what flags.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthBlock {
    /// `user@host` mask; host may be a hostname pattern or CIDR.
    pub user: String,
    #[serde(default = "default_class_name")]
    pub class: String,
    pub password: Option<String>,
    /// Spoof the host shown for matching clients.
    pub spoof: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    /// Redirect target advertised when the class is full.
    pub redirserv: Option<String>,
    pub redirport: Option<u16>,
    /// Require this services account name.
    pub auth_user: Option<String>,
}

/// An `operator` block.
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorBlock {
    pub name: String,
    /// `user@host` mask the oper must connect from.
    pub user: String,
    /// bcrypt hash, or plaintext when `encrypted = false`.
    pub password: String,
    #[serde(default = "default_true")]
    pub encrypted: bool,
    #[serde(default)]
    pub snomask: String,
    /// Granted privileges, e.g. `oper:kline`, `auspex:oper`.
    #[serde(default)]
    pub privs: Vec<String>,
    #[serde(default)]
    pub need_ssl: bool,
}

/// A `connect` block describing a peer server.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectBlock {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub send_password: String,
    pub accept_password: String,
    #[serde(default = "default_server_class")]
    pub class: String,
    #[serde(default)]
    pub autoconn: bool,
    #[serde(default)]
    pub tls: bool,
}

/// A `cluster` block: peers that re-emitted shared commands reach.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterBlock {
    pub server: String,
    /// Which command families propagate: kline, unkline, xline, resv, all.
    #[serde(default)]
    pub flags: Vec<String>,
}

/// A `shared` block: remote opers allowed to set bans here.
#[derive(Debug, Clone, Deserialize)]
pub struct SharedBlock {
    pub oper: String,
    pub server: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

/// Listener addresses.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_host")]
    pub host: String,
    pub port: u16,
    /// TLS listener port, requires the `tls` block.
    pub tls_port: Option<u16>,
    /// Server-to-server listener port.
    pub server_port: Option<u16>,
}

/// TLS certificate material.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

/// The `general` block: tunables for flood control and ban behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_flood_burst_max")]
    pub client_flood_burst_max: f64,
    #[serde(default = "default_flood_burst_rate")]
    pub client_flood_burst_rate: f64,
    #[serde(default = "default_flood_message_time")]
    pub client_flood_message_time: f64,
    #[serde(default = "default_flood_message_num")]
    pub client_flood_message_num: f64,
    /// Hard cap on queued unprocessed lines before "Excess Flood".
    #[serde(default = "default_flood_max_lines")]
    pub client_flood_max_lines: u32,
    /// Token bucket size for expensive commands.
    #[serde(default = "default_ratelimit_tokens")]
    pub max_ratelimit_tokens: u32,
    /// Seconds per replenished ratelimit token.
    #[serde(default = "default_ratelimit_period")]
    pub ratelimit_period: u64,
    /// Announce temporary ban expiry to opers.
    #[serde(default)]
    pub tkline_expire_notices: bool,
    /// Hide oper status from ordinary users.
    #[serde(default)]
    pub hide_opers: bool,
    /// Seconds an entry lives in the reject cache.
    #[serde(default = "default_reject_duration")]
    pub reject_duration: u64,
    /// Unregistered connections are dropped after this many seconds.
    #[serde(default = "default_registration_timeout")]
    pub registration_timeout: u64,
    /// Client tag keys (without `+`) accepted from clients.
    #[serde(default = "default_supported_client_tags")]
    pub supported_client_tags: Vec<String>,
    #[serde(default = "default_sasl_service")]
    pub sasl_service: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults must deserialize")
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults must deserialize")
    }
}

/// The `channel` block.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_max_channels")]
    pub max_channels_per_user: usize,
    /// Members below which a channel may be joined during heavy load.
    #[serde(default = "default_true")]
    pub use_forward: bool,
}

/// The `quarantine` block: channels quarantined users may still use.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuarantineConfig {
    #[serde(default)]
    pub allow_channels: Vec<String>,
    /// Part quarantined users from non-allowlisted channels on apply.
    #[serde(default)]
    pub part_on_quarantine: bool,
}
