//! Configuration loading and management.
//!
//! TOML config mirroring the classic ircd.conf block structure:
//! `serverinfo`, `admin`, `class`, `auth`, `operator`, `connect`,
//! `cluster`, `shared`, `listen`, `exempt`, `resv`, `service`, `general`,
//! `channel`, `quarantine`. The lexer/parser of the old ircd.conf format is
//! out of scope; this module consumes the equivalent typed struct graph.

mod defaults;
mod types;
mod validation;

pub use types::{
    AdminConfig, AuthBlock, ChannelConfig, ClassBlock, ClusterBlock, ConnectBlock, GeneralConfig,
    ListenConfig, LogFormat, OperatorBlock, QuarantineConfig, ServerInfo, SharedBlock, TlsConfig,
};
pub use validation::validate;

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub serverinfo: ServerInfo,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub class: Vec<ClassBlock>,
    #[serde(default)]
    pub auth: Vec<AuthBlock>,
    #[serde(default)]
    pub operator: Vec<OperatorBlock>,
    #[serde(default)]
    pub connect: Vec<ConnectBlock>,
    #[serde(default)]
    pub cluster: Vec<ClusterBlock>,
    #[serde(default)]
    pub shared: Vec<SharedBlock>,
    pub listen: ListenConfig,
    pub tls: Option<TlsConfig>,
    /// IPs exempted from D-lines, one address or CIDR per entry.
    #[serde(default)]
    pub exempt: Vec<String>,
    /// Reserved nicks and channels from config (permanent resvs).
    #[serde(default)]
    pub resv: Vec<ResvBlock>,
    /// Nicks belonging to network services.
    #[serde(default)]
    pub service: Vec<String>,
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub quarantine: QuarantineConfig,
    pub database: Option<DatabaseConfig>,
}

/// A reserved nick or channel from the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ResvBlock {
    pub mask: String,
    #[serde(default = "defaults::default_resv_reason")]
    pub reason: String,
}

/// Ban database location.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite ban database.
    pub path: String,
}

impl Config {
    /// Load and parse a config file.
    pub fn load(path: &str) -> anyhow::Result<Config> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path, e))?;
        let config: Config = toml::from_str(&text)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [serverinfo]
        name = "irc.example.net"
        sid = "42X"
        description = "test server"
        network_name = "ExampleNet"

        [listen]
        host = "127.0.0.1"
        port = 6667
    "#;

    #[test]
    fn test_minimal_config_parses() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.serverinfo.name, "irc.example.net");
        assert_eq!(config.serverinfo.sid, "42X");
        assert_eq!(config.general.client_flood_burst_max, 5.0);
        assert!(config.class.is_empty());
    }

    #[test]
    fn test_full_blocks_parse() {
        let text = format!(
            "{MINIMAL}
            [[class]]
            name = \"users\"
            max_users = 100
            ping_frequency = 30
            sendq = 400000
            cidr_ipv4_bitlen = 24
            cidr_ipv6_bitlen = 64
            number_per_cidr = 4

            [[auth]]
            user = \"*@*\"
            class = \"users\"

            [[operator]]
            name = \"god\"
            user = \"*@127.0.0.1\"
            password = \"test\"
            snomask = \"+Zbfkrsuy\"

            [[resv]]
            mask = \"#services\"

            [quarantine]
            allow_channels = [\"#help\"]
            "
        );
        let config: Config = toml::from_str(&text).unwrap();
        assert_eq!(config.class[0].number_per_cidr, Some(4));
        assert_eq!(config.auth[0].class, "users");
        assert_eq!(config.quarantine.allow_channels, vec!["#help"]);
    }
}
