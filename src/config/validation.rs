//! Startup configuration validation.
//!
//! Fatal problems here abort startup with a non-zero exit; the caller
//! collects all errors so an operator sees the full list at once.

use super::Config;

/// Validate the loaded configuration. Returns all problems found.
pub fn validate(config: &Config) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.serverinfo.name.is_empty() || !config.serverinfo.name.contains('.') {
        errors.push("serverinfo.name must be a dotted server name".to_string());
    }

    if !valid_sid(&config.serverinfo.sid) {
        errors.push(format!(
            "serverinfo.sid {:?} must be one digit followed by two alphanumerics",
            config.serverinfo.sid
        ));
    }

    if config.listen.tls_port.is_some() && config.tls.is_none() {
        errors.push("listen.tls_port set but no [tls] block".to_string());
    }

    for class in &config.class {
        let cidr = (
            class.cidr_ipv4_bitlen.is_some() || class.cidr_ipv6_bitlen.is_some(),
            class.number_per_cidr.is_some(),
        );
        if cidr == (true, false) || cidr == (false, true) {
            errors.push(format!(
                "class {:?}: cidr bitlen and number_per_cidr must be set together",
                class.name
            ));
        }
        if let Some(bits) = class.cidr_ipv4_bitlen {
            if bits > 32 {
                errors.push(format!("class {:?}: cidr_ipv4_bitlen > 32", class.name));
            }
        }
        if let Some(bits) = class.cidr_ipv6_bitlen {
            if bits > 128 {
                errors.push(format!("class {:?}: cidr_ipv6_bitlen > 128", class.name));
            }
        }
    }

    for auth in &config.auth {
        if !config.class.iter().any(|c| c.name == auth.class) && auth.class != "default" {
            errors.push(format!(
                "auth {:?} names unknown class {:?}",
                auth.user, auth.class
            ));
        }
    }

    for exempt in &config.exempt {
        if exempt.parse::<ipnet::IpNet>().is_err() && exempt.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!("exempt {:?} is not an address or CIDR", exempt));
        }
    }

    for connect in &config.connect {
        if !valid_sid_or_name(&connect.name) {
            errors.push(format!("connect {:?}: invalid server name", connect.name));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn valid_sid(sid: &str) -> bool {
    let b = sid.as_bytes();
    b.len() == 3
        && b[0].is_ascii_digit()
        && b[1..].iter().all(|c| c.is_ascii_alphanumeric())
}

fn valid_sid_or_name(name: &str) -> bool {
    !name.is_empty() && name.contains('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        toml::from_str(
            r#"
            [serverinfo]
            name = "irc.example.net"
            sid = "42X"
            description = "d"
            network_name = "n"

            [listen]
            port = 6667
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate(&base()).is_ok());
    }

    #[test]
    fn test_bad_sid_rejected() {
        let mut config = base();
        config.serverinfo.sid = "XX1".to_string();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("sid")));
    }

    #[test]
    fn test_tls_port_requires_tls_block() {
        let mut config = base();
        config.listen.tls_port = Some(6697);
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("tls")));
    }

    #[test]
    fn test_cidr_fields_must_pair() {
        let mut config = base();
        config.class.push(toml::from_str(
            r#"
            name = "users"
            cidr_ipv4_bitlen = 24
            "#,
        ).unwrap());
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("number_per_cidr")));
    }
}
