//! Server-to-server propagation and ENCAP wrapping.
//!
//! A command reaches peers that negotiated its capability directly;
//! everyone else gets it wrapped as `ENCAP <target-mask> <command>
//! <args>`. Cluster blocks re-emit shared operator commands to their
//! declared peers.

use crate::context::CoreContext;

/// Send `command target args...` to every matching peer, ENCAP-wrapping
/// for peers without `cap`. `except_sid` excludes the origin link.
pub fn propagate_generic(
    ctx: &CoreContext,
    source: &str,
    command: &str,
    target: &str,
    cap: u64,
    args: &str,
    except_sid: Option<&str>,
) {
    let direct = format!(":{source} {command} {target} {args}");
    let wrapped = format!(":{source} ENCAP {target} {command} {args}");
    for server in ctx.servers.all() {
        if Some(server.sid.as_str()) == except_sid {
            continue;
        }
        if !solanum_proto::mask_match(target, &server.name) && target != "*" {
            continue;
        }
        if server.has_cap(cap) {
            server.send(direct.clone());
        } else if server.has_cap(ctx.server_caps.encap) {
            server.send(wrapped.clone());
        }
    }
}

/// Re-emit a shared command to cluster peers carrying `flag`.
pub fn cluster_generic(
    ctx: &CoreContext,
    source: &str,
    command: &str,
    flag: &str,
    cap: u64,
    args: &str,
) {
    let config = ctx.config();
    for block in &config.cluster {
        let matches = block
            .flags
            .iter()
            .any(|f| f == flag || f == "all");
        if !matches {
            continue;
        }
        propagate_generic(ctx, source, command, &block.server, cap, args, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::test_context;
    use crate::s2s::Server;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[test]
    fn test_encap_fallback_for_capless_peer() {
        let ctx = test_context();
        let kln = ctx.server_caps.kln;
        let encap = ctx.server_caps.encap;

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        ctx.servers
            .add(Arc::new(Server::new("a.net".into(), "00A".into(), kln | encap, tx_a)));
        ctx.servers
            .add(Arc::new(Server::new("b.net".into(), "00B".into(), encap, tx_b)));

        propagate_generic(&ctx, "42X", "KLINE", "*", kln, "600 * bad.host :spam", None);

        assert_eq!(rx_a.try_recv().unwrap(), ":42X KLINE * 600 * bad.host :spam");
        assert_eq!(
            rx_b.try_recv().unwrap(),
            ":42X ENCAP * KLINE 600 * bad.host :spam"
        );
    }

    #[test]
    fn test_origin_excluded() {
        let ctx = test_context();
        let (tx, mut rx) = mpsc::unbounded_channel();
        ctx.servers
            .add(Arc::new(Server::new("a.net".into(), "00A".into(), u64::MAX, tx)));
        propagate_generic(&ctx, "00A", "BAN", "*", 0, "...", Some("00A"));
        assert!(rx.try_recv().is_err());
    }
}
