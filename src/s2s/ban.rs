//! The BAN message: network-propagated bans.
//!
//! Wire form: `:<sid> BAN <type> <user|*> <host> <created> <duration>
//! <lifetime> <oper> :<reason>`. Apply order is fixed: index replacement,
//! then address-hash install, then onward emission. A duration of zero
//! unsets the ban; the tombstone rides out its lifetime suppressing
//! replays.

use std::sync::Arc;

use solanum_proto::MsgBuf;
use tracing::debug;

use crate::access::{Applied, BanKind, BanUpdate, ConfKind};
use crate::context::CoreContext;
use crate::send::{self, NoticeScope};
use crate::state::snomask;

/// Parse a BAN message's parameters.
pub fn parse_ban(msg: &MsgBuf) -> Option<BanUpdate> {
    if msg.params.len() < 8 {
        return None;
    }
    let kind = BanKind::from_letter(msg.params[0].chars().next()?)?;
    let user = match msg.params[1].as_str() {
        "*" => None,
        other => Some(other.to_string()),
    };
    let oper_reason;
    let reason;
    match msg.params[7].split_once('|') {
        Some((r, o)) => {
            reason = r.trim_end().to_string();
            oper_reason = Some(o.trim_start().to_string());
        }
        None => {
            reason = msg.params[7].clone();
            oper_reason = None;
        }
    }
    Some(BanUpdate {
        kind,
        user,
        host: msg.params[2].clone(),
        created: msg.params[3].parse().ok()?,
        duration: msg.params[4].parse().ok()?,
        lifetime_duration: msg.params[5].parse().ok()?,
        set_by: msg.params[6].clone(),
        reason,
        oper_reason,
    })
}

/// Serialize an update back to the wire.
pub fn format_ban(ctx: &CoreContext, update: &BanUpdate) -> String {
    let reason = match &update.oper_reason {
        Some(oper_reason) => format!("{}|{}", update.reason, oper_reason),
        None => update.reason.clone(),
    };
    format!(
        ":{} BAN {} {} {} {} {} {} {} :{}",
        ctx.me.sid,
        update.kind.letter(),
        update.user.as_deref().unwrap_or("*"),
        update.host,
        update.created,
        update.duration,
        update.lifetime_duration,
        update.set_by,
        reason
    )
}

/// Serialize a stored record for bursting to a fresh link.
pub fn format_ban_burst(ctx: &CoreContext, conf: &crate::access::ConfItem) -> Option<String> {
    let kind = match conf.kind {
        ConfKind::Kline => BanKind::Kline,
        ConfKind::Xline => BanKind::Xline,
        ConfKind::ResvNick | ConfKind::ResvChannel => BanKind::Resv,
        _ => return None,
    };
    Some(format!(
        ":{} BAN {} {} {} {} {} {} {} :{}",
        ctx.me.sid,
        kind.letter(),
        conf.user.as_deref().unwrap_or("*"),
        conf.host,
        conf.created,
        conf.hold - conf.created,
        conf.lifetime - conf.created,
        conf.set_by.as_deref().unwrap_or("*"),
        conf.reason
    ))
}

/// Apply a BAN (from a peer or issued locally) and carry out the fixed
/// follow-up order. `from_sid` is the link it arrived on, excluded from
/// re-emission.
pub fn apply_ban(ctx: &CoreContext, update: &BanUpdate, from_sid: Option<&str>) {
    let now = ctx.now();
    match ctx.prop_bans.apply(update) {
        Applied::Unchanged => {}
        Applied::Rejected(ours) => {
            // our record is newer; teach the origin
            if let Some(sid) = from_sid {
                if let (Some(server), Some(line)) =
                    (ctx.servers.by_sid(sid), format_ban_burst(ctx, &ours))
                {
                    server.send(line);
                }
            }
        }
        Applied::Inserted(new) => {
            if !update.is_removal() && !new.expired(now) {
                ctx.atable.add(new.clone());
                enforce_new_ban(ctx, &new);
            }
            announce(ctx, update, from_sid);
        }
        Applied::Replaced { old, new } => {
            ctx.atable.remove(&old);
            if !update.is_removal() && !new.expired(now) {
                ctx.atable.add(new.clone());
                enforce_new_ban(ctx, &new);
            }
            announce(ctx, update, from_sid);
        }
    }
}

fn announce(ctx: &CoreContext, update: &BanUpdate, from_sid: Option<&str>) {
    let verb = if update.is_removal() { "removed" } else { "added" };
    let mask = match &update.user {
        Some(user) => format!("{}@{}", user, update.host),
        None => update.host.clone(),
    };
    send::sendto_realops(
        ctx,
        snomask::BANNED,
        NoticeScope::Local,
        &format!(
            "{} {} global {}-line for {} [{}]",
            update.set_by,
            verb,
            update.kind.letter(),
            mask,
            update.reason
        ),
    );

    let line = format_ban(ctx, update);
    ctx.servers
        .send_to_matching("*", ctx.server_caps.ban, from_sid, &line);
    debug!(kind = %update.kind.letter(), mask = %mask, "propagated ban applied");
}

/// Disconnect local clients a fresh K-line matches.
fn enforce_new_ban(ctx: &CoreContext, conf: &Arc<crate::access::ConfItem>) {
    if conf.kind != ConfKind::Kline {
        return;
    }
    for client in ctx.clients.local_clients() {
        if !client.is_person() {
            continue;
        }
        let Some(ip) = client.ip else { continue };
        let username = client.username.read().clone();
        let host = client.host.read().clone();
        let matched = ctx
            .atable
            .find_kline(
                Some(&host),
                &client.sockhost,
                &username,
                ip,
                client.att_conf.read().as_ref(),
            )
            .is_some_and(|found| Arc::ptr_eq(&found, conf));
        if matched {
            send::send_numeric(
                ctx,
                &client,
                solanum_proto::Numeric::ERR_YOUREBANNEDCREEP,
                &[&format!("You are banned from this server- {}", conf.reason)],
            );
            client.set_flag(crate::state::cflags::DEAD);
        }
    }
}

/// Burst every live propagated ban to a freshly linked peer.
pub fn burst_bans(ctx: &CoreContext, server: &crate::s2s::Server) {
    if !server.has_cap(ctx.server_caps.ban) {
        return;
    }
    for conf in ctx.prop_bans.all() {
        if let Some(line) = format_ban_burst(ctx, &conf) {
            server.send(line);
        }
    }
}
