//! Operator ban management: KLINE, DLINE, XLINE, RESV and their removals.
//!
//! Durations are minutes, 0 means permanent. Permanent bans go to the ban
//! database; temporary ones go on the TTL buckets. `ON *` makes a K-line
//! global, which requires a finite duration and rides the BAN message;
//! plain invocations are local and never propagate.

use std::sync::Arc;

use async_trait::async_trait;
use solanum_proto::wildcard::split_user_host;
use solanum_proto::MsgBuf;

use super::Handler;
use crate::access::{flags, BanKind, BanUpdate, ConfItem, ConfKind};
use crate::context::CoreContext;
use crate::db::StoredBanKind;
use crate::error::{HandlerError, HandlerResult};
use crate::s2s::ban::apply_ban;
use crate::send::{self, NoticeScope};
use crate::state::{cflags, snomask, Client};

/// Longest temporary ban: a year, as the old tree capped it.
const MAX_TEMP_MIN: i64 = 525_600;

struct BanArgs {
    duration_min: i64,
    mask: String,
    global: bool,
    reason: String,
    oper_reason: Option<String>,
}

/// `[duration] mask [ON target] :reason[|oper reason]`
fn parse_ban_args(msg: &MsgBuf) -> Result<BanArgs, HandlerError> {
    let mut params = msg.params.iter().peekable();
    let mut duration_min = 0i64;
    if let Some(first) = params.peek() {
        if let Ok(minutes) = first.parse::<i64>() {
            duration_min = minutes.clamp(0, MAX_TEMP_MIN);
            params.next();
        }
    }
    let mask = params.next().ok_or(HandlerError::NeedMoreParams)?.clone();

    let mut global = false;
    let mut reason = "No reason".to_string();
    let remaining: Vec<&String> = params.collect();
    let mut i = 0;
    while i < remaining.len() {
        if remaining[i].eq_ignore_ascii_case("ON") {
            let target = remaining.get(i + 1).ok_or(HandlerError::NeedMoreParams)?;
            global = target.as_str() == "*";
            i += 2;
        } else {
            reason = remaining[i].clone();
            i += 1;
        }
    }

    let (reason, oper_reason) = match reason.split_once('|') {
        Some((public, oper)) => (
            public.trim_end().to_string(),
            Some(oper.trim_start().to_string()),
        ),
        None => (reason, None),
    };

    Ok(BanArgs {
        duration_min,
        mask,
        global,
        reason,
        oper_reason,
    })
}

fn require_priv(client: &Client, name: &str) -> HandlerResult {
    if client.has_priv(name) {
        Ok(())
    } else {
        Err(HandlerError::NoPrivs(name.to_string()))
    }
}

fn oper_field(client: &Client) -> String {
    format!(
        "{}!{}@{}{{{}}}",
        client.nick.read(),
        client.username.read(),
        client.host.read(),
        client.opername.read().clone().unwrap_or_default()
    )
}

/// Install a local ban record in the right structures.
async fn install_local(
    ctx: &Arc<CoreContext>,
    client: &Arc<Client>,
    mut conf: ConfItem,
    stored_kind: StoredBanKind,
    duration_min: i64,
) {
    let now = ctx.now();
    conf.created = now;
    conf.set_by = Some(oper_field(client));

    if duration_min > 0 {
        conf.hold = now + duration_min * 60;
        let conf = Arc::new(conf);
        conf.set_flag(flags::TEMPORARY | flags::MYOPER);
        ctx.atable.add(conf.clone());
        ctx.temp_bans.add(conf.clone(), now);
        send::sendto_realops(
            ctx,
            snomask::GENERAL,
            NoticeScope::Local,
            &format!(
                "{} added temporary {} min. ban for [{}] [{}]",
                client.nick.read(),
                duration_min,
                conf.display_mask(),
                conf.reason
            ),
        );
    } else {
        let conf = Arc::new(conf);
        conf.set_flag(flags::MYOPER);
        ctx.atable.add(conf.clone());
        if let Some(bandb) = &ctx.bandb {
            let result = bandb
                .add(
                    stored_kind,
                    &oper_field(client),
                    conf.user.as_deref(),
                    &conf.host,
                    &conf.reason,
                    conf.oper_reason.as_deref(),
                )
                .await;
            if let Err(error) = result {
                tracing::warn!(error = %error, "bandb add failed");
            }
        }
        send::sendto_realops(
            ctx,
            snomask::GENERAL,
            NoticeScope::Local,
            &format!(
                "{} added ban for [{}] [{}]",
                client.nick.read(),
                conf.display_mask(),
                conf.reason
            ),
        );
    }
}

/// Disconnect local clients the fresh user@host ban matches.
fn enforce_kline(ctx: &CoreContext, user_mask: &str, host_mask: &str, reason: &str) {
    for client in ctx.clients.local_clients() {
        if !client.is_person() || client.is_oper() {
            continue;
        }
        let username = client.username.read().clone();
        let host = client.host.read().clone();
        let host_hit = solanum_proto::mask_match(host_mask, &host)
            || solanum_proto::mask_match(host_mask, &client.sockhost)
            || client.ip.is_some_and(|ip| {
                host_mask
                    .parse::<ipnet::IpNet>()
                    .is_ok_and(|net| net.contains(&ip))
            });
        if host_hit && solanum_proto::mask_match(user_mask, &username) {
            send::send_numeric(
                ctx,
                &client,
                solanum_proto::Numeric::ERR_YOUREBANNEDCREEP,
                &[&format!("You are banned from this server- {reason}")],
            );
            client.set_flag(cflags::DEAD);
        }
    }
}

pub struct KlineHandler;

#[async_trait]
impl Handler for KlineHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        require_priv(client, "oper:kline")?;
        let args = parse_ban_args(msg)?;
        let (user, host) = split_user_host(&args.mask);

        if args.global {
            require_priv(client, "oper:remoteban")?;
            if args.duration_min == 0 {
                send::send_server_notice(
                    ctx,
                    client,
                    "Permanent global K-lines are not allowed; give a duration",
                );
                return Ok(());
            }
            let update = BanUpdate {
                kind: BanKind::Kline,
                user: Some(user.to_string()),
                host: host.to_string(),
                created: ctx.now(),
                duration: args.duration_min * 60,
                // global temps carry lifetime = hold
                lifetime_duration: args.duration_min * 60,
                set_by: oper_field(client),
                reason: args.reason.clone(),
                oper_reason: args.oper_reason.clone(),
            };
            apply_ban(ctx, &update, None);
            return Ok(());
        }

        let existing = ctx
            .atable
            .all_of_kind(ConfKind::Kline)
            .into_iter()
            .find(|conf| {
                conf.user.as_deref() == Some(user)
                    && solanum_proto::casemap::irccmp(&conf.host, host)
            });
        if let Some(existing) = existing {
            // a longer hold supersedes; anything else is a duplicate
            let new_hold = if args.duration_min > 0 {
                ctx.now() + args.duration_min * 60
            } else {
                i64::MAX
            };
            let old_hold = if existing.hold == 0 { i64::MAX } else { existing.hold };
            if new_hold <= old_hold {
                send::send_server_notice(
                    ctx,
                    client,
                    &format!("[{}] already K-lined: {}", existing.display_mask(), existing.reason),
                );
                return Ok(());
            }
            existing.set_illegal();
            ctx.atable.remove(&existing);
            if existing.is_temporary() {
                ctx.temp_bans.remove(&existing);
            }
        }

        let mut conf = ConfItem::new(
            ConfKind::Kline,
            Some(user.to_string()),
            host.to_string(),
            args.reason.clone(),
        );
        conf.oper_reason = args.oper_reason.clone();
        install_local(ctx, client, conf, StoredBanKind::Kline, args.duration_min).await;
        enforce_kline(ctx, user, host, &args.reason);
        Ok(())
    }
}

pub struct UnklineHandler;

#[async_trait]
impl Handler for UnklineHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        require_priv(client, "oper:unkline")?;
        let (user, host) = split_user_host(&msg.params[0]);
        remove_ban(ctx, client, ConfKind::Kline, Some(user), host, StoredBanKind::Kline).await
    }
}

pub struct DlineHandler;

#[async_trait]
impl Handler for DlineHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        require_priv(client, "oper:kline")?;
        let args = parse_ban_args(msg)?;

        if args.mask.parse::<ipnet::IpNet>().is_err()
            && args.mask.parse::<std::net::IpAddr>().is_err()
        {
            send::send_server_notice(ctx, client, &format!("Invalid D-line mask: {}", args.mask));
            return Ok(());
        }

        let mut conf = ConfItem::new(ConfKind::Dline, None, args.mask.clone(), args.reason.clone());
        conf.oper_reason = args.oper_reason.clone();
        install_local(ctx, client, conf, StoredBanKind::Dline, args.duration_min).await;

        // D-lines hit at accept; existing connections from the range drop now
        for victim in ctx.clients.local_clients() {
            let Some(ip) = victim.ip else { continue };
            if victim.is_oper() {
                continue;
            }
            if ctx
                .atable
                .find_dline(ip)
                .is_some_and(|found| found.kind == ConfKind::Dline)
            {
                victim.set_flag(cflags::DEAD);
            }
        }
        Ok(())
    }
}

pub struct UndlineHandler;

#[async_trait]
impl Handler for UndlineHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        require_priv(client, "oper:unkline")?;
        remove_ban(ctx, client, ConfKind::Dline, None, &msg.params[0], StoredBanKind::Dline).await
    }
}

pub struct XlineHandler;

#[async_trait]
impl Handler for XlineHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        require_priv(client, "oper:xline")?;
        let args = parse_ban_args(msg)?;
        let mut conf = ConfItem::new(ConfKind::Xline, None, args.mask.clone(), args.reason.clone());
        conf.oper_reason = args.oper_reason.clone();
        install_local(ctx, client, conf, StoredBanKind::Xline, args.duration_min).await;
        Ok(())
    }
}

pub struct UnxlineHandler;

#[async_trait]
impl Handler for UnxlineHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        require_priv(client, "oper:xline")?;
        remove_ban(ctx, client, ConfKind::Xline, None, &msg.params[0], StoredBanKind::Xline).await
    }
}

pub struct ResvHandler;

#[async_trait]
impl Handler for ResvHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        require_priv(client, "oper:resv")?;
        let args = parse_ban_args(msg)?;
        let kind = BanKind::Resv.conf_kind(&args.mask);
        let conf = ConfItem::new(kind, None, args.mask.clone(), args.reason.clone());
        install_local(ctx, client, conf, StoredBanKind::Resv, args.duration_min).await;
        Ok(())
    }
}

pub struct UnresvHandler;

#[async_trait]
impl Handler for UnresvHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        require_priv(client, "oper:resv")?;
        let kind = BanKind::Resv.conf_kind(&msg.params[0]);
        remove_ban(ctx, client, kind, None, &msg.params[0], StoredBanKind::Resv).await
    }
}

async fn remove_ban(
    ctx: &Arc<CoreContext>,
    client: &Arc<Client>,
    kind: ConfKind,
    user: Option<&str>,
    host: &str,
    stored_kind: StoredBanKind,
) -> HandlerResult {
    let found = ctx.atable.all_of_kind(kind).into_iter().find(|conf| {
        conf.user.as_deref().unwrap_or("*") == user.unwrap_or("*")
            && solanum_proto::casemap::irccmp(&conf.host, host)
    });

    let Some(conf) = found else {
        send::send_server_notice(ctx, client, &format!("No such ban: {host}"));
        return Ok(());
    };

    conf.set_illegal();
    ctx.atable.remove(&conf);
    if conf.is_temporary() {
        ctx.temp_bans.remove(&conf);
    } else if let Some(bandb) = &ctx.bandb {
        if let Err(error) = bandb.del(stored_kind, user, host).await {
            tracing::warn!(error = %error, "bandb del failed");
        }
    }

    send::sendto_realops(
        ctx,
        snomask::GENERAL,
        NoticeScope::Local,
        &format!("{} removed ban for [{}]", client.nick.read(), conf.display_mask()),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::TempSlot;
    use crate::context::test_support::test_context;
    use crate::state::{umode, LocalLink};
    use tokio::sync::mpsc;

    fn oper(ctx: &Arc<CoreContext>) -> (Arc<Client>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (link, _) = LocalLink::new(tx, 6667, false);
        let client = Arc::new(Client::local(
            ctx.uid_gen.next(),
            "127.0.0.1".parse().unwrap(),
            link,
            0,
        ));
        client.set_flag(cflags::REGISTERED | cflags::PERSON);
        client.set_umode(umode::OPER);
        *client.privs.write() = vec![
            "oper:kline".into(),
            "oper:unkline".into(),
            "oper:xline".into(),
            "oper:resv".into(),
            "oper:remoteban".into(),
        ];
        ctx.clients.insert(client.clone());
        ctx.clients.claim_nick(&client, "god");
        (client, rx)
    }

    #[tokio::test]
    async fn test_temp_kline_lands_in_bucket_and_hash() {
        let ctx = test_context();
        let (op, _rx) = oper(&ctx);
        let msg = MsgBuf::parse("KLINE 90 *@flood.example.com :go away").unwrap();
        KlineHandler.handle(&ctx, &op, &msg).await.unwrap();

        let klines = ctx.atable.all_of_kind(ConfKind::Kline);
        assert_eq!(klines.len(), 1);
        assert!(klines[0].is_temporary());
        // 90 minutes belongs on the HOUR bucket
        assert_eq!(ctx.temp_bans.slot_of(&klines[0]), Some(TempSlot::Hour));
    }

    #[tokio::test]
    async fn test_kline_superseded_by_longer() {
        let ctx = test_context();
        let (op, mut rx) = oper(&ctx);
        KlineHandler
            .handle(&ctx, &op, &MsgBuf::parse("KLINE 1 *@example.com :short").unwrap())
            .await
            .unwrap();
        KlineHandler
            .handle(&ctx, &op, &MsgBuf::parse("KLINE 60 *@example.com :long").unwrap())
            .await
            .unwrap();

        // exactly one record remains, on the HOUR bucket; MIN is empty
        let klines = ctx.atable.all_of_kind(ConfKind::Kline);
        assert_eq!(klines.len(), 1);
        assert_eq!(klines[0].reason, "long");
        assert_eq!(ctx.temp_bans.slot_of(&klines[0]), Some(TempSlot::Hour));
        assert_eq!(
            ctx.temp_bans
                .snapshot(ConfKind::Kline)
                .iter()
                .filter(|c| !c.is_illegal())
                .count(),
            1
        );

        // a shorter re-add is refused as a duplicate
        KlineHandler
            .handle(&ctx, &op, &MsgBuf::parse("KLINE 1 *@example.com :shorter").unwrap())
            .await
            .unwrap();
        let lines: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(lines.iter().any(|l| l.contains("already K-lined")));
        assert_eq!(ctx.atable.all_of_kind(ConfKind::Kline).len(), 1);
    }

    #[tokio::test]
    async fn test_unkline_removes_from_everything() {
        let ctx = test_context();
        let (op, _rx) = oper(&ctx);
        KlineHandler
            .handle(&ctx, &op, &MsgBuf::parse("KLINE 30 bad@*.example.net :r").unwrap())
            .await
            .unwrap();
        UnklineHandler
            .handle(&ctx, &op, &MsgBuf::parse("UNKLINE bad@*.example.net").unwrap())
            .await
            .unwrap();
        assert!(ctx.atable.all_of_kind(ConfKind::Kline).is_empty());
        assert!(ctx
            .temp_bans
            .snapshot(ConfKind::Kline)
            .is_empty());
    }

    #[tokio::test]
    async fn test_global_kline_requires_duration() {
        let ctx = test_context();
        let (op, mut rx) = oper(&ctx);
        KlineHandler
            .handle(&ctx, &op, &MsgBuf::parse("KLINE perm@global.net ON * :r").unwrap())
            .await
            .unwrap();
        assert!(ctx.prop_bans.is_empty());
        let lines: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(lines.iter().any(|l| l.contains("Permanent global K-lines")));

        KlineHandler
            .handle(&ctx, &op, &MsgBuf::parse("KLINE 10 tmp@global.net ON * :r").unwrap())
            .await
            .unwrap();
        assert_eq!(ctx.prop_bans.len(), 1);
        let stored = ctx.prop_bans.all();
        // global temps carry lifetime = hold
        assert_eq!(stored[0].lifetime, stored[0].hold);
    }

    #[tokio::test]
    async fn test_kline_without_priv_denied() {
        let ctx = test_context();
        let (op, _rx) = oper(&ctx);
        op.privs.write().clear();
        let err = KlineHandler
            .handle(&ctx, &op, &MsgBuf::parse("KLINE 5 *@x.net :r").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::NoPrivs(p) if p == "oper:kline"));
    }

    #[tokio::test]
    async fn test_dline_validates_mask() {
        let ctx = test_context();
        let (op, mut rx) = oper(&ctx);
        DlineHandler
            .handle(&ctx, &op, &MsgBuf::parse("DLINE not-an-ip :r").unwrap())
            .await
            .unwrap();
        assert!(ctx.atable.all_of_kind(ConfKind::Dline).is_empty());
        let lines: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(lines.iter().any(|l| l.contains("Invalid D-line mask")));

        DlineHandler
            .handle(&ctx, &op, &MsgBuf::parse("DLINE 10 10.9.0.0/16 :bad net").unwrap())
            .await
            .unwrap();
        assert_eq!(ctx.atable.all_of_kind(ConfKind::Dline).len(), 1);
    }

    #[tokio::test]
    async fn test_resv_kind_follows_mask() {
        let ctx = test_context();
        let (op, _rx) = oper(&ctx);
        ResvHandler
            .handle(&ctx, &op, &MsgBuf::parse("RESV #banned :r").unwrap())
            .await
            .unwrap();
        ResvHandler
            .handle(&ctx, &op, &MsgBuf::parse("RESV badnick :r").unwrap())
            .await
            .unwrap();
        assert_eq!(ctx.atable.all_of_kind(ConfKind::ResvChannel).len(), 1);
        assert_eq!(ctx.atable.all_of_kind(ConfKind::ResvNick).len(), 1);
    }
}
