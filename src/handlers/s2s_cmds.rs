//! Commands arriving over server links: BAN, ENCAP, EUID, remote
//! KLINE/UNKLINE, QUIT, SQUIT.
//!
//! The `client` here is the link itself; the true origin rides in the
//! message source as a UID or SID.

use std::sync::Arc;

use async_trait::async_trait;
use solanum_proto::MsgBuf;
use tracing::{debug, warn};

use super::Handler;
use crate::access::{flags, ConfItem, ConfKind};
use crate::context::CoreContext;
use crate::error::HandlerResult;
use crate::hooks::IntroduceClient;
use crate::s2s::ban::{apply_ban, parse_ban};
use crate::send::{self, NoticeScope};
use crate::state::{snomask, Client};

pub struct BanHandler;

#[async_trait]
impl Handler for BanHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        link: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        match parse_ban(msg) {
            Some(update) => apply_ban(ctx, &update, Some(&link.uid)),
            None => warn!(params = ?msg.params, "malformed BAN dropped"),
        }
        Ok(())
    }
}

pub struct EncapHandler;

#[async_trait]
impl Handler for EncapHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        link: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        let target = &msg.params[0];
        let command = msg.params[1].to_ascii_uppercase();
        let args = &msg.params[2..];

        // relay toward everyone else the mask names
        let relayed = msg.serialize(u64::MAX);
        ctx.servers
            .send_to_matching(target, ctx.server_caps.encap, Some(&link.uid), &relayed);

        if !solanum_proto::mask_match(target, &ctx.me.name) && target != "*" {
            return Ok(());
        }

        match command.as_str() {
            "SNOTE" => {
                if let Some(text) = args.get(1) {
                    let mask = args
                        .first()
                        .and_then(|letter| letter.chars().next())
                        .and_then(snomask::from_char)
                        .unwrap_or(snomask::GENERAL);
                    send::sendto_realops(ctx, mask, NoticeScope::Local, text);
                }
            }
            "KLINE" => {
                // ENCAP target KLINE duration user host :reason
                if args.len() >= 4 {
                    install_remote_kline(
                        ctx,
                        msg.source.as_deref().unwrap_or("*"),
                        args[0].parse().unwrap_or(0),
                        &args[1],
                        &args[2],
                        &args[3],
                    );
                }
            }
            "UNKLINE" => {
                if args.len() >= 2 {
                    remove_remote_kline(ctx, &args[0], &args[1]);
                }
            }
            "LOGIN" | "SU" => {
                // services account attach/detach; the hook chain reacts
                // (quarantine lifts itself on login)
                let target_uid = match command.as_str() {
                    "SU" => args.first().map(String::as_str),
                    _ => msg.source.as_deref(),
                };
                let account = match command.as_str() {
                    "SU" => args.get(1).map(String::as_str).unwrap_or(""),
                    _ => args.first().map(String::as_str).unwrap_or(""),
                };
                if let Some(target_client) =
                    target_uid.and_then(|uid| ctx.clients.by_uid(uid))
                {
                    *target_client.suser.write() = account.to_string();
                    ctx.hooks.account_change.call(
                        ctx,
                        &mut crate::hooks::AccountChange {
                            client: target_client.clone(),
                        },
                    );
                    // account-notify for local watchers sharing a channel
                    let notify = MsgBuf::new("ACCOUNT")
                        .with_source(target_client.mask())
                        .with_param(if account.is_empty() { "*" } else { account });
                    for name in target_client.channels.read().iter() {
                        if let Some(channel) = ctx.channels.get(name) {
                            for member in channel.members.iter() {
                                if let Some(watcher) = ctx.clients.by_uid(member.key()) {
                                    if watcher.is_local()
                                        && watcher.caps() & ctx.client_caps.account_notify != 0
                                    {
                                        send::deliver(&watcher, &notify);
                                    }
                                }
                            }
                        }
                    }
                }
            }
            "QUARANTINE" => {
                if let Some(target_client) = args.first().and_then(|uid| ctx.clients.by_uid(uid)) {
                    if target_client.is_local() {
                        crate::policy::quarantine::apply(ctx, &target_client);
                    }
                }
            }
            other => debug!(command = other, "unhandled ENCAP"),
        }
        Ok(())
    }
}

pub struct RemoteKlineHandler;

#[async_trait]
impl Handler for RemoteKlineHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        _link: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        // :<source> KLINE <target-mask> <duration> <user> <host> :<reason>
        if !solanum_proto::mask_match(&msg.params[0], &ctx.me.name) {
            return Ok(());
        }
        install_remote_kline(
            ctx,
            msg.source.as_deref().unwrap_or("*"),
            msg.params[1].parse().unwrap_or(0),
            &msg.params[2],
            &msg.params[3],
            &msg.params[4],
        );
        Ok(())
    }
}

pub struct RemoteUnklineHandler;

#[async_trait]
impl Handler for RemoteUnklineHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        _link: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        if !solanum_proto::mask_match(&msg.params[0], &ctx.me.name) {
            return Ok(());
        }
        remove_remote_kline(ctx, &msg.params[1], &msg.params[2]);
        Ok(())
    }
}

fn install_remote_kline(
    ctx: &CoreContext,
    set_by: &str,
    duration_secs: i64,
    user: &str,
    host: &str,
    reason: &str,
) {
    let now = ctx.now();
    let mut conf = ConfItem::new(
        ConfKind::Kline,
        Some(user.to_string()),
        host.to_string(),
        reason.to_string(),
    );
    conf.created = now;
    conf.set_by = Some(set_by.to_string());
    if duration_secs > 0 {
        conf.hold = now + duration_secs;
        let conf = Arc::new(conf);
        conf.set_flag(flags::TEMPORARY);
        ctx.atable.add(conf.clone());
        ctx.temp_bans.add(conf, now);
    } else {
        ctx.atable.add(Arc::new(conf));
    }
    send::sendto_realops(
        ctx,
        snomask::BANNED,
        NoticeScope::Local,
        &format!("{set_by} added K-Line for [{user}@{host}] [{reason}]"),
    );
}

fn remove_remote_kline(ctx: &CoreContext, user: &str, host: &str) {
    let found = ctx
        .atable
        .all_of_kind(ConfKind::Kline)
        .into_iter()
        .find(|conf| {
            conf.user.as_deref() == Some(user)
                && solanum_proto::casemap::irccmp(&conf.host, host)
        });
    if let Some(conf) = found {
        conf.set_illegal();
        ctx.atable.remove(&conf);
        if conf.is_temporary() {
            ctx.temp_bans.remove(&conf);
        }
    }
}

pub struct EuidHandler;

#[async_trait]
impl Handler for EuidHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        link: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        // :<sid> EUID nick hops ts umodes user host ip uid realhost account :gecos
        let nick = &msg.params[0];
        let uid = &msg.params[7];
        if ctx.clients.by_uid(uid).is_some() {
            debug!(uid = %uid, "duplicate EUID dropped");
            return Ok(());
        }
        if ctx.clients.by_nick(nick).is_some() {
            // nick collision: the older client wins here; a full TS
            // resolution belongs to the burst logic
            warn!(nick = %nick, "EUID nick collision, introduction dropped");
            return Ok(());
        }

        let remote = Arc::new(Client::remote(
            uid.clone(),
            nick.clone(),
            msg.params[4].clone(),
            msg.params[5].clone(),
            msg.params[6].clone(),
            msg.params[10].clone(),
            msg.source.clone().unwrap_or_else(|| link.uid.clone()),
            msg.params[2].parse().unwrap_or_else(|_| ctx.now()),
        ));
        if msg.params[9] != "*" {
            *remote.suser.write() = msg.params[9].clone();
        }
        ctx.clients.insert(remote.clone());
        ctx.clients.claim_nick(&remote, nick);
        crate::metrics::CLIENTS.set(ctx.clients.len() as i64);

        ctx.hooks.introduce_client.call(
            ctx,
            &mut IntroduceClient {
                client: remote.clone(),
            },
        );

        // onward to every other peer
        ctx.servers
            .send_to_matching("*", ctx.server_caps.euid, Some(&link.uid), &msg.serialize(u64::MAX));
        Ok(())
    }
}

pub struct RemoteQuitHandler;

#[async_trait]
impl Handler for RemoteQuitHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        link: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        let Some(uid) = msg.source.as_deref() else {
            return Ok(());
        };
        if let Some(client) = ctx.clients.by_uid(uid) {
            if !client.is_local() {
                remove_remote_client(ctx, &client, msg.params.first().map(String::as_str));
            }
        }
        ctx.servers
            .send_to_matching("*", 0, Some(&link.uid), &msg.serialize(u64::MAX));
        Ok(())
    }
}

pub struct SquitHandler;

#[async_trait]
impl Handler for SquitHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        link: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        let target = &msg.params[0];
        let Some(server) = ctx.servers.by_sid(target).or_else(|| ctx.servers.by_name(target))
        else {
            return Ok(());
        };
        // drop every client the split server introduced
        for client in ctx.clients.all() {
            if client.from_server.as_deref() == Some(server.sid.as_str()) {
                remove_remote_client(ctx, &client, Some("*.net *.split"));
            }
        }
        ctx.servers.remove(&server.sid);
        ctx.servers
            .send_to_matching("*", 0, Some(&link.uid), &msg.serialize(u64::MAX));
        send::sendto_realops(
            ctx,
            snomask::GENERAL,
            NoticeScope::Local,
            &format!("Server {} split", server.name),
        );
        Ok(())
    }
}

fn remove_remote_client(ctx: &CoreContext, client: &Arc<Client>, reason: Option<&str>) {
    let quit = MsgBuf::new("QUIT")
        .with_source(client.mask())
        .with_param(reason.unwrap_or("Client Quit"));
    let names: Vec<String> = client.channels.read().clone();
    for name in names {
        if let Some(channel) = ctx.channels.get(&name) {
            channel.members.remove(&client.uid);
            send::sendto_channel(ctx, &channel, Some(client), quit.clone(), Some(&client.uid));
            ctx.channels.remove_if_empty(&name);
        }
    }
    ctx.clients.remove(client);
    crate::metrics::CLIENTS.set(ctx.clients.len() as i64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::test_context;
    use crate::state::cflags;

    fn server_link(ctx: &Arc<CoreContext>) -> Arc<Client> {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let (link, _) = crate::state::LocalLink::new(tx, 6666, false);
        let client = Arc::new(Client::local(
            "00A".to_string(),
            "10.0.0.2".parse().unwrap(),
            link,
            0,
        ));
        client.set_flag(cflags::REGISTERED | cflags::SERVER);
        client
    }

    #[tokio::test]
    async fn test_euid_introduces_remote_client() {
        let ctx = test_context();
        let link = server_link(&ctx);
        let msg = MsgBuf::parse(
            ":00A EUID visitor 2 1600000000 +i ~v their.host 10.9.8.7 00AAAAAAB their.host acct :A visitor",
        )
        .unwrap();
        EuidHandler.handle(&ctx, &link, &msg).await.unwrap();

        let remote = ctx.clients.by_uid("00AAAAAAB").unwrap();
        assert!(!remote.is_local());
        assert!(remote.is_person());
        assert_eq!(*remote.suser.read(), "acct");
        assert!(ctx.clients.by_nick("visitor").is_some());
    }

    #[tokio::test]
    async fn test_euid_nick_collision_dropped() {
        let ctx = test_context();
        let link = server_link(&ctx);
        let msg = MsgBuf::parse(
            ":00A EUID clash 2 1600000000 + ~a h 1.1.1.1 00AAAAAAC h * :x",
        )
        .unwrap();
        EuidHandler.handle(&ctx, &link, &msg).await.unwrap();
        let msg2 = MsgBuf::parse(
            ":00A EUID clash 2 1600000001 + ~b h2 2.2.2.2 00AAAAAAD h2 * :y",
        )
        .unwrap();
        EuidHandler.handle(&ctx, &link, &msg2).await.unwrap();
        assert!(ctx.clients.by_uid("00AAAAAAD").is_none());
    }

    #[tokio::test]
    async fn test_ban_message_applied_through_link() {
        let ctx = test_context();
        let link = server_link(&ctx);
        let now = ctx.now();
        let msg = MsgBuf::parse(&format!(
            ":00A BAN K * banned.example.net {now} 3600 3600 oper :bad"
        ))
        .unwrap();
        BanHandler.handle(&ctx, &link, &msg).await.unwrap();
        assert_eq!(ctx.prop_bans.len(), 1);
    }

    #[tokio::test]
    async fn test_squit_reaps_introduced_clients() {
        let ctx = test_context();
        let link = server_link(&ctx);
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        ctx.servers.add(Arc::new(crate::s2s::Server::new(
            "b.net".into(),
            "00B".into(),
            0,
            tx,
        )));
        let msg = MsgBuf::parse(
            ":00B EUID lost 2 1600000000 + ~l h 3.3.3.3 00BAAAAAA h * :l",
        )
        .unwrap();
        EuidHandler.handle(&ctx, &link, &msg).await.unwrap();
        assert!(ctx.clients.by_uid("00BAAAAAA").is_some());

        SquitHandler
            .handle(&ctx, &link, &MsgBuf::parse("SQUIT 00B :gone").unwrap())
            .await
            .unwrap();
        assert!(ctx.clients.by_uid("00BAAAAAA").is_none());
        assert!(ctx.servers.by_sid("00B").is_none());
    }
}
