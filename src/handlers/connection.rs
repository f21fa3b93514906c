//! Connection-lifecycle commands: NICK, USER, PASS, WEBIRC, PING, PONG,
//! QUIT, AWAY, MOTD.

use std::sync::Arc;

use async_trait::async_trait;
use solanum_proto::casemap::valid_nick;
use solanum_proto::{MsgBuf, Numeric};

use super::{register, Handler};
use crate::access::find_resv;
use crate::context::CoreContext;
use crate::error::{HandlerError, HandlerResult};
use crate::send;
use crate::state::{cflags, Client};

pub struct NickHandler;

#[async_trait]
impl Handler for NickHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        let nick = msg.params[0].as_str();
        if nick.is_empty() {
            send::send_numeric(ctx, client, Numeric::ERR_NONICKNAMEGIVEN, &["No nickname given"]);
            return Ok(());
        }
        if !valid_nick(nick) {
            send::send_numeric(
                ctx,
                client,
                Numeric::ERR_ERRONEUSNICKNAME,
                &[nick, "Erroneous nickname"],
            );
            return Ok(());
        }
        if let Some(resv) = find_resv(&ctx.atable, nick) {
            if !client.is_oper() {
                send::send_numeric(
                    ctx,
                    client,
                    Numeric::ERR_UNAVAILRESOURCE,
                    &[nick, &format!("Nickname is reserved: {}", resv.reason)],
                );
                return Ok(());
            }
        }
        let old_mask = client.mask();
        if !ctx.clients.claim_nick(client, nick) {
            send::send_numeric(
                ctx,
                client,
                Numeric::ERR_NICKNAMEINUSE,
                &[nick, "Nickname is already in use"],
            );
            return Ok(());
        }

        if client.is_registered() {
            let change = MsgBuf::new("NICK").with_source(old_mask.clone()).with_param(nick);
            send::deliver(client, &change);
            for channel_name in client.channels.read().iter() {
                if let Some(channel) = ctx.channels.get(channel_name) {
                    send::sendto_channel(
                        ctx,
                        &channel,
                        Some(client),
                        MsgBuf::new("NICK").with_source(old_mask.clone()).with_param(nick),
                        Some(&client.uid),
                    );
                }
            }
            ctx.servers.send_to_matching(
                "*",
                0,
                None,
                &format!(":{} NICK {} :{}", client.uid, nick, ctx.now()),
            );
        } else {
            register::try_register(ctx, client).await?;
        }
        Ok(())
    }
}

pub struct UserHandler;

#[async_trait]
impl Handler for UserHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        if client.is_registered() {
            return Err(HandlerError::AlreadyRegistered);
        }
        // identd is an external collaborator; without an answer the
        // username keeps the unverified tilde
        *client.username.write() = format!("~{}", truncate(&msg.params[0], 10));
        *client.gecos.write() = msg.params[3].clone();
        client.set_flag(cflags::SENTUSER);
        register::try_register(ctx, client).await
    }
}

pub struct PassHandler;

#[async_trait]
impl Handler for PassHandler {
    async fn handle(
        &self,
        _ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        if client.is_registered() {
            return Err(HandlerError::AlreadyRegistered);
        }
        if let Some(prereg) = client.prereg.write().as_mut() {
            prereg.password = Some(msg.params[0].clone());
        }
        Ok(())
    }
}

pub struct WebircHandler;

#[async_trait]
impl Handler for WebircHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        // WEBIRC password gateway-host hostname ip
        let password = &msg.params[0];
        let hostname = &msg.params[2];
        let ip = &msg.params[3];

        let conf = client.ip.and_then(|addr| {
            ctx.atable
                .find_client_conf(None, &client.sockhost, "webirc", addr, None)
        });
        let authorized = conf.is_some_and(|conf| {
            conf.password.as_deref() == Some(password.as_str())
        });
        if !authorized {
            send::send_server_notice(ctx, client, "Not authorized to use WEBIRC");
            return Err(HandlerError::Exit("WEBIRC not authorized".to_string()));
        }

        let Ok(parsed_ip) = ip.parse() else {
            return Err(HandlerError::Exit("Invalid WEBIRC IP".to_string()));
        };
        if let Some(prereg) = client.prereg.write().as_mut() {
            prereg.webirc_host = Some(hostname.clone());
            prereg.webirc_ip = Some(parsed_ip);
        }
        client.set_flag(cflags::IPSPOOF);
        Ok(())
    }
}

pub struct PingHandler;

#[async_trait]
impl Handler for PingHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        let pong = MsgBuf::new("PONG")
            .with_source(&ctx.me.name)
            .with_param(&ctx.me.name)
            .with_param(&msg.params[0]);
        send::deliver(client, &pong);
        Ok(())
    }
}

pub struct PongHandler;

#[async_trait]
impl Handler for PongHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        _msg: &MsgBuf,
    ) -> HandlerResult {
        client
            .last_ping
            .store(ctx.now(), std::sync::atomic::Ordering::Release);
        Ok(())
    }
}

pub struct QuitHandler;

#[async_trait]
impl Handler for QuitHandler {
    async fn handle(
        &self,
        _ctx: &Arc<CoreContext>,
        _client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        let reason = msg
            .params
            .first()
            .map(|r| format!("Quit: {r}"))
            .unwrap_or_else(|| "Client Quit".to_string());
        Err(HandlerError::Exit(reason))
    }
}

pub struct AwayHandler;

#[async_trait]
impl Handler for AwayHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        match msg.params.first().filter(|text| !text.is_empty()) {
            Some(text) => {
                *client.away.write() = Some(text.clone());
                send::send_numeric(
                    ctx,
                    client,
                    Numeric::RPL_NOWAWAY,
                    &["You have been marked as being away"],
                );
            }
            None => {
                *client.away.write() = None;
                send::send_numeric(
                    ctx,
                    client,
                    Numeric::RPL_UNAWAY,
                    &["You are no longer marked as being away"],
                );
            }
        }
        Ok(())
    }
}

pub struct MotdHandler;

#[async_trait]
impl Handler for MotdHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        _msg: &MsgBuf,
    ) -> HandlerResult {
        send::send_numeric(
            ctx,
            client,
            Numeric::ERR_NOMOTD,
            &["MOTD File is missing"],
        );
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
