//! QUARANTINE and UNQUARANTINE.

use std::sync::Arc;

use async_trait::async_trait;
use solanum_proto::{MsgBuf, Numeric};

use super::Handler;
use crate::context::CoreContext;
use crate::error::{HandlerError, HandlerResult};
use crate::policy::quarantine;
use crate::send::{self, NoticeScope};
use crate::state::{snomask, Client};

pub struct QuarantineHandler;

#[async_trait]
impl Handler for QuarantineHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        if !client.has_priv("oper:quarantine") {
            return Err(HandlerError::NoPrivs("oper:quarantine".to_string()));
        }
        let Some(target) = ctx.clients.by_nick(&msg.params[0]) else {
            send::send_numeric(
                ctx,
                client,
                Numeric::ERR_NOSUCHNICK,
                &[&msg.params[0], "No such nick/channel"],
            );
            return Ok(());
        };
        if target.is_oper() || target.is_service() {
            send::send_server_notice(ctx, client, "Cannot quarantine opers or services");
            return Ok(());
        }
        if !target.is_local() {
            // route to the server that owns the target
            if let Some(sid) = target.uid.get(0..3) {
                if let Some(server) = ctx.servers.by_sid(sid) {
                    server.send(format!(
                        ":{} ENCAP {} QUARANTINE {} :{}",
                        client.uid,
                        server.name,
                        target.uid,
                        msg.params.get(1).map(String::as_str).unwrap_or("")
                    ));
                }
            }
            return Ok(());
        }

        quarantine::apply(ctx, &target);

        // part from channels off the allowlist, when configured
        if ctx.config().quarantine.part_on_quarantine {
            let allowed = ctx.config().quarantine.allow_channels.clone();
            let names: Vec<String> = target.channels.read().clone();
            for name in names {
                if allowed
                    .iter()
                    .any(|a| solanum_proto::casemap::irccmp(a, &name))
                {
                    continue;
                }
                if let Some(channel) = ctx.channels.get(&name) {
                    channel.members.remove(&target.uid);
                    let part = MsgBuf::new("PART")
                        .with_source(target.mask())
                        .with_param(&channel.name)
                        .with_param("Quarantined");
                    send::deliver(&target, &part);
                    send::sendto_channel(ctx, &channel, Some(&target), part, Some(&target.uid));
                    ctx.channels.remove_if_empty(&name);
                }
            }
            target.channels.write().retain(|name| {
                ctx.config()
                    .quarantine
                    .allow_channels
                    .iter()
                    .any(|a| solanum_proto::casemap::irccmp(a, name))
            });
        }

        send::sendto_realops(
            ctx,
            snomask::GENERAL,
            NoticeScope::Netwide,
            &format!(
                "{} quarantined {} [{}]",
                client.nick.read(),
                target.nick.read(),
                msg.params.get(1).map(String::as_str).unwrap_or("no reason")
            ),
        );
        Ok(())
    }
}

pub struct UnquarantineHandler;

#[async_trait]
impl Handler for UnquarantineHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        if !client.has_priv("oper:quarantine") {
            return Err(HandlerError::NoPrivs("oper:quarantine".to_string()));
        }
        let Some(target) = ctx.clients.by_nick(&msg.params[0]) else {
            send::send_numeric(
                ctx,
                client,
                Numeric::ERR_NOSUCHNICK,
                &[&msg.params[0], "No such nick/channel"],
            );
            return Ok(());
        };
        if target.is_local() {
            quarantine::remove(ctx, &target);
            send::sendto_realops(
                ctx,
                snomask::GENERAL,
                NoticeScope::Netwide,
                &format!("{} unquarantined {}", client.nick.read(), target.nick.read()),
            );
        }
        Ok(())
    }
}
