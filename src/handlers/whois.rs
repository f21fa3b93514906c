//! WHOIS, rate-limited as an expensive command.

use std::sync::Arc;

use async_trait::async_trait;
use solanum_proto::{MsgBuf, Numeric};

use super::Handler;
use crate::context::CoreContext;
use crate::error::{HandlerError, HandlerResult};
use crate::send;
use crate::state::Client;

pub struct WhoisHandler;

#[async_trait]
impl Handler for WhoisHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        if !ctx
            .ratelimit
            .ratelimit_client(&client.uid, 2, ctx.mono_secs())
        {
            return Err(HandlerError::Limited);
        }

        let nick = msg.params.last().unwrap();
        let Some(target) = ctx.clients.by_nick(nick) else {
            send::send_numeric(ctx, client, Numeric::ERR_NOSUCHNICK, &[nick, "No such nick/channel"]);
            send::send_numeric(ctx, client, Numeric::RPL_ENDOFWHOIS, &[nick, "End of /WHOIS list"]);
            return Ok(());
        };

        let target_nick = target.nick.read().clone();
        send::send_numeric(
            ctx,
            client,
            Numeric::RPL_WHOISUSER,
            &[
                &target_nick,
                &target.username.read().clone(),
                &target.host.read().clone(),
                "*",
                &target.gecos.read().clone(),
            ],
        );

        let mut channels = Vec::new();
        for name in target.channels.read().iter() {
            if let Some(channel) = ctx.channels.get(name) {
                if channel.has_mode(crate::state::cmode::SECRET) && !client.is_oper() {
                    continue;
                }
                let mut entry = String::new();
                if let Some(status) = channel.status_of(&target.uid) {
                    if status.op {
                        entry.push('@');
                    } else if status.voice {
                        entry.push('+');
                    }
                }
                entry.push_str(&channel.name);
                channels.push(entry);
            }
        }
        if !channels.is_empty() {
            send::send_numeric(
                ctx,
                client,
                Numeric::RPL_WHOISCHANNELS,
                &[&target_nick, &channels.join(" ")],
            );
        }

        send::send_numeric(
            ctx,
            client,
            Numeric::RPL_WHOISSERVER,
            &[&target_nick, &ctx.me.name, &ctx.me.description],
        );

        // oper status respects hiding
        if target.is_oper()
            && (!ctx.config().general.hide_opers || client.is_oper())
            && !target.has_priv("oper:hidden")
        {
            send::send_numeric(
                ctx,
                client,
                Numeric::RPL_WHOISOPERATOR,
                &[&target_nick, "is an IRC Operator"],
            );
        }

        if target.has_account() {
            send::send_numeric(
                ctx,
                client,
                Numeric::RPL_WHOISACCOUNT,
                &[&target_nick, &target.suser.read().clone(), "is logged in as"],
            );
        }

        if target.is_secure() {
            send::send_numeric(
                ctx,
                client,
                Numeric::RPL_WHOISSECURE,
                &[&target_nick, "is using a secure connection"],
            );
        }

        if let Some(away) = target.away.read().as_deref() {
            send::send_numeric(ctx, client, Numeric::RPL_AWAY, &[&target_nick, away]);
        }

        send::send_numeric(
            ctx,
            client,
            Numeric::RPL_ENDOFWHOIS,
            &[&target_nick, "End of /WHOIS list"],
        );
        Ok(())
    }
}
