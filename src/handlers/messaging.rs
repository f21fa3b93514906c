//! PRIVMSG and NOTICE delivery through the hook pipeline.
//!
//! Every message consults the hook chain before any byte leaves: can_send
//! (the +z-aware gate), then privmsg_channel or privmsg_user where policy
//! modules cast their vote and tag decorators attach msgid. A veto on a +z
//! channel diverts the message to ops instead of erroring.

use std::sync::Arc;

use async_trait::async_trait;
use solanum_proto::tags::is_client_tag;
use solanum_proto::{MsgBuf, Numeric};

use super::Handler;
use crate::context::CoreContext;
use crate::error::HandlerResult;
use crate::hooks::{CanSend, MessageType, PrivmsgChannel, PrivmsgUser, SendVerdict};
use crate::send;
use crate::state::{cmode, Client};

/// Most targets one PRIVMSG may name.
const MAX_TARGETS: usize = 4;

pub struct PrivmsgHandler;

#[async_trait]
impl Handler for PrivmsgHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        handle_message(ctx, client, msg, MessageType::Privmsg).await
    }
}

pub struct NoticeHandler;

#[async_trait]
impl Handler for NoticeHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        handle_message(ctx, client, msg, MessageType::Notice).await
    }
}

async fn handle_message(
    ctx: &Arc<CoreContext>,
    client: &Arc<Client>,
    msg: &MsgBuf,
    msgtype: MessageType,
) -> HandlerResult {
    let text = msg.params[1].clone();
    if text.is_empty() {
        if msgtype == MessageType::Privmsg {
            send::send_numeric(ctx, client, Numeric::ERR_NOTEXTTOSEND, &["No text to send"]);
        }
        return Ok(());
    }

    for target in msg.params[0].split(',').take(MAX_TARGETS) {
        if solanum_proto::casemap::is_channel_name(target) {
            message_channel(ctx, client, msg, target, &text, msgtype);
        } else {
            message_user(ctx, client, msg, target, &text, msgtype);
        }
    }
    Ok(())
}

/// Forward the sender's approved client-only tags onto the outbound copy.
fn copy_client_tags(ctx: &CoreContext, inbound: &MsgBuf, outbound: &mut MsgBuf) {
    let config = ctx.config();
    for tag in &inbound.tags {
        if !is_client_tag(&tag.key) {
            continue;
        }
        let bare = tag.key.trim_start_matches('+');
        if config
            .general
            .supported_client_tags
            .iter()
            .any(|allowed| allowed == bare)
        {
            outbound.append_tag(
                tag.key.clone(),
                tag.value.clone(),
                ctx.client_caps.message_tags,
            );
        }
    }
}

fn command_name(msgtype: MessageType) -> &'static str {
    match msgtype {
        MessageType::Notice => "NOTICE",
        _ => "PRIVMSG",
    }
}

fn message_channel(
    ctx: &Arc<CoreContext>,
    client: &Arc<Client>,
    inbound: &MsgBuf,
    target: &str,
    text: &str,
    msgtype: MessageType,
) {
    let Some(channel) = ctx.channels.get(target) else {
        send::send_numeric(ctx, client, Numeric::ERR_NOSUCHCHANNEL, &[target, "No such channel"]);
        return;
    };

    let status = channel.status_of(&client.uid);
    let is_member = status.is_some();

    // baseline channel modes before any hook runs
    let baseline_denied = (!is_member && channel.has_mode(cmode::NOEXTERNAL))
        || (channel.has_mode(cmode::MODERATED)
            && !status.is_some_and(|s| s.is_privileged()));
    let opmoderated = channel.has_mode(cmode::OPMODERATE);
    if baseline_denied && !opmoderated {
        policy_numeric(ctx, client, Numeric::ERR_CANNOTSENDTOCHAN.code(), &channel.name, msgtype);
        return;
    }

    // the +z-aware gate
    let mut gate = CanSend {
        client: client.clone(),
        channel: channel.clone(),
        silent: false,
        verdict: if baseline_denied {
            SendVerdict::Deny
        } else {
            SendVerdict::Allow
        },
    };
    ctx.hooks.can_send.call(ctx, &mut gate);

    let mut outbound = MsgBuf::new(command_name(msgtype))
        .with_source(client.mask())
        .with_param(&channel.name)
        .with_param(text);
    copy_client_tags(ctx, inbound, &mut outbound);

    let mut payload = PrivmsgChannel {
        source: client.clone(),
        channel: channel.clone(),
        msgtype,
        text: text.to_string(),
        msgbuf: outbound,
        approved: 0,
    };
    ctx.hooks.privmsg_channel.call(ctx, &mut payload);

    if payload.approved != 0 {
        policy_numeric(ctx, client, payload.approved, &channel.name, msgtype);
        return;
    }

    if gate.verdict == SendVerdict::Deny {
        // op-moderation: the channel saw nothing, ops see it marked
        let mut diverted = payload.msgbuf.clone();
        diverted.params[0] = format!("@{}", channel.name);
        send::sendto_channel_ops(ctx, &channel, Some(client), diverted);
        return;
    }

    let echo = client.caps() & ctx.client_caps.echo_message != 0;
    let except = if echo { None } else { Some(client.uid.as_str()) };
    send::sendto_channel(ctx, &channel, Some(client), payload.msgbuf, except);

    ctx.servers.send_to_matching(
        "*",
        0,
        None,
        &format!(":{} {} {} :{}", client.uid, command_name(msgtype), channel.name, text),
    );
}

fn message_user(
    ctx: &Arc<CoreContext>,
    client: &Arc<Client>,
    inbound: &MsgBuf,
    target: &str,
    text: &str,
    msgtype: MessageType,
) {
    let Some(target_client) = ctx.clients.by_nick(target) else {
        send::send_numeric(ctx, client, Numeric::ERR_NOSUCHNICK, &[target, "No such nick/channel"]);
        return;
    };

    let mut outbound = MsgBuf::new(command_name(msgtype))
        .with_source(client.mask())
        .with_param(target_client.nick.read().clone())
        .with_param(text);
    copy_client_tags(ctx, inbound, &mut outbound);

    let mut payload = PrivmsgUser {
        source: client.clone(),
        target: target_client.clone(),
        msgtype,
        text: text.to_string(),
        msgbuf: outbound,
        approved: 0,
    };
    ctx.hooks.privmsg_user.call(ctx, &mut payload);

    if payload.approved != 0 {
        policy_numeric(
            ctx,
            client,
            payload.approved,
            &target_client.nick.read().clone(),
            msgtype,
        );
        return;
    }

    if msgtype == MessageType::Privmsg {
        if let Some(away) = target_client.away.read().as_deref() {
            send::send_numeric(
                ctx,
                client,
                Numeric::RPL_AWAY,
                &[&target_client.nick.read().clone(), away],
            );
        }
    }

    if target_client.is_local() {
        let decorated = send::decorate(ctx, Some(client), payload.msgbuf);
        send::deliver(&target_client, &decorated);
        if client.caps() & ctx.client_caps.echo_message != 0 {
            send::deliver(client, &decorated);
        }
    } else if let Some(sid) = target_client.uid.get(0..3) {
        if let Some(server) = ctx.servers.by_sid(sid) {
            server.send(format!(
                ":{} {} {} :{}",
                client.uid,
                command_name(msgtype),
                target_client.uid,
                text
            ));
        }
    }
}

/// Translate a hook's rejecting numeric into the reply the old tree sent.
/// Notices never generate error replies.
fn policy_numeric(
    ctx: &CoreContext,
    client: &Client,
    code: u16,
    target: &str,
    msgtype: MessageType,
) {
    if msgtype == MessageType::Notice {
        return;
    }
    let (num, text) = match code {
        404 => (Numeric::ERR_CANNOTSENDTOCHAN, "Cannot send to channel"),
        477 => (
            Numeric::ERR_NEEDREGGEDNICK,
            "You need to identify to a registered nick to message this target",
        ),
        480 => (Numeric::ERR_THROTTLE, "Cannot join channel"),
        520 => (Numeric::ERR_OPERONLY, "Cannot join channel (+O)"),
        _ => (Numeric::ERR_CANNOTSENDTOCHAN, "Cannot send to channel"),
    };
    send::send_numeric(ctx, client, num, &[target, text]);
}
