//! Channel membership commands: JOIN, PART, NAMES, MODE.
//!
//! Join permission layers the builtin channel modes (+i, +k, +l, bans)
//! under the can_join hook, where quarantine and the policy channel modes
//! cast their votes.

use std::sync::Arc;

use async_trait::async_trait;
use solanum_proto::casemap::{is_channel_name, to_irc_lower};
use solanum_proto::{MsgBuf, Numeric};

use super::Handler;
use crate::context::CoreContext;
use crate::error::{HandlerError, HandlerResult};
use crate::hooks::{CanJoin, UmodeChanged};
use crate::send;
use crate::state::{cmode, umode, Channel, Client, MemberStatus};

pub struct JoinHandler;

#[async_trait]
impl Handler for JoinHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        let keys: Vec<&str> = msg
            .params
            .get(1)
            .map(|k| k.split(',').collect())
            .unwrap_or_default();
        for (i, name) in msg.params[0].split(',').enumerate() {
            join_one(ctx, client, name, keys.get(i).copied())?;
        }
        Ok(())
    }
}

fn join_one(
    ctx: &Arc<CoreContext>,
    client: &Arc<Client>,
    name: &str,
    key: Option<&str>,
) -> HandlerResult {
    if !is_channel_name(name) {
        send::send_numeric(ctx, client, Numeric::ERR_NOSUCHCHANNEL, &[name, "No such channel"]);
        return Ok(());
    }
    if client.channels.read().len() >= ctx.config().channel.max_channels_per_user {
        send::send_numeric(
            ctx,
            client,
            Numeric::ERR_TOOMANYCHANNELS,
            &[name, "You have joined too many channels"],
        );
        return Ok(());
    }
    if let Some(resv) = crate::access::find_resv(&ctx.atable, name) {
        if !client.is_oper() {
            send::send_numeric(
                ctx,
                client,
                Numeric::ERR_BADCHANNELKEY,
                &[name, &format!("Channel is reserved: {}", resv.reason)],
            );
            return Ok(());
        }
    }

    let channel = ctx.channels.get_or_create(name);
    if channel.is_member(&client.uid) {
        return Ok(());
    }

    // builtin modes first
    if let Some(denied) = builtin_join_check(&channel, client, key) {
        let (num, text) = denied;
        send::send_numeric(ctx, client, num, &[&channel.name, text]);
        ctx.channels.remove_if_empty(name);
        return Ok(());
    }

    // then the hook pipeline (quarantine, +S, +O, modules)
    let mut gate = CanJoin {
        client: client.clone(),
        channel: channel.clone(),
        approved: 0,
    };
    ctx.hooks.can_join.call(ctx, &mut gate);
    if gate.approved != 0 {
        join_deny_numeric(ctx, client, gate.approved, &channel.name);
        ctx.channels.remove_if_empty(name);
        return Ok(());
    }

    // first member founds the channel as op
    let status = MemberStatus {
        op: channel.members.is_empty(),
        voice: false,
    };
    channel.members.insert(client.uid.clone(), status);
    client.channels.write().push(to_irc_lower(name));

    let extended = client.caps() & ctx.client_caps.extended_join != 0;
    let mut join = MsgBuf::new("JOIN").with_source(client.mask()).with_param(&channel.name);
    if extended {
        let account = client.suser.read().clone();
        join.params.push(if account.is_empty() { "*".into() } else { account });
        join.params.push(client.gecos.read().clone());
    }
    send::sendto_channel(ctx, &channel, Some(client), join, None);

    send_names(ctx, client, &channel);

    ctx.servers.send_to_matching(
        "*",
        0,
        None,
        &format!(":{} JOIN {} {} +", client.uid, ctx.now(), channel.name),
    );
    Ok(())
}

fn builtin_join_check(
    channel: &Channel,
    client: &Client,
    key: Option<&str>,
) -> Option<(Numeric, &'static str)> {
    if Channel::mask_on_list(&channel.lists.ban, &client.mask())
        && !Channel::mask_on_list(&channel.lists.except, &client.mask())
    {
        return Some((Numeric::ERR_BANNEDFROMCHAN, "Cannot join channel (+b)"));
    }
    if channel.has_mode(cmode::INVITEONLY)
        && !Channel::mask_on_list(&channel.lists.invex, &client.mask())
    {
        return Some((Numeric::ERR_INVITEONLYCHAN, "Cannot join channel (+i)"));
    }
    if channel.has_mode(cmode::KEY) {
        let required = channel.key.read().clone();
        if required.as_deref() != key {
            return Some((Numeric::ERR_BADCHANNELKEY, "Cannot join channel (+k)"));
        }
    }
    if channel.has_mode(cmode::LIMIT) {
        let limit = channel.limit.load(std::sync::atomic::Ordering::Acquire);
        if limit > 0 && channel.member_count() >= limit {
            return Some((Numeric::ERR_CHANNELISFULL, "Cannot join channel (+l)"));
        }
    }
    None
}

fn join_deny_numeric(ctx: &CoreContext, client: &Client, code: u16, channel: &str) {
    let (num, text) = match code {
        477 => (
            Numeric::ERR_NEEDREGGEDNICK,
            "You need to be identified to a registered account to join this channel",
        ),
        480 => (Numeric::ERR_THROTTLE, "Cannot join channel (+S) - TLS required"),
        520 => (Numeric::ERR_OPERONLY, "Cannot join channel (+O)"),
        _ => (Numeric::ERR_BADCHANNELKEY, "Cannot join channel"),
    };
    send::send_numeric(ctx, client, num, &[channel, text]);
}

fn send_names(ctx: &CoreContext, client: &Arc<Client>, channel: &Channel) {
    let mut names = Vec::new();
    for member in channel.members.iter() {
        if let Some(other) = ctx.clients.by_uid(member.key()) {
            let mut name = String::new();
            if member.value().op {
                name.push('@');
            } else if member.value().voice {
                name.push('+');
            }
            name.push_str(&other.nick.read());
            names.push(name);
        }
    }
    let nick = client.nick.read().clone();
    let reply = MsgBuf::new(Numeric::RPL_NAMREPLY.token())
        .with_source(&ctx.me.name)
        .with_param(nick.clone())
        .with_param("=")
        .with_param(&channel.name)
        .with_param(names.join(" "));
    send::deliver(client, &reply);
    send::send_numeric(
        ctx,
        client,
        Numeric::RPL_ENDOFNAMES,
        &[&channel.name, "End of /NAMES list"],
    );
}

pub struct PartHandler;

#[async_trait]
impl Handler for PartHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        let reason = msg.params.get(1).cloned().unwrap_or_default();
        for name in msg.params[0].split(',') {
            let Some(channel) = ctx.channels.get(name) else {
                send::send_numeric(ctx, client, Numeric::ERR_NOSUCHCHANNEL, &[name, "No such channel"]);
                continue;
            };
            if channel.members.remove(&client.uid).is_none() {
                send::send_numeric(
                    ctx,
                    client,
                    Numeric::ERR_NOTONCHANNEL,
                    &[name, "You're not on that channel"],
                );
                continue;
            }
            let mut part = MsgBuf::new("PART").with_source(client.mask()).with_param(&channel.name);
            if !reason.is_empty() {
                part.params.push(reason.clone());
            }
            send::deliver(client, &part);
            send::sendto_channel(ctx, &channel, Some(client), part, Some(&client.uid));
            client.channels.write().retain(|c| c != &to_irc_lower(name));
            ctx.channels.remove_if_empty(name);
            ctx.servers.send_to_matching(
                "*",
                0,
                None,
                &format!(":{} PART {}", client.uid, channel.name),
            );
        }
        Ok(())
    }
}

pub struct NamesHandler;

#[async_trait]
impl Handler for NamesHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        match ctx.channels.get(&msg.params[0]) {
            Some(channel) => send_names(ctx, client, &channel),
            None => send::send_numeric(
                ctx,
                client,
                Numeric::RPL_ENDOFNAMES,
                &[&msg.params[0], "End of /NAMES list"],
            ),
        }
        Ok(())
    }
}

pub struct ModeHandler;

#[async_trait]
impl Handler for ModeHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        let target = &msg.params[0];
        if is_channel_name(target) {
            channel_mode(ctx, client, target, &msg.params[1..])
        } else {
            user_mode(ctx, client, target, &msg.params[1..])
        }
    }
}

fn channel_mode(
    ctx: &Arc<CoreContext>,
    client: &Arc<Client>,
    target: &str,
    args: &[String],
) -> HandlerResult {
    let Some(channel) = ctx.channels.get(target) else {
        send::send_numeric(ctx, client, Numeric::ERR_NOSUCHCHANNEL, &[target, "No such channel"]);
        return Ok(());
    };

    if args.is_empty() {
        let modes = cmode::to_string(channel.modes());
        let reply = MsgBuf::new("324")
            .with_source(&ctx.me.name)
            .with_param(client.nick.read().clone())
            .with_param(&channel.name)
            .with_param(modes);
        send::deliver(client, &reply);
        return Ok(());
    }

    let is_op = channel.status_of(&client.uid).is_some_and(|s| s.op);
    if !is_op && !client.is_oper() {
        send::send_numeric(
            ctx,
            client,
            Numeric::ERR_CHANOPRIVSNEEDED,
            &[&channel.name, "You're not channel operator"],
        );
        return Ok(());
    }

    let mut adding = true;
    let mut applied = String::new();
    let mut applied_args: Vec<String> = Vec::new();
    let mut arg_iter = args.iter().skip(1);
    for c in args[0].chars() {
        match c {
            '+' => adding = true,
            '-' => adding = false,
            'k' => {
                if adding {
                    if let Some(key) = arg_iter.next() {
                        *channel.key.write() = Some(key.clone());
                        channel.set_mode(cmode::KEY);
                        applied.push_str("+k");
                        applied_args.push(key.clone());
                    }
                } else {
                    *channel.key.write() = None;
                    channel.clear_mode(cmode::KEY);
                    applied.push_str("-k");
                    applied_args.push("*".to_string());
                }
            }
            'l' => {
                if adding {
                    if let Some(limit) = arg_iter.next().and_then(|l| l.parse::<usize>().ok()) {
                        channel.limit.store(limit, std::sync::atomic::Ordering::Release);
                        channel.set_mode(cmode::LIMIT);
                        applied.push_str("+l");
                        applied_args.push(limit.to_string());
                    }
                } else {
                    channel.clear_mode(cmode::LIMIT);
                    applied.push_str("-l");
                }
            }
            'b' | 'q' | 'e' | 'I' => {
                let list = match c {
                    'b' => &channel.lists.ban,
                    'q' => &channel.lists.quiet,
                    'e' => &channel.lists.except,
                    _ => &channel.lists.invex,
                };
                if let Some(mask) = arg_iter.next() {
                    if adding {
                        list.write().push(mask.clone());
                    } else {
                        list.write().retain(|m| m != mask);
                    }
                    applied.push(if adding { '+' } else { '-' });
                    applied.push(c);
                    applied_args.push(mask.clone());
                }
            }
            other => {
                if let Some(bit) = cmode::from_char(other) {
                    if adding {
                        channel.set_mode(bit);
                    } else {
                        channel.clear_mode(bit);
                    }
                    applied.push(if adding { '+' } else { '-' });
                    applied.push(other);
                }
            }
        }
    }

    if !applied.is_empty() {
        let mut change = MsgBuf::new("MODE")
            .with_source(client.mask())
            .with_param(&channel.name)
            .with_param(&applied);
        change.params.extend(applied_args);
        send::sendto_channel(ctx, &channel, Some(client), change, None);
    }
    Ok(())
}

fn user_mode(
    ctx: &Arc<CoreContext>,
    client: &Arc<Client>,
    target: &str,
    args: &[String],
) -> HandlerResult {
    if !solanum_proto::casemap::irccmp(target, &client.nick.read()) {
        return Err(HandlerError::NoPrivileges);
    }
    if args.is_empty() {
        send::send_numeric(
            ctx,
            client,
            Numeric::RPL_UMODEIS,
            &[&umode::to_string(client.umodes())],
        );
        return Ok(());
    }

    let old = client.umodes();
    let mut adding = true;
    for c in args[0].chars() {
        match c {
            '+' => adding = true,
            '-' => adding = false,
            // +o only ever comes from OPER; +q only from opers/servers;
            // +Z reflects the transport and never changes by request
            'o' | 'q' | 'Z' if adding => {}
            other => {
                if let Some(bit) = umode::from_char(other) {
                    if adding {
                        client.set_umode(bit);
                    } else {
                        client.clear_umode(bit);
                    }
                }
            }
        }
    }

    if client.umodes() != old {
        ctx.hooks.umode_changed.call(
            ctx,
            &mut UmodeChanged {
                client: client.clone(),
                old_umodes: old,
            },
        );
        let reply = MsgBuf::new("MODE")
            .with_source(client.mask())
            .with_param(client.nick.read().clone())
            .with_param(umode::to_string(client.umodes()));
        send::deliver(client, &reply);
    }
    Ok(())
}
