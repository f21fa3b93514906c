//! Channel-mode send and join policies: +S, +O, +R, +C.
//!
//! Each mode is a hook callback over the shared bus rather than a branch
//! in the messaging path. +R picks its hook by whether the channel is +z:
//! on a plain channel the privmsg hook rejects with a numeric; on an
//! op-moderated channel the can_send hook votes Deny so the message is
//! diverted to ops without an error.

use crate::context::CoreContext;
use crate::hooks::{MessageType, Priority, SendVerdict};
use crate::state::cmode;
use crate::state::{Channel, Client};
use solanum_proto::Numeric;

fn regmsg_test(client: &Client, channel: &Channel) -> bool {
    if !channel.has_mode(cmode::REGMSG) {
        return true;
    }
    if client.has_account() {
        return true;
    }
    // voice and op override the identification requirement
    channel
        .status_of(&client.uid)
        .is_some_and(|status| status.is_privileged())
}

pub fn register(ctx: &CoreContext) {
    // +S: TLS connections only
    ctx.hooks.can_join.add(Priority::Normal, |_ctx, data| {
        if data.approved != 0 {
            return;
        }
        if data.channel.has_mode(cmode::SSLONLY) && !data.client.is_secure() {
            data.approved = Numeric::ERR_THROTTLE.code();
        }
    });

    // +O: opers only
    ctx.hooks.can_join.add(Priority::Normal, |_ctx, data| {
        if data.approved != 0 {
            return;
        }
        if data.channel.has_mode(cmode::OPERONLY) && !data.client.is_oper() {
            data.approved = Numeric::ERR_OPERONLY.code();
        }
    });

    // +R on ordinary channels
    ctx.hooks.privmsg_channel.add(Priority::Normal, |_ctx, data| {
        if data.channel.has_mode(cmode::OPMODERATE) {
            return;
        }
        if data.approved != 0 {
            return;
        }
        if !regmsg_test(&data.source, &data.channel) {
            data.approved = Numeric::ERR_NEEDREGGEDNICK.code();
        }
    });

    // +R on +z channels
    ctx.hooks.can_send.add(Priority::Normal, |_ctx, data| {
        if !data.channel.has_mode(cmode::OPMODERATE) {
            return;
        }
        if data.verdict == SendVerdict::Deny {
            return;
        }
        if !regmsg_test(&data.client, &data.channel) {
            data.verdict = SendVerdict::Deny;
        }
    });

    // +C: block CTCP other than ACTION
    ctx.hooks.privmsg_channel.add(Priority::Normal, |_ctx, data| {
        if data.approved != 0 {
            return;
        }
        let is_ctcp = data.text.starts_with('\u{1}');
        let is_action = data.msgtype == MessageType::Privmsg
            && data
                .text
                .get(1..8)
                .is_some_and(|s| s.eq_ignore_ascii_case("ACTION "));
        if is_ctcp && data.channel.has_mode(cmode::NOCTCP) && !is_action {
            data.approved = Numeric::ERR_CANNOTSENDTOCHAN.code();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::test_context;
    use crate::hooks::{CanJoin, CanSend, PrivmsgChannel};
    use crate::state::{cflags, umode, LocalLink, MemberStatus};
    use solanum_proto::MsgBuf;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn member(ctx: &CoreContext) -> Arc<Client> {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (link, _) = LocalLink::new(tx, 6667, false);
        let client = Arc::new(Client::local(
            ctx.uid_gen.next(),
            "127.0.0.1".parse().unwrap(),
            link,
            0,
        ));
        client.set_flag(cflags::REGISTERED | cflags::PERSON);
        ctx.clients.insert(client.clone());
        client
    }

    fn channel_msg(
        ctx: &CoreContext,
        source: &Arc<Client>,
        channel: &Arc<Channel>,
        text: &str,
    ) -> PrivmsgChannel {
        PrivmsgChannel {
            source: source.clone(),
            channel: channel.clone(),
            msgtype: MessageType::Privmsg,
            text: text.to_string(),
            msgbuf: MsgBuf::new("PRIVMSG"),
            approved: 0,
        }
    }

    #[test]
    fn test_sslonly_denies_plaintext_join() {
        let ctx = test_context();
        register(&ctx);
        let client = member(&ctx);
        let channel = ctx.channels.get_or_create("#secure");
        channel.set_mode(cmode::SSLONLY);

        let mut data = CanJoin {
            client: client.clone(),
            channel: channel.clone(),
            approved: 0,
        };
        ctx.hooks.can_join.call(&ctx, &mut data);
        assert_eq!(data.approved, 480);

        client.set_flag(cflags::SECURE);
        let mut data = CanJoin {
            client,
            channel,
            approved: 0,
        };
        ctx.hooks.can_join.call(&ctx, &mut data);
        assert_eq!(data.approved, 0);
    }

    #[test]
    fn test_operonly_join() {
        let ctx = test_context();
        register(&ctx);
        let client = member(&ctx);
        let channel = ctx.channels.get_or_create("#staff");
        channel.set_mode(cmode::OPERONLY);

        let mut data = CanJoin {
            client: client.clone(),
            channel: channel.clone(),
            approved: 0,
        };
        ctx.hooks.can_join.call(&ctx, &mut data);
        assert_eq!(data.approved, 520);

        client.set_umode(umode::OPER);
        let mut data = CanJoin {
            client,
            channel,
            approved: 0,
        };
        ctx.hooks.can_join.call(&ctx, &mut data);
        assert_eq!(data.approved, 0);
    }

    #[test]
    fn test_regmsg_blocks_unidentified_allows_voiced() {
        let ctx = test_context();
        register(&ctx);
        let client = member(&ctx);
        let channel = ctx.channels.get_or_create("#reg");
        channel.set_mode(cmode::REGMSG);

        let mut data = channel_msg(&ctx, &client, &channel, "hello");
        ctx.hooks.privmsg_channel.call(&ctx, &mut data);
        assert_eq!(data.approved, 477);

        channel
            .members
            .insert(client.uid.clone(), MemberStatus { op: false, voice: true });
        let mut data = channel_msg(&ctx, &client, &channel, "hello");
        ctx.hooks.privmsg_channel.call(&ctx, &mut data);
        assert_eq!(data.approved, 0);
    }

    #[test]
    fn test_regmsg_on_opmoderated_uses_can_send() {
        let ctx = test_context();
        register(&ctx);
        let client = member(&ctx);
        let channel = ctx.channels.get_or_create("#zreg");
        channel.set_mode(cmode::REGMSG | cmode::OPMODERATE);

        // privmsg hook defers to can_send on +z
        let mut data = channel_msg(&ctx, &client, &channel, "hello");
        ctx.hooks.privmsg_channel.call(&ctx, &mut data);
        assert_eq!(data.approved, 0);

        let mut send = CanSend {
            client,
            channel,
            silent: false,
            verdict: SendVerdict::Allow,
        };
        ctx.hooks.can_send.call(&ctx, &mut send);
        assert_eq!(send.verdict, SendVerdict::Deny);
    }

    #[test]
    fn test_noctcp_allows_action() {
        let ctx = test_context();
        register(&ctx);
        let client = member(&ctx);
        *client.suser.write() = "acct".into();
        let channel = ctx.channels.get_or_create("#noctcp");
        channel.set_mode(cmode::NOCTCP);

        let mut version = channel_msg(&ctx, &client, &channel, "\u{1}VERSION\u{1}");
        ctx.hooks.privmsg_channel.call(&ctx, &mut version);
        assert_eq!(version.approved, 404);

        let mut action = channel_msg(&ctx, &client, &channel, "\u{1}ACTION waves\u{1}");
        ctx.hooks.privmsg_channel.call(&ctx, &mut action);
        assert_eq!(action.approved, 0);
    }
}
