//! Outbound message delivery.
//!
//! A message is decorated once (the `outbound_msgbuf` hook appends
//! cap-gated tags such as server-time and the oper tag) and then
//! serialized per recipient against that recipient's capability mask, so
//! one MsgBuf fans out to clients with different negotiated tag sets.

use std::sync::Arc;

use solanum_proto::{MsgBuf, Numeric};

use crate::context::CoreContext;
use crate::hooks::OutboundMsgbuf;
use crate::state::{snomask, umode, Channel, Client};

/// Run the outbound hook chain over a message. `source` is the client the
/// message originates from, when it is a user.
pub fn decorate(ctx: &CoreContext, source: Option<&Arc<Client>>, msgbuf: MsgBuf) -> MsgBuf {
    let mut payload = OutboundMsgbuf {
        source: source.cloned(),
        msgbuf,
    };
    ctx.hooks.outbound_msgbuf.call(ctx, &mut payload);
    payload.msgbuf
}

/// Serialize for one recipient and queue it. A sendq overflow marks the
/// client dead; its connection task notices and reaps.
pub fn deliver(recipient: &Client, msgbuf: &MsgBuf) {
    let line = msgbuf.serialize(recipient.caps());
    if !recipient.push_line(line) {
        recipient.set_flag(crate::state::cflags::DEAD);
    }
}

/// Decorate and deliver to a single client.
pub fn send_to_client(
    ctx: &CoreContext,
    recipient: &Client,
    source: Option<&Arc<Client>>,
    msgbuf: MsgBuf,
) {
    let decorated = decorate(ctx, source, msgbuf);
    deliver(recipient, &decorated);
}

/// Numeric reply from this server.
pub fn send_numeric(ctx: &CoreContext, client: &Client, num: Numeric, params: &[&str]) {
    let mut msg = MsgBuf::new(num.token()).with_source(&ctx.me.name);
    msg.params.push(client.nick.read().clone());
    msg.params.extend(params.iter().map(|p| p.to_string()));
    deliver(client, &msg);
}

/// Server NOTICE to one client.
pub fn send_server_notice(ctx: &CoreContext, client: &Client, text: &str) {
    let msg = MsgBuf::new("NOTICE")
        .with_source(&ctx.me.name)
        .with_param(client.nick.read().clone())
        .with_param(text);
    deliver(client, &msg);
}

/// Fan a decorated message out to a channel, optionally skipping one
/// member (the sender, unless it negotiated echo-message).
pub fn sendto_channel(
    ctx: &CoreContext,
    channel: &Channel,
    source: Option<&Arc<Client>>,
    msgbuf: MsgBuf,
    except_uid: Option<&str>,
) {
    let decorated = decorate(ctx, source, msgbuf);
    for member in channel.members.iter() {
        if Some(member.key().as_str()) == except_uid {
            continue;
        }
        if let Some(client) = ctx.clients.by_uid(member.key()) {
            if client.is_local() {
                deliver(&client, &decorated);
            }
        }
    }
}

/// Members of a +z channel that can see op-moderated traffic.
pub fn sendto_channel_ops(
    ctx: &CoreContext,
    channel: &Channel,
    source: Option<&Arc<Client>>,
    msgbuf: MsgBuf,
) {
    let decorated = decorate(ctx, source, msgbuf);
    for member in channel.members.iter() {
        if !member.value().op {
            continue;
        }
        if let Some(client) = ctx.clients.by_uid(member.key()) {
            if client.is_local() {
                deliver(&client, &decorated);
            }
        }
    }
}

/// Scope of an operator notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeScope {
    Local,
    /// Relay to peer servers as well.
    Netwide,
}

/// `*** Notice --` to every local oper subscribed to the snomask bit.
pub fn sendto_realops(ctx: &CoreContext, mask: u32, scope: NoticeScope, text: &str) {
    let line = format!("*** Notice -- {text}");
    for client in ctx.clients.local_clients() {
        if !client.is_oper() || client.umodes() & umode::SERVNOTICE == 0 {
            continue;
        }
        if client.snomask.load(std::sync::atomic::Ordering::Acquire) & mask == 0 {
            continue;
        }
        let msg = MsgBuf::new("NOTICE")
            .with_source(&ctx.me.name)
            .with_param(client.nick.read().clone())
            .with_param(line.clone());
        deliver(&client, &msg);
    }

    if scope == NoticeScope::Netwide {
        let letter = snomask_letter(mask);
        ctx.servers.send_to_matching(
            "*",
            ctx.server_caps.encap,
            None,
            &format!(":{} ENCAP * SNOTE {} :{}", ctx.me.sid, letter, text),
        );
    }
}

fn snomask_letter(mask: u32) -> char {
    match mask {
        snomask::BANNED => 'b',
        snomask::FULL => 'f',
        snomask::REJ => 'r',
        snomask::SKILL => 'k',
        _ => 's',
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::test_context;
    use crate::state::{cflags, LocalLink};
    use tokio::sync::mpsc;

    fn wired_client(ctx: &CoreContext) -> (Arc<Client>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (link, _) = LocalLink::new(tx, 6667, false);
        let client = Arc::new(Client::local(
            ctx.uid_gen.next(),
            "127.0.0.1".parse().unwrap(),
            link,
            0,
        ));
        ctx.clients.insert(client.clone());
        (client, rx)
    }

    #[test]
    fn test_numeric_carries_nick_and_source() {
        let ctx = test_context();
        let (client, mut rx) = wired_client(&ctx);
        *client.nick.write() = "alice".into();
        send_numeric(&ctx, &client, Numeric::RPL_YOUREOPER, &["You are now an IRC operator"]);
        let line = rx.try_recv().unwrap();
        assert_eq!(line, ":irc.test.net 381 alice :You are now an IRC operator");
    }

    #[test]
    fn test_tag_visibility_filtered_per_recipient() {
        let ctx = test_context();
        let (tagged, mut tagged_rx) = wired_client(&ctx);
        let (plain, mut plain_rx) = wired_client(&ctx);
        tagged.add_caps(ctx.client_caps.server_time);

        let mut msg = MsgBuf::new("PRIVMSG").with_param("x").with_param("hi");
        msg.append_tag("time", Some("now".into()), ctx.client_caps.server_time);
        deliver(&tagged, &msg);
        deliver(&plain, &msg);

        assert!(tagged_rx.try_recv().unwrap().starts_with("@time=now "));
        assert!(!plain_rx.try_recv().unwrap().contains("time=now"));
    }

    #[test]
    fn test_realops_respects_snomask() {
        let ctx = test_context();
        let (oper, mut oper_rx) = wired_client(&ctx);
        let (deaf, mut deaf_rx) = wired_client(&ctx);
        for client in [&oper, &deaf] {
            client.set_umode(umode::OPER | umode::SERVNOTICE);
        }
        oper.snomask
            .store(snomask::BANNED, std::sync::atomic::Ordering::Release);

        sendto_realops(&ctx, snomask::BANNED, NoticeScope::Local, "test ban notice");
        assert!(oper_rx.try_recv().unwrap().contains("test ban notice"));
        assert!(deaf_rx.try_recv().is_err());
    }

    #[test]
    fn test_sendq_overflow_marks_dead() {
        let ctx = test_context();
        let (client, _rx) = wired_client(&ctx);
        client
            .link
            .as_ref()
            .unwrap()
            .sendq_cap
            .store(4, std::sync::atomic::Ordering::Release);
        deliver(&client, &MsgBuf::new("PING").with_param("overflowing line"));
        assert!(client.has_flag(cflags::DEAD));
    }
}
