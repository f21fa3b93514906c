//! Quarantine: umode +q restricting unidentified connections.
//!
//! A quarantined local user may only join the configured allowlist
//! channels and may only message opers and services. Logging in to
//! services or opering up lifts the restriction with a notice.

use std::sync::Arc;

use solanum_proto::casemap::irccmp;
use solanum_proto::Numeric;

use crate::context::CoreContext;
use crate::hooks::Priority;
use crate::send;
use crate::state::{umode, Client};

pub const APPLY_MSG: &str = "You have been quarantined and must log into your NickServ account before you can join channels. Please see /STATS p for assistance.";
pub const REMOVE_MSG: &str = "You are no longer quarantined and can freely join channels.";

fn channel_allowed(ctx: &CoreContext, name: &str) -> bool {
    ctx.config()
        .quarantine
        .allow_channels
        .iter()
        .any(|allowed| irccmp(allowed, name))
}

fn exempt_target(target: &Client) -> bool {
    target.is_oper() || target.is_service()
}

/// Apply quarantine to a local client.
pub fn apply(ctx: &CoreContext, target: &Arc<Client>) {
    if target.is_quarantined() {
        return;
    }
    target.set_umode(umode::QUARANTINE);
    send::send_server_notice(ctx, target, APPLY_MSG);
    let msg = solanum_proto::MsgBuf::new("MODE")
        .with_source(target.mask())
        .with_param(target.nick.read().clone())
        .with_param("+q");
    send::deliver(target, &msg);
}

/// Lift quarantine, with the removal notice.
pub fn remove(ctx: &CoreContext, target: &Arc<Client>) {
    if !target.is_quarantined() {
        return;
    }
    target.clear_umode(umode::QUARANTINE);
    send::send_server_notice(ctx, target, REMOVE_MSG);
    let msg = solanum_proto::MsgBuf::new("MODE")
        .with_source(target.mask())
        .with_param(target.nick.read().clone())
        .with_param("-q");
    send::deliver(target, &msg);
}

pub fn register(ctx: &CoreContext) {
    ctx.hooks.can_join.add(Priority::Normal, |ctx, data| {
        if data.approved != 0 {
            return;
        }
        if !data.client.is_local() || !data.client.is_quarantined() || data.client.is_oper() {
            return;
        }
        if !channel_allowed(ctx, &data.channel.name) {
            data.approved = Numeric::ERR_NEEDREGGEDNICK.code();
        }
    });

    ctx.hooks.privmsg_channel.add(Priority::Normal, |ctx, data| {
        if data.approved != 0 {
            return;
        }
        if !data.source.is_local() || !data.source.is_quarantined() || data.source.is_oper() {
            return;
        }
        if !channel_allowed(ctx, &data.channel.name) {
            data.approved = Numeric::ERR_NEEDREGGEDNICK.code();
        }
    });

    ctx.hooks.privmsg_user.add(Priority::Normal, |_ctx, data| {
        if data.approved != 0 {
            return;
        }
        if !data.source.is_local() || !data.source.is_quarantined() || data.source.is_oper() {
            return;
        }
        if !exempt_target(&data.target) {
            data.approved = Numeric::ERR_NEEDREGGEDNICK.code();
        }
    });

    // services login lifts quarantine
    ctx.hooks.account_change.add(Priority::Normal, |ctx, data| {
        if data.client.is_local() && data.client.has_account() && data.client.is_quarantined() {
            remove(ctx, &data.client);
        }
    });

    // opering up lifts quarantine
    ctx.hooks.umode_changed.add(Priority::Normal, |ctx, data| {
        let gained_oper =
            data.client.is_oper() && data.old_umodes & umode::OPER == 0;
        if gained_oper && data.client.is_local() && data.client.is_quarantined() {
            remove(ctx, &data.client);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::test_context;
    use crate::hooks::{AccountChange, CanJoin, MessageType, PrivmsgUser, UmodeChanged};
    use crate::state::{cflags, LocalLink};
    use solanum_proto::MsgBuf;
    use tokio::sync::mpsc;

    fn quarantined(ctx: &CoreContext) -> (Arc<Client>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (link, _) = LocalLink::new(tx, 6667, false);
        let client = Arc::new(Client::local(
            ctx.uid_gen.next(),
            "127.0.0.1".parse().unwrap(),
            link,
            0,
        ));
        client.set_flag(cflags::REGISTERED | cflags::PERSON);
        client.set_umode(umode::QUARANTINE);
        ctx.clients.insert(client.clone());
        (client, rx)
    }

    #[test]
    fn test_join_denied_off_allowlist_allowed_on_it() {
        let ctx = test_context();
        register(&ctx);
        let (client, _rx) = quarantined(&ctx);

        let mut foo = CanJoin {
            client: client.clone(),
            channel: ctx.channels.get_or_create("#foo"),
            approved: 0,
        };
        ctx.hooks.can_join.call(&ctx, &mut foo);
        assert_eq!(foo.approved, Numeric::ERR_NEEDREGGEDNICK.code());

        let mut help = CanJoin {
            client,
            channel: ctx.channels.get_or_create("#help"),
            approved: 0,
        };
        ctx.hooks.can_join.call(&ctx, &mut help);
        assert_eq!(help.approved, 0);
    }

    #[test]
    fn test_dm_allowed_only_to_opers_and_services() {
        let ctx = test_context();
        register(&ctx);
        let (source, _rx) = quarantined(&ctx);
        let (plain, _prx) = quarantined(&ctx);
        plain.clear_umode(umode::QUARANTINE);
        let (oper, _orx) = quarantined(&ctx);
        oper.clear_umode(umode::QUARANTINE);
        oper.set_umode(umode::OPER);

        let mut to_plain = PrivmsgUser {
            source: source.clone(),
            target: plain,
            msgtype: MessageType::Privmsg,
            text: "hi".into(),
            msgbuf: MsgBuf::new("PRIVMSG"),
            approved: 0,
        };
        ctx.hooks.privmsg_user.call(&ctx, &mut to_plain);
        assert_ne!(to_plain.approved, 0);

        let mut to_oper = PrivmsgUser {
            source,
            target: oper,
            msgtype: MessageType::Privmsg,
            text: "help".into(),
            msgbuf: MsgBuf::new("PRIVMSG"),
            approved: 0,
        };
        ctx.hooks.privmsg_user.call(&ctx, &mut to_oper);
        assert_eq!(to_oper.approved, 0);
    }

    #[test]
    fn test_services_login_lifts_quarantine() {
        let ctx = test_context();
        register(&ctx);
        let (client, mut rx) = quarantined(&ctx);
        *client.suser.write() = "account".into();
        ctx.hooks.account_change.call(
            &ctx,
            &mut AccountChange {
                client: client.clone(),
            },
        );
        assert!(!client.is_quarantined());
        let lines: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(lines.iter().any(|l| l.contains(REMOVE_MSG)));
    }

    #[test]
    fn test_oper_up_lifts_quarantine() {
        let ctx = test_context();
        register(&ctx);
        let (client, _rx) = quarantined(&ctx);
        let old = client.umodes();
        client.set_umode(umode::OPER);
        ctx.hooks.umode_changed.call(
            &ctx,
            &mut UmodeChanged {
                client: client.clone(),
                old_umodes: old,
            },
        );
        assert!(!client.is_quarantined());
    }
}
