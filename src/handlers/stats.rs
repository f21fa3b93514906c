//! STATS: per-letter reports over the access tables.
//!
//! Each letter carries its own privilege gate. The doing_stats hook fires
//! after the builtin letters so policies can extend the report.

use std::sync::Arc;

use async_trait::async_trait;
use solanum_proto::{MsgBuf, Numeric};

use super::Handler;
use crate::access::ConfKind;
use crate::context::CoreContext;
use crate::error::{HandlerError, HandlerResult};
use crate::hooks::DoingStats;
use crate::send;
use crate::state::Client;

/// Privilege needed for a letter; `None` is public.
fn required_priv(letter: char) -> Option<&'static str> {
    match letter {
        'i' | 'k' | 'K' | 'd' | 'D' | 'q' | 'Q' | 'x' | 'X' | 'o' | 'y' => Some("oper:general"),
        'E' => Some("admin"),
        _ => None,
    }
}

pub struct StatsHandler;

#[async_trait]
impl Handler for StatsHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        let letter = msg.params[0].chars().next().unwrap_or('?');

        if !ctx
            .ratelimit
            .ratelimit_client(&client.uid, 1, ctx.mono_secs())
        {
            return Err(HandlerError::Limited);
        }

        if let Some(required) = required_priv(letter) {
            if !client.has_priv(required) {
                return Err(HandlerError::NoPrivs(required.to_string()));
            }
        }

        match letter {
            'i' => {
                for conf in ctx.atable.all_of_kind(ConfKind::Client) {
                    send::send_numeric(
                        ctx,
                        client,
                        Numeric::RPL_STATSILINE,
                        &[
                            "I",
                            "*",
                            &conf.display_mask(),
                            conf.class_name.as_deref().unwrap_or("default"),
                        ],
                    );
                }
            }
            'k' | 'K' => {
                let temp = letter == 'k';
                for conf in ctx.atable.all_of_kind(ConfKind::Kline) {
                    if conf.is_temporary() != temp {
                        continue;
                    }
                    send::send_numeric(
                        ctx,
                        client,
                        Numeric::RPL_STATSKLINE,
                        &[
                            if temp { "k" } else { "K" },
                            &conf.host,
                            "*",
                            conf.user.as_deref().unwrap_or("*"),
                            &conf.reason,
                        ],
                    );
                }
            }
            'd' | 'D' => {
                let temp = letter == 'd';
                for conf in ctx.atable.all_of_kind(ConfKind::Dline) {
                    if conf.is_temporary() != temp {
                        continue;
                    }
                    send::send_numeric(
                        ctx,
                        client,
                        Numeric::RPL_STATSDLINE,
                        &[if temp { "d" } else { "D" }, &conf.host, &conf.reason],
                    );
                }
            }
            'x' | 'X' => {
                for conf in ctx.atable.all_of_kind(ConfKind::Xline) {
                    send::send_numeric(
                        ctx,
                        client,
                        Numeric::RPL_STATSXLINE,
                        &[
                            "X",
                            &conf.hit_count().to_string(),
                            &conf.host,
                            &conf.reason,
                        ],
                    );
                }
            }
            'q' | 'Q' => {
                for kind in [ConfKind::ResvNick, ConfKind::ResvChannel] {
                    for conf in ctx.atable.all_of_kind(kind) {
                        send::send_numeric(
                            ctx,
                            client,
                            Numeric::RPL_STATSQLINE,
                            &[
                                "Q",
                                &conf.hit_count().to_string(),
                                &conf.host,
                                &conf.reason,
                            ],
                        );
                    }
                }
            }
            'o' => {
                let config = ctx.config();
                for block in &config.operator {
                    send::send_numeric(
                        ctx,
                        client,
                        Numeric::RPL_STATSOLINE,
                        &["O", &block.user, "*", &block.name, "-1"],
                    );
                }
            }
            'y' => {
                for class in ctx.classes.all() {
                    send::send_numeric(
                        ctx,
                        client,
                        Numeric::RPL_STATSYLINE,
                        &[
                            "Y",
                            &class.name,
                            &class.ping_frequency.to_string(),
                            &class.connect_frequency.to_string(),
                            &class.max_users().to_string(),
                            &class.sendq.to_string(),
                            &class.current_users().to_string(),
                        ],
                    );
                }
            }
            'u' => {
                let uptime = ctx.uptime_secs();
                send::send_numeric(
                    ctx,
                    client,
                    Numeric::RPL_STATSUPTIME,
                    &[&format!(
                        "Server Up {} days, {}:{:02}:{:02}",
                        uptime / 86_400,
                        (uptime / 3_600) % 24,
                        (uptime / 60) % 60,
                        uptime % 60
                    )],
                );
            }
            'm' => {
                if let Some(registry) = ctx.registry.get() {
                    for (name, count, bytes, rcount) in registry.command_stats() {
                        send::send_numeric(
                            ctx,
                            client,
                            Numeric::RPL_STATSCOMMANDS,
                            &[
                                name,
                                &count.to_string(),
                                &bytes.to_string(),
                                &rcount.to_string(),
                            ],
                        );
                    }
                }
            }
            'p' => {
                for oper in ctx.clients.all() {
                    if oper.is_oper() && !oper.has_priv("oper:hidden") {
                        send::send_numeric(
                            ctx,
                            client,
                            Numeric::RPL_STATSOLINE,
                            &["p", &oper.nick.read().clone()],
                        );
                    }
                }
            }
            _ => {}
        }

        ctx.hooks.doing_stats.call(
            ctx,
            &mut DoingStats {
                source: client.clone(),
                letter,
            },
        );

        send::send_numeric(
            ctx,
            client,
            Numeric::RPL_ENDOFSTATS,
            &[&letter.to_string(), "End of /STATS report"],
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::test_context;
    use crate::state::{cflags, umode, LocalLink};
    use tokio::sync::mpsc;

    fn user(ctx: &Arc<CoreContext>, opered: bool) -> (Arc<Client>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (link, _) = LocalLink::new(tx, 6667, false);
        let client = Arc::new(Client::local(
            ctx.uid_gen.next(),
            "127.0.0.1".parse().unwrap(),
            link,
            0,
        ));
        client.set_flag(cflags::REGISTERED | cflags::PERSON);
        if opered {
            client.set_umode(umode::OPER);
            *client.privs.write() = vec!["oper:general".into()];
        }
        ctx.clients.insert(client.clone());
        (client, rx)
    }

    #[tokio::test]
    async fn test_stats_u_public() {
        let ctx = test_context();
        let (client, mut rx) = user(&ctx, false);
        StatsHandler
            .handle(&ctx, &client, &MsgBuf::parse("STATS u").unwrap())
            .await
            .unwrap();
        let lines: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(lines.iter().any(|l| l.contains("242")));
        assert!(lines.iter().any(|l| l.contains("219")));
    }

    #[tokio::test]
    async fn test_stats_k_needs_priv() {
        let ctx = test_context();
        let (plain, _rx) = user(&ctx, false);
        let err = StatsHandler
            .handle(&ctx, &plain, &MsgBuf::parse("STATS k").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::NoPrivs(_)));
    }

    #[tokio::test]
    async fn test_stats_k_splits_temp_and_perm() {
        let ctx = test_context();
        let (op, mut rx) = user(&ctx, true);

        let temp = crate::access::ConfItem::new(
            ConfKind::Kline,
            Some("*".into()),
            "temp.net".into(),
            "t".into(),
        );
        let temp = Arc::new(temp);
        temp.set_flag(crate::access::flags::TEMPORARY);
        ctx.atable.add(temp);
        ctx.atable.add(Arc::new(crate::access::ConfItem::new(
            ConfKind::Kline,
            Some("*".into()),
            "perm.net".into(),
            "p".into(),
        )));

        StatsHandler
            .handle(&ctx, &op, &MsgBuf::parse("STATS k").unwrap())
            .await
            .unwrap();
        let lines: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(lines.iter().any(|l| l.contains("temp.net")));
        assert!(!lines.iter().any(|l| l.contains("perm.net")));
    }

    #[tokio::test]
    async fn test_doing_stats_hook_extends() {
        let ctx = test_context();
        let seen = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen_clone = seen.clone();
        ctx.hooks
            .doing_stats
            .add(crate::hooks::Priority::Normal, move |_ctx, data| {
                if data.letter == 'Z' {
                    seen_clone.store(true, std::sync::atomic::Ordering::Release);
                }
            });
        let (client, _rx) = user(&ctx, false);
        StatsHandler
            .handle(&ctx, &client, &MsgBuf::parse("STATS Z").unwrap())
            .await
            .unwrap();
        assert!(seen.load(std::sync::atomic::Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_stats_rate_limited() {
        let ctx = test_context();
        let (client, _rx) = user(&ctx, false);
        let mut limited = false;
        for _ in 0..100 {
            if StatsHandler
                .handle(&ctx, &client, &MsgBuf::parse("STATS u").unwrap())
                .await
                .is_err()
            {
                limited = true;
                break;
            }
        }
        assert!(limited);
    }
}
