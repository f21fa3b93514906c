//! TESTLINE, TESTKLINE, TESTGECOS: report which rule would match.
//!
//! These are dry runs: aside from backing out the match counter a lookup
//! bumps on a resv or x-line, nothing in the index changes.

use std::sync::Arc;

use async_trait::async_trait;
use solanum_proto::wildcard::split_user_host;
use solanum_proto::{MsgBuf, Numeric};

use super::Handler;
use crate::access::{find_resv, find_xline, ConfItem, ConfKind};
use crate::context::CoreContext;
use crate::error::HandlerResult;
use crate::send;
use crate::state::Client;

fn remaining_minutes(ctx: &CoreContext, conf: &ConfItem) -> i64 {
    if conf.hold == 0 {
        0
    } else {
        ((conf.hold - ctx.now()).max(0) + 59) / 60
    }
}

fn report_match(ctx: &CoreContext, client: &Client, letter: &str, conf: &ConfItem) {
    send::send_numeric(
        ctx,
        client,
        Numeric::RPL_TESTLINE,
        &[
            letter,
            &remaining_minutes(ctx, conf).to_string(),
            &conf.display_mask(),
            &conf.reason,
        ],
    );
}

fn report_no_match(ctx: &CoreContext, client: &Client, mask: &str) {
    send::send_numeric(ctx, client, Numeric::RPL_NOTESTLINE, &[mask, "No matches"]);
}

pub struct TestlineHandler;

#[async_trait]
impl Handler for TestlineHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        let mask = msg.params[0].as_str();

        // channels test against the resv table
        if solanum_proto::casemap::is_channel_name(mask) {
            match find_resv(&ctx.atable, mask) {
                Some(conf) => {
                    conf.forget_hit();
                    report_match(ctx, client, if conf.hold != 0 { "q" } else { "Q" }, &conf);
                }
                None => report_no_match(ctx, client, mask),
            }
            return Ok(());
        }

        let (user, host) = split_user_host(mask);

        // D-lines first when the host side is an address
        if let Ok(ip) = host.parse::<std::net::IpAddr>() {
            if let Some(conf) = ctx.atable.find_dline(ip) {
                if conf.kind == ConfKind::Dline {
                    report_match(ctx, client, if conf.hold != 0 { "d" } else { "D" }, &conf);
                    return Ok(());
                }
            }
        }

        let ip = host.parse().unwrap_or_else(|_| "255.255.255.255".parse().unwrap());
        match ctx.atable.find_kline(Some(host), host, user, ip, None) {
            Some(conf) => report_match(ctx, client, if conf.hold != 0 { "k" } else { "K" }, &conf),
            None => report_no_match(ctx, client, mask),
        }
        Ok(())
    }
}

pub struct TestklineHandler;

#[async_trait]
impl Handler for TestklineHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        let (user, host) = split_user_host(&msg.params[0]);
        let ip = host.parse().unwrap_or_else(|_| "255.255.255.255".parse().unwrap());
        match ctx.atable.find_kline(Some(host), host, user, ip, None) {
            Some(conf) => report_match(ctx, client, if conf.hold != 0 { "k" } else { "K" }, &conf),
            None => report_no_match(ctx, client, &msg.params[0]),
        }
        Ok(())
    }
}

pub struct TestgecosHandler;

#[async_trait]
impl Handler for TestgecosHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        match find_xline(&ctx.atable, &msg.params[0]) {
            Some(conf) => {
                conf.forget_hit();
                send::send_numeric(
                    ctx,
                    client,
                    Numeric::RPL_TESTMASKGECOS,
                    &["0", "0", &conf.host, &conf.reason],
                );
            }
            None => report_no_match(ctx, client, &msg.params[0]),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::test_context;
    use crate::state::{cflags, umode, LocalLink};
    use tokio::sync::mpsc;

    fn oper(ctx: &Arc<CoreContext>) -> (Arc<Client>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (link, _) = LocalLink::new(tx, 6667, false);
        let client = Arc::new(Client::local(
            ctx.uid_gen.next(),
            "127.0.0.1".parse().unwrap(),
            link,
            0,
        ));
        client.set_flag(cflags::REGISTERED | cflags::PERSON);
        client.set_umode(umode::OPER);
        ctx.clients.insert(client.clone());
        ctx.clients.claim_nick(&client, "god");
        (client, rx)
    }

    fn add_kline(ctx: &CoreContext, host: &str, hold: i64) -> Arc<ConfItem> {
        let mut conf = ConfItem::new(ConfKind::Kline, Some("*".into()), host.into(), "r".into());
        conf.hold = hold;
        let conf = Arc::new(conf);
        ctx.atable.add(conf.clone());
        conf
    }

    #[tokio::test]
    async fn test_testline_reports_kline_without_mutating() {
        let ctx = test_context();
        let (op, mut rx) = oper(&ctx);
        add_kline(&ctx, "*.bad.net", 0);

        TestlineHandler
            .handle(&ctx, &op, &MsgBuf::parse("TESTLINE someone@host.bad.net").unwrap())
            .await
            .unwrap();
        let line = rx.try_recv().unwrap();
        assert!(line.contains("725"));
        assert!(line.contains("*@*.bad.net"));
        assert_eq!(ctx.atable.all_of_kind(ConfKind::Kline).len(), 1);
    }

    #[tokio::test]
    async fn test_testline_no_match() {
        let ctx = test_context();
        let (op, mut rx) = oper(&ctx);
        TestlineHandler
            .handle(&ctx, &op, &MsgBuf::parse("TESTLINE u@clean.example.net").unwrap())
            .await
            .unwrap();
        assert!(rx.try_recv().unwrap().contains("726"));
    }

    #[tokio::test]
    async fn test_testline_resv_counter_nets_zero() {
        let ctx = test_context();
        let (op, _rx) = oper(&ctx);
        let conf = Arc::new(ConfItem::new(
            ConfKind::ResvChannel,
            None,
            "#banned".into(),
            "r".into(),
        ));
        ctx.atable.add(conf.clone());
        TestlineHandler
            .handle(&ctx, &op, &MsgBuf::parse("TESTLINE #banned").unwrap())
            .await
            .unwrap();
        assert_eq!(conf.hit_count(), 0);
    }

    #[tokio::test]
    async fn test_testgecos() {
        let ctx = test_context();
        let (op, mut rx) = oper(&ctx);
        let conf = Arc::new(ConfItem::new(ConfKind::Xline, None, "*bot*".into(), "bots".into()));
        ctx.atable.add(conf.clone());
        TestgecosHandler
            .handle(&ctx, &op, &MsgBuf::parse("TESTGECOS :a bot here").unwrap())
            .await
            .unwrap();
        assert!(rx.try_recv().unwrap().contains("727"));
        assert_eq!(conf.hit_count(), 0);
    }

    #[tokio::test]
    async fn test_testline_dline_beats_kline() {
        let ctx = test_context();
        let (op, mut rx) = oper(&ctx);
        add_kline(&ctx, "10.1.0.0/16", 0);
        ctx.atable.add(Arc::new(ConfItem::new(
            ConfKind::Dline,
            None,
            "10.1.2.0/24".into(),
            "dlined".into(),
        )));
        TestlineHandler
            .handle(&ctx, &op, &MsgBuf::parse("TESTLINE u@10.1.2.3").unwrap())
            .await
            .unwrap();
        let line = rx.try_recv().unwrap();
        assert!(line.contains('D'));
        assert!(line.contains("dlined"));
    }
}
