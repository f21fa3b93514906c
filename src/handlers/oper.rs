//! OPER, REHASH, DIE.

use std::sync::Arc;

use async_trait::async_trait;
use solanum_proto::{MsgBuf, Numeric};

use super::Handler;
use crate::access::flags;
use crate::context::CoreContext;
use crate::error::{HandlerError, HandlerResult};
use crate::hooks::UmodeChanged;
use crate::send::{self, NoticeScope};
use crate::state::{snomask, umode, Client};

pub struct OperHandler;

#[async_trait]
impl Handler for OperHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult {
        let name = &msg.params[0];
        let password = &msg.params[1];
        let config = ctx.config();

        let Some(block) = config.operator.iter().find(|op| &op.name == name) else {
            send::send_numeric(ctx, client, Numeric::ERR_NOOPERHOST, &["No O-lines for your host"]);
            return Ok(());
        };

        // the oper block binds to a user@host
        let user_host = format!("{}@{}", client.username.read(), client.host.read());
        let sock_user_host = format!("{}@{}", client.username.read(), client.sockhost);
        if !solanum_proto::mask_match(&block.user, &user_host)
            && !solanum_proto::mask_match(&block.user, &sock_user_host)
        {
            send::send_numeric(ctx, client, Numeric::ERR_NOOPERHOST, &["No O-lines for your host"]);
            send::sendto_realops(
                ctx,
                snomask::GENERAL,
                NoticeScope::Local,
                &format!("Failed OPER attempt - host mismatch by {}", client.mask()),
            );
            return Ok(());
        }

        if block.need_ssl && !client.is_secure() {
            send::send_numeric(
                ctx,
                client,
                Numeric::ERR_NOOPERHOST,
                &["You must be connected via TLS to oper"],
            );
            return Ok(());
        }

        let ok = if block.encrypted {
            bcrypt::verify(password, &block.password).unwrap_or(false)
        } else {
            password == &block.password
        };
        if !ok {
            send::send_numeric(ctx, client, Numeric::ERR_PASSWDMISMATCH, &["Password incorrect"]);
            send::sendto_realops(
                ctx,
                snomask::GENERAL,
                NoticeScope::Local,
                &format!("Failed OPER attempt by {}", client.mask()),
            );
            return Ok(());
        }

        let old_umodes = client.umodes();
        client.set_umode(umode::OPER | umode::SERVNOTICE | umode::WALLOP);
        *client.opername.write() = Some(block.name.clone());
        *client.privs.write() = block.privs.clone();
        client
            .snomask
            .store(snomask::parse(&block.snomask), std::sync::atomic::Ordering::Release);
        if let Some(conf) = client.att_conf.read().as_ref() {
            conf.set_flag(flags::MYOPER);
        }

        ctx.hooks.umode_changed.call(
            ctx,
            &mut UmodeChanged {
                client: client.clone(),
                old_umodes,
            },
        );

        send::send_numeric(ctx, client, Numeric::RPL_YOUREOPER, &["You are now an IRC operator"]);
        let mode_msg = MsgBuf::new("MODE")
            .with_source(client.mask())
            .with_param(client.nick.read().clone())
            .with_param(umode::to_string(client.umodes()));
        send::deliver(client, &mode_msg);
        send::sendto_realops(
            ctx,
            snomask::GENERAL,
            NoticeScope::Local,
            &format!("{} ({}) is now an operator", client.nick.read(), block.name),
        );
        Ok(())
    }
}

pub struct RehashHandler;

#[async_trait]
impl Handler for RehashHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        _msg: &MsgBuf,
    ) -> HandlerResult {
        if !client.has_priv("oper:rehash") {
            return Err(HandlerError::NoPrivs("oper:rehash".to_string()));
        }
        send::send_numeric(
            ctx,
            client,
            Numeric::RPL_REHASHING,
            &[&ctx.config_path, "Rehashing"],
        );
        send::sendto_realops(
            ctx,
            snomask::GENERAL,
            NoticeScope::Local,
            &format!("{} is rehashing server config file", client.nick.read()),
        );
        // performed by the maintenance task between commands
        ctx.request_rehash();
        Ok(())
    }
}

pub struct DieHandler;

#[async_trait]
impl Handler for DieHandler {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        _msg: &MsgBuf,
    ) -> HandlerResult {
        if !client.has_priv("oper:die") {
            return Err(HandlerError::NoPrivs("oper:die".to_string()));
        }
        tracing::warn!(oper = %client.nick.read(), "DIE received, shutting down");
        let _ = ctx.shutdown_tx.send(());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::test_context;
    use crate::state::{cflags, LocalLink};
    use tokio::sync::mpsc;

    fn user(ctx: &Arc<CoreContext>) -> (Arc<Client>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (link, _) = LocalLink::new(tx, 6667, false);
        let client = Arc::new(Client::local(
            ctx.uid_gen.next(),
            "127.0.0.1".parse().unwrap(),
            link,
            0,
        ));
        client.set_flag(cflags::REGISTERED | cflags::PERSON);
        *client.username.write() = "~u".into();
        ctx.clients.insert(client.clone());
        ctx.clients.claim_nick(&client, "alice");
        (client, rx)
    }

    fn with_oper_block(ctx: &Arc<CoreContext>) {
        let mut config = (*ctx.config()).clone();
        config.operator.push(
            toml::from_str(
                r#"
                name = "god"
                user = "*@127.0.0.1"
                password = "sekrit"
                encrypted = false
                snomask = "+sbf"
                privs = ["oper:kline", "oper:rehash"]
                "#,
            )
            .unwrap(),
        );
        *ctx.config.write() = Arc::new(config);
    }

    #[tokio::test]
    async fn test_oper_success_grants_privs_and_snomask() {
        let ctx = test_context();
        with_oper_block(&ctx);
        let (client, mut rx) = user(&ctx);

        OperHandler
            .handle(&ctx, &client, &MsgBuf::parse("OPER god sekrit").unwrap())
            .await
            .unwrap();

        assert!(client.is_oper());
        assert!(client.has_priv("oper:kline"));
        assert_eq!(client.opername.read().as_deref(), Some("god"));
        let mask = client.snomask.load(std::sync::atomic::Ordering::Acquire);
        assert!(mask & snomask::BANNED != 0);
        let lines: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(lines.iter().any(|l| l.contains("381")));
    }

    #[tokio::test]
    async fn test_oper_wrong_password() {
        let ctx = test_context();
        with_oper_block(&ctx);
        let (client, mut rx) = user(&ctx);
        OperHandler
            .handle(&ctx, &client, &MsgBuf::parse("OPER god wrong").unwrap())
            .await
            .unwrap();
        assert!(!client.is_oper());
        assert!(rx.try_recv().unwrap().contains("464"));
    }

    #[tokio::test]
    async fn test_oper_host_mismatch() {
        let ctx = test_context();
        let mut config = (*ctx.config()).clone();
        config.operator.push(
            toml::from_str(
                r#"
                name = "god"
                user = "*@10.0.0.1"
                password = "sekrit"
                encrypted = false
                "#,
            )
            .unwrap(),
        );
        *ctx.config.write() = Arc::new(config);
        let (client, mut rx) = user(&ctx);
        OperHandler
            .handle(&ctx, &client, &MsgBuf::parse("OPER god sekrit").unwrap())
            .await
            .unwrap();
        assert!(!client.is_oper());
        assert!(rx.try_recv().unwrap().contains("491"));
    }

    #[tokio::test]
    async fn test_bcrypt_oper_password() {
        let ctx = test_context();
        let hash = bcrypt::hash("sekrit", 4).unwrap();
        let mut config = (*ctx.config()).clone();
        config.operator.push(crate::config::OperatorBlock {
            name: "god".into(),
            user: "*@*".into(),
            password: hash,
            encrypted: true,
            snomask: String::new(),
            privs: vec![],
            need_ssl: false,
        });
        *ctx.config.write() = Arc::new(config);
        let (client, _rx) = user(&ctx);
        OperHandler
            .handle(&ctx, &client, &MsgBuf::parse("OPER god sekrit").unwrap())
            .await
            .unwrap();
        assert!(client.is_oper());
    }
}
