//! Registration completion.
//!
//! Once a connection has offered NICK and USER and finished capability
//! negotiation, it runs the access gauntlet in a fixed order: auth block,
//! password, TLS requirement, host spoof, class quota, K-line, X-line,
//! the new_local_user hook, and only then the welcome burst. Every
//! rejection feeds the reject cache so an immediate reconnect is cut off
//! at accept.

use std::sync::Arc;

use solanum_proto::{MsgBuf, Numeric};
use tracing::info;

use crate::access::{flags, AttachError, find_xline};
use crate::context::CoreContext;
use crate::error::{HandlerError, HandlerResult};
use crate::hooks::{IntroduceClient, NewLocalUser};
use crate::send::{self, NoticeScope};
use crate::state::{cflags, snomask, umode, Client};

/// Complete registration if every prerequisite has arrived.
pub async fn try_register(ctx: &Arc<CoreContext>, client: &Arc<Client>) -> HandlerResult {
    if client.is_registered() {
        return Ok(());
    }
    let ready = {
        let prereg = client.prereg.read();
        let negotiating = prereg.as_ref().is_some_and(|p| p.cap_negotiating);
        *client.nick.read() != "*" && client.has_flag(cflags::SENTUSER) && !negotiating
    };
    if !ready {
        return Ok(());
    }
    register_local_user(ctx, client).await
}

fn reject(ctx: &CoreContext, client: &Client, reason: &str) -> HandlerError {
    if let Some(ip) = client.ip {
        let duration = ctx.config().general.reject_duration;
        ctx.reject_cache.add(ip, ctx.now(), duration);
    }
    crate::metrics::CONNECTIONS_REJECTED
        .with_label_values(&["registration"])
        .inc();
    HandlerError::Exit(reason.to_string())
}

async fn register_local_user(ctx: &Arc<CoreContext>, client: &Arc<Client>) -> HandlerResult {
    let password = {
        let mut prereg = client.prereg.write();
        let state = prereg.as_mut();
        if let Some(state) = state {
            // trusted-gateway spoof lands before any matching
            if let Some(host) = state.webirc_host.take() {
                *client.host.write() = host.clone();
                *client.orig_host.write() = host;
            }
        }
        prereg.as_ref().and_then(|p| p.password.clone())
    };

    let ip = client
        .ip
        .ok_or_else(|| HandlerError::Internal("local client without ip".to_string()))?;
    let username = client.username.read().clone();
    let host = client.host.read().clone();
    let account = client.suser.read().clone();

    // auth block
    let Some(conf) = ctx.atable.find_client_conf(
        Some(&host),
        &client.sockhost,
        &username,
        ip,
        (!account.is_empty()).then_some(account.as_str()),
    ) else {
        send::send_numeric(
            ctx,
            client,
            Numeric::ERR_YOUREBANNEDCREEP,
            &["You are not authorised to use this server"],
        );
        send::sendto_realops(
            ctx,
            snomask::REJ,
            NoticeScope::Local,
            &format!("Unauthorised client connection from {}", client.mask()),
        );
        return Err(reject(ctx, client, "You are not authorised to use this server"));
    };

    // auth password
    if let Some(required) = &conf.password {
        let supplied = password.as_deref().unwrap_or("");
        let ok = if conf.has_flag(flags::ENCRYPTED) {
            bcrypt::verify(supplied, required).unwrap_or(false)
        } else {
            supplied == required
        };
        if !ok {
            send::send_numeric(ctx, client, Numeric::ERR_PASSWDMISMATCH, &["Password incorrect"]);
            return Err(reject(ctx, client, "Bad Password"));
        }
    }

    if conf.has_flag(flags::NEED_SSL) && !client.is_secure() {
        return Err(reject(ctx, client, "You must use TLS to connect to this server"));
    }

    // auth-block host spoof
    if let Some(spoof) = &conf.spoof {
        *client.host.write() = spoof.clone();
        client.set_flag(cflags::IPSPOOF);
    }

    // class attach, with redirect advertisement when full
    if let Err(err) = ctx.attach_conf(client, &conf) {
        let (text, notice_mask) = match err {
            AttachError::ClassFull => (
                "No more connections allowed in your connection class",
                snomask::FULL,
            ),
            AttachError::CidrFull => (
                "Too many host connections (local)",
                snomask::FULL,
            ),
        };
        if let (Some(serv), Some(port)) = (&conf.redir_serv, conf.redir_port) {
            let target = MsgBuf::new("010")
                .with_source(&ctx.me.name)
                .with_param(client.nick.read().clone())
                .with_param(serv)
                .with_param(port.to_string())
                .with_param("Please use this Server/Port instead");
            send::deliver(client, &target);
        }
        send::sendto_realops(
            ctx,
            notice_mask,
            NoticeScope::Local,
            &format!("{} for {}", text, client.mask()),
        );
        return Err(reject(ctx, client, text));
    }

    // K-line after class attach, exemption via the attached conf
    if let Some(kline) = ctx.atable.find_kline(
        Some(&host),
        &client.sockhost,
        &username,
        ip,
        Some(&conf),
    ) {
        send::send_numeric(
            ctx,
            client,
            Numeric::ERR_YOUREBANNEDCREEP,
            &[&format!("You are banned from this server- {}", kline.reason)],
        );
        send::sendto_realops(
            ctx,
            snomask::BANNED,
            NoticeScope::Local,
            &format!("Rejecting K-Lined user {} [{}]", client.mask(), kline.display_mask()),
        );
        ctx.detach_conf(client);
        return Err(reject(ctx, client, "K-Lined"));
    }

    // gecos ban
    let gecos = client.gecos.read().clone();
    if let Some(xline) = find_xline(&ctx.atable, &gecos) {
        send::sendto_realops(
            ctx,
            snomask::REJ,
            NoticeScope::Local,
            &format!("Rejecting X-Lined user {} [{}]", client.mask(), xline.host),
        );
        ctx.detach_conf(client);
        return Err(reject(ctx, client, "Bad user info"));
    }

    client.set_flag(cflags::REGISTERED | cflags::PERSON);
    if client.is_secure() {
        client.set_umode(umode::SECURE_UMODE);
    }
    *client.prereg.write() = None;

    // modules can still veto
    let mut payload = NewLocalUser {
        client: client.clone(),
        exit_reason: None,
    };
    ctx.hooks.new_local_user.call(ctx, &mut payload);
    if let Some(exit_reason) = payload.exit_reason {
        ctx.detach_conf(client);
        return Err(reject(ctx, client, &exit_reason));
    }

    let local_count = ctx.clients.local_clients().len() as i64;
    ctx.max_local.fetch_max(local_count, std::sync::atomic::Ordering::AcqRel);
    crate::metrics::CLIENTS.set(ctx.clients.len() as i64);

    welcome_burst(ctx, client);
    introduce_to_network(ctx, client);

    ctx.hooks.introduce_client.call(
        ctx,
        &mut IntroduceClient {
            client: client.clone(),
        },
    );

    info!(
        nick = %client.nick.read(),
        uid = %client.uid,
        host = %client.sockhost,
        "client registered"
    );
    Ok(())
}

/// 001-005 plus the short LUSERS summary.
fn welcome_burst(ctx: &CoreContext, client: &Arc<Client>) {
    let nick = client.nick.read().clone();
    send::send_numeric(
        ctx,
        client,
        Numeric::RPL_WELCOME,
        &[&format!(
            "Welcome to the {} Internet Relay Chat Network {}",
            ctx.me.network, nick
        )],
    );
    send::send_numeric(
        ctx,
        client,
        Numeric::RPL_YOURHOST,
        &[&format!(
            "Your host is {}, running version solanumd-0.1",
            ctx.me.name
        )],
    );
    send::send_numeric(
        ctx,
        client,
        Numeric::RPL_CREATED,
        &[&format!(
            "This server was created {}",
            chrono::DateTime::from_timestamp(ctx.start_time, 0)
                .map(|t| t.to_rfc2822())
                .unwrap_or_default()
        )],
    );
    send::send_numeric(
        ctx,
        client,
        Numeric::RPL_MYINFO,
        &[&ctx.me.name, "solanumd-0.1", "iowsqZ", "bikmnlpstzSRCO", "bkloq"],
    );

    // at most 12 tokens per 005 so the parameter budget holds
    for chunk in isupport_tokens(ctx).chunks(12) {
        let mut msg = MsgBuf::new(Numeric::RPL_ISUPPORT.token()).with_source(&ctx.me.name);
        msg.params.push(nick.clone());
        msg.params.extend(chunk.iter().cloned());
        msg.params.push("are supported by this server".to_string());
        send::deliver(client, &msg);
    }

    let total = ctx.clients.len();
    send::send_numeric(
        ctx,
        client,
        Numeric::RPL_LUSERCLIENT,
        &[&format!(
            "There are {} users and 0 invisible on {} servers",
            total,
            ctx.servers.len() + 1
        )],
    );
    send::send_numeric(
        ctx,
        client,
        Numeric::RPL_LUSERME,
        &[&format!(
            "I have {} clients and {} servers",
            ctx.clients.local_clients().len(),
            ctx.servers.len()
        )],
    );
    send::send_numeric(ctx, client, Numeric::ERR_NOMOTD, &["MOTD File is missing"]);
}

fn isupport_tokens(ctx: &CoreContext) -> Vec<String> {
    vec![
        "CHANTYPES=#&".to_string(),
        "EXCEPTS".to_string(),
        "INVEX".to_string(),
        "CHANMODES=bq,k,l,imnpstzSRCO".to_string(),
        "CHANLIMIT=#&:15".to_string(),
        "PREFIX=(ov)@+".to_string(),
        "MODES=4".to_string(),
        format!("NETWORK={}", ctx.me.network),
        "NICKLEN=30".to_string(),
        "CASEMAPPING=rfc1459".to_string(),
        "TOPICLEN=390".to_string(),
        "KICKLEN=180".to_string(),
        "DEAF=D".to_string(),
        "TARGMAX=NAMES:1,LIST:1,KICK:1,WHOIS:1,PRIVMSG:4,NOTICE:4".to_string(),
    ]
}

/// EUID introduction toward every peer.
fn introduce_to_network(ctx: &CoreContext, client: &Arc<Client>) {
    let account = {
        let suser = client.suser.read();
        if suser.is_empty() {
            "*".to_string()
        } else {
            suser.clone()
        }
    };
    let line = format!(
        ":{} EUID {} 1 {} {} {} {} {} {} {} {} :{}",
        ctx.me.sid,
        client.nick.read(),
        client.first_seen,
        crate::state::umode::to_string(client.umodes()),
        client.username.read(),
        client.host.read(),
        client.sockhost,
        client.uid,
        client.orig_host.read(),
        account,
        client.gecos.read()
    );
    ctx.servers
        .send_to_matching("*", ctx.server_caps.euid, None, &line);
}
