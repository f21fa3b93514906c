//! The per-connection task.
//!
//! Owns the socket, the framed reader, the writer task draining the send
//! queue, the flood counter and the ping timer. This is the only place a
//! local client is destroyed: handlers signal a fatal condition by
//! returning `HandlerError::Exit`, and everything funnels through
//! `exit_client` exactly once.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use solanum_proto::codec::{FramedLine, LineCodec};
use solanum_proto::{MsgBuf, ParseError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info};

use crate::context::CoreContext;
use crate::error::HandlerError;
use crate::handlers::{Registry, SourceState};
use crate::hooks::MessageTag;
use crate::security::{FloodCounter, FloodVerdict};
use crate::send;
use crate::state::{cflags, Client, LocalLink};

/// Facts the listener learned before spawning the task.
pub struct Accepted {
    pub ip: std::net::IpAddr,
    pub listen_port: u16,
    pub tls: bool,
    pub certfp: Option<String>,
}

/// Drive one client connection to completion.
pub async fn run_client<S>(
    ctx: Arc<CoreContext>,
    registry: Arc<Registry>,
    stream: S,
    accepted: Accepted,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FramedRead::new(read_half, LineCodec::new());
    let mut writer = FramedWrite::new(write_half, LineCodec::new());

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let (link, queued_bytes) = LocalLink::new(tx, accepted.listen_port, accepted.tls);
    let client = Arc::new(Client::local(
        ctx.uid_gen.next(),
        accepted.ip,
        link,
        ctx.now(),
    ));
    if accepted.tls {
        client.set_flag(cflags::SECURE);
    }
    if let Some(certfp) = accepted.certfp {
        *client.certfp.write() = Some(certfp);
    }
    // secure {} blocks treat matching plaintext networks as TLS
    if ctx.atable.find_secure(accepted.ip).is_some() {
        client.set_flag(cflags::SECURE);
    }
    ctx.clients.insert(client.clone());
    crate::metrics::CONNECTIONS_TOTAL.inc();

    // writer task: drains the send queue onto the socket
    let writer_client = client.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            queued_bytes.fetch_sub(line.len() + 2, Ordering::AcqRel);
            if writer.send(line).await.is_err() {
                writer_client.set_flag(cflags::DEAD);
                break;
            }
        }
        let _ = writer.flush().await;
    });

    let mut flood = FloodCounter::new();
    let mut shutdown_rx = ctx.shutdown_tx.subscribe();
    let mut tick = tokio::time::interval(Duration::from_secs(5));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut ping_sent = false;

    let reason: String = loop {
        tokio::select! {
            line = reader.next() => {
                match line {
                    Some(Ok(framed)) => {
                        match process_line(&ctx, &registry, &client, framed, &mut flood).await {
                            Ok(()) => {}
                            Err(HandlerError::Exit(reason)) => break reason,
                            Err(_) => unreachable!("process_line maps non-exit errors"),
                        }
                        if client.is_dead() {
                            break "Write error".to_string();
                        }
                    }
                    Some(Err(_)) | None => break "Connection closed".to_string(),
                }
            }
            _ = tick.tick() => {
                if client.is_dead() {
                    break "Closed".to_string();
                }
                if let Some(reason) = check_timers(&ctx, &client, &mut ping_sent) {
                    break reason;
                }
            }
            _ = shutdown_rx.recv() => break "Server shutting down".to_string(),
        }
    };

    exit_client(&ctx, &client, &reason);
    // let the queue drain briefly, then drop the writer
    tokio::time::sleep(Duration::from_millis(100)).await;
    writer_task.abort();
}

/// Idle bookkeeping: registration timeout and ping probing.
fn check_timers(ctx: &CoreContext, client: &Client, ping_sent: &mut bool) -> Option<String> {
    let now = ctx.now();
    let idle = now - client.last_ping.load(Ordering::Acquire);

    if !client.is_registered() {
        let timeout = ctx.config().general.registration_timeout as i64;
        if now - client.first_seen > timeout {
            return Some("Registration timeout".to_string());
        }
        return None;
    }

    let ping_freq = client
        .att_class
        .read()
        .as_ref()
        .map(|class| class.ping_frequency as i64)
        .unwrap_or(180);

    if idle > ping_freq * 2 {
        return Some(format!("Ping timeout: {idle} seconds"));
    }
    if idle > ping_freq && !*ping_sent {
        let ping = MsgBuf::new("PING").with_param(&ctx.me.name);
        send::deliver(client, &ping);
        *ping_sent = true;
    }
    if idle <= ping_freq {
        *ping_sent = false;
    }
    None
}

/// Frame → flood check → parse → tag policy → dispatch. Every error except
/// `Exit` is converted to its numeric here.
async fn process_line(
    ctx: &Arc<CoreContext>,
    registry: &Arc<Registry>,
    client: &Arc<Client>,
    framed: FramedLine,
    flood: &mut FloodCounter,
) -> Result<(), HandlerError> {
    if framed.truncated {
        reply_error(ctx, client, &HandlerError::InputTooLong, "");
        return Ok(());
    }

    // opers are exempt from flood scoring
    if !client.is_oper() {
        let settings = ctx.flood.read().clone();
        match flood.note_line(ctx.mono_secs(), &settings) {
            FloodVerdict::Ok => {}
            FloodVerdict::Defer(wait) => {
                // reads stop; the kernel buffer throttles the peer
                tokio::time::sleep(wait).await;
            }
            FloodVerdict::Fatal => {
                crate::metrics::FLOOD_DISCONNECTS.inc();
                return Err(HandlerError::Exit("Excess Flood".to_string()));
            }
        }
    }

    let mut msg = match MsgBuf::parse(&framed.text) {
        Ok(msg) => msg,
        Err(ParseError::EmptyLine) => return Ok(()),
        Err(ParseError::InputTooLong) => {
            reply_error(ctx, client, &HandlerError::InputTooLong, "");
            return Ok(());
        }
        Err(error) => {
            debug!(error = %error, "unparseable line dropped");
            return Ok(());
        }
    };

    // inbound tag policy: clients may only offer client-only tags, which
    // the messaging path re-validates against the supported set
    msg.tags.retain(|tag| tag.key.starts_with('+'));
    client.last_ping.store(ctx.now(), Ordering::Release);

    let state = if client.has_flag(cflags::SERVER) {
        SourceState::Server
    } else if client.is_registered() {
        SourceState::Client
    } else {
        SourceState::Unregistered
    };

    match registry
        .dispatch(ctx, client, &msg, state, framed.text.len())
        .await
    {
        Ok(()) => Ok(()),
        Err(exit @ HandlerError::Exit(_)) => Err(exit),
        Err(error) => {
            crate::metrics::HANDLER_ERRORS
                .with_label_values(&[error.error_code()])
                .inc();
            reply_error(ctx, client, &error, &msg.command);
            Ok(())
        }
    }
}

fn reply_error(ctx: &CoreContext, client: &Client, error: &HandlerError, command: &str) {
    let nick = client.nick.read().clone();
    if let Some(reply) = error.to_numeric(&ctx.me.name, &nick, command) {
        send::deliver(client, &reply);
    }
}

/// Tear a client down: the unique destruction point.
pub fn exit_client(ctx: &CoreContext, client: &Arc<Client>, reason: &str) {
    if client.has_flag(cflags::KILLED) {
        return;
    }
    client.set_flag(cflags::KILLED);

    let was_registered = client.is_registered() && client.is_person();
    client.set_flag(cflags::DEAD);

    if was_registered {
        let quit = MsgBuf::new("QUIT").with_source(client.mask()).with_param(reason);
        let names: Vec<String> = client.channels.read().clone();
        for name in names {
            if let Some(channel) = ctx.channels.get(&name) {
                channel.members.remove(&client.uid);
                send::sendto_channel(ctx, &channel, Some(client), quit.clone(), Some(&client.uid));
                ctx.channels.remove_if_empty(&name);
            }
        }
        ctx.servers.send_to_matching(
            "*",
            0,
            None,
            &format!(":{} QUIT :{}", client.uid, reason),
        );
        info!(nick = %client.nick.read(), uid = %client.uid, reason, "client exiting");
    }

    let farewell = MsgBuf::new("ERROR").with_param(format!("Closing Link: {reason}"));
    if let Some(link) = &client.link {
        let _ = link.push(farewell.serialize(0));
    }

    ctx.detach_conf(client);
    ctx.ratelimit.remove_client(&client.uid);
    ctx.clients.remove(client);
    crate::metrics::CLIENTS.set(ctx.clients.len() as i64);
}

/// Fire the message_tag hook for a tag arriving on a server link; returns
/// the capmask it may ride out with, or None when disallowed.
pub fn approve_server_tag(ctx: &CoreContext, key: &str, value: Option<&str>) -> Option<u64> {
    let mut payload = MessageTag {
        key: key.to_string(),
        value: value.map(String::from),
        from_server: true,
        capmask: 0,
        approved: false,
    };
    ctx.hooks.message_tag.call(ctx, &mut payload);
    payload.approved.then_some(payload.capmask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::test_context;

    #[test]
    fn test_exit_client_is_idempotent_and_detaches() {
        let ctx = test_context();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (link, _) = LocalLink::new(tx, 6667, false);
        let client = Arc::new(Client::local(
            ctx.uid_gen.next(),
            "127.0.0.1".parse().unwrap(),
            link,
            0,
        ));
        ctx.clients.insert(client.clone());
        let conf = ctx
            .atable
            .find_client_conf(None, "127.0.0.1", "u", "127.0.0.1".parse().unwrap(), None)
            .unwrap();
        ctx.attach_conf(&client, &conf).unwrap();

        exit_client(&ctx, &client, "test");
        assert!(client.is_dead());
        assert!(ctx.clients.by_uid(&client.uid).is_none());
        assert_eq!(conf.attached_count(), 0);
        // second call is a no-op
        exit_client(&ctx, &client, "again");
    }

    #[test]
    fn test_server_tag_approval_via_hook() {
        let ctx = test_context();
        crate::policy::register_all(&ctx);
        let mask = approve_server_tag(&ctx, "msgid", Some("1xyz"));
        assert_eq!(mask, Some(ctx.client_caps.message_tags));
        assert_eq!(approve_server_tag(&ctx, "secret-internal", None), None);
    }
}
