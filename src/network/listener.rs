//! Listeners and the server-link handshake.
//!
//! Accept-time policy runs before any task spawns: reject cache, D-line,
//! per-IP connection rate. Everything else waits until registration.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use solanum_proto::codec::LineCodec;
use solanum_proto::MsgBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use super::connection::{run_client, Accepted};
use super::tls::TlsHandle;
use crate::access::ConfKind;
use crate::context::CoreContext;
use crate::handlers::{Registry, SourceState};
use crate::s2s::Server;
use crate::send::{self, NoticeScope};
use crate::state::{cflags, snomask, Client, LocalLink};

/// Accept-time policy. Returns the refusal line when the connection must
/// be cut before the handshake.
fn accept_check(ctx: &CoreContext, ip: std::net::IpAddr) -> Option<String> {
    let now = ctx.now();
    if ctx.reject_cache.check(ip, now) {
        crate::metrics::CONNECTIONS_REJECTED
            .with_label_values(&["reject_cache"])
            .inc();
        return Some("ERROR :You have been rejected too recently, wait a moment".to_string());
    }
    if let Some(conf) = ctx.atable.find_dline(ip) {
        if conf.kind == ConfKind::Dline {
            crate::metrics::CONNECTIONS_REJECTED
                .with_label_values(&["dline"])
                .inc();
            return Some(format!("ERROR :Closing Link: (D-lined: {})", conf.reason));
        }
    }
    if !ctx.ratelimit.check_connection_rate(ip) {
        crate::metrics::CONNECTIONS_REJECTED
            .with_label_values(&["throttle"])
            .inc();
        return Some("ERROR :Trying to reconnect too fast, wait a moment".to_string());
    }
    None
}

async fn refuse(stream: TcpStream, line: String) {
    let mut writer = FramedWrite::new(stream, LineCodec::new());
    let _ = writer.send(line).await;
}

/// Plaintext client listener.
pub async fn run_plain_listener(
    ctx: Arc<CoreContext>,
    registry: Arc<Registry>,
    listener: TcpListener,
    port: u16,
) {
    loop {
        let Ok((stream, peer)) = listener.accept().await else {
            continue;
        };
        if let Some(line) = accept_check(&ctx, peer.ip()) {
            tokio::spawn(refuse(stream, line));
            continue;
        }
        let ctx = ctx.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            run_client(
                ctx,
                registry,
                stream,
                Accepted {
                    ip: peer.ip(),
                    listen_port: port,
                    tls: false,
                    certfp: None,
                },
            )
            .await;
        });
    }
}

/// TLS client listener; handshakes run in the supervised TLS service.
pub async fn run_tls_listener(
    ctx: Arc<CoreContext>,
    registry: Arc<Registry>,
    listener: TcpListener,
    port: u16,
    tls: TlsHandle,
) {
    loop {
        let Ok((stream, peer)) = listener.accept().await else {
            continue;
        };
        if let Some(line) = accept_check(&ctx, peer.ip()) {
            tokio::spawn(refuse(stream, line));
            continue;
        }
        let ctx = ctx.clone();
        let registry = registry.clone();
        let tls = tls.clone();
        tokio::spawn(async move {
            match tls.accept(stream).await {
                Ok((stream, certfp)) => {
                    run_client(
                        ctx,
                        registry,
                        stream,
                        Accepted {
                            ip: peer.ip(),
                            listen_port: port,
                            tls: true,
                            certfp,
                        },
                    )
                    .await;
                }
                Err(error) => debug!(error = %error, peer = %peer, "TLS handshake failed"),
            }
        });
    }
}

/// Inbound server-link listener.
pub async fn run_server_listener(
    ctx: Arc<CoreContext>,
    registry: Arc<Registry>,
    listener: TcpListener,
) {
    loop {
        let Ok((stream, peer)) = listener.accept().await else {
            continue;
        };
        let ctx = ctx.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(error) = run_server_link(ctx, registry, stream, peer.ip(), None).await {
                warn!(error = %error, peer = %peer, "server link failed");
            }
        });
    }
}

/// Outbound connect attempt to a configured peer.
pub async fn connect_to_peer(
    ctx: Arc<CoreContext>,
    registry: Arc<Registry>,
    name: String,
    host: String,
    port: u16,
) {
    info!(server = %name, host = %host, port, "connecting to peer");
    match tokio::time::timeout(
        std::time::Duration::from_secs(30),
        TcpStream::connect((host.as_str(), port)),
    )
    .await
    {
        Ok(Ok(stream)) => {
            let ip = stream.peer_addr().map(|a| a.ip()).unwrap_or("0.0.0.0".parse().unwrap());
            if let Err(error) = run_server_link(ctx, registry, stream, ip, Some(name.clone())).await {
                warn!(server = %name, error = %error, "outbound link failed");
            }
        }
        Ok(Err(error)) => warn!(server = %name, error = %error, "connect failed"),
        Err(_) => warn!(server = %name, "connect timed out"),
    }
}

/// The TS6 link handshake and the link's dispatch loop.
///
/// PASS/CAPAB/SERVER in both directions, then the burst (our clients as
/// EUID, every live propagated ban), then ordinary dispatch with the
/// server gates.
async fn run_server_link<S>(
    ctx: Arc<CoreContext>,
    registry: Arc<Registry>,
    stream: S,
    ip: std::net::IpAddr,
    // the connect block we dialed, None for inbound links
    outbound_to: Option<String>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FramedRead::new(read_half, LineCodec::new());
    let mut writer = FramedWrite::new(write_half, LineCodec::new());

    let send_handshake = |config: Arc<crate::config::Config>, accept_password: String| {
        vec![
            format!("PASS {} TS 6 :{}", accept_password, config.serverinfo.sid),
            format!("CAPAB :{}", ctx.server_caps.capab_string()),
            format!(
                "SERVER {} 1 :{}",
                config.serverinfo.name, config.serverinfo.description
            ),
        ]
    };

    // read the peer's PASS/CAPAB/SERVER
    let mut peer_pass = None;
    let mut peer_sid = None;
    let mut peer_caps = 0u64;
    let mut peer_name = None;

    if let Some(target) = &outbound_to {
        // we speak first, with the dialed block's password
        let config = ctx.config();
        let password = config
            .connect
            .iter()
            .find(|c| solanum_proto::casemap::irccmp(&c.name, target))
            .map(|c| c.send_password.clone())
            .unwrap_or_default();
        for line in send_handshake(config, password) {
            writer.send(line).await?;
        }
    }

    while peer_sid.is_none() || peer_name.is_none() {
        let Some(Ok(framed)) = reader.next().await else {
            anyhow::bail!("link closed during handshake");
        };
        let Ok(msg) = MsgBuf::parse(&framed.text) else {
            continue;
        };
        match msg.command.to_ascii_uppercase().as_str() {
            "PASS" => {
                peer_pass = Some(msg.params[0].clone());
                peer_sid = msg.params.get(3).cloned();
            }
            "CAPAB" => {
                peer_caps = ctx.server_caps.parse_capab(&msg.params[0]);
            }
            "SERVER" => {
                peer_name = msg.params.first().cloned();
            }
            _ => {}
        }
    }

    let peer_name = peer_name.unwrap();
    let peer_sid = peer_sid.ok_or_else(|| anyhow::anyhow!("peer sent no SID"))?;

    // the connect block must exist and the password must match
    let config = ctx.config();
    let block = config
        .connect
        .iter()
        .find(|c| solanum_proto::casemap::irccmp(&c.name, &peer_name))
        .ok_or_else(|| anyhow::anyhow!("no connect block for {peer_name}"))?;
    if peer_pass.as_deref() != Some(block.accept_password.as_str()) {
        writer.send("ERROR :Invalid password".to_string()).await?;
        anyhow::bail!("bad link password from {peer_name}");
    }
    if peer_caps & ctx.server_caps.parse_capab("ENCAP EUID") == 0 {
        debug!(peer = %peer_name, "peer lacks baseline capabilities");
    }

    if outbound_to.is_none() {
        for line in send_handshake(config.clone(), block.send_password.clone()) {
            writer.send(line).await?;
        }
    }

    // register the peer
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let server = Arc::new(Server::new(peer_name.clone(), peer_sid.clone(), peer_caps, tx));
    ctx.servers.add(server.clone());

    // link client carries the SERVER flag so dispatch uses the server gates
    let (link_tx, mut link_rx) = mpsc::unbounded_channel::<String>();
    let (link, _) = LocalLink::new(link_tx, 0, false);
    let link_client = Arc::new(Client::local(peer_sid.clone(), ip, link, ctx.now()));
    link_client.set_flag(cflags::REGISTERED | cflags::SERVER);

    send::sendto_realops(
        &ctx,
        snomask::GENERAL,
        NoticeScope::Local,
        &format!("Link with {peer_name} established"),
    );
    info!(server = %peer_name, sid = %peer_sid, "server link up");

    // burst: our users, then bans
    for client in ctx.clients.all() {
        if !client.is_person() {
            continue;
        }
        let account = {
            let suser = client.suser.read();
            if suser.is_empty() { "*".to_string() } else { suser.clone() }
        };
        server.send(format!(
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
        ));
    }
    crate::s2s::ban::burst_bans(&ctx, &server);

    let mut shutdown_rx = ctx.shutdown_tx.subscribe();
    loop {
        tokio::select! {
            // peer -> us
            line = reader.next() => {
                match line {
                    Some(Ok(framed)) => {
                        if framed.truncated {
                            continue;
                        }
                        let Ok(mut msg) = MsgBuf::parse(&framed.text) else { continue };
                        // every tag off a server link needs a module's vote
                        msg.tags.retain_mut(|tag| {
                            match super::connection::approve_server_tag(
                                &ctx,
                                &tag.key,
                                tag.value.as_deref(),
                            ) {
                                Some(capmask) => {
                                    tag.capmask = capmask;
                                    true
                                }
                                None => false,
                            }
                        });
                        let result = registry
                            .dispatch(&ctx, &link_client, &msg, SourceState::Server, framed.text.len())
                            .await;
                        if let Err(crate::error::HandlerError::Exit(reason)) = result {
                            writer.send(format!("ERROR :{reason}")).await.ok();
                            break;
                        }
                    }
                    _ => break,
                }
            }
            // us -> peer
            outbound = rx.recv() => {
                match outbound {
                    Some(line) => writer.send(line).await?,
                    None => break,
                }
            }
            // replies generated against the link client
            reply = link_rx.recv() => {
                if let Some(line) = reply {
                    writer.send(line).await?;
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    ctx.servers.remove(&peer_sid);
    send::sendto_realops(
        &ctx,
        snomask::GENERAL,
        NoticeScope::Local,
        &format!("Lost link with {peer_name}"),
    );
    Ok(())
}
