//! TLS acceptor service and its supervisor.
//!
//! TLS handshakes run in a dedicated service task the listener talks to
//! over a channel, mirroring how the old tree kept handshakes out of the
//! main loop in a helper it could restart. The supervisor respawns a dead
//! service; respawning more than 20 times within 5 seconds trips a spin
//! guard that defers further restarts for a minute and tells the opers.

use std::io::BufReader;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use crate::config::TlsConfig;
use crate::context::CoreContext;
use crate::send::{self, NoticeScope};
use crate::state::snomask;

/// Restart budget: more than this many respawns inside the window spins.
const SPIN_COUNT: u32 = 20;
const SPIN_WINDOW_SECS: i64 = 5;
const SPIN_HOLDOFF_SECS: i64 = 60;

/// Decision for one service restart attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restart {
    Proceed,
    /// Spinning; next attempt allowed at the given instant.
    Deferred(i64),
}

/// Tracks restart frequency.
#[derive(Debug, Default)]
pub struct SpinGuard {
    count: u32,
    last: i64,
    wait_until: i64,
}

impl SpinGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_restart(&mut self, now: i64) -> Restart {
        if self.wait_until > now {
            return Restart::Deferred(self.wait_until);
        }
        if now - self.last < SPIN_WINDOW_SECS {
            self.count += 1;
        } else {
            self.count = 1;
        }
        self.last = now;
        if self.count > SPIN_COUNT {
            self.count = 0;
            self.wait_until = now + SPIN_HOLDOFF_SECS;
            return Restart::Deferred(self.wait_until);
        }
        Restart::Proceed
    }
}

/// One handshake job for the service.
struct AcceptJob {
    stream: TcpStream,
    reply: oneshot::Sender<std::io::Result<(TlsStream<TcpStream>, Option<String>)>>,
}

/// Handle the listener uses to hand sockets to the TLS service.
#[derive(Clone)]
pub struct TlsHandle {
    tx: mpsc::Sender<AcceptJob>,
}

impl TlsHandle {
    /// Run the handshake; returns the wrapped stream and the peer
    /// certificate's sha256 fingerprint when one was presented.
    pub async fn accept(
        &self,
        stream: TcpStream,
    ) -> std::io::Result<(TlsStream<TcpStream>, Option<String>)> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AcceptJob { stream, reply })
            .await
            .map_err(|_| std::io::Error::other("tls service unavailable"))?;
        rx.await
            .map_err(|_| std::io::Error::other("tls service dropped the job"))?
    }
}

fn load_server_config(tls: &TlsConfig) -> anyhow::Result<Arc<ServerConfig>> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(
        std::fs::File::open(&tls.cert_path)?,
    ))
    .collect::<Result<_, _>>()?;
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(
        std::fs::File::open(&tls.key_path)?,
    ))?
    .ok_or_else(|| anyhow::anyhow!("no private key in {}", tls.key_path))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

async fn service_loop(acceptor: TlsAcceptor, mut rx: mpsc::Receiver<AcceptJob>) {
    while let Some(job) = rx.recv().await {
        let result = acceptor.accept(job.stream).await.map(|stream| {
            let certfp = stream
                .get_ref()
                .1
                .peer_certificates()
                .and_then(|certs| certs.first())
                .map(|cert| {
                    let digest = Sha256::digest(cert.as_ref());
                    digest.iter().map(|b| format!("{b:02x}")).collect::<String>()
                });
            (stream, certfp)
        });
        let _ = job.reply.send(result);
    }
}

/// Start the supervised TLS service. The returned handle stays valid
/// across service restarts.
pub fn spawn_tls_service(ctx: Arc<CoreContext>, tls: &TlsConfig) -> anyhow::Result<TlsHandle> {
    let server_config = load_server_config(tls)?;
    let (tx, rx) = mpsc::channel::<AcceptJob>(64);
    let handle = TlsHandle { tx: tx.clone() };

    tokio::spawn(supervise(ctx, server_config, rx));
    Ok(handle)
}

async fn supervise(
    ctx: Arc<CoreContext>,
    server_config: Arc<ServerConfig>,
    mut rx: mpsc::Receiver<AcceptJob>,
) {
    let mut guard = SpinGuard::new();
    loop {
        let acceptor = TlsAcceptor::from(server_config.clone());
        // take ownership of the queue for this incarnation
        let (service_tx, service_rx) = mpsc::channel::<AcceptJob>(64);
        let worker = tokio::spawn(service_loop(acceptor, service_rx));

        // pump jobs until the service dies; a failed hand-off means the
        // worker's queue is gone
        loop {
            match rx.recv().await {
                Some(job) => {
                    if service_tx.send(job).await.is_err() {
                        break;
                    }
                }
                None => {
                    worker.abort();
                    return;
                }
            }
        }

        let _ = worker.await;
        crate::metrics::TLS_SERVICE_RESTARTS.inc();
        error!("TLS service died");
        send::sendto_realops(
            &ctx,
            snomask::GENERAL,
            NoticeScope::Netwide,
            "ssld helper died - attempting to restart",
        );

        match guard.note_restart(ctx.now()) {
            Restart::Proceed => {
                info!("restarting TLS service");
            }
            Restart::Deferred(until) => {
                warn!(until, "TLS service is spinning, deferring restart");
                send::sendto_realops(
                    &ctx,
                    snomask::GENERAL,
                    NoticeScope::Netwide,
                    "ssld helper is spinning - will attempt to restart in 1 minute",
                );
                let wait = (until - ctx.now()).max(1) as u64;
                tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
                send::sendto_realops(
                    &ctx,
                    snomask::GENERAL,
                    NoticeScope::Netwide,
                    "Attempting to restart ssld processes",
                );
            }
        }
    }
}
