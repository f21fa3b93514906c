//! Periodic maintenance tasks.
//!
//! The old tree hung these off its event ring; here each cadence is a
//! tokio interval. The rehash waiter serializes config reloads so they
//! happen between commands, never inside one.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::access::TempSlot;
use crate::context::CoreContext;
use crate::handlers::Registry;
use crate::send::{self, NoticeScope};
use crate::state::snomask;

fn interval(secs: u64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Spawn every maintenance task. Each one exits on shutdown broadcast.
pub fn spawn_all(ctx: &Arc<CoreContext>, registry: &Arc<Registry>) {
    spawn_minute_scan(ctx.clone());
    spawn_bucket_scan(ctx.clone(), TempSlot::Hour, 60 * 60);
    spawn_bucket_scan(ctx.clone(), TempSlot::Day, 24 * 60 * 60);
    spawn_bucket_scan(ctx.clone(), TempSlot::Week, 7 * 24 * 60 * 60);
    spawn_cache_pruning(ctx.clone());
    spawn_rehash_waiter(ctx.clone());
    spawn_try_connections(ctx.clone(), registry.clone());
}

/// 60-second scan: MIN-bucket expiry, propagated-ban expiry.
fn spawn_minute_scan(ctx: Arc<CoreContext>) {
    tokio::spawn(async move {
        let mut tick = interval(60);
        let mut shutdown_rx = ctx.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let now = ctx.now();
                    let expired = ctx.temp_bans.expire_min(&ctx.atable, now);
                    let notices = ctx.config().general.tkline_expire_notices;
                    for conf in &expired {
                        if notices {
                            send::sendto_realops(
                                &ctx,
                                snomask::GENERAL,
                                NoticeScope::Local,
                                &format!("Temporary ban for [{}] expired", conf.display_mask()),
                            );
                        }
                    }
                    let deactivated = ctx.prop_bans.expire(&ctx.atable, now);
                    if !expired.is_empty() || !deactivated.is_empty() {
                        info!(
                            temporary = expired.len(),
                            propagated = deactivated.len(),
                            "expired bans removed"
                        );
                    }
                    crate::metrics::BANS_ACTIVE.set(
                        (ctx.atable.all_of_kind(crate::access::ConfKind::Kline).len()
                            + ctx.atable.all_of_kind(crate::access::ConfKind::Dline).len())
                            as i64,
                    );
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    });
}

/// Hour/day/week scans demote temporary bans one bucket down.
fn spawn_bucket_scan(ctx: Arc<CoreContext>, slot: TempSlot, period_secs: u64) {
    tokio::spawn(async move {
        let mut tick = interval(period_secs);
        let mut shutdown_rx = ctx.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = tick.tick() => ctx.temp_bans.reorganize(slot, ctx.now()),
                _ = shutdown_rx.recv() => break,
            }
        }
    });
}

/// Five-minute housekeeping: reject cache and rate-limiter growth.
fn spawn_cache_pruning(ctx: Arc<CoreContext>) {
    tokio::spawn(async move {
        let mut tick = interval(300);
        let mut shutdown_rx = ctx.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let removed = ctx.reject_cache.prune(ctx.now());
                    if removed > 0 {
                        info!(removed, "reject cache pruned");
                    }
                    ctx.ratelimit.cleanup();
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    });
}

/// Performs requested rehashes between commands.
fn spawn_rehash_waiter(ctx: Arc<CoreContext>) {
    tokio::spawn(async move {
        let mut shutdown_rx = ctx.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = ctx.rehash_notify.notified() => {
                    if let Err(error) = ctx.rehash() {
                        warn!(error = %error, "rehash failed");
                        send::sendto_realops(
                            &ctx,
                            snomask::GENERAL,
                            NoticeScope::Local,
                            &format!("Rehash failed: {error}"),
                        );
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    });
}

/// Every 60 seconds, consider AUTOCONN connect blocks under class quota.
fn spawn_try_connections(ctx: Arc<CoreContext>, registry: Arc<Registry>) {
    tokio::spawn(async move {
        let mut tick = interval(60);
        let mut shutdown_rx = ctx.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let config = ctx.config();
                    for block in &config.connect {
                        if !block.autoconn {
                            continue;
                        }
                        if ctx.servers.by_name(&block.name).is_some() {
                            continue;
                        }
                        if let Some(class) = ctx.classes.get(&block.class) {
                            let max = class.max_users();
                            if max >= 0 && class.current_users() >= max {
                                continue;
                            }
                        }
                        let ctx = ctx.clone();
                        let registry = registry.clone();
                        let (name, host, port) =
                            (block.name.clone(), block.host.clone(), block.port);
                        tokio::spawn(async move {
                            crate::network::connect_to_peer(ctx, registry, name, host, port).await;
                        });
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    });
}
