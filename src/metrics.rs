//! Prometheus metrics.
//!
//! Counters are cheap enough to update unconditionally; whether anything
//! scrapes them is deployment policy.

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

lazy_static! {
    pub static ref CONNECTIONS_TOTAL: IntCounter = register_int_counter!(
        "solanumd_connections_total",
        "Connections accepted"
    )
    .unwrap();
    pub static ref CONNECTIONS_REJECTED: IntCounterVec = register_int_counter_vec!(
        "solanumd_connections_rejected_total",
        "Connections refused before registration",
        &["cause"]
    )
    .unwrap();
    pub static ref COMMANDS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "solanumd_commands_total",
        "Commands dispatched",
        &["command"]
    )
    .unwrap();
    pub static ref HANDLER_ERRORS: IntCounterVec = register_int_counter_vec!(
        "solanumd_handler_errors_total",
        "Command handler errors",
        &["code"]
    )
    .unwrap();
    pub static ref CLIENTS: IntGauge =
        register_int_gauge!("solanumd_clients", "Known clients").unwrap();
    pub static ref BANS_ACTIVE: IntGauge =
        register_int_gauge!("solanumd_bans_active", "Live ban records").unwrap();
    pub static ref FLOOD_DISCONNECTS: IntCounter = register_int_counter!(
        "solanumd_flood_disconnects_total",
        "Clients dropped for Excess Flood"
    )
    .unwrap();
    pub static ref TLS_SERVICE_RESTARTS: IntCounter = register_int_counter!(
        "solanumd_tls_service_restarts_total",
        "TLS acceptor service respawns"
    )
    .unwrap();
}

/// Touch the registry so all series exist from startup.
pub fn init() {
    CONNECTIONS_TOTAL.get();
    CLIENTS.set(0);
    BANS_ACTIVE.set(0);
}
