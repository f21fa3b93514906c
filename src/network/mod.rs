//! Sockets: listeners, per-connection tasks, TLS service.

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{exit_client, run_client, Accepted};
pub use listener::{connect_to_peer, run_plain_listener, run_server_listener, run_tls_listener};
pub use tls::{spawn_tls_service, Restart, SpinGuard, TlsHandle};
