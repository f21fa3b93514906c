//! Command dispatch.
//!
//! One table entry per command, with a gate per source state: a command
//! may be handled, silently ignored, or answered with the not-registered
//! numeric depending on who sent it. Per-command counters feed STATS m.

pub mod bans;
pub mod cap;
pub mod channel;
pub mod connection;
pub mod messaging;
pub mod oper;
pub mod quarantine;
pub mod register;
pub mod s2s_cmds;
pub mod stats;
pub mod testline;
pub mod whois;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use solanum_proto::MsgBuf;
use tracing::debug;

use crate::context::CoreContext;
use crate::error::{HandlerError, HandlerResult};
use crate::state::Client;

/// One command handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
    ) -> HandlerResult;
}

/// What a source state may do with a command.
pub enum Gate {
    /// Reply ERR_NOTREGISTERED.
    NotRegistered,
    /// Drop silently (servers and pre-registration noise).
    Ignore,
    /// Dispatch with a minimum parameter count.
    Handled(Arc<dyn Handler>, usize),
}

impl Gate {
    fn handled(handler: Arc<dyn Handler>, min_params: usize) -> Gate {
        Gate::Handled(handler, min_params)
    }
}

/// A command and its per-state gates.
pub struct CommandEntry {
    pub unregistered: Gate,
    pub client: Gate,
    pub server: Gate,
    /// Checked before `client` for opers; `Ignore` falls through.
    pub oper: Gate,
}

impl CommandEntry {
    fn new() -> CommandEntry {
        CommandEntry {
            unregistered: Gate::NotRegistered,
            client: Gate::Ignore,
            server: Gate::Ignore,
            oper: Gate::Ignore,
        }
    }
}

#[derive(Default)]
struct CommandStats {
    count: AtomicU64,
    bytes: AtomicU64,
    rcount: AtomicU64,
}

/// The dispatch table.
pub struct Registry {
    commands: HashMap<&'static str, CommandEntry>,
    stats: HashMap<&'static str, CommandStats>,
}

/// Which table a source dispatches through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Unregistered,
    Client,
    Server,
}

impl Registry {
    pub fn new() -> Registry {
        let mut registry = Registry {
            commands: HashMap::new(),
            stats: HashMap::new(),
        };

        // registration
        registry.both_states("NICK", Arc::new(connection::NickHandler), 1);
        registry.both_states("USER", Arc::new(connection::UserHandler), 4);
        registry.unreg_only("PASS", Arc::new(connection::PassHandler), 1);
        registry.unreg_only("WEBIRC", Arc::new(connection::WebircHandler), 4);
        registry.both_states("CAP", Arc::new(cap::CapHandler), 1);
        registry.any_state("PING", Arc::new(connection::PingHandler), 1);
        registry.any_state("PONG", Arc::new(connection::PongHandler), 0);
        registry.any_state("QUIT", Arc::new(connection::QuitHandler), 0);

        // messaging
        registry.client_only("PRIVMSG", Arc::new(messaging::PrivmsgHandler), 2);
        registry.client_only("NOTICE", Arc::new(messaging::NoticeHandler), 2);

        // channels
        registry.client_only("JOIN", Arc::new(channel::JoinHandler), 1);
        registry.client_only("PART", Arc::new(channel::PartHandler), 1);
        registry.client_only("NAMES", Arc::new(channel::NamesHandler), 1);
        registry.client_only("MODE", Arc::new(channel::ModeHandler), 1);
        registry.client_only("AWAY", Arc::new(connection::AwayHandler), 0);

        // queries
        registry.client_only("WHOIS", Arc::new(whois::WhoisHandler), 1);
        registry.client_only("STATS", Arc::new(stats::StatsHandler), 1);
        registry.client_only("MOTD", Arc::new(connection::MotdHandler), 0);

        // operator
        registry.client_only("OPER", Arc::new(oper::OperHandler), 2);
        registry.oper_only("REHASH", Arc::new(oper::RehashHandler), 0);
        registry.oper_only("DIE", Arc::new(oper::DieHandler), 0);
        registry.oper_only("KLINE", Arc::new(bans::KlineHandler), 2);
        registry.oper_only("UNKLINE", Arc::new(bans::UnklineHandler), 1);
        registry.oper_only("DLINE", Arc::new(bans::DlineHandler), 2);
        registry.oper_only("UNDLINE", Arc::new(bans::UndlineHandler), 1);
        registry.oper_only("XLINE", Arc::new(bans::XlineHandler), 2);
        registry.oper_only("UNXLINE", Arc::new(bans::UnxlineHandler), 1);
        registry.oper_only("RESV", Arc::new(bans::ResvHandler), 2);
        registry.oper_only("UNRESV", Arc::new(bans::UnresvHandler), 1);
        registry.oper_only("TESTLINE", Arc::new(testline::TestlineHandler), 1);
        registry.oper_only("TESTKLINE", Arc::new(testline::TestklineHandler), 1);
        registry.oper_only("TESTGECOS", Arc::new(testline::TestgecosHandler), 1);
        registry.oper_only("QUARANTINE", Arc::new(quarantine::QuarantineHandler), 2);
        registry.oper_only("UNQUARANTINE", Arc::new(quarantine::UnquarantineHandler), 1);

        // server-to-server
        registry.server_cmd("BAN", Arc::new(s2s_cmds::BanHandler), 8);
        registry.server_cmd("ENCAP", Arc::new(s2s_cmds::EncapHandler), 2);
        registry.server_cmd("EUID", Arc::new(s2s_cmds::EuidHandler), 11);
        registry.server_cmd("KLINE", Arc::new(s2s_cmds::RemoteKlineHandler), 5);
        registry.server_cmd("UNKLINE", Arc::new(s2s_cmds::RemoteUnklineHandler), 3);
        registry.server_cmd("QUIT", Arc::new(s2s_cmds::RemoteQuitHandler), 0);
        registry.server_cmd("SQUIT", Arc::new(s2s_cmds::SquitHandler), 1);
        registry.server_cmd("PING", Arc::new(connection::PingHandler), 1);
        registry.server_cmd("PONG", Arc::new(connection::PongHandler), 0);

        registry
    }

    fn entry(&mut self, name: &'static str) -> &mut CommandEntry {
        self.stats.entry(name).or_default();
        self.commands.entry(name).or_insert_with(CommandEntry::new)
    }

    /// Valid before and after registration.
    fn both_states(&mut self, name: &'static str, h: Arc<dyn Handler>, min: usize) {
        let entry = self.entry(name);
        entry.unregistered = Gate::handled(h.clone(), min);
        entry.client = Gate::handled(h, min);
    }

    /// Valid in every state including server links.
    fn any_state(&mut self, name: &'static str, h: Arc<dyn Handler>, min: usize) {
        let entry = self.entry(name);
        entry.unregistered = Gate::handled(h.clone(), min);
        entry.client = Gate::handled(h.clone(), min);
        entry.server = Gate::handled(h, min);
    }

    fn unreg_only(&mut self, name: &'static str, h: Arc<dyn Handler>, min: usize) {
        let entry = self.entry(name);
        entry.unregistered = Gate::handled(h, min);
        entry.client = Gate::Ignore;
    }

    fn client_only(&mut self, name: &'static str, h: Arc<dyn Handler>, min: usize) {
        self.entry(name).client = Gate::handled(h, min);
    }

    fn oper_only(&mut self, name: &'static str, h: Arc<dyn Handler>, min: usize) {
        self.entry(name).oper = Gate::handled(h, min);
    }

    fn server_cmd(&mut self, name: &'static str, h: Arc<dyn Handler>, min: usize) {
        self.entry(name).server = Gate::handled(h, min);
    }

    /// Dispatch one parsed message.
    pub async fn dispatch(
        &self,
        ctx: &Arc<CoreContext>,
        client: &Arc<Client>,
        msg: &MsgBuf,
        state: SourceState,
        wire_len: usize,
    ) -> HandlerResult {
        let name = msg.command.to_ascii_uppercase();
        let Some(entry) = self.commands.get(name.as_str()) else {
            if state == SourceState::Server {
                debug!(command = %name, "unknown server command dropped");
                return Ok(());
            }
            crate::metrics::HANDLER_ERRORS
                .with_label_values(&["unknown_command"])
                .inc();
            return Err(HandlerError::UnknownCommand(name));
        };

        if let Some(stats) = self.stats.get(name.as_str()) {
            stats.count.fetch_add(1, Ordering::Relaxed);
            stats.bytes.fetch_add(wire_len as u64, Ordering::Relaxed);
            if state == SourceState::Server {
                stats.rcount.fetch_add(1, Ordering::Relaxed);
            }
        }
        crate::metrics::COMMANDS_TOTAL
            .with_label_values(&[name.as_str()])
            .inc();

        let gate = match state {
            SourceState::Unregistered => &entry.unregistered,
            SourceState::Server => &entry.server,
            SourceState::Client => {
                if client.is_oper() && matches!(entry.oper, Gate::Handled(..)) {
                    &entry.oper
                } else if matches!(entry.client, Gate::Ignore)
                    && matches!(entry.oper, Gate::Handled(..))
                {
                    // oper-only command from a plain user
                    return Err(HandlerError::NoPrivileges);
                } else {
                    &entry.client
                }
            }
        };

        match gate {
            Gate::NotRegistered => Err(HandlerError::NotRegistered),
            Gate::Ignore => Ok(()),
            Gate::Handled(handler, min_params) => {
                if msg.params.len() < *min_params {
                    return Err(HandlerError::NeedMoreParams);
                }
                handler.handle(ctx, client, msg).await
            }
        }
    }

    /// Per-command counters for STATS m.
    pub fn command_stats(&self) -> Vec<(&'static str, u64, u64, u64)> {
        let mut out: Vec<_> = self
            .stats
            .iter()
            .map(|(name, s)| {
                (
                    *name,
                    s.count.load(Ordering::Relaxed),
                    s.bytes.load(Ordering::Relaxed),
                    s.rcount.load(Ordering::Relaxed),
                )
            })
            .collect();
        out.sort_by_key(|(name, ..)| *name);
        out
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::test_context;
    use crate::state::{cflags, LocalLink};
    use tokio::sync::mpsc;

    fn client(ctx: &Arc<CoreContext>) -> Arc<Client> {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (link, _) = LocalLink::new(tx, 6667, false);
        let c = Arc::new(Client::local(
            ctx.uid_gen.next(),
            "127.0.0.1".parse().unwrap(),
            link,
            0,
        ));
        ctx.clients.insert(c.clone());
        c
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let ctx = test_context();
        let registry = Registry::new();
        let c = client(&ctx);
        c.set_flag(cflags::REGISTERED);
        let msg = MsgBuf::parse("FROBNICATE x").unwrap();
        let err = registry
            .dispatch(&ctx, &c, &msg, SourceState::Client, 12)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::UnknownCommand(_)));
    }

    #[tokio::test]
    async fn test_registered_command_from_unregistered() {
        let ctx = test_context();
        let registry = Registry::new();
        let c = client(&ctx);
        let msg = MsgBuf::parse("PRIVMSG #c :hi").unwrap();
        let err = registry
            .dispatch(&ctx, &c, &msg, SourceState::Unregistered, 14)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::NotRegistered));
    }

    #[tokio::test]
    async fn test_oper_command_from_plain_user() {
        let ctx = test_context();
        let registry = Registry::new();
        let c = client(&ctx);
        c.set_flag(cflags::REGISTERED | cflags::PERSON);
        let msg = MsgBuf::parse("KLINE 60 *@bad.host :r").unwrap();
        let err = registry
            .dispatch(&ctx, &c, &msg, SourceState::Client, 20)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::NoPrivileges));
    }

    #[tokio::test]
    async fn test_min_params_enforced() {
        let ctx = test_context();
        let registry = Registry::new();
        let c = client(&ctx);
        let msg = MsgBuf::parse("USER onlyone").unwrap();
        let err = registry
            .dispatch(&ctx, &c, &msg, SourceState::Unregistered, 13)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::NeedMoreParams));
    }

    #[tokio::test]
    async fn test_stats_accumulate() {
        let ctx = test_context();
        let registry = Registry::new();
        let c = client(&ctx);
        let msg = MsgBuf::parse("PING :token").unwrap();
        let _ = registry
            .dispatch(&ctx, &c, &msg, SourceState::Unregistered, 11)
            .await;
        let stats = registry.command_stats();
        let ping = stats.iter().find(|(n, ..)| *n == "PING").unwrap();
        assert_eq!(ping.1, 1);
        assert_eq!(ping.2, 11);
        assert_eq!(ping.3, 0);
    }
}
