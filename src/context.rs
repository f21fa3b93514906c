//! The core context: every process-wide table behind one handle.
//!
//! The old tree kept these as free globals with init/teardown bracketing
//! main(). Here they live in one `Arc<CoreContext>` threaded through
//! handlers and tasks. Rehash swaps the config-derived parts in place; a
//! pending-rehash notice makes the swap happen between commands, never
//! inside one.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::{broadcast, Notify};
use tracing::{info, warn};

use crate::access::{
    find_resv, flags, AddressTable, Class, ConfItem, ConfKind, ClassTable, PropBans, RejectCache,
    TempBans,
};
use crate::caps::{ClientCaps, ServerCaps};
use crate::config::Config;
use crate::db::BanDb;
use crate::hooks::Hooks;
use crate::policy::msgid::MsgidGenerator;
use crate::s2s::ServerList;
use crate::security::{FloodSettings, RateLimitManager};
use crate::state::{ChannelTable, ClientTable, UidGenerator};

/// Immutable identity of this server.
#[derive(Debug, Clone)]
pub struct ServerIdent {
    pub name: String,
    pub sid: String,
    pub network: String,
    pub description: String,
}

pub struct CoreContext {
    pub me: ServerIdent,
    pub config: RwLock<Arc<Config>>,
    pub config_path: String,

    pub clients: ClientTable,
    pub channels: ChannelTable,
    pub classes: ClassTable,
    pub atable: AddressTable,
    pub temp_bans: TempBans,
    pub prop_bans: PropBans,
    pub reject_cache: RejectCache,
    pub servers: ServerList,

    pub client_caps: ClientCaps,
    pub server_caps: ServerCaps,
    pub hooks: Hooks,

    pub uid_gen: UidGenerator,
    pub msgids: MsgidGenerator,
    pub ratelimit: RateLimitManager,
    pub flood: RwLock<FloodSettings>,

    pub bandb: Option<BanDb>,

    pub start_time: i64,
    started: Instant,
    /// Highest concurrent local client count, for LUSERS.
    pub max_local: AtomicI64,

    pub rehash_notify: Notify,
    pub shutdown_tx: broadcast::Sender<()>,

    /// Set once at startup; lets STATS m read the dispatch counters.
    pub registry: std::sync::OnceLock<Arc<crate::handlers::Registry>>,
}

impl CoreContext {
    pub fn new(config: Config, config_path: String, bandb: Option<BanDb>) -> Arc<CoreContext> {
        let (shutdown_tx, _) = broadcast::channel(8);
        let ctx = Arc::new(CoreContext {
            me: ServerIdent {
                name: config.serverinfo.name.clone(),
                sid: config.serverinfo.sid.clone(),
                network: config.serverinfo.network_name.clone(),
                description: config.serverinfo.description.clone(),
            },
            classes: ClassTable::from_config(&config.class),
            flood: RwLock::new(FloodSettings::from_config(&config.general)),
            ratelimit: RateLimitManager::new(&config.general),
            uid_gen: UidGenerator::new(config.serverinfo.sid.clone()),
            config: RwLock::new(Arc::new(config)),
            config_path,
            clients: ClientTable::new(),
            channels: ChannelTable::new(),
            atable: AddressTable::new(),
            temp_bans: TempBans::new(),
            prop_bans: PropBans::new(),
            reject_cache: RejectCache::new(),
            servers: ServerList::new(),
            client_caps: ClientCaps::register(),
            server_caps: ServerCaps::register(),
            hooks: Hooks::new(),
            msgids: MsgidGenerator::new(),
            bandb,
            start_time: chrono::Utc::now().timestamp(),
            started: Instant::now(),
            max_local: AtomicI64::new(0),
            rehash_notify: Notify::new(),
            shutdown_tx,
            registry: std::sync::OnceLock::new(),
        });
        ctx.load_conf_records();
        ctx
    }

    /// Current epoch seconds.
    pub fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Monotonic seconds since startup, for decay computations.
    pub fn mono_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn uptime_secs(&self) -> i64 {
        self.started.elapsed().as_secs() as i64
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.read().clone()
    }

    /// Build the address-index records the config file declares: auth
    /// blocks, D-line exemptions, reservations.
    fn load_conf_records(&self) {
        let config = self.config();
        for auth in &config.auth {
            let (user, host) = solanum_proto::wildcard::split_user_host(&auth.user);
            let mut conf = ConfItem::new(
                ConfKind::Client,
                Some(user.to_string()),
                host.to_string(),
                String::new(),
            );
            conf.class_name = Some(auth.class.clone());
            conf.password = auth.password.clone();
            conf.spoof = auth.spoof.clone();
            conf.auth_user = auth.auth_user.clone();
            conf.redir_serv = auth.redirserv.clone();
            conf.redir_port = auth.redirport;
            let conf = Arc::new(conf);
            for flag in &auth.flags {
                match flag.as_str() {
                    "encrypted" => conf.set_flag(flags::ENCRYPTED),
                    "need_ssl" => conf.set_flag(flags::NEED_SSL),
                    "exceed_limit" => conf.set_flag(flags::EXEMPT_LIMITS),
                    "kline_exempt" => conf.set_flag(flags::EXEMPT_KLINE),
                    "spoof_notice" => {}
                    "no_tilde" => conf.set_flag(flags::NO_TILDE),
                    other => warn!(flag = other, mask = %auth.user, "unknown auth flag"),
                }
            }
            self.atable.add(conf);
        }

        for exempt in &config.exempt {
            self.atable.add(Arc::new(ConfItem::new(
                ConfKind::Exempt,
                None,
                exempt.clone(),
                String::new(),
            )));
        }

        for resv in &config.resv {
            let kind = if solanum_proto::casemap::is_channel_name(&resv.mask) {
                ConfKind::ResvChannel
            } else {
                ConfKind::ResvNick
            };
            if find_resv(&self.atable, &resv.mask).is_none() {
                self.atable.add(Arc::new(ConfItem::new(
                    kind,
                    None,
                    resv.mask.clone(),
                    resv.reason.clone(),
                )));
            }
        }
    }

    /// Replay persisted bans into the live index at startup.
    pub fn install_stored_bans(&self, bans: &[crate::db::StoredBan]) {
        for ban in bans {
            self.atable.add(Arc::new(ban.to_conf()));
        }
    }

    /// Ask for a rehash at the next safe point.
    pub fn request_rehash(&self) {
        self.rehash_notify.notify_one();
    }

    /// Reload the config file and swap the derived state. Runs only from
    /// the maintenance task, between commands.
    pub fn rehash(&self) -> anyhow::Result<()> {
        let config = Config::load(&self.config_path)?;
        if let Err(errors) = crate::config::validate(&config) {
            for error in &errors {
                warn!(error = %error, "rehash: validation failed");
            }
            anyhow::bail!("rehash aborted: {} config error(s)", errors.len());
        }

        self.hooks.conf_read_start.call(self, &mut ());

        // drop config-derived records; oper-set and propagated bans stay
        self.atable.remove_where(|conf| {
            !conf.is_temporary()
                && !conf.is_propagated()
                && !conf.has_flag(flags::MYOPER)
                && matches!(
                    conf.kind,
                    ConfKind::Client
                        | ConfKind::Exempt
                        | ConfKind::Secure
                        | ConfKind::ResvNick
                        | ConfKind::ResvChannel
                )
        });

        self.classes.reload(&config.class);
        *self.flood.write() = FloodSettings::from_config(&config.general);
        *self.config.write() = Arc::new(config);
        self.load_conf_records();

        self.hooks.conf_read_end.call(self, &mut ());
        info!("Configuration rehashed");
        Ok(())
    }

    /// Attach a client's auth conf and class; the counters stay balanced
    /// by the matching detach in the exit path.
    pub fn attach_conf(
        &self,
        client: &crate::state::Client,
        conf: &Arc<ConfItem>,
    ) -> Result<Arc<Class>, crate::access::AttachError> {
        let class_name = conf.class_name.as_deref().unwrap_or("default");
        let class = self
            .classes
            .get(class_name)
            .unwrap_or_else(|| {
                self.classes
                    .get("default")
                    .expect("default class always present")
            });
        let exempt = conf.has_flag(flags::EXEMPT_LIMITS);
        if let Some(ip) = client.ip {
            class.try_attach(ip, exempt)?;
        }
        conf.attach();
        *client.att_conf.write() = Some(conf.clone());
        *client.att_class.write() = Some(class.clone());
        if let Some(link) = &client.link {
            link.sendq_cap.store(class.sendq, Ordering::Release);
        }
        Ok(class)
    }

    /// Detach on exit; the last reference to an illegal conf frees it.
    pub fn detach_conf(&self, client: &crate::state::Client) {
        if let Some(conf) = client.att_conf.write().take() {
            conf.detach();
        }
        if let Some(class) = client.att_class.write().take() {
            if let Some(ip) = client.ip {
                class.detach(ip);
            }
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// A context over an in-memory config, for unit tests.
    pub fn test_context() -> Arc<CoreContext> {
        let config: Config = toml::from_str(
            r##"
            [serverinfo]
            name = "irc.test.net"
            sid = "42X"
            description = "test"
            network_name = "TestNet"

            [listen]
            port = 6667

            [[auth]]
            user = "*@*"
            class = "default"

            [quarantine]
            allow_channels = ["#help"]
            "##,
        )
        .unwrap();
        CoreContext::new(config, "/dev/null".to_string(), None)
    }
}
