//! The hook bus.
//!
//! Every outbound-affecting decision flows through a named hook point with
//! a typed payload. Callbacks run in priority order, then insertion order;
//! the first callback to set a verdict owns the decision and later ones
//! conventionally defer. Monitor callbacks run last and receive the
//! payload read-only, so they cannot alter decisions by construction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use solanum_proto::MsgBuf;

use crate::context::CoreContext;
use crate::state::{Channel, Client};

/// Callback ordering classes. Monitor is not listed: monitor callbacks are
/// registered through [`HookPoint::add_monitor`] and always run last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Lowest,
    Low,
    Normal,
    High,
    Highest,
}

type Cb<T> = Box<dyn Fn(&CoreContext, &mut T) + Send + Sync>;
type MonitorCb<T> = Box<dyn Fn(&CoreContext, &T) + Send + Sync>;

/// One hook point with its ordered callback chain.
pub struct HookPoint<T> {
    entries: RwLock<Vec<(Priority, u64, Cb<T>)>>,
    monitors: RwLock<Vec<MonitorCb<T>>>,
    seq: AtomicU64,
}

impl<T> Default for HookPoint<T> {
    fn default() -> Self {
        HookPoint {
            entries: RwLock::new(Vec::new()),
            monitors: RwLock::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }
}

impl<T> HookPoint<T> {
    pub fn add<F>(&self, priority: Priority, cb: F)
    where
        F: Fn(&CoreContext, &mut T) + Send + Sync + 'static,
    {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write();
        entries.push((priority, seq, Box::new(cb)));
        entries.sort_by_key(|(p, s, _)| (*p, *s));
    }

    /// Observer that cannot mutate the payload.
    pub fn add_monitor<F>(&self, cb: F)
    where
        F: Fn(&CoreContext, &T) + Send + Sync + 'static,
    {
        self.monitors.write().push(Box::new(cb));
    }

    pub fn call(&self, ctx: &CoreContext, payload: &mut T) {
        for (_, _, cb) in self.entries.read().iter() {
            cb(ctx, payload);
        }
        for cb in self.monitors.read().iter() {
            cb(ctx, &*payload);
        }
    }
}

/// Kind of message flowing through the privmsg hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Privmsg,
    Notice,
    Part,
}

/// A new local user finished registration. Setting `exit_reason` kills the
/// client before the welcome burst.
pub struct NewLocalUser {
    pub client: Arc<Client>,
    pub exit_reason: Option<String>,
}

/// A client (local or remote) became visible to the network.
pub struct IntroduceClient {
    pub client: Arc<Client>,
}

pub struct UmodeChanged {
    pub client: Arc<Client>,
    pub old_umodes: u32,
}

pub struct CapChange {
    pub client: Arc<Client>,
}

/// Join permission. `approved` is 0 to allow or the numeric to deny with.
pub struct CanJoin {
    pub client: Arc<Client>,
    pub channel: Arc<Channel>,
    pub approved: u16,
}

/// Channel message in flight. `approved` is 0 or the rejecting numeric.
pub struct PrivmsgChannel {
    pub source: Arc<Client>,
    pub channel: Arc<Channel>,
    pub msgtype: MessageType,
    pub text: String,
    pub msgbuf: MsgBuf,
    pub approved: u16,
}

/// Direct message in flight.
pub struct PrivmsgUser {
    pub source: Arc<Client>,
    pub target: Arc<Client>,
    pub msgtype: MessageType,
    pub text: String,
    pub msgbuf: MsgBuf,
    pub approved: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendVerdict {
    Allow,
    /// Blocked; on a +z channel the message is diverted to ops instead.
    Deny,
}

/// The +z-aware send gate.
pub struct CanSend {
    pub client: Arc<Client>,
    pub channel: Arc<Channel>,
    /// Suppress the error numeric (used for the op-moderation path).
    pub silent: bool,
    pub verdict: SendVerdict,
}

/// Per-recipient decoration of an outbound message.
pub struct OutboundMsgbuf {
    /// The message's source, when it is a user.
    pub source: Option<Arc<Client>>,
    pub msgbuf: MsgBuf,
}

/// One tag parsed off a server link, awaiting approval.
pub struct MessageTag {
    pub key: String,
    pub value: Option<String>,
    pub from_server: bool,
    /// Capability mask the tag will carry outbound if approved.
    pub capmask: u64,
    pub approved: bool,
}

pub struct DoingStats {
    pub source: Arc<Client>,
    pub letter: char,
}

/// Services account attached or dropped (`suser` already updated).
pub struct AccountChange {
    pub client: Arc<Client>,
}

/// Every hook point in the core, one field per name the old tree had.
#[derive(Default)]
pub struct Hooks {
    pub new_local_user: HookPoint<NewLocalUser>,
    pub introduce_client: HookPoint<IntroduceClient>,
    pub umode_changed: HookPoint<UmodeChanged>,
    pub cap_change: HookPoint<CapChange>,
    pub can_join: HookPoint<CanJoin>,
    pub privmsg_channel: HookPoint<PrivmsgChannel>,
    pub privmsg_user: HookPoint<PrivmsgUser>,
    pub can_send: HookPoint<CanSend>,
    pub outbound_msgbuf: HookPoint<OutboundMsgbuf>,
    pub message_tag: HookPoint<MessageTag>,
    pub conf_read_start: HookPoint<()>,
    pub conf_read_end: HookPoint<()>,
    pub doing_stats: HookPoint<DoingStats>,
    pub account_change: HookPoint<AccountChange>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }
}
