//! The `msgid` tag: version-1 message identifiers.
//!
//! Format: the character `1`, seconds since epoch zero-padded to 10
//! digits, milliseconds to 3, a counter to 6, the source's 9-char UID,
//! and the unpadded-base64 channel name for channel targets. The counter
//! reseeds with fresh randomness each new second (top bit cleared so it
//! can overflow) and carries into the millisecond, then the second, so
//! ids from one server sort strictly by issue order.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use rand::Rng;

use crate::context::CoreContext;
use crate::hooks::{MessageType, Priority};

/// Clock returning (epoch seconds, milliseconds). Swappable for tests.
pub type TimeSource = Box<dyn Fn() -> (i64, u16) + Send + Sync>;

#[derive(Debug, Default)]
struct MsgidState {
    prev_ts: i64,
    prev_ms: u16,
    ctr: u16,
}

pub struct MsgidGenerator {
    state: Mutex<MsgidState>,
    time: TimeSource,
}

impl Default for MsgidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MsgidGenerator {
    pub fn new() -> Self {
        MsgidGenerator {
            state: Mutex::new(MsgidState::default()),
            time: Box::new(|| {
                let now = chrono::Utc::now();
                (now.timestamp(), now.timestamp_subsec_millis() as u16)
            }),
        }
    }

    pub fn with_time_source(time: TimeSource) -> Self {
        MsgidGenerator {
            state: Mutex::new(MsgidState::default()),
            time,
        }
    }

    /// Generate one id for a message from `uid`, targeting `channel` when
    /// the destination is a channel.
    pub fn generate(&self, uid: &str, channel: Option<&str>) -> String {
        let (ts, ms) = (self.time)();
        let mut state = self.state.lock();

        if ts > state.prev_ts {
            state.prev_ts = ts;
            state.prev_ms = ms;
            // top bit cleared to leave room for overflow
            state.ctr = rand::thread_rng().gen::<u16>() & 0x7fff;
        } else if ms > state.prev_ms {
            state.prev_ms = ms;
        }

        state.ctr = state.ctr.wrapping_add(1);
        if state.ctr == 0 {
            state.prev_ms += 1;
            if state.prev_ms == 1000 {
                state.prev_ts += 1;
                state.prev_ms = 0;
            }
        }

        let encoded = channel
            .map(|name| STANDARD_NO_PAD.encode(name.as_bytes()))
            .unwrap_or_default();
        format!(
            "1{:010}{:03}{:06}{}{}",
            state.prev_ts, state.prev_ms, state.ctr, uid, encoded
        )
    }
}

/// Wire the msgid tag into the hook bus.
pub fn register(ctx: &CoreContext) {
    let cap = ctx.client_caps.message_tags;

    // servers relay each other's ids verbatim
    ctx.hooks.message_tag.add(Priority::Normal, move |_ctx, tag| {
        if tag.from_server && tag.key == "msgid" {
            tag.capmask = cap;
            tag.approved = true;
        }
    });

    ctx.hooks.privmsg_user.add(Priority::Normal, move |ctx, data| {
        if data.msgbuf.get_tag("msgid").is_some() {
            return;
        }
        // only originate ids for our own users; remote ids arrive tagged
        if !data.source.is_local() {
            return;
        }
        let id = ctx.msgids.generate(&data.source.uid, None);
        data.msgbuf.append_tag("msgid", Some(id), cap);
    });

    ctx.hooks
        .privmsg_channel
        .add(Priority::Normal, move |ctx, data| {
            if data.msgtype == MessageType::Part {
                return;
            }
            if data.msgbuf.get_tag("msgid").is_some() || !data.source.is_local() {
                return;
            }
            let id = ctx.msgids.generate(&data.source.uid, Some(&data.channel.name));
            data.msgbuf.append_tag("msgid", Some(id), cap);
        });
}
