//! The `server-time` tag.

use chrono::Utc;

use crate::context::CoreContext;
use crate::hooks::Priority;

/// ISO8601 with milliseconds, UTC, e.g. `2026-08-01T12:00:00.123Z`.
pub fn format_server_time() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub fn register(ctx: &CoreContext) {
    let cap = ctx.client_caps.server_time;

    ctx.hooks.message_tag.add(Priority::Normal, move |_ctx, tag| {
        if tag.from_server && tag.key == "time" {
            tag.capmask = cap;
            tag.approved = true;
        }
    });

    ctx.hooks
        .outbound_msgbuf
        .add(Priority::Normal, move |_ctx, data| {
            if data.msgbuf.get_tag("time").is_none() {
                data.msgbuf
                    .append_tag("time", Some(format_server_time()), cap);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_format_shape() {
        let t = format_server_time();
        assert_eq!(t.len(), 24);
        assert!(t.ends_with('Z'));
        assert_eq!(&t[4..5], "-");
        assert_eq!(&t[10..11], "T");
        assert_eq!(&t[19..20], ".");
    }
}
