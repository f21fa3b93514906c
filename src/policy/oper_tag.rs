//! The `solanum.chat/oper` tag.
//!
//! Messages from opers carry the oper name, visible according to three
//! hidden recipient buckets: auspex holders see everything, other opers
//! see non-hidden opers, ordinary users get the bare tag with no value
//! unless oper hiding is on. The buckets are pseudo-capabilities recomputed
//! whenever a client's modes or negotiated caps change.

use crate::context::CoreContext;
use crate::hooks::Priority;
use crate::state::Client;

/// Recompute the hidden recipient-bucket bits for one client.
pub fn update_oper_buckets(ctx: &CoreContext, client: &Client) {
    let caps = &ctx.client_caps;
    client.clear_caps(caps.oper_auspex | caps.oper_justoper | caps.oper_normal);

    if client.caps() & caps.oper == 0 {
        return;
    }
    if client.has_priv("auspex:oper") {
        client.add_caps(caps.oper_auspex);
    } else if client.is_oper() {
        client.add_caps(caps.oper_justoper);
    } else {
        client.add_caps(caps.oper_normal);
    }
}

pub fn register(ctx: &CoreContext) {
    ctx.hooks
        .outbound_msgbuf
        .add(Priority::Normal, move |ctx, data| {
            let Some(source) = &data.source else {
                return;
            };
            if !source.is_person() || !source.is_oper() {
                return;
            }
            let caps = &ctx.client_caps;
            let opername = source
                .opername
                .read()
                .clone()
                .unwrap_or_else(|| source.nick.read().clone());

            // auspex sees every oper, hidden or not
            data.msgbuf
                .append_tag("solanum.chat/oper", Some(opername.clone()), caps.oper_auspex);

            let hidden =
                source.has_priv("oper:hidden") || ctx.config().general.hide_opers;
            if hidden {
                return;
            }
            data.msgbuf
                .append_tag("solanum.chat/oper", Some(opername), caps.oper_justoper);
            data.msgbuf
                .append_tag("solanum.chat/oper", None, caps.oper_normal);
        });

    ctx.hooks.umode_changed.add_monitor(|ctx, data| {
        if data.client.is_local() {
            update_oper_buckets(ctx, &data.client);
        }
    });

    ctx.hooks.cap_change.add_monitor(|ctx, data| {
        update_oper_buckets(ctx, &data.client);
    });
}
