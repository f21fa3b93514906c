//! Send and tag policies.
//!
//! These were runtime-loaded modules in the old tree; here they are
//! statically linked and register their hook callbacks at startup. Each
//! one is self-contained: a few callbacks on the shared bus plus any
//! capability bits it owns.

pub mod chmodes;
pub mod msgid;
pub mod oper_tag;
pub mod quarantine;
pub mod server_time;

use crate::context::CoreContext;

/// Register every built-in policy on the hook bus.
pub fn register_all(ctx: &CoreContext) {
    server_time::register(ctx);
    msgid::register(ctx);
    oper_tag::register(ctx);
    chmodes::register(ctx);
    quarantine::register(ctx);
}
