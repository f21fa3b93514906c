//! The layered access-control database.
//!
//! Auth blocks, K-lines, D-lines, exemptions, X-lines and reservations,
//! permanent and temporary, local and network-propagated. The address-match
//! index answers "which record governs this connection"; the TTL buckets
//! and the propagated index own expiry.

pub mod class;
pub mod conf;
pub mod hostmask;
pub mod propban;
pub mod reject;
pub mod temp;

pub use class::{AttachError, Class, ClassTable};
pub use conf::{flags, BanKind, ConfItem, ConfKind};
pub use hostmask::AddressTable;
pub use propban::{Applied, BanUpdate, PropBans, PropKey};
pub use reject::RejectCache;
pub use temp::{TempBans, TempSlot};

use solanum_proto::wildcard::mask_match;
use std::sync::Arc;

/// X-line check: does any live gecos ban match this real name?
pub fn find_xline(table: &AddressTable, gecos: &str) -> Option<Arc<ConfItem>> {
    let found = table
        .all_of_kind(ConfKind::Xline)
        .into_iter()
        .find(|conf| mask_match(&conf.host, gecos));
    if let Some(conf) = &found {
        conf.note_hit();
    }
    found
}

/// Resv check for a nick or channel name.
pub fn find_resv(table: &AddressTable, name: &str) -> Option<Arc<ConfItem>> {
    let kind = if solanum_proto::casemap::is_channel_name(name) {
        ConfKind::ResvChannel
    } else {
        ConfKind::ResvNick
    };
    let found = table
        .all_of_kind(kind)
        .into_iter()
        .find(|conf| mask_match(&conf.host, name));
    if let Some(conf) = &found {
        conf.note_hit();
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xline_matches_gecos() {
        let table = AddressTable::new();
        table.add(Arc::new(ConfItem::new(
            ConfKind::Xline,
            None,
            "*bot*spam*".to_string(),
            "spambot".to_string(),
        )));
        assert!(find_xline(&table, "my bot is spam").is_some());
        assert!(find_xline(&table, "ordinary user").is_none());
    }

    #[test]
    fn test_resv_distinguishes_nick_and_channel() {
        let table = AddressTable::new();
        table.add(Arc::new(ConfItem::new(
            ConfKind::ResvChannel,
            None,
            "#services".to_string(),
            "Reserved".to_string(),
        )));
        table.add(Arc::new(ConfItem::new(
            ConfKind::ResvNick,
            None,
            "NickServ".to_string(),
            "Reserved".to_string(),
        )));
        assert!(find_resv(&table, "#services").is_some());
        assert!(find_resv(&table, "nickserv").is_some());
        assert!(find_resv(&table, "#elsewhere").is_none());
    }
}
