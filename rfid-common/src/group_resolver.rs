//! Component B — Group Resolver.
//!
//! A pure function mapping a reader hostname to its deduplication group,
//! per the static host-group file. No I/O, no locking: it is handed a
//! `&GroupFile` loaded once at startup by the Config Store client.

use crate::config_store::{DeduplicationGroupMode, GroupFile};

/// Resolve `hostname` to its deduplication group.
///
/// * When `deduplicationGroup` is `"hostname"`, returns `hostname` verbatim.
/// * Otherwise returns the first group whose member list contains
///   `hostname`, falling back to `hostname` verbatim if none match.
pub fn resolve(file: &GroupFile, hostname: &str) -> String {
    match &file.mode {
        DeduplicationGroupMode::Hostname => hostname.to_string(),
        DeduplicationGroupMode::Named(_) => file
            .groups
            .iter()
            .find(|(_, members)| members.iter().any(|m| m == hostname))
            .map(|(group, _)| group.clone())
            .unwrap_or_else(|| hostname.to_string()),
    }
}
