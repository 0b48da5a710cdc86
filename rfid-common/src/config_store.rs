//! Component A — Config Store client.
//!
//! Reads the static host-group mapping file and exposes a read-only view
//! of it to the Group Resolver. Environment-sourced configuration lives
//! directly on each binary's `envconfig::Envconfig` struct (mirroring
//! `hook-worker::config::Config` / `capture::config::Config`); this module
//! only owns the on-disk JSON file named in `spec.md` §6.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigStoreError {
    #[error("failed to read host-group file {path}: {source}")]
    ReadError {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse host-group file {path}: {source}")]
    ParseError {
        path: String,
        source: serde_json::Error,
    },
}

/// The `deduplicationGroup` discriminant: either the literal string
/// `"hostname"` (resolver is the identity function) or the name of a
/// group to use as a blanket fallback key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeduplicationGroupMode {
    Hostname,
    Named(String),
}

impl DeduplicationGroupMode {
    fn from_raw(raw: String) -> Self {
        if raw == "hostname" {
            DeduplicationGroupMode::Hostname
        } else {
            DeduplicationGroupMode::Named(raw)
        }
    }
}

/// The on-disk host-group mapping file, e.g.:
/// `{ "deduplicationGroup": "building-a", "groups": { "building-a": ["r1", "r2"] } }`
#[derive(Debug, Clone)]
pub struct GroupFile {
    pub mode: DeduplicationGroupMode,
    pub groups: HashMap<String, Vec<String>>,
}

#[derive(Deserialize)]
struct RawGroupFile {
    #[serde(rename = "deduplicationGroup")]
    deduplication_group: String,
    #[serde(default)]
    groups: HashMap<String, Vec<String>>,
}

impl GroupFile {
    /// Parse a host-group file from its on-disk JSON representation.
    pub fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        let raw: RawGroupFile = serde_json::from_str(contents)?;
        Ok(GroupFile {
            mode: DeduplicationGroupMode::from_raw(raw.deduplication_group),
            groups: raw.groups,
        })
    }

    /// Load a host-group file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigStoreError> {
        let path_ref = path.as_ref();
        let contents =
            std::fs::read_to_string(path_ref).map_err(|source| ConfigStoreError::ReadError {
                path: path_ref.display().to_string(),
                source,
            })?;
        Self::parse(&contents).map_err(|source| ConfigStoreError::ParseError {
            path: path_ref.display().to_string(),
            source,
        })
    }

    /// An empty file defaulting to identity resolution — used when no
    /// host-group file is configured.
    pub fn identity() -> Self {
        GroupFile {
            mode: DeduplicationGroupMode::Hostname,
            groups: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_mode_parses() {
        let file = GroupFile::parse(r#"{"deduplicationGroup": "hostname", "groups": {}}"#)
            .expect("valid json");
        assert_eq!(file.mode, DeduplicationGroupMode::Hostname);
    }

    #[test]
    fn named_mode_parses_with_groups() {
        let file = GroupFile::parse(
            r#"{"deduplicationGroup": "dock", "groups": {"dock": ["r1", "r2"], "office": ["r3"]}}"#,
        )
        .expect("valid json");
        assert_eq!(file.mode, DeduplicationGroupMode::Named("dock".to_string()));
        assert_eq!(file.groups["dock"], vec!["r1", "r2"]);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(GroupFile::parse("not json").is_err());
    }
}
