//! Component F — Config Subscriber. Polls the remote document store for
//! the location-config collection and publishes a whitelist-filtered
//! snapshot that the Ingestor and Gateway read without blocking on I/O.
//! The polling loop follows `hook-janitor::main::cleanup_loop`'s
//! interval-driven shape; the lock-free read side uses `arc_swap::ArcSwap`
//! the way a `TimeSource`-style abstraction in `capture` is handed around
//! as a cheap `Arc` clone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::document_store::DocumentStoreClient;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Fields of a location-config document that the Ingestor and Gateway
/// care about; everything else in the remote document is ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocationConfig {
    pub location: String,
    pub company_id: String,
    pub frequency_hz: u64,
    pub tx_power_cdbm: i32,
    pub mobile_flag: bool,
    #[serde(default)]
    pub retention_days: Option<i64>,
    #[serde(default = "default_true")]
    pub deduplicate: bool,
    #[serde(default)]
    pub dedup_interval_minutes: Option<i64>,
    #[serde(default = "default_true")]
    pub reporting: bool,
}

fn default_true() -> bool {
    true
}

/// The fields this process is allowed to read from the snapshot, applied
/// as a whitelist diff so an operator adding unrelated keys to the remote
/// document never changes observed behaviour here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSnapshot {
    pub by_location: HashMap<String, LocationConfig>,
}

impl ConfigSnapshot {
    fn from_raw(raw: &serde_json::Value) -> Self {
        let mut by_location = HashMap::new();
        if let Some(entries) = raw.as_object() {
            for (location, value) in entries {
                match serde_json::from_value::<LocationConfig>(value.clone()) {
                    Ok(config) => {
                        by_location.insert(location.clone(), config);
                    }
                    Err(err) => {
                        warn!(location, error = %err, "skipping malformed location-config entry");
                    }
                }
            }
        }
        Self { by_location }
    }
}

/// A live, atomically-published snapshot of location configuration.
/// Cloning a `ConfigSubscriber` shares the same underlying `ArcSwap`.
#[derive(Clone)]
pub struct ConfigSubscriber {
    current: Arc<ArcSwap<ConfigSnapshot>>,
}

impl ConfigSubscriber {
    pub fn new() -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(ConfigSnapshot::default())),
        }
    }

    /// Lock-free read of the current snapshot.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    /// Polls `store` on `poll_interval`, publishing a new snapshot each
    /// time the document changes. Reconnects after `RECONNECT_BACKOFF` on
    /// error, and keeps serving the last good snapshot meanwhile. Runs
    /// until the process exits; intended to be spawned as a background
    /// task per `SPEC_FULL.md` §4.F.
    pub async fn run(
        self,
        store: Arc<dyn DocumentStoreClient>,
        collection_path: String,
        bearer_token_source: Arc<dyn Fn() -> futures::future::BoxFuture<'static, String> + Send + Sync>,
        poll_interval: Duration,
    ) {
        let mut interval = tokio::time::interval(poll_interval);
        let mut last: Option<ConfigSnapshot> = None;

        loop {
            interval.tick().await;

            let token = bearer_token_source().await;
            match store.watch_snapshot(&collection_path, &token).await {
                Ok(raw) => {
                    let snapshot = ConfigSnapshot::from_raw(&raw);
                    if last.as_ref() != Some(&snapshot) {
                        info!(locations = snapshot.by_location.len(), "publishing new config snapshot");
                        self.current.store(Arc::new(snapshot.clone()));
                        last = Some(snapshot);
                    }
                }
                Err(err) => {
                    error!(error = %err, "failed to poll location config, backing off");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    }
}

impl Default for ConfigSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_raw_parses_well_formed_entries() {
        let raw = json!({
            "wh-1": {
                "location": "wh-1",
                "company_id": "acme",
                "frequency_hz": 915000000,
                "tx_power_cdbm": 3000,
                "mobile_flag": false
            }
        });

        let snapshot = ConfigSnapshot::from_raw(&raw);
        assert_eq!(snapshot.by_location.len(), 1);
        assert!(snapshot.by_location["wh-1"].deduplicate);
    }

    #[test]
    fn from_raw_skips_malformed_entries_but_keeps_the_rest() {
        let raw = json!({
            "wh-1": {
                "location": "wh-1",
                "company_id": "acme",
                "frequency_hz": 915000000,
                "tx_power_cdbm": 3000,
                "mobile_flag": false
            },
            "wh-2": { "nonsense": true }
        });

        let snapshot = ConfigSnapshot::from_raw(&raw);
        assert_eq!(snapshot.by_location.len(), 1);
        assert!(snapshot.by_location.contains_key("wh-1"));
    }

    #[test]
    fn snapshot_defaults_to_empty() {
        let subscriber = ConfigSubscriber::new();
        assert!(subscriber.snapshot().by_location.is_empty());
    }
}
