//! Domain types shared by the ingestor and the gateway: the normalised
//! tag event read off the broker, the tag document written to the remote
//! store, and the process-wide context used to build one from the other.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Substituted for `TagEvent::hostname` when a message carries none.
pub const PLACEHOLDER_HOSTNAME: &str = "NoHostUpgradeToVersion8";

/// Default retention applied to a `TagDocument::ttl` when the location
/// configuration does not override it.
pub const DEFAULT_RETENTION: Duration = Duration::days(30);

/// A single observation produced by a reader, after normalisation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagEvent {
    /// Hex tag id, case-normalised to lowercase. Treated as an opaque
    /// string end to end (see `SPEC_FULL.md` §3 for the resolved open
    /// question on this field).
    pub tid: String,
    /// Defaults to `tid` when the source message omits it.
    pub epc: String,
    pub hostname: String,
    pub antenna: u32,
    /// Signed reading strength in centi-dBm.
    pub rssi_cdbm: Option<i32>,
    pub host_timestamp: DateTime<Utc>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub topic: String,
}

impl TagEvent {
    pub fn normalise_tid(tid: &str) -> String {
        tid.to_ascii_lowercase()
    }
}

/// Process-wide context attached to every `TagDocument` built by this
/// process. Populated once at startup from environment configuration.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    pub location: String,
    pub company_id: String,
    pub frequency_hz: u64,
    pub tx_power_cdbm: i32,
    pub mobile_flag: bool,
    pub retention: Duration,
}

/// The normalised record written downstream, derived from a `TagEvent`
/// plus `ProcessContext` and a server-assigned timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagDocument {
    pub tid: String,
    pub epc: String,
    pub hostname: String,
    pub antenna_port: u32,
    pub antenna_name: String,
    pub rssi_cdbm: Option<i32>,
    pub host_timestamp: DateTime<Utc>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub topic: String,
    pub location: String,
    pub company_id: String,
    pub frequency_hz: u64,
    pub tx_power_cdbm: i32,
    pub mobile_flag: bool,
    pub server_timestamp: DateTime<Utc>,
    pub ttl: DateTime<Utc>,
}

impl TagDocument {
    /// Build a document from a normalised event, the process context, and
    /// the instant the server accepted the event.
    pub fn build(event: &TagEvent, ctx: &ProcessContext, server_timestamp: DateTime<Utc>) -> Self {
        Self {
            tid: event.tid.clone(),
            epc: event.epc.clone(),
            hostname: event.hostname.clone(),
            antenna_port: event.antenna,
            antenna_name: event.antenna.to_string(),
            rssi_cdbm: event.rssi_cdbm,
            host_timestamp: event.host_timestamp,
            lat: event.lat,
            lon: event.lon,
            topic: event.topic.clone(),
            location: ctx.location.clone(),
            company_id: ctx.company_id.clone(),
            frequency_hz: ctx.frequency_hz,
            tx_power_cdbm: ctx.tx_power_cdbm,
            mobile_flag: ctx.mobile_flag,
            server_timestamp,
            ttl: server_timestamp + ctx.retention,
        }
    }

    /// Idempotency identity: `(company_id, tid, host_timestamp, hostname)`.
    pub fn identity(&self) -> (String, String, DateTime<Utc>, String) {
        (
            self.company_id.clone(),
            self.tid.clone(),
            self.host_timestamp,
            self.hostname.clone(),
        )
    }

    /// A stable document path derived from the idempotency identity, used
    /// as the target for `DocumentStoreClient::create`/`update`.
    pub fn document_path(&self, collection: &str) -> String {
        format!(
            "{collection}/{}_{}_{}",
            self.company_id,
            self.tid,
            self.host_timestamp.timestamp_millis()
        )
    }
}

/// A generic (non-`tagInventory`) broker message, wrapped for downstream
/// storage without further interpretation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenericEventDocument {
    pub hostname: String,
    pub server_timestamp: DateTime<Utc>,
    pub read: bool,
    pub payload: serde_json::Value,
}

/// Abstracts `DateTime<Utc>::now()` so tests can drive fixed instants
/// through the Deduplicator, the Staging Queue and the Forwarder.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ProcessContext {
        ProcessContext {
            location: "warehouse-1".to_string(),
            company_id: "acme".to_string(),
            frequency_hz: 915_000_000,
            tx_power_cdbm: 3000,
            mobile_flag: false,
            retention: DEFAULT_RETENTION,
        }
    }

    fn event() -> TagEvent {
        TagEvent {
            tid: "abc123".to_string(),
            epc: "abc123".to_string(),
            hostname: "reader-1".to_string(),
            antenna: 1,
            rssi_cdbm: Some(-4500),
            host_timestamp: "2024-01-01T10:00:00Z".parse().unwrap(),
            lat: None,
            lon: None,
            topic: "rfid/reader-1".to_string(),
        }
    }

    #[test]
    fn build_sets_ttl_from_retention() {
        let now: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();
        let doc = TagDocument::build(&event(), &ctx(), now);
        assert_eq!(doc.ttl, now + DEFAULT_RETENTION);
        assert_eq!(doc.company_id, "acme");
        assert_eq!(doc.antenna_port, 1);
        assert_eq!(doc.antenna_name, "1");
    }

    #[test]
    fn identity_is_stable_for_replayed_events() {
        let now: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();
        let a = TagDocument::build(&event(), &ctx(), now);
        let b = TagDocument::build(&event(), &ctx(), now + Duration::seconds(5));
        // server_timestamp differs but identity (host_timestamp-keyed) does not.
        assert_eq!(a.identity(), b.identity());
    }
}
