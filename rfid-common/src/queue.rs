//! Component D — the Staging Queue. A durable holding area for
//! `TagDocument`s between the Ingestor producing them and the Gateway's
//! Forwarder draining them, keyed by `next_retry_at` so ready work can be
//! leased in time order. Modelled on `hook-common::pgqueue`'s job
//! lifecycle (`Job::retry`/`complete`/`fail` consuming `self` and
//! returning a typed follow-up), adapted to a Redis sorted set instead of
//! a Postgres table per `SPEC_FULL.md` §4.D.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::TagDocument;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("staging queue backend error: {0}")]
    Backend(String),
    #[error("staging queue is at capacity ({0} entries)")]
    Full(usize),
    #[error("staging queue backing store is at its memory limit ({0} MB)")]
    MemoryLimitExceeded(u64),
}

/// Capacity policy checked on every `push`: reject once either the entry
/// count or the backing store's memory usage reaches its configured
/// ceiling. `max_memory_mb == 0` disables the memory half of the check.
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    pub max_entries: usize,
    pub max_memory_mb: u64,
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Backend(err.to_string())
    }
}

/// A document staged for delivery, with queue-owned bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedEntry {
    pub id: String,
    pub document: TagDocument,
    pub attempt: u32,
    pub next_retry_at: DateTime<Utc>,
    pub added_at: DateTime<Utc>,
}

impl StagedEntry {
    /// Consume this entry to produce the rescheduled version after a
    /// retryable failure, mirroring `hook-common::pgqueue::Job::retry`.
    pub fn retry(mut self, next_retry_at: DateTime<Utc>) -> Self {
        self.attempt += 1;
        self.next_retry_at = next_retry_at;
        self
    }
}

/// Abstracts the durable backing store so the Forwarder can be tested
/// against an in-process fallback without a live Redis instance, the same
/// split `feature-flags::redis::Client`/`MockRedisClient` draws.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Adds `entry` to the queue, rejecting it if the backend is at
    /// `limits.max_entries` or `limits.max_memory_mb`.
    async fn push(&self, entry: StagedEntry, limits: QueueLimits) -> Result<(), QueueError>;

    /// Leases up to `limit` entries whose `next_retry_at` has elapsed,
    /// oldest first, atomically pushing each leased entry's
    /// `next_retry_at` forward by `lease_for` so a concurrent or
    /// immediately-following poll cannot lease the same entry again
    /// before this lease expires. A crash before `complete` or
    /// `reschedule` simply leaves the entry to be leased again once the
    /// lease elapses.
    async fn lease_ready(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_for: Duration,
    ) -> Result<Vec<StagedEntry>, QueueError>;

    /// Removes an entry after successful delivery.
    async fn complete(&self, id: &str) -> Result<(), QueueError>;

    /// Re-stages an entry at a new `next_retry_at` after a retryable
    /// failure.
    async fn reschedule(&self, entry: StagedEntry) -> Result<(), QueueError>;

    /// Drops an entry permanently (rejected document, or attempts
    /// exhausted).
    async fn discard(&self, id: &str) -> Result<(), QueueError>;

    async fn len(&self) -> Result<usize, QueueError>;
}

const REDIS_KEY: &str = "rfid:staging_queue";
const REDIS_ENTRY_PREFIX: &str = "rfid:staging_queue:entry:";

/// Atomically selects ready ids in time order and re-scores each one to
/// `lease_until` before reading its payload, so the scan-and-mark is a
/// single round trip: no other caller can observe the old (already-ready)
/// score between the scan and the mark.
const LEASE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[2], 'LIMIT', 0, ARGV[3])
local out = {}
for _, id in ipairs(ids) do
    redis.call('ZADD', KEYS[1], ARGV[4], id)
    local raw = redis.call('GET', ARGV[1] .. id)
    if raw then
        table.insert(out, raw)
    end
end
return out
"#;

pub struct RedisQueueBackend {
    client: redis::Client,
}

impl RedisQueueBackend {
    pub fn new(addr: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(addr).map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(Self { client })
    }

    fn entry_key(id: &str) -> String {
        format!("{REDIS_ENTRY_PREFIX}{id}")
    }

    async fn used_memory_mb(conn: &mut redis::aio::Connection) -> Result<u64, QueueError> {
        let info: String = redis::cmd("INFO").arg("memory").query_async(conn).await?;
        let used_bytes = info
            .lines()
            .find_map(|line| line.strip_prefix("used_memory:"))
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(0);
        Ok(used_bytes / (1024 * 1024))
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn push(&self, entry: StagedEntry, limits: QueueLimits) -> Result<(), QueueError> {
        let mut conn = self.client.get_async_connection().await?;
        let current: usize = conn.zcard(REDIS_KEY).await?;
        if current >= limits.max_entries {
            return Err(QueueError::Full(limits.max_entries));
        }
        if limits.max_memory_mb > 0 {
            let used_mb = Self::used_memory_mb(&mut conn).await?;
            if used_mb >= limits.max_memory_mb {
                return Err(QueueError::MemoryLimitExceeded(limits.max_memory_mb));
            }
        }

        let payload = serde_json::to_string(&entry)
            .map_err(|e| QueueError::Backend(format!("serialize staged entry: {e}")))?;
        let score = entry.next_retry_at.timestamp_millis();

        let _: () = conn.set(Self::entry_key(&entry.id), payload).await?;
        let _: () = conn.zadd(REDIS_KEY, entry.id.clone(), score).await?;
        Ok(())
    }

    async fn lease_ready(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_for: Duration,
    ) -> Result<Vec<StagedEntry>, QueueError> {
        let mut conn = self.client.get_async_connection().await?;
        let lease_until = (now + lease_for).timestamp_millis();

        let raw_entries: Vec<String> = redis::Script::new(LEASE_SCRIPT)
            .key(REDIS_KEY)
            .arg(REDIS_ENTRY_PREFIX)
            .arg(now.timestamp_millis())
            .arg(limit)
            .arg(lease_until)
            .invoke_async(&mut conn)
            .await?;

        Ok(raw_entries
            .iter()
            .filter_map(|raw| serde_json::from_str::<StagedEntry>(raw).ok())
            .collect())
    }

    async fn complete(&self, id: &str) -> Result<(), QueueError> {
        let mut conn = self.client.get_async_connection().await?;
        let _: () = conn.zrem(REDIS_KEY, id).await?;
        let _: () = conn.del(Self::entry_key(id)).await?;
        Ok(())
    }

    async fn reschedule(&self, entry: StagedEntry) -> Result<(), QueueError> {
        let mut conn = self.client.get_async_connection().await?;
        let payload = serde_json::to_string(&entry)
            .map_err(|e| QueueError::Backend(format!("serialize staged entry: {e}")))?;
        let score = entry.next_retry_at.timestamp_millis();

        let _: () = conn.set(Self::entry_key(&entry.id), payload).await?;
        let _: () = conn.zadd(REDIS_KEY, entry.id, score).await?;
        Ok(())
    }

    async fn discard(&self, id: &str) -> Result<(), QueueError> {
        self.complete(id).await
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.client.get_async_connection().await?;
        let count: usize = conn.zcard(REDIS_KEY).await?;
        Ok(count)
    }
}

/// In-process fallback used when the durable store is unreachable at
/// startup, and in unit tests. `approx_bytes` tracks a running total of
/// each entry's serialized size as a stand-in for the Redis backend's
/// `INFO memory` reading.
#[derive(Default)]
pub struct InMemoryQueueBackend {
    inner: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    entries: HashMap<String, StagedEntry>,
    approx_bytes: u64,
}

fn entry_size(entry: &StagedEntry) -> u64 {
    serde_json::to_vec(entry).map(|v| v.len() as u64).unwrap_or(0)
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn push(&self, entry: StagedEntry, limits: QueueLimits) -> Result<(), QueueError> {
        let mut state = self.inner.lock().expect("staging queue lock poisoned");
        if state.entries.len() >= limits.max_entries {
            return Err(QueueError::Full(limits.max_entries));
        }
        let size = entry_size(&entry);
        if limits.max_memory_mb > 0 && state.approx_bytes + size >= limits.max_memory_mb * 1024 * 1024 {
            return Err(QueueError::MemoryLimitExceeded(limits.max_memory_mb));
        }
        state.approx_bytes += size;
        state.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn lease_ready(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_for: Duration,
    ) -> Result<Vec<StagedEntry>, QueueError> {
        let mut state = self.inner.lock().expect("staging queue lock poisoned");
        let now_ms = now.timestamp_millis();

        let mut ready_ids: Vec<String> = state
            .entries
            .values()
            .filter(|entry| entry.next_retry_at.timestamp_millis() <= now_ms)
            .map(|entry| entry.id.clone())
            .collect();
        ready_ids.sort_by_key(|id| state.entries[id].next_retry_at);
        ready_ids.truncate(limit);

        let lease_until = now + lease_for;
        let mut leased = Vec::with_capacity(ready_ids.len());
        for id in ready_ids {
            if let Some(entry) = state.entries.get_mut(&id) {
                leased.push(entry.clone());
                entry.next_retry_at = lease_until;
            }
        }
        Ok(leased)
    }

    async fn complete(&self, id: &str) -> Result<(), QueueError> {
        let mut state = self.inner.lock().expect("staging queue lock poisoned");
        if let Some(entry) = state.entries.remove(id) {
            state.approx_bytes = state.approx_bytes.saturating_sub(entry_size(&entry));
        }
        Ok(())
    }

    async fn reschedule(&self, entry: StagedEntry) -> Result<(), QueueError> {
        let mut state = self.inner.lock().expect("staging queue lock poisoned");
        if let Some(old) = state.entries.remove(&entry.id) {
            state.approx_bytes = state.approx_bytes.saturating_sub(entry_size(&old));
        }
        state.approx_bytes += entry_size(&entry);
        state.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn discard(&self, id: &str) -> Result<(), QueueError> {
        self.complete(id).await
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let state = self.inner.lock().expect("staging queue lock poisoned");
        Ok(state.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProcessContext, TagEvent};

    fn doc() -> TagDocument {
        let ctx = ProcessContext {
            location: "wh-1".to_string(),
            company_id: "acme".to_string(),
            frequency_hz: 915_000_000,
            tx_power_cdbm: 3000,
            mobile_flag: false,
            retention: crate::model::DEFAULT_RETENTION,
        };
        let event = TagEvent {
            tid: "abc123".to_string(),
            epc: "abc123".to_string(),
            hostname: "reader-1".to_string(),
            antenna: 1,
            rssi_cdbm: Some(-4500),
            host_timestamp: "2024-01-01T10:00:00Z".parse().unwrap(),
            lat: None,
            lon: None,
            topic: "rfid/reader-1".to_string(),
        };
        let now: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();
        TagDocument::build(&event, &ctx, now)
    }

    fn entry(id: &str, next_retry_at: DateTime<Utc>) -> StagedEntry {
        StagedEntry {
            id: id.to_string(),
            document: doc(),
            attempt: 0,
            next_retry_at,
            added_at: next_retry_at,
        }
    }

    fn limits(max_entries: usize) -> QueueLimits {
        QueueLimits { max_entries, max_memory_mb: 0 }
    }

    #[tokio::test]
    async fn lease_ready_returns_in_time_order() {
        let backend = InMemoryQueueBackend::new();
        let t0: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();

        backend.push(entry("c", t0 + chrono::Duration::seconds(2)), limits(10)).await.unwrap();
        backend.push(entry("a", t0), limits(10)).await.unwrap();
        backend.push(entry("b", t0 + chrono::Duration::seconds(1)), limits(10)).await.unwrap();

        let ready = backend
            .lease_ready(t0 + chrono::Duration::seconds(1), 10, chrono::Duration::seconds(30))
            .await
            .unwrap();

        assert_eq!(ready.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn push_rejects_when_at_capacity() {
        let backend = InMemoryQueueBackend::new();
        let t0: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();
        backend.push(entry("a", t0), limits(1)).await.unwrap();

        let result = backend.push(entry("b", t0), limits(1)).await;
        assert!(matches!(result, Err(QueueError::Full(1))));
    }

    #[tokio::test]
    async fn push_rejects_once_over_the_memory_limit() {
        let backend = InMemoryQueueBackend::new();
        let t0: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();
        let generous_entries = QueueLimits { max_entries: 1_000_000, max_memory_mb: 1 };

        let mut rejected = false;
        for i in 0..10_000 {
            let result = backend.push(entry(&format!("entry-{i}"), t0), generous_entries).await;
            if let Err(err) = result {
                assert!(matches!(err, QueueError::MemoryLimitExceeded(1)));
                rejected = true;
                break;
            }
        }
        assert!(rejected, "expected the 1 MB ceiling to eventually reject a push");
    }

    #[tokio::test]
    async fn complete_removes_entry() {
        let backend = InMemoryQueueBackend::new();
        let t0: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();
        backend.push(entry("a", t0), limits(10)).await.unwrap();
        backend.complete("a").await.unwrap();
        assert_eq!(backend.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reschedule_moves_entry_forward_in_time() {
        let backend = InMemoryQueueBackend::new();
        let t0: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();
        backend.push(entry("a", t0), limits(10)).await.unwrap();

        let staged = backend
            .lease_ready(t0, 10, chrono::Duration::seconds(5))
            .await
            .unwrap()
            .remove(0);
        let retried = staged.retry(t0 + chrono::Duration::seconds(30));
        assert_eq!(retried.attempt, 1);
        backend.reschedule(retried).await.unwrap();

        assert!(backend
            .lease_ready(t0 + chrono::Duration::seconds(1), 10, chrono::Duration::seconds(5))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            backend
                .lease_ready(t0 + chrono::Duration::seconds(31), 10, chrono::Duration::seconds(5))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn lease_ready_applies_a_visibility_timeout() {
        let backend = InMemoryQueueBackend::new();
        let t0: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();
        backend.push(entry("a", t0), limits(10)).await.unwrap();

        let first = backend
            .lease_ready(t0, 10, chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        // Before the lease expires, a second poll must not re-lease it.
        let second = backend
            .lease_ready(t0 + chrono::Duration::seconds(10), 10, chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert!(second.is_empty());

        // Once the lease window has elapsed, it becomes leasable again.
        let third = backend
            .lease_ready(t0 + chrono::Duration::seconds(31), 10, chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(third.len(), 1);
    }
}
