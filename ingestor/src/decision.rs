//! The dedup/reporting decision pseudocode of `spec.md` §4.E, translated
//! to explicit Rust control flow per `SPEC_FULL.md` §9 ("exceptions as
//! control flow become explicit result values").

use chrono::{DateTime, Utc};
use rfid_common::config_subscriber::LocationConfig;
use rfid_common::dedup::Deduplicator;
use rfid_common::group_resolver;
use rfid_common::model::{ProcessContext, TagDocument, TagEvent};
use rfid_common::queue::{QueueBackend, QueueError, QueueLimits, StagedEntry};
use tracing::debug;

use crate::config::Config;

/// What happened to one tag-inventory event, for logging/metrics at the
/// call site.
#[derive(Debug, PartialEq, Eq)]
pub enum DecisionOutcome {
    Staged,
    SuppressedByDedup,
    ForwardedButNotReported,
    QueueRejected,
}

#[allow(clippy::too_many_arguments)]
pub async fn decide(
    event: TagEvent,
    group_file: &rfid_common::config_store::GroupFile,
    location_config: Option<&LocationConfig>,
    ctx: &ProcessContext,
    dedup: &Deduplicator,
    queue: &dyn QueueBackend,
    queue_limits: QueueLimits,
    now: DateTime<Utc>,
) -> Result<DecisionOutcome, QueueError> {
    let group = group_resolver::resolve(group_file, &event.hostname);
    let key = format!("{group}:{}", event.tid);
    let document = TagDocument::build(&event, ctx, now);

    let deduplicate_enabled = location_config.map(|c| c.deduplicate).unwrap_or(true);
    let reporting_enabled = location_config.map(|c| c.reporting).unwrap_or(true);

    let should_forward = if deduplicate_enabled {
        dedup.admit(key, document.clone(), now)
    } else {
        true
    };

    if !should_forward {
        return Ok(DecisionOutcome::SuppressedByDedup);
    }

    if !reporting_enabled {
        debug!(tid = %document.tid, hostname = %document.hostname, "not reported");
        return Ok(DecisionOutcome::ForwardedButNotReported);
    }

    stage(queue, document, queue_limits, now).await
}

/// Stages a document. Shared by the immediate-forward path above and by
/// the dedup delayed-report callback wired up in `main`.
pub async fn stage(
    queue: &dyn QueueBackend,
    document: TagDocument,
    queue_limits: QueueLimits,
    now: DateTime<Utc>,
) -> Result<DecisionOutcome, QueueError> {
    let id = document.document_path("tagReads");
    let entry = StagedEntry {
        id,
        document,
        attempt: 0,
        next_retry_at: now,
        added_at: now,
    };

    match queue.push(entry, queue_limits).await {
        Ok(()) => Ok(DecisionOutcome::Staged),
        Err(QueueError::Full(_)) => {
            metrics::counter!("ingestor_queue_capacity_drops_total").increment(1);
            Ok(DecisionOutcome::QueueRejected)
        }
        Err(QueueError::MemoryLimitExceeded(_)) => {
            metrics::counter!("ingestor_queue_memory_limit_drops_total").increment(1);
            Ok(DecisionOutcome::QueueRejected)
        }
        Err(err) => Err(err),
    }
}

/// Builds the `ProcessContext` this process attaches to every document,
/// preferring the live location-config snapshot over static env defaults
/// so an operator's remote override takes effect without a restart.
pub fn process_context(config: &Config, location_config: Option<&LocationConfig>) -> ProcessContext {
    let retention = location_config
        .and_then(|c| c.retention_days)
        .map(chrono::Duration::days)
        .unwrap_or(rfid_common::model::DEFAULT_RETENTION);

    ProcessContext {
        location: location_config
            .map(|c| c.location.clone())
            .unwrap_or_else(|| config.location_name.clone()),
        company_id: location_config
            .map(|c| c.company_id.clone())
            .unwrap_or_else(|| config.company_id.clone()),
        frequency_hz: location_config
            .map(|c| c.frequency_hz)
            .unwrap_or(config.rfid_frequency_hz),
        tx_power_cdbm: location_config
            .map(|c| c.tx_power_cdbm)
            .unwrap_or(config.rfid_transmit_power_cdbm),
        mobile_flag: location_config
            .map(|c| c.mobile_flag)
            .unwrap_or(config.mobile),
        retention,
    }
}
