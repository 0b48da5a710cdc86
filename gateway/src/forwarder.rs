//! Component H — the Forwarder. Drains the Staging Queue with a bounded
//! concurrency limit, the same `tokio::sync::Semaphore` shape
//! `hook-worker::worker::WebhookWorker::run` uses, and classifies each
//! response per `SPEC_FULL.md` §4.H.

use std::sync::Arc;

use chrono::Utc;
use rfid_common::document_store::{DocumentStoreClient, WriteMode};
use rfid_common::queue::{QueueBackend, StagedEntry};
use rfid_common::retry::{Disposition, RetryPolicy};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::auth::AuthManager;

pub struct Forwarder {
    queue: Arc<dyn QueueBackend>,
    store: Arc<dyn DocumentStoreClient>,
    auth: Arc<AuthManager>,
    retry_policy: RetryPolicy,
    lease_batch_size: usize,
    max_concurrent_writes: usize,
    poll_interval: std::time::Duration,
    lease_duration: chrono::Duration,
    liveness: rfid_common::health::HealthHandle,
}

impl Forwarder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn QueueBackend>,
        store: Arc<dyn DocumentStoreClient>,
        auth: Arc<AuthManager>,
        retry_policy: RetryPolicy,
        lease_batch_size: usize,
        max_concurrent_writes: usize,
        poll_interval: std::time::Duration,
        lease_duration: chrono::Duration,
        liveness: rfid_common::health::HealthHandle,
    ) -> Self {
        Self {
            queue,
            store,
            auth,
            retry_policy,
            lease_batch_size,
            max_concurrent_writes,
            poll_interval,
            lease_duration,
            liveness,
        }
    }

    /// Runs the drain loop forever. Intended to be `tokio::spawn`ed next
    /// to the Control API, mirroring `hook-worker::main`'s split between
    /// the metrics server task and the worker loop. Each tick's lease
    /// pushes its entries' visibility out by `lease_duration`, so a poll
    /// that lands before the previous tick's `attempt()` calls finish
    /// cannot pick up the same entry again.
    pub async fn run(self: Arc<Self>) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_writes));
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            interval.tick().await;
            self.liveness.report_healthy().await;

            let now = Utc::now();
            let leased = match self
                .queue
                .lease_ready(now, self.lease_batch_size, self.lease_duration)
                .await
            {
                Ok(items) => items,
                Err(err) => {
                    error!(error = %err, "failed to lease staging queue items");
                    continue;
                }
            };

            for entry in leased {
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
                let forwarder = self.clone();
                tokio::spawn(async move {
                    forwarder.attempt(entry).await;
                    drop(permit);
                });
            }
        }
    }

    async fn attempt(&self, entry: StagedEntry) {
        let token = match self.auth.current_token().await {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, id = %entry.id, "no auth token available, rescheduling");
                self.reschedule(entry).await;
                return;
            }
        };

        let path = entry.document.document_path("tagReads");
        let body = match serde_json::to_value(&entry.document) {
            Ok(body) => body,
            Err(err) => {
                error!(error = %err, id = %entry.id, "failed to serialize staged document, discarding");
                self.discard(&entry.id, "serialize_error").await;
                return;
            }
        };

        let outcome = self.store.write(&path, WriteMode::Update, &body, &token).await;

        match outcome {
            Ok(response) => self.classify(entry, Disposition::from_status(response.status)).await,
            Err(_) => self.classify(entry, Disposition::from_transport_error()).await,
        }
    }

    async fn classify(&self, entry: StagedEntry, disposition: Disposition) {
        match disposition {
            Disposition::Delivered => {
                if let Err(err) = self.queue.complete(&entry.id).await {
                    error!(error = %err, id = %entry.id, "failed to mark staged item complete");
                }
            }
            Disposition::Reauthenticate => {
                if let Err(err) = self.auth.refresh_now().await {
                    warn!(error = %err, "token refresh failed after 401/403");
                }
                self.reschedule_without_penalty(entry).await;
            }
            Disposition::RetryableFailure => {
                if self.retry_policy.should_retry(entry.attempt) {
                    self.reschedule(entry).await;
                } else {
                    metrics::counter!("gateway_forwarder_max_attempts_total").increment(1);
                    self.discard(&entry.id, "max_attempts").await;
                }
            }
            Disposition::Rejected => {
                self.discard(&entry.id, "permanent").await;
            }
        }
    }

    async fn reschedule(&self, entry: StagedEntry) {
        let delay = self.retry_policy.time_until_next_retry(entry.attempt);
        let next_retry_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        let entry = entry.retry(next_retry_at);
        if let Err(err) = self.queue.reschedule(entry).await {
            error!(error = %err, "failed to reschedule staged item");
        }
    }

    /// An auth failure does not consume an attempt on its first
    /// occurrence for the item, per `spec.md` §4.H.
    async fn reschedule_without_penalty(&self, mut entry: StagedEntry) {
        entry.next_retry_at = Utc::now();
        if let Err(err) = self.queue.reschedule(entry).await {
            error!(error = %err, "failed to reschedule staged item after auth failure");
        }
    }

    async fn discard(&self, id: &str, reason: &str) {
        info!(id, reason, "discarding staged item");
        if let Err(err) = self.queue.discard(id).await {
            error!(error = %err, id, "failed to discard staged item");
        }
    }
}
