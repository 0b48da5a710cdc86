//! Component C — the Deduplicator. Time-windowed suppression keyed by
//! `group:tid`, with at-most-one delayed report per window.
//!
//! This is the hard part of the system: §4.C of `SPEC_FULL.md` spells out
//! the contract this module must uphold. In short: the first observation
//! of a key within a window is forwarded immediately; any further
//! observation within the same window replaces the cached document and is
//! suppressed; when the window's timer fires, the last cached document is
//! handed to a single delayed-report callback and the entry is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::model::TagDocument;

/// Invoked exactly once per window that receives more than one
/// observation, with the last observed document in that window.
pub type ReportCallback = Arc<dyn Fn(TagDocument) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupStats {
    pub active_keys: usize,
    pub active_timers: usize,
}

struct DedupEntry {
    latest_event: TagDocument,
    last_seen: DateTime<Utc>,
    timer: tokio::task::JoinHandle<()>,
}

/// The map plus a `cleaned` flag, guarded by one lock so a timer's
/// self-removal and its decision to fire are atomic with `cleanup()`
/// setting the flag. Without sharing the lock, a timer that has already
/// removed its own entry is invisible to `cleanup()`'s drain and fires
/// regardless of it.
#[derive(Default)]
struct DedupState {
    entries: HashMap<String, DedupEntry>,
    cleaned: bool,
}

/// Per-key windowed suppression with delayed-report timers.
///
/// The state is guarded by a plain `std::sync::Mutex`: its critical
/// section only ever touches the map, never performs I/O, so it is safe
/// to hold across the synchronous body of `admit`. The report callback is
/// always invoked after the guard protecting the entry has been dropped.
pub struct Deduplicator {
    state: Arc<Mutex<DedupState>>,
    interval_minutes: Arc<AtomicI64>,
    on_report: Arc<Mutex<Option<ReportCallback>>>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Deduplicator {
    /// `initial_interval_minutes` is the window length applied to keys
    /// created before any call to `set_interval`.
    pub fn new(initial_interval_minutes: i64) -> Self {
        Self {
            state: Arc::new(Mutex::new(DedupState::default())),
            interval_minutes: Arc::new(AtomicI64::new(initial_interval_minutes.max(1))),
            on_report: Arc::new(Mutex::new(None)),
        }
    }

    /// Registers the delayed-report callback. Must be called before any
    /// window can fire a delayed report; calling it again replaces the
    /// previous callback for windows that have not yet fired.
    pub fn set_on_delayed_report(&self, callback: ReportCallback) {
        *self.on_report.lock().expect("dedup lock poisoned") = Some(callback);
    }

    /// Changes the window length applied to keys created from this call
    /// onward. Per `SPEC_FULL.md` §4.C, this never reschedules existing
    /// timers — a key's window is fixed at creation.
    pub fn set_interval(&self, minutes: i64) {
        self.interval_minutes.store(minutes.max(1), Ordering::SeqCst);
    }

    /// Admits an observation for `key`. Returns `true` when the caller
    /// should forward `document` immediately, `false` when it has been
    /// suppressed and cached for a possible delayed report.
    pub fn admit(&self, key: String, document: TagDocument, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().expect("dedup lock poisoned");

        if let Some(entry) = state.entries.get_mut(&key) {
            // Hit path: replace, don't extend the window.
            entry.latest_event = document;
            entry.last_seen = now;
            return false;
        }

        // Miss path: create the entry and schedule its one-shot timer.
        let interval_minutes = self.interval_minutes.load(Ordering::SeqCst);
        let sleep_for = StdDuration::from_secs((interval_minutes.max(1) as u64) * 60);

        let state_for_timer = self.state.clone();
        let on_report = self.on_report.clone();
        let key_for_timer = key.clone();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(sleep_for).await;

            // Removing this key and deciding whether to fire happen under
            // the same lock `cleanup()` takes to set `cleaned`, so a
            // `cleanup()` call can never race past a timer that has
            // already removed itself from the map.
            let fired = {
                let mut state = state_for_timer.lock().expect("dedup lock poisoned");
                if state.cleaned {
                    None
                } else {
                    state.entries.remove(&key_for_timer).map(|entry| entry.latest_event)
                }
            };

            if let Some(document) = fired {
                let callback = on_report.lock().expect("dedup lock poisoned").clone();
                if let Some(callback) = callback {
                    callback(document).await;
                }
            }
        });

        state.entries.insert(
            key,
            DedupEntry {
                latest_event: document,
                last_seen: now,
                timer,
            },
        );

        true
    }

    /// Cancels every outstanding timer and empties the cache. Sets the
    /// `cleaned` flag under the same lock so a timer that already removed
    /// its own entry and is about to invoke the callback observes it and
    /// does not fire. No callback fires for a window after this returns.
    pub fn cleanup(&self) {
        let mut state = self.state.lock().expect("dedup lock poisoned");
        state.cleaned = true;
        for (_, entry) in state.entries.drain() {
            entry.timer.abort();
        }
    }

    pub fn stats(&self) -> DedupStats {
        let state = self.state.lock().expect("dedup lock poisoned");
        DedupStats {
            active_keys: state.entries.len(),
            active_timers: state.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProcessContext;
    use chrono::Duration;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    fn ctx() -> ProcessContext {
        ProcessContext {
            location: "wh-1".to_string(),
            company_id: "acme".to_string(),
            frequency_hz: 915_000_000,
            tx_power_cdbm: 3000,
            mobile_flag: false,
            retention: crate::model::DEFAULT_RETENTION,
        }
    }

    fn doc_at(tid: &str, hostname: &str, host_timestamp: DateTime<Utc>) -> TagDocument {
        use crate::model::TagEvent;
        let event = TagEvent {
            tid: tid.to_string(),
            epc: tid.to_string(),
            hostname: hostname.to_string(),
            antenna: 1,
            rssi_cdbm: Some(-4000),
            host_timestamp,
            lat: None,
            lon: None,
            topic: format!("rfid/{hostname}"),
        };
        TagDocument::build(&event, &ctx(), host_timestamp)
    }

    fn recording_callback() -> (ReportCallback, Arc<StdMutex<Vec<TagDocument>>>, Arc<Notify>) {
        let reports: Arc<StdMutex<Vec<TagDocument>>> = Arc::new(StdMutex::new(Vec::new()));
        let notify = Arc::new(Notify::new());
        let reports_clone = reports.clone();
        let notify_clone = notify.clone();
        let callback: ReportCallback = Arc::new(move |doc| {
            let reports = reports_clone.clone();
            let notify = notify_clone.clone();
            Box::pin(async move {
                reports.lock().unwrap().push(doc);
                notify.notify_one();
            })
        });
        (callback, reports, notify)
    }

    #[tokio::test(start_paused = true)]
    async fn s1_first_detection_admits_immediately() {
        let dedup = Deduplicator::new(1);
        let (cb, reports, _notify) = recording_callback();
        dedup.set_on_delayed_report(cb);

        let now: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();
        let admitted = dedup.admit(
            "R1:abc123".to_string(),
            doc_at("abc123", "R1", now),
            now,
        );

        assert!(admitted);
        assert_eq!(dedup.stats().active_keys, 1);
        assert!(reports.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn s2_suppression_inside_window_then_one_delayed_report() {
        let dedup = Deduplicator::new(1);
        let (cb, reports, notify) = recording_callback();
        dedup.set_on_delayed_report(cb);

        let t0: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();
        let key = "R1:abc123".to_string();

        assert!(dedup.admit(key.clone(), doc_at("abc123", "R1", t0), t0));

        let t1 = t0 + Duration::seconds(30);
        assert!(!dedup.admit(key.clone(), doc_at("abc123", "R1", t1), t1));

        let t2 = t0 + Duration::seconds(45);
        let last_doc = doc_at("abc123", "R1", t2);
        assert!(!dedup.admit(key.clone(), last_doc.clone(), t2));

        tokio::time::advance(StdDuration::from_secs(61)).await;
        notify.notified().await;

        let reported = reports.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0], last_doc);
        assert_eq!(dedup.stats().active_keys, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn s3_two_windows_yield_two_delayed_reports() {
        let dedup = Deduplicator::new(1);
        let (cb, reports, notify) = recording_callback();
        dedup.set_on_delayed_report(cb);

        let t0: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();
        let key = "R1:abc123".to_string();

        // Window 1.
        assert!(dedup.admit(key.clone(), doc_at("abc123", "R1", t0), t0));
        let t_hit1 = t0 + Duration::seconds(30);
        assert!(!dedup.admit(key.clone(), doc_at("abc123", "R1", t_hit1), t_hit1));
        let t_hit2 = t0 + Duration::seconds(45);
        let window1_last = doc_at("abc123", "R1", t_hit2);
        assert!(!dedup.admit(key.clone(), window1_last.clone(), t_hit2));

        tokio::time::advance(StdDuration::from_secs(61)).await;
        notify.notified().await;

        // Window 2 begins once window 1's timer has fired and removed the entry.
        let t_new: DateTime<Utc> = "2024-01-01T10:01:01Z".parse().unwrap();
        assert!(dedup.admit(key.clone(), doc_at("abc123", "R1", t_new), t_new));

        let t_hit3: DateTime<Utc> = "2024-01-01T10:01:59Z".parse().unwrap();
        let window2_last = doc_at("abc123", "R1", t_hit3);
        assert!(!dedup.admit(key.clone(), window2_last.clone(), t_hit3));

        tokio::time::advance(StdDuration::from_secs(61)).await;
        notify.notified().await;

        let reported = reports.lock().unwrap();
        assert_eq!(reported.len(), 2);
        assert_eq!(reported[0], window1_last);
        assert_eq!(reported[1], window2_last);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_dedup_is_not_this_modules_job() {
        // Invariant 3 ("dedup disabled ⇒ no cache entry, every event
        // forwarded") is enforced by the Ingestor's `state.deduplicate`
        // gate, which never calls `admit` at all when dedup is off. This
        // is asserted at the Ingestor level (see `ingestor::decision`).
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_does_not_reschedule_in_flight_window() {
        let dedup = Deduplicator::new(1);
        let (cb, reports, notify) = recording_callback();
        dedup.set_on_delayed_report(cb);

        let t0: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();
        let key = "R1:abc123".to_string();
        assert!(dedup.admit(key.clone(), doc_at("abc123", "R1", t0), t0));

        // Growing the interval must not delay the in-flight window's report.
        dedup.set_interval(10);

        tokio::time::advance(StdDuration::from_secs(61)).await;
        notify.notified().await;

        assert_eq!(reports.lock().unwrap().len(), 1);
        assert_eq!(dedup.stats().active_keys, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_empties_cache_and_suppresses_pending_callbacks() {
        let dedup = Deduplicator::new(1);
        let (cb, reports, _notify) = recording_callback();
        dedup.set_on_delayed_report(cb);

        let t0: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();
        dedup.admit("R1:abc123".to_string(), doc_at("abc123", "R1", t0), t0);
        assert_eq!(dedup.stats().active_keys, 1);

        dedup.cleanup();
        assert_eq!(dedup.stats(), DedupStats { active_keys: 0, active_timers: 0 });

        tokio::time::advance(StdDuration::from_secs(120)).await;
        tokio::task::yield_now().await;
        assert!(reports.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_wins_the_race_against_an_already_woken_timer() {
        // The timer task only gets polled once we yield. Advancing the
        // clock wakes it but does not run it, so `cleanup()` here observes
        // the entry still present and sets `cleaned` before the timer task
        // ever reaches its remove-and-decide step.
        let dedup = Deduplicator::new(1);
        let (cb, reports, _notify) = recording_callback();
        dedup.set_on_delayed_report(cb);

        let t0: DateTime<Utc> = "2024-01-01T10:00:00Z".parse().unwrap();
        dedup.admit("R1:abc123".to_string(), doc_at("abc123", "R1", t0), t0);

        tokio::time::advance(StdDuration::from_secs(61)).await;
        dedup.cleanup();
        tokio::task::yield_now().await;

        assert!(reports.lock().unwrap().is_empty());
        assert_eq!(dedup.stats(), DedupStats { active_keys: 0, active_timers: 0 });
    }
}
