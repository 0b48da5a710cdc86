//! Retry policy for the Forwarder's drain loop, and the HTTP response
//! classification it acts on. Adapted from `hook-common::retry::RetryPolicy`,
//! with a `max_attempts` cutoff and a `Disposition` classifier layered on
//! top for the document-store response codes named in `SPEC_FULL.md` §4.D.

use std::time::Duration;

/// What the Forwarder should do with a staged document after attempting
/// to write it, based on the response it got back from the document
/// store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 2xx: remove from the queue, done.
    Delivered,
    /// 401/403: the credential is no longer valid. Hand off to the Auth
    /// Manager for a refresh and retry once refreshed, without counting
    /// against `max_attempts`.
    Reauthenticate,
    /// 5xx or a transport error: retryable, counts against `max_attempts`.
    RetryableFailure,
    /// Any other 4xx: the document itself is rejected. Drop it rather
    /// than retry forever on a request the store will never accept.
    Rejected,
}

impl Disposition {
    /// Classify an HTTP status code returned by the document store.
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Disposition::Delivered,
            401 | 403 => Disposition::Reauthenticate,
            400..=499 => Disposition::Rejected,
            _ => Disposition::RetryableFailure,
        }
    }

    /// A transport-level failure (timeout, connection refused) is treated
    /// the same as a 5xx.
    pub fn from_transport_error() -> Self {
        Disposition::RetryableFailure
    }
}

/// Exponential backoff with a ceiling, plus an attempt budget. Mirrors
/// `hook-common::retry::RetryPolicy`'s `time_until_next_retry`, with
/// `max_attempts` added so the Forwarder knows when to give up on a
/// `RetryableFailure` and discard the document.
#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    backoff_coefficient: u32,
    initial_interval: Duration,
    maximum_interval: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: Duration,
        maximum_interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
            max_attempts,
        }
    }

    /// Backoff to apply before attempt number `attempt` (0-indexed: the
    /// first retry after the initial attempt is `attempt == 0`).
    pub fn time_until_next_retry(&self, attempt: u32) -> Duration {
        let candidate = self
            .initial_interval
            .saturating_mul(self.backoff_coefficient.saturating_pow(attempt));
        std::cmp::min(candidate, self.maximum_interval)
    }

    /// Whether a document that has already failed `attempt` times should
    /// be retried again, or discarded.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for RetryPolicy {
    /// base = 1s, coefficient = 2, max = 30s, max_attempts = 5, per
    /// `SPEC_FULL.md` §4.D.
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: Duration::from_secs(1),
            maximum_interval: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}
