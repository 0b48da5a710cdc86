//! Error taxonomy for the Ingestor, split the way
//! `hook-worker::error::{WorkerError, WebhookError}` separate loop-stopping
//! errors from per-message errors that are classified and handled inline.

use thiserror::Error;

/// Per-message failures. These never stop the ingest loop; callers log
/// and increment a counter per `spec.md` §7's "malformed input" policy.
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("payload was not valid JSON")]
    InvalidJson(#[from] serde_json::Error),
    #[error("tagInventory message is missing required field `tid`")]
    MissingTid,
}

/// Startup / loop-stopping failures.
#[derive(Error, Debug)]
pub enum IngestorError {
    #[error("failed to load configuration from env")]
    Config(#[from] envconfig::Error),
    #[error("failed to load host-group file")]
    HostGroup(#[from] rfid_common::config_store::ConfigStoreError),
    #[error("mqtt client error")]
    Mqtt(#[from] rumqttc::ClientError),
    #[error("failed to bind http listener")]
    Bind(#[from] std::io::Error),
}
