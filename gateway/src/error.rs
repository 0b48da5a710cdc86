//! Error taxonomy for the Gateway, split per `SPEC_FULL.md` §7 the same
//! way `hook-worker::error::{WorkerError, WebhookError}` separates
//! loop-stopping failures from per-write failures that are classified and
//! handled inline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invitation exchange failed")]
    InvitationRejected(#[from] rfid_common::document_store::DocumentStoreError),
    #[error("no credential is available; invitation exchange has not completed")]
    NotAuthenticated,
    #[error("failed to persist auth state to {path}: {source}")]
    Persist {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ForwarderError {
    #[error("staging queue error")]
    Queue(#[from] rfid_common::queue::QueueError),
    #[error("document store error")]
    DocumentStore(#[from] rfid_common::document_store::DocumentStoreError),
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("failed to load configuration from env")]
    Config(#[from] envconfig::Error),
    #[error("failed to bind http listener")]
    Bind(#[from] std::io::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
}
