//! Component G — Auth Manager. Exchanges a one-time invitation code for a
//! short-lived credential, persists it locally, and refreshes it on a
//! schedule, per `SPEC_FULL.md` §4.G. Token state is shared read-mostly
//! with the Forwarder behind a `tokio::sync::RwLock`, the same "only the
//! refresh routine mutates it" contract `spec.md` §5 describes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rfid_common::document_store::AuthEndpointClient;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::error::AuthError;

const NOMINAL_LIFETIME: Duration = Duration::from_secs(60 * 60);
const REFRESH_AFTER: Duration = Duration::from_secs(45 * 60);
const REUSE_WINDOW: chrono::Duration = chrono::Duration::days(7);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthState {
    pub token: String,
    pub location: String,
    pub company: String,
    pub acquired_at: DateTime<Utc>,
}

/// Whether the Forwarder's last write attempt hit an auth failure. Set by
/// the Forwarder, cleared once a refresh succeeds; read by `/health`.
#[derive(Default)]
pub struct AuthHealth {
    inner: std::sync::atomic::AtomicBool,
}

impl AuthHealth {
    pub fn mark_failed(&self) {
        self.inner.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn mark_ok(&self) {
        self.inner.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        !self.inner.load(std::sync::atomic::Ordering::SeqCst)
    }
}

pub struct AuthManager {
    client: Arc<dyn AuthEndpointClient>,
    state: Arc<RwLock<Option<AuthState>>>,
    state_path: PathBuf,
    invitation_code: String,
    health: Arc<AuthHealth>,
}

impl AuthManager {
    pub fn new(client: Arc<dyn AuthEndpointClient>, state_path: impl AsRef<Path>, invitation_code: String) -> Self {
        Self {
            client,
            state: Arc::new(RwLock::new(None)),
            state_path: state_path.as_ref().to_path_buf(),
            invitation_code,
            health: Arc::new(AuthHealth::default()),
        }
    }

    pub fn health(&self) -> Arc<AuthHealth> {
        self.health.clone()
    }

    /// Reuses persisted state younger than 7 days if present and a
    /// refresh against it succeeds; otherwise runs the invitation
    /// exchange. Called once at startup.
    pub async fn bootstrap(&self) -> Result<(), AuthError> {
        if let Some(persisted) = self.load_persisted() {
            if Utc::now() - persisted.acquired_at < REUSE_WINDOW {
                match self.client.refresh(&persisted.token).await {
                    Ok(tokens) => {
                        let new_state = AuthState {
                            token: tokens.token,
                            location: tokens.location,
                            company: tokens.company,
                            acquired_at: Utc::now(),
                        };
                        self.adopt(new_state).await?;
                        self.health.mark_ok();
                        return Ok(());
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to reuse persisted auth state, falling back to invitation exchange");
                    }
                }
            }
        }

        self.exchange_invitation().await
    }

    async fn exchange_invitation(&self) -> Result<(), AuthError> {
        let tokens = self
            .client
            .exchange_invitation(&self.invitation_code)
            .await
            .map_err(AuthError::InvitationRejected)?;

        let state = AuthState {
            token: tokens.token,
            location: tokens.location,
            company: tokens.company,
            acquired_at: Utc::now(),
        };
        self.adopt(state).await?;
        self.health.mark_ok();
        Ok(())
    }

    async fn adopt(&self, state: AuthState) -> Result<(), AuthError> {
        self.persist(&state)?;
        *self.state.write().await = Some(state);
        Ok(())
    }

    fn load_persisted(&self) -> Option<AuthState> {
        let contents = std::fs::read_to_string(&self.state_path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    fn persist(&self, state: &AuthState) -> Result<(), AuthError> {
        let contents = serde_json::to_string(state).expect("AuthState always serializes");
        std::fs::write(&self.state_path, contents).map_err(|source| AuthError::Persist {
            path: self.state_path.display().to_string(),
            source,
        })
    }

    /// The current bearer token, for a single write attempt.
    pub async fn current_token(&self) -> Result<String, AuthError> {
        self.state
            .read()
            .await
            .as_ref()
            .map(|s| s.token.clone())
            .ok_or(AuthError::NotAuthenticated)
    }

    /// Forces an immediate refresh, used by the Forwarder on a 401/403.
    pub async fn refresh_now(&self) -> Result<(), AuthError> {
        let current = self.state.read().await.clone();
        let Some(current) = current else {
            return self.exchange_invitation().await;
        };

        match self.client.refresh(&current.token).await {
            Ok(tokens) => {
                let new_state = AuthState {
                    token: tokens.token,
                    location: tokens.location,
                    company: tokens.company,
                    acquired_at: current.acquired_at,
                };
                self.adopt(new_state).await?;
                self.health.mark_ok();
                Ok(())
            }
            Err(err) => {
                self.health.mark_failed();
                Err(AuthError::InvitationRejected(err))
            }
        }
    }

    /// Spawns the 45-minute scheduled refresh loop, mirroring the
    /// interval-driven background loops in `hook-janitor::main`.
    pub fn spawn_refresh_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REFRESH_AFTER);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                match self.refresh_now().await {
                    Ok(()) => info!("refreshed auth token on schedule"),
                    Err(err) => error!(error = %err, "scheduled token refresh failed"),
                }
            }
        });
    }
}
