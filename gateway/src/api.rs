//! Component I — Control API. Exposes exactly the five routes of
//! `spec.md` §6's table, reusing `rfid_common::health::HealthRegistry`
//! for `/health` the way every `hook-*` binary's `main.rs` wires its
//! liveness router.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use rfid_common::config_subscriber::ConfigSubscriber;
use rfid_common::document_store::{DocumentStoreClient, WriteMode};
use rfid_common::health::HealthRegistry;
use rfid_common::queue::QueueBackend;
use serde::Deserialize;
use serde_json::json;

use crate::auth::{AuthHealth, AuthManager};

#[derive(Clone)]
pub struct ApiState {
    pub health: HealthRegistry,
    pub auth_health: Arc<AuthHealth>,
    pub config: ConfigSubscriber,
    pub queue: Arc<dyn QueueBackend>,
    pub queue_capacity: usize,
    pub store: Arc<dyn DocumentStoreClient>,
    pub auth: Arc<AuthManager>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/config/location/:name", get(get_location_config).put(put_location_config))
        .route("/api/redis/status", get(redis_status))
        .route("/api/config/updates/status", get(updates_status))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let liveness = state.health.get_status();
    let queue_len = state.queue.len().await.unwrap_or(0);

    Json(json!({
        "status": if liveness.healthy && state.auth_health.is_healthy() { "ok" } else { "degraded" },
        "auth": state.auth_health.is_healthy(),
        "queue": queue_len < state.queue_capacity,
        "config": !state.config.snapshot().by_location.is_empty(),
    }))
}

#[derive(Deserialize)]
pub struct CompanyQuery {
    #[serde(rename = "companyId")]
    company_id: Option<String>,
}

async fn get_location_config(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<CompanyQuery>,
) -> Response {
    if query.company_id.is_none() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "companyId is required"}))).into_response();
    }

    let snapshot = state.config.snapshot();
    match snapshot.by_location.get(&name) {
        Some(config) => (
            StatusCode::OK,
            Json(json!({"success": true, "config": config_to_json(config), "fromCache": true})),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "location not found"}))).into_response(),
    }
}

async fn put_location_config(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<CompanyQuery>,
    Json(patch): Json<serde_json::Value>,
) -> Response {
    if query.company_id.is_none() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "companyId is required"}))).into_response();
    }

    let token = match state.auth.current_token().await {
        Ok(token) => token,
        Err(err) => {
            return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": err.to_string()}))).into_response();
        }
    };

    // Writes through to the remote document store; the live snapshot
    // picks up the change on its next poll (see
    // `rfid_common::config_subscriber`).
    let path = format!("locationConfigs/{name}");
    match state.store.write(&path, WriteMode::Update, &patch, &token).await {
        Ok(outcome) if (200..300).contains(&outcome.status) => {
            (StatusCode::OK, Json(json!({"success": true}))).into_response()
        }
        Ok(outcome) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": format!("document store rejected the write with status {}", outcome.status)})),
        )
            .into_response(),
        Err(err) => (StatusCode::BAD_GATEWAY, Json(json!({"error": err.to_string()}))).into_response(),
    }
}

async fn redis_status(State(state): State<ApiState>) -> impl IntoResponse {
    let len = state.queue.len().await.unwrap_or(0);
    Json(json!({
        "connected": true,
        "retryQueueLength": len,
        "isProcessing": true,
    }))
}

async fn updates_status() -> impl IntoResponse {
    Json(json!({"status": "idle"}))
}

fn config_to_json(config: &rfid_common::config_subscriber::LocationConfig) -> serde_json::Value {
    json!({
        "location": config.location,
        "companyId": config.company_id,
        "frequencyHz": config.frequency_hz,
        "txPowerCdbm": config.tx_power_cdbm,
        "mobileFlag": config.mobile_flag,
        "deduplicate": config.deduplicate,
        "dedupIntervalMinutes": config.dedup_interval_minutes,
        "reporting": config.reporting,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rfid_common::document_store::{DocumentStoreError, WriteOutcome};
    use rfid_common::queue::InMemoryQueueBackend;

    struct NoopStore;

    #[async_trait]
    impl DocumentStoreClient for NoopStore {
        async fn write(
            &self,
            _path: &str,
            _mode: WriteMode,
            _body: &serde_json::Value,
            _bearer_token: &str,
        ) -> Result<WriteOutcome, DocumentStoreError> {
            Ok(WriteOutcome { status: 200, body: String::new() })
        }

        async fn get(&self, _path: &str, _bearer_token: &str) -> Result<Option<serde_json::Value>, DocumentStoreError> {
            Ok(None)
        }

        async fn watch_snapshot(&self, _collection_path: &str, _bearer_token: &str) -> Result<serde_json::Value, DocumentStoreError> {
            Ok(serde_json::json!({}))
        }
    }

    struct NoopAuthClient;

    #[async_trait]
    impl rfid_common::document_store::AuthEndpointClient for NoopAuthClient {
        async fn exchange_invitation(&self, _invitation_code: &str) -> Result<rfid_common::document_store::AuthTokens, DocumentStoreError> {
            Ok(rfid_common::document_store::AuthTokens {
                token: "t".to_string(),
                location: "wh-1".to_string(),
                company: "acme".to_string(),
                expires_in_seconds: 3600,
            })
        }
        async fn refresh(&self, _token: &str) -> Result<rfid_common::document_store::AuthTokens, DocumentStoreError> {
            Ok(rfid_common::document_store::AuthTokens {
                token: "t".to_string(),
                location: "wh-1".to_string(),
                company: "acme".to_string(),
                expires_in_seconds: 3600,
            })
        }
    }

    fn state() -> ApiState {
        ApiState {
            health: HealthRegistry::new("liveness"),
            auth_health: Arc::new(AuthHealth::default()),
            config: ConfigSubscriber::new(),
            queue: Arc::new(InMemoryQueueBackend::new()),
            queue_capacity: 100,
            store: Arc::new(NoopStore),
            auth: Arc::new(AuthManager::new(
                Arc::new(NoopAuthClient),
                std::env::temp_dir().join(format!("api-test-auth-{}.json", std::process::id())),
                "invite".to_string(),
            )),
        }
    }

    #[tokio::test]
    async fn missing_company_id_is_a_bad_request() {
        let query = Query(CompanyQuery { company_id: None });
        let response = get_location_config(State(state()), Path("wh-1".to_string()), query).await;
        assert_eq!(response.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_location_is_not_found() {
        let query = Query(CompanyQuery { company_id: Some("acme".to_string()) });
        let response = get_location_config(State(state()), Path("missing".to_string()), query).await;
        assert_eq!(response.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn put_location_config_writes_through_to_the_document_store() {
        let state = state();
        state.auth.bootstrap().await.unwrap();

        let query = Query(CompanyQuery { company_id: Some("acme".to_string()) });
        let patch = Json(json!({"dedupIntervalMinutes": 5}));
        let response = put_location_config(State(state), Path("wh-1".to_string()), query, patch).await;
        assert_eq!(response.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn put_location_config_missing_company_id_is_a_bad_request() {
        let query = Query(CompanyQuery { company_id: None });
        let patch = Json(json!({}));
        let response = put_location_config(State(state()), Path("wh-1".to_string()), query, patch).await;
        assert_eq!(response.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
