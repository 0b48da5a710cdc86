//! Authenticates with the remote document store, maintains a live
//! configuration snapshot, and drains the Staging Queue into the store.

use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;
use rfid_common::config_subscriber::ConfigSubscriber;
use rfid_common::document_store::{HttpAuthEndpointClient, HttpDocumentStoreClient};
use rfid_common::health::HealthRegistry;
use rfid_common::metrics::{serve, setup_metrics_routes};
use rfid_common::queue::{InMemoryQueueBackend, QueueBackend, RedisQueueBackend};
use rfid_common::retry::RetryPolicy;
use time::Duration as TimeDuration;
use tracing::{error, warn};

mod api;
mod auth;
mod config;
mod error;
mod forwarder;

use auth::AuthManager;
use config::Config;
use forwarder::Forwarder;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let liveness = HealthRegistry::new("liveness");
    let forwarder_liveness = liveness
        .register("forwarder".to_string(), TimeDuration::seconds(60))
        .await;

    let queue: Arc<dyn QueueBackend> = match RedisQueueBackend::new(&config.redis_address()) {
        Ok(backend) => Arc::new(backend),
        Err(err) => {
            warn!(error = %err, "durable queue store unreachable at startup, using in-process fallback");
            Arc::new(InMemoryQueueBackend::new())
        }
    };

    let store = Arc::new(
        HttpDocumentStoreClient::new(config.firebase_document_store_url.clone())
            .expect("failed to construct document store client"),
    );
    let auth_endpoint = Arc::new(
        HttpAuthEndpointClient::new(config.firebase_functions_url.clone())
            .expect("failed to construct auth endpoint client"),
    );

    let auth = Arc::new(AuthManager::new(
        auth_endpoint,
        &config.auth_state_path,
        config.invitation_code.clone(),
    ));
    auth.bootstrap().await.expect("initial authentication failed");
    auth.clone().spawn_refresh_loop();

    let config_subscriber = ConfigSubscriber::new();
    {
        let subscriber = config_subscriber.clone();
        let store: Arc<dyn rfid_common::document_store::DocumentStoreClient> = store.clone();
        let auth = auth.clone();
        let poll_interval = Duration::from_secs(config.config_poll_interval_secs);
        tokio::spawn(async move {
            let token_source: Arc<dyn Fn() -> futures::future::BoxFuture<'static, String> + Send + Sync> = {
                let auth = auth.clone();
                Arc::new(move || {
                    let auth = auth.clone();
                    Box::pin(async move { auth.current_token().await.unwrap_or_default() })
                })
            };
            subscriber
                .run(store, "locationConfigs".to_string(), token_source, poll_interval)
                .await;
        });
    }

    let forwarder = Arc::new(Forwarder::new(
        queue.clone(),
        store.clone(),
        auth.clone(),
        RetryPolicy::default(),
        config.forwarder_lease_batch_size,
        config.forwarder_max_concurrent_writes,
        Duration::from_millis(config.forwarder_poll_interval_ms),
        chrono::Duration::milliseconds(config.forwarder_lease_duration_ms as i64),
        forwarder_liveness,
    ));
    tokio::spawn(forwarder.run());

    let api_state = api::ApiState {
        health: liveness,
        auth_health: auth.health(),
        config: config_subscriber,
        queue,
        queue_capacity: config.max_queue_size,
        store: store.clone(),
        auth: auth.clone(),
    };
    let router = setup_metrics_routes(api::router(api_state));
    let bind = config.bind();

    if let Err(err) = serve(router, &bind).await {
        error!(error = %err, "gateway http server exited");
    }

    Ok(())
}
