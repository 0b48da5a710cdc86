//! Subscribes to the RFID broker, deduplicates tag reads, and stages
//! accepted documents for the gateway's Forwarder to deliver.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use chrono::Utc;
use envconfig::Envconfig;
use rfid_common::config_store::GroupFile;
use rfid_common::config_subscriber::ConfigSubscriber;
use rfid_common::dedup::Deduplicator;
use rfid_common::document_store::HttpDocumentStoreClient;
use rfid_common::health::HealthRegistry;
use rfid_common::metrics::{serve, setup_metrics_routes};
use rfid_common::queue::{InMemoryQueueBackend, QueueBackend, RedisQueueBackend};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use time::Duration as TimeDuration;
use tracing::{debug, error, warn};

mod config;
mod decision;
mod error;
mod message;

use config::Config;
use error::IngestorError;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let group_file = match &config.host_group_file {
        Some(path) => GroupFile::load(path).expect("failed to load host-group file"),
        None => GroupFile::identity(),
    };

    let liveness = HealthRegistry::new("liveness");
    let ingest_liveness = liveness
        .register("mqtt_subscriber".to_string(), TimeDuration::seconds(60))
        .await;

    // Must be the same Redis instance the Gateway's Forwarder drains:
    // Ingestor and Gateway are separate processes, so a staged document
    // only ever reaches the Forwarder if both point at the same durable
    // queue. The in-process fallback is only for when that store is
    // unreachable at startup.
    let queue: Arc<dyn QueueBackend> = match RedisQueueBackend::new(&config.redis_address()) {
        Ok(backend) => Arc::new(backend),
        Err(err) => {
            warn!(error = %err, "durable queue store unreachable at startup, using in-process fallback");
            Arc::new(InMemoryQueueBackend::new())
        }
    };
    let queue_limits = rfid_common::queue::QueueLimits {
        max_entries: config.max_queue_size,
        max_memory_mb: config.max_memory_mb,
    };

    let dedup = Arc::new(Deduplicator::new(1));
    {
        let queue = queue.clone();
        dedup.set_on_delayed_report(Arc::new(move |document| {
            let queue = queue.clone();
            Box::pin(async move {
                let now = Utc::now();
                if let Err(err) = decision::stage(queue.as_ref(), document, queue_limits, now).await {
                    error!(error = %err, "failed to stage delayed report");
                }
            })
        }));
    }

    let config_subscriber = ConfigSubscriber::new();
    {
        let subscriber = config_subscriber.clone();
        let store = Arc::new(
            HttpDocumentStoreClient::new(config.document_store_url.clone())
                .expect("failed to construct document store client"),
        );
        let api_key = config.document_store_api_key.clone();
        let poll_interval = Duration::from_secs(config.config_poll_interval_secs);
        tokio::spawn(async move {
            let token_source: Arc<dyn Fn() -> futures::future::BoxFuture<'static, String> + Send + Sync> = {
                let api_key = api_key.clone();
                Arc::new(move || {
                    let api_key = api_key.clone();
                    Box::pin(async move { api_key })
                })
            };
            subscriber
                .run(store, "locationConfigs".to_string(), token_source, poll_interval)
                .await;
        });
    }

    let router = Router::new()
        .route("/_readiness", get(|| async { "ok" }))
        .route(
            "/_liveness",
            get({
                let liveness = liveness.clone();
                move || {
                    let liveness = liveness.clone();
                    async move { liveness.get_status() }
                }
            }),
        );
    let router = setup_metrics_routes(router);
    let bind = config.bind();
    tokio::spawn(async move {
        if let Err(err) = serve(router, &bind).await {
            error!(error = %err, "failed to start ingestor http server");
        }
    });

    run_mqtt_loop(config, group_file, dedup, queue, config_subscriber, ingest_liveness).await
}

async fn run_mqtt_loop(
    config: Config,
    group_file: GroupFile,
    dedup: Arc<Deduplicator>,
    queue: Arc<dyn QueueBackend>,
    config_subscriber: ConfigSubscriber,
    liveness: rfid_common::health::HealthHandle,
) -> eyre::Result<()> {
    let (mqtt_host, mqtt_port) = config.mqtt_broker_address();
    let client_id = format!(
        "{}-{}",
        random_client_suffix(),
        if config.mobile { "mobile" } else { "fixed" }
    );

    let mut mqtt_options = MqttOptions::new(client_id, mqtt_host, mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(config.mqtt_alive_interval_secs));
    mqtt_options.set_clean_session(true);

    let (client, mut event_loop) = AsyncClient::new(mqtt_options, 100);
    client
        .subscribe(&config.mqtt_topic, QoS::ExactlyOnce)
        .await
        .map_err(IngestorError::Mqtt)?;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                liveness.report_healthy().await;
                handle_publish(
                    &publish.topic,
                    &publish.payload,
                    &group_file,
                    &config,
                    &config_subscriber,
                    &dedup,
                    queue.as_ref(),
                )
                .await;
            }
            Ok(_) => {}
            Err(err) => {
                error!(error = %err, "mqtt connection error, reconnecting");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_publish(
    topic: &str,
    payload: &[u8],
    group_file: &GroupFile,
    config: &Config,
    config_subscriber: &ConfigSubscriber,
    dedup: &Deduplicator,
    queue: &dyn QueueBackend,
) {
    let now = Utc::now();
    let snapshot = config_subscriber.snapshot();
    let location_config = snapshot.by_location.get(&config.location_name);
    let ctx = decision::process_context(config, location_config);

    if let Some(minutes) = location_config.and_then(|c| c.dedup_interval_minutes) {
        dedup.set_interval(minutes);
    }

    let queue_limits = rfid_common::queue::QueueLimits {
        max_entries: config.max_queue_size,
        max_memory_mb: config.max_memory_mb,
    };

    match message::parse(payload, topic) {
        Ok(message::ParsedMessage::TagInventory(event)) => {
            match decision::decide(event, group_file, location_config, &ctx, dedup, queue, queue_limits, now).await {
                Ok(outcome) => debug!(?outcome, "processed tag inventory message"),
                Err(err) => error!(error = %err, "failed to stage tag document"),
            }
        }
        Ok(message::ParsedMessage::Generic { hostname, payload }) => {
            let document = rfid_common::model::GenericEventDocument {
                hostname,
                server_timestamp: now,
                read: false,
                payload,
            };
            debug!(?document, "received generic event");
        }
        Err(err) => {
            metrics::counter!("ingestor_parse_errors_total").increment(1);
            debug!(error = %err, topic, "dropping unparseable message");
        }
    }
}

fn random_client_suffix() -> String {
    use rand::Rng;
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}
