//! Environment configuration for the `ingestor` binary, following
//! `hook-worker::config::Config`'s `envconfig::Envconfig` layout.

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3401")]
    pub port: u16,

    #[envconfig(from = "MQTT_HOST", default = "localhost")]
    pub mqtt_host: String,

    #[envconfig(from = "MQTT_PORT", default = "1883")]
    pub mqtt_port: u16,

    #[envconfig(from = "MQTT_TOPIC", default = "rfid/#")]
    pub mqtt_topic: String,

    #[envconfig(from = "MQTT_ALIVE_INTERVAL", default = "60")]
    pub mqtt_alive_interval_secs: u64,

    #[envconfig(from = "LOCATIONNAME")]
    pub location_name: String,

    #[envconfig(from = "COMPANY_ID")]
    pub company_id: String,

    #[envconfig(from = "RFID_FREQUENCY", default = "915000000")]
    pub rfid_frequency_hz: u64,

    #[envconfig(from = "RFID_TRANSMIT_POWER_CDBM", default = "3000")]
    pub rfid_transmit_power_cdbm: i32,

    #[envconfig(from = "MOBILE", default = "false")]
    pub mobile: bool,

    #[envconfig(from = "VERBOSE", default = "false")]
    pub verbose: bool,

    #[envconfig(from = "LOG_ENABLE_TIMESTAMP", default = "true")]
    pub log_enable_timestamp: bool,

    #[envconfig(from = "LOG_ENABLE_COLORED_OUTPUT", default = "false")]
    pub log_enable_colored_output: bool,

    /// Path to the static host-group mapping file (§6). Absent means
    /// every hostname resolves to itself.
    #[envconfig(from = "HOST_GROUP_FILE")]
    pub host_group_file: Option<String>,

    /// Base URL of the remote document store's snapshot/config endpoint,
    /// polled by this process's own `ConfigSubscriber`.
    #[envconfig(from = "DOCUMENT_STORE_URL")]
    pub document_store_url: String,

    /// Static read-only credential for the config snapshot poll. The
    /// Ingestor only reads `locationConfigs`, so it carries a long-lived
    /// key rather than running the Gateway's invitation/refresh flow.
    #[envconfig(from = "DOCUMENT_STORE_API_KEY", default = "")]
    pub document_store_api_key: String,

    #[envconfig(from = "CONFIG_POLL_INTERVAL_SECS", default = "10")]
    pub config_poll_interval_secs: u64,

    #[envconfig(from = "REDIS_HOST", default = "localhost")]
    pub redis_host: String,

    #[envconfig(from = "REDIS_PORT", default = "6379")]
    pub redis_port: u16,

    #[envconfig(from = "REDIS_PASSWORD")]
    pub redis_password: Option<String>,

    #[envconfig(from = "REDIS_DB", default = "0")]
    pub redis_db: u8,

    #[envconfig(from = "MAX_QUEUE_SIZE", default = "100000")]
    pub max_queue_size: usize,

    #[envconfig(from = "MAX_MEMORY_MB", default = "512")]
    pub max_memory_mb: u64,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn mqtt_broker_address(&self) -> (String, u16) {
        (self.mqtt_host.clone(), self.mqtt_port)
    }

    /// The same durable queue the Gateway's `Forwarder` drains — Ingestor
    /// and Gateway are separate processes and must point at the same
    /// Redis instance for staged documents to ever reach the Forwarder.
    pub fn redis_address(&self) -> String {
        let auth = match &self.redis_password {
            Some(password) => format!(":{password}@"),
            None => String::new(),
        };
        format!("redis://{auth}{}:{}/{}", self.redis_host, self.redis_port, self.redis_db)
    }
}
