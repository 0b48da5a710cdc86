//! Environment configuration for the `gateway` binary, following
//! `hook-worker::config::Config`'s `envconfig::Envconfig` layout.

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3501")]
    pub port: u16,

    #[envconfig(from = "LOCATIONNAME")]
    pub location_name: String,

    #[envconfig(from = "COMPANY_ID")]
    pub company_id: String,

    #[envconfig(from = "INVITATION_CODE")]
    pub invitation_code: String,

    #[envconfig(from = "FIREBASE_FUNCTIONS_URL")]
    pub firebase_functions_url: String,

    #[envconfig(from = "FIREBASE_DOCUMENT_STORE_URL")]
    pub firebase_document_store_url: String,

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

    #[envconfig(from = "FORWARDER_LEASE_BATCH_SIZE", default = "50")]
    pub forwarder_lease_batch_size: usize,

    #[envconfig(from = "FORWARDER_MAX_CONCURRENT_WRITES", default = "16")]
    pub forwarder_max_concurrent_writes: usize,

    #[envconfig(from = "FORWARDER_POLL_INTERVAL_MS", default = "200")]
    pub forwarder_poll_interval_ms: u64,

    /// Visibility timeout applied to each leased batch; must exceed the
    /// time a single delivery attempt can realistically take so the next
    /// poll tick never re-leases an entry still in flight.
    #[envconfig(from = "FORWARDER_LEASE_DURATION_MS", default = "30000")]
    pub forwarder_lease_duration_ms: u64,

    #[envconfig(from = "CONFIG_POLL_INTERVAL_SECS", default = "10")]
    pub config_poll_interval_secs: u64,

    #[envconfig(from = "AUTH_STATE_PATH", default = "./gateway_auth_state.json")]
    pub auth_state_path: String,

    #[envconfig(from = "VERBOSE", default = "false")]
    pub verbose: bool,

    #[envconfig(from = "LOG_ENABLE_TIMESTAMP", default = "true")]
    pub log_enable_timestamp: bool,

    #[envconfig(from = "LOG_ENABLE_COLORED_OUTPUT", default = "false")]
    pub log_enable_colored_output: bool,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn redis_address(&self) -> String {
        let auth = match &self.redis_password {
            Some(password) => format!(":{password}@"),
            None => String::new(),
        };
        format!("redis://{auth}{}:{}/{}", self.redis_host, self.redis_port, self.redis_db)
    }
}
