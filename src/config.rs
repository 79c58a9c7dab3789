//! Configuration module for Beacon.
//!
//! Loads configuration from a TOML file with environment variable
//! substitution. Every field has a default, so a missing file is fine.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 8080
//!
//! [queue]
//! capacity = 1024
//! admission = "reject"
//!
//! [worker]
//! count = 8
//! shutdown_grace_ms = 10000
//!
//! [webhook]
//! url = "${BEACON_WEBHOOK_URL}"
//! timeout_ms = 5000
//! max_attempts = 3
//! ```

use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::delivery::{RetryPolicy, WebhookClient};
use crate::queue::{AdmissionMode, AdmissionPolicy};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BeaconConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

/// Dispatch queue configuration
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Maximum number of events waiting for a worker
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// "reject" (default) or "block"
    #[serde(default)]
    pub admission: AdmissionMode,

    /// How long a producer may wait for space under "block"
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            admission: AdmissionMode::default(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
        }
    }
}

impl QueueConfig {
    pub fn admission_policy(&self) -> AdmissionPolicy {
        match self.admission {
            AdmissionMode::Reject => AdmissionPolicy::Reject,
            AdmissionMode::Block => AdmissionPolicy::Block {
                timeout: Duration::from_millis(self.enqueue_timeout_ms),
            },
        }
    }
}

fn default_capacity() -> usize {
    1024
}

fn default_enqueue_timeout_ms() -> u64 {
    500
}

/// Worker pool configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// How long shutdown waits for the queue to drain
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_worker_count() -> usize {
    5
}

fn default_shutdown_grace_ms() -> u64 {
    10000
}

/// Webhook delivery configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_url")]
    pub url: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Total attempts per event, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Backoff jitter fraction, 0.0 to 1.0
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: default_webhook_url(),
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl WebhookConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_factor: self.jitter,
        }
    }

    /// Build the delivery client described by this section.
    pub fn build_client(&self) -> WebhookClient {
        WebhookClient::new(&self.url)
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_retry_policy(self.retry_policy())
    }
}

fn default_webhook_url() -> String {
    "http://localhost:9000/webhook".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_jitter() -> f64 {
    0.25
}

impl BeaconConfig {
    /// Load configuration from the default path or BEACON_CONFIG env var,
    /// then apply `PORT` and `BEACON_WEBHOOK_URL` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var("BEACON_CONFIG").unwrap_or_else(|_| "config/beacon.toml".to_string());

        let mut config = Self::read_from(&config_path)?;
        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::read_from(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let content = substitute_env_vars(&content);

        debug!("Parsing TOML configuration");
        let config: BeaconConfig = toml::from_str(&content)?;

        info!(
            workers = config.worker.count,
            queue_capacity = config.queue.capacity,
            admission = ?config.queue.admission,
            "Configuration loaded"
        );

        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    /// Apply `PORT` and `BEACON_WEBHOOK_URL` as resolved by `lookup`.
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("PORT '{}' is not a valid port", port))
            })?;
        }

        if let Some(url) = lookup("BEACON_WEBHOOK_URL") {
            self.webhook.url = url;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "queue.capacity must be at least 1".to_string(),
            ));
        }

        if self.worker.count == 0 {
            return Err(ConfigError::ValidationError(
                "worker.count must be at least 1".to_string(),
            ));
        }

        let webhook = &self.webhook;

        if webhook.url.contains("${") {
            return Err(ConfigError::ValidationError(format!(
                "webhook.url contains an unsubstituted environment variable: {}",
                webhook.url
            )));
        }

        if !webhook.url.starts_with("http://") && !webhook.url.starts_with("https://") {
            return Err(ConfigError::ValidationError(
                "webhook.url must start with http:// or https://".to_string(),
            ));
        }

        if webhook.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "webhook.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if webhook.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "webhook.max_attempts must be at least 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&webhook.jitter) {
            return Err(ConfigError::ValidationError(
                "webhook.jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if webhook.base_delay_ms > webhook.max_delay_ms {
            warn!(
                base_delay_ms = webhook.base_delay_ms,
                max_delay_ms = webhook.max_delay_ms,
                "Retry base delay exceeds max delay; every backoff will be capped"
            );
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is valid")
    });

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                caps[0].to_string()
            }
        }
    })
    .to_string()
}
