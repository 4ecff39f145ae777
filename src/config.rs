use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub allowed_origins: Option<String>,

    /// Bus address, either `host:port` or a full `redis://` URL
    pub redis_url: Option<String>,
    pub redis_password: Option<String>,

    // Persistence sink
    pub supabase_url: Option<String>,
    pub supabase_api_key: Option<String>,
    pub supabase_service_role_key: Option<String>,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: u64,

    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    #[serde(default = "default_bus_health_interval_secs")]
    pub bus_health_interval_secs: u64,

    #[serde(default = "default_bus_connect_timeout_secs")]
    pub bus_connect_timeout_secs: u64,

    /// Outbound queue bound per session
    #[serde(default = "default_session_queue_capacity")]
    pub session_queue_capacity: usize,
}

/// Connection parameters for the Redis bus, validated.
#[derive(Debug, Clone)]
pub struct BusSettings {
    pub url: Url,
    pub connect_timeout: Duration,
    pub health_interval: Duration,
}

/// Connection parameters for the Supabase sink.
#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub base_url: String,
    pub api_key: String,
    pub service_role_key: String,
}

/// Timing and sizing knobs for sessions and background loops.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub heartbeat_interval: Duration,
    pub liveness_timeout: Duration,
    pub flush_interval: Duration,
    pub session_queue_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// Bus connection settings. Both the address and the password are required.
    pub fn bus_settings(&self) -> Result<BusSettings, ConfigError> {
        let raw = non_blank(&self.redis_url).ok_or(ConfigError::Missing("REDIS_URL"))?;
        let password = non_blank(&self.redis_password).ok_or(ConfigError::Missing("REDIS_PASSWORD"))?;

        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("redis://{}", raw)
        };
        let mut url = Url::parse(&with_scheme).map_err(|e| ConfigError::InvalidBusUrl(e.to_string()))?;
        url.set_password(Some(password))
            .map_err(|_| ConfigError::InvalidBusUrl(format!("cannot carry a password: {}", raw)))?;

        Ok(BusSettings {
            url,
            connect_timeout: non_zero_secs(self.bus_connect_timeout_secs, "BUS_CONNECT_TIMEOUT_SECS")?,
            health_interval: non_zero_secs(self.bus_health_interval_secs, "BUS_HEALTH_INTERVAL_SECS")?,
        })
    }

    /// Sink settings, or `None` when any of the three keys is missing.
    pub fn sink_settings(&self) -> Option<SinkSettings> {
        Some(SinkSettings {
            base_url: non_blank(&self.supabase_url)?.trim_end_matches('/').to_string(),
            api_key: non_blank(&self.supabase_api_key)?.to_string(),
            service_role_key: non_blank(&self.supabase_service_role_key)?.to_string(),
        })
    }

    /// Session and loop timings. Every interval must be non-zero.
    pub fn relay_settings(&self) -> Result<RelaySettings, ConfigError> {
        Ok(RelaySettings {
            heartbeat_interval: non_zero_secs(self.heartbeat_interval_secs, "HEARTBEAT_INTERVAL_SECS")?,
            liveness_timeout: non_zero_secs(self.liveness_timeout_secs, "LIVENESS_TIMEOUT_SECS")?,
            flush_interval: non_zero_secs(self.flush_interval_secs, "FLUSH_INTERVAL_SECS")?,
            session_queue_capacity: self.session_queue_capacity.max(1),
        })
    }

    /// Explicit CORS origins, empty when any origin is allowed.
    pub fn cors_origins(&self) -> Vec<String> {
        self.allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty() && *o != "*")
            .map(str::to_string)
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            allowed_origins: None,
            redis_url: None,
            redis_password: None,
            supabase_url: None,
            supabase_api_key: None,
            supabase_service_role_key: None,
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            liveness_timeout_secs: default_liveness_timeout_secs(),
            flush_interval_secs: default_flush_interval_secs(),
            bus_health_interval_secs: default_bus_health_interval_secs(),
            bus_connect_timeout_secs: default_bus_connect_timeout_secs(),
            session_queue_capacity: default_session_queue_capacity(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(default_heartbeat_interval_secs()),
            liveness_timeout: Duration::from_secs(default_liveness_timeout_secs()),
            flush_interval: Duration::from_secs(default_flush_interval_secs()),
            session_queue_capacity: default_session_queue_capacity(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
    #[error("Missing required setting {0}")]
    Missing(&'static str),
    #[error("Invalid bus address: {0}")]
    InvalidBusUrl(String),
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

fn non_zero_secs(secs: u64, key: &'static str) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::ZeroInterval(key));
    }
    Ok(Duration::from_secs(secs))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_liveness_timeout_secs() -> u64 {
    60
}

fn default_flush_interval_secs() -> u64 {
    10
}

fn default_bus_health_interval_secs() -> u64 {
    30
}

fn default_bus_connect_timeout_secs() -> u64 {
    10
}

fn default_session_queue_capacity() -> usize {
    256
}
