//! Configuration management for the GIS engine.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::automation::AutomationType;
use crate::error::{Error, Result};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Spatial store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Automation configuration.
    #[serde(default)]
    pub automation: AutomationConfig,

    /// HTTP API configuration.
    #[serde(default)]
    pub api: ApiConfig,

    /// Event delivery configuration.
    #[serde(default)]
    pub events: EventsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.automation.tick_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "Automation tick interval must be non-zero".into(),
            ));
        }

        for name in &self.automation.start {
            name.parse::<AutomationType>()
                .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        }

        if self.events.channel_capacity == 0 {
            return Err(Error::InvalidConfig(
                "Event channel capacity must be non-zero".into(),
            ));
        }

        Ok(())
    }

    /// Automation types to enable at startup.
    pub fn startup_automation(&self) -> Result<Vec<AutomationType>> {
        self.automation
            .start
            .iter()
            .map(|name| name.parse::<AutomationType>().map_err(Error::from))
            .collect()
    }

    /// Get default config path.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("org", "gis-engine", "gis-engine").map_or_else(
            || PathBuf::from("gis-engine.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    /// Create example configuration.
    pub fn example() -> Self {
        Self {
            store: StoreConfig {
                path: Some(PathBuf::from("/var/lib/gis-engine/geo.db")),
            },
            automation: AutomationConfig {
                start: vec![
                    AutomationType::Movement.to_string(),
                    AutomationType::Mobility.to_string(),
                ],
                ..Default::default()
            },
            events: EventsConfig {
                log_events: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Spatial store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file; in-memory when unset.
    pub path: Option<PathBuf>,
}

/// Automation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Period of the automation tick.
    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Automation types enabled at startup.
    #[serde(default)]
    pub start: Vec<String>,
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            start: vec![],
        }
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Serve the API.
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,

    /// Bind address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Enable CORS.
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,

    /// Grace period for in-flight requests on shutdown.
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

fn default_api_enabled() -> bool {
    true
}
fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}
fn default_enable_cors() -> bool {
    true
}
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            bind_addr: default_bind_addr(),
            enable_cors: default_enable_cors(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Event delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Capacity of the subscriber channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Also write every event to the log.
    #[serde(default)]
    pub log_events: bool,
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            log_events: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log file path; stderr when unset.
    pub file: Option<PathBuf>,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            color: default_color(),
        }
    }
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use std::sync::Mutex;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);
    let json = config.format == "json";

    let result = match config.file {
        Some(ref path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::Config(format!("Failed to open log file: {e}")))?;
            let writer = Mutex::new(file);
            if json {
                subscriber.with(fmt::layer().json().with_writer(writer)).try_init()
            } else {
                subscriber
                    .with(fmt::layer().with_ansi(false).with_writer(writer))
                    .try_init()
            }
        }
        None if json => subscriber.with(fmt::layer().json()).try_init(),
        None => subscriber.with(fmt::layer().with_ansi(config.color)).try_init(),
    };

    result.map_err(|e| Error::Config(format!("Failed to init logging: {e}")))
}
