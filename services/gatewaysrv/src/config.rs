//! Service configuration
//!
//! Layered with figment: built-in defaults, an optional YAML file, then
//! `GTW_*` environment variables. `GTW_HTTP_*`, `GTW_MQTT_*`, `GTW_API_*`
//! and `GTW_LOG_*` land in their sections, everything else at the top.

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GatewaySrvError, Result};
use crate::poller::PollerSettings;
use crate::upstream::{HttpUpstreamConfig, MqttConfig};

pub const ENV_PREFIX: &str = "GTW_";
const SECTIONS: [&str; 4] = ["http", "mqtt", "api", "log"];

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Devices to manage
    #[serde(deserialize_with = "string_list")]
    pub poll_device_ids: Vec<u32>,
    /// Global refresh cycle
    #[serde(with = "duration_secs")]
    pub update_period: Duration,
    #[serde(with = "duration_secs")]
    pub unreachable_reset_period: Duration,
    pub unreachable_threshold: u32,
    /// Priority level at or above which a non-null entry sets OVERRIDEN
    pub override_threshold: u8,
    /// Drain timeout for pollers on shutdown and refresh
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,
    pub api: ApiConfig,
    pub http: HttpUpstreamConfig,
    pub mqtt: MqttConfig,
    pub log: LogSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            poll_device_ids: Vec::new(),
            update_period: Duration::from_secs(3600),
            unreachable_reset_period: Duration::from_secs(600),
            unreachable_threshold: 3,
            override_threshold: 8,
            shutdown_timeout: Duration::from_secs(60),
            api: ApiConfig::default(),
            http: HttpUpstreamConfig::default(),
            mqtt: MqttConfig::default(),
            log: LogSettings::default(),
        }
    }
}

/// JSON-RPC ingress (`api.*`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub url: String,
    /// Priority for writes that do not name one
    pub priority: u8,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: "0.0.0.0:8080".to_string(),
            priority: 8,
        }
    }
}

/// Logging (`log.*`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub dir: PathBuf,
    /// Rotate the log file past this many bytes
    pub file_size: u64,
    /// `text` or `json`
    pub format: String,
    pub enable_file: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: PathBuf::from("logs"),
            file_size: 10 * 1024 * 1024,
            format: "text".to_string(),
            enable_file: true,
        }
    }
}

impl LogSettings {
    pub fn to_log_config(&self, service_name: &str) -> Result<common::logging::LogConfig> {
        let format = self.format.parse().map_err(GatewaySrvError::config)?;
        Ok(common::logging::LogConfig {
            service_name: service_name.to_string(),
            log_dir: self.dir.clone(),
            level: self.level.clone(),
            format,
            max_file_size: self.file_size,
            enable_file: self.enable_file,
        })
    }
}

impl GatewayConfig {
    /// Provider stack without extraction
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(GatewayConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(
            Env::prefixed(ENV_PREFIX)
                .ignore(&["config"])
                .map(|key| env_key(key.as_str()).into()),
        )
    }

    /// Load and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(GatewaySrvError::config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
        }
        let config: GatewayConfig = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_device_ids.is_empty() {
            return Err(GatewaySrvError::config("poll_device_ids cannot be empty"));
        }
        for (name, period) in [
            ("update_period", self.update_period),
            ("unreachable_reset_period", self.unreachable_reset_period),
            ("shutdown_timeout", self.shutdown_timeout),
            ("http.timeout", self.http.timeout),
        ] {
            if period.is_zero() {
                return Err(GatewaySrvError::config(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if self.unreachable_threshold == 0 {
            return Err(GatewaySrvError::config(
                "unreachable_threshold must be greater than zero",
            ));
        }
        if !(1..=16).contains(&self.override_threshold) {
            return Err(GatewaySrvError::config(format!(
                "override_threshold must be 1..=16, got {}",
                self.override_threshold
            )));
        }
        if !(1..=16).contains(&self.api.priority) {
            return Err(GatewaySrvError::config(format!(
                "api.priority must be 1..=16, got {}",
                self.api.priority
            )));
        }
        if self.mqtt.qos > 2 {
            return Err(GatewaySrvError::config(format!(
                "mqtt.qos must be 0, 1 or 2, got {}",
                self.mqtt.qos
            )));
        }
        if self.http.get_servers().is_empty() {
            return Err(GatewaySrvError::config("No upstream HTTP server configured"));
        }
        Ok(())
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            unreachable_threshold: self.unreachable_threshold,
            unreachable_reset_period: self.unreachable_reset_period,
        }
    }
}

/// `http_server_get` -> `http.server_get`; unsectioned keys pass through
pub fn env_key(key: &str) -> String {
    let key = key.to_ascii_lowercase();
    for section in SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{}.{}", section, rest);
        }
    }
    key
}

/// Durations as (fractional) seconds
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "invalid number of seconds: {}",
                secs
            )));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// A list given as a sequence, a comma-separated string or a single value
pub fn string_list<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + std::str::FromStr,
    T::Err: std::fmt::Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrText<T> {
        List(Vec<T>),
        Text(String),
        One(T),
    }

    match ListOrText::<T>::deserialize(deserializer)? {
        ListOrText::List(items) => Ok(items),
        ListOrText::One(item) => Ok(vec![item]),
        ListOrText::Text(text) => text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<T>().map_err(serde::de::Error::custom))
            .collect(),
    }
}
