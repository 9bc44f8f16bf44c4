//! Configuration for the InfluxDB log adapter.
//!
//! Loadable from YAML or from `INFLUX_LOG_*` environment variables, then
//! validated and split into the constructor arguments of the builder,
//! the sink and the layer.

use crate::async_sink::SinkOptions;
use crate::builder::{FieldEncoding, PointBuilder};
use crate::env::*;
use crate::layer::LevelPolicy;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tokio::time::Duration;
use tracing::Level;

#[cfg(feature = "influx")]
use crate::influx::InfluxConfig;

/// Error returned while loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid level '{value}' for {setting}")]
    InvalidLevel { setting: String, value: String },

    #[error("invalid setting: {0}")]
    Invalid(String),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Full adapter configuration.
///
/// **Fields**
/// - `url`, `token`, `org`, `bucket`: InfluxDB v2 write target.
/// - `app_name`: value of the `app` tag on every point.
/// - `caller`: record `file:line` of each event.
/// - `stack`: level at and above which the span stack is recorded;
///   `None` or `"off"` disables it.
/// - `level`: minimum level written.
/// - `scopes`: per-scope minimum levels, matched on the event target.
/// - `channel_buffer`, `batch_size`, `flush_interval_ms`, `max_retries`,
///   `request_timeout_ms`: delivery tuning.
/// - `enable_stdout`: also install a `fmt` layer.
#[derive(Clone, Debug, Deserialize)]
pub struct InfluxLogConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub bucket: String,
    pub app_name: String,
    #[serde(default = "default_caller")]
    pub caller: bool,
    #[serde(default = "default_stack")]
    pub stack: Option<String>,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub scopes: BTreeMap<String, String>,
    #[serde(default)]
    pub encoding: FieldEncoding,
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub verify_connection: bool,
    #[serde(default)]
    pub enable_stdout: bool,
}

fn default_caller() -> bool {
    true
}

fn default_stack() -> Option<String> {
    Some("error".to_string())
}

fn default_level() -> String {
    "info".to_string()
}

fn default_channel_buffer() -> usize {
    1024
}

fn default_batch_size() -> usize {
    128
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl InfluxLogConfig {
    /// Config with defaults for everything but the app name.
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            org: String::new(),
            bucket: String::new(),
            app_name: app_name.into(),
            caller: default_caller(),
            stack: default_stack(),
            level: default_level(),
            scopes: BTreeMap::new(),
            encoding: FieldEncoding::default(),
            channel_buffer: default_channel_buffer(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            max_retries: default_max_retries(),
            request_timeout_ms: default_request_timeout_ms(),
            verify_connection: false,
            enable_stdout: false,
        }
    }

    /// Set the InfluxDB write target.
    pub fn with_target(
        mut self,
        url: impl Into<String>,
        token: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        self.url = url.into();
        self.token = token.into();
        self.org = org.into();
        self.bucket = bucket.into();
        self
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: InfluxLogConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Parse configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load configuration from the `INFLUX_LOG_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let app_name = lookup(INFLUX_LOG_APP_ENV).ok_or(ConfigError::Missing(INFLUX_LOG_APP_ENV))?;
        let mut config = Self::new(app_name).with_target(
            lookup(INFLUX_LOG_URL_ENV).unwrap_or_default(),
            lookup(INFLUX_LOG_TOKEN_ENV).unwrap_or_default(),
            lookup(INFLUX_LOG_ORG_ENV).unwrap_or_default(),
            lookup(INFLUX_LOG_BUCKET_ENV).unwrap_or_default(),
        );

        if let Some(level) = lookup(INFLUX_LOG_LEVEL_ENV) {
            config.level = level;
        }
        if let Some(stack) = lookup(INFLUX_LOG_STACK_ENV) {
            config.stack = Some(stack);
        }
        if let Some(caller) = lookup(INFLUX_LOG_CALLER_ENV) {
            config.caller = parse_bool(INFLUX_LOG_CALLER_ENV, &caller)?;
        }
        if let Some(stdout) = lookup(INFLUX_LOG_STDOUT_ENV) {
            config.enable_stdout = parse_bool(INFLUX_LOG_STDOUT_ENV, &stdout)?;
        }
        if let Some(encoding) = lookup(INFLUX_LOG_ENCODING_ENV) {
            config.encoding = match encoding.trim().to_ascii_lowercase().as_str() {
                "flat" => FieldEncoding::Flat,
                "blob" => FieldEncoding::Blob,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "{}: unknown encoding '{}'",
                        INFLUX_LOG_ENCODING_ENV, other
                    )))
                }
            };
        }
        if let Some(scopes) = lookup(INFLUX_LOG_SCOPES_ENV) {
            config.scopes = parse_scopes(&scopes)?;
        }

        Ok(config)
    }

    /// Check everything needed to build the layer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::Missing("app_name"));
        }
        self.level_policy().map(|_| ())
    }

    /// Check the write target on top of [`InfluxLogConfig::validate`].
    pub fn validate_target(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.url.trim().is_empty() {
            return Err(ConfigError::Missing("url"));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "url must start with http:// or https://, got '{}'",
                self.url
            )));
        }
        if self.org.trim().is_empty() {
            return Err(ConfigError::Missing("org"));
        }
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::Missing("bucket"));
        }
        Ok(())
    }

    pub fn level_policy(&self) -> Result<LevelPolicy, ConfigError> {
        let mut policy = LevelPolicy::new(parse_level("level", &self.level)?)
            .with_caller(self.caller)
            .with_stack(parse_optional_level("stack", self.stack.as_deref())?);
        for (scope, level) in &self.scopes {
            policy = policy.with_scope(scope.clone(), parse_level(scope, level)?);
        }
        Ok(policy)
    }

    pub fn point_builder(&self) -> PointBuilder {
        PointBuilder::new(self.app_name.clone(), self.encoding)
    }

    pub fn sink_options(&self) -> SinkOptions {
        SinkOptions {
            channel_buffer: self.channel_buffer,
            batch_size: self.batch_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            max_retries: self.max_retries,
            verify_connection: self.verify_connection,
        }
    }

    #[cfg(feature = "influx")]
    pub fn influx_config(&self) -> InfluxConfig {
        InfluxConfig {
            url: self.url.clone(),
            token: self.token.clone(),
            org: self.org.clone(),
            bucket: self.bucket.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

fn parse_level(setting: &str, value: &str) -> Result<Level, ConfigError> {
    Level::from_str(value.trim()).map_err(|_| ConfigError::InvalidLevel {
        setting: setting.to_string(),
        value: value.to_string(),
    })
}

fn parse_optional_level(setting: &str, value: Option<&str>) -> Result<Option<Level>, ConfigError> {
    match value.map(str::trim) {
        None => Ok(None),
        Some(v) if v.is_empty() || v.eq_ignore_ascii_case("off") || v.eq_ignore_ascii_case("none") => {
            Ok(None)
        }
        Some(v) => parse_level(setting, v).map(Some),
    }
}

fn parse_bool(setting: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid(format!(
            "{}: expected a boolean, got '{}'",
            setting, other
        ))),
    }
}

/// Parse `scope=level,scope=level`.
fn parse_scopes(value: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut scopes = BTreeMap::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (scope, level) = entry.split_once('=').ok_or_else(|| {
            ConfigError::Invalid(format!("{}: expected scope=level, got '{}'", INFLUX_LOG_SCOPES_ENV, entry))
        })?;
        scopes.insert(scope.trim().to_string(), level.trim().to_string());
    }
    Ok(scopes)
}
