//! Environment variable names read by [`crate::config::InfluxLogConfig::from_env`].
//!
//! These are purely helpers; the core sink types remain decoupled from
//! environment access.

/// InfluxDB base HTTP URL, e.g. `http://127.0.0.1:8086`.
pub const INFLUX_LOG_URL_ENV: &str = "INFLUX_LOG_URL";

/// API token used in the `Authorization: Token ..` header.
pub const INFLUX_LOG_TOKEN_ENV: &str = "INFLUX_LOG_TOKEN";

/// Target organization.
pub const INFLUX_LOG_ORG_ENV: &str = "INFLUX_LOG_ORG";

/// Target bucket.
pub const INFLUX_LOG_BUCKET_ENV: &str = "INFLUX_LOG_BUCKET";

/// Value of the `app` tag on every point.
pub const INFLUX_LOG_APP_ENV: &str = "INFLUX_LOG_APP";

/// Minimum level, e.g. `info`.
pub const INFLUX_LOG_LEVEL_ENV: &str = "INFLUX_LOG_LEVEL";

/// Comma-separated per-scope overrides, e.g. `db=warn,http::client=debug`.
pub const INFLUX_LOG_SCOPES_ENV: &str = "INFLUX_LOG_SCOPES";

/// `true`/`false`: record `file:line` of each event.
pub const INFLUX_LOG_CALLER_ENV: &str = "INFLUX_LOG_CALLER";

/// Level at and above which the span stack is recorded, or `off`.
pub const INFLUX_LOG_STACK_ENV: &str = "INFLUX_LOG_STACK";

/// `flat` or `blob`.
pub const INFLUX_LOG_ENCODING_ENV: &str = "INFLUX_LOG_ENCODING";

/// `true`/`false`: also print events to stdout.
pub const INFLUX_LOG_STDOUT_ENV: &str = "INFLUX_LOG_STDOUT";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
