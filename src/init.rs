use crate::async_sink::{AsyncSink, DeliveryReport, SinkError};
use crate::config::{ConfigError, InfluxLogConfig};
use crate::layer::InfluxLayer;
use crate::sink::PointWriter;
use std::sync::Arc;
use tokio::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Default bound for [`InfluxGuard::shutdown_default`].
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Error returned while installing the global subscriber.
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Keeps the sink reachable for shutdown.
///
/// Dropping the guard without calling [`InfluxGuard::shutdown`] still lets
/// the delivery task drain in the background, but nothing waits for it.
pub struct InfluxGuard {
    sink: Arc<AsyncSink>,
}

impl InfluxGuard {
    pub fn sink(&self) -> &Arc<AsyncSink> {
        &self.sink
    }

    /// Flush all pending points and stop the delivery task.
    pub async fn shutdown(&self, timeout: Duration) -> Result<DeliveryReport, SinkError> {
        self.sink.close(timeout).await
    }

    pub async fn shutdown_default(&self) -> Result<DeliveryReport, SinkError> {
        self.shutdown(DEFAULT_SHUTDOWN_TIMEOUT).await
    }
}

/// Build the layer for a running sink, for callers that compose their own
/// subscriber.
pub fn build_layer(sink: Arc<AsyncSink>, config: &InfluxLogConfig) -> Result<InfluxLayer, ConfigError> {
    config.validate()?;
    Ok(InfluxLayer::new(
        config.point_builder(),
        sink,
        config.level_policy()?,
    ))
}

/// Connect to InfluxDB and install the global `tracing` subscriber.
///
/// **Effects**
///
/// Installs a [`Registry`] combined with [`InfluxLayer`] (and a `fmt`
/// layer when `enable_stdout` is set) as the global default subscriber,
/// so all `tracing` events in the process are observed by the layer.
///
/// Must be called within a tokio runtime.
#[cfg(feature = "influx")]
pub async fn init_tracing(config: &InfluxLogConfig) -> Result<InfluxGuard, InitError> {
    config.validate_target()?;
    let sink = AsyncSink::connect(&config.influx_config(), config.sink_options()).await?;
    install(Arc::new(sink), config)
}

/// Like [`init_tracing`], with a caller-provided writer instead of the
/// InfluxDB HTTP client.
///
/// Must be called within a tokio runtime; the delivery task is spawned
/// on it.
pub fn init_tracing_with_writer(
    writer: Arc<dyn PointWriter>,
    config: &InfluxLogConfig,
) -> Result<InfluxGuard, InitError> {
    config.validate()?;
    let sink = Arc::new(AsyncSink::start(writer, config.sink_options()));
    install(sink, config)
}

fn install(sink: Arc<AsyncSink>, config: &InfluxLogConfig) -> Result<InfluxGuard, InitError> {
    let layer = build_layer(Arc::clone(&sink), config)?;

    // Two arms because the layered subscriber types differ.
    let installed = if config.enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)
    };
    installed.map_err(|e| InitError::AlreadyInitialized(e.to_string()))?;

    Ok(InfluxGuard { sink })
}
