//! Async `tracing` layer that writes log events to InfluxDB as points.
//!
//! ```text
//! tracing event --> InfluxLayer --> PointBuilder --> AsyncSink --> PointWriter
//!                                                   (bounded queue, batching task)
//! ```
//!
//! Every event becomes one point in the `logs` measurement tagged with
//! `app`, `scope` and `level`. Writes happen on a background task; the
//! logging call site only enqueues.

pub mod record;
pub mod point;
pub mod kv;
pub mod builder;
pub mod sink;
pub mod async_sink;
pub mod layer;

#[cfg(feature = "influx")]
pub mod influx;

pub mod config;
pub mod env;
pub mod init;
pub mod noop_sink;

pub use async_sink::{AsyncSink, DeliveryReport, SinkError, SinkOptions, SubmitError};
pub use builder::{FieldEncoding, PointBuilder};
pub use config::InfluxLogConfig;
pub use layer::{InfluxLayer, LevelPolicy};
pub use point::{FieldValue, Point};
pub use record::{LogRecord, MessageSource, Value};
pub use sink::{PointWriter, WriterError};
