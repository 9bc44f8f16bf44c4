use crate::async_sink::AsyncSink;
use crate::builder::PointBuilder;
use crate::record::{LogRecord, MessageSource, Value};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Targets whose events are never written. The crate's own delivery task
/// and the HTTP stack under it would otherwise feed back into the sink.
const IGNORED_TARGETS: &[&str] = &[
    env!("CARGO_CRATE_NAME"),
    "hyper",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
    "tower",
];

/// `true` when `target` is `scope` itself or a module below it.
fn scope_matches(target: &str, scope: &str) -> bool {
    match target.strip_prefix(scope) {
        Some("") => true,
        Some(rest) => rest.starts_with("::"),
        None => false,
    }
}

/// Which events are written and how much context they carry.
#[derive(Debug, Clone)]
pub struct LevelPolicy {
    min_level: Level,
    scopes: Vec<(String, Level)>,
    capture_caller: bool,
    stack_level: Option<Level>,
}

impl LevelPolicy {
    /// Write events at `min_level` and above, capture the caller, no stack.
    pub fn new(min_level: Level) -> Self {
        Self {
            min_level,
            scopes: Vec::new(),
            capture_caller: true,
            stack_level: None,
        }
    }

    /// Override the minimum level for `scope` and everything below it.
    /// The most specific override wins.
    pub fn with_scope(mut self, scope: impl Into<String>, level: Level) -> Self {
        let scope = scope.into();
        self.scopes.retain(|(s, _)| *s != scope);
        self.scopes.push((scope, level));
        self
    }

    pub fn with_caller(mut self, capture: bool) -> Self {
        self.capture_caller = capture;
        self
    }

    /// Capture the span stack for events at `level` and above.
    pub fn with_stack(mut self, level: Option<Level>) -> Self {
        self.stack_level = level;
        self
    }

    pub fn threshold(&self, scope: &str) -> Level {
        self.scopes
            .iter()
            .filter(|(s, _)| scope_matches(scope, s))
            .max_by_key(|(s, _)| s.len())
            .map(|(_, level)| *level)
            .unwrap_or(self.min_level)
    }

    pub fn enabled(&self, scope: &str, level: &Level) -> bool {
        *level <= self.threshold(scope)
    }

    pub fn capture_caller(&self) -> bool {
        self.capture_caller
    }

    pub fn capture_stack(&self, level: &Level) -> bool {
        self.stack_level.map_or(false, |threshold| *level <= threshold)
    }
}

/// `tracing_subscriber` layer that turns events into points and hands
/// them to an [`AsyncSink`].
///
/// Conversion happens on the calling thread; network I/O never does.
/// Filtering is done here rather than in `Layer::enabled` so other
/// layers in the same registry still see every event.
pub struct InfluxLayer {
    builder: PointBuilder,
    sink: Arc<AsyncSink>,
    policy: LevelPolicy,
    /// Total events seen by the layer (before filtering).
    pub total_events: Arc<AtomicU64>,
    /// Successfully handed to the sink.
    pub enqueued_events: Arc<AtomicU64>,
    /// Rejected by the sink (queue full or closed).
    pub dropped_events: Arc<AtomicU64>,
}

impl InfluxLayer {
    pub fn new(builder: PointBuilder, sink: Arc<AsyncSink>, policy: LevelPolicy) -> Self {
        Self {
            builder,
            sink,
            policy,
            total_events: Arc::new(AtomicU64::new(0)),
            enqueued_events: Arc::new(AtomicU64::new(0)),
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<S> Layer<S> for InfluxLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);

        let meta = event.metadata();
        let target = meta.target();
        if IGNORED_TARGETS.iter().any(|t| scope_matches(target, t)) {
            return;
        }
        if !self.policy.enabled(target, meta.level()) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let caller = if self.policy.capture_caller() {
            match (meta.file(), meta.line()) {
                (Some(file), Some(line)) => format!("{}:{}", file, line),
                (Some(file), None) => file.to_string(),
                _ => String::new(),
            }
        } else {
            String::new()
        };

        let stack: Vec<String> = if self.policy.capture_stack(meta.level()) {
            ctx.event_scope(event)
                .map(|scope| {
                    scope
                        .map(|span| {
                            let m = span.metadata();
                            match (m.file(), m.line()) {
                                (Some(file), Some(line)) => {
                                    format!("{} ({}:{})", span.name(), file, line)
                                }
                                _ => span.name().to_string(),
                            }
                        })
                        .collect()
                })
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let record = LogRecord {
            level: *meta.level(),
            scope: target.to_string(),
            caller,
            stack,
            message: MessageSource::Text(visitor.message.unwrap_or_default()),
            key_values: visitor.key_values,
        };

        let point = self.builder.build(&record);
        match self.sink.submit(point) {
            Ok(()) => {
                self.enqueued_events.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Collects the `message` field and every other field as alternating
/// key/values, in recording order.
#[derive(Default)]
pub struct FieldVisitor {
    pub message: Option<String>,
    pub key_values: Vec<Value>,
}

impl FieldVisitor {
    fn push(&mut self, field: &Field, value: Value) {
        self.key_values.push(Value::from(field.name()));
        self.key_values.push(value);
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.push(field, Value::from(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, Value::I64(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, Value::U64(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, Value::F64(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, Value::Bool(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.push(field, Value::error(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.push(field, Value::debug(value));
        }
    }
}
