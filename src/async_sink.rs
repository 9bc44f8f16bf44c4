use crate::point::Point;
use crate::sink::{PointWriter, WriterError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[cfg(feature = "influx")]
use crate::influx::{InfluxConfig, InfluxWriter};

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Tuning knobs for [`AsyncSink`].
#[derive(Clone, Debug)]
pub struct SinkOptions {
    /// Capacity of the submission queue; submissions beyond it are rejected.
    pub channel_buffer: usize,
    /// Points per write request.
    pub batch_size: usize,
    /// Upper bound on how long a partial batch waits before being written.
    pub flush_interval: Duration,
    /// Retries per batch for retryable write errors.
    pub max_retries: u32,
    /// Probe the server during [`AsyncSink::connect`].
    pub verify_connection: bool,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            channel_buffer: 1024,
            batch_size: 128,
            flush_interval: Duration::from_secs(1),
            max_retries: 3,
            verify_connection: false,
        }
    }
}

impl SinkOptions {
    /// Enforce minimal thresholds to avoid degenerate configs.
    fn normalized(mut self) -> Self {
        self.channel_buffer = self.channel_buffer.max(16);
        self.batch_size = self.batch_size.max(1);
        if self.flush_interval < Duration::from_millis(10) {
            self.flush_interval = Duration::from_millis(10);
        }
        self
    }
}

/// Error returned by [`AsyncSink::submit`]. The point is dropped either way.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("submission queue is full")]
    QueueFull,

    #[error("sink is closed")]
    Closed,
}

/// Error returned when connecting or closing an [`AsyncSink`].
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("failed to connect to time-series store: {0}")]
    Connect(#[source] WriterError),

    #[error("flush did not finish within {timeout:?}, {pending} points still pending")]
    FlushTimeout { timeout: Duration, pending: u64 },

    #[error("{failed} of {submitted} submitted points were not delivered")]
    Incomplete { failed: u64, submitted: u64 },

    #[error("final flush failed: {0}")]
    Flush(#[source] WriterError),

    #[error("delivery task failed: {0}")]
    Worker(String),
}

/// Running counters, shared between the submitting side and the
/// delivery task.
#[derive(Debug, Default)]
pub struct SinkStats {
    submitted: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl SinkStats {
    pub fn snapshot(&self) -> DeliveryReport {
        DeliveryReport {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`SinkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Accepted into the queue.
    pub submitted: u64,
    /// Rejected by `submit` (queue full or closed).
    pub dropped: u64,
    /// Acknowledged by the writer.
    pub delivered: u64,
    /// Given up on after retries.
    pub failed: u64,
}

impl DeliveryReport {
    /// Accepted points that are neither delivered nor failed yet.
    pub fn pending(&self) -> u64 {
        self.submitted
            .saturating_sub(self.delivered)
            .saturating_sub(self.failed)
    }
}

/// Non-blocking, batched hand-off of points to a [`PointWriter`].
///
/// `submit` enqueues into a bounded channel and returns immediately; a
/// background task pulls points, batches them by size and time, and
/// writes them with retry. `close` stops intake, drains the queue and
/// waits for the last write, bounded by a timeout.
pub struct AsyncSink {
    sender: mpsc::Sender<Point>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<Result<(), WriterError>>>>,
    closed: AtomicBool,
    stats: Arc<SinkStats>,
}

impl AsyncSink {
    /// Connect to InfluxDB and start the delivery task.
    ///
    /// Fails on an invalid endpoint, and on an unreachable or unhealthy
    /// server when `options.verify_connection` is set. Must be called
    /// within a tokio runtime.
    #[cfg(feature = "influx")]
    pub async fn connect(config: &InfluxConfig, options: SinkOptions) -> Result<Self, SinkError> {
        let writer = InfluxWriter::new(config).map_err(SinkError::Connect)?;
        if options.verify_connection {
            writer.health().await.map_err(SinkError::Connect)?;
        }
        info!(
            url = %config.url,
            org = %config.org,
            bucket = %config.bucket,
            "influx sink connected"
        );
        Ok(Self::start(Arc::new(writer), options))
    }

    /// Start the delivery task for an arbitrary writer.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(writer: Arc<dyn PointWriter>, options: SinkOptions) -> Self {
        let options = options.normalized();
        let (tx, rx) = mpsc::channel::<Point>(options.channel_buffer);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let stats = Arc::new(SinkStats::default());

        let handle = tokio::spawn(run_delivery(
            writer,
            rx,
            shutdown_rx,
            options,
            Arc::clone(&stats),
        ));

        Self {
            sender: tx,
            shutdown: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
            stats,
        }
    }

    /// Hand a point to the delivery task without waiting.
    ///
    /// Safe to call from any thread, inside or outside a runtime.
    pub fn submit(&self, point: Point) -> Result<(), SubmitError> {
        if self.closed.load(Ordering::Acquire) {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(SubmitError::Closed);
        }

        match self.sender.try_send(point) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(SubmitError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(SubmitError::Closed)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> DeliveryReport {
        self.stats.snapshot()
    }

    /// Flush every queued point and stop the delivery task.
    ///
    /// Blocks until the queue is drained and the writer flushed, or until
    /// `timeout` elapses, in which case the task is aborted.
    ///
    /// **Returns**
    /// - `Ok(report)` when every submitted point was delivered.
    /// - `Err(SinkError::Incomplete)` when some batches were given up on.
    /// - `Err(SinkError::FlushTimeout)` when the drain did not finish in time.
    ///
    /// Only the first call does any work. Later calls return the current
    /// counters, or `Err(SinkError::Incomplete)` if any point was lost.
    /// Points still queued when a timeout aborts the task count as failed.
    pub async fn close(&self, timeout: Duration) -> Result<DeliveryReport, SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("sink already closed");
            let report = self.stats.snapshot();
            if report.failed > 0 {
                return Err(SinkError::Incomplete {
                    failed: report.failed,
                    submitted: report.submitted,
                });
            }
            return Ok(report);
        }

        let shutdown = lock(&self.shutdown).take();
        if let Some(tx) = shutdown {
            let _ = tx.send(());
        }
        let worker = lock(&self.worker).take();
        let Some(mut handle) = worker else {
            return Ok(self.stats.snapshot());
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => return Err(SinkError::Flush(e)),
            Ok(Err(join_err)) => return Err(SinkError::Worker(join_err.to_string())),
            Err(_) => {
                handle.abort();
                let pending = self.stats.snapshot().pending();
                self.stats.failed.fetch_add(pending, Ordering::Relaxed);
                warn!(pending, timeout_ms = timeout.as_millis() as u64, "sink close timed out");
                return Err(SinkError::FlushTimeout { timeout, pending });
            }
        }

        let report = self.stats.snapshot();
        if report.failed > 0 {
            return Err(SinkError::Incomplete {
                failed: report.failed,
                submitted: report.submitted,
            });
        }
        info!(delivered = report.delivered, dropped = report.dropped, "sink closed");
        Ok(report)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_delivery(
    writer: Arc<dyn PointWriter>,
    mut rx: mpsc::Receiver<Point>,
    mut shutdown: oneshot::Receiver<()>,
    options: SinkOptions,
    stats: Arc<SinkStats>,
) -> Result<(), WriterError> {
    let mut batch = Vec::with_capacity(options.batch_size);
    let mut ticker = tokio::time::interval(options.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(point) => {
                    batch.push(point);
                    if batch.len() >= options.batch_size {
                        deliver(&*writer, &mut batch, options.max_retries, &stats).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    deliver(&*writer, &mut batch, options.max_retries, &stats).await;
                }
            }
            // Fires on close, and also when the sink is dropped unclosed.
            _ = &mut shutdown => break,
        }
    }

    // Stop intake; `recv` still yields everything already queued.
    rx.close();
    while let Some(point) = rx.recv().await {
        batch.push(point);
        if batch.len() >= options.batch_size {
            deliver(&*writer, &mut batch, options.max_retries, &stats).await;
        }
    }
    if !batch.is_empty() {
        deliver(&*writer, &mut batch, options.max_retries, &stats).await;
    }

    writer.flush().await
}

/// Write one batch, retrying retryable errors with exponential backoff.
/// The batch is always cleared: either delivered or counted as failed.
async fn deliver(
    writer: &dyn PointWriter,
    batch: &mut Vec<Point>,
    max_retries: u32,
    stats: &SinkStats,
) {
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 0;

    loop {
        match writer.write_batch(batch).await {
            Ok(()) => {
                stats
                    .delivered
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                batch.clear();
                return;
            }
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                warn!(
                    error = %e,
                    attempt,
                    max_retries,
                    delay_ms = backoff.as_millis() as u64,
                    "point batch write failed, retrying"
                );
                sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
            }
            Err(e) => {
                error!(
                    error = %e,
                    points = batch.len(),
                    attempts = attempt + 1,
                    "giving up on point batch"
                );
                stats.failed.fetch_add(batch.len() as u64, Ordering::Relaxed);
                batch.clear();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{FieldEncoding, PointBuilder};
    use crate::point::FieldValue;
    use crate::record::{LogRecord, MessageSource};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;
    use tracing::Level;

    #[derive(Default)]
    struct RecordingWriter {
        batches: Mutex<Vec<Vec<Point>>>,
        flushed: AtomicBool,
    }

    impl RecordingWriter {
        fn points(&self) -> Vec<Point> {
            self.batches.lock().unwrap().iter().flatten().cloned().collect()
        }

        fn batch_count(&self) -> usize {
            self.batches.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PointWriter for RecordingWriter {
        async fn write_batch(&self, points: &[Point]) -> Result<(), WriterError> {
            self.batches.lock().unwrap().push(points.to_vec());
            Ok(())
        }

        async fn flush(&self) -> Result<(), WriterError> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails the first `failures` writes with the given status.
    struct FlakyWriter {
        failures: u32,
        status: u16,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl PointWriter for FlakyWriter {
        async fn write_batch(&self, _points: &[Point]) -> Result<(), WriterError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(WriterError::Status {
                    status: self.status,
                    body: "nope".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    struct SlowWriter;

    #[async_trait]
    impl PointWriter for SlowWriter {
        async fn write_batch(&self, _points: &[Point]) -> Result<(), WriterError> {
            sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    fn point(i: usize) -> Point {
        let builder = PointBuilder::new("test", FieldEncoding::Flat);
        builder.build(&LogRecord::new(
            Level::INFO,
            "sink",
            MessageSource::Text(format!("msg {}", i)),
        ))
    }

    fn options(batch_size: usize, flush_interval: Duration) -> SinkOptions {
        SinkOptions {
            batch_size,
            flush_interval,
            ..SinkOptions::default()
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        cond()
    }

    #[test]
    fn test_options_thresholds() {
        let o = SinkOptions {
            channel_buffer: 0,
            batch_size: 0,
            flush_interval: Duration::ZERO,
            ..SinkOptions::default()
        }
        .normalized();
        assert_eq!(o.channel_buffer, 16);
        assert_eq!(o.batch_size, 1);
        assert_eq!(o.flush_interval, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_close_drains_everything_in_order() {
        let writer = Arc::new(RecordingWriter::default());
        let sink = AsyncSink::start(writer.clone(), options(1000, Duration::from_secs(60)));

        for i in 0..10 {
            sink.submit(point(i)).unwrap();
        }
        let report = sink.close(Duration::from_secs(5)).await.unwrap();

        assert_eq!(report.submitted, 10);
        assert_eq!(report.delivered, 10);
        assert_eq!(report.pending(), 0);
        assert!(writer.flushed.load(Ordering::SeqCst));

        let messages: Vec<String> = writer
            .points()
            .iter()
            .map(|p| p.field("message").and_then(FieldValue::as_str).unwrap().to_string())
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("msg {}", i)).collect();
        assert_eq!(messages, expected);
    }

    #[tokio::test]
    async fn test_size_based_batch() {
        let writer = Arc::new(RecordingWriter::default());
        let sink = AsyncSink::start(writer.clone(), options(5, Duration::from_secs(60)));

        for i in 0..5 {
            sink.submit(point(i)).unwrap();
        }
        assert!(wait_for(|| writer.points().len() == 5).await);
        assert_eq!(writer.batch_count(), 1);
        sink.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_time_based_batch() {
        let writer = Arc::new(RecordingWriter::default());
        let sink = AsyncSink::start(writer.clone(), options(100, Duration::from_millis(20)));

        sink.submit(point(0)).unwrap();
        sink.submit(point(1)).unwrap();
        assert!(wait_for(|| writer.points().len() == 2).await);
        sink.close(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_queue_full_is_reported() {
        let writer = Arc::new(RecordingWriter::default());
        let sink = AsyncSink::start(writer.clone(), SinkOptions {
            channel_buffer: 16,
            ..options(1000, Duration::from_secs(60))
        });

        // Single-threaded runtime: the delivery task has not run yet.
        for i in 0..16 {
            sink.submit(point(i)).unwrap();
        }
        assert_eq!(sink.submit(point(16)), Err(SubmitError::QueueFull));

        let report = sink.close(Duration::from_secs(1)).await.unwrap();
        assert_eq!(report.submitted, 16);
        assert_eq!(report.dropped, 1);
        assert_eq!(writer.points().len(), 16);
    }

    #[tokio::test]
    async fn test_submit_after_close_is_rejected() {
        let sink = AsyncSink::start(
            Arc::new(RecordingWriter::default()),
            SinkOptions::default(),
        );
        sink.close(Duration::from_secs(1)).await.unwrap();
        assert!(sink.is_closed());
        assert_eq!(sink.submit(point(0)), Err(SubmitError::Closed));
        assert_eq!(sink.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_close_twice_is_harmless() {
        let writer = Arc::new(RecordingWriter::default());
        let sink = AsyncSink::start(writer.clone(), SinkOptions::default());
        sink.submit(point(0)).unwrap();

        let first = sink.close(Duration::from_secs(1)).await.unwrap();
        let second = sink.close(Duration::from_secs(1)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(writer.points().len(), 1);
    }

    #[tokio::test]
    async fn test_retryable_failure_is_retried() {
        let writer = Arc::new(FlakyWriter {
            failures: 2,
            status: 503,
            attempts: AtomicU32::new(0),
        });
        let sink = AsyncSink::start(writer.clone(), options(1000, Duration::from_secs(60)));
        sink.submit(point(0)).unwrap();

        let report = sink.close(Duration::from_secs(5)).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(writer.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejected_batch_reports_incomplete() {
        let writer = Arc::new(FlakyWriter {
            failures: u32::MAX,
            status: 400,
            attempts: AtomicU32::new(0),
        });
        let sink = AsyncSink::start(writer.clone(), options(1000, Duration::from_secs(60)));
        sink.submit(point(0)).unwrap();
        sink.submit(point(1)).unwrap();

        match sink.close(Duration::from_secs(5)).await {
            Err(SinkError::Incomplete { failed, submitted }) => {
                assert_eq!(failed, 2);
                assert_eq!(submitted, 2);
            }
            other => panic!("expected Incomplete, got {:?}", other),
        }
        // 400 is not retryable
        assert_eq!(writer.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_is_bounded_by_timeout() {
        let sink = AsyncSink::start(Arc::new(SlowWriter), options(1000, Duration::from_secs(60)));
        sink.submit(point(0)).unwrap();

        let started = Instant::now();
        match sink.close(Duration::from_millis(50)).await {
            Err(SinkError::FlushTimeout { pending, .. }) => assert_eq!(pending, 1),
            other => panic!("expected FlushTimeout, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_second_close_keeps_reporting_loss() {
        let writer = Arc::new(FlakyWriter {
            failures: u32::MAX,
            status: 400,
            attempts: AtomicU32::new(0),
        });
        let sink = AsyncSink::start(writer, options(1000, Duration::from_secs(60)));
        sink.submit(point(0)).unwrap();

        assert!(matches!(
            sink.close(Duration::from_secs(5)).await,
            Err(SinkError::Incomplete { failed: 1, .. })
        ));
        assert!(matches!(
            sink.close(Duration::from_secs(5)).await,
            Err(SinkError::Incomplete { failed: 1, submitted: 1 })
        ));
    }

    #[tokio::test]
    async fn test_second_close_after_timeout_reports_loss() {
        let sink = AsyncSink::start(Arc::new(SlowWriter), options(1000, Duration::from_secs(60)));
        sink.submit(point(0)).unwrap();

        assert!(matches!(
            sink.close(Duration::from_millis(50)).await,
            Err(SinkError::FlushTimeout { pending: 1, .. })
        ));
        match sink.close(Duration::from_secs(1)).await {
            Err(SinkError::Incomplete { failed, submitted }) => {
                assert_eq!(failed, 1);
                assert_eq!(submitted, 1);
            }
            other => panic!("expected Incomplete, got {:?}", other),
        }
        assert_eq!(sink.stats().pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submitters_keep_per_task_order() {
        const TASKS: usize = 8;
        const PER_TASK: usize = 200;

        let writer = Arc::new(RecordingWriter::default());
        let sink = Arc::new(AsyncSink::start(
            writer.clone(),
            SinkOptions {
                channel_buffer: TASKS * PER_TASK,
                ..options(32, Duration::from_millis(20))
            },
        ));

        let mut handles = Vec::new();
        for task in 0..TASKS {
            let sink = Arc::clone(&sink);
            handles.push(tokio::spawn(async move {
                let builder = PointBuilder::new("test", FieldEncoding::Flat);
                for seq in 0..PER_TASK {
                    let record = LogRecord::new(Level::INFO, "sink", MessageSource::text("m"))
                        .with_key_values(vec![
                            "task".into(),
                            (task as u64).into(),
                            "seq".into(),
                            (seq as u64).into(),
                        ]);
                    sink.submit(builder.build(&record)).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let report = sink.close(Duration::from_secs(5)).await.unwrap();
        assert_eq!(report.submitted, (TASKS * PER_TASK) as u64);
        assert_eq!(report.delivered, (TASKS * PER_TASK) as u64);
        assert_eq!(report.dropped, 0);

        let points = writer.points();
        assert_eq!(points.len(), TASKS * PER_TASK);
        let mut next_seq = vec![0u64; TASKS];
        for p in &points {
            let task = match p.field("task") {
                Some(FieldValue::UInteger(t)) => *t as usize,
                other => panic!("missing task field: {:?}", other),
            };
            assert_eq!(p.field("seq"), Some(&FieldValue::UInteger(next_seq[task])));
            next_seq[task] += 1;
        }
        assert!(next_seq.iter().all(|&n| n == PER_TASK as u64));
    }

    #[tokio::test]
    async fn test_dropping_sink_still_drains() {
        let writer = Arc::new(RecordingWriter::default());
        let sink = AsyncSink::start(writer.clone(), options(1000, Duration::from_secs(60)));
        sink.submit(point(0)).unwrap();
        drop(sink);
        assert!(wait_for(|| writer.points().len() == 1).await);
    }
}
