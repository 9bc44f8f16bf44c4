use std::sync::Arc;
use std::time::Instant;
use tokio::time::Duration;
use tracing::error;

use tracing_influx_sink::init::init_tracing_with_writer;
use tracing_influx_sink::noop_sink::NoopWriter;
use tracing_influx_sink::{FieldEncoding, InfluxLogConfig};

#[tokio::main]
async fn main() {
    let writer = Arc::new(NoopWriter::default());

    let mut config = InfluxLogConfig::new("load-test");
    config.channel_buffer = 50_000;
    config.batch_size = 1_000;
    config.flush_interval_ms = 200;
    config.encoding = FieldEncoding::Blob;
    config.stack = None;

    let guard = init_tracing_with_writer(writer, &config).expect("install subscriber");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "custom load test error");
    }

    let elapsed = start.elapsed();
    println!("custom config: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    match guard.shutdown(Duration::from_secs(10)).await {
        Ok(report) => println!("delivered {} points, dropped {}", report.delivered, report.dropped),
        Err(e) => eprintln!("shutdown incomplete: {}", e),
    }
}
