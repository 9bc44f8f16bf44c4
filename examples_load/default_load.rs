use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use tracing_influx_sink::init::init_tracing_with_writer;
use tracing_influx_sink::noop_sink::NoopWriter;
use tracing_influx_sink::InfluxLogConfig;

#[tokio::main]
async fn main() {
    let writer = Arc::new(NoopWriter::default());
    let config = InfluxLogConfig::new("load-test");
    let guard = init_tracing_with_writer(writer, &config).expect("install subscriber");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "default load test error");
    }

    let elapsed = start.elapsed();
    println!("default config: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    match guard.shutdown_default().await {
        Ok(report) => println!("delivered {} points, dropped {}", report.delivered, report.dropped),
        Err(e) => eprintln!("shutdown incomplete: {}", e),
    }
}
