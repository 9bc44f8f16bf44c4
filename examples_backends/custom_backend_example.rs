use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};
use tracing_influx_sink::{
    init::init_tracing_with_writer,
    point::{encode_batch, Point},
    InfluxLogConfig, PointWriter, WriterError,
};

/// Example of integrating a completely custom backend by implementing
/// the `PointWriter` trait directly. Imagine this forwards line protocol
/// to a proxy or a message queue this crate does not know about.
struct StdoutLineProtocolWriter;

#[async_trait]
impl PointWriter for StdoutLineProtocolWriter {
    async fn write_batch(&self, points: &[Point]) -> Result<(), WriterError> {
        print!("{}", encode_batch(points));
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let writer: Arc<dyn PointWriter> = Arc::new(StdoutLineProtocolWriter);

    let guard = init_tracing_with_writer(writer, &InfluxLogConfig::new("custom-backend"))
        .expect("install subscriber");

    info!("custom backend example started");
    error!(db = "my-custom-db", "simulated error sent via custom backend");

    if let Err(e) = guard.shutdown_default().await {
        eprintln!("shutdown incomplete: {}", e);
    }
}
