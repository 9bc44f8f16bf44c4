use tracing::{error, info, info_span};

use tracing_influx_sink::env::{env_or, INFLUX_LOG_TOKEN_ENV, INFLUX_LOG_URL_ENV};
use tracing_influx_sink::init::init_tracing;
use tracing_influx_sink::InfluxLogConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1) Point this at your InfluxDB v2 instance, or set INFLUX_LOG_URL /
    //    INFLUX_LOG_TOKEN.
    let mut config = InfluxLogConfig::new("auth-service").with_target(
        env_or(INFLUX_LOG_URL_ENV, "http://127.0.0.1:8086"),
        env_or(INFLUX_LOG_TOKEN_ENV, "my-token"),
        "my-org",
        "logs",
    );
    config.enable_stdout = true;
    config.verify_connection = true;
    config.scopes.insert("influx_example::db".to_string(), "warn".to_string());

    // 2) Connect and install the layer.
    let guard = init_tracing(&config).await?;

    // 3) Emit some events; each becomes a point in the `logs` measurement.
    info!("starting service");

    let span = info_span!("login", user_id = 42);
    let _enter = span.enter();
    error!(user_id = 42, reason = "invalid password", "authentication failed");
    drop(_enter);

    // 4) Flush before exit.
    let report = guard.shutdown_default().await?;
    println!("delivered {} points", report.delivered);
    Ok(())
}
