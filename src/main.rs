mod config;
mod container;
mod remote;
mod samples;
mod schedule;
mod signals;
mod sink;
mod skiplist;
mod supervisor;
mod worker;

use anyhow::Result;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,adxl_collector=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let settings = config::load_settings()?;
    tracing::info!(
        name = %settings.name,
        version = %settings.version,
        devices = settings.devices.len(),
        "adxl-collector starting"
    );

    let signals = signals::Signals::new();
    supervisor::run(settings, signals).await
}
