use anyhow::Result;
use tracing_subscriber::EnvFilter;

use levi_gateway::config::Config;
use levi_gateway::gateway;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // RUST_LOG wins when set; otherwise LOG_LEVEL applies to the whole tree.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        "Starting levi-gateway"
    );

    gateway::run_gateway(config).await
}
