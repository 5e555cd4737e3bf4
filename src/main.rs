//! Fleet orchestrator server binary.

use fleet_orchestrator::{api, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fleet_orchestrator=info,tower_http=info")),
        )
        .init();

    let config = Config::load()?;
    tracing::info!(
        "Starting fleet orchestrator v{} (model {}, task timeout {}s)",
        env!("CARGO_PKG_VERSION"),
        config.llm_model,
        config.task_timeout_secs
    );

    api::serve(config).await
}
