//! HackForge backend server.

use std::sync::Arc;

use anyhow::Context as _;
use hackforge::api::{self, AppState};
use hackforge::config::Config;
use hackforge::database::Database;
use hackforge::llm::GeminiClient;
use hackforge::server::Server;
use hackforge::telemetry;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    telemetry::init(&config.logging).context("failed to install log subscriber")?;

    info!(
        environment = %config.environment,
        model = %config.llm.model,
        "starting HackForge backend"
    );
    if config.llm.api_key.is_none() {
        warn!("GEMINI_API_KEY is not set; code generation will fail until it is configured");
    }

    // The API keeps serving offline and generation routes without a database.
    let db = match &config.database_url {
        Some(url) => match Database::connect(url).await {
            Ok(db) => Some(db),
            Err(e) => {
                warn!(error = %e, "database unavailable, continuing without project history");
                None
            }
        },
        None => {
            info!("DATABASE_URL not set, running without project history");
            None
        }
    };

    let generator = Arc::new(GeminiClient::new(&config.llm)?);
    let server = Server::bind(config.bind_addr()).await?;
    info!(
        address = %server.local_addr(),
        frontend = %config.frontend_url,
        "ready"
    );

    let app = api::app(AppState::new(config, generator, db));

    tokio::select! {
        result = server.serve(app) => result?,
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }
    Ok(())
}
