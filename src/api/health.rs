use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::json;

use super::{ApiError, AppState};
use crate::context::Context;
use crate::{Response, StatusCode};

const PROBE_KEY: &str = "health:test";

/// `GET /health`: liveness plus which backing services are usable.
pub(super) async fn health(state: AppState, _ctx: Context) -> Result<Response, ApiError> {
    let cache = state
        .cache
        .set(PROBE_KEY, "test", Some(Duration::from_secs(1)))
        .await;
    let database = match &state.db {
        Some(db) => db.is_healthy().await,
        None => false,
    };

    Ok(Response::json(
        StatusCode::Ok,
        &json!({
            "status": "OK",
            "message": "HackForge Backend is running",
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "services": {
                "gemini": state.generation.generator().is_configured(),
                "cache": cache,
                "database": database,
            },
            "environment": state.config.environment.as_str(),
        }),
    ))
}
