use serde::Serialize;

use super::{ApiError, AppState, body};
use crate::codegen::{GenerateRequest, GenerationOutcome};
use crate::context::Context;
use crate::{Response, StatusCode};

#[derive(Serialize)]
struct Generated {
    success: bool,
    #[serde(flatten)]
    outcome: GenerationOutcome,
}

/// `POST /api/generate`
pub(super) async fn generate(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let request: GenerateRequest = body(&ctx)?;
    let outcome = state.generation.generate(request).await?;
    Ok(Response::json(
        StatusCode::Ok,
        &Generated {
            success: true,
            outcome,
        },
    ))
}
