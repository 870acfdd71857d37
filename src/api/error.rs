use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::codegen::GenerationError;
use crate::config::Environment;
use crate::database::StoreError;
use crate::llm::LlmError;
use crate::{Response, StatusCode};

/// Which project operation failed; picks the error code and message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectOp {
    Create,
    List,
    Fetch,
    Update,
    Delete,
    ToggleFavorite,
}

impl ProjectOp {
    fn code(self) -> &'static str {
        match self {
            Self::Create => "CREATE_ERROR",
            Self::List | Self::Fetch => "FETCH_ERROR",
            Self::Update => "UPDATE_ERROR",
            Self::Delete => "DELETE_ERROR",
            Self::ToggleFavorite => "TOGGLE_ERROR",
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::Create => "Failed to create project",
            Self::List => "Failed to fetch projects",
            Self::Fetch => "Failed to fetch project",
            Self::Update => "Failed to update project",
            Self::Delete => "Failed to delete project",
            Self::ToggleFavorite => "Failed to toggle favorite status",
        }
    }
}

/// Every failure an endpoint can answer with.
///
/// The `Display` text is the underlying cause and only reaches clients as
/// `details` in the development environment.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("missing required fields")]
    MissingFields(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("project store is not configured")]
    DatabaseUnavailable,

    #[error("project not found")]
    ProjectNotFound,

    #[error("{source}")]
    Store {
        op: ProjectOp,
        #[source]
        source: StoreError,
    },

    #[error("offline code not found")]
    OfflineCodeNotFound,

    #[error("offline project not found")]
    OfflineProjectNotFound,

    #[error("setting not found")]
    SettingNotFound,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    message: &'a str,
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl ApiError {
    /// Wraps a store failure, surfacing validation problems as client errors.
    pub fn store(op: ProjectOp, source: StoreError) -> Self {
        match source {
            StoreError::Validation(reason) => Self::Validation(reason),
            source => Self::Store { op, source },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidJson(_) | Self::MissingFields(_) | Self::Validation(_) => {
                StatusCode::BadRequest
            }
            Self::Generation(GenerationError::MissingPrompt | GenerationError::PromptTooShort) => {
                StatusCode::BadRequest
            }
            Self::Generation(GenerationError::Llm(_)) | Self::Store { .. } => {
                StatusCode::InternalServerError
            }
            Self::DatabaseUnavailable => StatusCode::ServiceUnavailable,
            Self::ProjectNotFound
            | Self::OfflineCodeNotFound
            | Self::OfflineProjectNotFound
            | Self::SettingNotFound => StatusCode::NotFound,
        }
    }

    /// Stable machine-readable code sent as `error`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "INVALID_JSON",
            Self::Generation(GenerationError::MissingPrompt) => "MISSING_PROMPT",
            Self::Generation(GenerationError::PromptTooShort) => "PROMPT_TOO_SHORT",
            Self::Generation(GenerationError::Llm(e)) => match e {
                LlmError::NotConfigured => "GEMINI_NOT_CONFIGURED",
                LlmError::InvalidApiKey => "INVALID_API_KEY",
                LlmError::QuotaExceeded => "QUOTA_EXCEEDED",
                _ => "GENERATION_ERROR",
            },
            Self::MissingFields(_) => "MISSING_REQUIRED_FIELDS",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::DatabaseUnavailable => "DATABASE_UNAVAILABLE",
            Self::ProjectNotFound => "PROJECT_NOT_FOUND",
            Self::Store { op, .. } => op.code(),
            Self::OfflineCodeNotFound => "OFFLINE_CODE_NOT_FOUND",
            Self::OfflineProjectNotFound => "OFFLINE_PROJECT_NOT_FOUND",
            Self::SettingNotFound => "SETTING_NOT_FOUND",
        }
    }

    /// Human-readable message sent to every client.
    pub fn message(&self) -> String {
        match self {
            Self::InvalidJson(_) => "Request body is not valid JSON".to_string(),
            Self::Generation(GenerationError::Llm(e)) => match e {
                LlmError::NotConfigured => "Gemini API key is not configured. Please add your API key to the backend .env file.".to_string(),
                LlmError::InvalidApiKey => "Invalid Gemini API key. Please check your API key in the backend .env file.".to_string(),
                LlmError::QuotaExceeded => "Gemini API quota exceeded. Please check your Gemini account billing.".to_string(),
                _ => "Failed to generate code".to_string(),
            },
            Self::Generation(e) => e.to_string(),
            Self::MissingFields(message) => (*message).to_string(),
            Self::Validation(reason) => reason.clone(),
            Self::DatabaseUnavailable => "Project storage is not available".to_string(),
            Self::ProjectNotFound => "Project not found".to_string(),
            Self::Store { op, .. } => op.message().to_string(),
            Self::OfflineCodeNotFound => "Offline code not found".to_string(),
            Self::OfflineProjectNotFound => "Offline project not found".to_string(),
            Self::SettingNotFound => "Setting not found".to_string(),
        }
    }

    /// Renders the error as a JSON response. `details` is included only in
    /// development.
    pub fn into_response(self, environment: Environment) -> Response {
        let status = self.status();
        if status == StatusCode::InternalServerError {
            error!(code = self.code(), error = %self, "request failed");
        }

        let message = self.message();
        let body = ErrorBody {
            success: false,
            message: &message,
            error: self.code(),
            details: environment.is_development().then(|| self.to_string()),
        };
        Response::json(status, &body)
    }
}
