//! Prompt-to-code pipeline: validate the prompt, ask the model, guess display
//! metadata and optionally record the result as a project.

pub mod metadata;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::{Database, NewProject, Project, ProjectMetadata};
use crate::llm::{CodeGenerator, LlmError};

pub use metadata::{estimate_tokens, extract_framework, extract_language, extract_tags};

/// Shortest prompt, in characters, worth sending to the model.
pub const MIN_PROMPT_CHARS: usize = 10;
pub const DEFAULT_USER_ID: &str = "demo-user";
const TITLE_PROMPT_CHARS: usize = 50;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Prompt is required")]
    MissingPrompt,

    #[error("Please provide a more detailed description (at least {MIN_PROMPT_CHARS} characters)")]
    PromptTooShort,

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Body of `POST /api/generate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default = "default_save_to_history")]
    pub save_to_history: bool,
    #[serde(default)]
    pub project_title: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

fn default_save_to_history() -> bool {
    true
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            save_to_history: true,
            project_title: None,
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutcome {
    pub code: String,
    pub prompt: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    /// Milliseconds spent waiting on the model.
    pub generation_time: i64,
    pub language: &'static str,
}

/// Rejects missing, empty and too-short prompts.
pub fn validate_prompt(prompt: Option<&str>) -> Result<&str, GenerationError> {
    match prompt {
        None | Some("") => Err(GenerationError::MissingPrompt),
        Some(p) if p.chars().count() < MIN_PROMPT_CHARS => Err(GenerationError::PromptTooShort),
        Some(p) => Ok(p),
    }
}

/// Title used when the client did not name the project.
pub fn default_title(prompt: &str) -> String {
    let head: String = prompt.chars().take(TITLE_PROMPT_CHARS).collect();
    format!("Generated from: {head}...")
}

#[derive(Clone)]
pub struct GenerationService {
    generator: Arc<dyn CodeGenerator>,
    db: Option<Database>,
}

impl GenerationService {
    pub fn new(generator: Arc<dyn CodeGenerator>, db: Option<Database>) -> Self {
        Self { generator, db }
    }

    pub fn generator(&self) -> &dyn CodeGenerator {
        self.generator.as_ref()
    }

    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerationOutcome, GenerationError> {
        let prompt = validate_prompt(request.prompt.as_deref())?.to_owned();
        debug!(prompt_chars = prompt.chars().count(), "code generation requested");

        let started = Instant::now();
        let code = self.generator.generate(&prompt).await?;
        let generation_time = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        info!(generation_time_ms = generation_time, "code generated");

        let project_id = if request.save_to_history {
            self.save(&request, &prompt, &code, generation_time).await
        } else {
            None
        };

        Ok(GenerationOutcome {
            language: extract_language(&prompt, &code),
            code,
            prompt,
            timestamp: Utc::now(),
            project_id,
            generation_time,
        })
    }

    /// Records the generation as a project. Failures are logged, never returned.
    async fn save(
        &self,
        request: &GenerateRequest,
        prompt: &str,
        code: &str,
        generation_time: i64,
    ) -> Option<Uuid> {
        let db = self.db.as_ref()?;

        let title = request
            .project_title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| default_title(prompt));
        let new = NewProject {
            user_id: request
                .user_id
                .clone()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            title,
            prompt: prompt.to_owned(),
            generated_code: code.to_owned(),
            framework: Some(extract_framework(prompt, code).to_string()),
            tags: extract_tags(prompt, code),
            is_favorite: false,
            metadata: ProjectMetadata {
                tokens_used: Some(estimate_tokens(code)),
                generation_time: Some(generation_time),
                model: Some(self.generator.model().to_string()),
            },
        };

        match Project::create(db.pool(), new).await {
            Ok(project) => {
                info!(project_id = %project.id, "project saved to history");
                Some(project.id)
            }
            Err(e) => {
                warn!(error = %e, "failed to save project to history");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Canned(Result<String, LlmError>);

    #[async_trait]
    impl CodeGenerator for Canned {
        fn model(&self) -> &str {
            "test-model"
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
            self.0.clone()
        }
    }

    fn service(result: Result<String, LlmError>, db: Option<Database>) -> GenerationService {
        GenerationService::new(Arc::new(Canned(result)), db)
    }

    #[test]
    fn prompt_validation() {
        assert!(matches!(validate_prompt(None), Err(GenerationError::MissingPrompt)));
        assert!(matches!(validate_prompt(Some("")), Err(GenerationError::MissingPrompt)));
        assert!(matches!(
            validate_prompt(Some("todo app")),
            Err(GenerationError::PromptTooShort)
        ));
        assert_eq!(validate_prompt(Some("a todo app!")).unwrap(), "a todo app!");
        // Counted in characters, not bytes.
        assert!(validate_prompt(Some("ééééé")).is_err());
    }

    #[test]
    fn default_title_truncates_on_char_boundary() {
        assert_eq!(default_title("short prompt"), "Generated from: short prompt...");
        let long = "ü".repeat(80);
        let title = default_title(&long);
        assert_eq!(title.chars().count(), "Generated from: ...".len() + 50);
    }

    #[test]
    fn request_defaults() {
        let req: GenerateRequest = serde_json::from_str(r#"{"prompt":"build a todo app"}"#).unwrap();
        assert!(req.save_to_history);
        assert!(req.user_id.is_none());

        let req: GenerateRequest = serde_json::from_str(r#"{"saveToHistory":false}"#).unwrap();
        assert!(!req.save_to_history);
        assert!(req.prompt.is_none());
    }

    #[tokio::test]
    async fn generation_saves_project_with_metadata() {
        let db = Database::in_memory().await.unwrap();
        let code = "const App = () => <form><input/></form>;".to_string();
        let svc = service(Ok(code.clone()), Some(db.clone()));

        let outcome = svc
            .generate(GenerateRequest::new("Build a responsive signup form"))
            .await
            .unwrap();
        assert_eq!(outcome.code, code);
        assert_eq!(outcome.language, "javascript");

        let id = outcome.project_id.unwrap().to_string();
        let project = Project::find_by_id(db.pool(), &id, DEFAULT_USER_ID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(project.title, "Generated from: Build a responsive signup form...");
        assert_eq!(project.framework.as_deref(), Some("react"));
        assert!(project.tags.contains(&"form".to_string()));
        assert_eq!(project.metadata.tokens_used, Some(estimate_tokens(&code)));
        assert_eq!(project.metadata.model.as_deref(), Some("test-model"));
        assert_eq!(project.metadata.generation_time, Some(outcome.generation_time));
    }

    #[tokio::test]
    async fn custom_title_and_user_are_used() {
        let db = Database::in_memory().await.unwrap();
        let svc = service(Ok("print('hi')".into()), Some(db.clone()));
        let mut req = GenerateRequest::new("A python hello world script");
        req.project_title = Some("Hello".into());
        req.user_id = Some("u42".into());

        let outcome = svc.generate(req).await.unwrap();
        let id = outcome.project_id.unwrap().to_string();
        let project = Project::find_by_id(db.pool(), &id, "u42").await.unwrap().unwrap();
        assert_eq!(project.title, "Hello");
        assert_eq!(outcome.language, "python");
    }

    #[tokio::test]
    async fn empty_user_id_saves_for_demo_user() {
        let db = Database::in_memory().await.unwrap();
        let svc = service(Ok("x".into()), Some(db.clone()));
        let mut req = GenerateRequest::new("Build a landing page");
        req.user_id = Some(String::new());

        let id = svc.generate(req).await.unwrap().project_id.unwrap().to_string();
        let owned = Project::find_by_id(db.pool(), &id, DEFAULT_USER_ID).await.unwrap();
        assert!(owned.is_some());
        assert!(Project::find_by_id(db.pool(), &id, "").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_is_skipped_when_disabled_or_unavailable() {
        let db = Database::in_memory().await.unwrap();
        let svc = service(Ok("x".into()), Some(db));
        let mut req = GenerateRequest::new("Build a landing page");
        req.save_to_history = false;
        assert!(svc.generate(req).await.unwrap().project_id.is_none());

        let svc = service(Ok("x".into()), None);
        let outcome = svc.generate(GenerateRequest::new("Build a landing page")).await.unwrap();
        assert!(outcome.project_id.is_none());
    }

    #[tokio::test]
    async fn model_errors_propagate() {
        let svc = service(Err(LlmError::QuotaExceeded), None);
        let err = svc
            .generate(GenerateRequest::new("Build a landing page"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Llm(LlmError::QuotaExceeded)));

        let err = svc.generate(GenerateRequest::new("short")).await.unwrap_err();
        assert!(matches!(err, GenerationError::PromptTooShort));
    }

    #[test]
    fn outcome_serializes_camel_case() {
        let outcome = GenerationOutcome {
            code: "c".into(),
            prompt: "p".into(),
            timestamp: Utc::now(),
            project_id: None,
            generation_time: 12,
            language: "rust",
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["generationTime"], 12);
        assert!(value.get("projectId").is_none());
    }
}
