//! REST surface of the backend: route table, shared state and the middleware
//! stack the server runs every request through.

mod code;
mod error;
mod health;
mod offline;
mod projects;

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::cache::{CacheService, ResponseCacheMiddleware};
use crate::codegen::GenerationService;
use crate::config::Config;
use crate::context::Context;
use crate::database::Database;
use crate::llm::CodeGenerator;
use crate::middleware::{LoggerMiddleware, Pipeline, PipelineHandler};
use crate::offline::OfflineStore;
use crate::router::{IntoHandler, Router};
use crate::security::{CorsMiddleware, RateLimitMiddleware};
use crate::{Method, Response};

pub use error::{ApiError, ProjectOp};

/// Everything a handler may need. Cloned into every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub generation: GenerationService,
    pub db: Option<Database>,
    pub cache: CacheService,
    pub offline: Arc<OfflineStore>,
}

impl AppState {
    /// Builds the state with a response cache sized from `config`.
    pub fn new(config: Config, generator: Arc<dyn CodeGenerator>, db: Option<Database>) -> Self {
        let cache = CacheService::new(&config.cache);
        Self {
            generation: GenerationService::new(generator, db.clone()),
            config: Arc::new(config),
            db,
            cache,
            offline: Arc::new(OfflineStore::new()),
        }
    }

    /// The project database, or `503 DATABASE_UNAVAILABLE`.
    fn db(&self) -> Result<&Database, ApiError> {
        self.db.as_ref().ok_or(ApiError::DatabaseUnavailable)
    }
}

/// Adapts `async fn(AppState, Context) -> Result<Response, ApiError>` into a
/// route handler, rendering errors for the configured environment.
fn handler<F, Fut>(state: &AppState, f: F) -> impl IntoHandler
where
    F: Fn(AppState, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, ApiError>> + Send + 'static,
{
    let state = state.clone();
    move |ctx: Context| {
        let environment = state.config.environment;
        let fut = f(state.clone(), ctx);
        async move {
            match fut.await {
                Ok(response) => response,
                Err(e) => e.into_response(environment),
            }
        }
    }
}

/// Parses the request body, mapping syntax errors to `400 INVALID_JSON`.
fn body<T: DeserializeOwned>(ctx: &Context) -> Result<T, ApiError> {
    Ok(ctx.json()?)
}

/// The route table.
pub fn router(state: &AppState) -> Router {
    let mut router = Router::new();

    router.get("/health", handler(state, health::health));

    router.post("/api/generate", handler(state, code::generate));

    router.post("/api/projects", handler(state, projects::create));
    router.get("/api/projects", handler(state, projects::list));
    router.get("/api/projects/:id", handler(state, projects::fetch));
    router.put("/api/projects/:id", handler(state, projects::update));
    router.delete("/api/projects/:id", handler(state, projects::delete));
    router.patch("/api/projects/:id/favorite", handler(state, projects::toggle_favorite));

    router.post("/api/offline/save-code", handler(state, offline::save_code));
    router.get("/api/offline/codes", handler(state, offline::codes));
    router.get("/api/offline/codes/search/:query", handler(state, offline::search_codes));
    router.get("/api/offline/codes/:id", handler(state, offline::code));
    router.put("/api/offline/codes/:id/favorite", handler(state, offline::toggle_code_favorite));
    router.delete("/api/offline/codes/:id", handler(state, offline::delete_code));
    router.post("/api/offline/save-project", handler(state, offline::save_project));
    router.get("/api/offline/projects", handler(state, offline::projects));
    router.get("/api/offline/projects/:id", handler(state, offline::project));
    router.put("/api/offline/projects/:id", handler(state, offline::update_project));
    router.delete("/api/offline/projects/:id", handler(state, offline::delete_project));
    router.get("/api/offline/settings/:key", handler(state, offline::setting));
    router.put("/api/offline/settings/:key", handler(state, offline::save_setting));
    router.get("/api/offline/export", handler(state, offline::export));
    router.post("/api/offline/import", handler(state, offline::import));
    router.get("/api/offline/stats", handler(state, offline::stats));
    router.delete("/api/offline/clear", handler(state, offline::clear));

    router
}

/// Routes wrapped in the full middleware stack, ready for
/// [`Server::serve`](crate::server::Server::serve).
pub fn app(state: AppState) -> PipelineHandler {
    let router = router(&state);
    let limits = &state.config.rate_limit;
    Pipeline::new(router)
        .layer(LoggerMiddleware)
        .layer(CorsMiddleware::for_frontend(&state.config.frontend_url))
        .layer(
            RateLimitMiddleware::new("/api/generate", limits.generate_max, limits.window)
                .method(Method::Post)
                .message("Too many code generation requests. Please try again later."),
        )
        .layer(
            RateLimitMiddleware::new("/api/projects", limits.projects_max, limits.window)
                .message("Too many project requests. Please try again later."),
        )
        .layer(
            ResponseCacheMiddleware::new(state.cache.clone())
                .ttl(state.config.cache.ttl)
                .invalidates("/api/generate", "/api/projects"),
        )
        .build()
}
