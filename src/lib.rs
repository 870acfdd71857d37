//! # hackforge
//!
//! Backend for HackForge: turns a natural-language prompt into source code
//! through the Gemini API, keeps a per-user history of generated projects in
//! SQLite and offers an in-memory offline store clients can sync against.
//!
//! Everything is served by a small async HTTP/1.1 stack built on tokio and
//! httparse: [`server::Server`] accepts connections, a
//! [`middleware::Pipeline`] runs logging, CORS, rate limiting and response
//! caching, and the [`router::Router`] dispatches to the handlers in [`api`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hackforge::api::{self, AppState};
//! use hackforge::config::Config;
//! use hackforge::llm::GeminiClient;
//! use hackforge::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let generator = Arc::new(GeminiClient::new(&config.llm)?);
//!     let server = Server::bind(config.bind_addr()).await?;
//!     server.serve(api::app(AppState::new(config, generator, None))).await?;
//!     Ok(())
//! }
//! ```

// ── HTTP stack ────────────────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

// ── Services ──────────────────────────────────────────────────────────────────
pub mod cache;
pub mod codegen;
pub mod config;
pub mod database;
pub mod llm;
pub mod offline;
pub mod security;
pub mod telemetry;

// ── REST surface ──────────────────────────────────────────────────────────────
pub mod api;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use context::Context;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
