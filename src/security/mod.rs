//! Security middleware: CORS and per-client rate limiting.
//!
//! - [`CorsMiddleware`]: Cross-Origin Resource Sharing header injection and
//!   preflight (`OPTIONS`) short-circuiting.
//! - [`RateLimitMiddleware`]: fixed-window request budgets per client IP,
//!   scoped to a path prefix and optionally a method.

mod cors;
mod rate_limit;

pub use cors::CorsMiddleware;
pub use rate_limit::{RateDecision, RateLimitMiddleware, RateLimiter};
