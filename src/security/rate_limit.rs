use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::warn;

use crate::{
    Method, Response, StatusCode,
    context::Context,
    middleware::{Middleware, Next},
};

/// Outcome of counting one request against a client's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter keyed by client IP.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Counts a request from `client` made at `now`.
    pub fn check_at(&self, client: IpAddr, now: Instant) -> RateDecision {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);

        // Drop expired windows so idle clients do not accumulate.
        if clients.len() > 10_000 {
            let window = self.window;
            clients.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = clients.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.max_requests {
            let elapsed = now.duration_since(entry.started);
            return RateDecision::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            };
        }
        entry.count += 1;
        RateDecision::Allowed {
            remaining: self.max_requests - entry.count,
        }
    }

    pub fn check(&self, client: IpAddr) -> RateDecision {
        self.check_at(client, Instant::now())
    }
}

/// Rejects clients that exceed a request budget with `429 Too Many Requests`.
///
/// Only requests whose path starts with the configured prefix (and, if set,
/// use the configured method) are counted; everything else passes through.
/// Requests without a known peer address share a single bucket.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use hackforge::{Method, security::RateLimitMiddleware};
///
/// let limiter = RateLimitMiddleware::new("/api/generate", 10, Duration::from_secs(15 * 60))
///     .method(Method::Post)
///     .message("Too many code generation requests. Please try again later.");
/// ```
pub struct RateLimitMiddleware {
    path_prefix: String,
    method: Option<Method>,
    message: Arc<str>,
    limiter: Arc<RateLimiter>,
}

impl RateLimitMiddleware {
    pub fn new(path_prefix: impl Into<String>, max_requests: u32, window: Duration) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            method: None,
            message: Arc::from("Too many requests. Please try again later."),
            limiter: Arc::new(RateLimiter::new(max_requests, window)),
        }
    }

    /// Restricts counting to requests using `method`.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Message returned in the `429` body.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Arc::from(message.into());
        self
    }

    fn applies_to(&self, ctx: &Context) -> bool {
        let request = ctx.request();
        let path = request.path();
        let in_scope = path == self.path_prefix
            || path
                .strip_prefix(self.path_prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'));
        in_scope && self.method.as_ref().is_none_or(|m| m == request.method())
    }
}

impl Middleware for RateLimitMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        if !self.applies_to(&ctx) {
            return Box::pin(next.run(ctx));
        }

        let client = ctx
            .client_ip()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let limit = self.limiter.max_requests();

        match self.limiter.check(client) {
            RateDecision::Allowed { remaining } => Box::pin(async move {
                let mut response = next.run(ctx).await;
                response.set_header("X-RateLimit-Limit", limit.to_string());
                response.set_header("X-RateLimit-Remaining", remaining.to_string());
                response
            }),
            RateDecision::Limited { retry_after } => {
                warn!(%client, path = %ctx.request().path(), "rate limit exceeded");
                let response = Response::json(
                    StatusCode::TooManyRequests,
                    &json!({ "success": false, "message": &*self.message }),
                )
                .header("Retry-After", retry_after.as_secs().max(1).to_string())
                .header("X-RateLimit-Limit", limit.to_string())
                .header("X-RateLimit-Remaining", "0");
                Box::pin(async move { response })
            }
        }
    }
}
