use std::future::Future;
use std::pin::Pin;

use crate::{
    Method, Response, StatusCode,
    context::Context,
    middleware::{Middleware, Next},
};

/// CORS middleware: validates the `Origin` header, handles preflight requests,
/// and injects `Access-Control-*` headers on actual responses.
///
/// # Behavior
///
/// - Requests without an `Origin`, or from an origin not on the allow-list,
///   pass through unmodified.
/// - `OPTIONS` preflight requests are short-circuited with `204 No Content`;
///   the downstream handler is **not** called.
/// - Other requests run normally and get the CORS headers appended.
/// - With credentials enabled the request origin is always echoed back, even
///   when the allow-list contains `*`, since browsers reject `*` there.
///
/// # Examples
///
/// ```rust
/// use hackforge::security::CorsMiddleware;
///
/// let cors = CorsMiddleware::new()
///     .allow_origin("http://localhost:3000")
///     .allow_credentials(true);
/// ```
pub struct CorsMiddleware {
    allowed_origins: Vec<String>,
    allowed_methods: Vec<String>,
    allowed_headers: Vec<String>,
    allow_credentials: bool,
    max_age_secs: u32,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl CorsMiddleware {
    /// Creates a policy with no allowed origins, the methods the API uses
    /// (`GET`, `POST`, `PUT`, `PATCH`, `DELETE`, `OPTIONS`) and the
    /// `Content-Type` and `Authorization` request headers.
    pub fn new() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            allow_credentials: false,
            max_age_secs: 3600,
        }
    }

    /// The policy the API runs with: the frontend origin, with credentials.
    pub fn for_frontend(frontend_url: &str) -> Self {
        Self::new()
            .allow_origin(frontend_url.trim_end_matches('/'))
            .allow_credentials(true)
    }

    /// Adds an allowed origin. Pass `"*"` to permit all origins.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    /// Sends `Access-Control-Allow-Credentials: true`.
    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    /// The `Access-Control-Allow-Origin` value for `origin`, or `None` if the
    /// origin is not allowed.
    fn allowed_origin(&self, origin: &str) -> Option<String> {
        let wildcard = self.allowed_origins.iter().any(|o| o == "*");
        if wildcard && !self.allow_credentials {
            Some("*".to_owned())
        } else if wildcard || self.allowed_origins.iter().any(|o| o == origin) {
            Some(origin.to_owned())
        } else {
            None
        }
    }
}

fn decorate(response: &mut Response, allow_origin: &str, allow_credentials: bool) {
    response.add_header("Access-Control-Allow-Origin", allow_origin);
    if allow_credentials {
        response.add_header("Access-Control-Allow-Credentials", "true");
    }
    if allow_origin != "*" {
        response.add_header("Vary", "Origin");
    }
}

impl Middleware for CorsMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let Some(allow_origin) = ctx
            .request()
            .headers()
            .get("origin")
            .and_then(|origin| self.allowed_origin(origin))
        else {
            return Box::pin(next.run(ctx));
        };

        if ctx.request().method() == &Method::Options {
            let mut resp = Response::new(StatusCode::NoContent)
                .header("Access-Control-Allow-Methods", self.allowed_methods.join(", "))
                .header("Access-Control-Allow-Headers", self.allowed_headers.join(", "))
                .header("Access-Control-Max-Age", self.max_age_secs.to_string());
            decorate(&mut resp, &allow_origin, self.allow_credentials);
            return Box::pin(async move { resp });
        }

        let allow_credentials = self.allow_credentials;
        Box::pin(async move {
            let mut resp = next.run(ctx).await;
            decorate(&mut resp, &allow_origin, allow_credentials);
            resp
        })
    }
}
