//! Per-request context: path parameters, query access and JSON bodies.
//!
//! A [`Context`] is created for every request the server dispatches and is
//! threaded through the middleware chain to the matched handler.

use std::{collections::HashMap, net::IpAddr};

use serde::de::DeserializeOwned;

use crate::Request;

/// Path parameters extracted from the matched route
#[derive(Default, Debug, Clone)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Per-request state handed to middleware and handlers.
pub struct Context {
    request: Request,
    params: PathParams,
}

impl Context {
    /// Create a new context from a request, with no path parameters
    pub fn new(request: Request) -> Self {
        Self::with_params(request, PathParams::new())
    }

    /// Create a context carrying the parameters captured by a route match
    pub fn with_params(request: Request, params: PathParams) -> Self {
        Self { request, params }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Replaces the path parameters; called by the router once a route matched.
    pub fn set_params(&mut self, params: PathParams) {
        self.params = params;
    }

    /// Shortcut for a path parameter, returning `""` when absent.
    pub fn param(&self, key: &str) -> &str {
        self.params.get(key).unwrap_or("")
    }

    /// Shortcut for a decoded query parameter.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.request.query_param(key)
    }

    /// IP of the client, used as the rate-limit key.
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.request.peer_addr().map(|addr| addr.ip())
    }

    /// Deserialize the request body as JSON. An empty body is read as `{}`
    /// so that handlers whose fields are all optional accept a bare POST.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        let body = self.request.body();
        if body.iter().all(u8::is_ascii_whitespace) {
            return serde_json::from_slice(b"{}");
        }
        serde_json::from_slice(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn request(raw: &str) -> Request {
        Request::parse(raw.as_bytes()).unwrap().0
    }

    #[derive(Debug, Deserialize)]
    struct Body {
        prompt: Option<String>,
    }

    #[test]
    fn json_reads_body() {
        let ctx = Context::new(request(
            "POST /api/generate HTTP/1.1\r\nContent-Length: 19\r\n\r\n{\"prompt\":\"a todo\"}",
        ));
        let body: Body = ctx.json().unwrap();
        assert_eq!(body.prompt.as_deref(), Some("a todo"));
    }

    #[test]
    fn empty_body_reads_as_empty_object() {
        let ctx = Context::new(request("POST /api/generate HTTP/1.1\r\n\r\n"));
        let body: Body = ctx.json().unwrap();
        assert!(body.prompt.is_none());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let ctx = Context::new(request(
            "POST /api/generate HTTP/1.1\r\nContent-Length: 5\r\n\r\n{nope",
        ));
        assert!(ctx.json::<Body>().is_err());
    }

    #[test]
    fn params_and_query_shortcuts() {
        let mut params = PathParams::new();
        params.insert("id".into(), "abc".into());
        let ctx = Context::with_params(
            request("GET /api/projects/abc?userId=u1 HTTP/1.1\r\n\r\n"),
            params,
        );
        assert_eq!(ctx.param("id"), "abc");
        assert_eq!(ctx.param("missing"), "");
        assert_eq!(ctx.query("userId"), Some("u1"));
        assert!(ctx.client_ip().is_none());
    }
}
