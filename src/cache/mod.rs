//! Caching layer: an in-process TTL cache and the response caching middleware
//! built on top of it.
//!
//! Values are stored as serialized JSON text, so anything `Serialize` can be
//! cached and read back as any compatible `Deserialize` type.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::context::Context;
use crate::http::{Method, Response, StatusCode};
use crate::middleware::{Middleware, Next};

#[derive(Debug, Clone)]
struct Entry {
    json: Arc<str>,
    ttl: Duration,
}

/// Expires each entry after its own TTL.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Key/value cache with per-entry expiry.
///
/// A disabled cache accepts every call and stores nothing, so callers never
/// need to check whether caching is on.
#[derive(Clone)]
pub struct CacheService {
    inner: Option<Cache<String, Entry>>,
    default_ttl: Duration,
}

impl CacheService {
    pub fn new(config: &CacheConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let inner = Cache::builder()
            .max_capacity(config.max_entries)
            .expire_after(PerEntryTtl)
            .support_invalidation_closures()
            .build();
        Self {
            inner: Some(inner),
            default_ttl: config.ttl,
        }
    }

    pub fn disabled() -> Self {
        Self {
            inner: None,
            default_ttl: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the cached value for `key`, if present and decodable as `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = self.get_raw(key).await?;
        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    /// Returns the cached JSON text for `key`.
    pub async fn get_raw(&self, key: &str) -> Option<Arc<str>> {
        let cache = self.inner.as_ref()?;
        cache.get(key).await.map(|entry| entry.json)
    }

    /// Stores `value` under `key` for `ttl` (the configured default when
    /// `None`). Returns whether the value was stored.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: impl Into<String>,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.set_raw(key, json, ttl).await,
            Err(e) => {
                warn!(error = %e, "value could not be serialized for caching");
                false
            }
        }
    }

    /// Stores already serialized JSON text.
    pub async fn set_raw(&self, key: impl Into<String>, json: impl Into<Arc<str>>, ttl: Option<Duration>) -> bool {
        let Some(cache) = &self.inner else {
            return false;
        };
        let entry = Entry {
            json: json.into(),
            ttl: ttl.unwrap_or(self.default_ttl),
        };
        cache.insert(key.into(), entry).await;
        true
    }

    /// Removes `key`; returns whether it was present.
    pub async fn del(&self, key: &str) -> bool {
        match &self.inner {
            Some(cache) => cache.remove(key).await.is_some(),
            None => false,
        }
    }

    /// Drops every entry.
    pub fn flush(&self) {
        if let Some(cache) = &self.inner {
            cache.invalidate_all();
        }
    }

    /// Drops every entry whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) {
        let Some(cache) = &self.inner else {
            return;
        };
        let prefix = prefix.to_owned();
        debug!(%prefix, "invalidating cached entries");
        if let Err(e) = cache.invalidate_entries_if(move |key, _| key.starts_with(&prefix)) {
            warn!(error = %e, "prefix invalidation rejected; flushing cache");
            cache.invalidate_all();
        }
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.inner.as_ref().map_or(0, Cache::entry_count)
    }

    /// Builds `prefix:k1:v1|k2:v2` with the parameters sorted by name.
    pub fn generate_key(prefix: &str, params: &[(&str, &str)]) -> String {
        let mut params = params.to_vec();
        params.sort_by(|a, b| a.0.cmp(b.0));
        let joined = params
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join("|");
        format!("{prefix}:{joined}")
    }
}

/// Caches successful JSON answers to `GET /api/*` and drops stale entries
/// after successful writes.
///
/// Cache keys are `api:<path>[?query]`. A write to `/api/<resource>/...`
/// invalidates every key under `api:/api/<resource>`, plus any extra prefixes
/// registered with [`invalidates`](Self::invalidates).
pub struct ResponseCacheMiddleware {
    cache: CacheService,
    ttl: Option<Duration>,
    dependencies: Vec<(String, String)>,
}

impl ResponseCacheMiddleware {
    pub const KEY_PREFIX: &'static str = "api:";

    pub fn new(cache: CacheService) -> Self {
        Self {
            cache,
            ttl: None,
            dependencies: Vec::new(),
        }
    }

    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Writes under `path_prefix` also invalidate cached `resource_prefix` paths.
    #[must_use]
    pub fn invalidates(mut self, path_prefix: impl Into<String>, resource_prefix: impl Into<String>) -> Self {
        self.dependencies
            .push((path_prefix.into(), resource_prefix.into()));
        self
    }

    fn cache_key(ctx: &Context) -> String {
        let request = ctx.request();
        match request.query_string() {
            Some(query) => format!("{}{}?{}", Self::KEY_PREFIX, request.path(), query),
            None => format!("{}{}", Self::KEY_PREFIX, request.path()),
        }
    }

    /// Key prefixes made stale by a successful write to `path`.
    fn stale_prefixes(&self, path: &str) -> Vec<String> {
        let mut prefixes = Vec::new();
        let mut segments = path.trim_start_matches('/').split('/');
        if let (Some("api"), Some(resource)) = (segments.next(), segments.next()) {
            if !resource.is_empty() {
                prefixes.push(format!("{}/api/{resource}", Self::KEY_PREFIX));
            }
        }
        for (path_prefix, resource) in &self.dependencies {
            if path.starts_with(path_prefix.as_str()) {
                prefixes.push(format!("{}{resource}", Self::KEY_PREFIX));
            }
        }
        prefixes
    }
}

fn is_cacheable(response: &Response) -> bool {
    response.status().is_success()
        && response.headers().is_json()
        && !response.headers().contains("Content-Disposition")
}

impl Middleware for ResponseCacheMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let cache = self.cache.clone();
        let ttl = self.ttl;
        let method = ctx.request().method().clone();
        let path = ctx.request().path().to_owned();

        if !cache.is_enabled() || !path.starts_with("/api/") {
            return Box::pin(next.run(ctx));
        }

        if method == Method::Get {
            let key = Self::cache_key(&ctx);
            return Box::pin(async move {
                if let Some(json) = cache.get_raw(&key).await {
                    debug!(%key, "response cache hit");
                    return Response::new(StatusCode::Ok)
                        .header("Content-Type", "application/json; charset=utf-8")
                        .header("X-Cache", "HIT")
                        .body(&*json);
                }

                let mut response = next.run(ctx).await;
                if is_cacheable(&response) {
                    if let Ok(body) = std::str::from_utf8(response.body_ref()) {
                        cache.set_raw(key, body, ttl).await;
                    }
                }
                response.set_header("X-Cache", "MISS");
                response
            });
        }

        if method.is_safe() {
            return Box::pin(next.run(ctx));
        }

        let stale = self.stale_prefixes(&path);
        Box::pin(async move {
            let response = next.run(ctx).await;
            if response.status().is_success() {
                for prefix in &stale {
                    cache.invalidate_prefix(prefix);
                }
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Request, Router, middleware::Pipeline};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn enabled() -> CacheService {
        CacheService::new(&CacheConfig {
            enabled: true,
            ttl: Duration::from_secs(60),
            max_entries: 100,
        })
    }

    #[tokio::test]
    async fn set_get_del_roundtrip() {
        let cache = enabled();
        assert!(cache.set("project:1", &serde_json::json!({"title": "Todo"}), None).await);
        let value: serde_json::Value = cache.get("project:1").await.unwrap();
        assert_eq!(value["title"], "Todo");

        assert!(cache.del("project:1").await);
        assert!(!cache.del("project:1").await);
        assert!(cache.get::<serde_json::Value>("project:1").await.is_none());
    }

    #[tokio::test]
    async fn entries_expire_after_their_ttl() {
        let cache = enabled();
        cache.set("short", "x", Some(Duration::from_millis(20))).await;
        cache.set("long", "y", None).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get::<String>("short").await.is_none());
        assert_eq!(cache.get::<String>("long").await.as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn flush_and_prefix_invalidation() {
        let cache = enabled();
        cache.set("api:/api/projects?page=1", &1, None).await;
        cache.set("api:/api/offline/codes", &2, None).await;

        cache.invalidate_prefix("api:/api/projects");
        assert!(cache.get::<i32>("api:/api/projects?page=1").await.is_none());
        assert_eq!(cache.get::<i32>("api:/api/offline/codes").await, Some(2));

        cache.flush();
        assert!(cache.get::<i32>("api:/api/offline/codes").await.is_none());
    }

    #[tokio::test]
    async fn disabled_cache_is_a_no_op() {
        let cache = CacheService::disabled();
        assert!(!cache.is_enabled());
        assert!(!cache.set("k", &1, None).await);
        assert!(cache.get::<i32>("k").await.is_none());
        assert!(!cache.del("k").await);
        cache.flush();
        cache.invalidate_prefix("k");
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn generate_key_sorts_params() {
        let key = CacheService::generate_key("projects", &[("userId", "u1"), ("page", "2")]);
        assert_eq!(key, "projects:page:2|userId:u1");
        assert_eq!(CacheService::generate_key("health", &[]), "health:");
    }

    fn request(raw: &str) -> Request {
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn counting_router(hits: Arc<AtomicUsize>) -> Router {
        let mut router = Router::new();
        let list_hits = Arc::clone(&hits);
        router.get("/api/projects", move |_ctx| {
            let hits = Arc::clone(&list_hits);
            async move {
                let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                Response::json(StatusCode::Ok, &serde_json::json!({ "calls": n }))
            }
        });
        router.post("/api/generate", |_ctx| async {
            Response::json(StatusCode::Ok, &serde_json::json!({ "success": true }))
        });
        router.get("/api/offline/export", |_ctx| async {
            Response::json(StatusCode::Ok, &serde_json::json!({}))
                .header("Content-Disposition", "attachment")
        });
        router
    }

    #[tokio::test]
    async fn middleware_serves_hits_and_invalidates_on_writes() {
        let hits = Arc::new(AtomicUsize::new(0));
        let cache = enabled();
        let handler = Pipeline::new(counting_router(Arc::clone(&hits)))
            .layer(
                ResponseCacheMiddleware::new(cache.clone())
                    .invalidates("/api/generate", "/api/projects"),
            )
            .build();

        let get = "GET /api/projects?userId=u1 HTTP/1.1\r\n\r\n";
        let first = handler.handle(request(get)).await;
        assert_eq!(first.headers().get("X-Cache"), Some("MISS"));

        let second = handler.handle(request(get)).await;
        assert_eq!(second.headers().get("X-Cache"), Some("HIT"));
        assert_eq!(second.body_ref(), first.body_ref());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Different query, different key.
        handler
            .handle(request("GET /api/projects?userId=u2 HTTP/1.1\r\n\r\n"))
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        handler
            .handle(request("POST /api/generate HTTP/1.1\r\n\r\n"))
            .await;
        let after_write = handler.handle(request(get)).await;
        assert_eq!(after_write.headers().get("X-Cache"), Some("MISS"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn downloads_and_errors_are_not_cached() {
        let cache = enabled();
        let handler = Pipeline::new(counting_router(Arc::new(AtomicUsize::new(0))))
            .layer(ResponseCacheMiddleware::new(cache.clone()))
            .build();

        let get = "GET /api/offline/export HTTP/1.1\r\n\r\n";
        handler.handle(request(get)).await;
        let again = handler.handle(request(get)).await;
        assert_eq!(again.headers().get("X-Cache"), Some("MISS"));
        assert!(again.headers().contains("Content-Disposition"));

        handler
            .handle(request("GET /api/missing HTTP/1.1\r\n\r\n"))
            .await;
        assert!(cache.get_raw("api:/api/missing").await.is_none());
    }

    #[test]
    fn writes_map_to_resource_prefixes() {
        let mw = ResponseCacheMiddleware::new(CacheService::disabled())
            .invalidates("/api/generate", "/api/projects");
        assert_eq!(
            mw.stale_prefixes("/api/projects/abc/favorite"),
            vec!["api:/api/projects"]
        );
        assert_eq!(
            mw.stale_prefixes("/api/generate"),
            vec!["api:/api/generate", "api:/api/projects"]
        );
        assert!(mw.stale_prefixes("/health").is_empty());
    }
}
