//! End-to-end tests: the full middleware stack served over TCP, talking to a
//! fake Gemini endpoint and an in-memory SQLite database.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hackforge::api::{self, AppState};
use hackforge::config::Config;
use hackforge::context::Context;
use hackforge::database::Database;
use hackforge::llm::{GeminiClient, RetryPolicy};
use hackforge::middleware::Pipeline;
use hackforge::{Response, Router, Server, StatusCode};
use reqwest::Client;
use serde_json::{Value, json};

const API_KEY: &str = "test-key";
const GENERATED: &str = "import React from 'react';\nexport default function TodoApp() { return <form />; }";

/// Serves `POST /models/:action` the way `generateContent` does.
async fn spawn_fake_gemini() -> SocketAddr {
    let mut router = Router::new();
    router.post("/models/:action", |ctx: Context| async move {
        if ctx.request().headers().get("x-goog-api-key") != Some(API_KEY) {
            return Response::json(
                StatusCode::Unauthorized,
                &json!({ "error": { "message": "API key not valid. API_KEY_INVALID" } }),
            );
        }
        let body: Value = ctx.json().unwrap_or_default();
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap_or_default();
        if prompt.contains("exhaust the quota") {
            return Response::json(
                StatusCode::TooManyRequests,
                &json!({ "error": { "message": "Resource has been exhausted (e.g. check quota)." } }),
            );
        }
        Response::json(
            StatusCode::Ok,
            &json!({ "candidates": [{ "content": { "parts": [{ "text": GENERATED }] } }] }),
        )
    });

    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.serve(Pipeline::new(router).build()));
    addr
}

struct TestApp {
    base: String,
    client: Client,
}

impl TestApp {
    async fn spawn() -> Self {
        Self::spawn_with(true, API_KEY, &[]).await
    }

    async fn spawn_with(with_db: bool, api_key: &str, extra: &[(&str, &str)]) -> Self {
        let gemini = spawn_fake_gemini().await;
        let mut vars = vec![
            ("GEMINI_API_KEY".to_string(), api_key.to_string()),
            ("GEMINI_API_BASE".to_string(), format!("http://{gemini}")),
            ("GEMINI_MODEL".to_string(), "test-model".to_string()),
            ("NODE_ENV".to_string(), "development".to_string()),
        ];
        vars.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        let config = Config::from_vars(vars).unwrap();
        let db = if with_db {
            Some(Database::in_memory().await.unwrap())
        } else {
            None
        };
        let generator = Arc::new(GeminiClient::new(&config.llm).unwrap().with_retry_policy(
            RetryPolicy {
                min_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                max_retries: 1,
            },
        ));

        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", server.local_addr());
        tokio::spawn(server.serve(api::app(AppState::new(config, generator, db))));

        Self {
            base,
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let res = self.client.get(self.url(path)).send().await.unwrap();
        (res.status().as_u16(), res.json().await.unwrap())
    }

    async fn send(&self, method: reqwest::Method, path: &str, body: Value) -> (u16, Value) {
        let res = self
            .client
            .request(method, self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        (res.status().as_u16(), res.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        self.send(reqwest::Method::POST, path, body).await
    }
}

#[tokio::test]
async fn health_reports_services() {
    let app = TestApp::spawn().await;
    let (status, body) = app.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "OK");
    assert_eq!(body["message"], "HackForge Backend is running");
    assert_eq!(body["services"]["gemini"], true);
    assert_eq!(body["services"]["cache"], true);
    assert_eq!(body["services"]["database"], true);
    assert_eq!(body["environment"], "development");
}

#[tokio::test]
async fn generate_saves_history_and_lists_it() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .post(
            "/api/generate",
            json!({ "prompt": "Build a react todo app with a form", "userId": "alice" }),
        )
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["code"], GENERATED);
    assert!(body["generationTime"].is_number());
    let project_id = body["projectId"].as_str().unwrap().to_string();

    let (status, body) = app.get("/api/projects?userId=alice").await;
    assert_eq!(status, 200);
    assert_eq!(body["pagination"]["total"], 1);
    let project = &body["projects"][0];
    assert_eq!(project["_id"], project_id.as_str());
    assert_eq!(project["framework"], "react");
    assert_eq!(project["metadata"]["model"], "test-model");
    let tags: Vec<&str> = project["tags"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(tags.contains(&"form"));
    assert!(tags.contains(&"todo"));

    // Another user sees nothing.
    let (_, body) = app.get("/api/projects?userId=bob").await;
    assert_eq!(body["pagination"]["total"], 0);
}

#[tokio::test]
async fn generate_rejects_bad_prompts() {
    let app = TestApp::spawn().await;

    let (status, body) = app.post("/api/generate", json!({})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "MISSING_PROMPT");

    let (status, body) = app.post("/api/generate", json!({ "prompt": "todo" })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "PROMPT_TOO_SHORT");

    let res = app
        .client
        .post(app.url("/api/generate"))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "INVALID_JSON");
}

#[tokio::test]
async fn generate_maps_provider_failures() {
    let app = TestApp::spawn().await;
    let (status, body) = app
        .post(
            "/api/generate",
            json!({ "prompt": "please exhaust the quota now", "saveToHistory": false }),
        )
        .await;
    assert_eq!(status, 500);
    assert_eq!(body["error"], "QUOTA_EXCEEDED");
    assert!(body["details"].is_string());

    let app = TestApp::spawn_with(true, "wrong-key", &[]).await;
    let (status, body) = app
        .post("/api/generate", json!({ "prompt": "Build a landing page" }))
        .await;
    assert_eq!(status, 500);
    assert_eq!(body["error"], "INVALID_API_KEY");
}

#[tokio::test]
async fn project_crud_round() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .post("/api/projects", json!({ "title": "Only a title" }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "MISSING_REQUIRED_FIELDS");

    let (status, body) = app
        .post(
            "/api/projects",
            json!({
                "title": "  Landing page  ",
                "prompt": "A landing page",
                "generatedCode": "<html></html>",
                "tags": ["ui", " "],
            }),
        )
        .await;
    assert_eq!(status, 201);
    assert_eq!(body["message"], "Project saved successfully");
    assert_eq!(body["project"]["title"], "Landing page");
    assert_eq!(body["project"]["framework"], "react");
    assert_eq!(body["project"]["tags"], json!(["ui"]));
    let id = body["project"]["_id"].as_str().unwrap().to_string();

    let (status, body) = app.get(&format!("/api/projects/{id}")).await;
    assert_eq!(status, 200);
    assert_eq!(body["project"]["prompt"], "A landing page");

    let (status, body) = app
        .send(
            reqwest::Method::PUT,
            &format!("/api/projects/{id}"),
            json!({ "title": "Renamed", "userId": "demo-user", "createdAt": "ignored" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["project"]["title"], "Renamed");
    assert_eq!(body["message"], "Project updated successfully");

    let (status, body) = app
        .send(
            reqwest::Method::PATCH,
            &format!("/api/projects/{id}/favorite"),
            json!({}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["project"]["isFavorite"], true);
    assert_eq!(body["message"], "Project added to favorites");

    let (status, _) = app
        .send(reqwest::Method::DELETE, &format!("/api/projects/{id}"), json!({}))
        .await;
    assert_eq!(status, 200);

    let (status, body) = app.get(&format!("/api/projects/{id}")).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "PROJECT_NOT_FOUND");

    let (status, _) = app.get("/api/projects/not-a-uuid").await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn listing_is_cached_until_a_write() {
    let app = TestApp::spawn().await;
    let create = json!({ "title": "One", "prompt": "p", "generatedCode": "c" });
    app.post("/api/projects", create.clone()).await;

    let first = app.client.get(app.url("/api/projects")).send().await.unwrap();
    assert_eq!(first.headers()["x-cache"], "MISS");
    let second = app.client.get(app.url("/api/projects")).send().await.unwrap();
    assert_eq!(second.headers()["x-cache"], "HIT");
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["pagination"]["total"], 1);

    app.post("/api/projects", json!({ "title": "Two", "prompt": "p", "generatedCode": "c" }))
        .await;
    let third = app.client.get(app.url("/api/projects")).send().await.unwrap();
    assert_eq!(third.headers()["x-cache"], "MISS");
    let body: Value = third.json().await.unwrap();
    assert_eq!(body["pagination"]["total"], 2);
}

#[tokio::test]
async fn projects_need_a_database() {
    let app = TestApp::spawn_with(false, API_KEY, &[]).await;
    let (status, body) = app.get("/api/projects").await;
    assert_eq!(status, 503);
    assert_eq!(body["error"], "DATABASE_UNAVAILABLE");

    let (_, body) = app.get("/health").await;
    assert_eq!(body["services"]["database"], false);

    // Generation still works, just without history.
    let (status, body) = app
        .post("/api/generate", json!({ "prompt": "Build a react todo app" }))
        .await;
    assert_eq!(status, 200);
    assert!(body.get("projectId").is_none());
}

#[tokio::test]
async fn offline_store_flow() {
    let app = TestApp::spawn().await;

    let (_, body) = app
        .post(
            "/api/offline/save-code",
            json!({
                "id": "c1",
                "title": "Counter",
                "description": "simple counter",
                "code": "let n = 0;",
                "language": "javascript",
                "tags": ["state"],
            }),
        )
        .await;
    assert_eq!(body["message"], "Code saved for offline access");
    assert_eq!(body["code"]["isFavorite"], false);

    let (_, body) = app.get("/api/offline/codes/search/COUNTER").await;
    assert_eq!(body["count"], 1);

    let (_, body) = app
        .send(reqwest::Method::PUT, "/api/offline/codes/c1/favorite", json!({}))
        .await;
    assert_eq!(body["message"], "Code added to favorites");

    let (status, body) = app.get("/api/offline/codes/missing").await;
    assert_eq!(status, 404);
    assert_eq!(body["message"], "Offline code not found");

    let (_, body) = app
        .post("/api/offline/save-project", json!({ "id": "p1", "name": "Demo" }))
        .await;
    assert_eq!(body["project"]["name"], "Demo");

    let (status, _) = app
        .send(
            reqwest::Method::PUT,
            "/api/offline/settings/theme",
            json!({ "value": "dark" }),
        )
        .await;
    assert_eq!(status, 200);
    let (_, body) = app.get("/api/offline/settings/theme").await;
    assert_eq!(body["value"], "dark");

    let export = app.client.get(app.url("/api/offline/export")).send().await.unwrap();
    assert_eq!(
        export.headers()["content-disposition"],
        "attachment; filename=\"hackforge-offline-data.json\""
    );
    let dump: Value = export.json().await.unwrap();
    assert_eq!(dump["version"], "1.0");
    assert_eq!(dump["codes"].as_array().unwrap().len(), 1);

    let (_, body) = app
        .post(
            "/api/offline/import",
            json!({ "codes": [{ "id": "c2", "title": "Imported", "language": "python" }] }),
        )
        .await;
    assert_eq!(body["imported"]["codes"], 1);
    assert_eq!(body["total"]["codes"], 2);

    let (_, body) = app.get("/api/offline/stats").await;
    assert_eq!(body["stats"]["codes"]["total"], 2);
    assert_eq!(body["stats"]["codes"]["favorites"], 1);
    assert_eq!(body["stats"]["codes"]["byLanguage"]["python"], 1);
    assert_eq!(body["stats"]["projects"]["total"], 1);

    let (_, body) = app
        .send(reqwest::Method::DELETE, "/api/offline/clear", json!({}))
        .await;
    assert_eq!(body["deletedCount"], 3);

    let (_, body) = app.get("/api/offline/codes").await;
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn cors_preflight_and_unknown_routes() {
    let app = TestApp::spawn().await;

    let res = app
        .client
        .request(reqwest::Method::OPTIONS, app.url("/api/generate"))
        .header("Origin", "http://localhost:3000")
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 204);
    assert_eq!(
        res.headers()["access-control-allow-origin"],
        "http://localhost:3000"
    );
    assert_eq!(res.headers()["access-control-allow-credentials"], "true");

    let (status, body) = app.get("/api/nope").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "NOT_FOUND");
}

#[tokio::test]
async fn rate_limits_apply_per_route() {
    let app = TestApp::spawn_with(
        true,
        API_KEY,
        &[("RATE_LIMIT_GENERATE_MAX", "2"), ("RATE_LIMIT_PROJECTS_MAX", "3")],
    )
    .await;
    let origin = "http://localhost:3000";

    let generate = || {
        app.client
            .post(app.url("/api/generate"))
            .header("Origin", origin)
            .json(&json!({ "prompt": "Build a react todo app", "saveToHistory": false }))
            .send()
    };
    for remaining in ["1", "0"] {
        let res = generate().await.unwrap();
        assert_eq!(res.status().as_u16(), 200);
        assert_eq!(res.headers()["x-ratelimit-limit"], "2");
        assert_eq!(res.headers()["x-ratelimit-remaining"], remaining);
    }

    let res = generate().await.unwrap();
    assert_eq!(res.status().as_u16(), 429);
    assert_eq!(res.headers()["x-ratelimit-remaining"], "0");
    assert_eq!(res.headers()["access-control-allow-origin"], origin);
    let retry_after: u64 = res.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!((1..=900).contains(&retry_after));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(
        body["message"],
        "Too many code generation requests. Please try again later."
    );

    // Other routes keep their own budget.
    let (status, _) = app.get("/health").await;
    assert_eq!(status, 200);

    // Cache hits still count against the projects budget.
    for (remaining, cache) in [("2", "MISS"), ("1", "HIT"), ("0", "HIT")] {
        let res = app.client.get(app.url("/api/projects")).send().await.unwrap();
        assert_eq!(res.status().as_u16(), 200);
        assert_eq!(res.headers()["x-ratelimit-remaining"], remaining);
        assert_eq!(res.headers()["x-cache"], cache);
    }
    let res = app.client.get(app.url("/api/projects")).send().await.unwrap();
    assert_eq!(res.status().as_u16(), 429);
    assert!(res.headers().get("x-cache").is_none());
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Too many project requests. Please try again later.");
}
