use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiError, AppState, body};
use crate::context::Context;
use crate::offline::{CodeDraft, EXPORT_FILENAME, ImportData, ProjectDraft, ProjectPatch};
use crate::{Response, StatusCode};

fn ok(value: &Value) -> Response {
    Response::json(StatusCode::Ok, value)
}

/// `POST /api/offline/save-code`
pub(super) async fn save_code(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let draft: CodeDraft = body(&ctx)?;
    let code = state.offline.save_code(draft).await;
    Ok(ok(&json!({
        "success": true,
        "message": "Code saved for offline access",
        "code": code,
    })))
}

/// `GET /api/offline/codes[?language=]`
pub(super) async fn codes(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let codes = state.offline.codes(ctx.query("language")).await;
    Ok(ok(&json!({ "success": true, "count": codes.len(), "codes": codes })))
}

/// `GET /api/offline/codes/:id`
pub(super) async fn code(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let code = state
        .offline
        .code(ctx.param("id"))
        .await
        .ok_or(ApiError::OfflineCodeNotFound)?;
    Ok(ok(&json!({ "success": true, "code": code })))
}

/// `GET /api/offline/codes/search/:query`
pub(super) async fn search_codes(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let query = ctx.param("query");
    let results = state.offline.search_codes(query).await;
    Ok(ok(&json!({
        "success": true,
        "query": query,
        "count": results.len(),
        "results": results,
    })))
}

/// `PUT /api/offline/codes/:id/favorite`
pub(super) async fn toggle_code_favorite(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let code = state
        .offline
        .toggle_code_favorite(ctx.param("id"))
        .await
        .ok_or(ApiError::OfflineCodeNotFound)?;
    let message = if code.is_favorite {
        "Code added to favorites"
    } else {
        "Code removed from favorites"
    };
    Ok(ok(&json!({ "success": true, "message": message, "code": code })))
}

/// `DELETE /api/offline/codes/:id`
pub(super) async fn delete_code(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let deleted = state
        .offline
        .delete_code(ctx.param("id"))
        .await
        .ok_or(ApiError::OfflineCodeNotFound)?;
    Ok(ok(&json!({
        "success": true,
        "message": "Code deleted from offline storage",
        "deletedCode": deleted,
    })))
}

/// `POST /api/offline/save-project`
pub(super) async fn save_project(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let draft: ProjectDraft = body(&ctx)?;
    let project = state.offline.save_project(draft).await;
    Ok(ok(&json!({
        "success": true,
        "message": "Project saved for offline access",
        "project": project,
    })))
}

/// `GET /api/offline/projects`
pub(super) async fn projects(state: AppState, _ctx: Context) -> Result<Response, ApiError> {
    let projects = state.offline.projects().await;
    Ok(ok(&json!({
        "success": true,
        "count": projects.len(),
        "projects": projects,
    })))
}

/// `GET /api/offline/projects/:id`
pub(super) async fn project(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let project = state
        .offline
        .project(ctx.param("id"))
        .await
        .ok_or(ApiError::OfflineProjectNotFound)?;
    Ok(ok(&json!({ "success": true, "project": project })))
}

/// `PUT /api/offline/projects/:id`
pub(super) async fn update_project(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let patch: ProjectPatch = body(&ctx)?;
    let project = state
        .offline
        .update_project(ctx.param("id"), patch)
        .await
        .ok_or(ApiError::OfflineProjectNotFound)?;
    Ok(ok(&json!({
        "success": true,
        "message": "Project updated successfully",
        "project": project,
    })))
}

/// `DELETE /api/offline/projects/:id`
pub(super) async fn delete_project(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let deleted = state
        .offline
        .delete_project(ctx.param("id"))
        .await
        .ok_or(ApiError::OfflineProjectNotFound)?;
    Ok(ok(&json!({
        "success": true,
        "message": "Project deleted from offline storage",
        "deletedProject": deleted,
    })))
}

#[derive(Debug, Deserialize)]
struct SettingBody {
    #[serde(default)]
    value: Value,
}

/// `GET /api/offline/settings/:key`
pub(super) async fn setting(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let key = ctx.param("key");
    let value = state
        .offline
        .setting(key)
        .await
        .ok_or(ApiError::SettingNotFound)?;
    Ok(ok(&json!({ "success": true, "key": key, "value": value })))
}

/// `PUT /api/offline/settings/:key` with body `{"value": ...}`
pub(super) async fn save_setting(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let SettingBody { value } = body(&ctx)?;
    let key = ctx.param("key");
    state.offline.save_setting(key, value.clone()).await;
    Ok(ok(&json!({
        "success": true,
        "message": "Setting saved",
        "key": key,
        "value": value,
    })))
}

/// `GET /api/offline/export`, served as a file download.
pub(super) async fn export(state: AppState, _ctx: Context) -> Result<Response, ApiError> {
    let data = state.offline.export().await;
    Ok(Response::json(StatusCode::Ok, &data).header(
        "Content-Disposition",
        format!("attachment; filename=\"{EXPORT_FILENAME}\""),
    ))
}

/// `POST /api/offline/import`
pub(super) async fn import(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let data: ImportData = body(&ctx)?;
    let summary = state.offline.import(data).await;
    Ok(ok(&json!({
        "success": true,
        "message": "Offline data imported successfully",
        "imported": summary.imported,
        "total": summary.total,
    })))
}

/// `GET /api/offline/stats`
pub(super) async fn stats(state: AppState, _ctx: Context) -> Result<Response, ApiError> {
    let stats = state.offline.stats().await;
    Ok(ok(&json!({ "success": true, "stats": stats })))
}

/// `DELETE /api/offline/clear`
pub(super) async fn clear(state: AppState, _ctx: Context) -> Result<Response, ApiError> {
    let deleted = state.offline.clear().await;
    Ok(ok(&json!({
        "success": true,
        "message": "All offline data cleared successfully",
        "deletedCount": deleted,
    })))
}
