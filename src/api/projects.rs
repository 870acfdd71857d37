//! `/api/projects`: the saved history of generations, scoped per user.
//!
//! The owner comes from `userId` (query string for reads and deletes, body
//! for writes) and defaults to the demo user.

use serde::Deserialize;
use serde_json::json;

use super::{ApiError, AppState, ProjectOp, body};
use crate::codegen::{DEFAULT_USER_ID, metadata::DEFAULT_FRAMEWORK};
use crate::context::Context;
use crate::database::{
    NewProject, Pagination, Project, ProjectMetadata, ProjectQuery, ProjectUpdate, SortField,
    SortOrder,
};
use crate::{Response, StatusCode};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CreateProject {
    title: Option<String>,
    prompt: Option<String>,
    generated_code: Option<String>,
    framework: Option<String>,
    tags: Option<Vec<String>>,
    user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Owner {
    user_id: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn query_user(ctx: &Context) -> String {
    ctx.query("userId")
        .filter(|u| !u.is_empty())
        .unwrap_or(DEFAULT_USER_ID)
        .to_owned()
}

fn body_user(ctx: &Context) -> Result<String, ApiError> {
    let owner: Owner = body(ctx)?;
    Ok(non_empty(owner.user_id).unwrap_or_else(|| DEFAULT_USER_ID.to_owned()))
}

fn positive(ctx: &Context, key: &str) -> Option<u32> {
    ctx.query(key)
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|v| *v > 0)
}

/// `POST /api/projects`
pub(super) async fn create(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let req: CreateProject = body(&ctx)?;
    let (Some(title), Some(prompt), Some(generated_code)) = (
        non_empty(req.title),
        non_empty(req.prompt),
        non_empty(req.generated_code),
    ) else {
        return Err(ApiError::MissingFields(
            "Title, prompt, and generated code are required",
        ));
    };

    let db = state.db()?;
    let new = NewProject {
        user_id: non_empty(req.user_id).unwrap_or_else(|| DEFAULT_USER_ID.to_owned()),
        title,
        prompt,
        generated_code,
        framework: Some(non_empty(req.framework).unwrap_or_else(|| DEFAULT_FRAMEWORK.to_owned())),
        tags: req.tags.unwrap_or_default(),
        is_favorite: false,
        metadata: ProjectMetadata {
            model: Some(state.generation.generator().model().to_owned()),
            ..ProjectMetadata::default()
        },
    };
    let project = Project::create(db.pool(), new)
        .await
        .map_err(|e| ApiError::store(ProjectOp::Create, e))?;

    Ok(Response::json(
        StatusCode::Created,
        &json!({
            "success": true,
            "project": project,
            "message": "Project saved successfully",
        }),
    ))
}

/// `GET /api/projects?userId&page&limit&search&sortBy&sortOrder`
pub(super) async fn list(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let db = state.db()?;

    let mut query = ProjectQuery::new(query_user(&ctx));
    query.page = positive(&ctx, "page").unwrap_or(1);
    query.limit = positive(&ctx, "limit").unwrap_or(ProjectQuery::DEFAULT_LIMIT);
    query.search = ctx.query("search").map(str::to_owned);
    query.sort_by = ctx
        .query("sortBy")
        .and_then(SortField::from_param)
        .unwrap_or_default();
    query.sort_order = ctx
        .query("sortOrder")
        .map(SortOrder::from_param)
        .unwrap_or_default();

    let (projects, total) = Project::list(db.pool(), &query)
        .await
        .map_err(|e| ApiError::store(ProjectOp::List, e))?;

    Ok(Response::json(
        StatusCode::Ok,
        &json!({
            "success": true,
            "projects": projects,
            "pagination": Pagination::new(&query, total),
        }),
    ))
}

/// `GET /api/projects/:id`
pub(super) async fn fetch(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let db = state.db()?;
    let project = Project::find_by_id(db.pool(), ctx.param("id"), &query_user(&ctx))
        .await
        .map_err(|e| ApiError::store(ProjectOp::Fetch, e))?
        .ok_or(ApiError::ProjectNotFound)?;

    Ok(Response::json(
        StatusCode::Ok,
        &json!({ "success": true, "project": project }),
    ))
}

/// `PUT /api/projects/:id`
pub(super) async fn update(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let user = body_user(&ctx)?;
    let changes: ProjectUpdate = body(&ctx)?;
    let db = state.db()?;

    let project = Project::update(db.pool(), ctx.param("id"), &user, changes)
        .await
        .map_err(|e| ApiError::store(ProjectOp::Update, e))?
        .ok_or(ApiError::ProjectNotFound)?;

    Ok(Response::json(
        StatusCode::Ok,
        &json!({
            "success": true,
            "project": project,
            "message": "Project updated successfully",
        }),
    ))
}

/// `DELETE /api/projects/:id`
pub(super) async fn delete(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let db = state.db()?;
    let deleted = Project::delete(db.pool(), ctx.param("id"), &query_user(&ctx))
        .await
        .map_err(|e| ApiError::store(ProjectOp::Delete, e))?;
    if !deleted {
        return Err(ApiError::ProjectNotFound);
    }

    Ok(Response::json(
        StatusCode::Ok,
        &json!({ "success": true, "message": "Project deleted successfully" }),
    ))
}

/// `PATCH /api/projects/:id/favorite`
pub(super) async fn toggle_favorite(state: AppState, ctx: Context) -> Result<Response, ApiError> {
    let user = body_user(&ctx)?;
    let db = state.db()?;

    let project = Project::toggle_favorite(db.pool(), ctx.param("id"), &user)
        .await
        .map_err(|e| ApiError::store(ProjectOp::ToggleFavorite, e))?
        .ok_or(ApiError::ProjectNotFound)?;

    let message = if project.is_favorite {
        "Project added to favorites"
    } else {
        "Project removed from favorites"
    };
    Ok(Response::json(
        StatusCode::Ok,
        &json!({ "success": true, "project": project, "message": message }),
    ))
}
