use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use super::StoreError;

const COLUMNS: &str = "id, user_id, title, prompt, generated_code, framework, tags, is_favorite, \
                       tokens_used, generation_time, model, created_at, updated_at";

/// Generation details recorded alongside a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<i64>,
    /// Milliseconds spent waiting on the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// A saved prompt together with the code generated for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub prompt: String,
    pub generated_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    pub tags: Vec<String>,
    pub is_favorite: bool,
    pub metadata: ProjectMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ProjectRow {
    id: Uuid,
    user_id: String,
    title: String,
    prompt: String,
    generated_code: String,
    framework: Option<String>,
    tags: Json<Vec<String>>,
    is_favorite: bool,
    tokens_used: Option<i64>,
    generation_time: Option<i64>,
    model: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            prompt: row.prompt,
            generated_code: row.generated_code,
            framework: row.framework,
            tags: row.tags.0,
            is_favorite: row.is_favorite,
            metadata: ProjectMetadata {
                tokens_used: row.tokens_used,
                generation_time: row.generation_time,
                model: row.model,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub user_id: String,
    pub title: String,
    pub prompt: String,
    pub generated_code: String,
    pub framework: Option<String>,
    pub tags: Vec<String>,
    pub is_favorite: bool,
    pub metadata: ProjectMetadata,
}

/// Fields a client may change. Anything else in an update body (owner, id,
/// timestamps) is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdate {
    pub title: Option<String>,
    pub prompt: Option<String>,
    pub generated_code: Option<String>,
    pub framework: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_favorite: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Title,
    Framework,
}

impl SortField {
    /// Parses the `sortBy` query value.
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "createdAt" => Some(Self::CreatedAt),
            "updatedAt" => Some(Self::UpdatedAt),
            "title" => Some(Self::Title),
            "framework" => Some(Self::Framework),
            _ => None,
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::Title => "title",
            Self::Framework => "framework",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// Parses the `sortOrder` query value; anything but `asc` sorts descending.
    pub fn from_param(value: &str) -> Self {
        if value.eq_ignore_ascii_case("asc") {
            Self::Asc
        } else {
            Self::Desc
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Listing parameters for [`Project::list`].
#[derive(Debug, Clone)]
pub struct ProjectQuery {
    pub user_id: String,
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
    pub search: Option<String>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

impl ProjectQuery {
    pub const DEFAULT_LIMIT: u32 = 10;
    pub const MAX_LIMIT: u32 = 100;

    /// First page of `user_id`'s projects, newest first.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            page: 1,
            limit: Self::DEFAULT_LIMIT,
            search: None,
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
        }
    }

    fn offset(&self) -> i64 {
        i64::from(self.page.max(1) - 1) * i64::from(self.limit())
    }

    fn limit(&self) -> u32 {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }

    fn search_pattern(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", escape_like(s)))
    }
}

/// Page metadata returned next to a project listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub pages: i64,
}

impl Pagination {
    pub fn new(query: &ProjectQuery, total: i64) -> Self {
        let limit = query.limit();
        Self {
            page: query.page.max(1),
            limit,
            total,
            pages: (total + i64::from(limit) - 1) / i64::from(limit),
        }
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
        .collect()
}

fn clean_title(title: &str) -> Result<String, StoreError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(StoreError::Validation("title must not be empty".to_string()));
    }
    Ok(title.to_owned())
}

impl Project {
    /// Inserts a project with a new UUID. The title is trimmed and must not be
    /// blank; empty tags are dropped.
    pub async fn create(pool: &SqlitePool, new: NewProject) -> Result<Self, StoreError> {
        let title = clean_title(&new.title)?;
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO projects ({COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
             RETURNING {COLUMNS}"
        );

        let row = sqlx::query_as::<_, ProjectRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.user_id)
            .bind(title)
            .bind(new.prompt)
            .bind(new.generated_code)
            .bind(new.framework)
            .bind(Json(clean_tags(new.tags)))
            .bind(new.is_favorite)
            .bind(new.metadata.tokens_used)
            .bind(new.metadata.generation_time)
            .bind(new.metadata.model)
            .bind(now)
            .fetch_one(pool)
            .await?;
        Ok(row.into())
    }

    /// One page of a user's projects plus the total number matching.
    pub async fn list(
        pool: &SqlitePool,
        query: &ProjectQuery,
    ) -> Result<(Vec<Self>, i64), StoreError> {
        let filter = "user_id = $1 AND ($2 IS NULL \
                      OR title LIKE $2 ESCAPE '\\' \
                      OR prompt LIKE $2 ESCAPE '\\' \
                      OR EXISTS (SELECT 1 FROM json_each(tags) \
                                 WHERE value LIKE $2 ESCAPE '\\'))";
        let pattern = query.search_pattern();

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM projects WHERE {filter}"))
            .bind(&query.user_id)
            .bind(&pattern)
            .fetch_one(pool)
            .await?;

        let order = query.sort_order.sql();
        let sql = format!(
            "SELECT {COLUMNS} FROM projects WHERE {filter}
             ORDER BY {} {order}, rowid {order}
             LIMIT $3 OFFSET $4",
            query.sort_by.column()
        );
        let rows = sqlx::query_as::<_, ProjectRow>(&sql)
            .bind(&query.user_id)
            .bind(&pattern)
            .bind(i64::from(query.limit()))
            .bind(query.offset())
            .fetch_all(pool)
            .await?;

        Ok((rows.into_iter().map(Self::from).collect(), total))
    }

    /// Looks up a project owned by `user_id`. Ids that are not UUIDs simply
    /// match nothing.
    pub async fn find_by_id(
        pool: &SqlitePool,
        id: &str,
        user_id: &str,
    ) -> Result<Option<Self>, StoreError> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let sql = format!("SELECT {COLUMNS} FROM projects WHERE id = $1 AND user_id = $2");
        let row = sqlx::query_as::<_, ProjectRow>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(Self::from))
    }

    /// Applies the fields present in `update` and bumps `updated_at`.
    /// Returns `None` when the user owns no project with that id.
    pub async fn update(
        pool: &SqlitePool,
        id: &str,
        user_id: &str,
        update: ProjectUpdate,
    ) -> Result<Option<Self>, StoreError> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let title = update.title.as_deref().map(clean_title).transpose()?;
        let sql = format!(
            "UPDATE projects SET
                title = COALESCE($1, title),
                prompt = COALESCE($2, prompt),
                generated_code = COALESCE($3, generated_code),
                framework = COALESCE($4, framework),
                tags = COALESCE($5, tags),
                is_favorite = COALESCE($6, is_favorite),
                updated_at = $7
             WHERE id = $8 AND user_id = $9
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, ProjectRow>(&sql)
            .bind(title)
            .bind(update.prompt)
            .bind(update.generated_code)
            .bind(update.framework)
            .bind(update.tags.map(|tags| Json(clean_tags(tags))))
            .bind(update.is_favorite)
            .bind(Utc::now())
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(Self::from))
    }

    /// Returns whether a project was removed.
    pub async fn delete(pool: &SqlitePool, id: &str, user_id: &str) -> Result<bool, StoreError> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(false);
        };
        let result = sqlx::query("DELETE FROM projects WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Flips `is_favorite` and returns the updated project.
    pub async fn toggle_favorite(
        pool: &SqlitePool,
        id: &str,
        user_id: &str,
    ) -> Result<Option<Self>, StoreError> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let sql = format!(
            "UPDATE projects SET is_favorite = NOT is_favorite, updated_at = $1
             WHERE id = $2 AND user_id = $3
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, ProjectRow>(&sql)
            .bind(Utc::now())
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(Self::from))
    }
}
