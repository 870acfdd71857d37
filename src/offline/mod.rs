//! Offline store: codes, projects and settings kept in process memory so a
//! client can sync them without the model or the database.
//!
//! Collections keep insertion order; saving an existing id replaces the entry
//! in place.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

pub const EXPORT_VERSION: &str = "1.0";
pub const EXPORT_FILENAME: &str = "hackforge-offline-data.json";

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A generated snippet saved for offline use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfflineCode {
    pub id: String,
    pub title: String,
    pub description: String,
    pub code: String,
    pub language: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub tags: Vec<String>,
    pub is_favorite: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfflineProject {
    pub id: String,
    pub name: String,
    pub description: String,
    pub codes: Vec<OfflineCode>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Body of a code save. A missing id gets a generated one.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodeDraft {
    pub id: Option<String>,
    pub title: String,
    pub description: String,
    pub code: String,
    pub language: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectDraft {
    pub id: Option<String>,
    pub name: String,
    pub description: String,
    pub codes: Vec<OfflineCode>,
}

/// Partial project update; absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub codes: Option<Vec<OfflineCode>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: Value,
}

/// Full dump of the store, also accepted back by [`OfflineStore::import`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    pub codes: Vec<OfflineCode>,
    pub projects: Vec<OfflineProject>,
    pub settings: Vec<Setting>,
    pub export_date: DateTime<Utc>,
    pub version: &'static str,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImportData {
    pub codes: Option<Vec<OfflineCode>>,
    pub projects: Option<Vec<OfflineProject>>,
    pub settings: Option<Vec<Setting>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub codes: usize,
    pub projects: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: Counts,
    pub total: Counts,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeStats {
    pub total: usize,
    pub favorites: usize,
    pub by_language: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    pub total: usize,
    pub with_codes: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    /// Length of the serialized codes and projects, in bytes.
    pub estimated_size: usize,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub codes: CodeStats,
    pub projects: ProjectStats,
    pub storage: StorageStats,
}

#[derive(Debug)]
struct Inner {
    codes: Vec<OfflineCode>,
    projects: Vec<OfflineProject>,
    settings: BTreeMap<String, Value>,
    last_updated: DateTime<Utc>,
}

impl Inner {
    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// `<prefix><millis>`, bumped until no stored entry uses it.
    fn fresh_id(&self, prefix: &str, taken: impl Fn(&Self, &str) -> bool) -> String {
        let mut millis = now_millis();
        loop {
            let id = format!("{prefix}{millis}");
            if !taken(self, &id) {
                return id;
            }
            millis += 1;
        }
    }
}

fn upsert<T>(items: &mut Vec<T>, item: T, id_of: impl Fn(&T) -> &str) {
    match items.iter().position(|existing| id_of(existing) == id_of(&item)) {
        Some(index) => items[index] = item,
        None => items.push(item),
    }
}

fn matches_query(code: &OfflineCode, needle: &str) -> bool {
    code.title.to_lowercase().contains(needle)
        || code.description.to_lowercase().contains(needle)
        || code.tags.iter().any(|tag| tag.to_lowercase().contains(needle))
        || code.code.to_lowercase().contains(needle)
}

/// Thread-safe offline store shared by all request handlers.
#[derive(Debug)]
pub struct OfflineStore {
    inner: RwLock<Inner>,
}

impl Default for OfflineStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineStore {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                codes: Vec::new(),
                projects: Vec::new(),
                settings: BTreeMap::new(),
                last_updated: Utc::now(),
            }),
        }
    }

    /// Stores a code snippet, replacing any entry with the same id. The saved
    /// snippet starts out as not favorite.
    pub async fn save_code(&self, draft: CodeDraft) -> OfflineCode {
        let mut inner = self.inner.write().await;
        let id = match draft.id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => inner.fresh_id("offline_", |s, id| s.codes.iter().any(|c| c.id == id)),
        };
        let code = OfflineCode {
            id,
            title: draft.title,
            description: draft.description,
            code: draft.code,
            language: draft.language,
            timestamp: now_millis(),
            tags: draft.tags,
            is_favorite: false,
        };
        upsert(&mut inner.codes, code.clone(), |c| c.id.as_str());
        inner.touch();
        code
    }

    /// All codes, optionally only those in `language` (case-insensitive).
    pub async fn codes(&self, language: Option<&str>) -> Vec<OfflineCode> {
        let inner = self.inner.read().await;
        inner
            .codes
            .iter()
            .filter(|c| language.is_none_or(|lang| c.language.eq_ignore_ascii_case(lang)))
            .cloned()
            .collect()
    }

    /// Looks up one code by id.
    pub async fn code(&self, id: &str) -> Option<OfflineCode> {
        let inner = self.inner.read().await;
        inner.codes.iter().find(|c| c.id == id).cloned()
    }

    /// Case-insensitive substring search over title, description, tags and code.
    pub async fn search_codes(&self, query: &str) -> Vec<OfflineCode> {
        let needle = query.to_lowercase();
        let inner = self.inner.read().await;
        inner
            .codes
            .iter()
            .filter(|c| matches_query(c, &needle))
            .cloned()
            .collect()
    }

    /// Flips the favorite flag, returning the updated code.
    pub async fn toggle_code_favorite(&self, id: &str) -> Option<OfflineCode> {
        let mut inner = self.inner.write().await;
        let code = inner.codes.iter_mut().find(|c| c.id == id)?;
        code.is_favorite = !code.is_favorite;
        let toggled = code.clone();
        inner.touch();
        Some(toggled)
    }

    /// Removes a code and returns it.
    pub async fn delete_code(&self, id: &str) -> Option<OfflineCode> {
        let mut inner = self.inner.write().await;
        let index = inner.codes.iter().position(|c| c.id == id)?;
        let removed = inner.codes.remove(index);
        inner.touch();
        Some(removed)
    }

    /// Stores a project, replacing any entry with the same id. Both timestamps
    /// are reset to now.
    pub async fn save_project(&self, draft: ProjectDraft) -> OfflineProject {
        let mut inner = self.inner.write().await;
        let id = match draft.id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => inner.fresh_id("offline_project_", |s, id| {
                s.projects.iter().any(|p| p.id == id)
            }),
        };
        let now = now_millis();
        let project = OfflineProject {
            id,
            name: draft.name,
            description: draft.description,
            codes: draft.codes,
            created_at: now,
            updated_at: now,
        };
        upsert(&mut inner.projects, project.clone(), |p| p.id.as_str());
        inner.touch();
        project
    }

    /// All projects in insertion order.
    pub async fn projects(&self) -> Vec<OfflineProject> {
        self.inner.read().await.projects.clone()
    }

    /// Looks up one project by id.
    pub async fn project(&self, id: &str) -> Option<OfflineProject> {
        let inner = self.inner.read().await;
        inner.projects.iter().find(|p| p.id == id).cloned()
    }

    /// Applies `patch` and bumps `updated_at`.
    pub async fn update_project(&self, id: &str, patch: ProjectPatch) -> Option<OfflineProject> {
        let mut inner = self.inner.write().await;
        let project = inner.projects.iter_mut().find(|p| p.id == id)?;
        if let Some(name) = patch.name {
            project.name = name;
        }
        if let Some(description) = patch.description {
            project.description = description;
        }
        if let Some(codes) = patch.codes {
            project.codes = codes;
        }
        project.updated_at = now_millis();
        let updated = project.clone();
        inner.touch();
        Some(updated)
    }

    /// Removes a project and returns it.
    pub async fn delete_project(&self, id: &str) -> Option<OfflineProject> {
        let mut inner = self.inner.write().await;
        let index = inner.projects.iter().position(|p| p.id == id)?;
        let removed = inner.projects.remove(index);
        inner.touch();
        Some(removed)
    }

    /// Inserts or overwrites a setting.
    pub async fn save_setting(&self, key: impl Into<String>, value: Value) {
        let mut inner = self.inner.write().await;
        inner.settings.insert(key.into(), value);
        inner.touch();
    }

    pub async fn setting(&self, key: &str) -> Option<Value> {
        self.inner.read().await.settings.get(key).cloned()
    }

    /// Snapshot of everything, stamped with the export time and format version.
    pub async fn export(&self) -> ExportData {
        let inner = self.inner.read().await;
        ExportData {
            codes: inner.codes.clone(),
            projects: inner.projects.clone(),
            settings: inner
                .settings
                .iter()
                .map(|(key, value)| Setting {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
            export_date: Utc::now(),
            version: EXPORT_VERSION,
        }
    }

    /// Merges imported data; entries whose id already exists are replaced and
    /// entries without an id are given a fresh one.
    pub async fn import(&self, data: ImportData) -> ImportSummary {
        let mut inner = self.inner.write().await;
        let codes = data.codes.unwrap_or_default();
        let projects = data.projects.unwrap_or_default();
        let imported = Counts {
            codes: codes.len(),
            projects: projects.len(),
        };

        for mut code in codes {
            if code.id.is_empty() {
                code.id = inner.fresh_id("offline_", |s, id| s.codes.iter().any(|c| c.id == id));
            }
            upsert(&mut inner.codes, code, |c| c.id.as_str());
        }
        for mut project in projects {
            if project.id.is_empty() {
                project.id = inner.fresh_id("offline_project_", |s, id| {
                    s.projects.iter().any(|p| p.id == id)
                });
            }
            upsert(&mut inner.projects, project, |p| p.id.as_str());
        }
        for setting in data.settings.unwrap_or_default() {
            inner.settings.insert(setting.key, setting.value);
        }
        inner.touch();

        ImportSummary {
            imported,
            total: Counts {
                codes: inner.codes.len(),
                projects: inner.projects.len(),
            },
        }
    }

    /// Counts per collection plus the approximate serialized size.
    pub async fn stats(&self) -> Stats {
        let inner = self.inner.read().await;

        let mut by_language = BTreeMap::new();
        for code in &inner.codes {
            *by_language.entry(code.language.clone()).or_insert(0) += 1;
        }

        #[derive(Serialize)]
        struct Snapshot<'a> {
            codes: &'a [OfflineCode],
            projects: &'a [OfflineProject],
        }
        let estimated_size = serde_json::to_string(&Snapshot {
            codes: &inner.codes,
            projects: &inner.projects,
        })
        .map_or(0, |s| s.len());

        Stats {
            codes: CodeStats {
                total: inner.codes.len(),
                favorites: inner.codes.iter().filter(|c| c.is_favorite).count(),
                by_language,
            },
            projects: ProjectStats {
                total: inner.projects.len(),
                with_codes: inner.projects.iter().filter(|p| !p.codes.is_empty()).count(),
            },
            storage: StorageStats {
                estimated_size,
                last_updated: inner.last_updated,
            },
        }
    }

    /// Empties the store and returns how many codes and projects were removed.
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.write().await;
        let deleted = inner.codes.len() + inner.projects.len();
        inner.codes.clear();
        inner.projects.clear();
        inner.settings.clear();
        inner.touch();
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft(id: Option<&str>, title: &str, language: &str) -> CodeDraft {
        CodeDraft {
            id: id.map(str::to_owned),
            title: title.to_owned(),
            description: "demo".to_owned(),
            code: "console.log('hi')".to_owned(),
            language: language.to_owned(),
            tags: vec!["Starter".to_owned()],
        }
    }

    #[tokio::test]
    async fn save_code_generates_unique_ids_and_upserts() {
        let store = OfflineStore::new();
        let a = store.save_code(draft(None, "A", "javascript")).await;
        let b = store.save_code(draft(None, "B", "javascript")).await;
        assert!(a.id.starts_with("offline_"));
        assert_ne!(a.id, b.id);

        store.toggle_code_favorite(&a.id).await.unwrap();
        let replaced = store.save_code(draft(Some(&a.id), "A2", "python")).await;
        assert!(!replaced.is_favorite);

        let codes = store.codes(None).await;
        assert_eq!(codes.len(), 2);
        assert_eq!(codes[0].title, "A2");
        assert_eq!(store.codes(Some("PYTHON")).await.len(), 1);
    }

    #[tokio::test]
    async fn search_is_case_insensitive_across_fields() {
        let store = OfflineStore::new();
        store.save_code(draft(Some("1"), "Todo List", "javascript")).await;
        store.save_code(draft(Some("2"), "Weather", "python")).await;

        assert_eq!(store.search_codes("todo").await.len(), 1);
        assert_eq!(store.search_codes("starter").await.len(), 2);
        assert_eq!(store.search_codes("CONSOLE").await.len(), 2);
        assert!(store.search_codes("nothing").await.is_empty());
    }

    #[tokio::test]
    async fn favorite_and_delete_report_missing_ids() {
        let store = OfflineStore::new();
        assert!(store.toggle_code_favorite("nope").await.is_none());
        assert!(store.delete_code("nope").await.is_none());

        let code = store.save_code(draft(Some("x"), "X", "go")).await;
        assert!(store.toggle_code_favorite("x").await.unwrap().is_favorite);
        assert_eq!(store.delete_code("x").await.unwrap().id, code.id);
        assert!(store.code("x").await.is_none());
    }

    #[tokio::test]
    async fn project_update_merges_fields() {
        let store = OfflineStore::new();
        let project = store
            .save_project(ProjectDraft {
                name: "Site".into(),
                ..Default::default()
            })
            .await;
        assert!(project.id.starts_with("offline_project_"));
        assert_eq!(project.created_at, project.updated_at);

        let patch = ProjectPatch {
            description: Some("landing page".into()),
            ..Default::default()
        };
        let updated = store.update_project(&project.id, patch).await.unwrap();
        assert_eq!(updated.name, "Site");
        assert_eq!(updated.description, "landing page");
        assert!(updated.updated_at >= project.updated_at);

        assert!(store.update_project("nope", ProjectPatch::default()).await.is_none());
        assert!(store.delete_project(&project.id).await.is_some());
        assert!(store.projects().await.is_empty());
    }

    #[tokio::test]
    async fn export_import_and_clear() {
        let store = OfflineStore::new();
        store.save_code(draft(Some("c1"), "One", "rust")).await;
        store.save_setting("theme", json!("dark")).await;

        let export = store.export().await;
        assert_eq!(export.version, "1.0");
        assert_eq!(export.settings[0].key, "theme");

        let value = serde_json::to_value(&export).unwrap();
        assert!(value.get("exportDate").is_some());

        let other = OfflineStore::new();
        let data: ImportData = serde_json::from_value(value).unwrap();
        let summary = other.import(data).await;
        assert_eq!(summary.imported, Counts { codes: 1, projects: 0 });
        assert_eq!(summary.total, Counts { codes: 1, projects: 0 });
        assert_eq!(other.setting("theme").await, Some(json!("dark")));

        // Re-importing the same ids does not duplicate them.
        let again = other
            .import(ImportData {
                codes: Some(export.codes.clone()),
                ..Default::default()
            })
            .await;
        assert_eq!(again.total.codes, 1);

        assert_eq!(other.clear().await, 1);
        assert!(other.codes(None).await.is_empty());
        assert!(other.setting("theme").await.is_none());
    }

    #[tokio::test]
    async fn import_assigns_ids_to_entries_without_one() {
        let store = OfflineStore::new();
        let data: ImportData = serde_json::from_value(json!({
            "codes": [{ "title": "First" }, { "id": "", "title": "Second" }],
            "projects": [{ "name": "Site" }],
        }))
        .unwrap();

        let summary = store.import(data).await;
        assert_eq!(summary.total, Counts { codes: 2, projects: 1 });

        let codes = store.codes(None).await;
        assert!(codes.iter().all(|c| c.id.starts_with("offline_")));
        assert_ne!(codes[0].id, codes[1].id);
        assert_eq!(store.code(&codes[1].id).await.unwrap().title, "Second");

        let projects = store.projects().await;
        assert!(projects[0].id.starts_with("offline_project_"));
    }

    #[tokio::test]
    async fn stats_summarise_contents() {
        let store = OfflineStore::new();
        store.save_code(draft(Some("a"), "A", "rust")).await;
        store.save_code(draft(Some("b"), "B", "rust")).await;
        store.save_code(draft(Some("c"), "C", "go")).await;
        store.toggle_code_favorite("c").await;
        store
            .save_project(ProjectDraft {
                id: Some("p".into()),
                codes: store.codes(Some("go")).await,
                ..Default::default()
            })
            .await;
        store.save_project(ProjectDraft::default()).await;

        let stats = store.stats().await;
        assert_eq!(stats.codes.total, 3);
        assert_eq!(stats.codes.favorites, 1);
        assert_eq!(stats.codes.by_language["rust"], 2);
        assert_eq!(stats.projects.total, 2);
        assert_eq!(stats.projects.with_codes, 1);
        assert!(stats.storage.estimated_size > 0);

        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["codes"]["byLanguage"]["go"], 1);
        assert_eq!(value["projects"]["withCodes"], 1);
    }

    #[test]
    fn partial_payloads_deserialize_with_defaults() {
        let code: OfflineCode = serde_json::from_value(json!({ "id": "x", "title": "T" })).unwrap();
        assert!(code.tags.is_empty());
        assert!(!code.is_favorite);

        let draft: CodeDraft = serde_json::from_value(json!({ "code": "x" })).unwrap();
        assert!(draft.id.is_none());
    }
}
