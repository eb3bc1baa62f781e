use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;
use ttm_core::{now_rfc3339, PreviewPatch, PreviewState, Tier};

pub const STUDIO_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("preview not found: {0}")]
    MissingPreview(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// One promoted article in the durable content store.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedArticle {
    pub slug: String,
    pub preview_id: String,
    pub title: String,
    pub excerpt: String,
    pub content: String,
    pub model_name: String,
    pub organization: Option<String>,
    pub overall_score: f64,
    pub tier: Tier,
    pub published_at: String,
}

pub struct StudioStore {
    conn: Connection,
}

impl StudioStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > STUDIO_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: STUDIO_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_preview_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    /// Upserts a full preview session. `created_at` is preserved across
    /// replacements; `last_modified` is stamped on every save.
    pub fn save_preview(&self, state: &PreviewState) -> Result<PreviewState, StorageError> {
        let now = now_rfc3339();
        let created_at = if state.created_at.is_empty() {
            now.clone()
        } else {
            state.created_at.clone()
        };
        self.conn.execute(
            "
            INSERT INTO local_previews (
                preview_id,
                model_data,
                article_data,
                linkedin_data,
                scores_data,
                created_at,
                last_modified,
                publish_status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(preview_id) DO UPDATE SET
                model_data = excluded.model_data,
                article_data = excluded.article_data,
                linkedin_data = excluded.linkedin_data,
                scores_data = excluded.scores_data,
                last_modified = excluded.last_modified,
                publish_status = excluded.publish_status
            ",
            params![
                state.preview_id,
                to_json(&state.model_data)?,
                to_json(&state.article_data)?,
                to_json(&state.linkedin_data)?,
                to_json(&state.scores_data)?,
                created_at,
                now,
                state.publish_status,
            ],
        )?;
        self.get_preview(&state.preview_id)?
            .ok_or_else(|| StorageError::MissingPreview(state.preview_id.clone()))
    }

    pub fn get_preview(&self, preview_id: &str) -> Result<Option<PreviewState>, StorageError> {
        self.conn
            .query_row(
                "
                SELECT preview_id, model_data, article_data, linkedin_data,
                       scores_data, created_at, last_modified, publish_status
                FROM local_previews WHERE preview_id = ?1
                ",
                params![preview_id],
                row_to_preview,
            )
            .optional()?
            .transpose()
    }

    pub fn list_previews(&self) -> Result<Vec<PreviewState>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT preview_id, model_data, article_data, linkedin_data,
                   scores_data, created_at, last_modified, publish_status
            FROM local_previews ORDER BY last_modified DESC
            ",
        )?;
        let rows = stmt.query_map([], row_to_preview)?;
        let mut previews = Vec::new();
        for row in rows {
            previews.push(row??);
        }
        Ok(previews)
    }

    /// Folds a patch into the stored session through the core merge and
    /// persists the result. `Ok(None)` when no base session exists.
    pub fn apply_patch(
        &self,
        preview_id: &str,
        patch: &PreviewPatch,
    ) -> Result<Option<PreviewState>, StorageError> {
        let Some(mut state) = self.get_preview(preview_id)? else {
            return Ok(None);
        };
        state.apply_patch(patch);
        Ok(Some(self.save_preview(&state)?))
    }

    pub fn delete_preview(&self, preview_id: &str) -> Result<bool, StorageError> {
        let changes = self
            .conn
            .execute("DELETE FROM local_previews WHERE preview_id = ?1", params![preview_id])?;
        Ok(changes > 0)
    }

    pub fn update_status(&self, preview_id: &str, status: &str) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "
            UPDATE local_previews
            SET publish_status = ?1, last_modified = ?2
            WHERE preview_id = ?3
            ",
            params![status, now_rfc3339(), preview_id],
        )?;
        Ok(changes > 0)
    }

    /// Promotes a draft into the published store. Idempotent: the article is
    /// keyed by slug, so re-publishing the same session re-upserts one row and
    /// yields the same slug.
    pub fn publish_preview(&self, preview_id: &str) -> Result<PublishedArticle, StorageError> {
        let state = self
            .get_preview(preview_id)?
            .ok_or_else(|| StorageError::MissingPreview(preview_id.to_string()))?;
        let published_at = now_rfc3339();
        self.conn.execute(
            "
            INSERT INTO published_articles (
                slug, preview_id, title, excerpt, content,
                model_name, organization, overall_score, tier, published_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(slug) DO UPDATE SET
                preview_id = excluded.preview_id,
                title = excluded.title,
                excerpt = excluded.excerpt,
                content = excluded.content,
                model_name = excluded.model_name,
                organization = excluded.organization,
                overall_score = excluded.overall_score,
                tier = excluded.tier,
                published_at = excluded.published_at
            ",
            params![
                state.article_data.slug,
                state.preview_id,
                state.article_data.title,
                state.article_data.excerpt,
                state.article_data.content,
                state.model_data.model_name,
                state.model_data.organization,
                state.scores_data.overall_score,
                state.scores_data.tier.as_str(),
                published_at,
            ],
        )?;
        let refs = to_json(&serde_json::json!({
            "article_slug": state.article_data.slug,
            "published_at": published_at,
        }))?;
        self.conn.execute(
            "
            UPDATE local_previews
            SET publish_status = 'published', published_refs = ?1, last_modified = ?2
            WHERE preview_id = ?3
            ",
            params![refs, now_rfc3339(), preview_id],
        )?;
        self.get_published(&state.article_data.slug)?
            .ok_or_else(|| StorageError::MissingPreview(preview_id.to_string()))
    }

    pub fn get_published(&self, slug: &str) -> Result<Option<PublishedArticle>, StorageError> {
        self.conn
            .query_row(
                "
                SELECT slug, preview_id, title, excerpt, content,
                       model_name, organization, overall_score, tier, published_at
                FROM published_articles WHERE slug = ?1
                ",
                params![slug],
                row_to_published,
            )
            .optional()?
            .transpose()
    }

    pub fn published_count(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM published_articles", [], |row| row.get(0))?)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|err| StorageError::Serialization(err.to_string()))
}

fn row_to_preview(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<PreviewState, StorageError>> {
    let preview_id: String = row.get(0)?;
    let model_data: String = row.get(1)?;
    let article_data: String = row.get(2)?;
    let linkedin_data: String = row.get(3)?;
    let scores_data: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let last_modified: String = row.get(6)?;
    let publish_status: String = row.get(7)?;
    Ok(build_preview(
        preview_id,
        &model_data,
        &article_data,
        &linkedin_data,
        &scores_data,
        created_at,
        last_modified,
        publish_status,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_preview(
    preview_id: String,
    model_data: &str,
    article_data: &str,
    linkedin_data: &str,
    scores_data: &str,
    created_at: String,
    last_modified: String,
    publish_status: String,
) -> Result<PreviewState, StorageError> {
    Ok(PreviewState {
        preview_id,
        model_data: from_json(model_data)?,
        article_data: from_json(article_data)?,
        linkedin_data: from_json(linkedin_data)?,
        scores_data: from_json(scores_data)?,
        publish_status,
        created_at,
        last_modified,
    })
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|err| StorageError::Serialization(err.to_string()))
}

fn row_to_published(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<Result<PublishedArticle, StorageError>> {
    let tier_raw: String = row.get(8)?;
    let article = PublishedArticle {
        slug: row.get(0)?,
        preview_id: row.get(1)?,
        title: row.get(2)?,
        excerpt: row.get(3)?,
        content: row.get(4)?,
        model_name: row.get(5)?,
        organization: row.get(6)?,
        overall_score: row.get(7)?,
        tier: match tier_raw.parse::<Tier>() {
            Ok(tier) => tier,
            Err(err) => return Ok(Err(StorageError::Serialization(err))),
        },
        published_at: row.get(9)?,
    };
    Ok(Ok(article))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ttm_core::{
        ArticleDraft, ArticleDraftPatch, ModelInfo, ModelScores, ModelScoresPatch, SocialPost,
    };

    fn sample_state(preview_id: &str) -> PreviewState {
        PreviewState {
            preview_id: preview_id.to_string(),
            model_data: ModelInfo {
                model_name: "org/diffusion-xl".to_string(),
                display_name: "Diffusion XL".to_string(),
                organization: Some("org".to_string()),
                license: Some("apache-2.0".to_string()),
                huggingface_url: "https://huggingface.co/org/diffusion-xl".to_string(),
                model_size: Some("6.9B".to_string()),
                tensor_types: vec!["FP16".to_string()],
                tags: vec!["diffusion".to_string()],
            },
            article_data: ArticleDraft {
                title: "Diffusion XL reviewed".to_string(),
                slug: "diffusion-xl-reviewed".to_string(),
                excerpt: "A close look.".to_string(),
                content: "<p>body</p>".to_string(),
                seo_keywords: vec!["diffusion".to_string()],
                read_time_minutes: 5,
                author: "TopTierModels AI".to_string(),
            },
            linkedin_data: SocialPost {
                content: "S tier.".to_string(),
                hashtags: vec!["AI".to_string()],
                character_count: 7,
            },
            scores_data: ModelScores {
                overall_score: 95.0,
                tier: Tier::S,
                quality_score: 96.0,
                speed_score: 92.0,
                freedom_score: 97.0,
            },
            publish_status: "draft".to_string(),
            created_at: String::new(),
            last_modified: String::new(),
        }
    }

    #[test]
    fn save_and_get_round_trip() {
        let store = StudioStore::open_in_memory().unwrap();
        let saved = store.save_preview(&sample_state("prev-1")).unwrap();
        assert!(!saved.created_at.is_empty());
        assert!(!saved.last_modified.is_empty());

        let loaded = store.get_preview("prev-1").unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.scores_data.tier, Tier::S);
        assert!(store.get_preview("absent").unwrap().is_none());
    }

    #[test]
    fn open_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("studio.db");
        {
            let store = StudioStore::open(&path).unwrap();
            store.save_preview(&sample_state("prev-1")).unwrap();
        }
        let store = StudioStore::open(&path).unwrap();
        assert_eq!(store.schema_version().unwrap(), STUDIO_SCHEMA_VERSION);
        assert!(store.get_preview("prev-1").unwrap().is_some());
    }

    #[test]
    fn resave_preserves_created_at() {
        let store = StudioStore::open_in_memory().unwrap();
        let first = store.save_preview(&sample_state("prev-1")).unwrap();
        let mut edited = first.clone();
        edited.article_data.title = "Edited".to_string();
        let second = store.save_preview(&edited).unwrap();
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.article_data.title, "Edited");
    }

    #[test]
    fn apply_patch_merges_field_wise() {
        let store = StudioStore::open_in_memory().unwrap();
        store.save_preview(&sample_state("prev-1")).unwrap();
        let patch = PreviewPatch {
            scores_data: Some(ModelScoresPatch {
                overall_score: Some(97.0),
                ..Default::default()
            }),
            article_data: Some(ArticleDraftPatch {
                excerpt: Some("Second pass.".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = store.apply_patch("prev-1", &patch).unwrap().unwrap();
        assert_eq!(merged.scores_data.overall_score, 97.0);
        assert_eq!(merged.scores_data.tier, Tier::S);
        assert_eq!(merged.article_data.excerpt, "Second pass.");
        assert_eq!(merged.article_data.title, "Diffusion XL reviewed");

        assert!(store.apply_patch("absent", &patch).unwrap().is_none());
    }

    #[test]
    fn list_and_delete() {
        let store = StudioStore::open_in_memory().unwrap();
        store.save_preview(&sample_state("prev-1")).unwrap();
        store.save_preview(&sample_state("prev-2")).unwrap();
        assert_eq!(store.list_previews().unwrap().len(), 2);
        assert!(store.delete_preview("prev-1").unwrap());
        assert!(!store.delete_preview("prev-1").unwrap());
        assert_eq!(store.list_previews().unwrap().len(), 1);
    }

    #[test]
    fn publish_promotes_and_flips_status() {
        let store = StudioStore::open_in_memory().unwrap();
        store.save_preview(&sample_state("prev-1")).unwrap();
        let article = store.publish_preview("prev-1").unwrap();
        assert_eq!(article.slug, "diffusion-xl-reviewed");
        assert_eq!(article.tier, Tier::S);
        let state = store.get_preview("prev-1").unwrap().unwrap();
        assert_eq!(state.publish_status, "published");
    }

    #[test]
    fn publish_twice_is_idempotent() {
        let store = StudioStore::open_in_memory().unwrap();
        store.save_preview(&sample_state("prev-1")).unwrap();
        let first = store.publish_preview("prev-1").unwrap();
        let second = store.publish_preview("prev-1").unwrap();
        assert_eq!(first.slug, second.slug);
        assert_eq!(store.published_count().unwrap(), 1);
    }

    #[test]
    fn publish_missing_preview_errors() {
        let store = StudioStore::open_in_memory().unwrap();
        match store.publish_preview("absent") {
            Err(StorageError::MissingPreview(id)) => assert_eq!(id, "absent"),
            other => panic!("expected MissingPreview, got {other:?}"),
        }
    }
}
