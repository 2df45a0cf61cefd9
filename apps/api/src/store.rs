//! Session Store (C1): CRUD + optimistic versioning over the single
//! mutable aggregate (`Session`), with blob offloading for oversized
//! metadata. Grounded on the teacher's `context/versioning.rs` Postgres
//! access style, generalized from append-only INSERT to compare-and-swap
//! UPDATE since a wizard session is mutated in place, not versioned history.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::blob::{BlobStore, CONTAINER_SESSIONS};
use crate::models::{CvData, Metadata, Session};

/// Row-size budget before metadata sub-objects are offloaded to blob
/// storage (§4.1). 64 KiB matches the spec's stated row-size limit.
pub const OFFLOAD_THRESHOLD_BYTES: usize = 64 * 1024;

/// Session TTL applied at creation (§3 Lifecycle: "expires after a TTL").
pub const SESSION_TTL_DAYS: i64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session not found")]
    NotFound,

    /// Optimistic-concurrency compare-and-swap mismatch (§4.1). Retryable:
    /// the caller must reload and re-apply, never blind-retry LLM calls.
    #[error("version conflict: expected {expected}, found {found}")]
    Conflict { expected: i64, found: i64 },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, cv: CvData, meta: Metadata) -> Result<Session, StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<Session>, StoreError>;
    /// Compare-and-swap on `version`; fails with `Conflict` on mismatch.
    async fn update(&self, id: Uuid, expected_version: i64, cv: CvData, meta: Metadata) -> Result<Session, StoreError>;
    async fn append_event(&self, id: Uuid, kind: &str, detail: Value) -> Result<Session, StoreError>;
    /// Deletes expired rows; idempotent; returns count deleted.
    async fn cleanup_expired(&self) -> Result<u64, StoreError>;
    /// Finds sessions whose contact name matches `query` (case-insensitive
    /// substring), most recently updated first, for the `cv_session_search`
    /// tool (§4.6). Bounded to `limit` hits.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SessionSearchHit>, StoreError>;
}

/// A `cv_session_search` result row: just enough to let a caller pick the
/// right session without fetching every full aggregate.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSearchHit {
    pub id: Uuid,
    pub full_name: String,
    pub wizard_stage: crate::models::WizardStage,
    pub updated_at: chrono::DateTime<Utc>,
}

/// Offloadable sub-objects, replaced in the stored row by a blob pointer
/// when the serialized metadata exceeds [`OFFLOAD_THRESHOLD_BYTES`] (§4.1).
/// `get` transparently merges them back.
struct OffloadedParts {
    docx_prefill_unconfirmed: Option<Value>,
    event_log: VecDeque<crate::models::EventLogEntry>,
    work_experience_proposal_block: Option<Value>,
    skills_proposal_block: Option<Value>,
    cover_letter_block: Option<Value>,
}

pub struct PgSessionStore {
    pool: PgPool,
    blobs: Arc<dyn BlobStore>,
}

impl PgSessionStore {
    pub fn new(pool: PgPool, blobs: Arc<dyn BlobStore>) -> Self {
        Self { pool, blobs }
    }

    fn take_offloadable(meta: &mut Metadata) -> OffloadedParts {
        OffloadedParts {
            docx_prefill_unconfirmed: meta.docx_prefill_unconfirmed.take(),
            event_log: std::mem::take(&mut meta.event_log),
            work_experience_proposal_block: meta.work_experience_proposal_block.take(),
            skills_proposal_block: meta.skills_proposal_block.take(),
            cover_letter_block: meta.cover_letter_block.take(),
        }
    }

    fn restore_offloadable(meta: &mut Metadata, parts: OffloadedParts) {
        meta.docx_prefill_unconfirmed = parts.docx_prefill_unconfirmed;
        meta.event_log = parts.event_log;
        meta.work_experience_proposal_block = parts.work_experience_proposal_block;
        meta.skills_proposal_block = parts.skills_proposal_block;
        meta.cover_letter_block = parts.cover_letter_block;
    }

    /// Serializes `meta`; if it exceeds the row-size budget, offloads the
    /// bulky sub-objects to content-addressed blob storage and stores a
    /// manifest `{blob_ptr: BlobPointer}` in their place (§4.1).
    async fn prepare_metadata_for_storage(&self, meta: &Metadata) -> Result<Value, StoreError> {
        let full = serde_json::to_value(meta).map_err(|e| StoreError::Other(e.into()))?;
        let full_bytes = serde_json::to_vec(&full).map_err(|e| StoreError::Other(e.into()))?;
        if full_bytes.len() <= OFFLOAD_THRESHOLD_BYTES {
            return Ok(full);
        }

        let mut slim = meta.clone();
        let offloaded = Self::take_offloadable(&mut slim);
        let offloaded_value = serde_json::json!({
            "docx_prefill_unconfirmed": offloaded.docx_prefill_unconfirmed,
            "event_log": offloaded.event_log,
            "work_experience_proposal_block": offloaded.work_experience_proposal_block,
            "skills_proposal_block": offloaded.skills_proposal_block,
            "cover_letter_block": offloaded.cover_letter_block,
        });
        let bytes = serde_json::to_vec(&offloaded_value).map_err(|e| StoreError::Other(e.into()))?;
        let pointer = self
            .blobs
            .put_content_addressed(CONTAINER_SESSIONS, &bytes)
            .await
            .map_err(StoreError::Other)?;

        info!(
            blob_name = %pointer.blob_name,
            "offloaded oversized session metadata to blob storage"
        );

        let mut stored = serde_json::to_value(&slim).map_err(|e| StoreError::Other(e.into()))?;
        stored["_offload_ptr"] = serde_json::to_value(&pointer).map_err(|e| StoreError::Other(e.into()))?;
        Ok(stored)
    }

    /// Reverses [`prepare_metadata_for_storage`]: merges offloaded parts
    /// back in if a pointer is present. Tolerates a missing/unreadable blob
    /// (§3 invariant 5: stale refs are tolerated on read) by leaving the
    /// offloaded fields empty rather than failing the whole `get`.
    async fn rehydrate_metadata(&self, mut stored: Value) -> Result<Metadata, StoreError> {
        let ptr = stored.get("_offload_ptr").cloned();
        if let Some(map) = stored.as_object_mut() {
            map.remove("_offload_ptr");
        }
        let mut meta: Metadata = serde_json::from_value(stored).map_err(|e| StoreError::Other(e.into()))?;

        if let Some(ptr) = ptr {
            let pointer: crate::models::BlobPointer =
                serde_json::from_value(ptr).map_err(|e| StoreError::Other(e.into()))?;
            match self.blobs.get(&pointer.container, &pointer.blob_name).await {
                Ok(Some(bytes)) => {
                    if let Ok(parts) = serde_json::from_slice::<Value>(&bytes) {
                        meta.docx_prefill_unconfirmed = parts.get("docx_prefill_unconfirmed").cloned().flatten_null();
                        meta.work_experience_proposal_block =
                            parts.get("work_experience_proposal_block").cloned().flatten_null();
                        meta.skills_proposal_block = parts.get("skills_proposal_block").cloned().flatten_null();
                        meta.cover_letter_block = parts.get("cover_letter_block").cloned().flatten_null();
                        if let Some(log) = parts.get("event_log") {
                            if let Ok(log) = serde_json::from_value(log.clone()) {
                                meta.event_log = log;
                            }
                        }
                    }
                }
                Ok(None) => {
                    tracing::warn!(blob_name = %pointer.blob_name, "offloaded session blob missing, tolerating stale ref");
                }
                Err(e) => {
                    tracing::warn!(blob_name = %pointer.blob_name, error = %e, "failed to read offloaded session blob");
                }
            }
        }

        Ok(meta)
    }
}

/// Small helper so `Option<Value>` where `Value::Null` means "absent"
/// collapses to `None`, matching `docx_prefill_unconfirmed: Option<Value>`.
trait FlattenNull {
    fn flatten_null(self) -> Option<Value>;
}
impl FlattenNull for Option<Value> {
    fn flatten_null(self) -> Option<Value> {
        self.filter(|v| !v.is_null())
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, cv: CvData, meta: Metadata) -> Result<Session, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let expires_at = now + Duration::days(SESSION_TTL_DAYS);
        let cv_json = serde_json::to_value(&cv).map_err(|e| StoreError::Other(e.into()))?;
        let meta_json = self.prepare_metadata_for_storage(&meta).await?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, version, created_at, updated_at, expires_at, cv_data, metadata)
            VALUES ($1, 1, $2, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(expires_at)
        .bind(&cv_json)
        .bind(&meta_json)
        .execute(&self.pool)
        .await?;

        info!(session_id = %id, "created session");

        Ok(Session {
            id,
            version: 1,
            created_at: now,
            updated_at: now,
            expires_at,
            cv_data: cv,
            metadata: meta,
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let row: Option<(i64, chrono::DateTime<Utc>, chrono::DateTime<Utc>, chrono::DateTime<Utc>, Value, Value)> =
            sqlx::query_as(
                "SELECT version, created_at, updated_at, expires_at, cv_data, metadata FROM sessions WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some((version, created_at, updated_at, expires_at, cv_json, meta_json)) = row else {
            return Ok(None);
        };

        let cv_data: CvData = serde_json::from_value(cv_json).map_err(|e| StoreError::Other(e.into()))?;
        let metadata = self.rehydrate_metadata(meta_json).await?;

        Ok(Some(Session {
            id,
            version,
            created_at,
            updated_at,
            expires_at,
            cv_data,
            metadata,
        }))
    }

    async fn update(&self, id: Uuid, expected_version: i64, cv: CvData, meta: Metadata) -> Result<Session, StoreError> {
        let now = Utc::now();
        let cv_json = serde_json::to_value(&cv).map_err(|e| StoreError::Other(e.into()))?;
        let meta_json = self.prepare_metadata_for_storage(&meta).await?;

        let row: Option<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)> = sqlx::query_as(
            r#"
            UPDATE sessions
            SET version = version + 1, updated_at = $1, cv_data = $2, metadata = $3
            WHERE id = $4 AND version = $5
            RETURNING created_at, expires_at
            "#,
        )
        .bind(now)
        .bind(&cv_json)
        .bind(&meta_json)
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        let Some((created_at, expires_at)) = row else {
            // Either the row doesn't exist, or (far more likely) another
            // writer already bumped the version out from under us.
            return match self.get(id).await? {
                None => Err(StoreError::NotFound),
                Some(current) => Err(StoreError::Conflict {
                    expected: expected_version,
                    found: current.version,
                }),
            };
        };

        Ok(Session {
            id,
            version: expected_version + 1,
            created_at,
            updated_at: now,
            expires_at,
            cv_data: cv,
            metadata: meta,
        })
    }

    async fn append_event(&self, id: Uuid, kind: &str, detail: Value) -> Result<Session, StoreError> {
        let mut session = self.get(id).await?.ok_or(StoreError::NotFound)?;
        session.metadata.append_event(kind, detail);
        self.update(id, session.version, session.cv_data, session.metadata).await
    }

    async fn cleanup_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < now()")
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, "cleaned up expired sessions");
        }
        Ok(deleted)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SessionSearchHit>, StoreError> {
        let rows: Vec<(Uuid, Value, Value, chrono::DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT id, cv_data, metadata, updated_at
            FROM sessions
            WHERE cv_data ->> 'full_name' ILIKE $1
            ORDER BY updated_at DESC
            LIMIT $2
            "#,
        )
        .bind(format!("%{query}%"))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for (id, cv_json, meta_json, updated_at) in rows {
            let full_name = cv_json.get("full_name").and_then(Value::as_str).unwrap_or_default().to_string();
            let wizard_stage = meta_json
                .get("wizard_stage")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            hits.push(SessionSearchHit { id, full_name, wizard_stage, updated_at });
        }
        Ok(hits)
    }
}

#[cfg(test)]
pub mod fake {
    //! In-memory fake behind the same trait, the natural seam the teacher's
    //! `Arc<dyn FitScorer>` pattern already licenses (SPEC_FULL.md §10 Test
    //! tooling). Used for the end-to-end wizard scenario tests so they don't
    //! require a live Postgres instance.

    use super::*;
    use tokio::sync::Mutex;

    pub struct InMemorySessionStore {
        sessions: Mutex<std::collections::HashMap<Uuid, Session>>,
    }

    impl Default for InMemorySessionStore {
        fn default() -> Self {
            Self {
                sessions: Mutex::new(std::collections::HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl SessionStore for InMemorySessionStore {
        async fn create(&self, cv: CvData, meta: Metadata) -> Result<Session, StoreError> {
            let id = Uuid::new_v4();
            let now = Utc::now();
            let session = Session {
                id,
                version: 1,
                created_at: now,
                updated_at: now,
                expires_at: now + Duration::days(SESSION_TTL_DAYS),
                cv_data: cv,
                metadata: meta,
            };
            self.sessions.lock().await.insert(id, session.clone());
            Ok(session)
        }

        async fn get(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
            Ok(self.sessions.lock().await.get(&id).cloned())
        }

        async fn update(&self, id: Uuid, expected_version: i64, cv: CvData, meta: Metadata) -> Result<Session, StoreError> {
            let mut sessions = self.sessions.lock().await;
            let existing = sessions.get(&id).ok_or(StoreError::NotFound)?;
            if existing.version != expected_version {
                return Err(StoreError::Conflict {
                    expected: expected_version,
                    found: existing.version,
                });
            }
            let updated = Session {
                id,
                version: existing.version + 1,
                created_at: existing.created_at,
                updated_at: Utc::now(),
                expires_at: existing.expires_at,
                cv_data: cv,
                metadata: meta,
            };
            sessions.insert(id, updated.clone());
            Ok(updated)
        }

        async fn append_event(&self, id: Uuid, kind: &str, detail: Value) -> Result<Session, StoreError> {
            let mut session = self.get(id).await?.ok_or(StoreError::NotFound)?;
            session.metadata.append_event(kind, detail);
            self.update(id, session.version, session.cv_data, session.metadata).await
        }

        async fn cleanup_expired(&self) -> Result<u64, StoreError> {
            let mut sessions = self.sessions.lock().await;
            let now = Utc::now();
            let before = sessions.len();
            sessions.retain(|_, s| s.expires_at >= now);
            Ok((before - sessions.len()) as u64)
        }

        async fn search(&self, query: &str, limit: usize) -> Result<Vec<SessionSearchHit>, StoreError> {
            let sessions = self.sessions.lock().await;
            let needle = query.to_lowercase();
            let mut hits: Vec<SessionSearchHit> = sessions
                .values()
                .filter(|s| s.cv_data.full_name.to_lowercase().contains(&needle))
                .map(|s| SessionSearchHit {
                    id: s.id,
                    full_name: s.cv_data.full_name.clone(),
                    wizard_stage: s.metadata.wizard_stage,
                    updated_at: s.updated_at,
                })
                .collect();
            hits.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            hits.truncate(limit);
            Ok(hits)
        }
    }

    #[tokio::test]
    async fn version_monotonicity_across_updates() {
        let store = InMemorySessionStore::default();
        let session = store.create(CvData::default(), Metadata::default()).await.unwrap();
        assert_eq!(session.version, 1);

        let updated = store
            .update(session.id, session.version, session.cv_data.clone(), session.metadata.clone())
            .await
            .unwrap();
        assert_eq!(updated.version, 2);

        let updated2 = store
            .update(updated.id, updated.version, updated.cv_data.clone(), updated.metadata.clone())
            .await
            .unwrap();
        assert_eq!(updated2.version, 3);
    }

    #[tokio::test]
    async fn concurrent_update_with_stale_version_conflicts() {
        let store = InMemorySessionStore::default();
        let session = store.create(CvData::default(), Metadata::default()).await.unwrap();

        // Writer A updates successfully.
        let a = store
            .update(session.id, session.version, session.cv_data.clone(), session.metadata.clone())
            .await
            .unwrap();
        assert_eq!(a.version, 2);

        // Writer B still holds the stale version 1 and must get Conflict.
        let b_result = store.update(session.id, session.version, session.cv_data, session.metadata).await;
        assert!(matches!(b_result, Err(StoreError::Conflict { expected: 1, found: 2 })));
    }

    #[tokio::test]
    async fn cleanup_expired_is_idempotent() {
        let store = InMemorySessionStore::default();
        let session = store.create(CvData::default(), Metadata::default()).await.unwrap();
        {
            let mut sessions = store.sessions.lock().await;
            let s = sessions.get_mut(&session.id).unwrap();
            s.expires_at = Utc::now() - Duration::days(1);
        }
        let deleted_first = store.cleanup_expired().await.unwrap();
        assert_eq!(deleted_first, 1);
        let deleted_second = store.cleanup_expired().await.unwrap();
        assert_eq!(deleted_second, 0);
    }
}
