//! Cross-session "stable profile" fast path (§3/§4.5/§9). A returning
//! user's confirmed contact+education+work core can be applied verbatim to
//! a fresh session instead of re-walking the whole intake flow. `store` on
//! [`crate::models::StableProfileRef`] is treated as an opaque string per
//! the Open Question resolution in DESIGN.md — this crate only round-trips
//! it, never interprets its internal encoding. Grounded on the session
//! store's own Postgres access style (`store.rs`).

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::CvData;

#[async_trait]
pub trait StableProfileStore: Send + Sync {
    /// Saves `cv` under `owner_key` (an opaque client-supplied identity,
    /// e.g. a hashed email) for the given `language`.
    async fn save(&self, owner_key: &str, language: &str, cv: &CvData) -> anyhow::Result<String>;
    async fn load(&self, store_ref: &str) -> anyhow::Result<Option<(CvData, String)>>;
}

pub struct PgStableProfileStore {
    pool: PgPool,
}

impl PgStableProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StableProfileStore for PgStableProfileStore {
    async fn save(&self, owner_key: &str, language: &str, cv: &CvData) -> anyhow::Result<String> {
        let id = Uuid::new_v4();
        let cv_json = serde_json::to_value(cv)?;
        sqlx::query(
            r#"
            INSERT INTO stable_profiles (id, owner_key, language, cv_data, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (owner_key) DO UPDATE
            SET language = EXCLUDED.language, cv_data = EXCLUDED.cv_data, updated_at = now()
            "#,
        )
        .bind(id)
        .bind(owner_key)
        .bind(language)
        .bind(&cv_json)
        .execute(&self.pool)
        .await?;
        Ok(id.to_string())
    }

    async fn load(&self, store_ref: &str) -> anyhow::Result<Option<(CvData, String)>> {
        let Ok(owner_key_or_id) = store_ref.parse::<Uuid>() else {
            return Ok(None);
        };
        let row: Option<(serde_json::Value, String)> =
            sqlx::query_as("SELECT cv_data, language FROM stable_profiles WHERE id = $1")
                .bind(owner_key_or_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some((cv_json, language)) = row else {
            return Ok(None);
        };
        Ok(Some((serde_json::from_value(cv_json)?, language)))
    }
}
