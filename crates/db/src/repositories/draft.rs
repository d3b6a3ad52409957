use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use steward_core::domain::draft::{DraftEntity, DraftId, DraftStatus};
use steward_core::domain::workflow::UserId;
use steward_core::store::{DraftRepository, StoreError};

use super::{decode_error, decode_timestamp, encode_timestamp, insert_error, RepositoryError};
use crate::DbPool;

/// Drafts are stored as a JSON payload next to the columns queries filter on.
/// The `status` and `updated_at` columns win over the payload when they differ.
pub struct SqlDraftRepository {
    pool: DbPool,
}

impl SqlDraftRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn entity_type(entity: &DraftEntity) -> &'static str {
    match entity {
        DraftEntity::Document(_) => "document",
        DraftEntity::Transfer(_) => "transfer",
    }
}

fn row_to_entity(row: &sqlx::sqlite::SqliteRow) -> Result<DraftEntity, RepositoryError> {
    let payload: String = row.try_get("payload_json").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    let status = DraftStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown draft status `{status}`")))?;
    let updated_at = decode_timestamp("updated_at", &updated_at)?;

    let mut entity: DraftEntity = serde_json::from_str(&payload).map_err(decode_error)?;
    match &mut entity {
        DraftEntity::Document(draft) => {
            draft.status = status;
            draft.updated_at = updated_at;
        }
        DraftEntity::Transfer(intent) => {
            intent.status = status;
            intent.updated_at = updated_at;
        }
    }
    Ok(entity)
}

fn created_at(entity: &DraftEntity) -> DateTime<Utc> {
    match entity {
        DraftEntity::Document(draft) => draft.created_at,
        DraftEntity::Transfer(intent) => intent.created_at,
    }
}

#[async_trait]
impl DraftRepository for SqlDraftRepository {
    async fn insert_draft(&self, entity: DraftEntity) -> Result<DraftId, StoreError> {
        let payload = serde_json::to_string(&entity).map_err(decode_error)?;

        sqlx::query(
            "INSERT INTO draft_entity (id, owner_id, entity_type, kind, status, payload_json,
                                       created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entity.id().0)
        .bind(&entity.owner().0)
        .bind(entity_type(&entity))
        .bind(entity.entity_kind())
        .bind(entity.status().as_str())
        .bind(payload)
        .bind(encode_timestamp(created_at(&entity)))
        .bind(encode_timestamp(entity.updated_at()))
        .execute(&self.pool)
        .await
        .map_err(|error| insert_error(&entity.id().0, error))?;

        Ok(entity.id().clone())
    }

    async fn update_draft(&self, entity: DraftEntity) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&entity).map_err(decode_error)?;

        let result = sqlx::query(
            "UPDATE draft_entity
             SET status = ?, payload_json = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(entity.status().as_str())
        .bind(payload)
        .bind(encode_timestamp(entity.updated_at()))
        .bind(&entity.id().0)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(entity.id().0.clone()).into());
        }
        Ok(())
    }

    async fn get_draft(&self, id: &DraftId) -> Result<Option<DraftEntity>, StoreError> {
        let row = sqlx::query(
            "SELECT payload_json, status, updated_at FROM draft_entity WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        match row {
            Some(ref row) => Ok(Some(row_to_entity(row)?)),
            None => Ok(None),
        }
    }

    async fn set_status(
        &self,
        id: &DraftId,
        status: DraftStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE draft_entity SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(encode_timestamp(now))
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id.0.clone()).into());
        }
        Ok(())
    }

    async fn latest_with_status(
        &self,
        owner: &UserId,
        status: DraftStatus,
    ) -> Result<Option<DraftEntity>, StoreError> {
        let row = sqlx::query(
            "SELECT payload_json, status, updated_at FROM draft_entity
             WHERE owner_id = ? AND status = ?
             ORDER BY updated_at DESC
             LIMIT 1",
        )
        .bind(&owner.0)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        match row {
            Some(ref row) => Ok(Some(row_to_entity(row)?)),
            None => Ok(None),
        }
    }
}
