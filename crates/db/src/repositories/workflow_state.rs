use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use steward_core::domain::draft::DraftId;
use steward_core::domain::workflow::{UserId, WorkflowData, WorkflowState, WorkflowType};
use steward_core::store::{StoreError, WorkflowStateStore};

use super::{decode_error, decode_timestamp, encode_timestamp, RepositoryError};
use crate::DbPool;

const COLUMNS: &str =
    "user_id, workflow_type, draft_id, data_json, created_at, updated_at, expires_at";

/// One row per (user, workflow type); the serialized payload carries the step data.
pub struct SqlWorkflowStateStore {
    pool: DbPool,
}

impl SqlWorkflowStateStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_state(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowState, RepositoryError> {
    let user_id: String = row.try_get("user_id").map_err(decode_error)?;
    let workflow_type: String = row.try_get("workflow_type").map_err(decode_error)?;
    let draft_id: String = row.try_get("draft_id").map_err(decode_error)?;
    let data_json: String = row.try_get("data_json").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;
    let expires_at: String = row.try_get("expires_at").map_err(decode_error)?;

    let data: WorkflowData = serde_json::from_str(&data_json).map_err(decode_error)?;
    let state = WorkflowState {
        user_id: UserId(user_id),
        draft_id: DraftId(draft_id),
        data,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
        expires_at: decode_timestamp("expires_at", &expires_at)?,
    };

    if state.workflow_type().as_str() != workflow_type {
        return Err(RepositoryError::Decode(format!(
            "workflow_type column `{workflow_type}` does not match payload `{}`",
            state.workflow_type().as_str()
        )));
    }
    Ok(state)
}

#[async_trait]
impl WorkflowStateStore for SqlWorkflowStateStore {
    async fn get(
        &self,
        user_id: &UserId,
        workflow: WorkflowType,
    ) -> Result<Option<WorkflowState>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM workflow_state WHERE user_id = ? AND workflow_type = ?"
        ))
        .bind(&user_id.0)
        .bind(workflow.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        match row {
            Some(ref row) => Ok(Some(row_to_state(row)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, state: WorkflowState) -> Result<(), StoreError> {
        let data_json = serde_json::to_string(&state.data).map_err(decode_error)?;

        sqlx::query(
            "INSERT INTO workflow_state (user_id, workflow_type, draft_id, current_step, data_json,
                                         created_at, updated_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id, workflow_type) DO UPDATE SET
                 draft_id = excluded.draft_id,
                 current_step = excluded.current_step,
                 data_json = excluded.data_json,
                 updated_at = excluded.updated_at,
                 expires_at = excluded.expires_at",
        )
        .bind(&state.user_id.0)
        .bind(state.workflow_type().as_str())
        .bind(&state.draft_id.0)
        .bind(state.current_step_key())
        .bind(data_json)
        .bind(encode_timestamp(state.created_at))
        .bind(encode_timestamp(state.updated_at))
        .bind(encode_timestamp(state.expires_at))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn delete(&self, user_id: &UserId, workflow: WorkflowType) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM workflow_state WHERE user_id = ? AND workflow_type = ?")
                .bind(&user_id.0)
                .bind(workflow.as_str())
                .execute(&self.pool)
                .await
                .map_err(RepositoryError::from)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<WorkflowState>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM workflow_state WHERE user_id = ? ORDER BY updated_at DESC"
        ))
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.iter().map(|row| row_to_state(row).map_err(StoreError::from)).collect()
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowState>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM workflow_state WHERE expires_at <= ? ORDER BY expires_at"
        ))
        .bind(encode_timestamp(now))
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.iter().map(|row| row_to_state(row).map_err(StoreError::from)).collect()
    }
}
