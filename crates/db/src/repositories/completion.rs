use async_trait::async_trait;
use sqlx::Row;

use steward_core::domain::completion::{
    CompletionOperation, CompletionRecord, CompletionRecordState, OperationKey,
};
use steward_core::domain::draft::DraftId;
use steward_core::store::{CompletionLedger, StoreError};

use super::{decode_error, decode_timestamp, encode_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlCompletionLedger {
    pool: DbPool,
}

impl SqlCompletionLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Every record for a draft, oldest first.
    pub async fn list_for_draft(
        &self,
        draft_id: &DraftId,
    ) -> Result<Vec<CompletionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT operation_key, draft_id, operation, state, attempt_count, result_reference,
                    last_error, correlation_id, first_seen_at, last_seen_at
             FROM completion_ledger WHERE draft_id = ? ORDER BY first_seen_at",
        )
        .bind(&draft_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<CompletionRecord, RepositoryError> {
    let operation_key: String = row.try_get("operation_key").map_err(decode_error)?;
    let draft_id: String = row.try_get("draft_id").map_err(decode_error)?;
    let operation: String = row.try_get("operation").map_err(decode_error)?;
    let state: String = row.try_get("state").map_err(decode_error)?;
    let attempt_count: i64 = row.try_get("attempt_count").map_err(decode_error)?;
    let result_reference: Option<String> = row.try_get("result_reference").map_err(decode_error)?;
    let last_error: Option<String> = row.try_get("last_error").map_err(decode_error)?;
    let correlation_id: String = row.try_get("correlation_id").map_err(decode_error)?;
    let first_seen_at: String = row.try_get("first_seen_at").map_err(decode_error)?;
    let last_seen_at: String = row.try_get("last_seen_at").map_err(decode_error)?;

    Ok(CompletionRecord {
        operation_key: OperationKey(operation_key),
        draft_id: DraftId(draft_id),
        operation: CompletionOperation::parse(&operation)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown operation `{operation}`")))?,
        state: CompletionRecordState::parse(&state)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown ledger state `{state}`")))?,
        attempt_count: u32::try_from(attempt_count).map_err(decode_error)?,
        result_reference,
        last_error,
        correlation_id,
        first_seen_at: decode_timestamp("first_seen_at", &first_seen_at)?,
        last_seen_at: decode_timestamp("last_seen_at", &last_seen_at)?,
    })
}

#[async_trait]
impl CompletionLedger for SqlCompletionLedger {
    async fn find(&self, key: &OperationKey) -> Result<Option<CompletionRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT operation_key, draft_id, operation, state, attempt_count, result_reference,
                    last_error, correlation_id, first_seen_at, last_seen_at
             FROM completion_ledger WHERE operation_key = ?",
        )
        .bind(&key.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        match row {
            Some(ref row) => Ok(Some(row_to_record(row)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, record: CompletionRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO completion_ledger (operation_key, draft_id, operation, state, attempt_count,
                                            result_reference, last_error, correlation_id,
                                            first_seen_at, last_seen_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(operation_key) DO UPDATE SET
                 state = excluded.state,
                 attempt_count = excluded.attempt_count,
                 result_reference = excluded.result_reference,
                 last_error = excluded.last_error,
                 correlation_id = excluded.correlation_id,
                 last_seen_at = excluded.last_seen_at",
        )
        .bind(&record.operation_key.0)
        .bind(&record.draft_id.0)
        .bind(record.operation.as_str())
        .bind(record.state.as_str())
        .bind(i64::from(record.attempt_count))
        .bind(&record.result_reference)
        .bind(&record.last_error)
        .bind(&record.correlation_id)
        .bind(encode_timestamp(record.first_seen_at))
        .bind(encode_timestamp(record.last_seen_at))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }
}
