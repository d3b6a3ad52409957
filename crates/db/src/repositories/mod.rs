use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use steward_core::store::StoreError;

pub mod completion;
pub mod draft;
pub mod wallet;
pub mod workflow_state;

pub use completion::SqlCompletionLedger;
pub use draft::SqlDraftRepository;
pub use wallet::{CustodyWallet, SqlWalletDirectory};
pub use workflow_state::SqlWorkflowStateStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate key: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Database(error) => StoreError::Backend(error.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
            RepositoryError::NotFound(key) => StoreError::NotFound(key),
            RepositoryError::Conflict(key) => StoreError::Conflict(key),
        }
    }
}

/// Fixed-width UTC timestamps so that text comparison in SQL matches time order.
pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column} `{value}`: {error}")))
}

/// Maps a unique-constraint violation on `key` to a conflict.
pub(crate) fn insert_error(key: &str, error: sqlx::Error) -> RepositoryError {
    match &error {
        sqlx::Error::Database(database) if database.is_unique_violation() => {
            RepositoryError::Conflict(key.to_owned())
        }
        _ => RepositoryError::Database(error),
    }
}

pub(crate) fn decode_error(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}
