use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use steward_core::collaborators::{CollaboratorError, ResourceCheck};
use steward_core::domain::workflow::UserId;

use super::{decode_error, decode_timestamp, encode_timestamp, RepositoryError};
use crate::DbPool;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustodyWallet {
    pub user_id: UserId,
    pub address: String,
    pub network: String,
    pub created_at: DateTime<Utc>,
}

/// Custody wallets known to this deployment. A user needs one before any
/// workflow that can move funds or bill on their behalf may start.
pub struct SqlWalletDirectory {
    pool: DbPool,
}

impl SqlWalletDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn register(&self, wallet: &CustodyWallet) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO custody_wallet (user_id, address, network, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                 address = excluded.address,
                 network = excluded.network",
        )
        .bind(&wallet.user_id.0)
        .bind(&wallet.address)
        .bind(&wallet.network)
        .bind(encode_timestamp(wallet.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find(&self, user_id: &UserId) -> Result<Option<CustodyWallet>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id, address, network, created_at FROM custody_wallet WHERE user_id = ?",
        )
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let created_at: String = row.try_get("created_at").map_err(decode_error)?;
        Ok(Some(CustodyWallet {
            user_id: UserId(row.try_get("user_id").map_err(decode_error)?),
            address: row.try_get("address").map_err(decode_error)?,
            network: row.try_get("network").map_err(decode_error)?,
            created_at: decode_timestamp("created_at", &created_at)?,
        }))
    }

    pub async fn remove(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM custody_wallet WHERE user_id = ?")
            .bind(&user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ResourceCheck for SqlWalletDirectory {
    async fn has_required_resource(&self, user_id: &UserId) -> Result<bool, CollaboratorError> {
        self.find(user_id)
            .await
            .map(|wallet| wallet.is_some())
            .map_err(|error| CollaboratorError::Unavailable(error.to_string()))
    }
}
