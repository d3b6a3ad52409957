use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::draft::{DraftId, DraftStatus};
use crate::domain::workflow::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Transfer,
    Swap,
    Bridge,
    Purchase,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::Swap => "swap",
            Self::Bridge => "bridge",
            Self::Purchase => "purchase",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "transfer" => Some(Self::Transfer),
            "swap" => Some(Self::Swap),
            "bridge" => Some(Self::Bridge),
            "purchase" => Some(Self::Purchase),
            _ => None,
        }
    }

    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Transfer => "TRF",
            Self::Swap => "SWP",
            Self::Bridge => "BRG",
            Self::Purchase => "BUY",
        }
    }

    /// Parameters that must be known before a quote can be requested.
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            Self::Transfer => &["amount", "token", "destination"],
            Self::Swap => &["amount", "token", "target_token"],
            Self::Bridge => &["amount", "token", "chain"],
            Self::Purchase => &["amount", "token"],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    Collecting,
    Quoted,
    Confirmed,
    Executed,
    Failed,
    Cancelled,
}

impl TransferPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collecting => "collecting",
            Self::Quoted => "quoted",
            Self::Confirmed => "confirmed",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "collecting" => Some(Self::Collecting),
            "quoted" => Some(Self::Quoted),
            "confirmed" => Some(Self::Confirmed),
            "executed" => Some(Self::Executed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Partially known transfer parameters, merged message by message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferParamsDraft {
    pub amount: Option<Decimal>,
    pub token: Option<String>,
    pub destination: Option<String>,
    pub target_token: Option<String>,
    pub chain: Option<String>,
    pub fiat_currency: Option<String>,
}

impl TransferParamsDraft {
    /// Later values win; absent values never erase known ones.
    pub fn merge(&mut self, update: TransferParamsDraft) {
        if update.amount.is_some() {
            self.amount = update.amount;
        }
        if update.token.is_some() {
            self.token = update.token;
        }
        if update.destination.is_some() {
            self.destination = update.destination;
        }
        if update.target_token.is_some() {
            self.target_token = update.target_token;
        }
        if update.chain.is_some() {
            self.chain = update.chain;
        }
        if update.fiat_currency.is_some() {
            self.fiat_currency = update.fiat_currency;
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn missing(&self, kind: TransferKind) -> Vec<&'static str> {
        kind.required_params()
            .iter()
            .copied()
            .filter(|param| match *param {
                "amount" => self.amount.is_none(),
                "token" => self.token.is_none(),
                "destination" => self.destination.is_none(),
                "target_token" => self.target_token.is_none(),
                "chain" => self.chain.is_none(),
                _ => false,
            })
            .collect()
    }

    pub fn complete(&self, kind: TransferKind, default_fiat: &str) -> Option<TransferParams> {
        if !self.missing(kind).is_empty() {
            return None;
        }

        Some(TransferParams {
            kind,
            amount: self.amount?,
            token: self.token.clone()?,
            destination: self.destination.clone(),
            target_token: self.target_token.clone(),
            chain: self.chain.clone(),
            fiat_currency: match kind {
                TransferKind::Purchase => {
                    Some(self.fiat_currency.clone().unwrap_or_else(|| default_fiat.to_owned()))
                }
                _ => self.fiat_currency.clone(),
            },
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferParams {
    pub kind: TransferKind,
    pub amount: Decimal,
    pub token: String,
    pub destination: Option<String>,
    pub target_token: Option<String>,
    pub chain: Option<String>,
    pub fiat_currency: Option<String>,
}

impl TransferParams {
    pub fn summary(&self) -> String {
        let amount = self.amount.normalize();
        match self.kind {
            TransferKind::Transfer => format!(
                "send {amount} {} to {}",
                self.token,
                self.destination.as_deref().unwrap_or("?")
            ),
            TransferKind::Swap => format!(
                "swap {amount} {} for {}",
                self.token,
                self.target_token.as_deref().unwrap_or("?")
            ),
            TransferKind::Bridge => format!(
                "bridge {amount} {} to {}",
                self.token,
                self.chain.as_deref().unwrap_or("?")
            ),
            TransferKind::Purchase => format!(
                "buy {amount} {} with {}",
                self.token,
                self.fiat_currency.as_deref().unwrap_or("?")
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteEstimate {
    pub rate: Decimal,
    pub fee: Decimal,
    pub fee_token: String,
    pub receive_amount: Decimal,
    pub receive_token: String,
    pub expires_at: DateTime<Utc>,
}

impl QuoteEstimate {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Submitted,
    Completed,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub reference: String,
    pub status: ExecutionStatus,
    pub detail: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferIntent {
    pub id: DraftId,
    pub owner: UserId,
    pub kind: TransferKind,
    pub params: TransferParamsDraft,
    pub quote: Option<QuoteEstimate>,
    pub receipt: Option<ExecutionReceipt>,
    pub failure_reason: Option<String>,
    pub status: DraftStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferIntent {
    pub fn new(owner: UserId, kind: TransferKind, now: DateTime<Utc>) -> Self {
        Self {
            id: DraftId::generate(kind.id_prefix(), now),
            owner,
            kind,
            params: TransferParamsDraft::default(),
            quote: None,
            receipt: None,
            failure_reason: None,
            status: DraftStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_transition_to(&self, next: DraftStatus) -> bool {
        matches!(
            (self.status, next),
            (DraftStatus::Draft, DraftStatus::Quoted)
                | (DraftStatus::Quoted, DraftStatus::Quoted)
                | (DraftStatus::Quoted, DraftStatus::Confirmed)
                | (DraftStatus::Confirmed, DraftStatus::Quoted)
                | (DraftStatus::Confirmed, DraftStatus::Executed)
                | (DraftStatus::Confirmed, DraftStatus::Failed)
                | (DraftStatus::Draft, DraftStatus::Cancelled)
                | (DraftStatus::Quoted, DraftStatus::Cancelled)
                | (DraftStatus::Confirmed, DraftStatus::Cancelled)
        )
    }
}
