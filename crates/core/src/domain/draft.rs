use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::transfer::TransferIntent;
use crate::domain::workflow::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DraftId(pub String);

impl DraftId {
    /// Human-readable identifier such as `INV-2026-004821`.
    pub fn generate(prefix: &str, now: DateTime<Utc>) -> Self {
        let serial = rand::thread_rng().gen_range(0..1_000_000u32);
        Self(format!("{prefix}-{}-{serial:06}", now.year()))
    }

    /// Recognizes a draft identifier token inside free text (`send INV-2026-004821`).
    pub fn from_token(token: &str) -> Option<Self> {
        let candidate = token.trim_matches(|ch: char| !ch.is_ascii_alphanumeric() && ch != '-');
        let mut parts = candidate.split('-');
        let prefix = parts.next()?;
        let year = parts.next()?;
        let serial = parts.next()?;
        if parts.next().is_some() {
            return None;
        }

        let known_prefix = matches!(
            prefix.to_ascii_uppercase().as_str(),
            "INV" | "PRP" | "TRF" | "SWP" | "BRG" | "BUY"
        );
        let numeric = |value: &str| !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit());
        if known_prefix && year.len() == 4 && numeric(year) && numeric(serial) {
            return Some(Self(candidate.to_ascii_uppercase()));
        }

        None
    }
}

impl fmt::Display for DraftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    Proposal,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Proposal => "proposal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "invoice" => Some(Self::Invoice),
            "proposal" => Some(Self::Proposal),
            _ => None,
        }
    }

    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Invoice => "INV",
            Self::Proposal => "PRP",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Draft,
    PendingDelivery,
    Sent,
    Quoted,
    Confirmed,
    Executed,
    Failed,
    Cancelled,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingDelivery => "pending_delivery",
            Self::Sent => "sent",
            Self::Quoted => "quoted",
            Self::Confirmed => "confirmed",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "pending_delivery" => Some(Self::PendingDelivery),
            "sent" => Some(Self::Sent),
            "quoted" => Some(Self::Quoted),
            "confirmed" => Some(Self::Confirmed),
            "executed" => Some(Self::Executed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Executed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount.round_dp(2).normalize(), self.currency)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub amount: Option<Decimal>,
}

/// Fields collected by the document workflow, in step order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFields {
    pub issuer_name: Option<String>,
    pub issuer_email: Option<String>,
    pub client_name: Option<String>,
    pub client_email: Option<String>,
    pub description: Option<String>,
    pub line_items: Option<Vec<LineItem>>,
    pub amount: Option<Money>,
    pub due_date: Option<NaiveDate>,
}

impl DocumentFields {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.issuer_name.is_none() {
            missing.push("issuer_name");
        }
        if self.issuer_email.is_none() {
            missing.push("issuer_email");
        }
        if self.client_name.is_none() {
            missing.push("client_name");
        }
        if self.client_email.is_none() {
            missing.push("client_email");
        }
        if self.description.is_none() {
            missing.push("description");
        }
        if self.line_items.is_none() {
            missing.push("line_items");
        }
        if self.amount.is_none() {
            missing.push("amount");
        }
        if self.due_date.is_none() {
            missing.push("due_date");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDraft {
    pub id: DraftId,
    pub owner: UserId,
    pub kind: DocumentKind,
    pub fields: DocumentFields,
    pub status: DraftStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentDraft {
    pub fn new(owner: UserId, kind: DocumentKind, now: DateTime<Utc>) -> Self {
        Self {
            id: DraftId::generate(kind.id_prefix(), now),
            owner,
            kind,
            fields: DocumentFields::default(),
            status: DraftStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_transition_to(&self, next: DraftStatus) -> bool {
        matches!(
            (self.status, next),
            (DraftStatus::Draft, DraftStatus::PendingDelivery)
                | (DraftStatus::PendingDelivery, DraftStatus::Sent)
                | (DraftStatus::Draft, DraftStatus::Cancelled)
                | (DraftStatus::PendingDelivery, DraftStatus::Cancelled)
        )
    }
}

/// The business record a workflow builds incrementally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum DraftEntity {
    Document(DocumentDraft),
    Transfer(TransferIntent),
}

impl DraftEntity {
    pub fn id(&self) -> &DraftId {
        match self {
            Self::Document(draft) => &draft.id,
            Self::Transfer(intent) => &intent.id,
        }
    }

    pub fn owner(&self) -> &UserId {
        match self {
            Self::Document(draft) => &draft.owner,
            Self::Transfer(intent) => &intent.owner,
        }
    }

    pub fn status(&self) -> DraftStatus {
        match self {
            Self::Document(draft) => draft.status,
            Self::Transfer(intent) => intent.status,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Self::Document(draft) => draft.updated_at,
            Self::Transfer(intent) => intent.updated_at,
        }
    }

    pub fn entity_kind(&self) -> &'static str {
        match self {
            Self::Document(draft) => draft.kind.as_str(),
            Self::Transfer(intent) => intent.kind.as_str(),
        }
    }

    pub fn can_transition_to(&self, next: DraftStatus) -> bool {
        match self {
            Self::Document(draft) => draft.can_transition_to(next),
            Self::Transfer(intent) => intent.can_transition_to(next),
        }
    }

    pub fn transition_to(
        &mut self,
        next: DraftStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidStatusTransition {
                draft_id: self.id().0.clone(),
                from: self.status(),
                to: next,
            });
        }

        match self {
            Self::Document(draft) => {
                draft.status = next;
                draft.updated_at = now;
            }
            Self::Transfer(intent) => {
                intent.status = next;
                intent.updated_at = now;
            }
        }
        Ok(())
    }

    pub fn as_document(&self) -> Option<&DocumentDraft> {
        match self {
            Self::Document(draft) => Some(draft),
            Self::Transfer(_) => None,
        }
    }

    pub fn as_transfer(&self) -> Option<&TransferIntent> {
        match self {
            Self::Transfer(intent) => Some(intent),
            Self::Document(_) => None,
        }
    }
}
