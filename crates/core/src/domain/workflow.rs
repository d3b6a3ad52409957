use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::draft::{DocumentFields, DocumentKind, DraftId};
use crate::domain::transfer::{QuoteEstimate, TransferKind, TransferParamsDraft, TransferPhase};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    DocumentDraft,
    TransferConfirm,
    PurchaseConfirm,
}

impl WorkflowType {
    pub const ALL: [WorkflowType; 3] =
        [Self::DocumentDraft, Self::TransferConfirm, Self::PurchaseConfirm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentDraft => "document_draft",
            Self::TransferConfirm => "transfer_confirm",
            Self::PurchaseConfirm => "purchase_confirm",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "document_draft" => Some(Self::DocumentDraft),
            "transfer_confirm" => Some(Self::TransferConfirm),
            "purchase_confirm" => Some(Self::PurchaseConfirm),
            _ => None,
        }
    }

    pub fn for_transfer(kind: TransferKind) -> Self {
        match kind {
            TransferKind::Purchase => Self::PurchaseConfirm,
            TransferKind::Transfer | TransferKind::Swap | TransferKind::Bridge => {
                Self::TransferConfirm
            }
        }
    }
}

/// Ordered steps of a document workflow. `Review` marks a finished collection
/// waiting on the completion pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStep {
    IssuerName,
    IssuerEmail,
    ClientName,
    ClientEmail,
    Description,
    LineItems,
    Amount,
    DueDate,
    Review,
}

impl DocumentStep {
    pub fn key(&self) -> &'static str {
        match self {
            Self::IssuerName => "issuer_name",
            Self::IssuerEmail => "issuer_email",
            Self::ClientName => "client_name",
            Self::ClientEmail => "client_email",
            Self::Description => "description",
            Self::LineItems => "line_items",
            Self::Amount => "amount",
            Self::DueDate => "due_date",
            Self::Review => "review",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "issuer_name" => Some(Self::IssuerName),
            "issuer_email" => Some(Self::IssuerEmail),
            "client_name" => Some(Self::ClientName),
            "client_email" => Some(Self::ClientEmail),
            "description" => Some(Self::Description),
            "line_items" => Some(Self::LineItems),
            "amount" => Some(Self::Amount),
            "due_date" => Some(Self::DueDate),
            "review" => Some(Self::Review),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentProgress {
    pub kind: DocumentKind,
    pub step: DocumentStep,
    pub fields: DocumentFields,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub kind: TransferKind,
    pub phase: TransferPhase,
    pub params: TransferParamsDraft,
    pub quote: Option<QuoteEstimate>,
}

/// Per-flow payload; the variant fixes which fields a step may touch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum WorkflowData {
    Document(DocumentProgress),
    Transfer(TransferProgress),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub user_id: UserId,
    pub draft_id: DraftId,
    pub data: WorkflowData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(
        user_id: UserId,
        draft_id: DraftId,
        data: WorkflowData,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self { user_id, draft_id, data, created_at: now, updated_at: now, expires_at: now + ttl }
    }

    pub fn workflow_type(&self) -> WorkflowType {
        match &self.data {
            WorkflowData::Document(_) => WorkflowType::DocumentDraft,
            WorkflowData::Transfer(progress) => WorkflowType::for_transfer(progress.kind),
        }
    }

    pub fn current_step_key(&self) -> &'static str {
        match &self.data {
            WorkflowData::Document(progress) => progress.step.key(),
            WorkflowData::Transfer(progress) => progress.phase.as_str(),
        }
    }

    /// Validated values in collection order.
    pub fn collected_fields(&self) -> Vec<(&'static str, String)> {
        let mut collected = Vec::new();
        match &self.data {
            WorkflowData::Document(progress) => {
                let fields = &progress.fields;
                push_some(&mut collected, "issuer_name", fields.issuer_name.clone());
                push_some(&mut collected, "issuer_email", fields.issuer_email.clone());
                push_some(&mut collected, "client_name", fields.client_name.clone());
                push_some(&mut collected, "client_email", fields.client_email.clone());
                push_some(&mut collected, "description", fields.description.clone());
                push_some(
                    &mut collected,
                    "line_items",
                    fields.line_items.as_ref().map(|items| {
                        items.iter().map(|item| item.description.as_str()).collect::<Vec<_>>().join("; ")
                    }),
                );
                push_some(&mut collected, "amount", fields.amount.as_ref().map(ToString::to_string));
                push_some(&mut collected, "due_date", fields.due_date.map(|date| date.to_string()));
            }
            WorkflowData::Transfer(progress) => {
                let params = &progress.params;
                push_some(&mut collected, "amount", params.amount.map(|value| value.to_string()));
                push_some(&mut collected, "token", params.token.clone());
                push_some(&mut collected, "destination", params.destination.clone());
                push_some(&mut collected, "target_token", params.target_token.clone());
                push_some(&mut collected, "chain", params.chain.clone());
                push_some(&mut collected, "fiat_currency", params.fiat_currency.clone());
            }
        }
        collected
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Records activity and pushes expiry out by `ttl`.
    pub fn touch(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.updated_at = now;
        self.expires_at = now + ttl;
    }

    pub fn document(&self) -> Option<&DocumentProgress> {
        match &self.data {
            WorkflowData::Document(progress) => Some(progress),
            WorkflowData::Transfer(_) => None,
        }
    }

    pub fn transfer(&self) -> Option<&TransferProgress> {
        match &self.data {
            WorkflowData::Transfer(progress) => Some(progress),
            WorkflowData::Document(_) => None,
        }
    }
}

fn push_some(target: &mut Vec<(&'static str, String)>, field: &'static str, value: Option<String>) {
    if let Some(value) = value {
        target.push((field, value));
    }
}
