//! Contracts for everything the workflow engine calls out to, with deterministic
//! implementations used by tests and offline runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::AuditSink;
use crate::command::ReplyOption;
use crate::domain::completion::OperationKey;
use crate::domain::draft::DraftEntity;
use crate::domain::transfer::{
    ExecutionReceipt, ExecutionStatus, QuoteEstimate, TransferKind, TransferParams,
};
use crate::domain::workflow::UserId;
use crate::store::{CompletionLedger, DraftRepository, WorkflowStateStore};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedArtifact {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub reference: String,
    pub delivered_at: DateTime<Utc>,
}

#[async_trait]
pub trait ResourceCheck: Send + Sync {
    async fn has_required_resource(&self, user_id: &UserId) -> Result<bool, CollaboratorError>;
}

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, draft: &DraftEntity) -> Result<RenderedArtifact, CollaboratorError>;
}

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn deliver(
        &self,
        address: &str,
        artifact: &RenderedArtifact,
        metadata: &BTreeMap<String, String>,
    ) -> Result<DeliveryReceipt, CollaboratorError>;
}

#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn quote(
        &self,
        params: &TransferParams,
        now: DateTime<Utc>,
    ) -> Result<QuoteEstimate, CollaboratorError>;

    /// `operation_key` is stable across retries of the same transfer, including
    /// retries that needed a fresh quote. Implementations send it as the
    /// idempotency key.
    async fn execute(
        &self,
        params: &TransferParams,
        quote: &QuoteEstimate,
        operation_key: &OperationKey,
    ) -> Result<ExecutionReceipt, CollaboratorError>;
}

/// The only user-facing output of the engine.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn prompt(
        &self,
        user_id: &UserId,
        text: &str,
        options: &[ReplyOption],
    ) -> Result<(), CollaboratorError>;
}

/// Everything a dispatcher needs, shared behind `Arc`s.
#[derive(Clone)]
pub struct Services {
    pub states: Arc<dyn WorkflowStateStore>,
    pub drafts: Arc<dyn DraftRepository>,
    pub ledger: Arc<dyn CompletionLedger>,
    pub resources: Arc<dyn ResourceCheck>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub delivery: Arc<dyn DeliveryChannel>,
    pub execution: Arc<dyn ExecutionClient>,
    pub replies: Arc<dyn ReplySink>,
    pub audit: Arc<dyn AuditSink>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Default)]
pub struct StaticResourceDirectory {
    users: Mutex<HashSet<UserId>>,
}

impl StaticResourceDirectory {
    pub fn with_users<I>(users: I) -> Self
    where
        I: IntoIterator<Item = UserId>,
    {
        Self { users: Mutex::new(users.into_iter().collect()) }
    }

    pub fn grant(&self, user_id: UserId) {
        lock(&self.users).insert(user_id);
    }
}

#[async_trait]
impl ResourceCheck for StaticResourceDirectory {
    async fn has_required_resource(&self, user_id: &UserId) -> Result<bool, CollaboratorError> {
        Ok(lock(&self.users).contains(user_id))
    }
}

/// Renders a plain-text summary of a draft.
#[derive(Default)]
pub struct PlainTextRenderer {
    failure: Mutex<Option<String>>,
}

impl PlainTextRenderer {
    pub fn fail_with(&self, message: Option<&str>) {
        *lock(&self.failure) = message.map(str::to_owned);
    }
}

#[async_trait]
impl DocumentRenderer for PlainTextRenderer {
    async fn render(&self, draft: &DraftEntity) -> Result<RenderedArtifact, CollaboratorError> {
        if let Some(message) = lock(&self.failure).clone() {
            return Err(CollaboratorError::Unavailable(message));
        }

        let document = draft.as_document().ok_or_else(|| {
            CollaboratorError::Rejected(format!("{} is not a document", draft.id()))
        })?;
        let fields = &document.fields;
        let mut body = format!("{} {}\n", document.kind.as_str().to_uppercase(), document.id);
        let lines = [
            ("From", fields.issuer_name.clone()),
            ("To", fields.client_name.clone()),
            ("Description", fields.description.clone()),
            ("Amount", fields.amount.as_ref().map(ToString::to_string)),
            ("Due", fields.due_date.map(|date| date.to_string())),
        ];
        for (label, value) in lines {
            if let Some(value) = value {
                body.push_str(&format!("{label}: {value}\n"));
            }
        }
        for item in fields.line_items.iter().flatten() {
            match item.amount {
                Some(amount) => body.push_str(&format!("- {} ({})\n", item.description, amount)),
                None => body.push_str(&format!("- {}\n", item.description)),
            }
        }

        Ok(RenderedArtifact {
            file_name: format!("{}.txt", document.id),
            content_type: "text/plain".to_owned(),
            bytes: body.into_bytes(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedDelivery {
    pub address: String,
    pub file_name: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct RecordingDeliveryChannel {
    deliveries: Mutex<Vec<RecordedDelivery>>,
    failure: Mutex<Option<String>>,
}

impl RecordingDeliveryChannel {
    pub fn fail_with(&self, message: Option<&str>) {
        *lock(&self.failure) = message.map(str::to_owned);
    }

    pub fn deliveries(&self) -> Vec<RecordedDelivery> {
        lock(&self.deliveries).clone()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingDeliveryChannel {
    async fn deliver(
        &self,
        address: &str,
        artifact: &RenderedArtifact,
        metadata: &BTreeMap<String, String>,
    ) -> Result<DeliveryReceipt, CollaboratorError> {
        if let Some(message) = lock(&self.failure).clone() {
            return Err(CollaboratorError::Unavailable(message));
        }

        let mut deliveries = lock(&self.deliveries);
        deliveries.push(RecordedDelivery {
            address: address.to_owned(),
            file_name: artifact.file_name.clone(),
            metadata: metadata.clone(),
        });
        Ok(DeliveryReceipt { reference: format!("DLV-{:04}", deliveries.len()), delivered_at: Utc::now() })
    }
}

/// Offline pricing and execution: fixed rates, a flat fee, no network.
pub struct DeterministicExecutionClient {
    fee_rate: Decimal,
    quote_ttl: Duration,
    rates: BTreeMap<(String, String), Decimal>,
    quote_failure: Mutex<Option<String>>,
    execute_failure: Mutex<Option<String>>,
    reject_execution: Mutex<Option<String>>,
    executions: Mutex<Vec<OperationKey>>,
    attempts: Mutex<Vec<OperationKey>>,
    quotes_issued: Mutex<usize>,
}

impl DeterministicExecutionClient {
    pub fn new(quote_ttl: Duration) -> Self {
        Self {
            fee_rate: Decimal::new(5, 3),
            quote_ttl,
            rates: BTreeMap::new(),
            quote_failure: Mutex::new(None),
            execute_failure: Mutex::new(None),
            reject_execution: Mutex::new(None),
            executions: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            quotes_issued: Mutex::new(0),
        }
    }

    /// Units of `to` received per unit of `from`.
    pub fn with_rate(mut self, from: &str, to: &str, rate: Decimal) -> Self {
        self.rates.insert((from.to_ascii_uppercase(), to.to_ascii_uppercase()), rate);
        self
    }

    pub fn fail_quotes_with(&self, message: Option<&str>) {
        *lock(&self.quote_failure) = message.map(str::to_owned);
    }

    pub fn fail_executions_with(&self, message: Option<&str>) {
        *lock(&self.execute_failure) = message.map(str::to_owned);
    }

    pub fn reject_executions_with(&self, reason: Option<&str>) {
        *lock(&self.reject_execution) = reason.map(str::to_owned);
    }

    pub fn execution_count(&self) -> usize {
        lock(&self.executions).len()
    }

    /// Every key `execute` was called with, including calls that then failed.
    pub fn attempted_keys(&self) -> Vec<OperationKey> {
        lock(&self.attempts).clone()
    }

    pub fn quote_count(&self) -> usize {
        *lock(&self.quotes_issued)
    }

    fn rate(&self, from: &str, to: &str) -> Decimal {
        if from.eq_ignore_ascii_case(to) {
            return Decimal::ONE;
        }
        self.rates
            .get(&(from.to_ascii_uppercase(), to.to_ascii_uppercase()))
            .copied()
            .unwrap_or(Decimal::ONE)
    }
}

#[async_trait]
impl ExecutionClient for DeterministicExecutionClient {
    async fn quote(
        &self,
        params: &TransferParams,
        now: DateTime<Utc>,
    ) -> Result<QuoteEstimate, CollaboratorError> {
        if let Some(message) = lock(&self.quote_failure).clone() {
            return Err(CollaboratorError::Unavailable(message));
        }
        *lock(&self.quotes_issued) += 1;

        let estimate = match params.kind {
            TransferKind::Purchase => {
                let fiat = params.fiat_currency.clone().unwrap_or_else(|| "USD".to_owned());
                let rate = self.rate(&params.token, &fiat);
                let fee = (params.amount * rate * self.fee_rate).round_dp(2);
                QuoteEstimate {
                    rate,
                    fee,
                    fee_token: fiat,
                    receive_amount: params.amount,
                    receive_token: params.token.clone(),
                    expires_at: now + self.quote_ttl,
                }
            }
            TransferKind::Transfer | TransferKind::Swap | TransferKind::Bridge => {
                let receive_token =
                    params.target_token.clone().unwrap_or_else(|| params.token.clone());
                let rate = self.rate(&params.token, &receive_token);
                let fee = (params.amount * self.fee_rate).round_dp(6);
                QuoteEstimate {
                    rate,
                    fee,
                    fee_token: params.token.clone(),
                    receive_amount: ((params.amount - fee) * rate).round_dp(6),
                    receive_token,
                    expires_at: now + self.quote_ttl,
                }
            }
        };
        Ok(estimate)
    }

    async fn execute(
        &self,
        _params: &TransferParams,
        _quote: &QuoteEstimate,
        operation_key: &OperationKey,
    ) -> Result<ExecutionReceipt, CollaboratorError> {
        lock(&self.attempts).push(operation_key.clone());
        if let Some(message) = lock(&self.execute_failure).clone() {
            return Err(CollaboratorError::Unavailable(message));
        }

        lock(&self.executions).push(operation_key.clone());
        let reference = format!("SIM-{}", operation_key.0.chars().take(12).collect::<String>());
        if let Some(reason) = lock(&self.reject_execution).clone() {
            return Ok(ExecutionReceipt {
                reference,
                status: ExecutionStatus::Rejected,
                detail: Some(reason),
            });
        }
        Ok(ExecutionReceipt { reference, status: ExecutionStatus::Completed, detail: None })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedReply {
    pub user_id: UserId,
    pub text: String,
    pub options: Vec<ReplyOption>,
}

#[derive(Default)]
pub struct RecordingReplySink {
    replies: Mutex<Vec<RecordedReply>>,
}

impl RecordingReplySink {
    pub fn replies(&self) -> Vec<RecordedReply> {
        lock(&self.replies).clone()
    }

    pub fn last_text(&self) -> Option<String> {
        lock(&self.replies).last().map(|reply| reply.text.clone())
    }

    pub fn clear(&self) {
        lock(&self.replies).clear();
    }
}

#[async_trait]
impl ReplySink for RecordingReplySink {
    async fn prompt(
        &self,
        user_id: &UserId,
        text: &str,
        options: &[ReplyOption],
    ) -> Result<(), CollaboratorError> {
        lock(&self.replies).push(RecordedReply {
            user_id: user_id.clone(),
            text: text.to_owned(),
            options: options.to_vec(),
        });
        Ok(())
    }
}
