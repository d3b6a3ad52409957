//! Terminal side effects: finalizing documents, delivering them, and executing
//! confirmed transfers. Every delivery and execution is reserved in the
//! completion ledger first, so a repeated request replays the recorded result
//! instead of repeating the side effect.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::collaborators::{
    CollaboratorError, DeliveryChannel, DocumentRenderer, ExecutionClient, RenderedArtifact,
    Services,
};
use crate::domain::completion::{
    CompletionOperation, CompletionRecord, CompletionRecordState, OperationKey,
};
use crate::domain::draft::{DocumentDraft, DraftEntity, DraftId, DraftStatus};
use crate::domain::transfer::{ExecutionReceipt, ExecutionStatus, QuoteEstimate, TransferParams};
use crate::domain::workflow::{UserId, WorkflowState, WorkflowType};
use crate::errors::{ApplicationError, CollaboratorStage, DomainError};
use crate::store::{CompletionLedger, DraftRepository, WorkflowStateStore};

/// `blake3(operation, draft id, content)` as hex.
pub fn operation_key<T>(
    operation: CompletionOperation,
    draft_id: &DraftId,
    content: &T,
) -> Result<OperationKey, ApplicationError>
where
    T: Serialize + ?Sized,
{
    let fingerprint = serde_json::to_vec(content).map_err(|error| {
        DomainError::InvariantViolation(format!("could not fingerprint {draft_id}: {error}"))
    })?;

    let mut hasher = blake3::Hasher::new();
    hasher.update(operation.as_str().as_bytes());
    hasher.update(&[0x1f]);
    hasher.update(draft_id.0.as_bytes());
    hasher.update(&[0x1f]);
    hasher.update(&fingerprint);
    Ok(OperationKey(hasher.finalize().to_hex().to_string()))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalizedDocument {
    pub draft: DocumentDraft,
    pub artifact: RenderedArtifact,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered { draft_id: DraftId, address: String, reference: String },
    /// An earlier attempt already delivered this exact content.
    AlreadySent { draft_id: DraftId, reference: Option<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Executed { draft_id: DraftId, receipt: ExecutionReceipt },
    Rejected { draft_id: DraftId, receipt: ExecutionReceipt },
}

pub struct CompletionPipeline {
    states: Arc<dyn WorkflowStateStore>,
    drafts: Arc<dyn DraftRepository>,
    ledger: Arc<dyn CompletionLedger>,
    renderer: Arc<dyn DocumentRenderer>,
    delivery: Arc<dyn DeliveryChannel>,
    execution: Arc<dyn ExecutionClient>,
    audit: Arc<dyn AuditSink>,
}

impl CompletionPipeline {
    pub fn new(services: &Services) -> Self {
        Self {
            states: services.states.clone(),
            drafts: services.drafts.clone(),
            ledger: services.ledger.clone(),
            renderer: services.renderer.clone(),
            delivery: services.delivery.clone(),
            execution: services.execution.clone(),
            audit: services.audit.clone(),
        }
    }

    /// Renders the completed draft, moves it to `pending_delivery` and drops the
    /// workflow. A render failure leaves both the draft and the state untouched.
    pub async fn finalize_document(
        &self,
        state: &WorkflowState,
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<FinalizedDocument, ApplicationError> {
        let mut entity = self.load(&state.draft_id).await?;
        let document = entity.as_document().ok_or_else(|| {
            DomainError::InvariantViolation(format!("{} is not a document", state.draft_id))
        })?;
        let missing = document.fields.missing_fields();
        if !missing.is_empty() {
            return Err(DomainError::InvariantViolation(format!(
                "{} cannot be finalized; missing {}",
                state.draft_id,
                missing.join(", ")
            ))
            .into());
        }

        let artifact = match self.renderer.render(&entity).await {
            Ok(artifact) => artifact,
            Err(error) => {
                return Err(self.stage_failed(audit, CollaboratorStage::Render, error));
            }
        };

        entity.transition_to(DraftStatus::PendingDelivery, now)?;
        self.drafts.update_draft(entity.clone()).await?;
        self.states.delete(&state.user_id, WorkflowType::DocumentDraft).await?;

        self.audit.emit(
            audit
                .event("completion.document_finalized", AuditCategory::Completion, AuditOutcome::Success)
                .with_metadata("artifact", artifact.file_name.clone())
                .with_metadata("bytes", artifact.bytes.len().to_string()),
        );

        let draft = match entity {
            DraftEntity::Document(draft) => draft,
            DraftEntity::Transfer(_) => {
                return Err(DomainError::InvariantViolation(format!(
                    "{} changed kind during finalization",
                    state.draft_id
                ))
                .into())
            }
        };
        Ok(FinalizedDocument { draft, artifact })
    }

    /// Delivers a `pending_delivery` document to its client address.
    /// `draft_id = None` picks the owner's most recent pending document.
    pub async fn send_document(
        &self,
        owner: &UserId,
        draft_id: Option<&DraftId>,
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<SendOutcome, ApplicationError> {
        let mut entity = match draft_id {
            Some(id) => match self.drafts.get_draft(id).await? {
                Some(entity) if entity.owner() == owner => entity,
                _ => {
                    return Err(ApplicationError::Precondition(format!(
                        "I couldn't find a document called {id}."
                    )))
                }
            },
            None => self
                .drafts
                .latest_with_status(owner, DraftStatus::PendingDelivery)
                .await?
                .ok_or_else(|| {
                    ApplicationError::Precondition(
                        "There's no finished document waiting to be sent.".to_owned(),
                    )
                })?,
        };
        let id = entity.id().clone();
        let audit = audit.with_draft(&id);

        let document = entity.as_document().ok_or_else(|| {
            ApplicationError::Precondition(format!("{id} is a transfer, not a document."))
        })?;
        let key = operation_key(CompletionOperation::Deliver, &id, &(document.kind, &document.fields))?;

        match document.status {
            DraftStatus::PendingDelivery => {}
            DraftStatus::Sent => {
                let reference = self.ledger.find(&key).await?.and_then(|record| record.result_reference);
                return Ok(SendOutcome::AlreadySent { draft_id: id, reference });
            }
            DraftStatus::Draft => {
                return Err(ApplicationError::Precondition(format!(
                    "{id} isn't finished yet. Reply `continue` to pick it up."
                )))
            }
            other => {
                return Err(ApplicationError::Precondition(format!(
                    "{id} is {} and can't be sent.",
                    other.as_str()
                )))
            }
        }

        let address = document.fields.client_email.clone().ok_or_else(|| {
            DomainError::InvariantViolation(format!("{id} has no client email"))
        })?;
        let mut metadata = BTreeMap::new();
        metadata.insert("draft_id".to_owned(), id.0.clone());
        metadata.insert("kind".to_owned(), document.kind.as_str().to_owned());
        metadata.insert("operation_key".to_owned(), key.0.clone());
        if let Some(issuer) = &document.fields.issuer_name {
            metadata.insert("issuer_name".to_owned(), issuer.clone());
        }
        if let Some(reply_to) = &document.fields.issuer_email {
            metadata.insert("reply_to".to_owned(), reply_to.clone());
        }

        let previous = self.ledger.find(&key).await?;
        if let Some(record) = previous.as_ref().filter(|record| record.state == CompletionRecordState::Completed) {
            entity.transition_to(DraftStatus::Sent, now)?;
            self.drafts.update_draft(entity).await?;
            self.audit.emit(
                audit
                    .event("completion.delivery_replayed", AuditCategory::Completion, AuditOutcome::Success)
                    .with_metadata("operation_key", key.0.clone()),
            );
            return Ok(SendOutcome::AlreadySent { draft_id: id, reference: record.result_reference.clone() });
        }

        let mut record = self.reserve(previous, &key, &id, CompletionOperation::Deliver, &audit, now);
        self.ledger.save(record.clone()).await?;

        let artifact = match self.renderer.render(&entity).await {
            Ok(artifact) => artifact,
            Err(error) => {
                self.release(&mut record, &error, now).await?;
                return Err(self.stage_failed(&audit, CollaboratorStage::Render, error));
            }
        };

        let receipt = match self.delivery.deliver(&address, &artifact, &metadata).await {
            Ok(receipt) => receipt,
            Err(error) => {
                self.release(&mut record, &error, now).await?;
                return Err(self.stage_failed(&audit, CollaboratorStage::Deliver, error));
            }
        };

        record.state = CompletionRecordState::Completed;
        record.result_reference = Some(receipt.reference.clone());
        record.last_error = None;
        record.last_seen_at = now;
        self.ledger.save(record).await?;

        entity.transition_to(DraftStatus::Sent, now)?;
        self.drafts.update_draft(entity).await?;
        self.audit.emit(
            audit
                .event("completion.document_sent", AuditCategory::Completion, AuditOutcome::Success)
                .with_metadata("reference", receipt.reference.clone())
                .with_metadata("address", address.clone()),
        );

        Ok(SendOutcome::Delivered { draft_id: id, address, reference: receipt.reference })
    }

    /// Executes a confirmed transfer. On a collaborator failure the intent stays
    /// `confirmed` and the workflow is kept so the user can retry.
    ///
    /// The operation key covers the draft and its parameters only. A retry that
    /// needed a fresh quote resubmits under the same key, so an execution the
    /// service accepted before the error is deduplicated upstream.
    pub async fn execute_transfer(
        &self,
        state: &WorkflowState,
        params: &TransferParams,
        quote: &QuoteEstimate,
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<ExecutionOutcome, ApplicationError> {
        let id = state.draft_id.clone();
        let key = operation_key(CompletionOperation::Execute, &id, params)?;

        let previous = self.ledger.find(&key).await?;
        let receipt = match previous.as_ref().filter(|record| record.state == CompletionRecordState::Completed) {
            Some(record) => {
                self.audit.emit(
                    audit
                        .event("completion.execution_replayed", AuditCategory::Completion, AuditOutcome::Success)
                        .with_metadata("operation_key", key.0.clone()),
                );
                ExecutionReceipt {
                    reference: record.result_reference.clone().unwrap_or_default(),
                    status: if record.last_error.is_some() {
                        ExecutionStatus::Rejected
                    } else {
                        ExecutionStatus::Completed
                    },
                    detail: record.last_error.clone(),
                }
            }
            None => {
                let mut record = self.reserve(previous, &key, &id, CompletionOperation::Execute, audit, now);
                self.ledger.save(record.clone()).await?;

                let receipt = match self.execution.execute(params, quote, &key).await {
                    Ok(receipt) => receipt,
                    Err(error) => {
                        self.release(&mut record, &error, now).await?;
                        return Err(self.stage_failed(audit, CollaboratorStage::Execute, error));
                    }
                };

                record.state = CompletionRecordState::Completed;
                record.result_reference = Some(receipt.reference.clone());
                record.last_error = match receipt.status {
                    ExecutionStatus::Rejected => {
                        Some(receipt.detail.clone().unwrap_or_else(|| "rejected".to_owned()))
                    }
                    ExecutionStatus::Submitted | ExecutionStatus::Completed => None,
                };
                record.last_seen_at = now;
                self.ledger.save(record).await?;
                receipt
            }
        };

        let mut entity = self.load(&id).await?;
        let rejected = receipt.status == ExecutionStatus::Rejected;
        let next = if rejected { DraftStatus::Failed } else { DraftStatus::Executed };
        if let DraftEntity::Transfer(intent) = &mut entity {
            intent.receipt = Some(receipt.clone());
            intent.failure_reason = receipt.detail.clone().filter(|_| rejected);
        }
        entity.transition_to(next, now)?;
        self.drafts.update_draft(entity).await?;
        self.states.delete(&state.user_id, state.workflow_type()).await?;

        self.audit.emit(
            audit
                .event(
                    "completion.transfer_executed",
                    AuditCategory::Completion,
                    if rejected { AuditOutcome::Rejected } else { AuditOutcome::Success },
                )
                .with_metadata("reference", receipt.reference.clone())
                .with_metadata("status", next.as_str()),
        );

        if rejected {
            Ok(ExecutionOutcome::Rejected { draft_id: id, receipt })
        } else {
            Ok(ExecutionOutcome::Executed { draft_id: id, receipt })
        }
    }

    async fn load(&self, id: &DraftId) -> Result<DraftEntity, ApplicationError> {
        self.drafts
            .get_draft(id)
            .await?
            .ok_or_else(|| DomainError::InvariantViolation(format!("draft {id} is missing")).into())
    }

    /// Opens a new attempt under `key`. A record still `reserved` means an
    /// earlier attempt never reported back; the attempt goes out again under the
    /// same key and the gap is audited.
    fn reserve(
        &self,
        previous: Option<CompletionRecord>,
        key: &OperationKey,
        draft_id: &DraftId,
        operation: CompletionOperation,
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> CompletionRecord {
        match previous {
            Some(mut record) => {
                if record.state == CompletionRecordState::Reserved {
                    self.audit.emit(
                        audit
                            .event("completion.attempt_in_doubt", AuditCategory::Completion, AuditOutcome::Failed)
                            .with_metadata("operation", operation.as_str())
                            .with_metadata("operation_key", key.0.clone())
                            .with_metadata("previous_correlation_id", record.correlation_id.clone())
                            .with_metadata("attempt_count", record.attempt_count.to_string()),
                    );
                }
                record.state = CompletionRecordState::Reserved;
                record.attempt_count += 1;
                record.correlation_id = audit.correlation_id.clone();
                record.last_seen_at = now;
                record
            }
            None => CompletionRecord {
                operation_key: key.clone(),
                draft_id: draft_id.clone(),
                operation,
                state: CompletionRecordState::Reserved,
                attempt_count: 1,
                result_reference: None,
                last_error: None,
                correlation_id: audit.correlation_id.clone(),
                first_seen_at: now,
                last_seen_at: now,
            },
        }
    }

    async fn release(
        &self,
        record: &mut CompletionRecord,
        error: &CollaboratorError,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        record.state = CompletionRecordState::Failed;
        record.last_error = Some(error.to_string());
        record.last_seen_at = now;
        self.ledger.save(record.clone()).await?;
        Ok(())
    }

    fn stage_failed(
        &self,
        audit: &AuditContext,
        stage: CollaboratorStage,
        error: CollaboratorError,
    ) -> ApplicationError {
        self.audit.emit(
            audit
                .event("completion.stage_failed", AuditCategory::Completion, AuditOutcome::Failed)
                .with_metadata("stage", stage.label())
                .with_metadata("error", error.to_string()),
        );
        ApplicationError::collaborator(stage, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{operation_key, CompletionPipeline, SendOutcome};
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::collaborators::{
        DeterministicExecutionClient, PlainTextRenderer, RecordingDeliveryChannel,
        RecordingReplySink, Services, StaticResourceDirectory,
    };
    use crate::domain::completion::{CompletionOperation, OperationKey};
    use crate::domain::draft::{
        DocumentDraft, DocumentFields, DocumentKind, DraftEntity, DraftId, DraftStatus, Money,
    };
    use crate::domain::workflow::{
        DocumentProgress, DocumentStep, UserId, WorkflowData, WorkflowState, WorkflowType,
    };
    use crate::errors::{ApplicationError, CollaboratorStage};
    use crate::store::{
        CompletionLedger, DraftRepository, InMemoryCompletionLedger, InMemoryDraftRepository,
        InMemoryStateStore, WorkflowStateStore,
    };

    struct Harness {
        states: Arc<InMemoryStateStore>,
        drafts: Arc<InMemoryDraftRepository>,
        ledger: Arc<InMemoryCompletionLedger>,
        renderer: Arc<PlainTextRenderer>,
        delivery: Arc<RecordingDeliveryChannel>,
        pipeline: CompletionPipeline,
    }

    fn harness() -> Harness {
        let states = Arc::new(InMemoryStateStore::default());
        let drafts = Arc::new(InMemoryDraftRepository::default());
        let ledger = Arc::new(InMemoryCompletionLedger::default());
        let renderer = Arc::new(PlainTextRenderer::default());
        let delivery = Arc::new(RecordingDeliveryChannel::default());
        let services = Services {
            states: states.clone(),
            drafts: drafts.clone(),
            ledger: ledger.clone(),
            resources: Arc::new(StaticResourceDirectory::default()),
            renderer: renderer.clone(),
            delivery: delivery.clone(),
            execution: Arc::new(DeterministicExecutionClient::new(Duration::seconds(120))),
            replies: Arc::new(RecordingReplySink::default()),
            audit: Arc::new(InMemoryAuditSink::default()),
        };
        let pipeline = CompletionPipeline::new(&services);
        Harness { states, drafts, ledger, renderer, delivery, pipeline }
    }

    fn complete_fields() -> DocumentFields {
        DocumentFields {
            issuer_name: Some("Ada".to_owned()),
            issuer_email: Some("ada@example.com".to_owned()),
            client_name: Some("Babbage".to_owned()),
            client_email: Some("charles@example.com".to_owned()),
            description: Some("Engine consulting".to_owned()),
            line_items: Some(Vec::new()),
            amount: Some(Money { amount: Decimal::new(500, 0), currency: "USD".to_owned() }),
            due_date: NaiveDate::from_ymd_opt(2026, 4, 1),
        }
    }

    async fn reviewed_invoice(h: &Harness) -> WorkflowState {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid timestamp");
        let user = UserId("u-1".to_owned());
        let mut draft = DocumentDraft::new(user.clone(), DocumentKind::Invoice, now);
        draft.fields = complete_fields();
        let draft_id = h.drafts.insert_draft(DraftEntity::Document(draft)).await.expect("insert");
        let state = WorkflowState::new(
            user,
            draft_id,
            WorkflowData::Document(DocumentProgress {
                kind: DocumentKind::Invoice,
                step: DocumentStep::Review,
                fields: complete_fields(),
            }),
            now,
            Duration::hours(48),
        );
        h.states.put(state.clone()).await.expect("put");
        state
    }

    fn audit() -> AuditContext {
        AuditContext::new(Some(UserId("u-1".to_owned())), None, "req-1", "test")
    }

    #[test]
    fn operation_keys_depend_on_content() {
        let id = DraftId("INV-2026-000001".to_owned());
        let first = operation_key(CompletionOperation::Deliver, &id, &complete_fields()).expect("key");
        let again = operation_key(CompletionOperation::Deliver, &id, &complete_fields()).expect("key");
        let mut changed_fields = complete_fields();
        changed_fields.client_email = Some("other@example.com".to_owned());
        let changed = operation_key(CompletionOperation::Deliver, &id, &changed_fields).expect("key");
        let execute = operation_key(CompletionOperation::Execute, &id, &complete_fields()).expect("key");

        assert_eq!(first, again);
        assert_ne!(first, changed);
        assert_ne!(first, execute);
        assert_eq!(first.0.len(), 64);
    }

    #[tokio::test]
    async fn finalize_moves_to_pending_delivery_and_drops_state() {
        let h = harness();
        let state = reviewed_invoice(&h).await;

        let finalized = h.pipeline.finalize_document(&state, &audit(), Utc::now()).await.expect("finalize");

        assert_eq!(finalized.draft.status, DraftStatus::PendingDelivery);
        assert!(finalized.artifact.file_name.ends_with(".txt"));
        assert_eq!(h.states.get(&state.user_id, WorkflowType::DocumentDraft).await, Ok(None));
        assert!(h.delivery.deliveries().is_empty());
    }

    #[tokio::test]
    async fn render_failure_keeps_draft_and_state() {
        let h = harness();
        let state = reviewed_invoice(&h).await;
        h.renderer.fail_with(Some("template missing"));

        let error = h.pipeline.finalize_document(&state, &audit(), Utc::now()).await.expect_err("render fails");

        assert!(matches!(error, ApplicationError::Collaborator { stage: CollaboratorStage::Render, .. }));
        let draft = h.drafts.get_draft(&state.draft_id).await.expect("get").expect("draft");
        assert_eq!(draft.status(), DraftStatus::Draft);
        assert!(h.states.get(&state.user_id, WorkflowType::DocumentDraft).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn send_delivers_once_and_replays_afterwards() {
        let h = harness();
        let state = reviewed_invoice(&h).await;
        h.pipeline.finalize_document(&state, &audit(), Utc::now()).await.expect("finalize");

        let first = h.pipeline.send_document(&state.user_id, None, &audit(), Utc::now()).await.expect("send");
        assert!(matches!(first, SendOutcome::Delivered { ref address, .. } if address == "charles@example.com"));

        let second = h
            .pipeline
            .send_document(&state.user_id, Some(&state.draft_id), &audit(), Utc::now())
            .await
            .expect("second send");
        assert!(matches!(second, SendOutcome::AlreadySent { reference: Some(_), .. }));
        assert_eq!(h.delivery.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn failed_delivery_leaves_document_pending_and_retryable() {
        let h = harness();
        let state = reviewed_invoice(&h).await;
        h.pipeline.finalize_document(&state, &audit(), Utc::now()).await.expect("finalize");
        h.delivery.fail_with(Some("smtp timeout"));

        let error = h
            .pipeline
            .send_document(&state.user_id, None, &audit(), Utc::now())
            .await
            .expect_err("delivery fails");
        assert!(matches!(error, ApplicationError::Collaborator { stage: CollaboratorStage::Deliver, .. }));
        let draft = h.drafts.get_draft(&state.draft_id).await.expect("get").expect("draft");
        assert_eq!(draft.status(), DraftStatus::PendingDelivery);

        h.delivery.fail_with(None);
        let retried = h.pipeline.send_document(&state.user_id, None, &audit(), Utc::now()).await.expect("retry");
        assert!(matches!(retried, SendOutcome::Delivered { .. }));

        let document = draft.as_document().expect("document");
        let key = operation_key(
            CompletionOperation::Deliver,
            &state.draft_id,
            &(document.kind, &document.fields),
        )
        .expect("key");
        let record = h.ledger.find(&key).await.expect("find").expect("record");
        assert_eq!(record.attempt_count, 2);
        assert_ne!(record.operation_key, OperationKey(String::new()));
    }

    #[tokio::test]
    async fn sending_an_unfinished_draft_is_a_precondition_error() {
        let h = harness();
        let state = reviewed_invoice(&h).await;

        let error = h
            .pipeline
            .send_document(&state.user_id, Some(&state.draft_id), &audit(), Utc::now())
            .await
            .expect_err("not finalized");
        assert!(matches!(error, ApplicationError::Precondition(_)));
    }
}
