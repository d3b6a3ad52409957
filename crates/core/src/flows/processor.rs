use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::draft::{DraftEntity, DraftStatus};
use crate::domain::workflow::{DocumentStep, WorkflowData, WorkflowState};
use crate::errors::{ApplicationError, DomainError, ValidationError};
use crate::flows::registry::{NextStep, WorkflowRegistry};
use crate::flows::validators::ValidationContext;
use crate::store::{DraftRepository, WorkflowStateStore};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The answer was stored; `prompt` asks for the next field.
    Advanced { state: WorkflowState, prompt: String },
    /// Nothing was written; `prompt` is the current step's prompt, unchanged.
    Rejected { error: ValidationError, prompt: String },
    /// Every field is collected. The state sits at the review marker until the
    /// completion pipeline removes it.
    Completed { state: WorkflowState },
}

pub struct StepProcessor {
    states: Arc<dyn WorkflowStateStore>,
    drafts: Arc<dyn DraftRepository>,
    audit: Arc<dyn AuditSink>,
}

impl StepProcessor {
    pub fn new(
        states: Arc<dyn WorkflowStateStore>,
        drafts: Arc<dyn DraftRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { states, drafts, audit }
    }

    pub async fn process(
        &self,
        state: &WorkflowState,
        input: &str,
        ctx: &ValidationContext,
        ttl: Duration,
        now: DateTime<Utc>,
        audit: &AuditContext,
    ) -> Result<StepOutcome, ApplicationError> {
        let progress = state.document().ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "{} is not a document workflow",
                state.draft_id
            ))
        })?;

        if progress.step == DocumentStep::Review {
            return Ok(StepOutcome::Completed { state: state.clone() });
        }

        let definition = WorkflowRegistry::document_step(progress.step).ok_or_else(|| {
            DomainError::InvariantViolation(format!("no step definition for `{}`", progress.step.key()))
        })?;

        let value = match (definition.validate)(input, ctx) {
            Ok(value) => value,
            Err(error) => {
                self.audit.emit(
                    audit
                        .event("workflow.step_rejected", AuditCategory::Workflow, AuditOutcome::Rejected)
                        .with_metadata("step", definition.key())
                        .with_metadata("reason", error.message.clone()),
                );
                return Ok(StepOutcome::Rejected {
                    error,
                    prompt: definition.render_prompt(progress.kind),
                });
            }
        };

        let mut entity = self
            .drafts
            .get_draft(&state.draft_id)
            .await?
            .ok_or_else(|| {
                DomainError::InvariantViolation(format!("draft {} is missing", state.draft_id))
            })?;
        let document = match &mut entity {
            DraftEntity::Document(document) if document.status == DraftStatus::Draft => document,
            other => {
                return Err(DomainError::InvariantViolation(format!(
                    "workflow for {} references a {} entity in status {}",
                    state.draft_id,
                    other.entity_kind(),
                    other.status().as_str()
                ))
                .into())
            }
        };

        let mut fields = progress.fields.clone();
        (definition.apply)(&mut fields, value);
        let next = (definition.next)(&fields);

        document.fields = fields.clone();
        document.updated_at = now;
        self.drafts.update_draft(entity).await?;

        let next_step = match next {
            NextStep::Step(step) => step,
            NextStep::Terminal => DocumentStep::Review,
        };
        let mut updated = state.clone();
        let mut next_progress = progress.clone();
        next_progress.fields = fields;
        next_progress.step = next_step;
        updated.data = WorkflowData::Document(next_progress);
        updated.touch(now, ttl);
        self.states.put(updated.clone()).await?;

        self.audit.emit(
            audit
                .event("workflow.step_advanced", AuditCategory::Workflow, AuditOutcome::Success)
                .with_metadata("from", definition.key())
                .with_metadata("to", next_step.key()),
        );

        match next {
            NextStep::Terminal => Ok(StepOutcome::Completed { state: updated }),
            NextStep::Step(step) => {
                let prompt = WorkflowRegistry::document_step(step)
                    .map(|definition| definition.render_prompt(progress.kind))
                    .unwrap_or_default();
                Ok(StepOutcome::Advanced { state: updated, prompt })
            }
        }
    }
}
