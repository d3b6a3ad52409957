use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::draft::{DraftId, DraftStatus};
use crate::domain::workflow::WorkflowType;
use crate::errors::ApplicationError;
use crate::store::{DraftRepository, WorkflowStateStore};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SweptWorkflow {
    pub user_id: String,
    pub workflow: WorkflowType,
    pub draft_id: DraftId,
    pub draft_cancelled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub swept: Vec<SweptWorkflow>,
}

impl SweepReport {
    pub fn purged(&self) -> usize {
        self.swept.len()
    }

    pub fn cancelled_drafts(&self) -> usize {
        self.swept.iter().filter(|entry| entry.draft_cancelled).count()
    }
}

/// Purges expired workflow states and cancels the drafts they were building.
/// Messages enforce expiry lazily; this covers users who never come back.
pub struct ExpirySweeper {
    states: Arc<dyn WorkflowStateStore>,
    drafts: Arc<dyn DraftRepository>,
    audit: Arc<dyn AuditSink>,
}

impl ExpirySweeper {
    pub fn new(
        states: Arc<dyn WorkflowStateStore>,
        drafts: Arc<dyn DraftRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { states, drafts, audit }
    }

    /// With `dry_run` the report lists what would be purged and nothing is written.
    pub async fn sweep(
        &self,
        now: DateTime<Utc>,
        dry_run: bool,
        correlation_id: &str,
    ) -> Result<SweepReport, ApplicationError> {
        let mut report = SweepReport::default();

        for state in self.states.list_expired(now).await? {
            let mut entity = self.drafts.get_draft(&state.draft_id).await?;
            let cancellable =
                entity.as_ref().is_some_and(|entity| entity.can_transition_to(DraftStatus::Cancelled));

            if !dry_run {
                if let Some(entity) = entity.as_mut().filter(|_| cancellable) {
                    entity.transition_to(DraftStatus::Cancelled, now)?;
                    self.drafts.update_draft(entity.clone()).await?;
                }
                self.states.delete(&state.user_id, state.workflow_type()).await?;

                self.audit.emit(
                    AuditContext::new(
                        Some(state.user_id.clone()),
                        Some(state.draft_id.clone()),
                        correlation_id,
                        "sweeper",
                    )
                    .event("workflow.expired", AuditCategory::Workflow, AuditOutcome::Success)
                    .with_metadata("workflow", state.workflow_type().as_str())
                    .with_metadata("expired_at", state.expires_at.to_rfc3339())
                    .with_metadata("draft_cancelled", cancellable.to_string()),
                );
            }

            report.swept.push(SweptWorkflow {
                user_id: state.user_id.0.clone(),
                workflow: state.workflow_type(),
                draft_id: state.draft_id.clone(),
                draft_cancelled: cancellable,
            });
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use super::ExpirySweeper;
    use crate::audit::InMemoryAuditSink;
    use crate::domain::draft::{DocumentDraft, DocumentKind, DraftEntity, DraftStatus};
    use crate::domain::workflow::{DocumentProgress, DocumentStep, UserId, WorkflowData, WorkflowState};
    use crate::store::{DraftRepository, InMemoryDraftRepository, InMemoryStateStore, WorkflowStateStore};

    async fn seed(
        states: &InMemoryStateStore,
        drafts: &InMemoryDraftRepository,
        user: &str,
        started: chrono::DateTime<Utc>,
    ) -> WorkflowState {
        let user = UserId(user.to_owned());
        let draft = DocumentDraft::new(user.clone(), DocumentKind::Invoice, started);
        let draft_id = drafts.insert_draft(DraftEntity::Document(draft)).await.expect("insert");
        let state = WorkflowState::new(
            user,
            draft_id,
            WorkflowData::Document(DocumentProgress {
                kind: DocumentKind::Invoice,
                step: DocumentStep::IssuerName,
                fields: Default::default(),
            }),
            started,
            Duration::hours(48),
        );
        states.put(state.clone()).await.expect("put");
        state
    }

    #[tokio::test]
    async fn expired_workflows_are_purged_and_their_drafts_cancelled() {
        let states = Arc::new(InMemoryStateStore::default());
        let drafts = Arc::new(InMemoryDraftRepository::default());
        let audit = Arc::new(InMemoryAuditSink::default());
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).single().expect("valid timestamp");

        let stale = seed(&states, &drafts, "u-stale", now - Duration::days(3)).await;
        let fresh = seed(&states, &drafts, "u-fresh", now - Duration::hours(1)).await;

        let sweeper = ExpirySweeper::new(states.clone(), drafts.clone(), audit.clone());
        let report = sweeper.sweep(now, false, "sweep-1").await.expect("sweep");

        assert_eq!(report.purged(), 1);
        assert_eq!(report.cancelled_drafts(), 1);
        assert_eq!(report.swept[0].draft_id, stale.draft_id);
        assert_eq!(states.list_for_user(&stale.user_id).await.expect("list"), Vec::new());
        assert_eq!(states.list_for_user(&fresh.user_id).await.expect("list").len(), 1);
        let cancelled = drafts.get_draft(&stale.draft_id).await.expect("get").expect("draft");
        assert_eq!(cancelled.status(), DraftStatus::Cancelled);
        assert_eq!(audit.event_types(), vec!["workflow.expired"]);
    }

    #[tokio::test]
    async fn dry_run_reports_without_writing() {
        let states = Arc::new(InMemoryStateStore::default());
        let drafts = Arc::new(InMemoryDraftRepository::default());
        let audit = Arc::new(InMemoryAuditSink::default());
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).single().expect("valid timestamp");
        let stale = seed(&states, &drafts, "u-stale", now - Duration::days(3)).await;

        let sweeper = ExpirySweeper::new(states.clone(), drafts.clone(), audit.clone());
        let report = sweeper.sweep(now, true, "sweep-2").await.expect("sweep");

        assert_eq!(report.purged(), 1);
        assert_eq!(states.list_for_user(&stale.user_id).await.expect("list").len(), 1);
        let draft = drafts.get_draft(&stale.draft_id).await.expect("get").expect("draft");
        assert_eq!(draft.status(), DraftStatus::Draft);
        assert!(audit.events().is_empty());
    }
}
