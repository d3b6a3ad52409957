//! Persistence contracts used by the workflow engine, plus in-memory
//! implementations for tests and offline runs. SQL versions live in `steward-db`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::completion::{CompletionRecord, OperationKey};
use crate::domain::draft::{DraftEntity, DraftId, DraftStatus};
use crate::domain::workflow::{UserId, WorkflowState, WorkflowType};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("record not found: {0}")]
    NotFound(String),
    /// A record with the same identifier is already stored.
    #[error("`{0}` already exists")]
    Conflict(String),
}

/// At most one active workflow per (user, workflow type).
#[async_trait]
pub trait WorkflowStateStore: Send + Sync {
    async fn get(
        &self,
        user_id: &UserId,
        workflow: WorkflowType,
    ) -> Result<Option<WorkflowState>, StoreError>;

    /// Inserts or replaces the state for its (user, workflow type) pair.
    async fn put(&self, state: WorkflowState) -> Result<(), StoreError>;

    /// Returns whether a state existed. Deleting nothing is not an error.
    async fn delete(&self, user_id: &UserId, workflow: WorkflowType) -> Result<bool, StoreError>;

    /// Active states for a user, most recently updated first.
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<WorkflowState>, StoreError>;

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowState>, StoreError>;
}

#[async_trait]
pub trait DraftRepository: Send + Sync {
    async fn insert_draft(&self, entity: DraftEntity) -> Result<DraftId, StoreError>;
    async fn update_draft(&self, entity: DraftEntity) -> Result<(), StoreError>;
    async fn get_draft(&self, id: &DraftId) -> Result<Option<DraftEntity>, StoreError>;

    /// Writes the status column directly. Callers check the lifecycle first.
    async fn set_status(
        &self,
        id: &DraftId,
        status: DraftStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn latest_with_status(
        &self,
        owner: &UserId,
        status: DraftStatus,
    ) -> Result<Option<DraftEntity>, StoreError>;
}

#[async_trait]
pub trait CompletionLedger: Send + Sync {
    async fn find(&self, key: &OperationKey) -> Result<Option<CompletionRecord>, StoreError>;
    async fn save(&self, record: CompletionRecord) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<(UserId, WorkflowType), WorkflowState>>,
    fail_writes: AtomicBool,
}

impl InMemoryStateStore {
    /// Makes every subsequent `put`/`delete` fail with a backend error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("state store is unavailable".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowStateStore for InMemoryStateStore {
    async fn get(
        &self,
        user_id: &UserId,
        workflow: WorkflowType,
    ) -> Result<Option<WorkflowState>, StoreError> {
        let states = self.states.read().await;
        Ok(states.get(&(user_id.clone(), workflow)).cloned())
    }

    async fn put(&self, state: WorkflowState) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut states = self.states.write().await;
        states.insert((state.user_id.clone(), state.workflow_type()), state);
        Ok(())
    }

    async fn delete(&self, user_id: &UserId, workflow: WorkflowType) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut states = self.states.write().await;
        Ok(states.remove(&(user_id.clone(), workflow)).is_some())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<WorkflowState>, StoreError> {
        let states = self.states.read().await;
        let mut found: Vec<_> =
            states.values().filter(|state| &state.user_id == user_id).cloned().collect();
        found.sort_by(|left, right| right.updated_at.cmp(&left.updated_at));
        Ok(found)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowState>, StoreError> {
        let states = self.states.read().await;
        Ok(states.values().filter(|state| state.is_expired(now)).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryDraftRepository {
    drafts: RwLock<HashMap<String, DraftEntity>>,
    forced_conflicts: AtomicUsize,
}

impl InMemoryDraftRepository {
    /// Rejects the next `count` inserts as if their ids were already taken.
    pub fn conflict_next_inserts(&self, count: usize) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.drafts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.drafts.read().await.is_empty()
    }
}

#[async_trait]
impl DraftRepository for InMemoryDraftRepository {
    async fn insert_draft(&self, entity: DraftEntity) -> Result<DraftId, StoreError> {
        let id = entity.id().clone();
        let forced = self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        let mut drafts = self.drafts.write().await;
        if forced || drafts.contains_key(&id.0) {
            return Err(StoreError::Conflict(id.0));
        }
        drafts.insert(id.0.clone(), entity);
        Ok(id)
    }

    async fn update_draft(&self, entity: DraftEntity) -> Result<(), StoreError> {
        let mut drafts = self.drafts.write().await;
        let id = entity.id().0.clone();
        if !drafts.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        drafts.insert(id, entity);
        Ok(())
    }

    async fn get_draft(&self, id: &DraftId) -> Result<Option<DraftEntity>, StoreError> {
        let drafts = self.drafts.read().await;
        Ok(drafts.get(&id.0).cloned())
    }

    async fn set_status(
        &self,
        id: &DraftId,
        status: DraftStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut drafts = self.drafts.write().await;
        let entity = drafts.get_mut(&id.0).ok_or_else(|| StoreError::NotFound(id.0.clone()))?;
        match entity {
            DraftEntity::Document(draft) => {
                draft.status = status;
                draft.updated_at = now;
            }
            DraftEntity::Transfer(intent) => {
                intent.status = status;
                intent.updated_at = now;
            }
        }
        Ok(())
    }

    async fn latest_with_status(
        &self,
        owner: &UserId,
        status: DraftStatus,
    ) -> Result<Option<DraftEntity>, StoreError> {
        let drafts = self.drafts.read().await;
        Ok(drafts
            .values()
            .filter(|entity| entity.owner() == owner && entity.status() == status)
            .max_by_key(|entity| entity.updated_at())
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryCompletionLedger {
    records: RwLock<HashMap<String, CompletionRecord>>,
}

#[async_trait]
impl CompletionLedger for InMemoryCompletionLedger {
    async fn find(&self, key: &OperationKey) -> Result<Option<CompletionRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(&key.0).cloned())
    }

    async fn save(&self, record: CompletionRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.insert(record.operation_key.0.clone(), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{
        DraftRepository, InMemoryDraftRepository, InMemoryStateStore, StoreError,
        WorkflowStateStore,
    };
    use crate::domain::draft::{
        DocumentDraft, DocumentFields, DocumentKind, DraftEntity, DraftId, DraftStatus,
    };
    use crate::domain::workflow::{
        DocumentProgress, DocumentStep, UserId, WorkflowData, WorkflowState, WorkflowType,
    };

    fn document_state(user: &str, draft: &str, ttl: Duration) -> WorkflowState {
        WorkflowState::new(
            UserId(user.to_owned()),
            DraftId(draft.to_owned()),
            WorkflowData::Document(DocumentProgress {
                kind: DocumentKind::Invoice,
                step: DocumentStep::IssuerName,
                fields: DocumentFields::default(),
            }),
            Utc::now(),
            ttl,
        )
    }

    #[tokio::test]
    async fn put_replaces_the_state_for_the_same_pair() {
        let store = InMemoryStateStore::default();
        store.put(document_state("u-1", "INV-2026-000001", Duration::hours(1))).await.expect("put");
        store.put(document_state("u-1", "INV-2026-000002", Duration::hours(1))).await.expect("put");

        let states = store.list_for_user(&UserId("u-1".to_owned())).await.expect("list");
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].draft_id.0, "INV-2026-000002");
    }

    #[tokio::test]
    async fn delete_without_state_is_not_an_error() {
        let store = InMemoryStateStore::default();
        let deleted = store
            .delete(&UserId("nobody".to_owned()), WorkflowType::TransferConfirm)
            .await
            .expect("delete");
        assert!(!deleted);
        assert_eq!(
            store.get(&UserId("nobody".to_owned()), WorkflowType::DocumentDraft).await,
            Ok(None)
        );
    }

    #[tokio::test]
    async fn expired_states_are_listed() {
        let store = InMemoryStateStore::default();
        store.put(document_state("u-1", "INV-2026-000001", Duration::seconds(-1))).await.expect("put");
        store.put(document_state("u-2", "INV-2026-000002", Duration::hours(1))).await.expect("put");

        let expired = store.list_expired(Utc::now()).await.expect("list expired");
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].user_id.0, "u-1");
    }

    #[tokio::test]
    async fn failing_writes_surface_backend_errors() {
        let store = InMemoryStateStore::default();
        store.fail_writes(true);
        let error = store
            .put(document_state("u-1", "INV-2026-000001", Duration::hours(1)))
            .await
            .expect_err("write should fail");
        assert!(matches!(error, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn latest_with_status_picks_most_recent_owned_draft() {
        let repo = InMemoryDraftRepository::default();
        let owner = UserId("u-1".to_owned());
        let now = Utc::now();

        let mut older = DocumentDraft::new(owner.clone(), DocumentKind::Invoice, now);
        older.id = DraftId("INV-2026-000010".to_owned());
        older.status = DraftStatus::PendingDelivery;
        let mut newer = DocumentDraft::new(owner.clone(), DocumentKind::Proposal, now);
        newer.id = DraftId("PRP-2026-000011".to_owned());
        newer.status = DraftStatus::PendingDelivery;
        newer.updated_at = now + Duration::minutes(5);

        repo.insert_draft(DraftEntity::Document(older)).await.expect("insert older");
        repo.insert_draft(DraftEntity::Document(newer)).await.expect("insert newer");

        let latest = repo
            .latest_with_status(&owner, DraftStatus::PendingDelivery)
            .await
            .expect("query")
            .expect("found");
        assert_eq!(latest.id().0, "PRP-2026-000011");

        repo.set_status(latest.id(), DraftStatus::Sent, now).await.expect("set status");
        let remaining = repo
            .latest_with_status(&owner, DraftStatus::PendingDelivery)
            .await
            .expect("query")
            .expect("found");
        assert_eq!(remaining.id().0, "INV-2026-000010");
    }
}
