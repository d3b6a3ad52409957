use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use steward_core::audit::InMemoryAuditSink;
use steward_core::collaborators::{
    DeterministicExecutionClient, PlainTextRenderer, RecordingDeliveryChannel, RecordingReplySink,
    ResourceCheck, Services,
};
use steward_core::command::InboundMessage;
use steward_core::config::WorkflowConfig;
use steward_core::dispatcher::{DispatchOutcome, Dispatcher};
use steward_core::domain::completion::{
    CompletionOperation, CompletionRecord, CompletionRecordState, OperationKey,
};
use steward_core::domain::draft::{DocumentDraft, DocumentKind, DraftEntity, DraftStatus};
use steward_core::domain::transfer::{TransferIntent, TransferKind, TransferParamsDraft, TransferPhase};
use steward_core::domain::workflow::{
    DocumentProgress, DocumentStep, TransferProgress, UserId, WorkflowData, WorkflowState,
    WorkflowType,
};
use steward_core::store::{CompletionLedger, DraftRepository, StoreError, WorkflowStateStore};
use steward_db::migrations::run_pending;
use steward_db::{
    connect_with_settings, CustodyWallet, DbPool, SqlCompletionLedger, SqlDraftRepository,
    SqlWalletDirectory, SqlWorkflowStateStore,
};

async fn migrated_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    run_pending(&pool).await.expect("migrate");
    pool
}

fn at(hour: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).single().expect("valid timestamp")
}

fn document_state(user: &str, draft: &DocumentDraft, hour: u32) -> WorkflowState {
    WorkflowState::new(
        UserId(user.to_owned()),
        draft.id.clone(),
        WorkflowData::Document(DocumentProgress {
            kind: draft.kind,
            step: DocumentStep::ClientName,
            fields: draft.fields.clone(),
        }),
        at(hour),
        Duration::hours(2),
    )
}

#[tokio::test]
async fn workflow_state_is_unique_per_user_and_type() {
    let store = SqlWorkflowStateStore::new(migrated_pool().await);
    let draft = DocumentDraft::new(UserId("u-1".to_owned()), DocumentKind::Invoice, at(9));
    let first = document_state("u-1", &draft, 9);

    store.put(first.clone()).await.expect("put");
    let mut second = first.clone();
    second.touch(at(10), Duration::hours(2));
    store.put(second.clone()).await.expect("replace");

    let listed = store.list_for_user(&UserId("u-1".to_owned())).await.expect("list");
    assert_eq!(listed, vec![second.clone()]);
    assert_eq!(
        store.get(&UserId("u-1".to_owned()), WorkflowType::DocumentDraft).await.expect("get"),
        Some(second)
    );
    assert_eq!(
        store.get(&UserId("u-1".to_owned()), WorkflowType::TransferConfirm).await.expect("get"),
        None
    );
}

#[tokio::test]
async fn list_for_user_orders_newest_first_and_expiry_uses_timestamps() {
    let store = SqlWorkflowStateStore::new(migrated_pool().await);
    let user = UserId("u-2".to_owned());
    let draft = DocumentDraft::new(user.clone(), DocumentKind::Proposal, at(8));
    let document = document_state("u-2", &draft, 8);

    let intent = TransferIntent::new(user.clone(), TransferKind::Swap, at(9));
    let transfer = WorkflowState::new(
        user.clone(),
        intent.id.clone(),
        WorkflowData::Transfer(TransferProgress {
            kind: TransferKind::Swap,
            phase: TransferPhase::Collecting,
            params: TransferParamsDraft { amount: Some(Decimal::new(100, 0)), ..Default::default() },
            quote: None,
        }),
        at(9),
        Duration::minutes(30),
    );
    store.put(document.clone()).await.expect("put document");
    store.put(transfer.clone()).await.expect("put transfer");

    let listed = store.list_for_user(&user).await.expect("list");
    assert_eq!(listed.iter().map(WorkflowState::workflow_type).collect::<Vec<_>>(), vec![
        WorkflowType::TransferConfirm,
        WorkflowType::DocumentDraft
    ]);

    let expired = store.list_expired(at(9) + Duration::minutes(30)).await.expect("expired");
    assert_eq!(expired, vec![transfer]);

    assert!(store.delete(&user, WorkflowType::TransferConfirm).await.expect("delete"));
    assert!(!store.delete(&user, WorkflowType::TransferConfirm).await.expect("delete again"));
}

#[tokio::test]
async fn drafts_round_trip_and_reject_duplicates() {
    let repo = SqlDraftRepository::new(migrated_pool().await);
    let owner = UserId("u-3".to_owned());
    let draft = DraftEntity::Document(DocumentDraft::new(owner.clone(), DocumentKind::Invoice, at(9)));

    let id = repo.insert_draft(draft.clone()).await.expect("insert");
    assert_eq!(repo.get_draft(&id).await.expect("get"), Some(draft.clone()));
    assert_eq!(repo.insert_draft(draft.clone()).await, Err(StoreError::Conflict(id.0.clone())));

    let mut pending = draft.clone();
    pending.transition_to(DraftStatus::PendingDelivery, at(10)).expect("transition");
    repo.update_draft(pending.clone()).await.expect("update");

    assert_eq!(
        repo.latest_with_status(&owner, DraftStatus::PendingDelivery).await.expect("latest"),
        Some(pending)
    );
    assert_eq!(repo.latest_with_status(&owner, DraftStatus::Draft).await.expect("latest"), None);
}

#[tokio::test]
async fn set_status_overrides_the_stored_payload() {
    let repo = SqlDraftRepository::new(migrated_pool().await);
    let intent = TransferIntent::new(UserId("u-4".to_owned()), TransferKind::Transfer, at(9));
    let id = repo.insert_draft(DraftEntity::Transfer(intent)).await.expect("insert");

    repo.set_status(&id, DraftStatus::Cancelled, at(11)).await.expect("set status");

    let stored = repo.get_draft(&id).await.expect("get").expect("draft");
    assert_eq!(stored.status(), DraftStatus::Cancelled);
    assert_eq!(stored.updated_at(), at(11));
    let missing = steward_core::domain::draft::DraftId("TRF-2026-999999".to_owned());
    assert!(matches!(
        repo.set_status(&missing, DraftStatus::Cancelled, at(11)).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn completion_ledger_upserts_by_operation_key() {
    let pool = migrated_pool().await;
    let ledger = SqlCompletionLedger::new(pool);
    let draft_id = steward_core::domain::draft::DraftId("INV-2026-000321".to_owned());
    let mut record = CompletionRecord {
        operation_key: OperationKey("a1b2c3".to_owned()),
        draft_id: draft_id.clone(),
        operation: CompletionOperation::Deliver,
        state: CompletionRecordState::Reserved,
        attempt_count: 1,
        result_reference: None,
        last_error: None,
        correlation_id: "req-1".to_owned(),
        first_seen_at: at(9),
        last_seen_at: at(9),
    };
    ledger.save(record.clone()).await.expect("reserve");

    record.state = CompletionRecordState::Completed;
    record.result_reference = Some("DLV-0001".to_owned());
    record.last_seen_at = at(10);
    ledger.save(record.clone()).await.expect("complete");

    assert_eq!(ledger.find(&record.operation_key).await.expect("find"), Some(record.clone()));
    assert_eq!(ledger.list_for_draft(&draft_id).await.expect("list"), vec![record]);
    assert_eq!(ledger.find(&OperationKey("missing".to_owned())).await.expect("find"), None);
}

#[tokio::test]
async fn wallet_directory_gates_on_registration() {
    let wallets = SqlWalletDirectory::new(migrated_pool().await);
    let user = UserId("u-5".to_owned());
    assert!(!wallets.has_required_resource(&user).await.expect("check"));

    wallets
        .register(&CustodyWallet {
            user_id: user.clone(),
            address: "0x9f2c41ab".to_owned(),
            network: "base".to_owned(),
            created_at: at(9),
        })
        .await
        .expect("register");

    assert!(wallets.has_required_resource(&user).await.expect("check"));
    assert_eq!(wallets.find(&user).await.expect("find").map(|wallet| wallet.network).as_deref(), Some("base"));
    assert!(wallets.remove(&user).await.expect("remove"));
}

#[tokio::test]
async fn dispatcher_resumes_a_document_from_sqlite_state() {
    let pool = migrated_pool().await;
    let wallets = Arc::new(SqlWalletDirectory::new(pool.clone()));
    let user = UserId("u-6".to_owned());
    wallets
        .register(&CustodyWallet {
            user_id: user.clone(),
            address: "0xfeed".to_owned(),
            network: "base".to_owned(),
            created_at: at(9),
        })
        .await
        .expect("register");

    let replies = Arc::new(RecordingReplySink::default());
    let services = Services {
        states: Arc::new(SqlWorkflowStateStore::new(pool.clone())),
        drafts: Arc::new(SqlDraftRepository::new(pool.clone())),
        ledger: Arc::new(SqlCompletionLedger::new(pool.clone())),
        resources: wallets,
        renderer: Arc::new(PlainTextRenderer::default()),
        delivery: Arc::new(RecordingDeliveryChannel::default()),
        execution: Arc::new(DeterministicExecutionClient::new(Duration::seconds(120))),
        replies: replies.clone(),
        audit: Arc::new(InMemoryAuditSink::default()),
    };
    let dispatcher = Dispatcher::new(services.clone(), WorkflowConfig::default());

    let started = dispatcher
        .handle(InboundMessage::text(user.clone(), "req-1", "draft a proposal").at(at(9)))
        .await;
    let DispatchOutcome::Started { draft_id, .. } = started else {
        panic!("expected a new proposal, got {started:?}");
    };
    dispatcher
        .handle(InboundMessage::text(user.clone(), "req-2", "Grace Hopper").at(at(9)))
        .await;

    // A fresh dispatcher over the same database picks up where the first left off.
    let restarted = Dispatcher::new(services.clone(), WorkflowConfig::default());
    let outcome = restarted
        .handle(InboundMessage::text(user.clone(), "req-3", "grace@example.com").at(at(10)))
        .await;

    assert!(matches!(outcome, DispatchOutcome::Advanced { step: "client_name", .. }));
    let stored = services.drafts.get_draft(&draft_id).await.expect("get").expect("draft");
    let fields = &stored.as_document().expect("document").fields;
    assert_eq!(fields.issuer_name.as_deref(), Some("Grace Hopper"));
    assert_eq!(fields.issuer_email.as_deref(), Some("grace@example.com"));
    assert_eq!(
        services.states.get(&user, WorkflowType::DocumentDraft).await.expect("get").map(|state| state.current_step_key()),
        Some("client_name")
    );
}
