use chrono::{DateTime, Utc};

use crate::ambiguity::{classify, control_command, Classification, ClassifierContext, FieldHint};
use crate::audit::{AuditCategory, AuditContext, AuditOutcome};
use crate::collaborators::Services;
use crate::command::{ControlCommand, Inbound, InboundMessage, ReplyOption};
use crate::completion::{CompletionPipeline, ExecutionOutcome, SendOutcome};
use crate::config::WorkflowConfig;
use crate::domain::draft::{DocumentDraft, DocumentKind, DraftEntity, DraftId, DraftStatus};
use crate::domain::transfer::{TransferIntent, TransferKind, TransferParams, TransferParamsDraft, TransferPhase};
use crate::domain::workflow::{
    DocumentProgress, DocumentStep, TransferProgress, UserId, WorkflowData, WorkflowState,
    WorkflowType,
};
use crate::errors::{ApplicationError, CollaboratorStage, DomainError, InterfaceError};
use crate::flows::processor::{StepOutcome, StepProcessor};
use crate::flows::registry::WorkflowRegistry;
use crate::flows::transfer::{
    param_label, parse_missing_param, parse_transfer_params, FlowEngine, TransferContext,
    TransferEvent, TransferFlow,
};
use crate::flows::validators::ValidationContext;
use crate::store::StoreError;

/// Fresh draft ids drawn before a run of collisions is reported as a failure.
const DRAFT_ID_ATTEMPTS: usize = 5;

const HELP_TEXT: &str = "Here's what I can do:\n\
• `create an invoice` or `draft a proposal`\n\
• `send 50 USDC to 0x…`, `swap 100 USDC for SOL`, `bridge 1 ETH to base`, `buy 100 USDT with NGN`\n\
• `send` delivers your latest finished document, `send INV-2026-000123` a specific one\n\
• `status` lists what's in progress, `status INV-2026-000123` shows one document\n\
• `cancel` or `continue` at any time";

const SETUP_PROMPT: &str =
    "You'll need a custody wallet before I can start that. Set one up in wallet settings, then ask again.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Started { workflow: WorkflowType, draft_id: DraftId },
    Resumed { workflow: WorkflowType, draft_id: DraftId },
    Advanced { draft_id: DraftId, step: &'static str },
    Rejected { draft_id: DraftId, step: &'static str },
    Finalized { draft_id: DraftId },
    Sent { draft_id: DraftId, duplicate: bool },
    AwaitingParams { draft_id: DraftId, missing: Vec<&'static str> },
    Quoted { draft_id: DraftId },
    Executed { draft_id: DraftId, reference: String },
    ExecutionRejected { draft_id: DraftId },
    Cancelled { workflow: WorkflowType, draft_id: DraftId },
    SetupRequired,
    Interrupted { workflow: WorkflowType },
    Replied,
    Failed { error: InterfaceError },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Intent {
    Help,
    Status(Option<DraftId>),
    Send(Option<DraftId>),
    StartDocument(DocumentKind),
    StartTransfer(TransferKind),
    Unknown,
}

fn resolve_intent(text: &str) -> Intent {
    let lower = text.trim().to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    let first = words.first().copied().unwrap_or_default();
    let draft_token = || words.iter().find_map(|word| DraftId::from_token(word));
    let has_number = words.iter().any(|word| {
        word.trim_start_matches('$').chars().next().is_some_and(|ch| ch.is_ascii_digit())
    });

    match first {
        "" | "help" | "menu" | "commands" | "?" => return Intent::Help,
        "status" => return Intent::Status(draft_token()),
        "send" if !has_number || draft_token().is_some() => return Intent::Send(draft_token()),
        _ => {}
    }

    if lower.contains("invoice") {
        return Intent::StartDocument(DocumentKind::Invoice);
    }
    if lower.contains("proposal") {
        return Intent::StartDocument(DocumentKind::Proposal);
    }

    match first {
        "send" | "transfer" | "pay" | "withdraw" => Intent::StartTransfer(TransferKind::Transfer),
        "swap" | "exchange" | "convert" => Intent::StartTransfer(TransferKind::Swap),
        "bridge" => Intent::StartTransfer(TransferKind::Bridge),
        "buy" | "purchase" => Intent::StartTransfer(TransferKind::Purchase),
        _ => Intent::Unknown,
    }
}

fn workflow_label(state: &WorkflowState) -> &'static str {
    match &state.data {
        WorkflowData::Document(progress) => progress.kind.as_str(),
        WorkflowData::Transfer(progress) => progress.kind.as_str(),
    }
}

fn waiting_for(state: &WorkflowState) -> String {
    match &state.data {
        WorkflowData::Document(progress) if progress.step == DocumentStep::Review => {
            "a final check".to_owned()
        }
        WorkflowData::Document(progress) => {
            let label = WorkflowRegistry::step_label(progress.step, progress.kind);
            if label.starts_with("your") {
                label.to_owned()
            } else {
                format!("the {label}")
            }
        }
        WorkflowData::Transfer(progress) => match progress.phase {
            TransferPhase::Collecting => progress
                .params
                .missing(progress.kind)
                .first()
                .map_or_else(|| "a quote".to_owned(), |param| format!("the {}", param_label(param))),
            _ => "your confirmation".to_owned(),
        },
    }
}

fn cancel_option(workflow: WorkflowType) -> ReplyOption {
    ReplyOption::new("Cancel", ControlCommand::Cancel { workflow: Some(workflow) })
}

fn failure_text(error: &ApplicationError, interface: &InterfaceError) -> String {
    match error {
        ApplicationError::Precondition(message) => message.clone(),
        ApplicationError::Validation(error) => error.message.clone(),
        ApplicationError::Collaborator { stage, message } => {
            format!("The {stage} step failed ({message}). Your progress is saved.")
        }
        ApplicationError::Persistence(_)
        | ApplicationError::Domain(_)
        | ApplicationError::Configuration(_) => {
            format!("{} (ref {})", interface.user_message(), interface.correlation_id())
        }
    }
}

/// Routes each inbound message to the workflow it belongs to, or to a
/// single-turn action when none applies. Messages are handled one at a time.
pub struct Dispatcher {
    services: Services,
    settings: WorkflowConfig,
    processor: StepProcessor,
    pipeline: CompletionPipeline,
}

impl Dispatcher {
    pub fn new(services: Services, settings: WorkflowConfig) -> Self {
        let processor = StepProcessor::new(
            services.states.clone(),
            services.drafts.clone(),
            services.audit.clone(),
        );
        let pipeline = CompletionPipeline::new(&services);
        Self { services, settings, processor, pipeline }
    }

    pub fn settings(&self) -> &WorkflowConfig {
        &self.settings
    }

    /// Handles one message to completion. Failures are reported to the user
    /// through the reply sink and returned as `DispatchOutcome::Failed`.
    pub async fn handle(&self, message: InboundMessage) -> DispatchOutcome {
        let audit = AuditContext::new(
            Some(message.user_id.clone()),
            None,
            message.correlation_id.clone(),
            "dispatcher",
        );
        let kind = match &message.payload {
            Inbound::Text(_) => "text".to_owned(),
            Inbound::Control(command) => format!("control:{}", command.action()),
        };
        self.services.audit.emit(
            audit
                .event("ingress.message_received", AuditCategory::Ingress, AuditOutcome::Success)
                .with_metadata("payload", kind),
        );

        match self.route(&message, &audit).await {
            Ok(outcome) => outcome,
            Err(error) => match self.report(&message.user_id, &audit, error, "").await {
                Ok(outcome) => outcome,
                Err(error) => {
                    DispatchOutcome::Failed { error: error.into_interface(&message.correlation_id) }
                }
            },
        }
    }

    async fn route(
        &self,
        message: &InboundMessage,
        audit: &AuditContext,
    ) -> Result<DispatchOutcome, ApplicationError> {
        let now = message.received_at;
        let active = self.active_states(&message.user_id, audit, now).await?;

        match &message.payload {
            Inbound::Control(command) => {
                self.handle_control(&message.user_id, command.clone(), &active, audit, now).await
            }
            Inbound::Text(text) => self.handle_text(&message.user_id, text, &active, audit, now).await,
        }
    }

    /// Active states, newest first. Expired ones are discarded on the way.
    async fn active_states(
        &self,
        user_id: &UserId,
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowState>, ApplicationError> {
        let mut active = Vec::new();
        for state in self.services.states.list_for_user(user_id).await? {
            if !state.is_expired(now) {
                active.push(state);
                continue;
            }

            self.discard(&state, DraftStatus::Cancelled, now).await?;
            self.services.audit.emit(
                audit
                    .with_draft(&state.draft_id)
                    .event("workflow.expired", AuditCategory::Workflow, AuditOutcome::Success)
                    .with_metadata("workflow", state.workflow_type().as_str())
                    .with_metadata("expired_at", state.expires_at.to_rfc3339()),
            );
            self.reply(
                user_id,
                &format!(
                    "Your {} {} expired after a period of inactivity and was cancelled.",
                    workflow_label(&state),
                    state.draft_id
                ),
                &[],
            )
            .await?;
        }
        Ok(active)
    }

    async fn handle_text(
        &self,
        user_id: &UserId,
        text: &str,
        active: &[WorkflowState],
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, ApplicationError> {
        if let Some(state) = active.first() {
            let ctx = ClassifierContext {
                workflow: state.workflow_type(),
                hint: FieldHint::for_step(state.current_step_key()),
                short_answer_max_words: self.settings.short_answer_max_words,
            };
            match classify(text, &ctx) {
                Classification::Control(command) => {
                    return self.handle_control(user_id, command, active, audit, now).await;
                }
                Classification::Answer => {
                    return self.continue_workflow(state, text, &audit.with_draft(&state.draft_id), now).await;
                }
                Classification::Interruption(reason) => {
                    self.services.audit.emit(
                        audit
                            .with_draft(&state.draft_id)
                            .event("workflow.interrupted", AuditCategory::Workflow, AuditOutcome::Success)
                            .with_metadata("reason", reason.as_str()),
                    );
                    let outcome = self.single_turn(user_id, text, active, audit, now).await?;
                    if outcome != DispatchOutcome::Replied {
                        return Ok(outcome);
                    }
                    self.reply(
                        user_id,
                        &format!(
                            "Your {} {} is still waiting for {}. Reply `continue` to pick it up or `cancel` to drop it.",
                            workflow_label(state),
                            state.draft_id,
                            waiting_for(state)
                        ),
                        &[],
                    )
                    .await?;
                    return Ok(DispatchOutcome::Interrupted { workflow: state.workflow_type() });
                }
            }
        }

        if let Some(command) = control_command(text) {
            return self.handle_control(user_id, command, active, audit, now).await;
        }
        self.single_turn(user_id, text, active, audit, now).await
    }

    async fn single_turn(
        &self,
        user_id: &UserId,
        text: &str,
        active: &[WorkflowState],
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, ApplicationError> {
        match resolve_intent(text) {
            Intent::Help => {
                self.reply(user_id, HELP_TEXT, &[]).await?;
                Ok(DispatchOutcome::Replied)
            }
            Intent::Status(draft_id) => self.status(user_id, draft_id, active).await,
            Intent::Send(draft_id) => self.send(user_id, draft_id, audit, now).await,
            Intent::StartDocument(kind) => self.start_document(user_id, kind, active, audit, now).await,
            Intent::StartTransfer(kind) => {
                self.start_transfer(user_id, kind, text, active, audit, now).await
            }
            Intent::Unknown => {
                self.reply(
                    user_id,
                    "I'm not sure what you mean. I can draft invoices and proposals or move funds. Type `help` to see how.",
                    &[],
                )
                .await?;
                Ok(DispatchOutcome::Replied)
            }
        }
    }

    async fn handle_control(
        &self,
        user_id: &UserId,
        command: ControlCommand,
        active: &[WorkflowState],
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, ApplicationError> {
        let target = |workflow: Option<WorkflowType>| match workflow {
            Some(workflow) => active.iter().find(|state| state.workflow_type() == workflow),
            None => active.first(),
        };

        match command {
            ControlCommand::Send { draft_id } => self.send(user_id, draft_id, audit, now).await,
            ControlCommand::Cancel { workflow } => match target(workflow) {
                Some(state) => self.cancel(state, &audit.with_draft(&state.draft_id), now).await,
                None => {
                    self.reply(user_id, "There's nothing in progress to cancel.", &[]).await?;
                    Ok(DispatchOutcome::Replied)
                }
            },
            ControlCommand::Continue { workflow } => match target(workflow) {
                Some(state) => self.resume(state, &audit.with_draft(&state.draft_id), now).await,
                None => {
                    self.reply(user_id, "You have nothing in progress. Type `help` to start something.", &[])
                        .await?;
                    Ok(DispatchOutcome::Replied)
                }
            },
            ControlCommand::Confirm { workflow } => {
                let transfer = match workflow {
                    Some(_) => target(workflow),
                    None => active.iter().find(|state| state.transfer().is_some()),
                };
                match transfer.filter(|state| state.transfer().is_some()) {
                    Some(state) => self.confirm(state, &audit.with_draft(&state.draft_id), now).await,
                    None => {
                        self.reply(user_id, "There's no quote waiting for confirmation.", &[]).await?;
                        Ok(DispatchOutcome::Replied)
                    }
                }
            }
            ControlCommand::Retry { workflow } => match target(workflow) {
                Some(state) if state.transfer().is_some() => {
                    self.confirm(state, &audit.with_draft(&state.draft_id), now).await
                }
                Some(state) => self.resume(state, &audit.with_draft(&state.draft_id), now).await,
                None => {
                    self.reply(user_id, "There's nothing to retry.", &[]).await?;
                    Ok(DispatchOutcome::Replied)
                }
            },
        }
    }

    async fn has_resource(&self, user_id: &UserId, audit: &AuditContext) -> Result<bool, ApplicationError> {
        let present = self
            .services
            .resources
            .has_required_resource(user_id)
            .await
            .map_err(|error| ApplicationError::collaborator(CollaboratorStage::PreconditionCheck, error.to_string()))?;
        if !present {
            self.services.audit.emit(
                audit.event("workflow.precondition_failed", AuditCategory::Workflow, AuditOutcome::Rejected),
            );
            self.reply(user_id, SETUP_PROMPT, &[]).await?;
        }
        Ok(present)
    }

    async fn start_document(
        &self,
        user_id: &UserId,
        kind: DocumentKind,
        active: &[WorkflowState],
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, ApplicationError> {
        if let Some(existing) = active.iter().find(|state| state.workflow_type() == WorkflowType::DocumentDraft) {
            return self.resume(existing, &audit.with_draft(&existing.draft_id), now).await;
        }
        if !self.has_resource(user_id, audit).await? {
            return Ok(DispatchOutcome::SetupRequired);
        }

        let draft_id = self
            .insert_fresh_draft(|| DraftEntity::Document(DocumentDraft::new(user_id.clone(), kind, now)))
            .await?;
        let first = WorkflowRegistry::first_document_step();
        let state = WorkflowState::new(
            user_id.clone(),
            draft_id.clone(),
            WorkflowData::Document(DocumentProgress {
                kind,
                step: first,
                fields: Default::default(),
            }),
            now,
            self.settings.draft_ttl(),
        );
        self.store_new_state(state, now).await?;

        self.services.audit.emit(
            audit
                .with_draft(&draft_id)
                .event("workflow.started", AuditCategory::Workflow, AuditOutcome::Success)
                .with_metadata("workflow", WorkflowType::DocumentDraft.as_str())
                .with_metadata("kind", kind.as_str()),
        );

        let prompt = WorkflowRegistry::document_step(first)
            .map(|definition| definition.render_prompt(kind))
            .unwrap_or_default();
        self.reply(
            user_id,
            &format!("Let's put together {} {draft_id}. Reply `cancel` at any time to stop.\n\n{prompt}", article(kind.as_str())),
            &[cancel_option(WorkflowType::DocumentDraft)],
        )
        .await?;
        Ok(DispatchOutcome::Started { workflow: WorkflowType::DocumentDraft, draft_id })
    }

    async fn start_transfer(
        &self,
        user_id: &UserId,
        kind: TransferKind,
        text: &str,
        active: &[WorkflowState],
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, ApplicationError> {
        let workflow = WorkflowType::for_transfer(kind);
        if let Some(existing) = active.iter().find(|state| state.workflow_type() == workflow) {
            return self.resume(existing, &audit.with_draft(&existing.draft_id), now).await;
        }
        if !self.has_resource(user_id, audit).await? {
            return Ok(DispatchOutcome::SetupRequired);
        }

        let draft_id = self
            .insert_fresh_draft(|| DraftEntity::Transfer(TransferIntent::new(user_id.clone(), kind, now)))
            .await?;
        let engine = FlowEngine::new(TransferFlow { kind });
        let state = WorkflowState::new(
            user_id.clone(),
            draft_id.clone(),
            WorkflowData::Transfer(TransferProgress {
                kind,
                phase: engine.initial_phase(),
                params: TransferParamsDraft::default(),
                quote: None,
            }),
            now,
            self.settings.transfer_ttl(),
        );
        self.store_new_state(state.clone(), now).await?;

        let audit = audit.with_draft(&draft_id);
        self.services.audit.emit(
            audit
                .event("workflow.started", AuditCategory::Workflow, AuditOutcome::Success)
                .with_metadata("workflow", workflow.as_str())
                .with_metadata("kind", kind.as_str()),
        );

        let params = parse_transfer_params(text, kind);
        let preface = format!("Starting {} {draft_id}.\n", kind.as_str());
        self.advance_transfer(&state, params, &preface, &audit, now).await
    }

    /// Draft ids carry a random serial, so an id already taken is redrawn.
    async fn insert_fresh_draft(
        &self,
        create: impl Fn() -> DraftEntity,
    ) -> Result<DraftId, ApplicationError> {
        let mut attempt = 1;
        loop {
            match self.services.drafts.insert_draft(create()).await {
                Ok(draft_id) => return Ok(draft_id),
                Err(StoreError::Conflict(_)) if attempt < DRAFT_ID_ATTEMPTS => attempt += 1,
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Persists a fresh state; on failure the just-created draft is cancelled so
    /// no orphaned draft is left behind.
    async fn store_new_state(&self, state: WorkflowState, now: DateTime<Utc>) -> Result<(), ApplicationError> {
        let draft_id = state.draft_id.clone();
        if let Err(error) = self.services.states.put(state).await {
            if self.services.drafts.set_status(&draft_id, DraftStatus::Cancelled, now).await.is_err() {
                return Err(ApplicationError::Persistence(format!(
                    "{error}; draft {draft_id} could not be cancelled either"
                )));
            }
            return Err(error.into());
        }
        Ok(())
    }

    async fn continue_workflow(
        &self,
        state: &WorkflowState,
        text: &str,
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, ApplicationError> {
        match &state.data {
            WorkflowData::Document(progress) => {
                let ctx = ValidationContext::new(now.date_naive(), self.settings.default_currency.clone());
                let outcome = self
                    .processor
                    .process(state, text, &ctx, self.settings.draft_ttl(), now, audit)
                    .await?;
                match outcome {
                    StepOutcome::Advanced { state: next, prompt } => {
                        self.reply(&state.user_id, &prompt, &[cancel_option(WorkflowType::DocumentDraft)])
                            .await?;
                        Ok(DispatchOutcome::Advanced {
                            draft_id: next.draft_id.clone(),
                            step: next.current_step_key(),
                        })
                    }
                    StepOutcome::Rejected { error, prompt } => {
                        self.reply(
                            &state.user_id,
                            &format!("{}\n\n{prompt}", error.message),
                            &[cancel_option(WorkflowType::DocumentDraft)],
                        )
                        .await?;
                        Ok(DispatchOutcome::Rejected { draft_id: state.draft_id.clone(), step: progress.step.key() })
                    }
                    StepOutcome::Completed { state: reviewed } => self.finalize(&reviewed, audit, now).await,
                }
            }
            WorkflowData::Transfer(progress) => {
                let mut parsed = parse_transfer_params(text, progress.kind);
                if parsed.is_empty() && progress.phase == TransferPhase::Collecting {
                    if let [only] = progress.params.missing(progress.kind).as_slice() {
                        parsed = parse_missing_param(text, only);
                    }
                }

                if parsed.is_empty() {
                    let guidance = match progress.phase {
                        TransferPhase::Collecting => format!(
                            "I didn't catch that. What's the {}?",
                            progress
                                .params
                                .missing(progress.kind)
                                .first()
                                .map_or("amount", |param| param_label(param))
                        ),
                        _ => "Reply `confirm` to go ahead or `cancel` to stop.".to_owned(),
                    };
                    self.reply(&state.user_id, &guidance, &self.transfer_options(state)).await?;
                    return Ok(DispatchOutcome::Replied);
                }

                let mut params = progress.params.clone();
                params.merge(parsed);
                self.advance_transfer(state, params, "", audit, now).await
            }
        }
    }

    async fn finalize(
        &self,
        state: &WorkflowState,
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, ApplicationError> {
        let finalized = match self.pipeline.finalize_document(state, audit, now).await {
            Ok(finalized) => finalized,
            Err(error @ ApplicationError::Collaborator { .. }) => {
                return self
                    .report(&state.user_id, audit, error, "Reply `continue` to try again.")
                    .await;
            }
            Err(error) => return Err(error),
        };

        let draft = &finalized.draft;
        let fields = &draft.fields;
        let client = fields.client_name.as_deref().unwrap_or("the client");
        let address = fields.client_email.as_deref().unwrap_or("their address");
        let amount = fields.amount.as_ref().map(ToString::to_string).unwrap_or_default();
        let due = fields.due_date.map(|date| date.to_string()).unwrap_or_default();
        let due_label = WorkflowRegistry::step_label(DocumentStep::DueDate, draft.kind);
        self.reply(
            &state.user_id,
            &format!(
                "Your {} {} is ready: {amount} for {client}, {due_label} {due}. Reply `send` to deliver it to {address}.",
                draft.kind.as_str(),
                draft.id
            ),
            &[ReplyOption::new("Send", ControlCommand::Send { draft_id: Some(draft.id.clone()) })],
        )
        .await?;
        Ok(DispatchOutcome::Finalized { draft_id: draft.id.clone() })
    }

    async fn send(
        &self,
        user_id: &UserId,
        draft_id: Option<DraftId>,
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, ApplicationError> {
        match self.pipeline.send_document(user_id, draft_id.as_ref(), audit, now).await {
            Ok(SendOutcome::Delivered { draft_id, address, reference }) => {
                self.reply(user_id, &format!("Sent {draft_id} to {address} (ref {reference})."), &[]).await?;
                Ok(DispatchOutcome::Sent { draft_id, duplicate: false })
            }
            Ok(SendOutcome::AlreadySent { draft_id, reference }) => {
                let reference = reference.map(|reference| format!(" (ref {reference})")).unwrap_or_default();
                self.reply(user_id, &format!("{draft_id} was already sent{reference}, so I didn't send it again."), &[])
                    .await?;
                Ok(DispatchOutcome::Sent { draft_id, duplicate: true })
            }
            Err(ApplicationError::Precondition(message)) => {
                self.reply(user_id, &message, &[]).await?;
                Ok(DispatchOutcome::Replied)
            }
            Err(error @ ApplicationError::Collaborator { .. }) => {
                self.report(user_id, audit, error, "The document is still waiting to be sent. Reply `send` to try again.")
                    .await
            }
            Err(error) => Err(error),
        }
    }

    async fn status(
        &self,
        user_id: &UserId,
        draft_id: Option<DraftId>,
        active: &[WorkflowState],
    ) -> Result<DispatchOutcome, ApplicationError> {
        let text = match draft_id {
            Some(id) => match self.services.drafts.get_draft(&id).await? {
                Some(entity) if entity.owner() == user_id => {
                    let mut line = format!("{id} ({}) is {}.", entity.entity_kind(), entity.status().as_str().replace('_', " "));
                    if let Some(receipt) = entity.as_transfer().and_then(|intent| intent.receipt.as_ref()) {
                        line.push_str(&format!(" Reference: {}.", receipt.reference));
                    }
                    line
                }
                _ => format!("I couldn't find {id}."),
            },
            None if active.is_empty() => "Nothing is in progress.".to_owned(),
            None => {
                let lines: Vec<String> = active
                    .iter()
                    .map(|state| {
                        format!("• {} {}: waiting for {}", workflow_label(state), state.draft_id, waiting_for(state))
                    })
                    .collect();
                format!("In progress:\n{}", lines.join("\n"))
            }
        };
        self.reply(user_id, &text, &[]).await?;
        Ok(DispatchOutcome::Replied)
    }

    async fn resume(
        &self,
        state: &WorkflowState,
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, ApplicationError> {
        let resumed = DispatchOutcome::Resumed { workflow: state.workflow_type(), draft_id: state.draft_id.clone() };
        match &state.data {
            WorkflowData::Document(progress) if progress.step == DocumentStep::Review => {
                self.finalize(state, audit, now).await
            }
            WorkflowData::Document(progress) => {
                let prompt = WorkflowRegistry::document_step(progress.step)
                    .map(|definition| definition.render_prompt(progress.kind))
                    .unwrap_or_default();
                self.reply(
                    &state.user_id,
                    &format!("Picking up your {} {} where we left off.\n\n{prompt}", progress.kind.as_str(), state.draft_id),
                    &[cancel_option(WorkflowType::DocumentDraft)],
                )
                .await?;
                Ok(resumed)
            }
            WorkflowData::Transfer(progress) => match (&progress.phase, &progress.quote) {
                (TransferPhase::Quoted | TransferPhase::Confirmed, Some(quote)) if !quote.is_expired(now) => {
                    let params = self.complete_params(state, progress.kind, &progress.params)?;
                    self.reply(
                        &state.user_id,
                        &format!(
                            "You have a quote waiting: {}, fee {} {}, you receive {} {}. Reply `confirm` or `cancel`.",
                            params.summary(),
                            quote.fee.normalize(),
                            quote.fee_token,
                            quote.receive_amount.normalize(),
                            quote.receive_token
                        ),
                        &self.transfer_options(state),
                    )
                    .await?;
                    Ok(resumed)
                }
                (TransferPhase::Collecting, _) => {
                    let outcome = self
                        .advance_transfer(state, progress.params.clone(), "Picking up where we left off. ", audit, now)
                        .await?;
                    Ok(match outcome {
                        DispatchOutcome::AwaitingParams { .. } => resumed,
                        other => other,
                    })
                }
                _ => {
                    self.advance_transfer(state, progress.params.clone(), "Your quote expired, so here's a fresh one.\n", audit, now)
                        .await
                }
            },
        }
    }

    async fn cancel(
        &self,
        state: &WorkflowState,
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, ApplicationError> {
        if let Some(progress) = state.transfer() {
            FlowEngine::new(TransferFlow { kind: progress.kind })
                .apply_with_audit(
                    progress.phase,
                    TransferEvent::CancelRequested,
                    &TransferContext::default(),
                    self.services.audit.as_ref(),
                    audit,
                )
                .map_err(DomainError::from)?;
        }

        self.discard(state, DraftStatus::Cancelled, now).await?;
        self.services.audit.emit(
            audit
                .event("workflow.cancelled", AuditCategory::Workflow, AuditOutcome::Success)
                .with_metadata("workflow", state.workflow_type().as_str())
                .with_metadata("step", state.current_step_key()),
        );
        self.reply(
            &state.user_id,
            &format!("Cancelled your {} {}. Nothing was sent.", workflow_label(state), state.draft_id),
            &[],
        )
        .await?;
        Ok(DispatchOutcome::Cancelled { workflow: state.workflow_type(), draft_id: state.draft_id.clone() })
    }

    /// Deletes the state and moves its draft to `status` when the lifecycle allows.
    async fn discard(
        &self,
        state: &WorkflowState,
        status: DraftStatus,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        if let Some(mut entity) = self.services.drafts.get_draft(&state.draft_id).await? {
            if entity.can_transition_to(status) {
                entity.transition_to(status, now)?;
                self.services.drafts.update_draft(entity).await?;
            }
        }
        self.services.states.delete(&state.user_id, state.workflow_type()).await?;
        Ok(())
    }

    /// Stores merged parameters, then either asks for what's missing or
    /// requests a quote.
    async fn advance_transfer(
        &self,
        state: &WorkflowState,
        params: TransferParamsDraft,
        preface: &str,
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, ApplicationError> {
        let progress = state.transfer().ok_or_else(|| {
            DomainError::InvariantViolation(format!("{} is not a transfer workflow", state.draft_id))
        })?;
        let kind = progress.kind;

        let mut entity = self.load_draft(&state.draft_id).await?;
        if let DraftEntity::Transfer(intent) = &mut entity {
            intent.params = params.clone();
            intent.updated_at = now;
        }
        self.services.drafts.update_draft(entity).await?;

        let mut updated = state.clone();
        let mut next = progress.clone();
        next.params = params.clone();
        updated.data = WorkflowData::Transfer(next);
        updated.touch(now, self.settings.transfer_ttl());
        self.services.states.put(updated.clone()).await?;

        let missing = params.missing(kind);
        if let Some(first) = missing.first() {
            self.reply(
                &state.user_id,
                &format!("{preface}What's the {}?", param_label(first)),
                &[cancel_option(updated.workflow_type())],
            )
            .await?;
            return Ok(DispatchOutcome::AwaitingParams { draft_id: state.draft_id.clone(), missing });
        }

        let complete = self.complete_params(&updated, kind, &params)?;
        self.quote(&updated, &complete, preface, audit, now).await
    }

    fn complete_params(
        &self,
        state: &WorkflowState,
        kind: TransferKind,
        params: &TransferParamsDraft,
    ) -> Result<TransferParams, ApplicationError> {
        params.complete(kind, &self.settings.default_currency).ok_or_else(|| {
            DomainError::InvariantViolation(format!("{} has incomplete parameters", state.draft_id)).into()
        })
    }

    async fn quote(
        &self,
        state: &WorkflowState,
        params: &TransferParams,
        preface: &str,
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, ApplicationError> {
        let progress = state.transfer().ok_or_else(|| {
            DomainError::InvariantViolation(format!("{} is not a transfer workflow", state.draft_id))
        })?;

        let mut quote = match self.services.execution.quote(params, now).await {
            Ok(quote) => quote,
            Err(error) => {
                let error = ApplicationError::collaborator(CollaboratorStage::Quote, error.to_string());
                return self
                    .report(&state.user_id, audit, error, "Reply `continue` to ask for a quote again.")
                    .await;
            }
        };
        quote.expires_at = quote.expires_at.min(now + self.settings.quote_ttl());

        let engine = FlowEngine::new(TransferFlow { kind: progress.kind });
        let outcome = engine
            .apply_with_audit(
                progress.phase,
                TransferEvent::QuoteIssued,
                &TransferContext::default(),
                self.services.audit.as_ref(),
                audit,
            )
            .map_err(DomainError::from)?;

        let mut entity = self.load_draft(&state.draft_id).await?;
        if let DraftEntity::Transfer(intent) = &mut entity {
            intent.quote = Some(quote.clone());
        }
        if entity.status() != DraftStatus::Quoted {
            entity.transition_to(DraftStatus::Quoted, now)?;
        }
        self.services.drafts.update_draft(entity).await?;

        let mut updated = state.clone();
        let mut next = progress.clone();
        next.phase = outcome.to;
        next.quote = Some(quote.clone());
        updated.data = WorkflowData::Transfer(next);
        updated.touch(now, self.settings.transfer_ttl());
        self.services.states.put(updated.clone()).await?;

        let seconds = (quote.expires_at - now).num_seconds().max(0);
        self.reply(
            &state.user_id,
            &format!(
                "{preface}Quote: {}. Rate {}, fee {} {}, you receive {} {}. Valid for {seconds}s. Reply `confirm` to go ahead or `cancel` to stop.",
                params.summary(),
                quote.rate.normalize(),
                quote.fee.normalize(),
                quote.fee_token,
                quote.receive_amount.normalize(),
                quote.receive_token
            ),
            &self.transfer_options(&updated),
        )
        .await?;
        Ok(DispatchOutcome::Quoted { draft_id: state.draft_id.clone() })
    }

    async fn confirm(
        &self,
        state: &WorkflowState,
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, ApplicationError> {
        let progress = state.transfer().ok_or_else(|| {
            DomainError::InvariantViolation(format!("{} is not a transfer workflow", state.draft_id))
        })?;

        let quote = match (&progress.phase, &progress.quote) {
            (TransferPhase::Collecting, _) => {
                let missing = progress.params.missing(progress.kind);
                let needed = missing.first().map_or("a quote", |param| param_label(param));
                self.reply(
                    &state.user_id,
                    &format!("There's nothing to confirm yet. I still need the {needed}."),
                    &[cancel_option(state.workflow_type())],
                )
                .await?;
                return Ok(DispatchOutcome::AwaitingParams { draft_id: state.draft_id.clone(), missing });
            }
            (_, Some(quote)) if quote.is_expired(now) => {
                self.services.audit.emit(
                    audit.event("transfer.quote_expired", AuditCategory::Transfer, AuditOutcome::Rejected),
                );
                return self
                    .advance_transfer(
                        state,
                        progress.params.clone(),
                        "That quote expired, so I fetched a fresh one.\n",
                        audit,
                        now,
                    )
                    .await;
            }
            (_, Some(quote)) => quote.clone(),
            (_, None) => {
                return Err(DomainError::InvariantViolation(format!(
                    "{} is {} without a quote",
                    state.draft_id,
                    progress.phase.as_str()
                ))
                .into())
            }
        };
        let params = self.complete_params(state, progress.kind, &progress.params)?;

        let engine = FlowEngine::new(TransferFlow { kind: progress.kind });
        let mut confirmed = state.clone();
        if progress.phase == TransferPhase::Quoted {
            let outcome = engine
                .apply_with_audit(
                    progress.phase,
                    TransferEvent::ConfirmRequested,
                    &TransferContext::default(),
                    self.services.audit.as_ref(),
                    audit,
                )
                .map_err(DomainError::from)?;

            let mut entity = self.load_draft(&state.draft_id).await?;
            entity.transition_to(DraftStatus::Confirmed, now)?;
            self.services.drafts.update_draft(entity).await?;

            let mut next = progress.clone();
            next.phase = outcome.to;
            confirmed.data = WorkflowData::Transfer(next);
            confirmed.touch(now, self.settings.transfer_ttl());
            self.services.states.put(confirmed.clone()).await?;
        } else {
            engine
                .apply_with_audit(
                    progress.phase,
                    TransferEvent::RetryRequested,
                    &TransferContext::default(),
                    self.services.audit.as_ref(),
                    audit,
                )
                .map_err(DomainError::from)?;
        }

        match self.pipeline.execute_transfer(&confirmed, &params, &quote, audit, now).await {
            Ok(ExecutionOutcome::Executed { draft_id, receipt }) => {
                engine
                    .apply_with_audit(
                        TransferPhase::Confirmed,
                        TransferEvent::ExecutionSucceeded,
                        &TransferContext::default(),
                        self.services.audit.as_ref(),
                        audit,
                    )
                    .map_err(DomainError::from)?;
                self.reply(
                    &state.user_id,
                    &format!("Done: {}. Reference {}.", params.summary(), receipt.reference),
                    &[],
                )
                .await?;
                Ok(DispatchOutcome::Executed { draft_id, reference: receipt.reference })
            }
            Ok(ExecutionOutcome::Rejected { draft_id, receipt }) => {
                engine
                    .apply_with_audit(
                        TransferPhase::Confirmed,
                        TransferEvent::ExecutionRejected,
                        &TransferContext::default(),
                        self.services.audit.as_ref(),
                        audit,
                    )
                    .map_err(DomainError::from)?;
                self.reply(
                    &state.user_id,
                    &format!(
                        "The {} was rejected: {}. No funds moved.",
                        progress.kind.as_str(),
                        receipt.detail.as_deref().unwrap_or("no reason given")
                    ),
                    &[],
                )
                .await?;
                Ok(DispatchOutcome::ExecutionRejected { draft_id })
            }
            Err(error @ ApplicationError::Collaborator { .. }) => {
                let retry = ReplyOption::new("Retry", ControlCommand::Retry { workflow: Some(state.workflow_type()) });
                self.report_with_options(
                    &state.user_id,
                    audit,
                    error,
                    "Reply `retry` to try again.",
                    &[retry, cancel_option(state.workflow_type())],
                )
                .await
            }
            Err(error) => Err(error),
        }
    }

    fn transfer_options(&self, state: &WorkflowState) -> Vec<ReplyOption> {
        let workflow = state.workflow_type();
        match state.transfer().map(|progress| progress.phase) {
            Some(TransferPhase::Quoted | TransferPhase::Confirmed) => vec![
                ReplyOption::new("Confirm", ControlCommand::Confirm { workflow: Some(workflow) }),
                cancel_option(workflow),
            ],
            _ => vec![cancel_option(workflow)],
        }
    }

    async fn load_draft(&self, id: &DraftId) -> Result<DraftEntity, ApplicationError> {
        self.services
            .drafts
            .get_draft(id)
            .await?
            .ok_or_else(|| DomainError::InvariantViolation(format!("draft {id} is missing")).into())
    }

    async fn reply(&self, user_id: &UserId, text: &str, options: &[ReplyOption]) -> Result<(), ApplicationError> {
        self.services
            .replies
            .prompt(user_id, text, options)
            .await
            .map_err(|error| ApplicationError::collaborator(CollaboratorStage::Reply, error.to_string()))
    }

    async fn report(
        &self,
        user_id: &UserId,
        audit: &AuditContext,
        error: ApplicationError,
        hint: &str,
    ) -> Result<DispatchOutcome, ApplicationError> {
        self.report_with_options(user_id, audit, error, hint, &[]).await
    }

    async fn report_with_options(
        &self,
        user_id: &UserId,
        audit: &AuditContext,
        error: ApplicationError,
        hint: &str,
        options: &[ReplyOption],
    ) -> Result<DispatchOutcome, ApplicationError> {
        let interface = error.clone().into_interface(audit.correlation_id.clone());
        self.services.audit.emit(
            audit
                .event("dispatch.failed", AuditCategory::System, AuditOutcome::Failed)
                .with_metadata("error", error.to_string()),
        );

        let mut text = failure_text(&error, &interface);
        if !hint.is_empty() {
            text.push(' ');
            text.push_str(hint);
        }
        // A failing reply sink cannot be reported to the user.
        if !matches!(error, ApplicationError::Collaborator { stage: CollaboratorStage::Reply, .. }) {
            self.reply(user_id, &text, options).await?;
        }
        Ok(DispatchOutcome::Failed { error: interface })
    }
}

fn article(noun: &str) -> &'static str {
    match noun.chars().next() {
        Some('a' | 'e' | 'i' | 'o' | 'u') => "an",
        _ => "a",
    }
}
