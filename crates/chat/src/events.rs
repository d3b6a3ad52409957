use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use steward_core::{DispatchOutcome, Dispatcher, InboundMessage, UserId};
use thiserror::Error;
use tracing::warn;

use crate::actions::decode_command;
use crate::blocks::{invalid_action_message, MessageTemplate};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEnvelope {
    pub envelope_id: String,
    pub event: ChatEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    Message(MessageEvent),
    Action(ActionEvent),
    Unsupported { event_type: String },
}

impl ChatEvent {
    pub fn event_type(&self) -> ChatEventType {
        match self {
            Self::Message(_) => ChatEventType::Message,
            Self::Action(_) => ChatEventType::Action,
            Self::Unsupported { .. } => ChatEventType::Unsupported,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Message(event) => Some(&event.user_id),
            Self::Action(event) => Some(&event.user_id),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChatEventType {
    Message,
    Action,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub user_id: String,
    pub text: String,
}

/// A button press. `value` is the raw payload the button was built with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionEvent {
    pub user_id: String,
    pub action_id: Option<String>,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    /// The engine handled the message; its replies went through the reply sink.
    Dispatched(DispatchOutcome),
    /// The handler answered directly without involving the engine.
    Responded(MessageTemplate),
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("{0} event has no user id")]
    MissingUser(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> ChatEventType;
    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<ChatEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Routes text messages and button presses into the workflow engine.
pub fn workflow_dispatcher(engine: Arc<Dispatcher>) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(MessageHandler::new(engine.clone()));
    dispatcher.register(ActionHandler::new(engine));
    dispatcher
}

fn user_id(raw: &str, kind: &'static str) -> Result<UserId, EventHandlerError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EventHandlerError::MissingUser(kind));
    }
    Ok(UserId(trimmed.to_owned()))
}

pub struct MessageHandler {
    engine: Arc<Dispatcher>,
}

impl MessageHandler {
    pub fn new(engine: Arc<Dispatcher>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EventHandler for MessageHandler {
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Message
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Message(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        let user = user_id(&event.user_id, "message")?;

        let message = InboundMessage::text(user, ctx.correlation_id.clone(), event.text.clone());
        Ok(HandlerResult::Dispatched(self.engine.handle(message).await))
    }
}

pub struct ActionHandler {
    engine: Arc<Dispatcher>,
}

impl ActionHandler {
    pub fn new(engine: Arc<Dispatcher>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EventHandler for ActionHandler {
    fn event_type(&self) -> ChatEventType {
        ChatEventType::Action
    }

    async fn handle(
        &self,
        envelope: &ChatEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChatEvent::Action(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        let user = user_id(&event.user_id, "action")?;

        let command = match decode_command(&event.value) {
            Ok(command) => command,
            Err(error) => {
                warn!(
                    event_name = "ingress.action_rejected",
                    correlation_id = %ctx.correlation_id,
                    user_id = %user,
                    action_id = event.action_id.as_deref().unwrap_or("unknown"),
                    error = %error,
                    "undecodable action payload"
                );
                return Ok(HandlerResult::Responded(invalid_action_message(
                    &error.to_string(),
                    &ctx.correlation_id,
                )));
            }
        };

        let message = InboundMessage::control(user, ctx.correlation_id.clone(), command);
        Ok(HandlerResult::Dispatched(self.engine.handle(message).await))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use steward_core::collaborators::{
        DeterministicExecutionClient, PlainTextRenderer, RecordingDeliveryChannel,
        RecordingReplySink, StaticResourceDirectory,
    };
    use steward_core::config::WorkflowConfig;
    use steward_core::store::{InMemoryCompletionLedger, InMemoryDraftRepository, InMemoryStateStore};
    use steward_core::{
        DispatchOutcome, Dispatcher, InMemoryAuditSink, Services, UserId, WorkflowType,
    };

    use super::{
        workflow_dispatcher, ActionEvent, ChatEnvelope, ChatEvent, DispatchError, EventContext,
        EventHandlerError, HandlerResult, MessageEvent,
    };

    fn engine(replies: Arc<RecordingReplySink>) -> Arc<Dispatcher> {
        let services = Services {
            states: Arc::new(InMemoryStateStore::default()),
            drafts: Arc::new(InMemoryDraftRepository::default()),
            ledger: Arc::new(InMemoryCompletionLedger::default()),
            resources: Arc::new(StaticResourceDirectory::with_users([UserId("U1".to_owned())])),
            renderer: Arc::new(PlainTextRenderer::default()),
            delivery: Arc::new(RecordingDeliveryChannel::default()),
            execution: Arc::new(DeterministicExecutionClient::new(Duration::seconds(120))),
            replies,
            audit: Arc::new(InMemoryAuditSink::default()),
        };
        Arc::new(Dispatcher::new(services, WorkflowConfig::default()))
    }

    fn message(user: &str, text: &str) -> ChatEnvelope {
        ChatEnvelope {
            envelope_id: "env-1".to_owned(),
            event: ChatEvent::Message(MessageEvent { user_id: user.to_owned(), text: text.to_owned() }),
        }
    }

    fn action(value: &str) -> ChatEnvelope {
        ChatEnvelope {
            envelope_id: "env-2".to_owned(),
            event: ChatEvent::Action(ActionEvent {
                user_id: "U1".to_owned(),
                action_id: Some("workflow.cancel.v1".to_owned()),
                value: value.to_owned(),
            }),
        }
    }

    #[tokio::test]
    async fn text_messages_start_workflows() {
        let replies = Arc::new(RecordingReplySink::default());
        let dispatcher = workflow_dispatcher(engine(replies.clone()));
        assert_eq!(dispatcher.handler_count(), 2);

        let result = dispatcher
            .dispatch(&message("U1", "create an invoice"), &EventContext::default())
            .await
            .expect("dispatch");

        assert!(matches!(
            result,
            HandlerResult::Dispatched(DispatchOutcome::Started { workflow: WorkflowType::DocumentDraft, .. })
        ));
        assert_eq!(replies.replies().len(), 1);
    }

    #[tokio::test]
    async fn button_presses_reach_the_engine_as_commands() {
        let replies = Arc::new(RecordingReplySink::default());
        let dispatcher = workflow_dispatcher(engine(replies.clone()));
        let ctx = EventContext { correlation_id: "env-1".to_owned() };
        dispatcher.dispatch(&message("U1", "create an invoice"), &ctx).await.expect("start");

        let result = dispatcher
            .dispatch(&action("action=cancel;flow=document_draft"), &ctx)
            .await
            .expect("dispatch");

        assert!(matches!(
            result,
            HandlerResult::Dispatched(DispatchOutcome::Cancelled { workflow: WorkflowType::DocumentDraft, .. })
        ));
    }

    #[tokio::test]
    async fn tampered_payloads_are_answered_without_touching_the_engine() {
        let replies = Arc::new(RecordingReplySink::default());
        let dispatcher = workflow_dispatcher(engine(replies.clone()));

        let result = dispatcher
            .dispatch(&action("action=cancel;action=confirm"), &EventContext::default())
            .await
            .expect("dispatch");

        let HandlerResult::Responded(template) = result else {
            panic!("expected a direct response");
        };
        assert!(template.fallback_text.contains("more than once"));
        assert!(replies.replies().is_empty());
    }

    #[tokio::test]
    async fn blank_users_and_unsupported_events() {
        let dispatcher = workflow_dispatcher(engine(Arc::new(RecordingReplySink::default())));

        let error = dispatcher
            .dispatch(&message("  ", "help"), &EventContext::default())
            .await
            .expect_err("blank user");
        assert_eq!(error, DispatchError::Handler(EventHandlerError::MissingUser("message")));

        let unsupported = ChatEnvelope {
            envelope_id: "env-3".to_owned(),
            event: ChatEvent::Unsupported { event_type: "reaction".to_owned() },
        };
        assert_eq!(
            dispatcher.dispatch(&unsupported, &EventContext::default()).await,
            Ok(HandlerResult::Ignored)
        );
    }
}
