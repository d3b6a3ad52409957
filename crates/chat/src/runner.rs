use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use steward_core::config::ChatTransportKind;
use steward_core::UserId;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::events::{
    ActionEvent, ChatEnvelope, ChatEvent, EventContext, EventDispatcher, HandlerResult, MessageEvent,
};
use crate::outbox::{OutboundMessage, OutboxReplySink};

/// User id the console transport speaks as until `/user` switches it.
pub const DEFAULT_CONSOLE_USER: &str = "console";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 1_u64 << attempt.min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms))
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// `None` means the stream closed cleanly.
    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl ChatTransport for NoopTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, _message: &OutboundMessage) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct ConsoleState<R, W> {
    reader: R,
    writer: W,
    user_id: String,
    sequence: u64,
}

/// Line-oriented transport for local use.
///
/// Plain lines are messages from the current user. `/action <payload>` presses a
/// button, `/user <id>` switches who is speaking and `/quit` closes the stream.
pub struct ConsoleTransport<R, W> {
    state: Mutex<ConsoleState<R, W>>,
}

impl ConsoleTransport<BufReader<Stdin>, Stdout> {
    pub fn stdio(user_id: impl Into<String>) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), user_id)
    }
}

impl<R, W> ConsoleTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, user_id: impl Into<String>) -> Self {
        Self { state: Mutex::new(ConsoleState { reader, writer, user_id: user_id.into(), sequence: 0 }) }
    }

    async fn write_line(state: &mut ConsoleState<R, W>, line: &str) -> Result<(), TransportError> {
        state
            .writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|error| TransportError::Send(error.to_string()))?;
        state.writer.flush().await.map_err(|error| TransportError::Send(error.to_string()))
    }
}

impl<R> ConsoleTransport<R, Vec<u8>> {
    pub async fn output(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().await.writer).into_owned()
    }
}

#[async_trait]
impl<R, W> ChatTransport for ConsoleTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn connect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        let banner = format!("steward console; speaking as {}. Type `help` or /quit.", state.user_id);
        Self::write_line(&mut state, &banner).await
    }

    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        let mut state = self.state.lock().await;
        loop {
            let mut line = String::new();
            let read = state
                .reader
                .read_line(&mut line)
                .await
                .map_err(|error| TransportError::Receive(error.to_string()))?;
            if read == 0 {
                return Ok(None);
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if matches!(line, "/quit" | "/exit") {
                return Ok(None);
            }
            if let Some(user) = line.strip_prefix("/user ") {
                state.user_id = user.trim().to_owned();
                let notice = format!("now speaking as {}", state.user_id);
                Self::write_line(&mut state, &notice).await?;
                continue;
            }

            state.sequence += 1;
            let envelope_id = format!("console-{}", state.sequence);
            let user_id = state.user_id.clone();
            let event = match line.strip_prefix("/action ") {
                Some(value) => ChatEvent::Action(ActionEvent {
                    user_id,
                    action_id: None,
                    value: value.trim().to_owned(),
                }),
                None => ChatEvent::Message(MessageEvent { user_id, text: line.to_owned() }),
            };
            return Ok(Some(ChatEnvelope { envelope_id, event }));
        }
    }

    async fn acknowledge(&self, _envelope_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        let rendered = format!("@{}: {}", message.user_id, message.template.render_plain());
        Self::write_line(&mut state, &rendered).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        Self::write_line(&mut state, "bye").await
    }
}

pub fn transport_for(kind: ChatTransportKind) -> Arc<dyn ChatTransport> {
    match kind {
        ChatTransportKind::Console => Arc::new(ConsoleTransport::stdio(DEFAULT_CONSOLE_USER)),
        ChatTransportKind::Noop => Arc::new(NoopTransport),
    }
}

/// Pulls envelopes one at a time, hands each to the event dispatcher and
/// flushes queued replies before reading the next.
pub struct ChatRunner {
    transport: Arc<dyn ChatTransport>,
    dispatcher: EventDispatcher,
    outbox: Arc<OutboxReplySink>,
    reconnect_policy: ReconnectPolicy,
}

impl ChatRunner {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        dispatcher: EventDispatcher,
        outbox: Arc<OutboxReplySink>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, outbox, reconnect_policy }
    }

    pub async fn start(&self) -> Result<()> {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(transport_error) => {
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "chat transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "chat transport retries exhausted; continuing without chat ingress"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), TransportError> {
        info!(attempt, "opening chat transport");
        self.transport.connect().await?;
        info!(attempt, "chat transport connected");

        loop {
            let Some(envelope) = self.transport.next_envelope().await? else {
                info!(attempt, "chat transport stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };
            let user_id = envelope.event.user_id().unwrap_or("unknown").to_owned();

            info!(
                event_name = "ingress.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                user_id = %user_id,
                "received chat envelope"
            );

            if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
                warn!(
                    event_name = "ingress.ack_sent",
                    correlation_id = %envelope.envelope_id,
                    error = %error,
                    "failed to acknowledge chat envelope"
                );
            }

            let context = EventContext { correlation_id: envelope.envelope_id.clone() };
            match self.dispatcher.dispatch(&envelope, &context).await {
                Ok(HandlerResult::Dispatched(outcome)) => debug!(
                    event_name = "ingress.dispatched",
                    correlation_id = %envelope.envelope_id,
                    user_id = %user_id,
                    outcome = ?outcome,
                    "envelope dispatched"
                ),
                Ok(HandlerResult::Responded(template)) => self.outbox.push(OutboundMessage {
                    user_id: UserId(user_id.clone()),
                    correlation_id: None,
                    template,
                }),
                Ok(HandlerResult::Ignored) => debug!(
                    event_name = "ingress.ignored",
                    correlation_id = %envelope.envelope_id,
                    "no handler for envelope"
                ),
                Err(error) => warn!(
                    correlation_id = %envelope.envelope_id,
                    user_id = %user_id,
                    error = %error,
                    "event dispatch failed; continuing chat loop"
                ),
            }

            self.flush(&envelope.envelope_id).await;
        }
    }

    async fn flush(&self, correlation_id: &str) {
        for mut message in self.outbox.drain() {
            message.correlation_id.get_or_insert_with(|| correlation_id.to_owned());
            if let Err(error) = self.transport.send(&message).await {
                warn!(
                    event_name = "egress.send_failed",
                    correlation_id = %correlation_id,
                    user_id = %message.user_id,
                    error = %error,
                    "failed to deliver reply"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use steward_core::collaborators::{
        DeterministicExecutionClient, PlainTextRenderer, RecordingDeliveryChannel,
        StaticResourceDirectory,
    };
    use steward_core::config::WorkflowConfig;
    use steward_core::store::{InMemoryCompletionLedger, InMemoryDraftRepository, InMemoryStateStore};
    use steward_core::{Dispatcher, InMemoryAuditSink, Services, UserId};
    use tokio::sync::Mutex;

    use super::{ChatRunner, ChatTransport, ConsoleTransport, ReconnectPolicy, TransportError};
    use crate::events::{workflow_dispatcher, ChatEnvelope, ChatEvent, EventDispatcher, MessageEvent};
    use crate::outbox::{OutboundMessage, OutboxReplySink};

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        envelopes: VecDeque<Result<Option<ChatEnvelope>, TransportError>>,
        connect_attempts: usize,
        acknowledgements: Vec<String>,
        sent: Vec<OutboundMessage>,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            envelopes: Vec<Result<Option<ChatEnvelope>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    envelopes: envelopes.into(),
                    ..ScriptedState::default()
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn acknowledgements(&self) -> Vec<String> {
            self.state.lock().await.acknowledgements.clone()
        }

        async fn sent(&self) -> Vec<OutboundMessage> {
            self.state.lock().await.sent.clone()
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
            self.state.lock().await.envelopes.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
            self.state.lock().await.acknowledgements.push(envelope_id.to_owned());
            Ok(())
        }

        async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
            self.state.lock().await.sent.push(message.clone());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn no_delay(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    fn engine(outbox: Arc<OutboxReplySink>) -> EventDispatcher {
        let services = Services {
            states: Arc::new(InMemoryStateStore::default()),
            drafts: Arc::new(InMemoryDraftRepository::default()),
            ledger: Arc::new(InMemoryCompletionLedger::default()),
            resources: Arc::new(StaticResourceDirectory::with_users([
                UserId("U1".to_owned()),
                UserId("console".to_owned()),
            ])),
            renderer: Arc::new(PlainTextRenderer::default()),
            delivery: Arc::new(RecordingDeliveryChannel::default()),
            execution: Arc::new(
                DeterministicExecutionClient::new(Duration::seconds(120))
                    .with_rate("USDC", "SOL", Decimal::new(5, 3)),
            ),
            replies: outbox,
            audit: Arc::new(InMemoryAuditSink::default()),
        };
        workflow_dispatcher(Arc::new(Dispatcher::new(services, WorkflowConfig::default())))
    }

    fn text(envelope_id: &str, text: &str) -> Result<Option<ChatEnvelope>, TransportError> {
        Ok(Some(ChatEnvelope {
            envelope_id: envelope_id.to_owned(),
            event: ChatEvent::Message(MessageEvent { user_id: "U1".to_owned(), text: text.to_owned() }),
        }))
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![
                Ok(Some(ChatEnvelope {
                    envelope_id: "env-1".to_owned(),
                    event: ChatEvent::Unsupported { event_type: "typing".to_owned() },
                })),
                Ok(None),
            ],
        ));

        let runner = ChatRunner::new(
            transport.clone(),
            EventDispatcher::default(),
            Arc::new(OutboxReplySink::default()),
            no_delay(2),
        );
        runner.start().await.expect("runner should not fail");

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.acknowledgements().await, vec!["env-1"]);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));

        let runner = ChatRunner::new(
            transport.clone(),
            EventDispatcher::default(),
            Arc::new(OutboxReplySink::default()),
            no_delay(2),
        );
        runner.start().await.expect("runner should degrade gracefully");

        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn replies_are_flushed_after_each_envelope_with_its_correlation_id() {
        let outbox = Arc::new(OutboxReplySink::default());
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![],
            vec![text("env-1", "swap 100 USDC for SOL"), text("env-2", "confirm"), Ok(None)],
        ));

        let runner = ChatRunner::new(transport.clone(), engine(outbox.clone()), outbox.clone(), no_delay(0));
        runner.start().await.expect("run");

        let sent = transport.sent().await;
        assert!(sent.len() >= 2);
        assert_eq!(sent[0].correlation_id.as_deref(), Some("env-1"));
        assert!(sent[0].template.buttons().any(|button| button.value.starts_with("action=confirm")));
        assert_eq!(sent.last().and_then(|message| message.correlation_id.as_deref()), Some("env-2"));
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn console_transport_reads_messages_actions_and_user_switches() {
        let input = "help\n\n/user U1\n/action action=cancel\n/quit\nignored\n";
        let console = ConsoleTransport::new(input.as_bytes(), Vec::new(), "console");

        let first = console.next_envelope().await.expect("read").expect("envelope");
        assert_eq!(first.envelope_id, "console-1");
        assert_eq!(
            first.event,
            ChatEvent::Message(MessageEvent { user_id: "console".to_owned(), text: "help".to_owned() })
        );

        let second = console.next_envelope().await.expect("read").expect("envelope");
        let ChatEvent::Action(action) = second.event else {
            panic!("expected an action");
        };
        assert_eq!(action.user_id, "U1");
        assert_eq!(action.value, "action=cancel");

        assert_eq!(console.next_envelope().await.expect("read"), None);
        assert!(console.output().await.contains("now speaking as U1"));
    }

    #[tokio::test]
    async fn console_session_runs_end_to_end() {
        let outbox = Arc::new(OutboxReplySink::default());
        let console = Arc::new(ConsoleTransport::new(
            "create an invoice\n/action action=cancel;flow=document_draft\n".as_bytes(),
            Vec::new(),
            "console",
        ));

        let runner = ChatRunner::new(console.clone(), engine(outbox.clone()), outbox, no_delay(0));
        runner.start().await.expect("run");

        let output = console.output().await;
        assert!(output.starts_with("steward console; speaking as console."));
        assert!(output.contains("@console: "));
        assert!(output.contains("/action action=cancel;flow=document_draft"));
        assert!(output.trim_end().ends_with("bye"));
    }
}
