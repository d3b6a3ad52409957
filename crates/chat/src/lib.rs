//! Chat transport boundary: decodes inbound envelopes and button payloads into
//! engine messages and renders engine prompts back into message templates.

pub mod actions;
pub mod blocks;
pub mod events;
pub mod outbox;
pub mod runner;

pub use actions::{decode_command, encode_command, ActionValueError};
pub use blocks::{reply_message, ButtonElement, MessageBuilder, MessageTemplate};
pub use events::{
    workflow_dispatcher, ChatEnvelope, ChatEvent, EventContext, EventDispatcher, HandlerResult,
};
pub use outbox::{OutboundMessage, OutboxReplySink};
pub use runner::{
    transport_for, ChatRunner, ChatTransport, ConsoleTransport, NoopTransport, ReconnectPolicy,
    TransportError, DEFAULT_CONSOLE_USER,
};
