pub mod ambiguity;
pub mod audit;
pub mod collaborators;
pub mod command;
pub mod completion;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod store;
pub mod sweep;

pub use ambiguity::{classify, Classification, ClassifierContext, FieldHint, InterruptionReason};
pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use collaborators::{
    CollaboratorError, DeliveryChannel, DeliveryReceipt, DocumentRenderer, ExecutionClient,
    RenderedArtifact, ReplySink, ResourceCheck, Services,
};
pub use command::{ControlCommand, Inbound, InboundMessage, ReplyOption};
pub use completion::{CompletionPipeline, ExecutionOutcome, SendOutcome};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use domain::draft::{DocumentDraft, DocumentKind, DraftEntity, DraftId, DraftStatus};
pub use domain::transfer::{TransferIntent, TransferKind, TransferPhase};
pub use domain::workflow::{UserId, WorkflowState, WorkflowType};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use store::{CompletionLedger, DraftRepository, StoreError, WorkflowStateStore};
pub use sweep::{ExpirySweeper, SweepReport};
