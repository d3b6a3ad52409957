pub mod processor;
pub mod registry;
pub mod transfer;
pub mod validators;

pub use processor::{StepOutcome, StepProcessor};
pub use registry::{FieldValue, NextStep, StepDefinition, WorkflowRegistry};
pub use transfer::{
    FlowDefinition, FlowEngine, FlowTransitionError, TransferAction, TransferContext,
    TransferEvent, TransferFlow, TransitionOutcome,
};
pub use validators::ValidationContext;
