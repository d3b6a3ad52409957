use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::draft::DraftId;
use crate::domain::workflow::{UserId, WorkflowType};

/// Workflow control decoded once at the transport boundary or recognized from a
/// bare control word.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlCommand {
    Cancel { workflow: Option<WorkflowType> },
    Continue { workflow: Option<WorkflowType> },
    Confirm { workflow: Option<WorkflowType> },
    Retry { workflow: Option<WorkflowType> },
    Send { draft_id: Option<DraftId> },
}

impl ControlCommand {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Cancel { .. } => "cancel",
            Self::Continue { .. } => "continue",
            Self::Confirm { .. } => "confirm",
            Self::Retry { .. } => "retry",
            Self::Send { .. } => "send",
        }
    }

    pub fn workflow(&self) -> Option<WorkflowType> {
        match self {
            Self::Cancel { workflow }
            | Self::Continue { workflow }
            | Self::Confirm { workflow }
            | Self::Retry { workflow } => *workflow,
            Self::Send { .. } => None,
        }
    }

    /// Builds a command from its action name. `Send` ignores `workflow`.
    pub fn from_action(
        action: &str,
        workflow: Option<WorkflowType>,
        draft_id: Option<DraftId>,
    ) -> Option<Self> {
        match action.trim().to_ascii_lowercase().as_str() {
            "cancel" => Some(Self::Cancel { workflow }),
            "continue" => Some(Self::Continue { workflow }),
            "confirm" => Some(Self::Confirm { workflow }),
            "retry" => Some(Self::Retry { workflow }),
            "send" => Some(Self::Send { draft_id }),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Control(ControlCommand),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub user_id: UserId,
    pub correlation_id: String,
    pub received_at: DateTime<Utc>,
    pub payload: Inbound,
}

impl InboundMessage {
    pub fn text(user_id: UserId, correlation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id,
            correlation_id: correlation_id.into(),
            received_at: Utc::now(),
            payload: Inbound::Text(text.into()),
        }
    }

    pub fn control(
        user_id: UserId,
        correlation_id: impl Into<String>,
        command: ControlCommand,
    ) -> Self {
        Self {
            user_id,
            correlation_id: correlation_id.into(),
            received_at: Utc::now(),
            payload: Inbound::Control(command),
        }
    }

    pub fn at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }
}

/// A quick-reply choice offered alongside a prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyOption {
    pub label: String,
    pub command: ControlCommand,
}

impl ReplyOption {
    pub fn new(label: impl Into<String>, command: ControlCommand) -> Self {
        Self { label: label.into(), command }
    }
}

#[cfg(test)]
mod tests {
    use super::ControlCommand;
    use crate::domain::{draft::DraftId, workflow::WorkflowType};

    #[test]
    fn from_action_builds_scoped_commands() {
        assert_eq!(
            ControlCommand::from_action("Cancel", Some(WorkflowType::TransferConfirm), None),
            Some(ControlCommand::Cancel { workflow: Some(WorkflowType::TransferConfirm) })
        );
        assert_eq!(
            ControlCommand::from_action(
                "send",
                Some(WorkflowType::DocumentDraft),
                Some(DraftId("INV-2026-000001".to_owned()))
            ),
            Some(ControlCommand::Send { draft_id: Some(DraftId("INV-2026-000001".to_owned())) })
        );
        assert_eq!(ControlCommand::from_action("approve", None, None), None);
    }
}
