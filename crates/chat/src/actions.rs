//! Button payloads.
//!
//! Every quick-reply button carries its command as `key=value` segments joined
//! by `;`, for example `action=cancel;flow=transfer_confirm`. Values are
//! percent-encoded so a draft id or label can never smuggle in another segment.
//! Payloads are decoded here, once, into a [`ControlCommand`]; nothing past the
//! transport boundary looks at the raw string.

use steward_core::{ControlCommand, DraftId, WorkflowType};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ActionValueError {
    #[error("action payload is empty")]
    Empty,
    #[error("malformed segment `{0}`")]
    Malformed(String),
    #[error("invalid percent-encoding in `{0}`")]
    Encoding(String),
    #[error("key `{0}` appears more than once")]
    DuplicateKey(String),
    #[error("unknown key `{0}`")]
    UnknownKey(String),
    #[error("missing `action` key")]
    MissingAction,
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    #[error("unknown workflow `{0}`")]
    UnknownWorkflow(String),
    #[error("`{0}` is not a draft id")]
    InvalidDraftId(String),
}

pub fn encode_command(command: &ControlCommand) -> String {
    let mut value = format!("action={}", command.action());
    if let Some(workflow) = command.workflow() {
        value.push_str(";flow=");
        value.push_str(&encode_component(workflow.as_str()));
    }
    if let ControlCommand::Send { draft_id: Some(draft_id) } = command {
        value.push_str(";draft=");
        value.push_str(&encode_component(&draft_id.0));
    }
    value
}

pub fn decode_command(value: &str) -> Result<ControlCommand, ActionValueError> {
    let mut action = None::<String>;
    let mut workflow = None::<WorkflowType>;
    let mut draft_id = None::<DraftId>;
    let mut seen_segment = false;

    for segment in value.split(';') {
        if segment.trim().is_empty() {
            continue;
        }
        seen_segment = true;

        let (key, raw_value) = segment
            .split_once('=')
            .ok_or_else(|| ActionValueError::Malformed(segment.to_owned()))?;
        let key = key.trim().to_ascii_lowercase();
        let decoded = decode_component(raw_value.trim())
            .ok_or_else(|| ActionValueError::Encoding(segment.to_owned()))?;
        if decoded.is_empty() {
            return Err(ActionValueError::Malformed(segment.to_owned()));
        }

        match key.as_str() {
            "action" => {
                if action.replace(decoded).is_some() {
                    return Err(ActionValueError::DuplicateKey(key));
                }
            }
            "flow" => {
                let parsed = WorkflowType::parse(&decoded)
                    .ok_or_else(|| ActionValueError::UnknownWorkflow(decoded.clone()))?;
                if workflow.replace(parsed).is_some() {
                    return Err(ActionValueError::DuplicateKey(key));
                }
            }
            "draft" => {
                let parsed = DraftId::from_token(&decoded)
                    .filter(|id| id.0.eq_ignore_ascii_case(&decoded))
                    .ok_or_else(|| ActionValueError::InvalidDraftId(decoded.clone()))?;
                if draft_id.replace(parsed).is_some() {
                    return Err(ActionValueError::DuplicateKey(key));
                }
            }
            _ => return Err(ActionValueError::UnknownKey(key)),
        }
    }

    if !seen_segment {
        return Err(ActionValueError::Empty);
    }
    let action = action.ok_or(ActionValueError::MissingAction)?;
    ControlCommand::from_action(&action, workflow, draft_id)
        .ok_or(ActionValueError::UnknownAction(action))
}

fn encode_component(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

fn decode_component(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0usize;

    while index < bytes.len() {
        if bytes[index] == b'%' {
            if index + 2 >= bytes.len() {
                return None;
            }
            let high = hex_nibble(bytes[index + 1])?;
            let low = hex_nibble(bytes[index + 2])?;
            decoded.push((high << 4) | low);
            index += 3;
        } else {
            decoded.push(bytes[index]);
            index += 1;
        }
    }

    String::from_utf8(decoded).ok()
}

fn hex_nibble(value: u8) -> Option<u8> {
    match value {
        b'0'..=b'9' => Some(value - b'0'),
        b'a'..=b'f' => Some(value - b'a' + 10),
        b'A'..=b'F' => Some(value - b'A' + 10),
        _ => None,
    }
}
