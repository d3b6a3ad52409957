//! Continuation Classifier
//!
//! Decides whether a message that arrives while a workflow is active is an
//! answer to the current step or an unrelated request. The classifier is a
//! pure function of the text and a small context: it never reads state and
//! never writes it.
//!
//! The heuristic prefers deferring a legitimate answer over corrupting a
//! half-filled draft with an off-topic message.

use serde::{Deserialize, Serialize};

use crate::command::ControlCommand;
use crate::domain::draft::DraftId;
use crate::domain::workflow::WorkflowType;

/// What the active step expects, used to force obvious answers through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldHint {
    /// Short free text such as a name
    Text,
    /// Long free text such as a description or itemized list
    FreeText,
    Email,
    Amount,
    Date,
    /// Transfer parameters (amount, token, address)
    TransferParams,
}

impl FieldHint {
    pub fn for_step(step_key: &str) -> Self {
        match step_key {
            "issuer_email" | "client_email" => Self::Email,
            "description" | "line_items" => Self::FreeText,
            "amount" => Self::Amount,
            "due_date" => Self::Date,
            "collecting" | "quoted" | "confirmed" => Self::TransferParams,
            _ => Self::Text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifierContext {
    pub workflow: WorkflowType,
    pub hint: FieldHint,
    pub short_answer_max_words: usize,
}

/// Why a message was judged to be outside the active workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptionReason {
    Question,
    Greeting,
    Connective,
    NewRequest,
}

impl InterruptionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Greeting => "greeting",
            Self::Connective => "connective",
            Self::NewRequest => "new_request",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    Control(ControlCommand),
    Answer,
    Interruption(InterruptionReason),
}

const QUESTION_WORDS: &[&str] = &[
    "what", "why", "how", "who", "when", "where", "which", "can", "could", "would", "should",
    "is", "are", "do", "does", "did", "will", "whats", "what's", "how's",
];

const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "yo", "thanks", "thank", "thx", "bye", "goodbye", "cheers", "gm",
];

const GREETING_PHRASES: &[&str] = &["good morning", "good afternoon", "good evening", "good night"];

const CONNECTIVES: &[&str] = &[
    "by the way", "btw", "anyway", "actually", "however", "but ", "instead", "also,", "oh and",
];

const REQUEST_VERBS: &[&str] = &["create", "make", "start", "new", "draft", "generate", "i want", "i need", "can you"];

const REQUEST_NOUNS: &[&str] = &["invoice", "proposal", "transfer", "swap", "bridge", "purchase"];

/// Leading verbs that start a transfer-style workflow when an amount follows.
const TRANSFER_VERBS: &[(&str, WorkflowType)] = &[
    ("send", WorkflowType::TransferConfirm),
    ("transfer", WorkflowType::TransferConfirm),
    ("pay", WorkflowType::TransferConfirm),
    ("withdraw", WorkflowType::TransferConfirm),
    ("swap", WorkflowType::TransferConfirm),
    ("exchange", WorkflowType::TransferConfirm),
    ("convert", WorkflowType::TransferConfirm),
    ("bridge", WorkflowType::TransferConfirm),
    ("buy", WorkflowType::PurchaseConfirm),
    ("purchase", WorkflowType::PurchaseConfirm),
];

fn normalize(text: &str) -> String {
    text.trim()
        .trim_end_matches(['.', '!'])
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Recognizes a bare workflow-control word, optionally followed by a draft id
/// for `send`. Anything longer is not a control command.
pub fn control_command(text: &str) -> Option<ControlCommand> {
    let normalized = normalize(text);
    let words: Vec<&str> = normalized.split(' ').filter(|word| !word.is_empty()).collect();

    match words.as_slice() {
        ["cancel" | "stop" | "abort" | "quit"] => Some(ControlCommand::Cancel { workflow: None }),
        ["continue" | "resume"] => Some(ControlCommand::Continue { workflow: None }),
        ["confirm" | "yes" | "proceed"] => Some(ControlCommand::Confirm { workflow: None }),
        ["retry"] | ["try", "again"] => Some(ControlCommand::Retry { workflow: None }),
        ["send"] | ["send", "it"] => Some(ControlCommand::Send { draft_id: None }),
        ["send", token] => DraftId::from_token(token).map(|id| ControlCommand::Send { draft_id: Some(id) }),
        _ => None,
    }
}

pub fn classify(text: &str, ctx: &ClassifierContext) -> Classification {
    if let Some(command) = control_command(text) {
        return Classification::Control(command);
    }

    let trimmed = text.trim();
    let normalized = normalize(text);
    let words: Vec<&str> = normalized.split(' ').filter(|word| !word.is_empty()).collect();

    if matches_field_hint(trimmed, &words, ctx.hint) {
        return Classification::Answer;
    }

    if trimmed.ends_with('?') {
        return Classification::Interruption(InterruptionReason::Question);
    }

    // "Will Turner" or "Can Industries" at a name step is a name, not a question.
    let reads_as_name = ctx.hint == FieldHint::Text && is_title_case(trimmed);
    let first = words.first().map(|word| word.trim_matches(|ch: char| ch == ',' || ch == '!'));
    if let Some(first) = first {
        if words.len() > 1 && QUESTION_WORDS.contains(&first) && !reads_as_name {
            return Classification::Interruption(InterruptionReason::Question);
        }
        if GREETINGS.contains(&first)
            && (words.len() <= 3 || ctx.hint != FieldHint::FreeText)
        {
            return Classification::Interruption(InterruptionReason::Greeting);
        }
    }
    if GREETING_PHRASES.iter().any(|phrase| normalized.starts_with(phrase)) {
        return Classification::Interruption(InterruptionReason::Greeting);
    }

    let asks_for_workflow = REQUEST_VERBS.iter().any(|verb| normalized.starts_with(verb))
        && REQUEST_NOUNS.iter().any(|noun| normalized.contains(noun));
    if asks_for_workflow || starts_other_transfer(&words, ctx.workflow) {
        return Classification::Interruption(InterruptionReason::NewRequest);
    }

    // Long descriptions legitimately contain "but" or "also".
    if ctx.hint != FieldHint::FreeText {
        let padded = format!("{normalized} ");
        if CONNECTIVES.iter().any(|connective| padded.starts_with(connective) || padded.contains(&format!(" {connective}"))) {
            return Classification::Interruption(InterruptionReason::Connective);
        }
        if words.len() > ctx.short_answer_max_words {
            return Classification::Interruption(InterruptionReason::Connective);
        }
    }

    Classification::Answer
}

/// `buy 100 USDT with NGN` while a transfer waits is a new purchase, not an
/// edit of the transfer.
fn starts_other_transfer(words: &[&str], active: WorkflowType) -> bool {
    let Some((_, workflow)) = words
        .first()
        .and_then(|first| TRANSFER_VERBS.iter().find(|(verb, _)| verb == first))
    else {
        return false;
    };
    let has_amount = words[1..]
        .iter()
        .any(|word| word.trim_start_matches('$').starts_with(|ch: char| ch.is_ascii_digit()));
    *workflow != active && has_amount
}

/// Every word starts with an uppercase letter or is not alphabetic at all
/// (`Smith & Sons`, `Acme 2.0`).
fn is_title_case(text: &str) -> bool {
    text.split_whitespace().all(|word| {
        word.chars()
            .find(|ch| ch.is_alphabetic())
            .map_or(true, char::is_uppercase)
    })
}

fn matches_field_hint(trimmed: &str, words: &[&str], hint: FieldHint) -> bool {
    let starts_numeric = trimmed
        .chars()
        .next()
        .is_some_and(|ch| ch.is_ascii_digit() || matches!(ch, '$' | '€' | '£' | '₦'));

    match hint {
        FieldHint::Email => words.len() == 1 && trimmed.contains('@'),
        FieldHint::Amount => starts_numeric && words.len() <= 3,
        FieldHint::Date => {
            starts_numeric && words.len() == 1
                || matches!(words, ["today"] | ["tomorrow"] | ["in", _, _])
        }
        FieldHint::TransferParams => starts_numeric || (words.len() == 1 && !trimmed.ends_with('?')),
        FieldHint::Text | FieldHint::FreeText => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{classify, control_command, Classification, ClassifierContext, FieldHint, InterruptionReason};
    use crate::command::ControlCommand;
    use crate::domain::draft::DraftId;
    use crate::domain::workflow::WorkflowType;

    fn ctx(hint: FieldHint) -> ClassifierContext {
        ClassifierContext { workflow: WorkflowType::DocumentDraft, hint, short_answer_max_words: 8 }
    }

    #[test]
    fn control_words_short_circuit() {
        assert_eq!(
            classify("Cancel.", &ctx(FieldHint::Email)),
            Classification::Control(ControlCommand::Cancel { workflow: None })
        );
        assert_eq!(
            classify("resume", &ctx(FieldHint::Text)),
            Classification::Control(ControlCommand::Continue { workflow: None })
        );
        assert_eq!(
            control_command("send inv-2026-000123"),
            Some(ControlCommand::Send { draft_id: Some(DraftId("INV-2026-000123".to_owned())) })
        );
        assert_eq!(control_command("send 50 USDC to 0xabc"), None);
    }

    #[test]
    fn short_plain_answers_continue_the_flow() {
        assert_eq!(classify("Acme Corporation", &ctx(FieldHint::Text)), Classification::Answer);
        assert_eq!(classify("ada@example.com", &ctx(FieldHint::Email)), Classification::Answer);
        assert_eq!(classify("500 USD", &ctx(FieldHint::Amount)), Classification::Answer);
        assert_eq!(classify("in 30 days", &ctx(FieldHint::Date)), Classification::Answer);
    }

    #[test]
    fn long_descriptions_are_answers() {
        let description = "Full redesign of the marketing site including new brand guidelines, \
                           a component library, and but also migration of the blog";
        assert_eq!(classify(description, &ctx(FieldHint::FreeText)), Classification::Answer);
    }

    #[test]
    fn questions_greetings_and_new_requests_interrupt() {
        assert_eq!(
            classify("what's the price of bitcoin?", &ctx(FieldHint::Text)),
            Classification::Interruption(InterruptionReason::Question)
        );
        assert_eq!(
            classify("how do I check my balance", &ctx(FieldHint::Amount)),
            Classification::Interruption(InterruptionReason::Question)
        );
        assert_eq!(
            classify("hey there", &ctx(FieldHint::Text)),
            Classification::Interruption(InterruptionReason::Greeting)
        );
        assert_eq!(
            classify("create a proposal for Initech", &ctx(FieldHint::Text)),
            Classification::Interruption(InterruptionReason::NewRequest)
        );
        assert_eq!(
            classify("by the way my wallet is empty", &ctx(FieldHint::Text)),
            Classification::Interruption(InterruptionReason::Connective)
        );
    }

    #[test]
    fn a_different_transfer_request_is_not_an_answer() {
        let transfer = ClassifierContext {
            workflow: WorkflowType::TransferConfirm,
            hint: FieldHint::TransferParams,
            short_answer_max_words: 8,
        };
        assert_eq!(
            classify("buy 100 USDT with NGN", &transfer),
            Classification::Interruption(InterruptionReason::NewRequest)
        );
        assert_eq!(classify("send 75 USDC to 0xdef456", &transfer), Classification::Answer);
        assert_eq!(
            classify("send 50 USDC to 0xabc123", &ctx(FieldHint::Text)),
            Classification::Interruption(InterruptionReason::NewRequest)
        );
    }

    #[test]
    fn names_that_start_with_a_question_word_are_answers() {
        assert_eq!(classify("Will Turner", &ctx(FieldHint::Text)), Classification::Answer);
        assert_eq!(classify("Can Industries", &ctx(FieldHint::Text)), Classification::Answer);
        assert_eq!(classify("What Goes Around Ltd.", &ctx(FieldHint::Text)), Classification::Answer);
        assert_eq!(
            classify("Will Turner?", &ctx(FieldHint::Text)),
            Classification::Interruption(InterruptionReason::Question)
        );
        assert_eq!(
            classify("can you check my balance", &ctx(FieldHint::Text)),
            Classification::Interruption(InterruptionReason::Question)
        );
        assert_eq!(
            classify("Will Turner", &ctx(FieldHint::Amount)),
            Classification::Interruption(InterruptionReason::Question)
        );
    }

    #[test]
    fn field_hints_force_obvious_answers() {
        assert_eq!(classify("who@example.com", &ctx(FieldHint::Email)), Classification::Answer);
        assert_eq!(
            classify("who@example.com", &ctx(FieldHint::Text)),
            Classification::Answer
        );
        assert_eq!(classify("0x9f2c41ab", &ctx(FieldHint::TransferParams)), Classification::Answer);
    }
}
