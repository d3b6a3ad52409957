use chrono::NaiveDate;

use crate::domain::draft::{DocumentFields, DocumentKind, LineItem, Money};
use crate::domain::workflow::{DocumentStep, WorkflowType};
use crate::errors::ValidationError;
use crate::flows::validators::{
    parse_amount, parse_line_items, validate_due_date, validate_email, validate_text,
    ValidationContext,
};

/// A validated answer, ready to be written onto the draft.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    LineItems(Vec<LineItem>),
    Amount(Money),
    Date(NaiveDate),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextStep {
    Step(DocumentStep),
    Terminal,
}

pub struct StepDefinition {
    pub step: DocumentStep,
    pub field: &'static str,
    pub prompt: fn(DocumentKind) -> &'static str,
    pub validate: fn(&str, &ValidationContext) -> Result<FieldValue, ValidationError>,
    pub apply: fn(&mut DocumentFields, FieldValue),
    pub next: fn(&DocumentFields) -> NextStep,
}

impl StepDefinition {
    pub fn key(&self) -> &'static str {
        self.step.key()
    }

    /// Prompt text with a progress hint, e.g. `(3/8) Who is this invoice for?`.
    pub fn render_prompt(&self, kind: DocumentKind) -> String {
        let position = DOCUMENT_STEPS
            .iter()
            .position(|definition| definition.step == self.step)
            .map_or(0, |index| index + 1);
        format!("({position}/{}) {}", DOCUMENT_STEPS.len(), (self.prompt)(kind))
    }
}

/// Step tables per workflow type. Transfer flows are driven by
/// [`crate::flows::transfer::TransferFlow`] instead of field steps.
pub struct WorkflowRegistry;

impl WorkflowRegistry {
    pub fn steps(workflow: WorkflowType) -> &'static [StepDefinition] {
        match workflow {
            WorkflowType::DocumentDraft => &DOCUMENT_STEPS,
            WorkflowType::TransferConfirm | WorkflowType::PurchaseConfirm => &[],
        }
    }

    pub fn first_document_step() -> DocumentStep {
        DOCUMENT_STEPS[0].step
    }

    /// `None` for the review marker, which has no field to collect.
    pub fn document_step(step: DocumentStep) -> Option<&'static StepDefinition> {
        DOCUMENT_STEPS.iter().find(|definition| definition.step == step)
    }

    pub fn step_label(step: DocumentStep, kind: DocumentKind) -> &'static str {
        match (step, kind) {
            (DocumentStep::DueDate, DocumentKind::Proposal) => "timeline",
            (DocumentStep::DueDate, DocumentKind::Invoice) => "due date",
            _ => Self::document_step(step).map_or("review", |definition| definition.field),
        }
    }
}

static DOCUMENT_STEPS: [StepDefinition; 8] = [
    StepDefinition {
        step: DocumentStep::IssuerName,
        field: "your name",
        prompt: prompt_issuer_name,
        validate: validate_issuer_name,
        apply: apply_issuer_name,
        next: next_after_issuer_name,
    },
    StepDefinition {
        step: DocumentStep::IssuerEmail,
        field: "your email",
        prompt: prompt_issuer_email,
        validate: validate_issuer_email,
        apply: apply_issuer_email,
        next: next_after_issuer_email,
    },
    StepDefinition {
        step: DocumentStep::ClientName,
        field: "client name",
        prompt: prompt_client_name,
        validate: validate_client_name,
        apply: apply_client_name,
        next: next_after_client_name,
    },
    StepDefinition {
        step: DocumentStep::ClientEmail,
        field: "client email",
        prompt: prompt_client_email,
        validate: validate_client_email,
        apply: apply_client_email,
        next: next_after_client_email,
    },
    StepDefinition {
        step: DocumentStep::Description,
        field: "project description",
        prompt: prompt_description,
        validate: validate_description,
        apply: apply_description,
        next: next_after_description,
    },
    StepDefinition {
        step: DocumentStep::LineItems,
        field: "itemized scope",
        prompt: prompt_line_items,
        validate: validate_line_items,
        apply: apply_line_items,
        next: next_after_line_items,
    },
    StepDefinition {
        step: DocumentStep::Amount,
        field: "amount",
        prompt: prompt_amount,
        validate: validate_amount,
        apply: apply_amount,
        next: next_after_amount,
    },
    StepDefinition {
        step: DocumentStep::DueDate,
        field: "due date",
        prompt: prompt_due_date,
        validate: validate_due,
        apply: apply_due_date,
        next: next_after_due_date,
    },
];

fn prompt_issuer_name(_kind: DocumentKind) -> &'static str {
    "What name should appear as the sender?"
}

fn prompt_issuer_email(_kind: DocumentKind) -> &'static str {
    "What's your email address?"
}

fn prompt_client_name(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Invoice => "Who is this invoice for?",
        DocumentKind::Proposal => "Who is this proposal for?",
    }
}

fn prompt_client_email(_kind: DocumentKind) -> &'static str {
    "What's their email address?"
}

fn prompt_description(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Invoice => "Briefly describe the work you're billing for.",
        DocumentKind::Proposal => "Briefly describe the project you're proposing.",
    }
}

fn prompt_line_items(_kind: DocumentKind) -> &'static str {
    "List the items, one per line or separated by `;`. Add a price with `- 200` if you like."
}

fn prompt_amount(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Invoice => "What's the total amount due? (e.g. `500 USD`)",
        DocumentKind::Proposal => "What's the total budget? (e.g. `500 USD`)",
    }
}

fn prompt_due_date(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Invoice => "When is payment due? (`YYYY-MM-DD`, `tomorrow` or `in 30 days`)",
        DocumentKind::Proposal => {
            "What's the delivery timeline? (`YYYY-MM-DD`, `tomorrow` or `in 6 weeks`)"
        }
    }
}

fn validate_issuer_name(input: &str, _ctx: &ValidationContext) -> Result<FieldValue, ValidationError> {
    validate_text("issuer_name", "your name", input, 120).map(FieldValue::Text)
}

fn validate_issuer_email(input: &str, _ctx: &ValidationContext) -> Result<FieldValue, ValidationError> {
    validate_email("issuer_email", input).map(FieldValue::Text)
}

fn validate_client_name(input: &str, _ctx: &ValidationContext) -> Result<FieldValue, ValidationError> {
    validate_text("client_name", "the client's name", input, 120).map(FieldValue::Text)
}

fn validate_client_email(input: &str, _ctx: &ValidationContext) -> Result<FieldValue, ValidationError> {
    validate_email("client_email", input).map(FieldValue::Text)
}

fn validate_description(input: &str, _ctx: &ValidationContext) -> Result<FieldValue, ValidationError> {
    validate_text("description", "a description", input, 1_000).map(FieldValue::Text)
}

fn validate_line_items(input: &str, _ctx: &ValidationContext) -> Result<FieldValue, ValidationError> {
    parse_line_items(input).map(FieldValue::LineItems)
}

fn validate_amount(input: &str, ctx: &ValidationContext) -> Result<FieldValue, ValidationError> {
    parse_amount(input, &ctx.default_currency).map(FieldValue::Amount)
}

fn validate_due(input: &str, ctx: &ValidationContext) -> Result<FieldValue, ValidationError> {
    validate_due_date(input, ctx).map(FieldValue::Date)
}

fn text(value: FieldValue) -> Option<String> {
    match value {
        FieldValue::Text(text) => Some(text),
        _ => None,
    }
}

fn apply_issuer_name(fields: &mut DocumentFields, value: FieldValue) {
    fields.issuer_name = text(value).or(fields.issuer_name.take());
}

fn apply_issuer_email(fields: &mut DocumentFields, value: FieldValue) {
    fields.issuer_email = text(value).or(fields.issuer_email.take());
}

fn apply_client_name(fields: &mut DocumentFields, value: FieldValue) {
    fields.client_name = text(value).or(fields.client_name.take());
}

fn apply_client_email(fields: &mut DocumentFields, value: FieldValue) {
    fields.client_email = text(value).or(fields.client_email.take());
}

fn apply_description(fields: &mut DocumentFields, value: FieldValue) {
    fields.description = text(value).or(fields.description.take());
}

fn apply_line_items(fields: &mut DocumentFields, value: FieldValue) {
    if let FieldValue::LineItems(items) = value {
        fields.line_items = Some(items);
    }
}

fn apply_amount(fields: &mut DocumentFields, value: FieldValue) {
    if let FieldValue::Amount(money) = value {
        fields.amount = Some(money);
    }
}

fn apply_due_date(fields: &mut DocumentFields, value: FieldValue) {
    if let FieldValue::Date(date) = value {
        fields.due_date = Some(date);
    }
}

fn next_after_issuer_name(_fields: &DocumentFields) -> NextStep {
    NextStep::Step(DocumentStep::IssuerEmail)
}

fn next_after_issuer_email(_fields: &DocumentFields) -> NextStep {
    NextStep::Step(DocumentStep::ClientName)
}

fn next_after_client_name(_fields: &DocumentFields) -> NextStep {
    NextStep::Step(DocumentStep::ClientEmail)
}

fn next_after_client_email(_fields: &DocumentFields) -> NextStep {
    NextStep::Step(DocumentStep::Description)
}

fn next_after_description(_fields: &DocumentFields) -> NextStep {
    NextStep::Step(DocumentStep::LineItems)
}

fn next_after_line_items(_fields: &DocumentFields) -> NextStep {
    NextStep::Step(DocumentStep::Amount)
}

fn next_after_amount(_fields: &DocumentFields) -> NextStep {
    NextStep::Step(DocumentStep::DueDate)
}

fn next_after_due_date(_fields: &DocumentFields) -> NextStep {
    NextStep::Terminal
}
