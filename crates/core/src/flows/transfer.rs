use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::transfer::{TransferKind, TransferParamsDraft, TransferPhase};
use crate::domain::workflow::WorkflowType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    QuoteIssued,
    ConfirmRequested,
    RetryRequested,
    ExecutionSucceeded,
    ExecutionRejected,
    CancelRequested,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferAction {
    PresentQuote,
    ExecuteTransfer,
    RecordReceipt,
    RecordFailure,
    DiscardState,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferContext {
    pub missing_params: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub from: TransferPhase,
    pub to: TransferPhase,
    pub event: TransferEvent,
    pub actions: Vec<TransferAction>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required parameters in phase {phase:?}: {missing_params:?}")]
    MissingRequiredFields { phase: TransferPhase, missing_params: Vec<String> },
    #[error("invalid transition from {phase:?} using event {event:?}")]
    InvalidTransition { phase: TransferPhase, event: TransferEvent },
}

pub trait FlowDefinition {
    fn workflow_type(&self) -> WorkflowType;
    fn initial_phase(&self) -> TransferPhase;
    fn transition(
        &self,
        current: TransferPhase,
        event: TransferEvent,
        context: &TransferContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Quote, confirm, execute. Shared by transfers, swaps, bridges and purchases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferFlow {
    pub kind: TransferKind,
}

impl FlowDefinition for TransferFlow {
    fn workflow_type(&self) -> WorkflowType {
        WorkflowType::for_transfer(self.kind)
    }

    fn initial_phase(&self) -> TransferPhase {
        TransferPhase::Collecting
    }

    fn transition(
        &self,
        current: TransferPhase,
        event: TransferEvent,
        context: &TransferContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_transfer(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn workflow_type(&self) -> WorkflowType {
        self.flow.workflow_type()
    }

    pub fn initial_phase(&self) -> TransferPhase {
        self.flow.initial_phase()
    }

    pub fn apply(
        &self,
        current: TransferPhase,
        event: TransferEvent,
        context: &TransferContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit(
        &self,
        current: TransferPhase,
        event: TransferEvent,
        context: &TransferContext,
        sink: &dyn AuditSink,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => sink.emit(
                audit
                    .event("transfer.transition_applied", AuditCategory::Transfer, AuditOutcome::Success)
                    .with_metadata("workflow", self.workflow_type().as_str())
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event)),
            ),
            Err(error) => sink.emit(
                audit
                    .event("transfer.transition_rejected", AuditCategory::Transfer, AuditOutcome::Rejected)
                    .with_metadata("workflow", self.workflow_type().as_str())
                    .with_metadata("error", error.to_string()),
            ),
        }
        result
    }
}

fn transition_transfer(
    current: TransferPhase,
    event: TransferEvent,
    context: &TransferContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use TransferAction::{DiscardState, ExecuteTransfer, PresentQuote, RecordFailure, RecordReceipt};
    use TransferEvent::{
        CancelRequested, ConfirmRequested, ExecutionRejected, ExecutionSucceeded, QuoteIssued,
        RetryRequested,
    };
    use TransferPhase::{Cancelled, Collecting, Confirmed, Executed, Failed, Quoted};

    let (to, actions) = match (current, event) {
        (Collecting, QuoteIssued) => {
            if !context.missing_params.is_empty() {
                return Err(FlowTransitionError::MissingRequiredFields {
                    phase: current,
                    missing_params: context.missing_params.clone(),
                });
            }
            (Quoted, vec![PresentQuote])
        }
        (Quoted, QuoteIssued) | (Confirmed, QuoteIssued) => (Quoted, vec![PresentQuote]),
        (Quoted, ConfirmRequested) => (Confirmed, vec![ExecuteTransfer]),
        (Confirmed, RetryRequested) | (Confirmed, ConfirmRequested) => {
            (Confirmed, vec![ExecuteTransfer])
        }
        (Confirmed, ExecutionSucceeded) => (Executed, vec![RecordReceipt, DiscardState]),
        (Confirmed, ExecutionRejected) => (Failed, vec![RecordFailure, DiscardState]),
        (Collecting, CancelRequested) | (Quoted, CancelRequested) | (Confirmed, CancelRequested) => {
            (Cancelled, vec![DiscardState])
        }
        _ => return Err(FlowTransitionError::InvalidTransition { phase: current, event }),
    };

    Ok(TransitionOutcome { from: current, to, event, actions })
}

const FILLER_WORDS: &[&str] = &[
    "send", "transfer", "pay", "swap", "exchange", "convert", "bridge", "move", "buy",
    "purchase", "get", "please", "me", "some", "worth", "of", "my", "i", "want", "to", "for",
    "into", "on", "with", "using", "via", "the", "a", "an",
];

fn clean_token(raw: &str) -> &str {
    raw.trim_matches(|ch: char| matches!(ch, ',' | '.' | '!' | '?' | ';' | ':' | '"' | '\''))
}

fn parse_number(raw: &str) -> Option<Decimal> {
    let candidate = raw.trim_start_matches('$').replace(',', "");
    let amount = Decimal::from_str(&candidate).ok()?;
    (amount > Decimal::ZERO).then_some(amount)
}

fn is_symbol(token: &str) -> bool {
    (2..=10).contains(&token.len())
        && token.chars().all(|ch| ch.is_ascii_alphanumeric())
        && token.chars().any(|ch| ch.is_ascii_alphabetic())
        && !FILLER_WORDS.contains(&token.to_ascii_lowercase().as_str())
}

/// Extracts whatever parameters `text` carries for a flow of `kind`:
/// `50 USDC to 0xabc` (transfer), `100 USDC for SOL` (swap),
/// `20 ETH to base` (bridge), `buy 100 USDT with NGN` (purchase).
pub fn parse_transfer_params(text: &str, kind: TransferKind) -> TransferParamsDraft {
    let tokens: Vec<&str> = text.split_whitespace().map(clean_token).filter(|t| !t.is_empty()).collect();
    let mut params = TransferParamsDraft::default();

    let mut index = 0;
    while index < tokens.len() {
        let token = tokens[index];
        let lower = token.to_ascii_lowercase();
        let following = tokens.get(index + 1).copied();

        if params.amount.is_none() {
            if let Some(amount) = parse_number(token) {
                params.amount = Some(amount);
                if let Some(symbol) = following.filter(|next| is_symbol(next)) {
                    params.token = Some(symbol.to_ascii_uppercase());
                    index += 1;
                }
                index += 1;
                continue;
            }
        }

        match (kind, lower.as_str(), following) {
            (TransferKind::Transfer, "to", Some(destination)) => {
                params.destination = Some(destination.to_owned());
                index += 1;
            }
            (TransferKind::Swap, "for" | "into" | "to", Some(target)) if is_symbol(target) => {
                params.target_token = Some(target.to_ascii_uppercase());
                index += 1;
            }
            (TransferKind::Bridge, "to" | "on", Some(chain)) if is_symbol(chain) => {
                params.chain = Some(chain.to_ascii_lowercase());
                index += 1;
            }
            (TransferKind::Purchase, "with" | "using" | "in", Some(fiat)) if is_symbol(fiat) => {
                params.fiat_currency = Some(fiat.to_ascii_uppercase());
                index += 1;
            }
            _ => {}
        }
        index += 1;
    }

    params
}

/// Reads a bare reply (`0xabc123`, `USDC`, `polygon`) as the value of the single
/// parameter still being asked for.
pub fn parse_missing_param(text: &str, missing: &str) -> TransferParamsDraft {
    let mut params = TransferParamsDraft::default();
    let tokens: Vec<&str> = text.split_whitespace().map(clean_token).collect();
    let [value] = tokens.as_slice() else {
        return params;
    };

    match missing {
        "amount" => params.amount = parse_number(value),
        "token" if is_symbol(value) => params.token = Some(value.to_ascii_uppercase()),
        "destination" => params.destination = Some((*value).to_owned()),
        "target_token" if is_symbol(value) => params.target_token = Some(value.to_ascii_uppercase()),
        "chain" if is_symbol(value) => params.chain = Some(value.to_ascii_lowercase()),
        _ => {}
    }
    params
}

pub fn param_label(param: &str) -> &str {
    match param {
        "amount" => "amount",
        "token" => "token (e.g. USDC)",
        "destination" => "destination address",
        "target_token" => "token to receive",
        "chain" => "destination chain",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::transfer::{TransferKind, TransferPhase};
    use crate::flows::transfer::{
        parse_missing_param, parse_transfer_params, FlowDefinition, FlowEngine,
        FlowTransitionError, TransferAction, TransferContext, TransferEvent, TransferFlow,
    };

    #[test]
    fn happy_path_moves_collecting_to_executed() {
        let engine = FlowEngine::new(TransferFlow { kind: TransferKind::Transfer });
        let context = TransferContext::default();
        let mut phase = engine.initial_phase();

        for (event, expected) in [
            (TransferEvent::QuoteIssued, TransferPhase::Quoted),
            (TransferEvent::ConfirmRequested, TransferPhase::Confirmed),
            (TransferEvent::ExecutionSucceeded, TransferPhase::Executed),
        ] {
            let outcome = engine.apply(phase, event, &context).expect("transition");
            assert_eq!(outcome.to, expected);
            phase = outcome.to;
        }
    }

    #[test]
    fn quoting_requires_complete_parameters() {
        let flow = TransferFlow { kind: TransferKind::Transfer };
        let context = TransferContext { missing_params: vec!["destination".to_owned()] };

        let error = flow
            .transition(TransferPhase::Collecting, TransferEvent::QuoteIssued, &context)
            .expect_err("missing destination");
        assert!(matches!(error, FlowTransitionError::MissingRequiredFields { .. }));
    }

    #[test]
    fn cancel_is_allowed_before_execution_only() {
        let flow = TransferFlow { kind: TransferKind::Swap };
        let context = TransferContext::default();

        for phase in [TransferPhase::Collecting, TransferPhase::Quoted, TransferPhase::Confirmed] {
            let outcome = flow
                .transition(phase, TransferEvent::CancelRequested, &context)
                .expect("cancel before execution");
            assert_eq!(outcome.to, TransferPhase::Cancelled);
            assert_eq!(outcome.actions, vec![TransferAction::DiscardState]);
        }
        assert!(flow
            .transition(TransferPhase::Executed, TransferEvent::CancelRequested, &context)
            .is_err());
    }

    #[test]
    fn confirm_without_quote_is_rejected_and_audited() {
        let engine = FlowEngine::new(TransferFlow { kind: TransferKind::Purchase });
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(None, None, "req-9", "dispatcher");

        let result = engine.apply_with_audit(
            TransferPhase::Collecting,
            TransferEvent::ConfirmRequested,
            &TransferContext::default(),
            &sink,
            &audit,
        );

        assert!(matches!(result, Err(FlowTransitionError::InvalidTransition { .. })));
        assert_eq!(sink.event_types(), vec!["transfer.transition_rejected".to_owned()]);
    }

    #[test]
    fn parses_parameters_for_each_kind() {
        let transfer = parse_transfer_params("send 50 usdc to 0xAbC123", TransferKind::Transfer);
        assert_eq!(transfer.amount, Some(Decimal::new(50, 0)));
        assert_eq!(transfer.token.as_deref(), Some("USDC"));
        assert_eq!(transfer.destination.as_deref(), Some("0xAbC123"));

        let swap = parse_transfer_params("swap 1,000 USDC for sol", TransferKind::Swap);
        assert_eq!(swap.amount, Some(Decimal::new(1_000, 0)));
        assert_eq!(swap.target_token.as_deref(), Some("SOL"));

        let bridge = parse_transfer_params("bridge 0.5 ETH to Base", TransferKind::Bridge);
        assert_eq!(bridge.amount, Some(Decimal::new(5, 1)));
        assert_eq!(bridge.chain.as_deref(), Some("base"));

        let purchase = parse_transfer_params("buy 100 USDT with ngn", TransferKind::Purchase);
        assert_eq!(purchase.fiat_currency.as_deref(), Some("NGN"));
        assert_eq!(purchase.token.as_deref(), Some("USDT"));
    }

    #[test]
    fn bare_reply_fills_the_missing_parameter() {
        let destination = parse_missing_param("0xdef456", "destination");
        assert_eq!(destination.destination.as_deref(), Some("0xdef456"));

        let nothing = parse_missing_param("not sure yet", "destination");
        assert!(nothing.is_empty());
    }
}
