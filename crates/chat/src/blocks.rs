use serde::Serialize;
use steward_core::{ControlCommand, ReplyOption};

use crate::actions::encode_command;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    Plain { text: String },
    Markdown { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        Self::Markdown { text: text.into() }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Plain { text } | Self::Markdown { text } => text,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Danger,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ButtonElement {
    pub action_id: String,
    pub text: TextObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ButtonStyle>,
    pub value: String,
}

impl ButtonElement {
    pub fn new(action_id: impl Into<String>, label: impl Into<String>, value: impl Into<String>) -> Self {
        Self { action_id: action_id.into(), text: TextObject::plain(label), style: None, value: value.into() }
    }

    pub fn style(mut self, style: ButtonStyle) -> Self {
        self.style = Some(style);
        self
    }

    /// A button whose payload is the encoded command.
    pub fn for_option(option: &ReplyOption) -> Self {
        let button = Self::new(
            format!("workflow.{}.v1", option.command.action()),
            option.label.clone(),
            encode_command(&option.command),
        );
        match &option.command {
            ControlCommand::Cancel { .. } => button.style(ButtonStyle::Danger),
            ControlCommand::Confirm { .. } | ControlCommand::Send { .. } => {
                button.style(ButtonStyle::Primary)
            }
            ControlCommand::Continue { .. } | ControlCommand::Retry { .. } => button,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Actions { block_id: String, elements: Vec<ButtonElement> },
    Context { block_id: String, elements: Vec<TextObject> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

impl MessageTemplate {
    pub fn buttons(&self) -> impl Iterator<Item = &ButtonElement> {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                Block::Actions { elements, .. } => Some(elements),
                _ => None,
            })
            .flatten()
    }

    /// Text-only rendering for terminals: sections, then context lines, then
    /// one line per button showing the payload to send back.
    pub fn render_plain(&self) -> String {
        let mut lines = Vec::new();
        for block in &self.blocks {
            match block {
                Block::Section { text, .. } => lines.push(text.text().to_owned()),
                Block::Context { elements, .. } => {
                    lines.extend(elements.iter().map(|element| format!("  {}", element.text())))
                }
                Block::Actions { .. } => {}
            }
        }
        for button in self.buttons() {
            lines.push(format!("  [{}] /action {}", button.text.text(), button.value));
        }
        if lines.is_empty() {
            return self.fallback_text.clone();
        }
        lines.join("\n")
    }
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Section { block_id: block_id.into(), text: builder.build() });
        self
    }

    pub fn actions<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ActionsBuilder),
    {
        let mut builder = ActionsBuilder::default();
        build(&mut builder);
        let elements = builder.build();
        if !elements.is_empty() {
            self.blocks.push(Block::Actions { block_id: block_id.into(), elements });
        }
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Context { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn markdown(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::markdown(text));
        self
    }

    fn build(self) -> TextObject {
        self.text.unwrap_or_else(|| TextObject::plain(""))
    }
}

#[derive(Default)]
pub struct ActionsBuilder {
    elements: Vec<ButtonElement>,
}

impl ActionsBuilder {
    pub fn button(&mut self, button: ButtonElement) -> &mut Self {
        self.elements.push(button);
        self
    }

    fn build(self) -> Vec<ButtonElement> {
        self.elements
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

/// The message sent for every engine prompt: the text, then one button per option.
pub fn reply_message(text: &str, options: &[ReplyOption]) -> MessageTemplate {
    MessageBuilder::new(text.to_owned())
        .section("workflow.reply.text.v1", |section| {
            section.plain(text);
        })
        .actions("workflow.reply.options.v1", |actions| {
            for option in options {
                actions.button(ButtonElement::for_option(option));
            }
        })
        .build()
}

/// Sent when a payload from the transport cannot be decoded.
pub fn invalid_action_message(reason: &str, correlation_id: &str) -> MessageTemplate {
    MessageBuilder::new(format!("That button no longer works: {reason}"))
        .section("workflow.error.summary.v1", |section| {
            section.plain("That button no longer works. Type your request instead.");
        })
        .context("workflow.error.context.v1", |context| {
            context.plain(format!("Correlation ID: {correlation_id}"));
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::{invalid_action_message, reply_message, Block, ButtonStyle};
    use steward_core::{ControlCommand, ReplyOption, WorkflowType};

    #[test]
    fn reply_options_become_encoded_buttons() {
        let template = reply_message(
            "Swap 100 USDC for 0.5 SOL. Fee 1 USDC.",
            &[
                ReplyOption::new(
                    "Confirm",
                    ControlCommand::Confirm { workflow: Some(WorkflowType::TransferConfirm) },
                ),
                ReplyOption::new(
                    "Cancel",
                    ControlCommand::Cancel { workflow: Some(WorkflowType::TransferConfirm) },
                ),
            ],
        );

        let buttons: Vec<_> = template.buttons().collect();
        assert_eq!(buttons.len(), 2);
        assert_eq!(buttons[0].value, "action=confirm;flow=transfer_confirm");
        assert_eq!(buttons[0].style, Some(ButtonStyle::Primary));
        assert_eq!(buttons[1].action_id, "workflow.cancel.v1");
        assert_eq!(buttons[1].style, Some(ButtonStyle::Danger));
        assert_eq!(template.fallback_text, "Swap 100 USDC for 0.5 SOL. Fee 1 USDC.");
    }

    #[test]
    fn prompts_without_options_have_no_actions_block() {
        let template = reply_message("What's your name?", &[]);
        assert_eq!(template.blocks.len(), 1);
        assert!(matches!(template.blocks[0], Block::Section { .. }));
        assert_eq!(template.render_plain(), "What's your name?");
    }

    #[test]
    fn plain_rendering_lists_button_payloads() {
        let template = reply_message(
            "Ready to send.",
            &[ReplyOption::new("Cancel", ControlCommand::Cancel { workflow: None })],
        );
        assert_eq!(template.render_plain(), "Ready to send.\n  [Cancel] /action action=cancel");

        let error = invalid_action_message("unknown key `amount`", "env-7");
        assert!(error.render_plain().contains("Correlation ID: env-7"));
    }

    #[test]
    fn templates_serialize_with_tagged_blocks() {
        let template = reply_message("Hi", &[]);
        let json = serde_json::to_value(&template).expect("serialize");
        assert_eq!(json["blocks"][0]["type"], "section");
        assert_eq!(json["blocks"][0]["text"]["type"], "plain");
    }
}
