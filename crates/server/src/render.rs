//! HTML rendering of finished document drafts with embedded tera templates.

use async_trait::async_trait;
use serde::Serialize;
use steward_core::collaborators::{CollaboratorError, DocumentRenderer, RenderedArtifact};
use steward_core::domain::draft::{DocumentDraft, DocumentKind, LineItem};
use steward_core::DraftEntity;
use tera::{Context, Tera};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(String),
}

const TEMPLATES: [(&str, &str); 2] = [
    ("invoice.html.tera", include_str!("../../../templates/documents/invoice.html.tera")),
    ("proposal.html.tera", include_str!("../../../templates/documents/proposal.html.tera")),
];

#[derive(Serialize)]
struct TemplateLineItem<'a> {
    description: &'a str,
    amount: Option<String>,
}

impl<'a> From<&'a LineItem> for TemplateLineItem<'a> {
    fn from(item: &'a LineItem) -> Self {
        Self {
            description: &item.description,
            amount: item.amount.map(|amount| amount.round_dp(2).normalize().to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TeraDocumentRenderer {
    tera: Tera,
}

impl TeraDocumentRenderer {
    pub fn embedded() -> Result<Self, RenderError> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![".html.tera"]);
        tera.add_raw_templates(TEMPLATES.to_vec())
            .map_err(|error| RenderError::Template(error.to_string()))?;
        Ok(Self { tera })
    }

    fn template_name(kind: DocumentKind) -> &'static str {
        match kind {
            DocumentKind::Invoice => "invoice.html.tera",
            DocumentKind::Proposal => "proposal.html.tera",
        }
    }

    fn accent_color(kind: DocumentKind) -> &'static str {
        match kind {
            DocumentKind::Invoice => "#2563eb",
            DocumentKind::Proposal => "#047857",
        }
    }

    pub fn render_html(&self, document: &DocumentDraft) -> Result<String, RenderError> {
        let fields = &document.fields;
        let line_items: Vec<TemplateLineItem<'_>> =
            fields.line_items.iter().flatten().map(TemplateLineItem::from).collect();

        let mut context = Context::new();
        context.insert("document", document);
        context.insert("fields", fields);
        context.insert("line_items", &line_items);
        context.insert(
            "currency",
            &fields.amount.as_ref().map(|money| money.currency.clone()).unwrap_or_default(),
        );
        context.insert("total", &fields.amount.as_ref().map(ToString::to_string).unwrap_or_default());
        context.insert("issued_on", &document.updated_at.date_naive().to_string());
        context.insert("due_date", &fields.due_date.map(|date| date.to_string()));
        context.insert("accent_color", Self::accent_color(document.kind));

        self.tera
            .render(Self::template_name(document.kind), &context)
            .map_err(|error| RenderError::Template(error.to_string()))
    }
}

#[async_trait]
impl DocumentRenderer for TeraDocumentRenderer {
    async fn render(&self, draft: &DraftEntity) -> Result<RenderedArtifact, CollaboratorError> {
        let document = draft.as_document().ok_or_else(|| {
            CollaboratorError::Rejected(format!("{} is not a document", draft.id()))
        })?;
        let html = self
            .render_html(document)
            .map_err(|error| CollaboratorError::Rejected(error.to_string()))?;

        debug!(
            event_name = "completion.rendered",
            draft_id = %document.id,
            bytes = html.len(),
            "document rendered"
        );

        Ok(RenderedArtifact {
            file_name: format!("{}.html", document.id),
            content_type: "text/html; charset=utf-8".to_owned(),
            bytes: html.into_bytes(),
        })
    }
}
