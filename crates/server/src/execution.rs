use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::SecretString;
use serde::Serialize;
use steward_core::collaborators::{CollaboratorError, ExecutionClient};
use steward_core::config::ExecutionConfig;
use steward_core::domain::completion::OperationKey;
use steward_core::domain::transfer::{ExecutionReceipt, QuoteEstimate, TransferParams};
use tracing::info;

use crate::http::{self, IDEMPOTENCY_KEY_HEADER};

#[derive(Serialize)]
struct QuoteRequest<'a> {
    #[serde(flatten)]
    params: &'a TransferParams,
    requested_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    params: &'a TransferParams,
    quote: &'a QuoteEstimate,
    operation_key: &'a str,
}

/// Custody and pricing service reached over JSON/HTTP.
///
/// `POST {base}/quotes` returns a [`QuoteEstimate`]; `POST {base}/executions`
/// returns an [`ExecutionReceipt`] and carries the operation key as the
/// `Idempotency-Key` header so a retried confirmation cannot move funds twice.
pub struct HttpExecutionClient {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpExecutionClient {
    pub fn new(base_url: &str, config: &ExecutionConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

#[async_trait]
impl ExecutionClient for HttpExecutionClient {
    async fn quote(
        &self,
        params: &TransferParams,
        now: DateTime<Utc>,
    ) -> Result<QuoteEstimate, CollaboratorError> {
        let request = http::authorize(self.client.post(self.endpoint("quotes")), self.api_key.as_ref())
            .json(&QuoteRequest { params, requested_at: now });
        let quote: QuoteEstimate = http::send_json(request, "execution quote").await?;
        if quote.is_expired(now) {
            return Err(CollaboratorError::Decode("execution service returned an already expired quote".to_owned()));
        }
        Ok(quote)
    }

    async fn execute(
        &self,
        params: &TransferParams,
        quote: &QuoteEstimate,
        operation_key: &OperationKey,
    ) -> Result<ExecutionReceipt, CollaboratorError> {
        let request = http::authorize(self.client.post(self.endpoint("executions")), self.api_key.as_ref())
            .header(IDEMPOTENCY_KEY_HEADER, operation_key.0.as_str())
            .json(&ExecuteRequest { params, quote, operation_key: &operation_key.0 });
        let receipt: ExecutionReceipt = http::send_json(request, "execution").await?;

        info!(
            event_name = "transfer.execution_acknowledged",
            operation_key = %operation_key.0,
            reference = %receipt.reference,
            status = ?receipt.status,
            "execution service acknowledged transfer"
        );
        Ok(receipt)
    }
}
