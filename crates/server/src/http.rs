use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use steward_core::collaborators::CollaboratorError;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

pub fn client(timeout_secs: u64) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(Duration::from_secs(timeout_secs)).build()
}

pub fn authorize(request: RequestBuilder, api_key: Option<&SecretString>) -> RequestBuilder {
    match api_key {
        Some(key) => request.bearer_auth(key.expose_secret()),
        None => request,
    }
}

/// Sends the request and decodes a JSON body from a 2xx response. Client errors
/// are rejections; server errors and transport failures mean unavailable.
pub async fn send_json<T>(request: RequestBuilder, service: &str) -> Result<T, CollaboratorError>
where
    T: DeserializeOwned,
{
    let response = request
        .send()
        .await
        .map_err(|error| CollaboratorError::Unavailable(format!("{service} request failed: {error}")))?;
    let response = check_status(response, service).await?;
    response
        .json::<T>()
        .await
        .map_err(|error| CollaboratorError::Decode(format!("{service} response: {error}")))
}

async fn check_status(response: Response, service: &str) -> Result<Response, CollaboratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = summarize(status, &body);
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        Err(CollaboratorError::Rejected(format!("{service} returned {detail}")))
    } else {
        Err(CollaboratorError::Unavailable(format!("{service} returned {detail}")))
    }
}

fn summarize(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return status.to_string();
    }
    let snippet: String = body.chars().take(200).collect();
    format!("{status}: {snippet}")
}
