use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use steward_core::config::AppConfig;
use toml::Value;

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let entries: Vec<ConfigEntry> = effective_values(&config)
        .into_iter()
        .map(|(key, env_keys, value)| ConfigEntry {
            key,
            value,
            source: field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref()),
        })
        .collect();

    CommandResult::success_with_data(
        "config",
        "effective config (source precedence: env > file > default)",
        serde_json::to_value(entries).ok(),
    )
}

/// `(key, env overrides, rendered value)`
type Field = (&'static str, &'static [&'static str], String);

fn effective_values(config: &AppConfig) -> Vec<Field> {
    vec![
        field("database.url", &["STEWARD_DATABASE_URL"], config.database.url.clone()),
        field(
            "database.max_connections",
            &["STEWARD_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        field("database.timeout_secs", &["STEWARD_DATABASE_TIMEOUT_SECS"], config.database.timeout_secs.to_string()),
        field(
            "workflow.default_currency",
            &["STEWARD_WORKFLOW_DEFAULT_CURRENCY"],
            config.workflow.default_currency.clone(),
        ),
        field(
            "workflow.draft_ttl_hours",
            &["STEWARD_WORKFLOW_DRAFT_TTL_HOURS"],
            config.workflow.draft_ttl_hours.to_string(),
        ),
        field(
            "workflow.transfer_ttl_minutes",
            &["STEWARD_WORKFLOW_TRANSFER_TTL_MINUTES"],
            config.workflow.transfer_ttl_minutes.to_string(),
        ),
        field(
            "workflow.quote_ttl_secs",
            &["STEWARD_WORKFLOW_QUOTE_TTL_SECS"],
            config.workflow.quote_ttl_secs.to_string(),
        ),
        field("workflow.short_answer_max_words", &[], config.workflow.short_answer_max_words.to_string()),
        field(
            "delivery.webhook_url",
            &["STEWARD_DELIVERY_WEBHOOK_URL"],
            config.delivery.webhook_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        field("delivery.api_key", &["STEWARD_DELIVERY_API_KEY"], redact(config.delivery.api_key.as_ref())),
        field(
            "delivery.sender_address",
            &["STEWARD_DELIVERY_SENDER_ADDRESS"],
            config.delivery.sender_address.clone(),
        ),
        field("delivery.timeout_secs", &[], config.delivery.timeout_secs.to_string()),
        field(
            "execution.base_url",
            &["STEWARD_EXECUTION_BASE_URL"],
            config.execution.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        field("execution.api_key", &["STEWARD_EXECUTION_API_KEY"], redact(config.execution.api_key.as_ref())),
        field(
            "execution.timeout_secs",
            &["STEWARD_EXECUTION_TIMEOUT_SECS"],
            config.execution.timeout_secs.to_string(),
        ),
        field("chat.transport", &["STEWARD_CHAT_TRANSPORT"], format!("{:?}", config.chat.transport).to_lowercase()),
        field("server.bind_address", &["STEWARD_SERVER_BIND_ADDRESS"], config.server.bind_address.clone()),
        field(
            "server.health_check_port",
            &["STEWARD_SERVER_HEALTH_CHECK_PORT"],
            config.server.health_check_port.to_string(),
        ),
        field(
            "server.graceful_shutdown_secs",
            &["STEWARD_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            config.server.graceful_shutdown_secs.to_string(),
        ),
        field("logging.level", &["STEWARD_LOGGING_LEVEL", "STEWARD_LOG_LEVEL"], config.logging.level.clone()),
        field(
            "logging.format",
            &["STEWARD_LOGGING_FORMAT", "STEWARD_LOG_FORMAT"],
            format!("{:?}", config.logging.format).to_lowercase(),
        ),
    ]
}

fn field(
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
) -> Field {
    (key, env_keys, value)
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("steward.toml"), PathBuf::from("config/steward.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// Keeps a recognisable key prefix (`dk-***`) and hides the rest.
fn redact(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
