use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub workflow: WorkflowConfig,
    pub delivery: DeliveryConfig,
    pub execution: ExecutionConfig,
    pub chat: ChatConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub default_currency: String,
    pub draft_ttl_hours: u32,
    pub transfer_ttl_minutes: u32,
    pub quote_ttl_secs: u32,
    pub short_answer_max_words: usize,
}

impl WorkflowConfig {
    pub fn draft_ttl(&self) -> Duration {
        Duration::hours(i64::from(self.draft_ttl_hours))
    }

    pub fn transfer_ttl(&self) -> Duration {
        Duration::minutes(i64::from(self.transfer_ttl_minutes))
    }

    pub fn quote_ttl(&self) -> Duration {
        Duration::seconds(i64::from(self.quote_ttl_secs))
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            default_currency: "USD".to_string(),
            draft_ttl_hours: 48,
            transfer_ttl_minutes: 30,
            quote_ttl_secs: 120,
            short_answer_max_words: 8,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DeliveryConfig {
    pub webhook_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub sender_address: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub transport: ChatTransportKind,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatTransportKind {
    Console,
    Noop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub default_currency: Option<String>,
    pub chat_transport: Option<ChatTransportKind>,
    pub delivery_webhook_url: Option<String>,
    pub execution_base_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://steward.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            workflow: WorkflowConfig::default(),
            delivery: DeliveryConfig {
                webhook_url: None,
                api_key: None,
                sender_address: "billing@steward.local".to_string(),
                timeout_secs: 15,
            },
            execution: ExecutionConfig { base_url: None, api_key: None, timeout_secs: 15 },
            chat: ChatConfig { transport: ChatTransportKind::Console },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for ChatTransportKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(Self::Console),
            "noop" => Ok(Self::Noop),
            other => Err(ConfigError::Validation(format!(
                "unsupported chat transport `{other}` (expected console|noop)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("steward.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(default_currency) = workflow.default_currency {
                self.workflow.default_currency = default_currency;
            }
            if let Some(draft_ttl_hours) = workflow.draft_ttl_hours {
                self.workflow.draft_ttl_hours = draft_ttl_hours;
            }
            if let Some(transfer_ttl_minutes) = workflow.transfer_ttl_minutes {
                self.workflow.transfer_ttl_minutes = transfer_ttl_minutes;
            }
            if let Some(quote_ttl_secs) = workflow.quote_ttl_secs {
                self.workflow.quote_ttl_secs = quote_ttl_secs;
            }
            if let Some(short_answer_max_words) = workflow.short_answer_max_words {
                self.workflow.short_answer_max_words = short_answer_max_words;
            }
        }

        if let Some(delivery) = patch.delivery {
            if let Some(webhook_url) = delivery.webhook_url {
                self.delivery.webhook_url = Some(webhook_url);
            }
            if let Some(delivery_api_key_value) = delivery.api_key {
                self.delivery.api_key = Some(secret_value(delivery_api_key_value));
            }
            if let Some(sender_address) = delivery.sender_address {
                self.delivery.sender_address = sender_address;
            }
            if let Some(timeout_secs) = delivery.timeout_secs {
                self.delivery.timeout_secs = timeout_secs;
            }
        }

        if let Some(execution) = patch.execution {
            if let Some(base_url) = execution.base_url {
                self.execution.base_url = Some(base_url);
            }
            if let Some(execution_api_key_value) = execution.api_key {
                self.execution.api_key = Some(secret_value(execution_api_key_value));
            }
            if let Some(timeout_secs) = execution.timeout_secs {
                self.execution.timeout_secs = timeout_secs;
            }
        }

        if let Some(chat) = patch.chat {
            if let Some(transport) = chat.transport {
                self.chat.transport = transport;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("STEWARD_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("STEWARD_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("STEWARD_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("STEWARD_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("STEWARD_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("STEWARD_WORKFLOW_DEFAULT_CURRENCY") {
            self.workflow.default_currency = value;
        }
        if let Some(value) = read_env("STEWARD_WORKFLOW_DRAFT_TTL_HOURS") {
            self.workflow.draft_ttl_hours = parse_u32("STEWARD_WORKFLOW_DRAFT_TTL_HOURS", &value)?;
        }
        if let Some(value) = read_env("STEWARD_WORKFLOW_TRANSFER_TTL_MINUTES") {
            self.workflow.transfer_ttl_minutes =
                parse_u32("STEWARD_WORKFLOW_TRANSFER_TTL_MINUTES", &value)?;
        }
        if let Some(value) = read_env("STEWARD_WORKFLOW_QUOTE_TTL_SECS") {
            self.workflow.quote_ttl_secs = parse_u32("STEWARD_WORKFLOW_QUOTE_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("STEWARD_DELIVERY_WEBHOOK_URL") {
            self.delivery.webhook_url = Some(value);
        }
        if let Some(value) = read_env("STEWARD_DELIVERY_API_KEY") {
            self.delivery.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("STEWARD_DELIVERY_SENDER_ADDRESS") {
            self.delivery.sender_address = value;
        }

        if let Some(value) = read_env("STEWARD_EXECUTION_BASE_URL") {
            self.execution.base_url = Some(value);
        }
        if let Some(value) = read_env("STEWARD_EXECUTION_API_KEY") {
            self.execution.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("STEWARD_EXECUTION_TIMEOUT_SECS") {
            self.execution.timeout_secs = parse_u64("STEWARD_EXECUTION_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("STEWARD_CHAT_TRANSPORT") {
            self.chat.transport = value.parse()?;
        }

        if let Some(value) = read_env("STEWARD_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("STEWARD_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("STEWARD_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("STEWARD_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("STEWARD_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("STEWARD_LOGGING_LEVEL").or_else(|| read_env("STEWARD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("STEWARD_LOGGING_FORMAT").or_else(|| read_env("STEWARD_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(default_currency) = overrides.default_currency {
            self.workflow.default_currency = default_currency;
        }
        if let Some(chat_transport) = overrides.chat_transport {
            self.chat.transport = chat_transport;
        }
        if let Some(delivery_webhook_url) = overrides.delivery_webhook_url {
            self.delivery.webhook_url = Some(delivery_webhook_url);
        }
        if let Some(execution_base_url) = overrides.execution_base_url {
            self.execution.base_url = Some(execution_base_url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_workflow(&self.workflow)?;
        validate_delivery(&self.delivery)?;
        validate_execution(&self.execution)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("steward.toml"), PathBuf::from("config/steward.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    let currency = workflow.default_currency.trim();
    let well_formed = (3..=5).contains(&currency.len())
        && currency.chars().all(|ch| ch.is_ascii_uppercase());
    if !well_formed {
        return Err(ConfigError::Validation(format!(
            "workflow.default_currency must be an uppercase currency code like `USD` (got `{currency}`)"
        )));
    }

    if workflow.draft_ttl_hours == 0 {
        return Err(ConfigError::Validation(
            "workflow.draft_ttl_hours must be greater than zero".to_string(),
        ));
    }

    if workflow.transfer_ttl_minutes == 0 {
        return Err(ConfigError::Validation(
            "workflow.transfer_ttl_minutes must be greater than zero".to_string(),
        ));
    }

    if workflow.quote_ttl_secs == 0 || workflow.quote_ttl_secs > 3_600 {
        return Err(ConfigError::Validation(
            "workflow.quote_ttl_secs must be in range 1..=3600".to_string(),
        ));
    }

    if workflow.short_answer_max_words == 0 {
        return Err(ConfigError::Validation(
            "workflow.short_answer_max_words must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_delivery(delivery: &DeliveryConfig) -> Result<(), ConfigError> {
    if let Some(webhook_url) = &delivery.webhook_url {
        if !webhook_url.starts_with("http://") && !webhook_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "delivery.webhook_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if !delivery.sender_address.contains('@') {
        return Err(ConfigError::Validation(
            "delivery.sender_address must be an email address".to_string(),
        ));
    }

    if delivery.timeout_secs == 0 || delivery.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "delivery.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_execution(execution: &ExecutionConfig) -> Result<(), ConfigError> {
    if let Some(base_url) = &execution.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "execution.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if execution.timeout_secs == 0 || execution.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "execution.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    workflow: Option<WorkflowPatch>,
    delivery: Option<DeliveryPatch>,
    execution: Option<ExecutionPatch>,
    chat: Option<ChatPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    default_currency: Option<String>,
    draft_ttl_hours: Option<u32>,
    transfer_ttl_minutes: Option<u32>,
    quote_ttl_secs: Option<u32>,
    short_answer_max_words: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct DeliveryPatch {
    webhook_url: Option<String>,
    api_key: Option<String>,
    sender_address: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecutionPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatPatch {
    transport: Option<ChatTransportKind>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_load_without_any_file_or_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.workflow.default_currency == "USD", "default currency should be USD")?;
        ensure(config.workflow.draft_ttl_hours == 48, "drafts should expire after 48 hours")?;
        ensure(config.workflow.quote_ttl().num_seconds() == 120, "quotes should last 120 seconds")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_DELIVERY_API_KEY", "dk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("steward.toml");
            fs::write(
                &path,
                r#"
[delivery]
webhook_url = "https://mail.example.com/hooks/send"
api_key = "${TEST_DELIVERY_API_KEY}"

[workflow]
default_currency = "NGN"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.delivery.api_key.as_ref().map(|key| key.expose_secret() == "dk-from-env")
                    == Some(true),
                "delivery api key should be interpolated from the environment",
            )?;
            ensure(config.workflow.default_currency == "NGN", "file currency should apply")?;
            Ok(())
        })();

        clear_vars(&["TEST_DELIVERY_API_KEY"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("STEWARD_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("STEWARD_WORKFLOW_DEFAULT_CURRENCY", "EUR");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("steward.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[workflow]
default_currency = "GBP"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.workflow.default_currency == "EUR",
                "env currency should win over file and defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["STEWARD_DATABASE_URL", "STEWARD_WORKFLOW_DEFAULT_CURRENCY"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("STEWARD_WORKFLOW_DEFAULT_CURRENCY", "dollars");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("workflow.default_currency")
            );
            ensure(has_message, "validation failure should mention workflow.default_currency")
        })();

        clear_vars(&["STEWARD_WORKFLOW_DEFAULT_CURRENCY"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("STEWARD_EXECUTION_API_KEY", "exec-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("exec-secret-value"),
                "debug output should not contain the execution api key",
            )
        })();

        clear_vars(&["STEWARD_EXECUTION_API_KEY"]);
        result
    }
}
