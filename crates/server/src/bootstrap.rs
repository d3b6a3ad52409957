use std::sync::Arc;

use steward_chat::{transport_for, workflow_dispatcher, ChatRunner, OutboxReplySink, ReconnectPolicy};
use steward_core::collaborators::{
    DeliveryChannel, DeterministicExecutionClient, ExecutionClient, Services,
};
use steward_core::config::{AppConfig, ChatTransportKind, ConfigError, LoadOptions};
use steward_core::Dispatcher;
use steward_db::{
    connect_with_config, migrations, DbPool, SqlCompletionLedger, SqlDraftRepository,
    SqlWalletDirectory, SqlWorkflowStateStore,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::TracingAuditSink;
use crate::delivery::{LogOnlyDeliveryChannel, WebhookDeliveryChannel};
use crate::execution::HttpExecutionClient;
use crate::render::{RenderError, TeraDocumentRenderer};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub dispatcher: Arc<Dispatcher>,
    pub outbox: Arc<OutboxReplySink>,
}

impl Application {
    pub fn chat_runner(&self) -> ChatRunner {
        ChatRunner::new(
            transport_for(self.config.chat.transport),
            workflow_dispatcher(self.dispatcher.clone()),
            self.outbox.clone(),
            ReconnectPolicy::default(),
        )
    }

    pub fn transport_name(&self) -> &'static str {
        match self.config.chat.transport {
            ChatTransportKind::Console => "console",
            ChatTransportKind::Noop => "noop",
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("document templates failed to load: {0}")]
    Templates(#[from] RenderError),
    #[error("http client setup failed: {0}")]
    HttpClient(#[source] reqwest::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");

    let db_pool = connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let delivery: Arc<dyn DeliveryChannel> = match &config.delivery.webhook_url {
        Some(url) => Arc::new(
            WebhookDeliveryChannel::new(url.clone(), &config.delivery).map_err(BootstrapError::HttpClient)?,
        ),
        None => {
            warn!(
                event_name = "system.bootstrap.delivery_log_only",
                correlation_id = "bootstrap",
                "delivery.webhook_url is not set; documents will be logged instead of sent"
            );
            Arc::new(LogOnlyDeliveryChannel)
        }
    };

    let execution: Arc<dyn ExecutionClient> = match &config.execution.base_url {
        Some(base_url) => Arc::new(
            HttpExecutionClient::new(base_url, &config.execution).map_err(BootstrapError::HttpClient)?,
        ),
        None => {
            warn!(
                event_name = "system.bootstrap.execution_simulated",
                correlation_id = "bootstrap",
                "execution.base_url is not set; quotes and executions are simulated"
            );
            Arc::new(DeterministicExecutionClient::new(config.workflow.quote_ttl()))
        }
    };

    let outbox = Arc::new(OutboxReplySink::default());
    let services = Services {
        states: Arc::new(SqlWorkflowStateStore::new(db_pool.clone())),
        drafts: Arc::new(SqlDraftRepository::new(db_pool.clone())),
        ledger: Arc::new(SqlCompletionLedger::new(db_pool.clone())),
        resources: Arc::new(SqlWalletDirectory::new(db_pool.clone())),
        renderer: Arc::new(TeraDocumentRenderer::embedded()?),
        delivery,
        execution,
        replies: outbox.clone(),
        audit: Arc::new(TracingAuditSink),
    };
    let dispatcher = Arc::new(Dispatcher::new(services, config.workflow.clone()));

    Ok(Application { config, db_pool, dispatcher, outbox })
}
