use std::sync::Arc;

use chrono::Utc;
use steward_core::audit::InMemoryAuditSink;
use steward_core::sweep::{ExpirySweeper, SweepReport};
use steward_db::{SqlDraftRepository, SqlWorkflowStateStore};

use crate::commands::{load_config, open_database, runtime, CommandResult, Failure};

pub fn run(dry_run: bool) -> CommandResult {
    let config = match load_config("sweep") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("sweep") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let now = Utc::now();
    let correlation_id = format!("sweep-{}", now.timestamp());
    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let sweeper = ExpirySweeper::new(
            Arc::new(SqlWorkflowStateStore::new(pool.clone())),
            Arc::new(SqlDraftRepository::new(pool.clone())),
            Arc::new(InMemoryAuditSink::default()),
        );
        let report = sweeper
            .sweep(now, dry_run, &correlation_id)
            .await
            .map_err(|error| ("sweep", error.to_string(), 6u8));
        pool.close().await;
        Ok::<SweepReport, Failure>(report?)
    });

    match result {
        Ok(report) => {
            let message = if dry_run {
                format!("would purge {} expired workflows", report.purged())
            } else {
                format!(
                    "purged {} expired workflows and cancelled {} drafts",
                    report.purged(),
                    report.cancelled_drafts()
                )
            };
            CommandResult::success_with_data("sweep", message, serde_json::to_value(&report).ok())
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("sweep", error_class, message, exit_code)
        }
    }
}
