use chrono::Utc;
use serde_json::json;
use steward_core::domain::workflow::UserId;
use steward_db::{CustodyWallet, SqlWalletDirectory};

use crate::commands::{load_config, open_database, runtime, CommandResult, Failure};

pub fn register(user_id: &str, address: &str, network: &str) -> CommandResult {
    let (user_id, address, network) = (user_id.trim(), address.trim(), network.trim());
    if user_id.is_empty() || address.is_empty() || network.is_empty() {
        return CommandResult::failure(
            "wallet.register",
            "invalid_input",
            "user id, address and network must all be non-empty",
            2,
        );
    }

    let wallet = CustodyWallet {
        user_id: UserId(user_id.to_owned()),
        address: address.to_owned(),
        network: network.to_owned(),
        created_at: Utc::now(),
    };
    with_directory("wallet.register", |directory| async move {
        directory.register(&wallet).await.map_err(|error| ("database", error.to_string(), 4u8))?;
        Ok(CommandResult::success(
            "wallet.register",
            format!("registered {} wallet `{}` for {}", wallet.network, wallet.address, wallet.user_id),
        ))
    })
}

pub fn show(user_id: &str) -> CommandResult {
    let user_id = UserId(user_id.trim().to_owned());
    with_directory("wallet.show", |directory| async move {
        let wallet =
            directory.find(&user_id).await.map_err(|error| ("database", error.to_string(), 4u8))?;
        Ok(match wallet {
            Some(wallet) => CommandResult::success_with_data(
                "wallet.show",
                format!("{} has a custody wallet", wallet.user_id),
                Some(json!({
                    "user_id": wallet.user_id.0,
                    "address": wallet.address,
                    "network": wallet.network,
                    "created_at": wallet.created_at.to_rfc3339(),
                })),
            ),
            None => CommandResult::failure(
                "wallet.show",
                "not_found",
                format!("no custody wallet registered for {user_id}"),
                7,
            ),
        })
    })
}

pub fn remove(user_id: &str) -> CommandResult {
    let user_id = UserId(user_id.trim().to_owned());
    with_directory("wallet.remove", |directory| async move {
        let removed =
            directory.remove(&user_id).await.map_err(|error| ("database", error.to_string(), 4u8))?;
        Ok(if removed {
            CommandResult::success("wallet.remove", format!("removed custody wallet for {user_id}"))
        } else {
            CommandResult::failure(
                "wallet.remove",
                "not_found",
                format!("no custody wallet registered for {user_id}"),
                7,
            )
        })
    })
}

fn with_directory<F, Fut>(command: &str, action: F) -> CommandResult
where
    F: FnOnce(SqlWalletDirectory) -> Fut,
    Fut: std::future::Future<Output = Result<CommandResult, Failure>>,
{
    let config = match load_config(command) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime(command) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let outcome = action(SqlWalletDirectory::new(pool.clone())).await;
        pool.close().await;
        outcome
    });

    result.unwrap_or_else(|(error_class, message, exit_code)| {
        CommandResult::failure(command, error_class, message, exit_code)
    })
}
