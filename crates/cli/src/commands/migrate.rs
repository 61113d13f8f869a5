use std::path::Path;

use crate::commands::{load_config, runtime, CommandResult, Failure};
use resourcing_db::{connect_with_config, migrations};

pub fn run(config_path: Option<&Path>) -> CommandResult {
    let result = load_config(config_path).and_then(|config| {
        runtime()?.block_on(async {
            let pool = connect_with_config(&config.database)
                .await
                .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
            migrations::run_pending(&pool)
                .await
                .map_err(|error| ("migration", error.to_string(), 5u8))?;
            pool.close().await;
            Ok::<(), Failure>(())
        })
    });

    match result {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
