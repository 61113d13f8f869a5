use std::path::Path;

use crate::commands::{load_config, runtime, CommandResult, Failure};
use resourcing_db::{connect_with_config, migrations, RequestSeedInfo, SeedDataset};

/// Loads the demo users and requests. With `clean`, removes the seeded
/// requests instead; seeded users stay because history refers to them.
pub fn run(config_path: Option<&Path>, clean: bool) -> CommandResult {
    let result = load_config(config_path).and_then(|config| {
        runtime()?.block_on(async {
            let pool = connect_with_config(&config.database)
                .await
                .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

            migrations::run_pending(&pool)
                .await
                .map_err(|error| ("migration", error.to_string(), 5u8))?;

            let outcome = if clean { clean_dataset(&pool).await } else { load_dataset(&pool).await };
            pool.close().await;
            outcome
        })
    });

    match result {
        Ok(message) => CommandResult::success("seed", message),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

async fn load_dataset(pool: &resourcing_db::DbPool) -> Result<String, Failure> {
    let seeded = SeedDataset::load(pool)
        .await
        .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

    let verification = SeedDataset::verify(pool)
        .await
        .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
    if !verification.all_present {
        return Err(("seed_verification", verification_failure(&verification.checks), 6));
    }

    Ok(format!(
        "seed dataset loaded ({} users):\n{}",
        seeded.users_seeded,
        describe_requests(&seeded.requests_seeded)
    ))
}

async fn clean_dataset(pool: &resourcing_db::DbPool) -> Result<String, Failure> {
    SeedDataset::clean(pool).await.map_err(|error| ("seed_clean", error.to_string(), 5u8))?;
    Ok("seeded resourcing requests removed".to_string())
}

fn describe_requests(requests: &[RequestSeedInfo]) -> String {
    requests
        .iter()
        .map(|request| format!("  - {}: {}", request.request_id, request.description))
        .collect::<Vec<_>>()
        .join("\n")
}

fn verification_failure(checks: &[(&'static str, bool)]) -> String {
    let failed_checks =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
