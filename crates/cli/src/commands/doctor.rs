use std::path::Path;

use resourcing_core::config::{AppConfig, NotifyMode};
use resourcing_db::{connect_with_config, ping};
use serde::Serialize;
use sqlx::Row;

use crate::commands::{load_config, runtime, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(config_path: Option<&Path>, json_output: bool) -> CommandResult {
    let report = build_report(config_path);
    let exit_code = if report.overall_status == CheckStatus::Fail { 7 } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(config_path: Option<&Path>) -> DoctorReport {
    let mut checks = Vec::new();

    match load_config(config_path) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_notify_transport(&config));
            checks.extend(check_database(&config));
        }
        Err((_, message, _)) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: message,
            });
            for name in ["notify_transport", "database_connectivity", "notification_outbox"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let warned = checks.iter().any(|check| check.status == CheckStatus::Warn);
    let (overall_status, summary) = match (failed, warned) {
        (true, _) => (CheckStatus::Fail, "doctor: one or more readiness checks failed"),
        (false, true) => (CheckStatus::Warn, "doctor: ready, with warnings"),
        (false, false) => (CheckStatus::Pass, "doctor: all readiness checks passed"),
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn check_notify_transport(config: &AppConfig) -> DoctorCheck {
    match config.notify.mode {
        NotifyMode::Live => DoctorCheck {
            name: "notify_transport",
            status: CheckStatus::Pass,
            details: format!("live delivery via {}", config.notify.base_url),
        },
        NotifyMode::LogOnly => DoctorCheck {
            name: "notify_transport",
            status: CheckStatus::Warn,
            details: "log_only mode: e-mails are written to the log and not sent".to_string(),
        },
    }
}

/// Connectivity plus a look at the outbox for tasks that gave up.
fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err((_, message, _)) => {
            return vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: message,
            }];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to connect to database: {error}"),
                }];
            }
        };

        let connectivity = match ping(&pool).await {
            Ok(()) => DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Pass,
                details: format!("connected using `{}`", config.database.url),
            },
            Err(error) => DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("database query failed: {error}"),
            },
        };
        let outbox = check_outbox(&pool).await;
        pool.close().await;

        vec![connectivity, outbox]
    })
}

async fn check_outbox(pool: &resourcing_db::DbPool) -> DoctorCheck {
    let row = sqlx::query(
        "SELECT
            COALESCE(SUM(CASE WHEN state = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
            COALESCE(SUM(CASE WHEN state IN ('queued', 'retryable_failed') THEN 1 ELSE 0 END), 0) AS pending
         FROM notification_task",
    )
    .fetch_one(pool)
    .await;

    let counts = row.and_then(|row| {
        let failed: i64 = row.try_get("failed")?;
        let pending: i64 = row.try_get("pending")?;
        Ok((failed, pending))
    });

    match counts {
        Ok((0, pending)) => DoctorCheck {
            name: "notification_outbox",
            status: CheckStatus::Pass,
            details: format!("{pending} pending, none failed"),
        },
        Ok((failed, pending)) => DoctorCheck {
            name: "notification_outbox",
            status: CheckStatus::Warn,
            details: format!("{pending} pending, {failed} failed permanently"),
        },
        Err(error) => DoctorCheck {
            name: "notification_outbox",
            status: CheckStatus::Skipped,
            details: format!("outbox not readable (run `resourcing migrate`?): {error}"),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
