use serde::Serialize;
use skillpath_core::config::{AppConfig, LoadOptions};
use skillpath_db::{connect_with_config, migrations, DbPool};

use crate::commands::{escape_json, CommandResult};

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

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }

    fn skipped(name: &'static str, because: &str) -> Self {
        Self::new(name, CheckStatus::Skipped, format!("skipped because {because}"))
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

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

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.extend(database_checks(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            for name in ["database_connectivity", "schema_migrations", "approver_directory"] {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    // Warnings are reported but do not fail readiness.
    let healthy = checks
        .iter()
        .all(|check| matches!(check.status, CheckStatus::Pass | CheckStatus::Warn));
    let overall_status = if healthy { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if healthy {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn database_checks(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::new(
                    "database_connectivity",
                    CheckStatus::Fail,
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped("schema_migrations", "the runtime did not start"),
                DoctorCheck::skipped("approver_directory", "the runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::new(
                        "database_connectivity",
                        CheckStatus::Fail,
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped("schema_migrations", "the database is unreachable"),
                    DoctorCheck::skipped("approver_directory", "the database is unreachable"),
                ];
            }
        };

        let mut checks = vec![DoctorCheck::new(
            "database_connectivity",
            CheckStatus::Pass,
            format!("connected using `{}`", config.database.url),
        )];

        let schema = check_schema(&pool).await;
        let schema_ready = schema.status == CheckStatus::Pass;
        checks.push(schema);
        checks.push(if schema_ready {
            check_approver_directory(&pool).await
        } else {
            DoctorCheck::skipped("approver_directory", "the schema is not migrated")
        });

        pool.close().await;
        checks
    })
}

async fn check_schema(pool: &DbPool) -> DoctorCheck {
    match migrations::pending_versions(pool).await {
        Ok(pending) if pending.is_empty() => DoctorCheck::new(
            "schema_migrations",
            CheckStatus::Pass,
            format!("{} migration(s) applied", migrations::known_versions().len()),
        ),
        Ok(pending) => DoctorCheck::new(
            "schema_migrations",
            CheckStatus::Fail,
            format!("pending migration(s) {pending:?}; run `skillpath migrate`"),
        ),
        Err(error) => DoctorCheck::new(
            "schema_migrations",
            CheckStatus::Fail,
            format!("could not read migration state: {error}"),
        ),
    }
}

/// Level-2 and level-3 routing falls back to any active HRBP or L&D member, so
/// an empty role means every request stalls at that level.
async fn check_approver_directory(pool: &DbPool) -> DoctorCheck {
    let counts = sqlx::query_as::<_, (String, i64)>(
        "SELECT role, COUNT(*) FROM employee
         WHERE active = 1 AND role IN ('hrbp', 'learning_and_development')
         GROUP BY role",
    )
    .fetch_all(pool)
    .await;

    let counts = match counts {
        Ok(counts) => counts,
        Err(error) => {
            return DoctorCheck::new(
                "approver_directory",
                CheckStatus::Fail,
                format!("could not read employee directory: {error}"),
            );
        }
    };

    let active = |role: &str| {
        counts.iter().find(|(name, _)| name == role).map(|(_, count)| *count).unwrap_or(0)
    };
    let hrbp = active("hrbp");
    let learning = active("learning_and_development");

    if hrbp > 0 && learning > 0 {
        DoctorCheck::new(
            "approver_directory",
            CheckStatus::Pass,
            format!("{hrbp} active HRBP(s), {learning} active L&D approver(s)"),
        )
    } else {
        DoctorCheck::new(
            "approver_directory",
            CheckStatus::Warn,
            format!(
                "{hrbp} active HRBP(s), {learning} active L&D approver(s); \
                 requests will stop with NoApproverAvailable at an empty level"
            ),
        )
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

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
