pub mod audit;
pub mod config;
pub mod doctor;
pub mod migrate;

use std::future::Future;

use serde::Serialize;
use serde_json::Value;
use skillpath_core::config::{AppConfig, LoadOptions};
use skillpath_db::{connect_with_config, DbPool};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// Failure raised inside a database-backed command: `(error_class, message, exit_code)`.
pub(crate) type CommandFailure = (&'static str, String, u8);

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    /// Plain-text output for commands that are read by humans.
    pub fn text(output: String) -> Self {
        Self { exit_code: 0, output }
    }
}

/// Loads config, opens a pool, runs `body` on a current-thread runtime and
/// closes the pool. Exit codes: 2 config, 3 runtime, 4 connectivity.
pub(crate) fn with_database<T, F, Fut>(command: &str, body: F) -> Result<T, CommandResult>
where
    F: FnOnce(DbPool, AppConfig) -> Fut,
    Fut: Future<Output = Result<T, CommandFailure>>,
{
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })?;

    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
            CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            )
        })?;

    runtime
        .block_on(async {
            let pool = connect_with_config(&config.database)
                .await
                .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

            let outcome = body(pool.clone(), config.clone()).await;
            pool.close().await;
            outcome
        })
        .map_err(|(error_class, message, exit_code)| {
            CommandResult::failure(command, error_class, message, exit_code)
        })
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            escape_json(&error.to_string())
        )
    })
}

pub(crate) fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
