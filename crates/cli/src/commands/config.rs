use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use skillpath_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::CommandResult;

struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    let file_path = detect_config_path();
    let file_doc = load_config_file_doc(file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(&field, file_doc.as_ref(), file_path.as_deref());
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }

    CommandResult::text(lines.join("\n"))
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let workflow = &config.workflow;
    vec![
        Field {
            key: "database.url",
            env_keys: &["SKILLPATH_DATABASE_URL"],
            value: config.database.url.clone(),
        },
        Field {
            key: "database.max_connections",
            env_keys: &["SKILLPATH_DATABASE_MAX_CONNECTIONS"],
            value: config.database.max_connections.to_string(),
        },
        Field {
            key: "database.timeout_secs",
            env_keys: &["SKILLPATH_DATABASE_TIMEOUT_SECS"],
            value: config.database.timeout_secs.to_string(),
        },
        Field {
            key: "logging.level",
            env_keys: &["SKILLPATH_LOGGING_LEVEL", "SKILLPATH_LOG_LEVEL"],
            value: config.logging.level.clone(),
        },
        Field {
            key: "logging.format",
            env_keys: &["SKILLPATH_LOGGING_FORMAT", "SKILLPATH_LOG_FORMAT"],
            value: config.logging.format.as_str().to_string(),
        },
        Field {
            key: "workflow.extended_min_cost_level",
            env_keys: &["SKILLPATH_WORKFLOW_EXTENDED_MIN_COST_LEVEL"],
            value: workflow.extended_min_cost_level.as_str().to_string(),
        },
        Field {
            key: "workflow.abroad_requires_extended",
            env_keys: &["SKILLPATH_WORKFLOW_ABROAD_REQUIRES_EXTENDED"],
            value: workflow.abroad_requires_extended.to_string(),
        },
        Field {
            key: "workflow.chro_min_cost_level",
            env_keys: &["SKILLPATH_WORKFLOW_CHRO_MIN_COST_LEVEL"],
            value: workflow
                .chro_min_cost_level
                .map(|level| level.as_str().to_string())
                .unwrap_or_else(|| "none".to_string()),
        },
        Field {
            key: "workflow.chro_for_abroad",
            env_keys: &["SKILLPATH_WORKFLOW_CHRO_FOR_ABROAD"],
            value: workflow.chro_for_abroad.to_string(),
        },
        Field {
            key: "notifications.enabled",
            env_keys: &["SKILLPATH_NOTIFICATIONS_ENABLED"],
            value: config.notifications.enabled.to_string(),
        },
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("skillpath.toml"), PathBuf::from("config/skillpath.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(field: &Field, file_doc: Option<&Value>, file_path: Option<&Path>) -> String {
    if let Some(env_key) = field.env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if file_doc.is_some_and(|doc| contains_path(doc, field.key)) {
        let file_path = file_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
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

#[cfg(test)]
mod tests {
    use super::contains_path;

    #[test]
    fn dotted_paths_resolve_through_nested_tables() {
        let doc: toml::Value = "[workflow]\nchro_for_abroad = true\n".parse().expect("toml");

        assert!(contains_path(&doc, "workflow.chro_for_abroad"));
        assert!(!contains_path(&doc, "workflow.extended_min_cost_level"));
        assert!(!contains_path(&doc, "database.url"));
    }
}
