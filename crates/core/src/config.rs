use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::WorkflowPolicy;
use crate::domain::course::CostLevel;

/// Smallest pool a workflow service can run on.
pub const MIN_POOL_CONNECTIONS: u32 = 2;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub workflow: WorkflowPolicy,
    pub notifications: NotificationsConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug)]
pub struct NotificationsConfig {
    /// When false, notification requests are logged and dropped instead of queued.
    pub enabled: bool,
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
    pub log_format: Option<LogFormat>,
    pub notifications_enabled: Option<bool>,
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
                url: "sqlite://skillpath.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            workflow: WorkflowPolicy::default(),
            notifications: NotificationsConfig { enabled: true },
        }
    }
}

impl FromStr for LogFormat {
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

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("skillpath.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        let ConfigPatch { database, logging, workflow, notifications } = patch;
        database.unwrap_or_default().merge_into(&mut self.database);
        logging.unwrap_or_default().merge_into(&mut self.logging);
        workflow.unwrap_or_default().merge_into(&mut self.workflow);
        if let Some(enabled) = notifications.and_then(|section| section.enabled) {
            self.notifications.enabled = enabled;
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let text = |_: &str, value: &str| Ok(value.to_string());

        set(&mut self.database.url, env_override(&["SKILLPATH_DATABASE_URL"], text)?);
        set(
            &mut self.database.max_connections,
            env_override(&["SKILLPATH_DATABASE_MAX_CONNECTIONS"], parse_env)?,
        );
        set(
            &mut self.database.timeout_secs,
            env_override(&["SKILLPATH_DATABASE_TIMEOUT_SECS"], parse_env)?,
        );

        set(
            &mut self.logging.level,
            env_override(&["SKILLPATH_LOGGING_LEVEL", "SKILLPATH_LOG_LEVEL"], text)?,
        );
        set(
            &mut self.logging.format,
            env_override(&["SKILLPATH_LOGGING_FORMAT", "SKILLPATH_LOG_FORMAT"], |_, value| {
                value.parse::<LogFormat>()
            })?,
        );

        set(
            &mut self.workflow.extended_min_cost_level,
            env_override(&["SKILLPATH_WORKFLOW_EXTENDED_MIN_COST_LEVEL"], parse_env)?,
        );
        set(
            &mut self.workflow.abroad_requires_extended,
            env_override(&["SKILLPATH_WORKFLOW_ABROAD_REQUIRES_EXTENDED"], parse_env)?,
        );
        set(
            &mut self.workflow.chro_min_cost_level,
            env_override(&["SKILLPATH_WORKFLOW_CHRO_MIN_COST_LEVEL"], |key, value| {
                if value.trim().eq_ignore_ascii_case("none") {
                    Ok(None)
                } else {
                    parse_env(key, value).map(Some)
                }
            })?,
        );
        set(
            &mut self.workflow.chro_for_abroad,
            env_override(&["SKILLPATH_WORKFLOW_CHRO_FOR_ABROAD"], parse_env)?,
        );

        set(
            &mut self.notifications.enabled,
            env_override(&["SKILLPATH_NOTIFICATIONS_ENABLED"], parse_env)?,
        );

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        set(&mut self.database.url, overrides.database_url);
        set(&mut self.logging.level, overrides.log_level);
        set(&mut self.logging.format, overrides.log_format);
        set(&mut self.notifications.enabled, overrides.notifications_enabled);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_logging(&self.logging)?;
        validate_workflow(&self.workflow)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("skillpath.toml"), PathBuf::from("config/skillpath.toml")]
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

    // Approver lookups take a second connection while a workflow transaction is open.
    if database.max_connections < MIN_POOL_CONNECTIONS {
        return Err(ConfigError::Validation(format!(
            "database.max_connections must be at least {MIN_POOL_CONNECTIONS}"
        )));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
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

fn validate_workflow(workflow: &WorkflowPolicy) -> Result<(), ConfigError> {
    if let Some(chro) = workflow.chro_min_cost_level {
        if chro < workflow.extended_min_cost_level {
            return Err(ConfigError::Validation(format!(
                "workflow.chro_min_cost_level (`{}`) must not be below workflow.extended_min_cost_level (`{}`)",
                chro.as_str(),
                workflow.extended_min_cost_level.as_str()
            )));
        }
    }

    Ok(())
}

/// First non-blank variable among `keys`, parsed with its own name for error reporting.
fn env_override<T>(
    keys: &[&str],
    parse: impl Fn(&str, &str) -> Result<T, ConfigError>,
) -> Result<Option<T>, ConfigError> {
    keys.iter()
        .find_map(|key| read_env(key).map(|value| (*key, value)))
        .map(|(key, value)| parse(key, &value))
        .transpose()
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    logging: Option<LoggingPatch>,
    workflow: Option<WorkflowPatch>,
    notifications: Option<NotificationsPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    extended_min_cost_level: Option<CostLevel>,
    abroad_requires_extended: Option<bool>,
    chro_min_cost_level: Option<CostLevel>,
    chro_for_abroad: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationsPatch {
    enabled: Option<bool>,
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl DatabasePatch {
    fn merge_into(self, database: &mut DatabaseConfig) {
        set(&mut database.url, self.url);
        set(&mut database.max_connections, self.max_connections);
        set(&mut database.timeout_secs, self.timeout_secs);
    }
}

impl LoggingPatch {
    fn merge_into(self, logging: &mut LoggingConfig) {
        set(&mut logging.level, self.level);
        set(&mut logging.format, self.format);
    }
}

impl WorkflowPatch {
    /// A file can raise the CHRO threshold but not clear it; `none` is env-only.
    fn merge_into(self, workflow: &mut WorkflowPolicy) {
        set(&mut workflow.extended_min_cost_level, self.extended_min_cost_level);
        set(&mut workflow.abroad_requires_extended, self.abroad_requires_extended);
        if self.chro_min_cost_level.is_some() {
            workflow.chro_min_cost_level = self.chro_min_cost_level;
        }
        set(&mut workflow.chro_for_abroad, self.chro_for_abroad);
    }
}
