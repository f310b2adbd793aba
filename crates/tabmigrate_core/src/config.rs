use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::{
    ClientConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY_MS, DEFAULT_TIMEOUT_MS,
    DEFAULT_USER_AGENT,
};
use crate::error::MigrationError;
use crate::models::ToolMigration;

pub const DEFAULT_CONFIG_FILENAME: &str = "tabmigrate.toml";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_HTTP_LOG_LEVEL: &str = "warn";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FileConfig {
    #[serde(default)]
    pub canvas: CanvasSection,
    #[serde(default)]
    pub migration: MigrationSection,
    #[serde(default)]
    pub warehouse: WarehouseSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CanvasSection {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub account_id: Option<i64>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_attempts: Option<usize>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationSection {
    #[serde(default)]
    pub term_ids: Vec<i64>,
    #[serde(default)]
    pub pairs: Vec<ToolMigration>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WarehouseSection {
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub http_level: Option<String>,
}

/// Load and parse a FileConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<FileConfig> {
    if !config_path.exists() {
        return Ok(FileConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: FileConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    File,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::File => "file",
            Self::Default => "default",
        }
    }
}

/// Values given on the command line; they win over env and file.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub api_url: Option<String>,
    pub account_id: Option<i64>,
    pub term_ids: Option<Vec<i64>>,
    pub migrations: Vec<ToolMigration>,
    pub limit: Option<usize>,
    pub warehouse_db: Option<PathBuf>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub account_id: Option<i64>,
    pub term_ids: Vec<i64>,
    pub migrations: Vec<ToolMigration>,
    pub limit: Option<usize>,
    pub warehouse_db: Option<PathBuf>,
    pub log_level: String,
    pub http_log_level: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub max_attempts: usize,
    pub retry_delay_ms: u64,
    pub sources: BTreeMap<&'static str, ValueSource>,
}

impl Settings {
    pub fn client_config(&self) -> Result<ClientConfig, MigrationError> {
        let base_url = self
            .api_url
            .clone()
            .ok_or_else(|| missing("API URL", "--api-url", "API_URL", "canvas.api_url"))?;
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| missing("API key", "<none>", "API_KEY", "canvas.api_key"))?;
        Ok(ClientConfig {
            base_url,
            api_key,
            user_agent: self.user_agent.clone(),
            timeout_ms: self.timeout_ms,
            max_attempts: self.max_attempts,
            retry_delay_ms: self.retry_delay_ms,
        })
    }

    pub fn require_account_id(&self) -> Result<i64, MigrationError> {
        self.account_id.ok_or_else(|| {
            missing("account id", "--account-id", "ACCOUNT_ID", "canvas.account_id")
        })
    }

    pub fn require_term_ids(&self) -> Result<&[i64], MigrationError> {
        if self.term_ids.is_empty() {
            return Err(missing(
                "enrollment term ids",
                "--term-ids",
                "ENROLLMENT_TERM_IDS",
                "migration.term_ids",
            ));
        }
        Ok(&self.term_ids)
    }

    pub fn require_migrations(&self) -> Result<&[ToolMigration], MigrationError> {
        if self.migrations.is_empty() {
            return Err(missing(
                "tool migrations",
                "--migrate",
                "SOURCE_TOOL_ID/TARGET_TOOL_ID",
                "migration.pairs",
            ));
        }
        Ok(&self.migrations)
    }

    pub fn source_of(&self, name: &str) -> ValueSource {
        self.sources.get(name).copied().unwrap_or(ValueSource::Default)
    }

    pub fn diagnostics(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "api_url: {} ({})",
            self.api_url.as_deref().unwrap_or("<unset>"),
            self.source_of("api_url").as_str()
        ));
        lines.push(format!(
            "api_key: {} ({})",
            if self.api_key.is_some() { "<set>" } else { "<unset>" },
            self.source_of("api_key").as_str()
        ));
        lines.push(format!(
            "account_id: {} ({})",
            self.account_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "<unset>".to_string()),
            self.source_of("account_id").as_str()
        ));
        lines.push(format!(
            "term_ids: {:?} ({})",
            self.term_ids,
            self.source_of("term_ids").as_str()
        ));
        lines.push(format!(
            "migrations: {} ({})",
            self.migrations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            self.source_of("migrations").as_str()
        ));
        lines.push(format!(
            "warehouse_db: {} ({})",
            self.warehouse_db
                .as_deref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<none>".to_string()),
            self.source_of("warehouse_db").as_str()
        ));
        lines.push(format!(
            "log_level: {} ({})",
            self.log_level,
            self.source_of("log_level").as_str()
        ));
        lines.push(format!(
            "http: timeout_ms={} max_attempts={} retry_delay_ms={}",
            self.timeout_ms, self.max_attempts, self.retry_delay_ms
        ));
        lines.join("\n")
    }
}

fn missing(what: &str, flag: &str, env_key: &str, file_key: &str) -> MigrationError {
    MigrationError::Config(format!(
        "{what} is not set (flag {flag}, env {env_key}, or config key {file_key})"
    ))
}

/// Resolve settings with precedence flag > env > file > default.
pub fn resolve_settings(file: &FileConfig, overrides: &SettingsOverrides) -> Result<Settings> {
    resolve_settings_with(file, overrides, |key| env::var(key).ok())
}

pub fn resolve_settings_with(
    file: &FileConfig,
    overrides: &SettingsOverrides,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    let env_value = |key: &str| {
        env_lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };
    let env_parsed = |key: &str| -> Result<Option<i64>, MigrationError> {
        env_value(key)
            .map(|value| parse_number::<i64>(key, &value))
            .transpose()
    };
    let mut sources = BTreeMap::new();

    let api_url = pick(
        &mut sources,
        "api_url",
        overrides.api_url.clone(),
        env_value("API_URL"),
        file.canvas.api_url.clone(),
    );
    let api_key = pick(
        &mut sources,
        "api_key",
        None,
        env_value("API_KEY"),
        file.canvas.api_key.clone(),
    );
    let account_id = pick(
        &mut sources,
        "account_id",
        overrides.account_id,
        env_parsed("ACCOUNT_ID")?,
        file.canvas.account_id,
    );

    let env_terms = match env_value("ENROLLMENT_TERM_IDS").or_else(|| env_value("ENROLLMENT_TERM_ID")) {
        Some(value) => Some(convert_csv_to_int_list(&value)?),
        None => None,
    };
    let file_terms = (!file.migration.term_ids.is_empty()).then(|| file.migration.term_ids.clone());
    let term_ids = pick(
        &mut sources,
        "term_ids",
        overrides.term_ids.clone(),
        env_terms,
        file_terms,
    )
    .unwrap_or_default();

    let env_pair = match (env_parsed("SOURCE_TOOL_ID")?, env_parsed("TARGET_TOOL_ID")?) {
        (Some(source), Some(target)) => Some(vec![ToolMigration::new(source, target)]),
        (None, None) => None,
        _ => {
            return Err(MigrationError::Config(
                "SOURCE_TOOL_ID and TARGET_TOOL_ID must be set together".to_string(),
            )
            .into());
        }
    };
    let migrations = pick(
        &mut sources,
        "migrations",
        (!overrides.migrations.is_empty()).then(|| overrides.migrations.clone()),
        env_pair,
        (!file.migration.pairs.is_empty()).then(|| file.migration.pairs.clone()),
    )
    .unwrap_or_default();

    let limit = pick(
        &mut sources,
        "limit",
        overrides.limit,
        env_value("COURSE_LIMIT")
            .map(|value| parse_number::<usize>("COURSE_LIMIT", &value))
            .transpose()?,
        file.migration.limit,
    );
    let warehouse_db = pick(
        &mut sources,
        "warehouse_db",
        overrides.warehouse_db.clone(),
        env_value("WAREHOUSE_DB_PATH").map(PathBuf::from),
        file.warehouse.db_path.clone(),
    );
    let log_level = pick(
        &mut sources,
        "log_level",
        overrides.log_level.clone(),
        env_value("LOG_LEVEL"),
        file.logging.level.clone(),
    )
    .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    let http_log_level = pick(
        &mut sources,
        "http_log_level",
        None,
        env_value("HTTP_LOG_LEVEL"),
        file.logging.http_level.clone(),
    )
    .unwrap_or_else(|| DEFAULT_HTTP_LOG_LEVEL.to_string());

    let user_agent = env_value("HTTP_USER_AGENT")
        .or_else(|| file.canvas.user_agent.clone())
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
    let timeout_ms = env_value("HTTP_TIMEOUT_MS")
        .map(|value| parse_number::<u64>("HTTP_TIMEOUT_MS", &value))
        .transpose()?
        .or(file.canvas.timeout_ms)
        .unwrap_or(DEFAULT_TIMEOUT_MS);
    let max_attempts = env_value("HTTP_MAX_ATTEMPTS")
        .map(|value| parse_number::<usize>("HTTP_MAX_ATTEMPTS", &value))
        .transpose()?
        .or(file.canvas.max_attempts)
        .unwrap_or(DEFAULT_MAX_ATTEMPTS);
    let retry_delay_ms = env_value("HTTP_RETRY_DELAY_MS")
        .map(|value| parse_number::<u64>("HTTP_RETRY_DELAY_MS", &value))
        .transpose()?
        .or(file.canvas.retry_delay_ms)
        .unwrap_or(DEFAULT_RETRY_DELAY_MS);

    Ok(Settings {
        api_url,
        api_key,
        account_id,
        term_ids,
        migrations,
        limit,
        warehouse_db,
        log_level,
        http_log_level,
        user_agent,
        timeout_ms,
        max_attempts,
        retry_delay_ms,
        sources,
    })
}

fn pick<T>(
    sources: &mut BTreeMap<&'static str, ValueSource>,
    name: &'static str,
    flag: Option<T>,
    env_value: Option<T>,
    file_value: Option<T>,
) -> Option<T> {
    let (value, source) = match (flag, env_value, file_value) {
        (Some(value), _, _) => (value, ValueSource::Flag),
        (None, Some(value), _) => (value, ValueSource::Env),
        (None, None, Some(value)) => (value, ValueSource::File),
        (None, None, None) => return None,
    };
    sources.insert(name, source);
    Some(value)
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, MigrationError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| MigrationError::Config(format!("{key} must be a number, got {value:?}")))
}

/// Parses a comma-separated list of integer ids such as `6,7,8`.
pub fn convert_csv_to_int_list(csv: &str) -> Result<Vec<i64>, MigrationError> {
    csv.split(',')
        .map(|item| {
            item.trim().parse::<i64>().map_err(|_| {
                MigrationError::Config(format!(
                    "one or more of the items in {csv:?} could not be converted to an integer"
                ))
            })
        })
        .collect()
}
