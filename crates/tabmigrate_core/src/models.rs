use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MigrationError;

/// Every external tool tab id is this prefix followed by the tool id.
pub const TOOL_TAB_ID_PREFIX: &str = "context_external_tool_";
pub const EXTERNAL_TAB_TYPE: &str = "external";

pub trait Entity {
    fn id(&self) -> i64;
}

pub fn find_entity_by_id<T: Entity>(id: i64, entities: &[T]) -> Option<&T> {
    entities.iter().find(|entity| entity.id() == id)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExternalTool {
    pub id: i64,
    pub name: String,
}

impl Entity for ExternalTool {
    fn id(&self) -> i64 {
        self.id
    }
}

impl fmt::Display for ExternalTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Course {
    pub id: i64,
    pub name: String,
    #[serde(rename = "enrollment_term_id", default)]
    pub term_id: Option<i64>,
}

impl Entity for Course {
    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalToolTab {
    pub id: String,
    pub label: String,
    pub tool_id: i64,
    pub is_hidden: bool,
    pub position: i64,
}

impl fmt::Display for ExternalToolTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [tool {}, position {}, {}]",
            self.label,
            self.tool_id,
            self.position,
            if self.is_hidden { "hidden" } else { "visible" }
        )
    }
}

#[derive(Debug, Deserialize)]
struct TabRecord {
    id: String,
    label: String,
    #[serde(default)]
    hidden: Option<bool>,
    position: i64,
}

impl ExternalToolTab {
    /// Parses a tab payload returned by the tabs API.
    pub fn from_value(value: &Value) -> Result<Self> {
        let record = TabRecord::deserialize(value).context("failed to decode course tab")?;
        let tool_id = parse_tool_id(&record.id)?;
        Ok(Self {
            id: record.id,
            label: record.label,
            tool_id,
            is_hidden: record.hidden == Some(true),
            position: record.position,
        })
    }
}

pub fn parse_tool_id(tab_id: &str) -> Result<i64, MigrationError> {
    let raw = tab_id
        .strip_prefix(TOOL_TAB_ID_PREFIX)
        .ok_or_else(|| MigrationError::TabContract {
            tab_id: tab_id.to_string(),
            detail: format!("missing prefix {TOOL_TAB_ID_PREFIX:?}"),
        })?;
    raw.parse::<i64>().map_err(|error| MigrationError::TabContract {
        tab_id: tab_id.to_string(),
        detail: error.to_string(),
    })
}

pub fn is_external_tab(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some(EXTERNAL_TAB_TYPE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ToolMigration {
    pub source_id: i64,
    pub target_id: i64,
}

impl ToolMigration {
    pub fn new(source_id: i64, target_id: i64) -> Self {
        Self {
            source_id,
            target_id,
        }
    }

    /// Parses `SOURCE:TARGET`.
    pub fn parse(value: &str) -> Result<Self, MigrationError> {
        let invalid = || {
            MigrationError::Config(format!(
                "invalid migration {value:?} (expected SOURCE_TOOL_ID:TARGET_TOOL_ID)"
            ))
        };
        let (source, target) = value.split_once(':').ok_or_else(invalid)?;
        let source_id = source.trim().parse::<i64>().map_err(|_| invalid())?;
        let target_id = target.trim().parse::<i64>().map_err(|_| invalid())?;
        Ok(Self::new(source_id, target_id))
    }
}

impl fmt::Display for ToolMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_id, self.target_id)
    }
}
