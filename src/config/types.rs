//! Raw catalog types matching `catalog/*.json`.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Controller operations a resource exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Grid,
    List,
    Read,
    Create,
    Update,
    Delete,
    DeleteBulk,
    RelatedInfo,
    Reorder,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Grid => "grid",
            Operation::List => "list",
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::DeleteBulk => "delete_bulk",
            Operation::RelatedInfo => "related_info",
            Operation::Reorder => "reorder",
        }
    }
}

fn default_operations() -> Vec<Operation> {
    vec![
        Operation::Grid,
        Operation::List,
        Operation::Read,
        Operation::Create,
        Operation::Update,
        Operation::Delete,
        Operation::DeleteBulk,
        Operation::RelatedInfo,
    ]
}

/// Per-row actions invoked as `PUT /{resource}/{id}/{action}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAction {
    /// Un-archive a soft-deleted row.
    Restore,
    /// Move a resident to another bed.
    Move,
    /// Recompute ledger totals from its entries.
    Recalculate,
}

impl std::str::FromStr for ResourceAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restore" => Ok(ResourceAction::Restore),
            "move" => Ok(ResourceAction::Move),
            "recalculate" => Ok(ResourceAction::Recalculate),
            other => Err(format!("unknown action: {}", other)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnTypeConfig {
    Simple(String),
    Parameterized { name: String, params: Option<Vec<u32>> },
}

impl ColumnTypeConfig {
    pub fn name(&self) -> &str {
        match self {
            ColumnTypeConfig::Simple(s) => s.as_str(),
            ColumnTypeConfig::Parameterized { name, .. } => name.as_str(),
        }
    }
}

/// Column default: a JSON scalar literal, or a raw SQL expression such as `NOW()`.
#[derive(Clone, Debug, Serialize)]
pub enum ColumnDefaultConfig {
    Literal(serde_json::Value),
    Expression { expression: String },
}

impl<'de> Deserialize<'de> for ColumnDefaultConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = serde_json::Value::deserialize(deserializer)?;
        match v {
            serde_json::Value::Object(mut obj) => {
                if let Some(serde_json::Value::String(s)) = obj.remove("expression") {
                    return Ok(ColumnDefaultConfig::Expression { expression: s });
                }
                if let Some(lit) = obj.remove("value") {
                    return Ok(ColumnDefaultConfig::Literal(lit));
                }
                Err(serde::de::Error::custom(format!(
                    "column default object must have \"expression\" or \"value\"; got keys: {:?}",
                    obj.keys().collect::<Vec<_>>()
                )))
            }
            serde_json::Value::Array(_) => Err(serde::de::Error::custom(
                "column default must be a scalar or { \"expression\": \"...\" }",
            )),
            scalar => Ok(ColumnDefaultConfig::Literal(scalar)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ColumnTypeConfig,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<ColumnDefaultConfig>,
    /// Included in the grid `q` free-text search.
    #[serde(default)]
    pub searchable: bool,
    #[serde(default = "default_true")]
    pub sortable: bool,
    /// Written by the server only (e.g. ledger totals); request bodies may not set it.
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub id: String,
    pub path_segment: String,
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    /// Permission key checked by the grant layer.
    pub grant_key: String,
    #[serde(default)]
    pub not_found_code: Option<u32>,
    pub columns: Vec<ColumnConfig>,
    #[serde(default = "default_operations")]
    pub operations: Vec<Operation>,
    /// Archive instead of delete.
    #[serde(default)]
    pub soft_delete: bool,
    /// Query parameters accepted as exact-match scoping filters (e.g. `facility_id`).
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub unique: Vec<Vec<String>>,
    /// Column names never exposed in API responses.
    #[serde(default)]
    pub sensitive_columns: Vec<String>,
    #[serde(default)]
    pub validation: HashMap<String, ValidationRule>,
    /// Sort keys used when a request gives none; `-` prefix for descending.
    #[serde(default)]
    pub default_sort: Vec<String>,
    #[serde(default)]
    pub reorder_column: Option<String>,
    #[serde(default)]
    pub actions: Vec<ResourceAction>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    #[default]
    Restrict,
    Cascade,
    SetNull,
}

impl OnDelete {
    pub fn as_sql(&self) -> &'static str {
        match self {
            OnDelete::Restrict => "RESTRICT",
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationshipConfig {
    pub id: String,
    pub from_resource: String,
    pub from_column: String,
    pub to_resource: String,
    #[serde(default = "default_id_column")]
    pub to_column: String,
    #[serde(default)]
    pub on_delete: OnDelete,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_id_column() -> String {
    "id".into()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexColumnEntry {
    Name(String),
    Spec { name: String, direction: Option<String> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    pub id: String,
    pub resource: String,
    pub name: String,
    #[serde(default)]
    pub unique: bool,
    pub columns: Vec<IndexColumnEntry>,
    #[serde(default, rename = "where")]
    pub where_: Option<String>,
}

/// The whole catalog.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FullConfig {
    pub resources: Vec<ResourceConfig>,
    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
}
