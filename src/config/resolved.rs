//! Resolved resource model: catalog validated and flattened for runtime use.

use crate::config::{ColumnDefaultConfig, OnDelete, Operation, ResourceAction, ValidationRule};
use crate::error::{codes, AppError};
use std::collections::{HashMap, HashSet};

/// Coarse value kind of a column, derived from its SQL type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Numeric,
    Text,
    Boolean,
    Date,
    Timestamp,
    Json,
    Uuid,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Integer => "integer",
            ColumnKind::Numeric => "numeric",
            ColumnKind::Text => "text",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Date => "date",
            ColumnKind::Timestamp => "timestamp",
            ColumnKind::Json => "json",
            ColumnKind::Uuid => "uuid",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ColumnKind,
    /// PostgreSQL type used for parameter casts (e.g. "bigint", "numeric").
    pub pg_type: String,
    pub nullable: bool,
    pub default: Option<ColumnDefaultConfig>,
    pub searchable: bool,
    pub sortable: bool,
    /// Maintained by the store (id, created_at, updated_at, archived_at); never written from a request body.
    pub managed: bool,
    /// Stored column the service computes; rejected in request bodies.
    pub read_only: bool,
    /// Declared `numeric(precision, scale)`.
    pub precision: Option<u32>,
    pub scale: Option<u32>,
}

impl ColumnInfo {
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// A relationship that points at this resource from another one.
#[derive(Clone, Debug)]
pub struct Reference {
    pub relationship_id: String,
    pub from_resource: String,
    pub from_column: String,
    pub to_column: String,
    pub on_delete: OnDelete,
}

/// A column of this resource that points at another resource.
#[derive(Clone, Debug)]
pub struct ForeignKey {
    pub column: String,
    pub to_resource: String,
    pub to_column: String,
}

#[derive(Clone, Debug)]
pub struct ResolvedResource {
    pub id: String,
    pub schema_name: String,
    pub table_name: String,
    pub path_segment: String,
    pub grant_key: String,
    pub not_found_code: u32,
    pub columns: Vec<ColumnInfo>,
    pub operations: HashSet<Operation>,
    pub soft_delete: bool,
    pub scope: Vec<String>,
    pub unique: Vec<Vec<String>>,
    pub sensitive_columns: HashSet<String>,
    pub validation: HashMap<String, ValidationRule>,
    pub default_sort: Vec<String>,
    pub reorder_column: Option<String>,
    pub actions: HashSet<ResourceAction>,
    pub references: Vec<Reference>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl ResolvedResource {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn allows(&self, op: Operation) -> bool {
        self.operations.contains(&op)
    }

    pub fn ensure_allowed(&self, op: Operation) -> Result<(), AppError> {
        if self.allows(op) {
            Ok(())
        } else {
            Err(AppError::BadRequest(format!(
                "{} not allowed on {}",
                op.as_str(),
                self.path_segment
            )))
        }
    }

    pub fn not_found(&self, id: impl ToString) -> AppError {
        AppError::NotFound {
            resource: self.id.clone(),
            id: id.to_string(),
            code: self.not_found_code,
        }
    }

    /// Columns a request body may write.
    pub fn writable_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| !c.managed && !c.read_only)
    }

    /// Columns the store writes on insert and update, read-only ones included.
    pub fn stored_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| !c.managed)
    }

    /// Remove sensitive columns from a row before it leaves the API.
    pub fn redact(&self, mut row: serde_json::Value) -> serde_json::Value {
        if let serde_json::Value::Object(ref mut map) = row {
            for col in &self.sensitive_columns {
                map.remove(col);
            }
        }
        row
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedModel {
    pub resources: Vec<ResolvedResource>,
    pub by_path: HashMap<String, usize>,
    pub by_id: HashMap<String, usize>,
}

impl ResolvedModel {
    pub fn resource_by_path(&self, path: &str) -> Option<&ResolvedResource> {
        self.by_path.get(path).map(|&i| &self.resources[i])
    }

    pub fn resource(&self, id: &str) -> Option<&ResolvedResource> {
        self.by_id.get(id).map(|&i| &self.resources[i])
    }

    /// Lookup by path segment, mapped to a not-found error for unknown segments.
    pub fn require_path(&self, path: &str) -> Result<&ResolvedResource, AppError> {
        self.resource_by_path(path).ok_or_else(|| AppError::NotFound {
            resource: "resource".into(),
            id: path.to_string(),
            code: codes::NOT_FOUND,
        })
    }

    pub fn require(&self, id: &str) -> Result<&ResolvedResource, AppError> {
        self.resource(id).ok_or_else(|| {
            AppError::Config(crate::error::ConfigError::MissingReference {
                kind: "resource",
                id: id.to_string(),
            })
        })
    }
}
