//! Load the catalog (built in or from a directory) and resolve it into the runtime model.

use crate::config::resolved::{ColumnInfo, ColumnKind, ForeignKey, Reference, ResolvedModel, ResolvedResource};
use crate::config::types::*;
use crate::config::validate;
use crate::error::{codes, ConfigError};
use std::collections::HashMap;
use std::path::Path;

const RESOURCES_JSON: &str = include_str!("../../catalog/resources.json");
const RELATIONSHIPS_JSON: &str = include_str!("../../catalog/relationships.json");
const INDEXES_JSON: &str = include_str!("../../catalog/indexes.json");

pub const DEFAULT_SCHEMA: &str = "public";

/// Catalog compiled into the binary.
pub fn builtin_catalog() -> Result<FullConfig, ConfigError> {
    parse_catalog(RESOURCES_JSON, RELATIONSHIPS_JSON, INDEXES_JSON)
}

fn parse_catalog(resources: &str, relationships: &str, indexes: &str) -> Result<FullConfig, ConfigError> {
    let resources = serde_json::from_str(resources).map_err(|e| ConfigError::Load(format!("resources.json: {}", e)))?;
    let relationships =
        serde_json::from_str(relationships).map_err(|e| ConfigError::Load(format!("relationships.json: {}", e)))?;
    let indexes = serde_json::from_str(indexes).map_err(|e| ConfigError::Load(format!("indexes.json: {}", e)))?;
    Ok(FullConfig {
        resources,
        relationships,
        indexes,
    })
}

/// Load catalog files from a directory. `relationships.json` and `indexes.json` are optional.
pub async fn load_from_dir(dir: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let dir = dir.as_ref();
    let read = |name: &'static str| {
        let path = dir.join(name);
        async move { tokio::fs::read_to_string(&path).await }
    };
    let resources = read("resources.json")
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", dir.join("resources.json").display(), e)))?;
    let relationships = read("relationships.json").await.unwrap_or_else(|_| "[]".into());
    let indexes = read("indexes.json").await.unwrap_or_else(|_| "[]".into());
    tracing::info!(dir = %dir.display(), "loading catalog");
    parse_catalog(&resources, &relationships, &indexes)
}

/// Build the resolved model from the catalog. Validates first.
pub fn resolve(config: &FullConfig) -> Result<ResolvedModel, ConfigError> {
    validate(config)?;

    let mut references: HashMap<&str, Vec<Reference>> = HashMap::new();
    let mut foreign_keys: HashMap<&str, Vec<ForeignKey>> = HashMap::new();
    for rel in &config.relationships {
        references.entry(rel.to_resource.as_str()).or_default().push(Reference {
            relationship_id: rel.id.clone(),
            from_resource: rel.from_resource.clone(),
            from_column: rel.from_column.clone(),
            to_column: rel.to_column.clone(),
            on_delete: rel.on_delete,
        });
        foreign_keys.entry(rel.from_resource.as_str()).or_default().push(ForeignKey {
            column: rel.from_column.clone(),
            to_resource: rel.to_resource.clone(),
            to_column: rel.to_column.clone(),
        });
    }

    let mut model = ResolvedModel::default();
    for r in &config.resources {
        let mut columns = vec![managed_column("id", ColumnKind::Integer, "bigint", false)];
        columns.extend(r.columns.iter().map(|c| {
            let (kind, pg_type) = column_kind(&c.type_);
            let (precision, scale) = numeric_precision(kind, &c.type_);
            ColumnInfo {
                name: c.name.clone(),
                kind,
                pg_type,
                nullable: c.nullable,
                default: c.default.clone(),
                searchable: c.searchable,
                sortable: c.sortable,
                managed: false,
                read_only: c.read_only,
                precision,
                scale,
            }
        }));
        columns.push(managed_column("created_at", ColumnKind::Timestamp, "timestamptz", false));
        columns.push(managed_column("updated_at", ColumnKind::Timestamp, "timestamptz", false));
        columns.push(managed_column("archived_at", ColumnKind::Timestamp, "timestamptz", true));

        let default_sort = if r.default_sort.is_empty() {
            vec!["id".to_string()]
        } else {
            r.default_sort.clone()
        };

        let resource = ResolvedResource {
            id: r.id.clone(),
            schema_name: r.schema.clone().unwrap_or_else(|| DEFAULT_SCHEMA.into()),
            table_name: r.table.clone(),
            path_segment: r.path_segment.clone(),
            grant_key: r.grant_key.clone(),
            not_found_code: r.not_found_code.unwrap_or(codes::NOT_FOUND),
            columns,
            operations: r.operations.iter().copied().collect(),
            soft_delete: r.soft_delete,
            scope: r.scope.clone(),
            unique: r.unique.clone(),
            sensitive_columns: r.sensitive_columns.iter().cloned().collect(),
            validation: r.validation.clone(),
            default_sort,
            reorder_column: r.reorder_column.clone(),
            actions: r.actions.iter().copied().collect(),
            references: references.remove(r.id.as_str()).unwrap_or_default(),
            foreign_keys: foreign_keys.remove(r.id.as_str()).unwrap_or_default(),
        };
        let idx = model.resources.len();
        model.by_path.insert(resource.path_segment.clone(), idx);
        model.by_id.insert(resource.id.clone(), idx);
        model.resources.push(resource);
    }
    Ok(model)
}

fn managed_column(name: &str, kind: ColumnKind, pg_type: &str, nullable: bool) -> ColumnInfo {
    ColumnInfo {
        name: name.to_string(),
        kind,
        pg_type: pg_type.to_string(),
        nullable,
        default: None,
        searchable: false,
        sortable: true,
        managed: true,
        read_only: false,
        precision: None,
        scale: None,
    }
}

/// `numeric(p, s)` params; a bare `numeric(p)` has scale 0.
fn numeric_precision(kind: ColumnKind, ty: &ColumnTypeConfig) -> (Option<u32>, Option<u32>) {
    match (kind, ty) {
        (ColumnKind::Numeric, ColumnTypeConfig::Parameterized { params: Some(p), .. }) => match p.as_slice() {
            [precision] => (Some(*precision), Some(0)),
            [precision, scale, ..] => (Some(*precision), Some(*scale)),
            [] => (None, None),
        },
        _ => (None, None),
    }
}

/// Map a declared SQL type to its value kind and the type used for parameter casts.
pub fn column_kind(ty: &ColumnTypeConfig) -> (ColumnKind, String) {
    let lower = ty.name().to_lowercase();
    if lower.contains("bigint") || lower.contains("bigserial") {
        (ColumnKind::Integer, "bigint".into())
    } else if lower.contains("serial") || lower.contains("int") {
        (ColumnKind::Integer, "integer".into())
    } else if lower.starts_with("numeric") || lower.starts_with("decimal") {
        (ColumnKind::Numeric, "numeric".into())
    } else if lower.starts_with("bool") {
        (ColumnKind::Boolean, "boolean".into())
    } else if lower == "timestamptz" || lower == "timestamp with time zone" {
        (ColumnKind::Timestamp, "timestamptz".into())
    } else if lower.starts_with("timestamp") {
        (ColumnKind::Timestamp, "timestamp".into())
    } else if lower == "date" {
        (ColumnKind::Date, "date".into())
    } else if lower.starts_with("json") {
        (ColumnKind::Json, "jsonb".into())
    } else if lower == "uuid" {
        (ColumnKind::Uuid, "uuid".into())
    } else {
        (ColumnKind::Text, "text".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_builtin_catalog_with_managed_columns() {
        let model = resolve(&builtin_catalog().unwrap()).unwrap();
        let resident = model.resource_by_path("resident").expect("resident resource");
        for name in ["id", "created_at", "updated_at", "archived_at"] {
            assert!(resident.column(name).map(|c| c.managed).unwrap_or(false), "{}", name);
        }
        assert!(resident.soft_delete);
        assert!(resident.scope.iter().any(|s| s == "facility_id"));
    }

    #[test]
    fn ledger_totals_are_read_only_with_declared_precision() {
        let model = resolve(&builtin_catalog().unwrap()).unwrap();
        let ledger = model.resource("resident_ledger").unwrap();
        let balance = ledger.column("balance").unwrap();
        assert!(balance.read_only);
        assert_eq!((balance.precision, balance.scale), (Some(14), Some(2)));
        assert!(!ledger.writable_columns().any(|c| c.name == "balance"));
        assert!(ledger.stored_columns().any(|c| c.name == "balance"));
    }

    #[test]
    fn references_point_back_at_target() {
        let model = resolve(&builtin_catalog().unwrap()).unwrap();
        let facility = model.resource("facility").unwrap();
        assert!(facility
            .references
            .iter()
            .any(|r| r.from_resource == "facility_room" && r.from_column == "facility_id"));
        let room = model.resource("facility_room").unwrap();
        assert!(room.foreign_keys.iter().any(|fk| fk.to_resource == "facility"));
    }

    #[test]
    fn column_kinds_follow_sql_types() {
        let kind = |s: &str| column_kind(&ColumnTypeConfig::Simple(s.into())).0;
        assert_eq!(kind("bigint"), ColumnKind::Integer);
        assert_eq!(kind("varchar"), ColumnKind::Text);
        assert_eq!(kind("boolean"), ColumnKind::Boolean);
        assert_eq!(kind("date"), ColumnKind::Date);
        assert_eq!(kind("jsonb"), ColumnKind::Json);
        let numeric = ColumnTypeConfig::Parameterized {
            name: "numeric".into(),
            params: Some(vec![12, 2]),
        };
        assert_eq!(column_kind(&numeric).0, ColumnKind::Numeric);
    }
}
