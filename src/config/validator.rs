//! Catalog validation: referential integrity and API consistency.

use crate::config::{FullConfig, IndexColumnEntry, ResourceConfig};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

/// Columns every table gets from migration; catalog entries may not redeclare them.
pub const MANAGED_COLUMNS: &[&str] = &["id", "created_at", "updated_at", "archived_at"];

fn column_names(resource: &ResourceConfig) -> HashSet<&str> {
    resource
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .chain(MANAGED_COLUMNS.iter().copied())
        .collect()
}

fn require_column(resource: &ResourceConfig, known: &HashSet<&str>, column: &str) -> Result<(), ConfigError> {
    if known.contains(column) {
        Ok(())
    } else {
        Err(ConfigError::UnknownColumn {
            resource: resource.id.clone(),
            column: column.to_string(),
        })
    }
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    if config.resources.is_empty() {
        return Err(ConfigError::Validation("catalog declares no resources".into()));
    }

    let mut ids = HashSet::new();
    let mut path_segments = HashSet::new();
    let mut columns_by_resource: HashMap<&str, HashSet<&str>> = HashMap::new();

    for r in &config.resources {
        if !ids.insert(r.id.as_str()) {
            return Err(ConfigError::Validation(format!("duplicate resource id: {}", r.id)));
        }
        if !path_segments.insert(r.path_segment.as_str()) {
            return Err(ConfigError::DuplicatePathSegment(r.path_segment.clone()));
        }

        let mut seen = HashSet::new();
        for c in &r.columns {
            if MANAGED_COLUMNS.contains(&c.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "resource {}: column '{}' is managed and cannot be declared",
                    r.id, c.name
                )));
            }
            if !seen.insert(c.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "resource {}: duplicate column '{}'",
                    r.id, c.name
                )));
            }
        }

        let known = column_names(r);
        for col in &r.scope {
            require_column(r, &known, col)?;
        }
        for set in &r.unique {
            for col in set {
                require_column(r, &known, col)?;
            }
        }
        for col in &r.sensitive_columns {
            require_column(r, &known, col)?;
        }
        for col in r.validation.keys() {
            require_column(r, &known, col)?;
        }
        for key in &r.default_sort {
            require_column(r, &known, key.trim_start_matches('-'))?;
        }
        if let Some(col) = &r.reorder_column {
            require_column(r, &known, col)?;
        }
        columns_by_resource.insert(r.id.as_str(), known);
    }

    for rel in &config.relationships {
        let from = columns_by_resource
            .get(rel.from_resource.as_str())
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "resource",
                id: rel.from_resource.clone(),
            })?;
        let to = columns_by_resource
            .get(rel.to_resource.as_str())
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "resource",
                id: rel.to_resource.clone(),
            })?;
        if !from.contains(rel.from_column.as_str()) || !to.contains(rel.to_column.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "relationship column",
                id: rel.id.clone(),
            });
        }
    }

    for idx in &config.indexes {
        let known = columns_by_resource
            .get(idx.resource.as_str())
            .ok_or_else(|| ConfigError::MissingReference {
                kind: "resource",
                id: idx.resource.clone(),
            })?;
        for col in &idx.columns {
            let name = match col {
                IndexColumnEntry::Name(n) => n,
                IndexColumnEntry::Spec { name, .. } => name,
            };
            if !known.contains(name.as_str()) {
                return Err(ConfigError::UnknownColumn {
                    resource: idx.resource.clone(),
                    column: name.clone(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::builtin_catalog;

    #[test]
    fn builtin_catalog_is_valid() {
        let config = builtin_catalog().expect("catalog parses");
        validate(&config).expect("catalog validates");
    }

    #[test]
    fn duplicate_path_segment_is_rejected() {
        let mut config = builtin_catalog().unwrap();
        let mut copy = config.resources[0].clone();
        copy.id = "other".into();
        config.resources.push(copy);
        assert!(matches!(validate(&config), Err(ConfigError::DuplicatePathSegment(_))));
    }

    #[test]
    fn unknown_scope_column_is_rejected() {
        let mut config = builtin_catalog().unwrap();
        config.resources[0].scope.push("no_such_column".into());
        assert!(matches!(validate(&config), Err(ConfigError::UnknownColumn { .. })));
    }

    #[test]
    fn relationship_to_missing_resource_is_rejected() {
        let mut config = builtin_catalog().unwrap();
        config.relationships[0].to_resource = "ghost".into();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::MissingReference { kind: "resource", .. })
        ));
    }

    #[test]
    fn managed_column_cannot_be_redeclared() {
        let mut config = builtin_catalog().unwrap();
        let mut col = config.resources[0].columns[0].clone();
        col.name = "created_at".into();
        config.resources[0].columns.push(col);
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }
}
