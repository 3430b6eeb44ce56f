//! Catalog to DDL: schemas, tables, indexes, then foreign keys. Every step is idempotent.

use crate::config::types::*;
use crate::config::{validate, FullConfig, DEFAULT_SCHEMA};
use crate::error::AppError;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::{BTreeSet, HashMap};

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    Schema,
    Table,
    Index,
    /// Applied only when no constraint of that name exists yet.
    ForeignKey,
}

#[derive(Clone, Debug)]
pub struct MigrationStep {
    pub kind: StepKind,
    /// Object name (schema, table, index or constraint).
    pub name: String,
    pub sql: String,
}

fn type_str(ty: &ColumnTypeConfig) -> String {
    match ty {
        ColumnTypeConfig::Simple(s) => s.clone(),
        ColumnTypeConfig::Parameterized { name, params } => {
            let p = params
                .as_ref()
                .map(|v| v.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", "))
                .unwrap_or_default();
            if p.is_empty() {
                name.clone()
            } else {
                format!("{}({})", name, p)
            }
        }
    }
}

fn default_sql(d: &ColumnDefaultConfig) -> String {
    match d {
        ColumnDefaultConfig::Expression { expression } => expression.clone(),
        ColumnDefaultConfig::Literal(v) => match v {
            Value::Null => "NULL".into(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.into(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => literal(s),
            other => format!("{}::jsonb", literal(&other.to_string())),
        },
    }
}

/// Ordered DDL for the whole catalog. Validates first.
pub fn plan_migrations(config: &FullConfig) -> Result<Vec<MigrationStep>, AppError> {
    validate(config)?;

    let schema_of = |r: &ResourceConfig| r.schema.clone().unwrap_or_else(|| DEFAULT_SCHEMA.to_string());
    let tables: HashMap<&str, String> = config
        .resources
        .iter()
        .map(|r| (r.id.as_str(), format!("{}.{}", quote(&schema_of(r)), quote(&r.table))))
        .collect();
    let mut steps = Vec::new();

    let schemas: BTreeSet<String> = config.resources.iter().map(schema_of).collect();
    for s in schemas {
        steps.push(MigrationStep {
            kind: StepKind::Schema,
            sql: format!("CREATE SCHEMA IF NOT EXISTS {}", quote(&s)),
            name: s,
        });
    }

    for r in &config.resources {
        let mut defs = vec![format!("{} BIGSERIAL PRIMARY KEY", quote("id"))];
        for c in &r.columns {
            let mut def = format!("{} {}", quote(&c.name), type_str(&c.type_));
            if !c.nullable {
                def.push_str(" NOT NULL");
            }
            if let Some(d) = &c.default {
                def.push_str(" DEFAULT ");
                def.push_str(&default_sql(d));
            }
            defs.push(def);
        }
        defs.push(format!("{} TIMESTAMPTZ NOT NULL DEFAULT NOW()", quote("created_at")));
        defs.push(format!("{} TIMESTAMPTZ NOT NULL DEFAULT NOW()", quote("updated_at")));
        defs.push(format!("{} TIMESTAMPTZ", quote("archived_at")));
        for set in &r.unique {
            let cols: Vec<String> = set.iter().map(|c| quote(c)).collect();
            defs.push(format!("UNIQUE ({})", cols.join(", ")));
        }
        steps.push(MigrationStep {
            kind: StepKind::Table,
            name: r.table.clone(),
            sql: format!(
                "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
                tables[r.id.as_str()],
                defs.join(",\n  ")
            ),
        });
    }

    for idx in &config.indexes {
        let cols: Vec<String> = idx
            .columns
            .iter()
            .map(|c| match c {
                IndexColumnEntry::Name(n) => quote(n),
                IndexColumnEntry::Spec { name, direction } => {
                    let dir = direction
                        .as_deref()
                        .map(|d| format!(" {}", d.to_uppercase()))
                        .unwrap_or_default();
                    format!("{}{}", quote(name), dir)
                }
            })
            .collect();
        let where_clause = idx
            .where_
            .as_ref()
            .map(|w| format!(" WHERE {}", w))
            .unwrap_or_default();
        steps.push(MigrationStep {
            kind: StepKind::Index,
            name: idx.name.clone(),
            sql: format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {} ({}){}",
                if idx.unique { "UNIQUE " } else { "" },
                quote(&idx.name),
                tables[idx.resource.as_str()],
                cols.join(", "),
                where_clause
            ),
        });
    }

    for rel in &config.relationships {
        let name = rel.name.clone().unwrap_or_else(|| rel.id.clone());
        steps.push(MigrationStep {
            kind: StepKind::ForeignKey,
            sql: format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
                tables[rel.from_resource.as_str()],
                quote(&name),
                quote(&rel.from_column),
                tables[rel.to_resource.as_str()],
                quote(&rel.to_column),
                rel.on_delete.as_sql()
            ),
            name,
        });
    }

    Ok(steps)
}

/// Apply the catalog DDL to the database.
pub async fn apply_migrations(pool: &PgPool, config: &FullConfig) -> Result<(), AppError> {
    let steps = plan_migrations(config)?;
    for step in &steps {
        if step.kind == StepKind::ForeignKey {
            let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_constraint WHERE conname = $1)")
                .bind(&step.name)
                .fetch_one(pool)
                .await?;
            if exists {
                continue;
            }
        }
        tracing::debug!(sql = %step.sql, "migration");
        sqlx::query(&step.sql).execute(pool).await?;
    }
    tracing::info!(steps = steps.len(), "migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::builtin_catalog;

    fn steps() -> Vec<MigrationStep> {
        plan_migrations(&builtin_catalog().unwrap()).unwrap()
    }

    #[test]
    fn steps_follow_dependency_order() {
        let kinds: Vec<StepKind> = steps().iter().map(|s| s.kind).collect();
        let first_table = kinds.iter().position(|k| *k == StepKind::Table).unwrap();
        let first_fk = kinds.iter().position(|k| *k == StepKind::ForeignKey).unwrap();
        assert_eq!(kinds[0], StepKind::Schema);
        assert!(kinds[..first_table].iter().all(|k| *k == StepKind::Schema));
        assert!(kinds[first_fk..].iter().all(|k| *k == StepKind::ForeignKey));
    }

    #[test]
    fn table_ddl_has_managed_columns_defaults_and_unique_sets() {
        let all = steps();
        let ledger = all
            .iter()
            .find(|s| s.kind == StepKind::Table && s.name == "tbl_resident_ledger")
            .unwrap();
        assert!(ledger.sql.starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"tbl_resident_ledger\""));
        assert!(ledger.sql.contains("\"id\" BIGSERIAL PRIMARY KEY"));
        assert!(ledger.sql.contains("\"balance\" numeric(14, 2) NOT NULL DEFAULT 0"));
        assert!(ledger.sql.contains("\"archived_at\" TIMESTAMPTZ"));
        assert!(ledger.sql.contains("UNIQUE (\"resident_id\", \"date_from\")"));
    }

    #[test]
    fn foreign_keys_carry_on_delete_rule() {
        let all = steps();
        let fk = all.iter().find(|s| s.name == "fk_resident_bed").unwrap();
        assert!(fk.sql.ends_with("REFERENCES \"public\".\"tbl_facility_bed\" (\"id\") ON DELETE SET NULL"));
    }

    #[test]
    fn partial_unique_index() {
        let all = steps();
        let idx = all.iter().find(|s| s.name == "idx_resident_bed").unwrap();
        assert_eq!(
            idx.sql,
            "CREATE UNIQUE INDEX IF NOT EXISTS \"idx_resident_bed\" ON \"public\".\"tbl_resident\" (\"bed_id\") \
             WHERE bed_id IS NOT NULL AND archived_at IS NULL"
        );
    }

    #[test]
    fn literal_defaults_render_as_sql() {
        assert_eq!(default_sql(&ColumnDefaultConfig::Literal(Value::Bool(true))), "TRUE");
        assert_eq!(default_sql(&ColumnDefaultConfig::Literal(Value::from("it's"))), "'it''s'");
        assert_eq!(
            default_sql(&ColumnDefaultConfig::Expression {
                expression: "NOW()".into()
            }),
            "NOW()"
        );
    }
}
