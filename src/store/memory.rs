//! In-memory store with the same observable semantics as the PostgreSQL one.

use super::{DeletionPlan, DeletionStep, ResourceStore};
use crate::config::{ColumnDefaultConfig, ColumnInfo, ColumnKind, ResolvedResource};
use crate::error::AppError;
use crate::query::{Filter, FilterOp, GridQuery, Search, SortKey};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug)]
struct Table {
    next_id: i64,
    rows: BTreeMap<i64, Map<String, Value>>,
}

impl Default for Table {
    fn default() -> Self {
        Table {
            next_id: 1,
            rows: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Table>>, AppError> {
        self.tables
            .read()
            .map_err(|_| AppError::Internal("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Table>>, AppError> {
        self.tables
            .write()
            .map_err(|_| AppError::Internal("memory store lock poisoned".into()))
    }

    fn select(
        &self,
        resource: &ResolvedResource,
        filters: &[Filter],
        search: Option<&Search>,
        sort: &[SortKey],
        include_archived: bool,
    ) -> Result<Vec<Value>, AppError> {
        let tables = self.read()?;
        let Some(table) = tables.get(&resource.id) else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<&Map<String, Value>> = table
            .rows
            .values()
            .filter(|row| include_archived || is_active(row))
            .filter(|row| filters.iter().all(|f| matches_filter(resource, row, f)))
            .filter(|row| search.map(|s| matches_search(row, s)).unwrap_or(true))
            .collect();
        rows.sort_by(|a, b| compare_rows(resource, a, b, sort));
        Ok(rows.into_iter().map(|r| Value::Object(r.clone())).collect())
    }
}

fn now() -> Value {
    Value::String(chrono::Utc::now().to_rfc3339())
}

fn is_active(row: &Map<String, Value>) -> bool {
    row.get("archived_at").map(Value::is_null).unwrap_or(true)
}

/// Evaluate a column default the way PostgreSQL would for the expressions the catalog uses.
fn default_value(col: &ColumnInfo) -> Value {
    match &col.default {
        Some(ColumnDefaultConfig::Literal(v)) => v.clone(),
        Some(ColumnDefaultConfig::Expression { expression }) => match expression.to_uppercase().as_str() {
            "NOW()" | "CURRENT_TIMESTAMP" => now(),
            "CURRENT_DATE" => Value::String(chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string()),
            "TRUE" => Value::Bool(true),
            "FALSE" => Value::Bool(false),
            _ => Value::Null,
        },
        None => Value::Null,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compare two non-null cells by column kind.
fn compare_values(kind: ColumnKind, a: &Value, b: &Value) -> Ordering {
    match kind {
        ColumnKind::Integer | ColumnKind::Numeric => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => as_text(a).cmp(&as_text(b)),
        },
        ColumnKind::Boolean => a.as_bool().cmp(&b.as_bool()),
        _ => as_text(a).cmp(&as_text(b)),
    }
}

fn cell<'a>(row: &'a Map<String, Value>, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&Value::Null)
}

fn matches_filter(resource: &ResolvedResource, row: &Map<String, Value>, f: &Filter) -> bool {
    let Some(col) = resource.column(&f.column) else {
        return false;
    };
    let v = cell(row, &col.name);
    let cmp = |target: &Value| (!v.is_null() && !target.is_null()).then(|| compare_values(col.kind, v, target));
    match f.op {
        FilterOp::Eq if f.value.is_null() => v.is_null(),
        FilterOp::Ne if f.value.is_null() => !v.is_null(),
        FilterOp::Eq => cmp(&f.value) == Some(Ordering::Equal),
        // IS DISTINCT FROM: null differs from any value.
        FilterOp::Ne => v.is_null() || cmp(&f.value) != Some(Ordering::Equal),
        FilterOp::Gt => cmp(&f.value) == Some(Ordering::Greater),
        FilterOp::Gte => matches!(cmp(&f.value), Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::Lt => cmp(&f.value) == Some(Ordering::Less),
        FilterOp::Lte => matches!(cmp(&f.value), Some(Ordering::Less | Ordering::Equal)),
        FilterOp::Like => !v.is_null() && as_text(v).to_lowercase().contains(&as_text(&f.value).to_lowercase()),
        FilterOp::In => f
            .value
            .as_array()
            .map(|values| values.iter().any(|t| cmp(t) == Some(Ordering::Equal)))
            .unwrap_or(false),
        FilterOp::Null => v.is_null() == f.value.as_bool().unwrap_or(true),
    }
}

fn matches_search(row: &Map<String, Value>, search: &Search) -> bool {
    let needle = search.text.to_lowercase();
    search.columns.iter().any(|c| {
        let v = cell(row, c);
        !v.is_null() && as_text(v).to_lowercase().contains(&needle)
    })
}

/// PostgreSQL ordering: NULLS LAST ascending, NULLS FIRST descending.
fn compare_rows(resource: &ResolvedResource, a: &Map<String, Value>, b: &Map<String, Value>, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let Some(col) = resource.column(&key.column) else { continue };
        let (x, y) = (cell(a, &col.name), cell(b, &col.name));
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => compare_values(col.kind, x, y),
        };
        let ord = if key.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl ResourceStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.read().map(|_| ())
    }

    async fn find(&self, resource: &ResolvedResource, id: i64, include_archived: bool) -> Result<Option<Value>, AppError> {
        let tables = self.read()?;
        Ok(tables
            .get(&resource.id)
            .and_then(|t| t.rows.get(&id))
            .filter(|row| include_archived || is_active(row))
            .map(|row| Value::Object(row.clone())))
    }

    async fn page(&self, resource: &ResolvedResource, query: &GridQuery) -> Result<(Vec<Value>, u64), AppError> {
        let rows = self.select(resource, &query.filters, query.search.as_ref(), &query.sort, false)?;
        let total = rows.len() as u64;
        let page = rows
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.per_page as usize)
            .collect();
        Ok((page, total))
    }

    async fn list(
        &self,
        resource: &ResolvedResource,
        filters: &[Filter],
        sort: &[SortKey],
        include_archived: bool,
    ) -> Result<Vec<Value>, AppError> {
        self.select(resource, filters, None, sort, include_archived)
    }

    async fn insert(&self, resource: &ResolvedResource, values: &Map<String, Value>) -> Result<Value, AppError> {
        let mut tables = self.write()?;
        let table = tables.entry(resource.id.clone()).or_default();
        let id = table.next_id;
        table.next_id += 1;
        let stamp = now();
        let mut row = Map::new();
        for col in &resource.columns {
            let v = match col.name.as_str() {
                "id" => Value::from(id),
                "created_at" | "updated_at" => stamp.clone(),
                "archived_at" => Value::Null,
                _ => values.get(&col.name).cloned().unwrap_or_else(|| default_value(col)),
            };
            row.insert(col.name.clone(), v);
        }
        table.rows.insert(id, row.clone());
        Ok(Value::Object(row))
    }

    async fn update(
        &self,
        resource: &ResolvedResource,
        id: i64,
        values: &Map<String, Value>,
    ) -> Result<Option<Value>, AppError> {
        let mut tables = self.write()?;
        let Some(row) = tables
            .get_mut(&resource.id)
            .and_then(|t| t.rows.get_mut(&id))
            .filter(|row| is_active(row))
        else {
            return Ok(None);
        };
        for col in resource.stored_columns() {
            if let Some(v) = values.get(&col.name) {
                row.insert(col.name.clone(), v.clone());
            }
        }
        row.insert("updated_at".into(), now());
        Ok(Some(Value::Object(row.clone())))
    }

    async fn set_archived(&self, resource: &ResolvedResource, ids: &[i64], archived: bool) -> Result<u64, AppError> {
        let mut tables = self.write()?;
        let Some(table) = tables.get_mut(&resource.id) else {
            return Ok(0);
        };
        let mut changed = 0;
        for id in ids {
            let Some(row) = table.rows.get_mut(id) else { continue };
            if is_active(row) == archived {
                row.insert("archived_at".into(), if archived { now() } else { Value::Null });
                row.insert("updated_at".into(), now());
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn reorder(&self, resource: &ResolvedResource, column: &str, ids: &[i64]) -> Result<(), AppError> {
        let mut tables = self.write()?;
        let Some(table) = tables.get_mut(&resource.id) else {
            return Ok(());
        };
        for (position, id) in ids.iter().enumerate() {
            if let Some(row) = table.rows.get_mut(id).filter(|r| is_active(r)) {
                row.insert(column.to_string(), Value::from(position as i64));
                row.insert("updated_at".into(), now());
            }
        }
        Ok(())
    }

    async fn apply_deletion(&self, plan: &DeletionPlan<'_>) -> Result<(), AppError> {
        // One write guard for the whole plan keeps it atomic.
        let mut tables = self.write()?;
        for step in &plan.steps {
            match step {
                DeletionStep::SetNull { resource, column, ids } => {
                    if let Some(table) = tables.get_mut(&resource.id) {
                        for id in ids {
                            if let Some(row) = table.rows.get_mut(id) {
                                row.insert(column.clone(), Value::Null);
                                row.insert("updated_at".into(), now());
                            }
                        }
                    }
                }
                DeletionStep::Delete { resource, ids } => {
                    if let Some(table) = tables.get_mut(&resource.id) {
                        for id in ids {
                            table.rows.remove(id);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
