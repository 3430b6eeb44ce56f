//! Builds parameterized SELECT, INSERT, UPDATE, DELETE from a resolved resource.

use crate::config::{ColumnInfo, ColumnKind, ResolvedResource};
use crate::query::{Filter, FilterOp, GridQuery, Search, SortKey};
use crate::sql::PgBindValue;
use serde_json::{Map, Value};

/// Quote identifier for PostgreSQL (safe: only from config).
pub(crate) fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub(crate) fn qualified_table(resource: &ResolvedResource) -> String {
    format!("{}.{}", quoted(&resource.schema_name), quoted(&resource.table_name))
}

#[derive(Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: PgBindValue) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Bind `v` for `col` and return the cast placeholder, e.g. `$3::bigint`.
    fn placeholder(&mut self, col: &ColumnInfo, v: &Value) -> String {
        let n = self.push_param(PgBindValue::for_column(col.kind, v));
        format!("${}::{}", n, col.pg_type)
    }

    fn id_placeholder(&mut self, id: i64) -> String {
        let n = self.push_param(PgBindValue::I64(id));
        format!("${}::bigint", n)
    }
}

/// SELECT list: numeric as col::text so sqlx returns String and no precision is lost.
fn select_column_list(resource: &ResolvedResource) -> String {
    resource
        .columns
        .iter()
        .map(|c| {
            let q = quoted(&c.name);
            if c.kind == ColumnKind::Numeric {
                format!("{}::text AS {}", q, q)
            } else {
                q
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('%');
    for ch in s.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

fn filter_sql(q: &mut QueryBuf, resource: &ResolvedResource, f: &Filter) -> String {
    let Some(col) = resource.column(&f.column) else {
        return "FALSE".into();
    };
    let name = quoted(&col.name);
    match f.op {
        FilterOp::Eq if f.value.is_null() => format!("{} IS NULL", name),
        FilterOp::Ne if f.value.is_null() => format!("{} IS NOT NULL", name),
        FilterOp::Eq => format!("{} = {}", name, q.placeholder(col, &f.value)),
        FilterOp::Ne => format!("{} IS DISTINCT FROM {}", name, q.placeholder(col, &f.value)),
        FilterOp::Gt => format!("{} > {}", name, q.placeholder(col, &f.value)),
        FilterOp::Gte => format!("{} >= {}", name, q.placeholder(col, &f.value)),
        FilterOp::Lt => format!("{} < {}", name, q.placeholder(col, &f.value)),
        FilterOp::Lte => format!("{} <= {}", name, q.placeholder(col, &f.value)),
        FilterOp::Like => {
            let text = match &f.value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let n = q.push_param(PgBindValue::String(escape_like(&text)));
            format!("{}::text ILIKE ${}", name, n)
        }
        FilterOp::In => {
            let values = f.value.as_array().map(Vec::as_slice).unwrap_or(&[]);
            if values.is_empty() {
                return "FALSE".into();
            }
            let phs: Vec<String> = values.iter().map(|v| q.placeholder(col, v)).collect();
            format!("{} IN ({})", name, phs.join(", "))
        }
        FilterOp::Null => {
            if f.value.as_bool().unwrap_or(true) {
                format!("{} IS NULL", name)
            } else {
                format!("{} IS NOT NULL", name)
            }
        }
    }
}

fn where_clause(
    q: &mut QueryBuf,
    resource: &ResolvedResource,
    filters: &[Filter],
    search: Option<&Search>,
    include_archived: bool,
) -> String {
    let mut parts = Vec::new();
    if !include_archived {
        parts.push(format!("{} IS NULL", quoted("archived_at")));
    }
    for f in filters {
        parts.push(filter_sql(q, resource, f));
    }
    if let Some(s) = search {
        let n = q.push_param(PgBindValue::String(escape_like(&s.text)));
        let ors: Vec<String> = s
            .columns
            .iter()
            .map(|c| format!("{}::text ILIKE ${}", quoted(c), n))
            .collect();
        if !ors.is_empty() {
            parts.push(format!("({})", ors.join(" OR ")));
        }
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

fn order_clause(resource: &ResolvedResource, sort: &[SortKey]) -> String {
    let keys: Vec<String> = sort
        .iter()
        .filter(|k| resource.column(&k.column).is_some())
        .map(|k| format!("{} {}", quoted(&k.column), if k.descending { "DESC" } else { "ASC" }))
        .collect();
    if keys.is_empty() {
        format!(" ORDER BY {}", quoted("id"))
    } else {
        format!(" ORDER BY {}", keys.join(", "))
    }
}

fn id_list(q: &mut QueryBuf, ids: &[i64]) -> String {
    if ids.is_empty() {
        return "FALSE".into();
    }
    let phs: Vec<String> = ids.iter().map(|id| q.id_placeholder(*id)).collect();
    format!("{} IN ({})", quoted("id"), phs.join(", "))
}

/// SELECT by id; archived rows only when `include_archived`.
pub fn select_by_id(resource: &ResolvedResource, id: i64, include_archived: bool) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.id_placeholder(id);
    let archived = if include_archived {
        String::new()
    } else {
        format!(" AND {} IS NULL", quoted("archived_at"))
    };
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = {}{}",
        select_column_list(resource),
        qualified_table(resource),
        quoted("id"),
        ph,
        archived
    );
    q
}

/// One grid page: filters, search and sort from the query, LIMIT/OFFSET from paging.
pub fn select_page(resource: &ResolvedResource, grid: &GridQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, resource, &grid.filters, grid.search.as_ref(), false);
    q.sql = format!(
        "SELECT {} FROM {}{}{} LIMIT {} OFFSET {}",
        select_column_list(resource),
        qualified_table(resource),
        where_sql,
        order_clause(resource, &grid.sort),
        grid.per_page,
        grid.offset()
    );
    q
}

/// COUNT(*) over the same predicate as `select_page`.
pub fn count(resource: &ResolvedResource, filters: &[Filter], search: Option<&Search>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, resource, filters, search, false);
    q.sql = format!(
        "SELECT COUNT(*) AS {} FROM {}{}",
        quoted("total"),
        qualified_table(resource),
        where_sql
    );
    q
}

/// Unpaginated SELECT.
pub fn select_list(resource: &ResolvedResource, filters: &[Filter], sort: &[SortKey], include_archived: bool) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, resource, filters, None, include_archived);
    q.sql = format!(
        "SELECT {} FROM {}{}{}",
        select_column_list(resource),
        qualified_table(resource),
        where_sql,
        order_clause(resource, sort)
    );
    q
}

/// INSERT stored columns present in `values`; absent columns fall back to the table default.
pub fn insert(resource: &ResolvedResource, values: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in resource.stored_columns() {
        let Some(v) = values.get(&c.name) else { continue };
        placeholders.push(q.placeholder(c, v));
        cols.push(quoted(&c.name));
    }
    let table = qualified_table(resource);
    let returning = select_column_list(resource);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table,
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    q
}

/// UPDATE an active row by id: SET only stored columns present in `values`, always bump updated_at.
pub fn update(resource: &ResolvedResource, id: i64, values: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for c in resource.stored_columns() {
        let Some(v) = values.get(&c.name) else { continue };
        let ph = q.placeholder(c, v);
        sets.push(format!("{} = {}", quoted(&c.name), ph));
    }
    sets.push(format!("{} = NOW()", quoted("updated_at")));
    let id_ph = q.id_placeholder(id);
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} AND {} IS NULL RETURNING {}",
        qualified_table(resource),
        sets.join(", "),
        quoted("id"),
        id_ph,
        quoted("archived_at"),
        select_column_list(resource)
    );
    q
}

/// Archive (`archived = true`) or restore rows by id. Rows already in the target state are untouched.
pub fn set_archived(resource: &ResolvedResource, ids: &[i64], archived: bool) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ids_sql = id_list(&mut q, ids);
    let (value, guard) = if archived {
        ("NOW()", "IS NULL")
    } else {
        ("NULL", "IS NOT NULL")
    };
    q.sql = format!(
        "UPDATE {} SET {} = {}, {} = NOW() WHERE {} AND {} {}",
        qualified_table(resource),
        quoted("archived_at"),
        value,
        quoted("updated_at"),
        ids_sql,
        quoted("archived_at"),
        guard
    );
    q
}

pub fn delete_where_in(resource: &ResolvedResource, ids: &[i64]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ids_sql = id_list(&mut q, ids);
    q.sql = format!("DELETE FROM {} WHERE {}", qualified_table(resource), ids_sql);
    q
}

pub fn set_null_where_in(resource: &ResolvedResource, column: &str, ids: &[i64]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ids_sql = id_list(&mut q, ids);
    q.sql = format!(
        "UPDATE {} SET {} = NULL, {} = NOW() WHERE {}",
        qualified_table(resource),
        quoted(column),
        quoted("updated_at"),
        ids_sql
    );
    q
}

/// Set one row's position column.
pub fn set_position(resource: &ResolvedResource, column: &str, id: i64, position: i64) -> QueryBuf {
    let mut q = QueryBuf::new();
    let pos = q.push_param(PgBindValue::I64(position));
    let id_ph = q.id_placeholder(id);
    q.sql = format!(
        "UPDATE {} SET {} = ${}::integer, {} = NOW() WHERE {} = {} AND {} IS NULL",
        qualified_table(resource),
        quoted(column),
        pos,
        quoted("updated_at"),
        quoted("id"),
        id_ph,
        quoted("archived_at")
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin_catalog, resolve, ResolvedModel};
    use serde_json::json;

    fn model() -> ResolvedModel {
        resolve(&builtin_catalog().unwrap()).unwrap()
    }

    #[test]
    fn select_by_id_hides_archived_rows() {
        let m = model();
        let q = select_by_id(m.resource("facility").unwrap(), 7, false);
        assert!(q.sql.starts_with("SELECT \"id\", \"space_id\""));
        assert!(q.sql.ends_with("FROM \"public\".\"tbl_facility\" WHERE \"id\" = $1::bigint AND \"archived_at\" IS NULL"));
        assert_eq!(q.params, vec![PgBindValue::I64(7)]);
    }

    #[test]
    fn numeric_columns_are_selected_as_text() {
        let m = model();
        let q = select_by_id(m.resource("resident_ledger").unwrap(), 1, true);
        assert!(q.sql.contains("\"balance\"::text AS \"balance\""));
        assert!(!q.sql.contains("archived_at\" IS NULL"));
    }

    #[test]
    fn page_query_combines_filters_search_sort_and_paging() {
        let m = model();
        let res = m.resource("resident").unwrap();
        let grid = GridQuery {
            filters: vec![
                Filter::eq("facility_id", json!(3)),
                Filter::is_in("bed_id", vec![]),
                Filter {
                    column: "middle_name".into(),
                    op: FilterOp::Null,
                    value: json!(false),
                },
            ],
            search: Some(Search {
                columns: vec!["first_name".into(), "last_name".into()],
                text: "50%".into(),
            }),
            sort: vec![SortKey::parse("-last_name"), SortKey::parse("id")],
            page: 2,
            per_page: 10,
        };
        let q = select_page(res, &grid);
        assert!(q.sql.contains(
            "WHERE \"archived_at\" IS NULL AND \"facility_id\" = $1::bigint AND FALSE AND \"middle_name\" IS NOT NULL \
             AND (\"first_name\"::text ILIKE $2 OR \"last_name\"::text ILIKE $2)"
        ));
        assert!(q.sql.ends_with("ORDER BY \"last_name\" DESC, \"id\" ASC LIMIT 10 OFFSET 10"));
        assert_eq!(q.params[1], PgBindValue::String("%50\\%%".into()));
    }

    #[test]
    fn update_only_touches_active_rows() {
        let m = model();
        let mut values = Map::new();
        values.insert("name".into(), json!("North"));
        values.insert("id".into(), json!(99));
        let q = update(m.resource("facility").unwrap(), 5, &values);
        assert!(q.sql.starts_with("UPDATE \"public\".\"tbl_facility\" SET \"name\" = $1::text, \"updated_at\" = NOW() WHERE \"id\" = $2::bigint AND \"archived_at\" IS NULL RETURNING"));
        assert_eq!(q.params.len(), 2);
    }

    #[test]
    fn insert_without_values_uses_defaults() {
        let m = model();
        let q = insert(m.resource("space").unwrap(), &Map::new());
        assert!(q.sql.starts_with("INSERT INTO \"public\".\"tbl_space\" DEFAULT VALUES RETURNING"));
    }

    #[test]
    fn json_values_bind_as_jsonb() {
        let m = model();
        let mut values = Map::new();
        values.insert("grants".into(), json!({"persistence-resident-resident": "view"}));
        let q = insert(m.resource("role").unwrap(), &values);
        assert!(q.sql.contains("VALUES ($1::jsonb)"));
        assert!(matches!(q.params[0], PgBindValue::Json(_)));
    }

    #[test]
    fn delete_with_no_ids_matches_nothing() {
        let m = model();
        let q = delete_where_in(m.resource("space").unwrap(), &[]);
        assert_eq!(q.sql, "DELETE FROM \"public\".\"tbl_space\" WHERE FALSE");
    }
}
