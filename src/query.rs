//! Grid query parameters: paging, sorting, `filter[col][op]`, free-text search and scope parameters.

use crate::config::{ColumnKind, ResolvedResource};
use crate::error::AppError;
use serde_json::Value;
use std::collections::HashMap;

pub const DEFAULT_PER_PAGE: u32 = 100;
pub const MAX_PER_PAGE: u32 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Like,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Null,
}

impl std::str::FromStr for FilterOp {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "eq" => FilterOp::Eq,
            "ne" => FilterOp::Ne,
            "like" => FilterOp::Like,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "in" => FilterOp::In,
            "null" => FilterOp::Null,
            other => return Err(AppError::BadRequest(format!("unknown filter operator: {}", other))),
        })
    }
}

/// One predicate on a column. `In` carries an array value, `Null` a boolean (true = IS NULL).
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Filter {
            column: column.into(),
            op: FilterOp::Eq,
            value,
        }
    }

    pub fn ne(column: impl Into<String>, value: Value) -> Self {
        Filter {
            column: column.into(),
            op: FilterOp::Ne,
            value,
        }
    }

    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Filter {
            column: column.into(),
            op: FilterOp::In,
            value: Value::Array(values),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

impl SortKey {
    /// Parse `col` or `-col`.
    pub fn parse(key: &str) -> Self {
        match key.strip_prefix('-') {
            Some(col) => SortKey {
                column: col.to_string(),
                descending: true,
            },
            None => SortKey {
                column: key.to_string(),
                descending: false,
            },
        }
    }
}

/// Case-insensitive substring match over the resource's searchable columns.
#[derive(Clone, Debug, PartialEq)]
pub struct Search {
    pub columns: Vec<String>,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GridQuery {
    pub filters: Vec<Filter>,
    pub search: Option<Search>,
    pub sort: Vec<SortKey>,
    pub page: u32,
    pub per_page: u32,
}

impl GridQuery {
    /// Parse raw query parameters for `resource`. Unrecognised keys are ignored.
    pub fn from_params(resource: &ResolvedResource, params: &HashMap<String, String>) -> Result<Self, AppError> {
        let page = match params.get("page") {
            Some(v) => v
                .parse::<u32>()
                .ok()
                .filter(|p| *p >= 1)
                .ok_or_else(|| AppError::BadRequest(format!("invalid page: {}", v)))?,
            None => 1,
        };
        let per_page = match params.get("per_page") {
            Some(v) => v
                .parse::<u32>()
                .ok()
                .filter(|p| *p >= 1)
                .ok_or_else(|| AppError::BadRequest(format!("invalid per_page: {}", v)))?
                .min(MAX_PER_PAGE),
            None => DEFAULT_PER_PAGE,
        };

        let mut filters = scope_filters(resource, params)?;
        for (key, raw) in params {
            let Some((column, op)) = parse_filter_key(key)? else { continue };
            let info = visible_column(resource, column)?;
            let value = match op {
                FilterOp::In => Value::Array(
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(|s| coerce(info.kind, column, s))
                        .collect::<Result<_, _>>()?,
                ),
                FilterOp::Null => Value::Bool(match raw.as_str() {
                    "true" | "1" => true,
                    "false" | "0" => false,
                    _ => return Err(AppError::BadRequest(format!("filter[{}][null] must be true or false", column))),
                }),
                FilterOp::Like => Value::String(raw.clone()),
                _ => coerce(info.kind, column, raw)?,
            };
            filters.push(Filter {
                column: column.to_string(),
                op,
                value,
            });
        }
        // HashMap iteration order is random; keep SQL text stable.
        filters.sort_by(|a, b| a.column.cmp(&b.column));

        let search = params
            .get("q")
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .map(|text| Search {
                columns: resource
                    .columns
                    .iter()
                    .filter(|c| c.searchable && !resource.sensitive_columns.contains(&c.name))
                    .map(|c| c.name.clone())
                    .collect(),
                text: text.to_string(),
            })
            .filter(|s| !s.columns.is_empty());

        let sort = match params.get("sort").filter(|s| !s.trim().is_empty()) {
            Some(raw) => {
                let keys = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(SortKey::parse)
                    .collect::<Vec<_>>();
                for key in &keys {
                    let info = visible_column(resource, &key.column)?;
                    if !info.sortable {
                        return Err(AppError::BadRequest(format!("column is not sortable: {}", key.column)));
                    }
                }
                with_id_tiebreak(keys)
            }
            None => default_sort(resource),
        };

        Ok(GridQuery {
            filters,
            search,
            sort,
            page,
            per_page,
        })
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }
}

/// Exact-match filters from plain `col=value` parameters whose column is in the resource scope.
pub fn scope_filters(resource: &ResolvedResource, params: &HashMap<String, String>) -> Result<Vec<Filter>, AppError> {
    let mut filters = Vec::new();
    for col in &resource.scope {
        if let Some(raw) = params.get(col) {
            let info = visible_column(resource, col)?;
            filters.push(Filter::eq(col.clone(), coerce(info.kind, col, raw)?));
        }
    }
    Ok(filters)
}

/// Catalog default sort with `id` as final tie-breaker.
pub fn default_sort(resource: &ResolvedResource) -> Vec<SortKey> {
    with_id_tiebreak(resource.default_sort.iter().map(|k| SortKey::parse(k)).collect())
}

fn with_id_tiebreak(mut keys: Vec<SortKey>) -> Vec<SortKey> {
    if !keys.iter().any(|k| k.column == "id") {
        keys.push(SortKey {
            column: "id".into(),
            descending: false,
        });
    }
    keys
}

/// `filter[col]` -> (col, Eq); `filter[col][op]` -> (col, op); anything else -> None.
fn parse_filter_key(key: &str) -> Result<Option<(&str, FilterOp)>, AppError> {
    let Some(rest) = key.strip_prefix("filter[") else {
        return Ok(None);
    };
    let Some((column, tail)) = rest.split_once(']') else {
        return Err(AppError::BadRequest(format!("malformed filter parameter: {}", key)));
    };
    if tail.is_empty() {
        return Ok(Some((column, FilterOp::Eq)));
    }
    let op = tail
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| AppError::BadRequest(format!("malformed filter parameter: {}", key)))?;
    Ok(Some((column, op.parse()?)))
}

fn visible_column<'a>(resource: &'a ResolvedResource, column: &str) -> Result<&'a crate::config::ColumnInfo, AppError> {
    resource
        .column(column)
        .filter(|c| !resource.sensitive_columns.contains(&c.name))
        .ok_or_else(|| AppError::BadRequest(format!("unknown column: {}", column)))
}

/// Convert a query-string value to the JSON value the column expects.
pub fn coerce(kind: ColumnKind, column: &str, raw: &str) -> Result<Value, AppError> {
    let bad = || AppError::BadRequest(format!("invalid {} value for {}: {}", kind.as_str(), column, raw));
    Ok(match kind {
        ColumnKind::Integer => Value::Number(raw.trim().parse::<i64>().map_err(|_| bad())?.into()),
        ColumnKind::Numeric => {
            raw.trim().parse::<f64>().map_err(|_| bad())?;
            Value::String(raw.trim().to_string())
        }
        ColumnKind::Boolean => match raw.trim().to_lowercase().as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => return Err(bad()),
        },
        ColumnKind::Date => {
            chrono::NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| bad())?;
            Value::String(raw.trim().to_string())
        }
        ColumnKind::Uuid => Value::String(uuid::Uuid::parse_str(raw.trim()).map_err(|_| bad())?.to_string()),
        ColumnKind::Text | ColumnKind::Timestamp | ColumnKind::Json => Value::String(raw.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin_catalog, resolve, ResolvedModel};

    fn model() -> ResolvedModel {
        resolve(&builtin_catalog().unwrap()).unwrap()
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_apply_when_no_params() {
        let m = model();
        let q = GridQuery::from_params(m.resource("resident").unwrap(), &HashMap::new()).unwrap();
        assert_eq!(q.page, 1);
        assert_eq!(q.per_page, DEFAULT_PER_PAGE);
        assert_eq!(q.offset(), 0);
        assert_eq!(q.sort.last().map(|k| k.column.as_str()), Some("id"));
    }

    #[test]
    fn per_page_is_clamped_and_zero_rejected() {
        let m = model();
        let res = m.resource("resident").unwrap();
        let q = GridQuery::from_params(res, &params(&[("per_page", "5000"), ("page", "3")])).unwrap();
        assert_eq!(q.per_page, MAX_PER_PAGE);
        assert_eq!(q.offset(), 2000);
        assert!(GridQuery::from_params(res, &params(&[("per_page", "0")])).is_err());
        assert!(GridQuery::from_params(res, &params(&[("page", "0")])).is_err());
    }

    #[test]
    fn parses_filters_scope_and_sort() {
        let m = model();
        let res = m.resource("resident").unwrap();
        let q = GridQuery::from_params(
            res,
            &params(&[
                ("facility_id", "4"),
                ("filter[gender]", "female"),
                ("filter[bed_id][in]", "1, 2,3"),
                ("filter[middle_name][null]", "true"),
                ("sort", "-last_name,first_name"),
            ]),
        )
        .unwrap();
        assert_eq!(q.filters.len(), 4);
        assert!(q.filters.contains(&Filter::eq("facility_id", Value::from(4))));
        assert!(q.filters.contains(&Filter::eq("gender", Value::from("female"))));
        assert!(q
            .filters
            .contains(&Filter::is_in("bed_id", vec![Value::from(1), Value::from(2), Value::from(3)])));
        assert_eq!(
            q.sort,
            vec![
                SortKey { column: "last_name".into(), descending: true },
                SortKey { column: "first_name".into(), descending: false },
                SortKey { column: "id".into(), descending: false },
            ]
        );
    }

    #[test]
    fn rejects_unknown_and_sensitive_columns() {
        let m = model();
        let res = m.resource("resident").unwrap();
        assert!(GridQuery::from_params(res, &params(&[("filter[nope]", "1")])).is_err());
        assert!(GridQuery::from_params(res, &params(&[("filter[ssn]", "1")])).is_err());
        assert!(GridQuery::from_params(res, &params(&[("sort", "ssn")])).is_err());
        assert!(GridQuery::from_params(res, &params(&[("filter[gender][regex]", "x")])).is_err());
        assert!(GridQuery::from_params(res, &params(&[("facility_id", "abc")])).is_err());
    }

    #[test]
    fn search_uses_searchable_columns() {
        let m = model();
        let q = GridQuery::from_params(m.resource("resident").unwrap(), &params(&[("q", " smi ")])).unwrap();
        let search = q.search.unwrap();
        assert_eq!(search.text, "smi");
        assert!(search.columns.contains(&"last_name".to_string()));
        assert!(!search.columns.contains(&"ssn".to_string()));
    }
}
