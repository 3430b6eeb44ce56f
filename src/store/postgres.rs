//! PostgreSQL store: parameterized SQL from `crate::sql`, rows decoded to JSON.

use super::{DeletionPlan, DeletionStep, ResourceStore};
use crate::config::ResolvedResource;
use crate::error::AppError;
use crate::query::{Filter, GridQuery, SortKey};
use crate::sql::{self, PgBindValue, QueryBuf};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{ConnectOptions, PgPool, Postgres};
use std::str::FromStr;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn query_one(&self, q: &QueryBuf) -> Result<Option<Value>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = bind_all(&q.sql, &q.params).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| row_to_json(&r)))
    }

    async fn query_many(&self, q: &QueryBuf) -> Result<Vec<Value>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = bind_all(&q.sql, &q.params).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}

fn bind_all<'q>(sql: &'q str, params: &'q [PgBindValue]) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    let mut query = sqlx::query(sql);
    for p in params {
        query = query.bind(p.clone());
    }
    query
}

async fn execute_tx(tx: &mut sqlx::PgConnection, q: &QueryBuf) -> Result<u64, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
    let done = bind_all(&q.sql, &q.params).execute(&mut *tx).await?;
    Ok(done.rows_affected())
}

#[async_trait]
impl ResourceStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").fetch_optional(&self.pool).await?;
        Ok(())
    }

    async fn find(&self, resource: &ResolvedResource, id: i64, include_archived: bool) -> Result<Option<Value>, AppError> {
        self.query_one(&sql::select_by_id(resource, id, include_archived)).await
    }

    async fn page(&self, resource: &ResolvedResource, query: &GridQuery) -> Result<(Vec<Value>, u64), AppError> {
        let rows = self.query_many(&sql::select_page(resource, query)).await?;
        let cq = sql::count(resource, &query.filters, query.search.as_ref());
        tracing::debug!(sql = %cq.sql, params = ?cq.params, "query");
        let (total,): (i64,) = {
            let mut q = sqlx::query_as::<_, (i64,)>(&cq.sql);
            for p in &cq.params {
                q = q.bind(p.clone());
            }
            q.fetch_one(&self.pool).await?
        };
        Ok((rows, total.max(0) as u64))
    }

    async fn list(
        &self,
        resource: &ResolvedResource,
        filters: &[Filter],
        sort: &[SortKey],
        include_archived: bool,
    ) -> Result<Vec<Value>, AppError> {
        self.query_many(&sql::select_list(resource, filters, sort, include_archived)).await
    }

    async fn insert(&self, resource: &ResolvedResource, values: &Map<String, Value>) -> Result<Value, AppError> {
        self.query_one(&sql::insert(resource, values))
            .await?
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))
    }

    async fn update(
        &self,
        resource: &ResolvedResource,
        id: i64,
        values: &Map<String, Value>,
    ) -> Result<Option<Value>, AppError> {
        self.query_one(&sql::update(resource, id, values)).await
    }

    async fn set_archived(&self, resource: &ResolvedResource, ids: &[i64], archived: bool) -> Result<u64, AppError> {
        let q = sql::set_archived(resource, ids, archived);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let done = bind_all(&q.sql, &q.params).execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    async fn reorder(&self, resource: &ResolvedResource, column: &str, ids: &[i64]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        for (position, id) in ids.iter().enumerate() {
            execute_tx(&mut tx, &sql::set_position(resource, column, *id, position as i64)).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn apply_deletion(&self, plan: &DeletionPlan<'_>) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        for step in &plan.steps {
            let q = match step {
                DeletionStep::SetNull { resource, column, ids } => sql::set_null_where_in(resource, column, ids),
                DeletionStep::Delete { resource, ids } => sql::delete_where_in(resource, ids),
            };
            execute_tx(&mut tx, &q).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn row_to_json(row: &PgRow) -> Value {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    Value::Object(map)
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| AppError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", sql::quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

/// Split `postgres://host/db?opts` into (`postgres://host/postgres`, `db`).
fn parse_db_name_from_url(url: &str) -> Result<(String, String), AppError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| AppError::BadRequest("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_name_is_split_from_url() {
        let (admin, db) = parse_db_name_from_url("postgres://u:p@localhost:5432/seniorcare?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres");
        assert_eq!(db, "seniorcare");
    }
}
