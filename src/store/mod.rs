//! Storage seam: the service talks to a `ResourceStore`; PostgreSQL in production, memory for tests and dev.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{ensure_database_exists, PgStore};

use crate::config::ResolvedResource;
use crate::error::AppError;
use crate::query::{Filter, GridQuery, SortKey};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// One step of a hard delete. Steps run in order inside one transaction.
#[derive(Clone, Debug)]
pub enum DeletionStep<'a> {
    /// Clear `column` on the given rows of `resource`.
    SetNull {
        resource: &'a ResolvedResource,
        column: String,
        ids: Vec<i64>,
    },
    Delete {
        resource: &'a ResolvedResource,
        ids: Vec<i64>,
    },
}

#[derive(Clone, Debug, Default)]
pub struct DeletionPlan<'a> {
    pub steps: Vec<DeletionStep<'a>>,
}

impl DeletionPlan<'_> {
    pub fn deleted_rows(&self) -> usize {
        self.steps
            .iter()
            .map(|s| match s {
                DeletionStep::Delete { ids, .. } => ids.len(),
                DeletionStep::SetNull { .. } => 0,
            })
            .sum()
    }
}

/// Row storage for catalog resources. Rows are JSON objects keyed by column name.
/// Every call is atomic on its own.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<(), AppError>;

    async fn find(&self, resource: &ResolvedResource, id: i64, include_archived: bool) -> Result<Option<Value>, AppError>;

    /// One page of active rows plus the filtered total.
    async fn page(&self, resource: &ResolvedResource, query: &GridQuery) -> Result<(Vec<Value>, u64), AppError>;

    async fn list(
        &self,
        resource: &ResolvedResource,
        filters: &[Filter],
        sort: &[SortKey],
        include_archived: bool,
    ) -> Result<Vec<Value>, AppError>;

    /// Insert and return the stored row (ids, timestamps and defaults filled in).
    async fn insert(&self, resource: &ResolvedResource, values: &Map<String, Value>) -> Result<Value, AppError>;

    /// Patch an active row. `None` when no such active row exists.
    async fn update(
        &self,
        resource: &ResolvedResource,
        id: i64,
        values: &Map<String, Value>,
    ) -> Result<Option<Value>, AppError>;

    /// Archive or restore rows; returns the number of rows changed.
    async fn set_archived(&self, resource: &ResolvedResource, ids: &[i64], archived: bool) -> Result<u64, AppError>;

    /// Write `column = index` for each id in order.
    async fn reorder(&self, resource: &ResolvedResource, column: &str, ids: &[i64]) -> Result<(), AppError>;

    /// Run every step of the plan, all or nothing.
    async fn apply_deletion(&self, plan: &DeletionPlan<'_>) -> Result<(), AppError>;
}
