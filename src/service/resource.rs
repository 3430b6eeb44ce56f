//! Generic resource operations shared by every catalog resource.

use super::ledger::LEDGER_ENTRY;
use super::residents::{parse_move_body, RESIDENT};
use super::RequestValidator;
use crate::config::{OnDelete, Reference, ResolvedModel, ResolvedResource, ResourceAction};
use crate::error::{AppError, FieldErrors};
use crate::query::{default_sort, scope_filters, Filter, GridQuery};
use crate::response::{GridField, GridPage};
use crate::store::{DeletionPlan, DeletionStep, ResourceStore};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use utoipa::ToSchema;

/// Rows of another resource that point at the requested ids.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct RelatedReference {
    pub resource: String,
    pub path_segment: String,
    pub field: String,
    pub count: u64,
    pub ids: Vec<i64>,
}

#[derive(Clone)]
pub struct ResourceService {
    pub(crate) store: Arc<dyn ResourceStore>,
    pub(crate) model: Arc<ResolvedModel>,
}

fn row_id(row: &Value) -> Option<i64> {
    row["id"].as_i64()
}

/// Drop duplicate ids, keeping first occurrence.
fn dedupe(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

fn require_ids(ids: &[i64]) -> Result<Vec<i64>, AppError> {
    let ids = dedupe(ids);
    if ids.is_empty() {
        return Err(AppError::field("ids", "ids must not be empty"));
    }
    Ok(ids)
}

impl ResourceService {
    pub fn new(store: Arc<dyn ResourceStore>, model: Arc<ResolvedModel>) -> Self {
        ResourceService { store, model }
    }

    pub async fn grid(&self, res: &ResolvedResource, params: &HashMap<String, String>) -> Result<GridPage, AppError> {
        let query = GridQuery::from_params(res, params)?;
        let (rows, total) = self.store.page(res, &query).await?;
        Ok(GridPage {
            page: query.page,
            per_page: query.per_page,
            total,
            data: rows.into_iter().map(|r| res.redact(r)).collect(),
        })
    }

    /// Columns a grid may show, filter, sort or search on.
    pub fn grid_options(&self, res: &ResolvedResource) -> Vec<GridField> {
        res.columns
            .iter()
            .filter(|c| !res.sensitive_columns.contains(&c.name))
            .map(|c| GridField {
                name: c.name.clone(),
                kind: c.kind.as_str().to_string(),
                sortable: c.sortable,
                searchable: c.searchable,
            })
            .collect()
    }

    pub async fn list(&self, res: &ResolvedResource, params: &HashMap<String, String>) -> Result<Vec<Value>, AppError> {
        let filters = scope_filters(res, params)?;
        let rows = self.store.list(res, &filters, &default_sort(res), false).await?;
        Ok(rows.into_iter().map(|r| res.redact(r)).collect())
    }

    pub async fn get_by_id(&self, res: &ResolvedResource, id: i64) -> Result<Value, AppError> {
        self.store
            .find(res, id, false)
            .await?
            .map(|r| res.redact(r))
            .ok_or_else(|| res.not_found(id))
    }

    pub async fn add(&self, res: &ResolvedResource, body: &Map<String, Value>) -> Result<i64, AppError> {
        let mut values = RequestValidator::validate_create(res, body)?;
        if res.id == RESIDENT {
            self.place_in_bed(&mut values, None).await?;
        }
        self.check_integrity(res, &values, &values, None).await?;
        let row = self.store.insert(res, &values).await?;
        let id = row_id(&row).ok_or_else(|| AppError::Internal("inserted row has no id".into()))?;
        if res.id == LEDGER_ENTRY {
            self.recalculate_ledgers(row["ledger_id"].as_i64()).await?;
        }
        tracing::info!(resource = %res.id, id, "created");
        Ok(id)
    }

    /// Partial update. A missing or archived id is not found; edit never inserts.
    pub async fn edit(&self, res: &ResolvedResource, id: i64, body: &Map<String, Value>) -> Result<i64, AppError> {
        let existing = self.store.find(res, id, false).await?.ok_or_else(|| res.not_found(id))?;
        let mut values = RequestValidator::validate_update(res, body)?;
        if res.id == RESIDENT {
            self.place_in_bed(&mut values, Some(id)).await?;
        }
        let mut merged = existing.as_object().cloned().unwrap_or_default();
        merged.extend(values.clone());
        self.check_integrity(res, &values, &merged, Some(id)).await?;
        let row = self.store.update(res, id, &values).await?.ok_or_else(|| res.not_found(id))?;
        if res.id == LEDGER_ENTRY {
            self.recalculate_ledgers(existing["ledger_id"].as_i64().into_iter().chain(row["ledger_id"].as_i64()))
                .await?;
        }
        tracing::info!(resource = %res.id, id, fields = values.len(), "updated");
        Ok(id)
    }

    pub async fn remove(&self, res: &ResolvedResource, id: i64) -> Result<(), AppError> {
        self.remove_bulk(res, &[id]).await
    }

    /// Delete (or archive) every id, or none of them.
    pub async fn remove_bulk(&self, res: &ResolvedResource, ids: &[i64]) -> Result<(), AppError> {
        let ids = require_ids(ids)?;
        let mut rows = Vec::with_capacity(ids.len());
        for id in &ids {
            rows.push(self.store.find(res, *id, false).await?.ok_or_else(|| res.not_found(id))?);
        }
        if res.soft_delete {
            let archived = self.store.set_archived(res, &ids, true).await?;
            tracing::info!(resource = %res.id, ids = ?ids, archived, "archived");
            return Ok(());
        }
        let plan = self.plan_deletion(res, &ids).await?;
        self.store.apply_deletion(&plan).await?;
        if res.id == LEDGER_ENTRY {
            self.recalculate_ledgers(rows.iter().filter_map(|r| r["ledger_id"].as_i64())).await?;
        }
        tracing::info!(resource = %res.id, ids = ?ids, rows = plan.deleted_rows(), "deleted");
        Ok(())
    }

    /// Every relationship that points at `ids`, with the referencing row ids. Archived rows count.
    pub async fn related_info(&self, res: &ResolvedResource, ids: &[i64]) -> Result<Vec<RelatedReference>, AppError> {
        let ids = require_ids(ids)?;
        let mut out = Vec::new();
        for reference in &res.references {
            let from = self.model.require(&reference.from_resource)?;
            let rows = self.referencing_rows(res, reference, &ids).await?;
            if rows.is_empty() {
                continue;
            }
            out.push(related_entry(from, reference, rows.iter().filter_map(row_id).collect()));
        }
        Ok(out)
    }

    pub async fn restore(&self, res: &ResolvedResource, id: i64) -> Result<Value, AppError> {
        if !res.soft_delete {
            return Err(AppError::BadRequest(format!("{} rows cannot be restored", res.path_segment)));
        }
        let row = self.store.find(res, id, true).await?.ok_or_else(|| res.not_found(id))?;
        if res.id == RESIDENT {
            if let Some(bed_id) = row["bed_id"].as_i64() {
                self.check_bed_available(bed_id, Some(id)).await?;
            }
        }
        self.store.set_archived(res, &[id], false).await?;
        tracing::info!(resource = %res.id, id, "restored");
        self.get_by_id(res, id).await
    }

    /// Assign positions 0..n to `ids` in the given order.
    pub async fn reorder(&self, res: &ResolvedResource, ids: &[i64]) -> Result<(), AppError> {
        let column = res
            .reorder_column
            .as_deref()
            .ok_or_else(|| AppError::BadRequest(format!("{} cannot be reordered", res.path_segment)))?;
        if dedupe(ids).len() != ids.len() {
            return Err(AppError::field("ids", "ids must not repeat"));
        }
        let ids = require_ids(ids)?;
        for id in &ids {
            if self.store.find(res, *id, false).await?.is_none() {
                return Err(res.not_found(id));
            }
        }
        self.store.reorder(res, column, &ids).await?;
        tracing::info!(resource = %res.id, count = ids.len(), "reordered");
        Ok(())
    }

    /// Run a catalog-declared row action and return the resulting row.
    pub async fn run_action(
        &self,
        res: &ResolvedResource,
        id: i64,
        action: ResourceAction,
        body: &Map<String, Value>,
    ) -> Result<Value, AppError> {
        if !res.actions.contains(&action) {
            return Err(AppError::BadRequest(format!(
                "action {:?} not supported on {}",
                action, res.path_segment
            )));
        }
        let row = match action {
            ResourceAction::Restore => return self.restore(res, id).await,
            ResourceAction::Move if res.id == RESIDENT => self.move_resident(id, parse_move_body(body)?).await?,
            ResourceAction::Recalculate if res.id == super::ledger::LEDGER => self.recalculate_ledger(id).await?,
            _ => {
                return Err(AppError::BadRequest(format!(
                    "action {:?} not supported on {}",
                    action, res.path_segment
                )))
            }
        };
        Ok(res.redact(row))
    }

    /// FK targets must exist and be active; unique column sets must stay unique (archived rows included).
    async fn check_integrity(
        &self,
        res: &ResolvedResource,
        changed: &Map<String, Value>,
        merged: &Map<String, Value>,
        exclude_id: Option<i64>,
    ) -> Result<(), AppError> {
        let mut errors = FieldErrors::new();

        for fk in &res.foreign_keys {
            let Some(value) = changed.get(&fk.column).filter(|v| !v.is_null()) else { continue };
            let target = self.model.require(&fk.to_resource)?;
            let found = self
                .store
                .list(target, &[Filter::eq(fk.to_column.clone(), value.clone())], &[], false)
                .await?;
            if found.is_empty() {
                errors
                    .entry(fk.column.clone())
                    .or_default()
                    .push(format!("{} {} does not exist", fk.to_resource, value));
            }
        }

        for set in &res.unique {
            if !set.iter().any(|c| changed.contains_key(c)) {
                continue;
            }
            let values: Option<Vec<&Value>> = set.iter().map(|c| merged.get(c).filter(|v| !v.is_null())).collect();
            let Some(values) = values else { continue };
            let mut filters: Vec<Filter> = set
                .iter()
                .zip(values)
                .map(|(c, v)| Filter::eq(c.clone(), v.clone()))
                .collect();
            if let Some(id) = exclude_id {
                filters.push(Filter::ne("id", Value::from(id)));
            }
            if !self.store.list(res, &filters, &[], true).await?.is_empty() {
                let field = set.last().cloned().unwrap_or_default();
                let message = if set.len() == 1 {
                    format!("{} is already used", field)
                } else {
                    format!("{} is already used for this {}", field, set[..set.len() - 1].join(", "))
                };
                errors.entry(field).or_default().push(message);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(errors))
        }
    }

    /// Rows of `reference.from_resource` whose FK points at `ids` of `target`.
    async fn referencing_rows(
        &self,
        target: &ResolvedResource,
        reference: &Reference,
        ids: &[i64],
    ) -> Result<Vec<Value>, AppError> {
        let from = self.model.require(&reference.from_resource)?;
        let keys: Vec<Value> = if reference.to_column == "id" {
            ids.iter().map(|id| Value::from(*id)).collect()
        } else {
            let id_values = ids.iter().map(|id| Value::from(*id)).collect();
            self.store
                .list(target, &[Filter::is_in("id", id_values)], &[], true)
                .await?
                .into_iter()
                .map(|r| r[reference.to_column.as_str()].clone())
                .filter(|v| !v.is_null())
                .collect()
        };
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.store
            .list(from, &[Filter::is_in(reference.from_column.clone(), keys)], &[], true)
            .await
    }

    /// Walk references from the rows being deleted: restrict blocks, cascade enqueues, set_null clears.
    /// Steps run set-nulls first, then deletes children before parents.
    async fn plan_deletion<'m>(&'m self, res: &'m ResolvedResource, ids: &[i64]) -> Result<DeletionPlan<'m>, AppError> {
        let mut visited: HashSet<(String, i64)> = ids.iter().map(|id| (res.id.clone(), *id)).collect();
        let mut queue: VecDeque<(&'m ResolvedResource, Vec<i64>)> = VecDeque::from([(res, ids.to_vec())]);
        let mut deletes = Vec::new();
        let mut set_nulls = Vec::new();
        let mut blocked = Vec::new();

        while let Some((target, target_ids)) = queue.pop_front() {
            for reference in &target.references {
                let from = self.model.require(&reference.from_resource)?;
                let rows = self.referencing_rows(target, reference, &target_ids).await?;
                let row_ids: Vec<i64> = rows
                    .iter()
                    .filter_map(row_id)
                    .filter(|id| !visited.contains(&(from.id.clone(), *id)))
                    .collect();
                if row_ids.is_empty() {
                    continue;
                }
                match reference.on_delete {
                    OnDelete::Restrict => blocked.push(related_entry(from, reference, row_ids)),
                    OnDelete::Cascade => {
                        visited.extend(row_ids.iter().map(|id| (from.id.clone(), *id)));
                        queue.push_back((from, row_ids));
                    }
                    OnDelete::SetNull => set_nulls.push(DeletionStep::SetNull {
                        resource: from,
                        column: reference.from_column.clone(),
                        ids: row_ids,
                    }),
                }
            }
            deletes.push(DeletionStep::Delete {
                resource: target,
                ids: target_ids,
            });
        }

        if !blocked.is_empty() {
            tracing::warn!(resource = %res.id, ids = ?ids, "delete blocked by references");
            return Err(AppError::conflict(
                format!("{} is still referenced", res.id),
                Some(json!({ "related": blocked })),
            ));
        }
        deletes.reverse();
        set_nulls.extend(deletes);
        Ok(DeletionPlan { steps: set_nulls })
    }
}

fn related_entry(from: &ResolvedResource, reference: &Reference, ids: Vec<i64>) -> RelatedReference {
    RelatedReference {
        resource: from.id.clone(),
        path_segment: from.path_segment.clone(),
        field: reference.from_column.clone(),
        count: ids.len() as u64,
        ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin_catalog, resolve};
    use crate::store::MemoryStore;

    fn service() -> ResourceService {
        let model = resolve(&builtin_catalog().unwrap()).unwrap();
        ResourceService::new(Arc::new(MemoryStore::new()), Arc::new(model))
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    async fn seed_room(svc: &ResourceService) -> (i64, i64, i64) {
        let m = svc.model.clone();
        let space = svc.add(m.resource("space").unwrap(), &obj(json!({"name": "S"}))).await.unwrap();
        let facility = svc
            .add(m.resource("facility").unwrap(), &obj(json!({"space_id": space, "name": "F"})))
            .await
            .unwrap();
        let room = svc
            .add(m.resource("facility_room").unwrap(), &obj(json!({"facility_id": facility, "number": "101"})))
            .await
            .unwrap();
        (space, facility, room)
    }

    #[tokio::test]
    async fn foreign_keys_must_exist() {
        let svc = service();
        let m = svc.model.clone();
        let err = svc
            .add(m.resource("facility").unwrap(), &obj(json!({"space_id": 99, "name": "F"})))
            .await
            .unwrap_err();
        match err {
            AppError::Validation(f) => assert!(f["space_id"][0].contains("does not exist")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn cascade_deletes_children_before_parents() {
        let svc = service();
        let m = svc.model.clone();
        let (_, _, room) = seed_room(&svc).await;
        let beds = m.resource("facility_bed").unwrap();
        let bed = svc.add(beds, &obj(json!({"room_id": room, "number": "A"}))).await.unwrap();

        let rooms = m.resource("facility_room").unwrap();
        let plan = svc.plan_deletion(rooms, &[room]).await.unwrap();
        let kinds: Vec<(String, Vec<i64>)> = plan
            .steps
            .iter()
            .map(|s| match s {
                DeletionStep::Delete { resource, ids } => (format!("delete {}", resource.id), ids.clone()),
                DeletionStep::SetNull { resource, column, ids } => (format!("null {}.{}", resource.id, column), ids.clone()),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("delete facility_bed".to_string(), vec![bed]),
                ("delete facility_room".to_string(), vec![room]),
            ]
        );
    }

    #[tokio::test]
    async fn restrict_blocks_and_reports_references() {
        let svc = service();
        let m = svc.model.clone();
        let (space, facility, _) = seed_room(&svc).await;
        let spaces = m.resource("space").unwrap();
        let err = svc.remove(spaces, space).await.unwrap_err();
        match err {
            AppError::Conflict { details: Some(d), .. } => {
                let related = d["related"].as_array().unwrap();
                assert!(related.iter().any(|r| r["resource"] == "facility" && r["ids"] == json!([facility])));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(svc.get_by_id(spaces, space).await.is_ok());
    }

    #[tokio::test]
    async fn unique_sets_are_checked_on_add_and_edit() {
        let svc = service();
        let m = svc.model.clone();
        let (_, facility, room) = seed_room(&svc).await;
        let rooms = m.resource("facility_room").unwrap();
        let err = svc
            .add(rooms, &obj(json!({"facility_id": facility, "number": "101"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref f) if f.contains_key("number")));

        let other = svc
            .add(rooms, &obj(json!({"facility_id": facility, "number": "102"})))
            .await
            .unwrap();
        assert!(svc.edit(rooms, other, &obj(json!({"number": "101"}))).await.is_err());
        assert_eq!(svc.edit(rooms, room, &obj(json!({"number": "101", "floor": 2}))).await.unwrap(), room);
    }
}
