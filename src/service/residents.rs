//! Resident bed assignment.

use super::ResourceService;
use crate::error::AppError;
use crate::query::Filter;
use serde_json::{json, Map, Value};

pub const RESIDENT: &str = "resident";
const BED: &str = "facility_bed";
const ROOM: &str = "facility_room";

impl ResourceService {
    /// Fail with a conflict when another active resident occupies `bed_id`.
    pub async fn check_bed_available(&self, bed_id: i64, resident_id: Option<i64>) -> Result<(), AppError> {
        let residents = self.model.require(RESIDENT)?;
        let mut filters = vec![Filter::eq("bed_id", Value::from(bed_id))];
        if let Some(id) = resident_id {
            filters.push(Filter::ne("id", Value::from(id)));
        }
        let occupants = self.store.list(residents, &filters, &[], false).await?;
        match occupants.first() {
            None => Ok(()),
            Some(other) => Err(AppError::conflict(
                format!("bed {} is occupied", bed_id),
                Some(json!({ "bed_id": bed_id, "resident_id": other["id"] })),
            )),
        }
    }

    /// Facility that owns a bed (bed -> room -> facility).
    async fn bed_facility(&self, bed_id: i64) -> Result<Value, AppError> {
        let beds = self.model.require(BED)?;
        let rooms = self.model.require(ROOM)?;
        let bed = self
            .store
            .find(beds, bed_id, false)
            .await?
            .ok_or_else(|| AppError::field("bed_id", format!("bed {} does not exist", bed_id)))?;
        let room = match bed["room_id"].as_i64() {
            Some(room_id) => self.store.find(rooms, room_id, false).await?,
            None => None,
        };
        Ok(room.map(|r| r["facility_id"].clone()).unwrap_or(Value::Null))
    }

    /// Check a requested `bed_id` and set `facility_id` from the bed. A conflicting `facility_id` is a field error.
    pub(crate) async fn place_in_bed(
        &self,
        values: &mut Map<String, Value>,
        resident_id: Option<i64>,
    ) -> Result<(), AppError> {
        let Some(bed_id) = values.get("bed_id").and_then(Value::as_i64) else {
            return Ok(());
        };
        let facility_id = self.bed_facility(bed_id).await?;
        let requested = values.get("facility_id").and_then(Value::as_i64);
        if let (Some(requested), Some(owner)) = (requested, facility_id.as_i64()) {
            if requested != owner {
                return Err(AppError::field(
                    "facility_id",
                    format!("bed {} belongs to facility {}", bed_id, owner),
                ));
            }
        }
        self.check_bed_available(bed_id, resident_id).await?;
        if !facility_id.is_null() {
            values.insert("facility_id".into(), facility_id);
        }
        Ok(())
    }

    /// Move a resident to `bed_id` (and that bed's facility), or discharge from any bed with `None`.
    pub async fn move_resident(&self, resident_id: i64, bed_id: Option<i64>) -> Result<Value, AppError> {
        let residents = self.model.require(RESIDENT)?;
        if self.store.find(residents, resident_id, false).await?.is_none() {
            return Err(residents.not_found(resident_id));
        }
        let mut values = Map::new();
        match bed_id {
            None => {
                values.insert("bed_id".into(), Value::Null);
            }
            Some(bed_id) => {
                let facility_id = self.bed_facility(bed_id).await?;
                self.check_bed_available(bed_id, Some(resident_id)).await?;
                values.insert("bed_id".into(), Value::from(bed_id));
                if !facility_id.is_null() {
                    values.insert("facility_id".into(), facility_id);
                }
            }
        }
        let row = self
            .store
            .update(residents, resident_id, &values)
            .await?
            .ok_or_else(|| residents.not_found(resident_id))?;
        tracing::info!(resident_id, bed_id = ?bed_id, "resident moved");
        Ok(row)
    }
}

/// `{"bed_id": <int|null>}` from an action body.
pub(crate) fn parse_move_body(body: &Map<String, Value>) -> Result<Option<i64>, AppError> {
    match body.get("bed_id") {
        None => Err(AppError::field("bed_id", "bed_id is required")),
        Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| AppError::field("bed_id", "bed_id must be an integer")),
    }
}
