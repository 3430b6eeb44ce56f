//! Standard response envelope helpers.

use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Serialize)]
pub struct SuccessOne<T> {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
}

#[derive(Serialize)]
pub struct SuccessMany<T> {
    pub data: Vec<T>,
    pub meta: MetaCount,
}

#[derive(Serialize, ToSchema)]
pub struct MetaCount {
    pub count: u64,
}

/// One grid page. `total` counts every row matching the filters, not just this page.
#[derive(Serialize, ToSchema)]
pub struct GridPage {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    #[schema(value_type = Vec<Object>)]
    pub data: Vec<Value>,
}

#[derive(Serialize, ToSchema)]
pub struct CreatedId {
    pub id: i64,
}

/// Column description for the grid options endpoint.
#[derive(Serialize, ToSchema)]
pub struct GridField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sortable: bool,
    pub searchable: bool,
}

pub fn success_with<T: Serialize>(status: StatusCode, message: Option<String>, data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (
        status,
        Json(SuccessOne {
            status: status.as_u16(),
            message,
            data,
        }),
    )
}

pub fn success_one_ok<T: Serialize>(data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    success_with(StatusCode::OK, None, data)
}

pub fn success_many<T: Serialize>(data: Vec<T>) -> (StatusCode, Json<SuccessMany<T>>) {
    let count = data.len() as u64;
    (
        StatusCode::OK,
        Json(SuccessMany {
            data,
            meta: MetaCount { count },
        }),
    )
}
