//! Resource handlers: grid, list, read, add, edit, delete, bulk delete, related info, reorder and row actions.

use crate::auth::{action_level, required_level};
use crate::config::{Operation, ResolvedResource, ResourceAction};
use crate::error::AppError;
use crate::extractors::CurrentPrincipal;
use crate::response::{success_many, success_one_ok, success_with, CreatedId, GridPage};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{Map, Value};
use std::collections::HashMap;

fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::BadRequest(format!("invalid id: {}", raw)))
}

/// Request body as a JSON object. An empty body is an empty object.
fn body_to_map(body: &Bytes) -> Result<Map<String, Value>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(m)) => Ok(m),
        Ok(_) => Err(AppError::BadRequest("body must be a JSON object".into())),
        Err(e) => Err(AppError::BadRequest(format!("invalid JSON body: {}", e))),
    }
}

/// `{"ids": [1, 2, ...]}`
fn parse_ids(body: &Map<String, Value>) -> Result<Vec<i64>, AppError> {
    let ids = body
        .get("ids")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::field("ids", "ids must be an array of integers"))?;
    ids.iter()
        .map(|v| v.as_i64().ok_or_else(|| AppError::field("ids", "ids must be an array of integers")))
        .collect()
}

/// Resolve the resource by path, check the operation is exposed and the principal holds the grant.
fn authorize<'s>(
    state: &'s AppState,
    principal: &CurrentPrincipal,
    segment: &str,
    op: Operation,
) -> Result<&'s ResolvedResource, AppError> {
    let res = state.model.require_path(segment)?;
    res.ensure_allowed(op)?;
    principal.0.require(&res.grant_key, required_level(op))?;
    Ok(res)
}

pub async fn grid(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path(segment): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<GridPage>, AppError> {
    let res = authorize(&state, &principal, &segment, Operation::Grid)?;
    Ok(Json(state.service().grid(res, &params).await?))
}

pub async fn grid_options(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path(segment): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let res = authorize(&state, &principal, &segment, Operation::Grid)?;
    Ok(success_many(state.service().grid_options(res)))
}

pub async fn list(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path(segment): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let res = authorize(&state, &principal, &segment, Operation::List)?;
    Ok(success_many(state.service().list(res, &params).await?))
}

pub async fn get_one(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path((segment, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let res = authorize(&state, &principal, &segment, Operation::Read)?;
    let id = parse_id(&id)?;
    Ok(success_one_ok(state.service().get_by_id(res, id).await?))
}

pub async fn add(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path(segment): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let res = authorize(&state, &principal, &segment, Operation::Create)?;
    let id = state.service().add(res, &body_to_map(&body)?).await?;
    Ok(success_with(StatusCode::CREATED, Some(format!("{} created", res.id)), CreatedId { id }))
}

pub async fn edit(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path((segment, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let res = authorize(&state, &principal, &segment, Operation::Update)?;
    let id = parse_id(&id)?;
    let id = state.service().edit(res, id, &body_to_map(&body)?).await?;
    Ok(success_with(StatusCode::OK, Some(format!("{} updated", res.id)), CreatedId { id }))
}

pub async fn delete_one(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path((segment, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let res = authorize(&state, &principal, &segment, Operation::Delete)?;
    let id = parse_id(&id)?;
    state.service().remove(res, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_bulk(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path(segment): Path<String>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let res = authorize(&state, &principal, &segment, Operation::DeleteBulk)?;
    let ids = parse_ids(&body_to_map(&body)?)?;
    state.service().remove_bulk(res, &ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn related_info(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path(segment): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let res = authorize(&state, &principal, &segment, Operation::RelatedInfo)?;
    let ids = parse_ids(&body_to_map(&body)?)?;
    Ok(success_many(state.service().related_info(res, &ids).await?))
}

pub async fn reorder(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path(segment): Path<String>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let res = authorize(&state, &principal, &segment, Operation::Reorder)?;
    let ids = parse_ids(&body_to_map(&body)?)?;
    state.service().reorder(res, &ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn run_action(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path((segment, id, action)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let res = state.model.require_path(&segment)?;
    let action: ResourceAction = action.parse().map_err(AppError::BadRequest)?;
    principal.0.require(&res.grant_key, action_level(action))?;
    let id = parse_id(&id)?;
    let row = state.service().run_action(res, id, action, &body_to_map(&body)?).await?;
    Ok(success_one_ok(row))
}
