//! Resolve the calling principal from the `Authorization: Bearer <token>` header.

use crate::auth::{parse_grants, Principal};
use crate::error::AppError;
use crate::query::Filter;
use crate::state::AppState;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::header::AUTHORIZATION, http::request::Parts};
use serde_json::Value;

const USER_RESOURCE: &str = "user";
const ROLE_RESOURCE: &str = "role";

/// Principal for the current request. With auth disabled this is always `Principal::System`.
#[derive(Clone, Debug)]
pub struct CurrentPrincipal(pub Principal);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentPrincipal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if !state.settings.auth_enabled {
            return Ok(CurrentPrincipal(Principal::System));
        }
        let token = bearer_token(parts).ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;
        let users = state.model.require(USER_RESOURCE)?;
        let roles = state.model.require(ROLE_RESOURCE)?;

        let user = state
            .store
            .list(users, &[Filter::eq("api_token", Value::String(token.to_string()))], &[], false)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Unauthorized("invalid token".into()))?;
        let user_id = user["id"].as_i64().unwrap_or_default();
        let role = match user["role_id"].as_i64() {
            Some(role_id) => state.store.find(roles, role_id, false).await?,
            None => None,
        };
        let (is_admin, grants) = role
            .map(|r| (r["is_admin"].as_bool().unwrap_or(false), parse_grants(&r["grants"])))
            .unwrap_or_default();
        tracing::debug!(user_id, is_admin, "principal resolved");
        Ok(CurrentPrincipal(Principal::User {
            user_id,
            username: user["username"].as_str().unwrap_or_default().to_string(),
            is_admin,
            grants,
        }))
    }
}
