use axum::{extract::State, http::StatusCode, Extension, Json};
use serde_json::{json, Value};
use social_core::services::{LoginRequest, SignupRequest};
use social_core::AuthContext;

use super::{blocking, JsonBody};
use crate::{ApiResult, AppState};

pub async fn signup(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<SignupRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let accounts = state.accounts.clone();
    let (_, token) = blocking(move || accounts.register(req)).await?;
    Ok((StatusCode::CREATED, Json(json!({ "token": token }))))
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> ApiResult<Json<Value>> {
    let accounts = state.accounts.clone();
    let token = blocking(move || accounts.login(req)).await?;
    Ok(Json(json!({ "token": token })))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Value>> {
    state.accounts.logout(&auth)?;
    Ok(Json(json!({ "message": "Logout Successful" })))
}
