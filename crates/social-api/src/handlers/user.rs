use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use social_core::services::{
    DetailList, PasswordChange, ProfileChange, RevertOutcome, SecurityChange, UserList,
};
use social_core::{AuthContext, Id, ListPage, Outcome, UserDetail};

use super::{blocking, created, success, JsonBody, PathParams, UploadForm};
use crate::auth::Viewer;
use crate::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ProfileUpdate {
    pub updates: Vec<ProfileChange>,
}

#[derive(Debug, Deserialize)]
pub struct SecurityUpdate {
    pub security: SecurityChange,
}

#[derive(Debug, Deserialize)]
pub struct UsernameBody {
    pub username: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostIdBody {
    pub post_id: Id,
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<ProfileUpdate>,
) -> ApiResult<Response> {
    state.profile.update_profile(auth.user_id, body.updates)?;
    Ok(success(StatusCode::CREATED))
}

pub async fn update_security(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<SecurityUpdate>,
) -> ApiResult<Response> {
    state.profile.update_security(auth.user_id, body.security)?;
    Ok(success(StatusCode::CREATED))
}

pub async fn update_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<PasswordChange>,
) -> ApiResult<Response> {
    let profile = state.profile.clone();
    blocking(move || profile.update_password(auth.user_id, body)).await?;
    Ok(success(StatusCode::CREATED))
}

pub async fn upload_avatar(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let image = UploadForm::read(multipart).await?.take_image()?;
    let avatar = state.profile.upload_avatar(auth.user_id, image).await?;
    Ok(created(json!({ "avatar": avatar })))
}

pub async fn delete_avatar(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Response> {
    state.profile.delete_avatar(auth.user_id).await?;
    Ok(created(json!({ "avatar": null })))
}

pub async fn revert_username(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Response> {
    let response = match state.profile.revert_username(auth.user_id)? {
        RevertOutcome::Reverted => success(StatusCode::CREATED),
        RevertOutcome::Taken(error) => {
            Json(json!({ "message": "fail", "error": error })).into_response()
        }
        RevertOutcome::Expired => Json(json!({ "message": "fail #a" })).into_response(),
        RevertOutcome::NothingToRevert => Json(json!({ "message": "fail #b" })).into_response(),
    };
    Ok(response)
}

pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Value>> {
    let user = state.profile.me(auth.user_id)?;
    Ok(Json(json!({ "user": user })))
}

pub async fn my_details(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    PathParams((detail, skip)): PathParams<(String, usize)>,
) -> ApiResult<Json<ListPage>> {
    let list: DetailList = detail.parse()?;
    Ok(Json(state.profile.details(auth.user_id, list, skip)?))
}

pub async fn follow(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<UsernameBody>,
) -> ApiResult<Response> {
    let relation = state.relations.follow(auth.user_id, &body.username)?;
    Ok(created(json!({ "message": "success", "relation": relation })))
}

pub async fn toggle_block(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<UsernameBody>,
) -> ApiResult<Response> {
    let relation = state.relations.toggle_block(auth.user_id, &body.username)?;
    Ok(created(json!({ "message": "success", "relation": relation })))
}

pub async fn approve_tag(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<PostIdBody>,
) -> ApiResult<Response> {
    state.relations.approve_tag(auth.user_id, body.post_id)?;
    Ok(success(StatusCode::CREATED))
}

pub async fn suggestions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    PathParams(limit): PathParams<usize>,
) -> ApiResult<Json<Value>> {
    let users = state.relations.suggestions(auth.user_id, limit)?;
    Ok(Json(json!({ "users": users })))
}

pub async fn search(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    PathParams(term): PathParams<String>,
) -> ApiResult<Json<Value>> {
    let users = state.relations.search(viewer, &term)?;
    Ok(Json(json!({ "users": users })))
}

pub async fn user_detail(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    PathParams(username): PathParams<String>,
) -> ApiResult<Json<Outcome<UserDetail>>> {
    Ok(Json(state.relations.user_detail(viewer, &username)?))
}

pub async fn user_data(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    PathParams((username, list, skip)): PathParams<(String, String, usize)>,
) -> ApiResult<Json<ListPage>> {
    let list: UserList = list.parse()?;
    Ok(Json(state.relations.user_data(viewer, &username, list, skip)?))
}
