use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::Response,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use social_core::services::NewPost;
use social_core::{AuthContext, Feed, Id, Outcome, Page, PostDetailView, PostTile};

use super::{created, success, JsonBody, PathParams, UploadForm};
use crate::auth::Viewer;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostIdBody {
    pub post_id: Id,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveTagBody {
    pub post_id: Id,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteBody {
    pub id: Id,
}

fn parse_flag(raw: Option<&str>) -> ApiResult<bool> {
    match raw.map(str::trim) {
        None | Some("") | Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(_) => Err(ApiError::Validation("Invalid allowComment".to_string())),
    }
}

pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let mut form = UploadForm::read(multipart).await?;
    let image = form.take_image()?;
    let new = NewPost {
        caption: form.text("caption").map(str::to_string),
        allow_comment: parse_flag(form.text("allowComment"))?,
        styles: form.json("styles", json!({}))?,
        tags: form.json("tag", Vec::new())?,
        hashtags: form.json("hashTag", Vec::new())?,
    };
    let post_id = state.posts.create(auth.user_id, image, new).await?;
    Ok(created(json!({ "message": "success", "postId": post_id })))
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<PostIdBody>,
) -> ApiResult<Response> {
    state.posts.toggle_like(auth.user_id, body.post_id)?;
    Ok(success(StatusCode::CREATED))
}

pub async fn toggle_saved(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<PostIdBody>,
) -> ApiResult<Response> {
    state.posts.toggle_saved(auth.user_id, body.post_id)?;
    Ok(success(StatusCode::CREATED))
}

pub async fn toggle_archive(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<PostIdBody>,
) -> ApiResult<Response> {
    state.posts.toggle_archive(auth.user_id, body.post_id)?;
    Ok(success(StatusCode::CREATED))
}

pub async fn remove_tag(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<RemoveTagBody>,
) -> ApiResult<Response> {
    state
        .posts
        .remove_tag(auth.user_id, body.post_id, body.username.as_deref())?;
    Ok(success(StatusCode::CREATED))
}

pub async fn allow_comment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<PostIdBody>,
) -> ApiResult<Response> {
    state.posts.toggle_allow_comment(auth.user_id, body.post_id)?;
    Ok(success(StatusCode::CREATED))
}

pub async fn feed(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    PathParams(skip): PathParams<usize>,
) -> ApiResult<Json<Feed>> {
    Ok(Json(state.posts.feed(auth.user_id, skip)?))
}

pub async fn explore(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    PathParams(skip): PathParams<usize>,
) -> ApiResult<Json<Page<PostTile>>> {
    Ok(Json(state.posts.explore(auth.user_id, skip)?))
}

pub async fn detail(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    PathParams(post_id): PathParams<Id>,
) -> ApiResult<Json<Outcome<PostDetailView>>> {
    Ok(Json(state.posts.detail(viewer, post_id)?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<DeleteBody>,
) -> ApiResult<Response> {
    state.posts.delete(auth.user_id, body.id).await?;
    Ok(success(StatusCode::OK))
}
