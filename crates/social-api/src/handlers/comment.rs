use axum::{extract::State, http::StatusCode, response::Response, Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use social_core::services::Posted;
use social_core::{AuthContext, Id};

use super::{created, success, JsonBody, PathParams};
use crate::auth::Viewer;
use crate::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct NewComment {
    pub postid: Id,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct NewReply {
    pub comment: Id,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentIdBody {
    pub comment_id: Id,
}

fn posted(id_key: &str, posted: Posted) -> Response {
    let mut body = json!({
        "message": "success",
        "text": posted.text,
        "date": posted.date,
    });
    body[id_key] = json!(posted.id);
    created(body)
}

pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<NewComment>,
) -> ApiResult<Response> {
    let comment = state.comments.create(auth.user_id, body.postid, &body.text)?;
    Ok(posted("commentId", comment))
}

pub async fn toggle_like(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<CommentIdBody>,
) -> ApiResult<Response> {
    state.comments.toggle_like(auth.user_id, body.comment_id)?;
    Ok(success(StatusCode::CREATED))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<CommentIdBody>,
) -> ApiResult<Response> {
    state.comments.delete(auth.user_id, body.comment_id)?;
    Ok(success(StatusCode::CREATED))
}

pub async fn list(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    PathParams((post_id, skip)): PathParams<(Id, usize)>,
) -> ApiResult<Json<Value>> {
    let details = state.comments.list(viewer, post_id, skip)?;
    Ok(Json(json!({ "details": details })))
}

pub async fn create_reply(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<NewReply>,
) -> ApiResult<Response> {
    let reply = state
        .comments
        .create_reply(auth.user_id, body.comment, &body.text)?;
    Ok(posted("replyId", reply))
}

pub async fn toggle_reply_like(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<CommentIdBody>,
) -> ApiResult<Response> {
    state.comments.toggle_reply_like(auth.user_id, body.comment_id)?;
    Ok(success(StatusCode::CREATED))
}

pub async fn delete_reply(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(body): JsonBody<CommentIdBody>,
) -> ApiResult<Response> {
    state.comments.delete_reply(auth.user_id, body.comment_id)?;
    Ok(success(StatusCode::CREATED))
}

pub async fn list_replies(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    PathParams((comment_id, skip)): PathParams<(Id, usize)>,
) -> ApiResult<Json<Value>> {
    let details = state.comments.list_replies(viewer, comment_id, skip)?;
    Ok(Json(json!({ "details": details })))
}
