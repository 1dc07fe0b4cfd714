use axum::{extract::State, Json};
use social_core::HashtagPage;

use super::PathParams;
use crate::auth::Viewer;
use crate::{ApiResult, AppState};

pub async fn posts(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    PathParams((tag, skip)): PathParams<(String, usize)>,
) -> ApiResult<Json<HashtagPage>> {
    Ok(Json(state.hashtags.posts(viewer, &tag, skip)?))
}
