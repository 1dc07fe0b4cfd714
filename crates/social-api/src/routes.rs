use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method, StatusCode},
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::warn;

use crate::auth::{auth_rate_limit, optional_auth, require_auth};
use crate::handlers::{auth, comment, hashtag, health, post as posts, user};
use crate::AppState;
use social_core::media::PUBLIC_PATH;

fn auth_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route(
            "/logout",
            post(auth::logout).route_layer(from_fn_with_state(state.clone(), require_auth)),
        )
        .layer(from_fn_with_state(state.clone(), auth_rate_limit))
}

fn user_routes(state: &AppState) -> Router<AppState> {
    let private = Router::new()
        .route("/profile", post(user::update_profile))
        .route("/security", post(user::update_security))
        .route("/password", post(user::update_password))
        .route("/details/{detail}/{skip}", get(user::my_details))
        .route(
            "/avatar",
            post(user::upload_avatar).delete(user::delete_avatar),
        )
        .route("/follow", post(user::follow))
        .route("/approveTag", post(user::approve_tag))
        .route("/toggleblock", post(user::toggle_block))
        .route("/suggestions/{limit}", get(user::suggestions))
        .route("/me", get(user::me))
        .route("/revert", post(user::revert_username))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let public = Router::new()
        .route("/search/{term}", get(user::search))
        .route("/detail/{username}", get(user::user_detail))
        .route("/data/{username}/{list}/{skip}", get(user::user_data))
        .route_layer(from_fn_with_state(state.clone(), optional_auth));

    private.merge(public)
}

fn post_routes(state: &AppState) -> Router<AppState> {
    let private = Router::new()
        .route("/create", post(posts::create))
        .route("/togglelike", post(posts::toggle_like))
        .route("/togglesaved", post(posts::toggle_saved))
        .route("/togglearchive", post(posts::toggle_archive))
        .route("/removetag", post(posts::remove_tag))
        .route("/allowcomment", post(posts::allow_comment))
        .route("/feed/{skip}", get(posts::feed))
        .route("/explore/{skip}", get(posts::explore))
        .route("/delete", delete(posts::delete))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let public = Router::new()
        .route("/detail/{id}", get(posts::detail))
        .route_layer(from_fn_with_state(state.clone(), optional_auth));

    private.merge(public)
}

fn comment_routes(state: &AppState) -> Router<AppState> {
    let private = Router::new()
        .route("/create", post(comment::create))
        .route("/togglelike", post(comment::toggle_like))
        .route("/delete", delete(comment::delete))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let public = Router::new()
        .route("/{post_id}/{skip}", get(comment::list))
        .route_layer(from_fn_with_state(state.clone(), optional_auth));

    private.merge(public)
}

fn reply_routes(state: &AppState) -> Router<AppState> {
    let private = Router::new()
        .route("/create", post(comment::create_reply))
        .route("/togglelike", post(comment::toggle_reply_like))
        .route("/delete", delete(comment::delete_reply))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let public = Router::new()
        .route("/{comment_id}/{skip}", get(comment::list_replies))
        .route_layer(from_fn_with_state(state.clone(), optional_auth));

    private.merge(public)
}

fn hashtag_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/{tag}/{skip}", get(hashtag::posts))
        .route_layer(from_fn_with_state(state.clone(), optional_auth))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::OPTIONS,
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": "Could not find this route.", "status": 404 })),
    )
}

pub fn create_router(state: AppState) -> Router {
    let settings = state.settings.clone();

    Router::new()
        .route("/health", get(health::health))
        .nest("/api/auth", auth_routes(&state))
        .nest("/api/user", user_routes(&state))
        .nest("/api/post", post_routes(&state))
        .nest("/api/comment", comment_routes(&state))
        .nest("/api/commentreply", reply_routes(&state))
        .nest("/api/hashtag", hashtag_routes(&state))
        .nest_service(PUBLIC_PATH, ServeDir::new(&settings.media.upload_dir))
        .fallback(not_found)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&settings.server.cors_origins))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                .layer(DefaultBodyLimit::max(settings.server.max_body_bytes)),
        )
}
