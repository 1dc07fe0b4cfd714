//! Route handlers, one module per API area.

pub mod auth;
pub mod comment;
pub mod hashtag;
pub mod health;
pub mod post;
pub mod user;

use std::collections::HashMap;

use axum::{
    extract::{FromRequest, FromRequestParts, Multipart},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use social_core::Upload;

use crate::{ApiError, ApiResult};

/// JSON body whose rejections render as [`ApiError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

/// Path parameters whose rejections render as [`ApiError`].
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct PathParams<T>(pub T);

/// Runs a CPU-heavy service call (password hashing) off the async workers.
pub async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> social_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))?
        .map_err(ApiError::from)
}

pub fn success(status: StatusCode) -> Response {
    (status, Json(json!({ "message": "success" }))).into_response()
}

pub fn created(body: Value) -> Response {
    (StatusCode::CREATED, Json(body)).into_response()
}

/// Multipart form split into the `image` file and plain text fields.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub image: Option<Upload>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "image" {
                let file_name = field.file_name().unwrap_or("image").to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let data = field.bytes().await?;
                form.image = Some(Upload {
                    file_name,
                    content_type,
                    data,
                });
            } else {
                let value = field.text().await?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    pub fn take_image(&mut self) -> ApiResult<Upload> {
        self.image
            .take()
            .ok_or_else(|| ApiError::Validation("No image provided".to_string()))
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Parses a field holding JSON, falling back to `default` when absent.
    pub fn json<T: serde::de::DeserializeOwned>(&self, name: &str, default: T) -> ApiResult<T> {
        match self.text(name).map(str::trim).filter(|v| !v.is_empty()) {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|_| ApiError::Validation(format!("Invalid {name}"))),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_field_parsing() {
        let mut form = UploadForm::default();
        form.fields.insert("tag".into(), r#"["ann","bob"]"#.into());
        form.fields.insert("bad".into(), "[oops".into());

        let tags: Vec<String> = form.json("tag", Vec::new()).unwrap();
        assert_eq!(tags, vec!["ann", "bob"]);
        let missing: Vec<String> = form.json("hashTag", Vec::new()).unwrap();
        assert!(missing.is_empty());
        assert!(form.json::<Vec<String>>("bad", Vec::new()).is_err());
        assert!(form.take_image().is_err());
    }

    #[tokio::test]
    async fn test_blocking_keeps_core_errors() {
        assert_eq!(blocking(|| Ok(7)).await.unwrap(), 7);
        let err = blocking::<(), _>(|| Err(social_core::CoreError::invalid_input()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
