use axum::extract::{FromRequest, Json, rejection::JsonRejection};

use murmur_types::Error;

use crate::error::ApiError;

/// `Json` body whose rejections render as `{"message": ...}` like every other error.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Domain(Error::Validation(rejection.body_text()))
    }
}
