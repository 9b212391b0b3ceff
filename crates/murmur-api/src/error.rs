use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::warn;

use murmur_types::Error;
use murmur_types::api::ErrorBody;

/// Error returned by every handler; renders as `{"message": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Domain(Error),
    Unauthorized,
    Forbidden(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Domain(e) => match e {
                Error::NotFound(_) => StatusCode::NOT_FOUND,
                Error::Validation(_) | Error::Empty(_) | Error::UploadFailed(_) => {
                    StatusCode::BAD_REQUEST
                }
                Error::Conflict(_) => StatusCode::CONFLICT,
                Error::UpstreamTransient(_) => StatusCode::SERVICE_UNAVAILABLE,
                Error::UpstreamPermanent(_) => StatusCode::BAD_GATEWAY,
                Error::Cancelled | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self::Domain(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            Self::Unauthorized => "unauthorized".to_string(),
            Self::Forbidden(why) => why,
            Self::Domain(e) => {
                if status.is_server_error() {
                    warn!("Request failed: {}", e);
                }
                e.to_string()
            }
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_types::models::AttachmentKind;

    #[test]
    fn statuses_follow_error_class() {
        let cases = [
            (Error::not_found("chat"), StatusCode::NOT_FOUND),
            (Error::Empty(AttachmentKind::Media), StatusCode::BAD_REQUEST),
            (Error::Conflict("dup".into()), StatusCode::CONFLICT),
            (Error::UpstreamTransient("busy".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::UpstreamPermanent("no".into()), StatusCode::BAD_GATEWAY),
            (Error::Cancelled, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
