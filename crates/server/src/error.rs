//! Maps `gateway_core::Error`'s taxonomy onto HTTP status codes (spec.md
//! §7), the same seam the teacher's `ServerError -> StatusCode` impl
//! occupies, just against the shared core error type instead of a
//! server-local one.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::chat::ErrorBody;
use gateway_core::Error;

pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidRequest(_) | Error::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
        Error::ModelNotFound(_) => StatusCode::NOT_FOUND,
        Error::RateLimited | Error::TooManyConcurrent | Error::QueueFull => StatusCode::TOO_MANY_REQUESTS,
        Error::LoadTimeout | Error::PortExhaustion | Error::InsufficientMemory => StatusCode::SERVICE_UNAVAILABLE,
        Error::ChildUnreachable(_) => StatusCode::BAD_GATEWAY,
        Error::ChildCrashed(_) | Error::ContextOverflow => StatusCode::INTERNAL_SERVER_ERROR,
        Error::HashMismatch { .. } | Error::TruncatedTransfer { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
        Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Wraps a `gateway_core::Error` so handlers can return it directly and get
/// the `{error: {code, message, type}}` body shape plus correct status.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        (status, Json(ErrorBody::from_gateway_error(&self.0))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_not_found_is_404() {
        assert_eq!(status_for(&Error::ModelNotFound("m1".into())), StatusCode::NOT_FOUND);
    }

    #[test]
    fn rate_limited_is_429() {
        assert_eq!(status_for(&Error::RateLimited), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn child_unreachable_is_502() {
        assert_eq!(status_for(&Error::ChildUnreachable("x".into())), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn hash_mismatch_is_422() {
        assert_eq!(
            status_for(&Error::HashMismatch { expected: "a".into(), actual: "b".into() }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
