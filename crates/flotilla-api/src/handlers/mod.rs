//! Request handlers organized by resource.

pub mod fleet;
pub mod health;
pub mod pools;
pub mod webhook;

use axum::http::StatusCode;
use flotilla_core::Error;

/// Map a domain error to an HTTP status and message.
pub(crate) fn error_response(err: Error) -> (StatusCode, String) {
    let status = match &err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Config(_) => StatusCode::BAD_REQUEST,
        Error::Store(_) | Error::TransientApi(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}
