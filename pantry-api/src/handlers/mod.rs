use std::sync::Arc;

use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::error;

use pantry_common::store::Store;

mod app;
mod devices;
mod products;
mod upload;

pub use app::add_routes;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub max_upload_bytes: usize,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

pub type HandlerError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> HandlerError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub(crate) fn internal_error<E>(err: E) -> HandlerError
where
    E: std::error::Error,
{
    error!("internal error: {}", err);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
