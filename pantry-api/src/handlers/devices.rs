use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::debug;

use pantry_common::store::DeviceRegistration;

use super::{error_response, internal_error, AppState, HandlerError, MessageResponse};

#[derive(Deserialize, Serialize, Debug)]
pub struct RegisterDeviceRequest {
    pub token: String,
}

/// Register a push token. Registering a known token again is acknowledged, not an error.
pub async fn post_device(
    State(state): State<AppState>,
    Json(payload): Json<RegisterDeviceRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), HandlerError> {
    let token = payload.token.trim();
    if token.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "token is required"));
    }

    state.store.ensure_connected().await.map_err(internal_error)?;

    let (status, message) = match state
        .store
        .register_device(token)
        .await
        .map_err(internal_error)?
    {
        DeviceRegistration::Registered(device) => {
            debug!("registered device {}", device.id);
            (StatusCode::CREATED, "device registered")
        }
        DeviceRegistration::AlreadyRegistered => (StatusCode::OK, "device already registered"),
    };

    Ok((
        status,
        Json(MessageResponse {
            message: message.to_owned(),
        }),
    ))
}
