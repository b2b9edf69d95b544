//! Operator REST API: HTTP Basic-authenticated action routes, matching
//! `original_source/src/device-manager/device_manager.go`'s `setupRestApi`.

use crate::dispatch::{send_action, ActionResponse};
use crate::state::AppState;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `OcppDataTransfer`, matching `internal/ocpp/ocpp_models.go`.
#[derive(Debug, Deserialize, Serialize)]
struct DataTransfer {
    #[serde(rename = "vendorId", default, skip_serializing_if = "String::is_empty")]
    vendor_id: String,
    #[serde(rename = "messageId", default, skip_serializing_if = "String::is_empty")]
    message_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    data: String,
}

pub fn router(state: AppState) -> Router {
    let actions = Router::new()
        .route("/datatransfer/{network_id}", post(action_data_transfer))
        .route("/setchargingprofile/{network_id}", post(set_charging_profile))
        .route("/clearchargingprofile/{network_id}", post(clear_charging_profile))
        .route("/remotestarttransaction/{network_id}", post(remote_start_transaction))
        .route("/remotestoptransaction/{network_id}", post(remote_stop_transaction))
        .route("/unlockconnector/{network_id}", post(unlock_connector))
        .route("/reset/{network_id}", post(reset))
        .route("/getdiagnostics/{network_id}", post(get_diagnostics))
        .route("/getconfiguration/{network_id}", post(get_configuration))
        .route("/changeavailability/{network_id}", post(change_availability))
        .route("/changeconfiguration/{network_id}", post(change_configuration))
        .route("/triggermessage/{network_id}", post(trigger_message))
        .layer(middleware::from_fn_with_state(state.clone(), basic_auth));

    Router::new()
        .route("/ping", axum::routing::get(|| async { "pong" }))
        .nest("/actions", actions)
        .with_state(state)
}

/// Hand-rolled HTTP Basic Auth check for the `/actions` routes, matching
/// `device_manager.go`'s `setupRestApi` basic-auth middleware.
async fn basic_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let http_config = &state.config.services.device_manager.http;

    let credentials = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|encoded| BASE64.decode(encoded).ok())
        .and_then(|decoded| String::from_utf8(decoded).ok());

    let authorized = match credentials {
        Some(creds) => match creds.split_once(':') {
            Some((user, pass)) => {
                user == http_config.http_user && pass == http_config.http_password
            }
            None => false,
        },
        None => false,
    };

    if !authorized {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

async fn action_data_transfer(
    State(state): State<AppState>,
    Path(network_id): Path<String>,
    body: axum::body::Bytes,
) -> axum::response::Response {
    use axum::response::IntoResponse;

    let parsed: DataTransfer = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(network_id, error = %e, "error unmarshalling DataTransfer");
            return (StatusCode::OK, Json(empty_response())).into_response();
        }
    };
    let revalidated = match serde_json::to_value(&parsed) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(network_id, error = %e, "error marshalling DataTransfer");
            return (StatusCode::OK, Json(empty_response())).into_response();
        }
    };
    send_action(&state, &network_id, "DataTransfer", revalidated)
        .await
        .into_response()
}

fn empty_response() -> ActionResponse {
    ActionResponse {
        status_code: None,
        msg_id: None,
        message_body: None,
    }
}

macro_rules! action_route {
    ($name:ident, $message_type:literal) => {
        async fn $name(
            State(state): State<AppState>,
            Path(network_id): Path<String>,
            Json(body): Json<Value>,
        ) -> axum::response::Response {
            send_action(&state, &network_id, $message_type, body)
                .await
                .into_response()
        }
    };
}

action_route!(set_charging_profile, "SetChargingProfile");
action_route!(clear_charging_profile, "ClearChargingProfile");
action_route!(remote_start_transaction, "RemoteStartTransaction");
action_route!(remote_stop_transaction, "RemoteStopTransaction");
action_route!(unlock_connector, "UnlockConnector");
action_route!(reset, "Reset");
action_route!(get_diagnostics, "GetDiagnostics");
action_route!(get_configuration, "GetConfiguration");
action_route!(change_availability, "ChangeAvailability");
action_route!(change_configuration, "ChangeConfiguration");
action_route!(trigger_message, "TriggerMessage");
