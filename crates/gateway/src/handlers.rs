// JSON API handlers
//
// `/api/get-data` is the request trigger; `/api/data` serves whatever the last
// trigger (request or timer) recorded for the caller.

use crate::auth::current_session;
use crate::error::GatewayError;
use crate::orchestrator::{LatestEntry, TriggerSource};
use crate::server::AppState;
use axum::extract::State;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

/// `GET /api/status`
pub async fn status(State(state): State<Arc<AppState>>, jar: CookieJar) -> Json<JsonValue> {
    let authenticated = current_session(&state, &jar)
        .await
        .is_some_and(|s| s.is_authenticated());
    Json(json!({ "authenticated": authenticated }))
}

/// `GET /api/get-data`
pub async fn get_data(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Json<JsonValue>, GatewayError> {
    let session = current_session(&state, &jar).await;
    let target = state.orchestrator.target_for(session.as_ref())?;

    let outcome = state
        .orchestrator
        .trigger(&target, TriggerSource::Request)
        .await;
    outcome.result?;

    Ok(Json(json!({ "status": "triggered" })))
}

/// `GET /api/data`
pub async fn latest_data(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Json<JsonValue>, GatewayError> {
    let session = current_session(&state, &jar)
        .await
        .filter(|s| s.is_authenticated())
        .ok_or(GatewayError::AuthenticationRequired)?;

    let entry = match session.user_id.as_deref() {
        Some(user_id) => state.orchestrator.latest().get(user_id).await,
        None => None,
    };

    match entry {
        Some(LatestEntry::State(device_state)) => Ok(Json(json!({
            "device": device_state.device,
            "data": device_state.fields,
            "fetchedAt": device_state.fetched_at,
        }))),
        Some(LatestEntry::Failed { kind, message, at }) => {
            Err(GatewayError::DataUnavailable(format!(
                "latest fetch at {} failed ({}): {}",
                at.to_rfc3339(),
                kind.as_str(),
                message
            )))
        }
        None => Err(GatewayError::DataUnavailable(
            "no device data fetched yet".to_string(),
        )),
    }
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.registry.connection_count().await,
    }))
}
