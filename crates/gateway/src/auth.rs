// Session/Auth Gateway
//
// OAuth authorization-code dance against the vendor, and lookup of the
// session bound to a request's cookie. Nothing here talks to the registry:
// a connection's lifetime is independent of the session that opened it.

use crate::error::GatewayError;
use crate::server::AppState;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use ewerelay_session::{Session, SessionError};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Some vendor deployments report the account region on the redirect
    pub region: Option<String>,
}

/// Session id carried by the request's cookie, if any.
pub fn session_id<'a>(state: &AppState, jar: &'a CookieJar) -> Option<&'a str> {
    jar.get(&state.config.server.session_cookie)
        .map(|cookie| cookie.value())
}

/// The session bound to this request, or `None` for anonymous callers.
pub async fn current_session(state: &AppState, jar: &CookieJar) -> Option<Session> {
    let id = session_id(state, jar)?;
    state.sessions.get(id).await
}

fn session_cookie(state: &AppState, value: String) -> Cookie<'static> {
    Cookie::build((state.config.server.session_cookie.clone(), value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.server.cookie_secure)
        .build()
}

/// `GET /login`
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Response, GatewayError> {
    let session = state.sessions.get_or_create(session_id(&state, &jar)).await;

    let csrf_state = state
        .sessions
        .begin_authorization(&session.id)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
    let location = state
        .oauth
        .authorization_url(&csrf_state)
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    tracing::info!("Session {} redirected to vendor authorization", session.id);

    let jar = jar.add(session_cookie(&state, session.id));
    Ok((jar, Redirect::to(&location)).into_response())
}

/// `GET /callback?code&state[&region]`
pub async fn callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<Response, GatewayError> {
    let id = session_id(&state, &jar).ok_or(GatewayError::StateMismatch)?;

    state
        .sessions
        .verify_state(id, params.state.as_deref().unwrap_or_default())
        .await
        .map_err(|e| {
            tracing::warn!("Rejected OAuth callback for session {}: {}", id, e);
            GatewayError::StateMismatch
        })?;

    let code = params
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| GatewayError::InvalidRequest("missing authorization code".to_string()))?;

    let request_region = params
        .region
        .clone()
        .unwrap_or_else(|| state.config.oauth.default_region.clone());
    let grant = state
        .oauth
        .exchange_code(code, &request_region)
        .await
        .map_err(|e| GatewayError::TokenExchange(e.to_string()))?;

    let region = grant.region.unwrap_or(request_region);
    state
        .sessions
        .attach_token(id, grant.access_token, region)
        .await
        .map_err(|e| match e {
            SessionError::UnknownSession => GatewayError::AuthenticationRequired,
            other => GatewayError::Internal(other.to_string()),
        })?;

    Ok(Redirect::to(&state.config.server.frontend_url).into_response())
}

/// `GET /logout`
///
/// Drops the session and the last fetch result recorded for it. An open push
/// channel is left to close on its own.
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let removed = match session_id(&state, &jar) {
        Some(id) => state.sessions.remove(id).await,
        None => None,
    };
    if let Some(user_id) = removed.and_then(|session| session.user_id) {
        state.orchestrator.latest().remove(&user_id).await;
    }

    let removal = Cookie::build((state.config.server.session_cookie.clone(), "")).path("/");
    let jar = jar.remove(removal);
    (jar, Redirect::to(&state.config.server.frontend_url)).into_response()
}
