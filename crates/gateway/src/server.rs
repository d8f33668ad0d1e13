use crate::auth::{self, current_session};
use crate::error::GatewayError;
use crate::handlers;
use crate::orchestrator::FetchOrchestrator;
use crate::poller::{Poller, PollerHandle};
use crate::protocol::PushFrame;
use crate::registry::{ConnectionRegistry, PushConnection};
use anyhow::{Context, Result};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_extra::extract::cookie::CookieJar;
use ewerelay_api::{DeviceApiClient, DeviceFilter, DeviceStateSource, FieldSelection, OAuthClient};
use ewerelay_core::{Config, ConfigValidator, DeviceConfig};
use ewerelay_session::SessionStore;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Shared state handed to every handler
pub struct AppState {
    pub config: Config,
    pub sessions: SessionStore,
    pub registry: ConnectionRegistry,
    pub orchestrator: Arc<FetchOrchestrator>,
    pub oauth: OAuthClient,
}

impl AppState {
    /// Wire up the vendor clients described by `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        let selection = FieldSelection::new(
            config.device.fields.clone(),
            config.device.required_fields.clone(),
        );
        let source = DeviceApiClient::new(
            config.device.api_base.clone(),
            selection,
            Duration::from_secs(config.device.request_timeout_secs),
        )
        .context("device client")?;
        let oauth = OAuthClient::new(
            config.oauth.client_id.clone(),
            config.oauth.client_secret.clone(),
            config.oauth.redirect_uri.clone(),
            config.oauth.authorize_url.clone(),
            config.oauth.token_url.clone(),
        )
        .context("OAuth client")?;
        Self::new(config, Arc::new(source), oauth)
    }

    pub fn new(
        config: Config,
        source: Arc<dyn DeviceStateSource>,
        oauth: OAuthClient,
    ) -> Result<Self> {
        let filter = device_filter(&config.device)?;
        let registry = ConnectionRegistry::new();
        let orchestrator = FetchOrchestrator::new(
            source,
            filter,
            registry.clone(),
            config.oauth.default_region.clone(),
        );

        Ok(Self {
            config,
            sessions: SessionStore::new(),
            registry,
            orchestrator: Arc::new(orchestrator),
            oauth,
        })
    }
}

/// Device id wins over device name when both are configured.
pub fn device_filter(config: &DeviceConfig) -> Result<DeviceFilter> {
    match (&config.device_id, &config.device_name) {
        (Some(id), _) if !id.is_empty() => Ok(DeviceFilter::Id(id.clone())),
        (_, Some(name)) if !name.is_empty() => Ok(DeviceFilter::Name(name.clone())),
        _ => anyhow::bail!("either device.device_id or device.device_name must be set"),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.server.ws_path.clone();
    Router::new()
        .route("/login", get(auth::login))
        .route("/callback", get(auth::callback))
        .route("/logout", get(auth::logout))
        .route("/api/status", get(handlers::status))
        .route("/api/get-data", get(handlers::get_data))
        .route("/api/data", get(handlers::latest_data))
        .route("/health", get(handlers::health))
        .route(&ws_path, get(ws_handler))
        .with_state(state)
}

/// Push channel upgrade. The session is checked before the upgrade so an
/// anonymous caller gets a plain 401.
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(session) = current_session(&state, &jar)
        .await
        .filter(|s| s.is_authenticated())
    else {
        return GatewayError::AuthenticationRequired.into_response();
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let user_id = match state.sessions.ensure_user_id(&session.id).await {
        Ok(user_id) => user_id,
        Err(_) => return GatewayError::AuthenticationRequired.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (connection, mut rx) = PushConnection::new();
    let conn_id = connection.id().to_string();
    state.registry.register(&user_id, connection).await;

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let hello = PushFrame::hello(state.config.poll.interval_secs);
    if let Err(e) = send_frame(&mut ws_sender, &hello).await {
        tracing::debug!("Push channel {} closed before hello: {}", conn_id, e);
        state.registry.unregister_connection(&user_id, &conn_id).await;
        return;
    }

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        tracing::debug!("Pushing {} frame on {}", frame.frame_type(), conn_id);
                        if let Err(e) = send_frame(&mut ws_sender, &frame).await {
                            tracing::warn!("Push on channel {} failed: {}", conn_id, e);
                            break;
                        }
                    }
                    None => {
                        // sender dropped: superseded by a newer connection
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    // client payloads are ignored; pings are answered by axum
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("Push channel {} read error: {}", conn_id, e);
                        break;
                    }
                }
            }
        }
    }

    state.registry.unregister_connection(&user_id, &conn_id).await;
    tracing::info!("Push channel {} for user {} closed", conn_id, user_id);
}

async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &PushFrame) -> Result<()> {
    let text = serde_json::to_string(frame)?;
    sender.send(Message::Text(text.into())).await?;
    Ok(())
}

/// Gateway server
pub struct GatewayServer {
    state: Arc<AppState>,
}

impl GatewayServer {
    pub fn new(config: Config) -> Result<Self> {
        ConfigValidator::validate(&config).context("invalid configuration")?;
        let state = AppState::from_config(config)?;
        Ok(Self::with_state(Arc::new(state)))
    }

    pub fn with_state(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn start(self) -> Result<()> {
        let addr = self.state.config.server.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;

        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
    }

    /// Serve on `listener` until `shutdown` resolves, running the poller
    /// for as long as the server is up.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let interval = self.state.config.poll.interval_secs;
        let poller: Option<PollerHandle> = (interval > 0).then(|| {
            Poller::new(
                self.state.sessions.clone(),
                self.state.orchestrator.clone(),
                Duration::from_secs(interval),
            )
            .spawn()
        });

        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Relay listening on http://{}", addr);
        }

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .context("server error");

        if let Some(poller) = poller {
            poller.stop().await;
        }
        tracing::info!("Relay stopped");
        served
    }
}
