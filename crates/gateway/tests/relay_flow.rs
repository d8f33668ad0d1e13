// End-to-end relay flow against a stubbed vendor: login, callback, push
// channel, and request-triggered fetches.

use std::net::SocketAddr;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{COOKIE, LOCATION, SET_COOKIE};
use reqwest::{redirect, StatusCode, Url};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ewerelay_core::Config;
use ewerelay_gateway::GatewayServer;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// ── Harness ─────────────────────────────────────────────────────────

struct Relay {
    addr: SocketAddr,
    http: reqwest::Client,
    vendor: MockServer,
    _shutdown: oneshot::Sender<()>,
}

impl Relay {
    async fn start() -> Self {
        let vendor = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/user/oauth/token"))
            .and(body_partial_json(json!({ "code": "X", "clientId": "app-id" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "accessToken": "tok123", "region": "as" })),
            )
            .mount(&vendor)
            .await;

        let mut config = Config::default();
        config.oauth.client_id = "app-id".into();
        config.oauth.redirect_uri = "http://localhost:8000/callback".into();
        config.oauth.token_url = format!("{}/v2/user/oauth/token", vendor.uri());
        config.device.api_base = vendor.uri();
        config.device.device_id = Some("1000abcd".into());
        config.poll.interval_secs = 0;

        let server = GatewayServer::new(config).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(server.serve(listener, async move {
            let _ = shutdown_rx.await;
        }));

        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .unwrap();

        Self {
            addr,
            http,
            vendor,
            _shutdown: shutdown_tx,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn get(&self, path: &str, cookie: Option<&str>) -> reqwest::Response {
        let mut request = self.http.get(self.url(path));
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        request.send().await.unwrap()
    }

    /// Run `/login` + `/callback`; returns the `Cookie` header value.
    async fn login(&self) -> String {
        let resp = self.get("/login", None).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);

        let cookie = resp.headers()[SET_COOKIE]
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();
        let location = Url::parse(resp.headers()[LOCATION].to_str().unwrap()).unwrap();
        let query: Vec<(String, String)> = location.query_pairs().into_owned().collect();
        let param = |name: &str| {
            query
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(param("client_id").as_deref(), Some("app-id"));
        assert!(param("redirect_uri").is_some());
        let state = param("state").expect("state parameter");

        let resp = self
            .get(&format!("/callback?code=X&state={}", state), Some(&cookie))
            .await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[LOCATION], "http://localhost:3000");

        cookie
    }

    async fn connect(&self, cookie: &str) -> WsStream {
        let mut request = format!("ws://{}/ws", self.addr)
            .into_client_request()
            .unwrap();
        request
            .headers_mut()
            .insert("Cookie", cookie.parse().unwrap());
        let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

        let hello = next_frame(&mut ws).await.expect("hello frame");
        assert_eq!(hello["type"], "hello");
        assert_eq!(hello["protocol"], 1);
        ws
    }

    async fn mount_device(&self, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/v2/device/thing/status"))
            .respond_with(template)
            .mount(&self.vendor)
            .await;
    }
}

/// Next JSON text frame, or `None` once the server closes the channel.
async fn next_frame(ws: &mut WsStream) -> Option<Value> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")?;
        match msg.ok()? {
            Message::Text(text) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

// ── Flows ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_then_push_device_state() {
    let relay = Relay::start().await;
    let cookie = relay.login().await;

    let status: Value = relay
        .get("/api/status", Some(&cookie))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(status, json!({ "authenticated": true }));

    let mut ws = relay.connect(&cookie).await;
    relay
        .mount_device(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "currentTemperature": 21.5, "currentHumidity": 40 })),
        )
        .await;

    let resp = relay.get("/api/get-data", Some(&cookie)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "status": "triggered" }));

    let frame = next_frame(&mut ws).await.expect("device state frame");
    assert_eq!(frame["type"], "deviceState");
    assert_eq!(frame["device"], "1000abcd");
    assert_eq!(frame["data"]["currentTemperature"], json!(21.5));
    assert_eq!(frame["data"]["currentHumidity"], json!(40));
}

#[tokio::test]
async fn test_upstream_failure_is_pushed_and_reported() {
    let relay = Relay::start().await;
    let cookie = relay.login().await;
    let mut ws = relay.connect(&cookie).await;

    relay
        .mount_device(ResponseTemplate::new(500).set_body_string("internal error"))
        .await;

    let resp = relay.get("/api/get-data", Some(&cookie)).await;
    assert!(resp.status().is_server_error());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "UpstreamRequestFailed");

    let frame = next_frame(&mut ws).await.expect("error frame");
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["kind"], "UpstreamRequestFailed");
}

#[tokio::test]
async fn test_reconnect_supersedes_previous_channel() {
    let relay = Relay::start().await;
    let cookie = relay.login().await;

    let mut first = relay.connect(&cookie).await;
    let mut second = relay.connect(&cookie).await;

    // the superseded channel is closed by the server
    assert!(next_frame(&mut first).await.is_none());

    relay
        .mount_device(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "currentTemperature": 18, "currentHumidity": 60 })),
        )
        .await;
    let resp = relay.get("/api/get-data", Some(&cookie)).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let frame = next_frame(&mut second).await.expect("device state frame");
    assert_eq!(frame["type"], "deviceState");

    let health: Value = relay.get("/health", None).await.json().await.unwrap();
    assert_eq!(health["connections"], 1);
}

#[tokio::test]
async fn test_unauthenticated_and_unregistered_requests() {
    let relay = Relay::start().await;

    let resp = relay.get("/api/get-data", None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = relay.get("/ws", None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // authenticated, but no push channel ever opened
    let cookie = relay.login().await;
    let resp = relay.get("/api/get-data", Some(&cookie)).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "NoRecipient");
}

#[tokio::test]
async fn test_callback_state_mismatch_establishes_no_token() {
    let relay = Relay::start().await;

    let resp = relay.get("/login", None).await;
    let cookie = resp.headers()[SET_COOKIE]
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let resp = relay
        .get("/callback?code=X&state=not-the-state", Some(&cookie))
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let status: Value = relay
        .get("/api/status", Some(&cookie))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(status["authenticated"], false);
}
