#![allow(dead_code)]

use futures_util::StreamExt;
use relayhub::config::Config;
use relayhub::gateway::hub::{Hub, HubHandle, RoomSummary};
use relayhub::routes;
use relayhub::state::AppState;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Test server with its own hub. Each instance is isolated, safe for
/// parallel tests.
pub struct TestServer {
    pub state: AppState,
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            state: AppState::new(Hub::spawn(), config),
        }
    }

    pub fn hub(&self) -> &HubHandle {
        &self.state.hub
    }

    /// Returns an Axum Router wired to this server's state for `oneshot()` calls.
    pub fn router(&self) -> axum::Router {
        routes::router(self.state.clone())
    }

    /// Binds a TCP listener on port 0, spawns the server, and returns the ws base URL.
    pub async fn spawn(&self) -> String {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("ws://127.0.0.1:{}", addr.port())
    }

    /// Poll the hub until `check` accepts its snapshot, or panic after 5s.
    pub async fn wait_for<F>(&self, what: &str, check: F) -> Vec<RoomSummary>
    where
        F: Fn(&[RoomSummary]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let snapshot = self.hub().snapshot().await.unwrap();
            if check(&snapshot) {
                return snapshot;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {what}; last snapshot: {snapshot:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn ws_url(base: &str, username: &str, room: &str, password: Option<&str>) -> String {
    match password {
        Some(pw) => format!("{base}/ws?username={username}&room={room}&password={pw}"),
        None => format!("{base}/ws?username={username}&room={room}"),
    }
}

/// Connect and consume the `connected` frame. Returns the client and its ID.
pub async fn join(base: &str, username: &str, room: &str) -> (Client, String) {
    join_with_password(base, username, room, None).await
}

pub async fn join_with_password(
    base: &str,
    username: &str,
    room: &str,
    password: Option<&str>,
) -> (Client, String) {
    let (mut ws, _) = connect_async(ws_url(base, username, room, password))
        .await
        .unwrap();
    let connected = next_json(&mut ws).await;
    assert_eq!(connected["type"], "connected");
    let id = connected["from"].as_str().unwrap().to_string();
    (ws, id)
}

/// Next text frame as JSON, skipping control frames. Panics after 5s.
pub async fn next_json(ws: &mut Client) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = ws.next().await.unwrap().unwrap();
            if msg.is_text() {
                let text = msg.into_text().unwrap();
                return serde_json::from_str(&text).unwrap();
            }
        }
    })
    .await
    .expect("timed out waiting for a text frame")
}

/// True if no text frame arrives within `wait`.
pub async fn stays_quiet(ws: &mut Client, wait: Duration) -> bool {
    let result = tokio::time::timeout(wait, async {
        loop {
            match ws.next().await {
                Some(Ok(msg)) if msg.is_text() => return,
                Some(Ok(_)) => continue,
                _ => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    result.is_err()
}

/// Sorted IDs from a `user-list` frame.
pub fn roster_ids(msg: &serde_json::Value) -> Vec<String> {
    let mut ids: Vec<String> = msg["users"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["id"].as_str().unwrap().to_string())
        .collect();
    ids.sort();
    ids
}

pub fn sorted(ids: &[&str]) -> Vec<String> {
    let mut v: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
    v.sort();
    v
}
