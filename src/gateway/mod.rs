pub mod events;
pub mod heartbeat;
pub mod hub;
pub mod room;
pub mod session;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

use crate::error::AppError;
use crate::state::AppState;
use events::{kind, Frame, RelayMessage};
use heartbeat::{HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT};
use hub::HubHandle;
use session::Session;

/// Routed messages one client may have queued at the hub before its inbound
/// loop stops reading.
pub const MAX_PENDING_ROUTES: usize = 64;

/// Query parameters of the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub username: Option<String>,
    pub room: Option<String>,
    pub password: Option<String>,
}

/// Validated identity a session is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub room: String,
    pub password: Option<String>,
}

impl ConnectParams {
    pub fn validate(self, max_username_len: usize) -> Result<Identity, AppError> {
        let username = self
            .username
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AppError::BadRequest("username is required".to_string()))?;
        if username.chars().count() > max_username_len {
            return Err(AppError::BadRequest(format!(
                "username must be at most {max_username_len} characters"
            )));
        }
        let room = self
            .room
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| AppError::BadRequest("room is required".to_string()))?;
        let password = self
            .password
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        Ok(Identity {
            username,
            room,
            password,
        })
    }
}

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let identity = params.validate(state.config.max_username_len)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, identity, state)))
}

async fn handle_socket(socket: WebSocket, identity: Identity, state: AppState) {
    let (session, mailbox_rx) = Session::new(
        &identity.username,
        &identity.room,
        identity.password.as_deref(),
        state.config.mailbox_capacity,
    );
    let session = Arc::new(session);
    let (mut ws_sink, ws_stream) = socket.split();

    // The client learns its ID before any presence traffic can reach it.
    let connected = match RelayMessage::connected(&session.id).encode() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode connected message");
            return;
        }
    };
    if ws_sink.send(Message::Text(connected)).await.is_err() {
        tracing::debug!(session_id = %session.id, "client gone before registration");
        return;
    }

    tracing::debug!(
        session_id = %session.id,
        username = %session.username,
        room_id = %session.room_id,
        "websocket connected"
    );
    state.hub.register(Arc::clone(&session));

    let mut send_task = tokio::spawn(write_loop(ws_sink, mailbox_rx, session.id.clone()));
    let mut recv_task = tokio::spawn(read_loop(
        ws_stream,
        Arc::clone(&session),
        state.hub.clone(),
    ));

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    // Safe to repeat: the hub ignores sessions it no longer holds.
    state.hub.unregister(Arc::clone(&session));
    tracing::debug!(session_id = %session.id, "websocket disconnected");
}

/// Drain the mailbox onto the wire, pinging on a fixed interval. Ends on a
/// write failure or once the hub closes the mailbox.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Frame>,
    session_id: String,
) {
    let mut ping = tokio::time::interval(HEARTBEAT_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                };
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    tracing::debug!(session_id = %session_id, error = %e, "websocket write failed");
                    return;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    tracing::debug!(session_id = %session_id, "websocket ping failed");
                    return;
                }
            }
        }
    }
}

async fn read_loop<S>(mut stream: S, session: Arc<Session>, hub: HubHandle)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let credit = Arc::new(Semaphore::new(MAX_PENDING_ROUTES));
    loop {
        let next = match tokio::time::timeout(HEARTBEAT_TIMEOUT, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                tracing::debug!(session_id = %session.id, "websocket idle timeout");
                return;
            }
        };

        let decoded = match next {
            Some(Ok(Message::Text(text))) => prepare_inbound(&session, text.as_str()),
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => prepare_inbound(&session, text),
                Err(e) => {
                    tracing::debug!(session_id = %session.id, error = %e, "non-utf8 binary frame");
                    return;
                }
            },
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return,
            Some(Err(e)) => {
                tracing::debug!(session_id = %session.id, error = %e, "websocket receive error");
                return;
            }
        };

        match decoded {
            Ok(Some(message)) => {
                // Never closed, so this only waits for the hub to catch up.
                let Ok(permit) = Arc::clone(&credit).acquire_owned().await else {
                    return;
                };
                hub.route_paced(message, permit);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(session_id = %session.id, error = %e, "invalid client message");
                return;
            }
        }
    }
}

/// Decode one client frame and stamp it with the session's identity.
///
/// `Ok(None)` means the frame was valid but is not routable: clients may not
/// impersonate server message kinds.
pub fn prepare_inbound(
    session: &Session,
    text: &str,
) -> Result<Option<RelayMessage>, serde_json::Error> {
    let mut message = RelayMessage::decode(text)?;
    if kind::is_reserved(&message.kind) {
        tracing::debug!(
            session_id = %session.id,
            kind = %message.kind,
            "ignoring reserved message kind from client"
        );
        return Ok(None);
    }
    message.from = session.id.clone();
    message.room_id = session.room_id.clone();
    message.username = session.username.clone();
    Ok(Some(message))
}
