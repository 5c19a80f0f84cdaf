use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit};

use super::events::{joined_notice, left_notice, Frame, RelayMessage, UserInfo};
use super::room::Room;
use super::session::Session;
use crate::error::{AppError, MailboxError};

pub const WRONG_PASSWORD: &str = "Incorrect room password";

/// Work items consumed one at a time by the hub task.
#[derive(Debug)]
pub enum HubEvent {
    Register(Arc<Session>),
    Unregister(Arc<Session>),
    /// The permit, if any, is released once the hub has handled the message.
    Route(RelayMessage, Option<OwnedSemaphorePermit>),
    Snapshot(oneshot::Sender<Vec<RoomSummary>>),
}

/// Point-in-time view of one room, safe to hand to HTTP clients.
///
/// `members` is left empty for protected rooms; only the count is public.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub id: String,
    pub protected: bool,
    pub created_at: DateTime<Utc>,
    pub member_count: usize,
    pub members: Vec<UserInfo>,
}

type Directory = Arc<DashMap<String, Arc<Room>>>;

/// The single coordinator of room lifecycle and message routing.
///
/// All directory mutation happens inside [`Hub::run`], which handles one
/// [`HubEvent`] at a time. Everything else talks to it through a
/// [`HubHandle`].
pub struct Hub {
    rooms: Directory,
    rx: mpsc::UnboundedReceiver<HubEvent>,
}

/// Cheap, cloneable front door to a running [`Hub`].
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubEvent>,
    rooms: Directory,
}

impl Hub {
    pub fn new() -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let rooms: Directory = Arc::new(DashMap::new());
        (
            Self {
                rooms: Arc::clone(&rooms),
                rx,
            },
            HubHandle { tx, rooms },
        )
    }

    /// Start the hub on its own task and return a handle to it.
    pub fn spawn() -> HubHandle {
        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());
        handle
    }

    /// Process events until every handle has been dropped.
    pub async fn run(mut self) {
        tracing::debug!("hub started");
        while let Some(event) = self.rx.recv().await {
            self.handle(event).await;
        }
        tracing::debug!("hub stopped");
    }

    #[cfg(test)]
    pub(crate) async fn next_event(&mut self) -> Option<HubEvent> {
        self.rx.recv().await
    }

    async fn handle(&self, event: HubEvent) {
        match event {
            HubEvent::Register(session) => self.register(session).await,
            HubEvent::Unregister(session) => self.unregister(session).await,
            HubEvent::Route(message, _permit) => self.route(message).await,
            HubEvent::Snapshot(reply) => {
                let _ = reply.send(self.snapshot().await);
            }
        }
    }

    // Clone the Arc out so no shard lock is held across an await.
    fn room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|r| Arc::clone(r.value()))
    }

    async fn register(&self, session: Arc<Session>) {
        let room = match self.room(&session.room_id) {
            Some(room) => {
                if !room.accepts(session.secret.as_deref()) {
                    reject(&session, WRONG_PASSWORD);
                    return;
                }
                room
            }
            None => {
                let room = Arc::new(Room::new(&session.room_id, session.secret.clone()));
                self.rooms
                    .insert(session.room_id.clone(), Arc::clone(&room));
                tracing::info!(
                    room_id = %room.id,
                    protected = room.is_protected(),
                    "room created"
                );
                room
            }
        };

        room.join(Arc::clone(&session)).await;
        tracing::info!(
            session_id = %session.id,
            username = %session.username,
            room_id = %room.id,
            "user joined"
        );

        // A lone joiner only needs the roster.
        if room.len().await > 1 {
            let notice = RelayMessage::system(
                &room.id,
                &session.username,
                joined_notice(&session.username),
            );
            broadcast(&room, &notice).await;
        }
        broadcast_roster(&room).await;
    }

    async fn unregister(&self, session: Arc<Session>) {
        session.mailbox.close();

        let Some(room) = self.room(&session.room_id) else {
            tracing::trace!(session_id = %session.id, "unregister: room already gone");
            return;
        };
        if room.leave(&session.id).await.is_none() {
            tracing::trace!(session_id = %session.id, "unregister: not a member");
            return;
        }
        tracing::info!(
            session_id = %session.id,
            username = %session.username,
            room_id = %room.id,
            connected_secs = session.connected_secs(),
            "user left"
        );

        if room.is_empty().await {
            self.rooms.remove(&room.id);
            tracing::info!(room_id = %room.id, "room removed");
            return;
        }

        let notice = RelayMessage::system(
            &room.id,
            &session.username,
            left_notice(&session.username),
        );
        broadcast(&room, &notice).await;
        broadcast_roster(&room).await;
    }

    async fn route(&self, message: RelayMessage) {
        let Some(room) = self.room(&message.room_id) else {
            tracing::debug!(
                room_id = %message.room_id,
                from = %message.from,
                "route: room not found, dropping"
            );
            return;
        };

        // Client-originated broadcast is not part of the protocol.
        if !message.is_directed() {
            tracing::trace!(from = %message.from, kind = %message.kind, "route: undirected, ignored");
            return;
        }

        let Some(frame) = encode(&message) else {
            return;
        };
        match room.send_to(&message.to, frame).await {
            None => {
                tracing::debug!(
                    room_id = %room.id,
                    from = %message.from,
                    to = %message.to,
                    "route: recipient not in room, dropping"
                );
            }
            Some(Ok(())) => {}
            Some(Err(MailboxError::Full)) => {
                tracing::warn!(
                    from = %message.from,
                    to = %message.to,
                    kind = %message.kind,
                    "failed to deliver: mailbox full"
                );
            }
            Some(Err(MailboxError::Closed)) => {
                tracing::debug!(to = %message.to, "failed to deliver: recipient closing");
            }
        }
    }

    async fn snapshot(&self) -> Vec<RoomSummary> {
        let rooms: Vec<Arc<Room>> = self.rooms.iter().map(|r| Arc::clone(r.value())).collect();
        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms {
            let mut members = room.roster().await;
            let member_count = members.len();
            if room.is_protected() {
                members.clear();
            }
            members.sort_by(|a, b| a.username.cmp(&b.username).then(a.id.cmp(&b.id)));
            summaries.push(RoomSummary {
                id: room.id.clone(),
                protected: room.is_protected(),
                created_at: room.created_at,
                member_count,
                members,
            });
        }
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }
}

impl HubHandle {
    fn submit(&self, event: HubEvent) {
        if self.tx.send(event).is_err() {
            tracing::error!("hub is not running, event dropped");
        }
    }

    pub fn register(&self, session: Arc<Session>) {
        self.submit(HubEvent::Register(session));
    }

    pub fn unregister(&self, session: Arc<Session>) {
        self.submit(HubEvent::Unregister(session));
    }

    pub fn route(&self, message: RelayMessage) {
        self.submit(HubEvent::Route(message, None));
    }

    /// Route while holding `permit` until the hub has handled the message,
    /// so a sender can bound how much of its traffic is queued.
    pub fn route_paced(&self, message: RelayMessage, permit: OwnedSemaphorePermit) {
        self.submit(HubEvent::Route(message, Some(permit)));
    }

    /// Consistent view of the directory, ordered after every event
    /// submitted before it.
    pub async fn snapshot(&self) -> Result<Vec<RoomSummary>, AppError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubEvent::Snapshot(reply))
            .map_err(|_| AppError::ServiceUnavailable("hub is not running".to_string()))?;
        rx.await
            .map_err(|_| AppError::ServiceUnavailable("hub is not running".to_string()))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn has_room(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Sorted IDs of live rooms, read without ordering against pending events.
    pub fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rooms.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }
}

fn encode(message: &RelayMessage) -> Option<Frame> {
    match message.encode() {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::error!(kind = %message.kind, error = %e, "failed to encode message");
            None
        }
    }
}

async fn broadcast(room: &Room, message: &RelayMessage) {
    if let Some(frame) = encode(message) {
        let delivered = room.broadcast(&frame).await;
        tracing::trace!(room_id = %room.id, kind = %message.kind, delivered, "broadcast");
    }
}

async fn broadcast_roster(room: &Room) {
    let users = room.roster().await;
    broadcast(room, &RelayMessage::user_list(&room.id, users)).await;
}

fn reject(session: &Session, reason: &str) {
    tracing::warn!(
        session_id = %session.id,
        room_id = %session.room_id,
        reason,
        "join refused"
    );
    if let Some(frame) = encode(&RelayMessage::error(reason)) {
        let _ = session.deliver(frame);
    }
    session.mailbox.close();
}
