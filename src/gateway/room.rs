use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::events::{Frame, UserInfo};
use super::session::Session;
use crate::error::MailboxError;

/// A named group of sessions sharing presence and routing scope.
///
/// Membership sits behind the room's own lock, so two rooms never contend.
#[derive(Debug)]
pub struct Room {
    pub id: String,
    /// Digest of the creator's password. `None` admits anyone.
    secret: Option<String>,
    pub created_at: DateTime<Utc>,
    members: RwLock<HashMap<String, Arc<Session>>>,
}

impl Room {
    pub fn new(id: &str, secret: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            secret,
            created_at: Utc::now(),
            members: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_protected(&self) -> bool {
        self.secret.is_some()
    }

    pub fn accepts(&self, secret: Option<&str>) -> bool {
        match &self.secret {
            Some(expected) => secret == Some(expected.as_str()),
            None => true,
        }
    }

    pub async fn join(&self, session: Arc<Session>) {
        self.members
            .write()
            .await
            .insert(session.id.clone(), session);
    }

    /// Remove a member. Returns `None` if it was not present.
    pub async fn leave(&self, session_id: &str) -> Option<Arc<Session>> {
        self.members.write().await.remove(session_id)
    }

    /// Offer `frame` to one member. `None` if no such member is in the room.
    pub async fn send_to(
        &self,
        session_id: &str,
        frame: Frame,
    ) -> Option<Result<(), MailboxError>> {
        let members = self.members.read().await;
        members.get(session_id).map(|s| s.deliver(frame))
    }

    /// Offer `frame` to every member without waiting on any of them.
    /// Returns how many mailboxes accepted it; full or closed ones are skipped.
    pub async fn broadcast(&self, frame: &Frame) -> usize {
        let members = self.members.read().await;
        let mut delivered = 0;
        for session in members.values() {
            match session.deliver(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(
                        room_id = %self.id,
                        session_id = %session.id,
                        error = %e,
                        "dropped broadcast frame"
                    );
                }
            }
        }
        delivered
    }

    pub async fn roster(&self) -> Vec<UserInfo> {
        self.members
            .read()
            .await
            .values()
            .map(|s| s.info())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }
}
