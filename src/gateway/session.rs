use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

use super::events::{Frame, UserInfo};
use crate::config::MAX_MAILBOX_CAPACITY;
use crate::error::MailboxError;

/// Bounded outbound queue for one session.
///
/// Any number of producers (the hub, room broadcasts) push with
/// [`Mailbox::try_send`]; the session's outbound loop is the only consumer.
/// Closing drops the sender so the consumer sees end-of-stream after
/// draining whatever was already queued.
#[derive(Debug)]
pub struct Mailbox {
    tx: Mutex<Option<mpsc::Sender<Frame>>>,
}

impl Mailbox {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.clamp(1, MAX_MAILBOX_CAPACITY));
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    pub fn try_send(&self, frame: Frame) -> Result<(), MailboxError> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(MailboxError::Closed)?;
        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MailboxError::Full,
            mpsc::error::TrySendError::Closed(_) => MailboxError::Closed,
        })
    }

    /// Idempotent.
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_closed(&self) -> bool {
        match self.tx.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }
}

/// One client's routing identity plus its outbound mailbox.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub username: String,
    pub room_id: String,
    /// SHA-256 of the password supplied at connect time, if any.
    pub secret: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub mailbox: Mailbox,
}

impl Session {
    /// Build a session with a fresh server-side ID. The receiver half of the
    /// mailbox goes to the outbound loop.
    pub fn new(
        username: &str,
        room_id: &str,
        password: Option<&str>,
        mailbox_capacity: usize,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (mailbox, rx) = Mailbox::new(mailbox_capacity);
        let session = Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            room_id: room_id.to_string(),
            secret: password.filter(|p| !p.is_empty()).map(hash_secret),
            joined_at: Utc::now(),
            mailbox,
        };
        (session, rx)
    }

    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id.clone(),
            username: self.username.clone(),
        }
    }

    pub fn deliver(&self, frame: Frame) -> Result<(), MailboxError> {
        self.mailbox.try_send(frame)
    }

    pub fn connected_secs(&self) -> i64 {
        (Utc::now() - self.joined_at).num_seconds()
    }
}

pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}
