use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::ws::rooms::Outbound;

/// Last time the peer proved it was alive.
#[derive(Debug)]
pub struct Liveness {
    last_seen: Mutex<Instant>,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
        }
    }

    pub fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    pub fn silent_for(&self) -> Duration {
        self.last_seen.lock().unwrap_or_else(|p| p.into_inner()).elapsed()
    }

    /// Strictly longer than `timeout` since the last signal.
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.silent_for() > timeout
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-connection state shared by the read loop and the message handlers.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub doc_id: String,
    /// Claimed, never verified. Taken from the first message that carries one.
    pub user_id: Option<String>,
    pub queue: mpsc::Sender<Outbound>,
    pub liveness: Arc<Liveness>,
}

impl Session {
    /// New session plus the receiving end of its outbound queue.
    pub fn new(doc_id: &str, queue_capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (queue, rx) = mpsc::channel(queue_capacity.max(1));
        let session = Self {
            id: Uuid::new_v4(),
            doc_id: doc_id.to_string(),
            user_id: None,
            queue,
            liveness: Arc::new(Liveness::new()),
        };
        (session, rx)
    }

    pub fn claim_user(&mut self, user_id: &str) {
        if self.user_id.is_none() && !user_id.is_empty() {
            self.user_id = Some(user_id.to_string());
        }
    }

    pub fn user_label(&self) -> &str {
        self.user_id.as_deref().unwrap_or("anonymous")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_liveness_expiry_is_strict() {
        let liveness = Liveness::new();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!liveness.is_expired(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(liveness.is_expired(Duration::from_secs(60)));

        liveness.touch();
        assert!(!liveness.is_expired(Duration::from_secs(60)));
    }

    #[test]
    fn test_first_claimed_user_sticks() {
        let (mut session, _rx) = Session::new("doc", 4);
        assert_eq!(session.user_label(), "anonymous");

        session.claim_user("");
        assert!(session.user_id.is_none());

        session.claim_user("u1");
        session.claim_user("u2");
        assert_eq!(session.user_id.as_deref(), Some("u1"));
    }
}
