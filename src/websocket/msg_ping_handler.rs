use std::sync::Arc;
use tracing::{debug, warn};

use super::dispatch::Outcome;
use super::session::Session;
use crate::models::PongMessage;

/// Handle an application-level ping: refresh liveness and queue a pong.
pub fn handle_ping_message(session: &Session) -> Outcome {
    session.liveness.touch();
    debug!("Ping received on doc {} from {}", session.doc_id, session.user_label());

    // The pong shares the outbound queue with broadcasts, so it is subject to
    // the same drop-on-full policy.
    if session.queue.try_send(Arc::from(PongMessage::JSON)).is_err() {
        warn!("Failed to queue pong for doc {}", session.doc_id);
    }
    Outcome::Ponged
}
