use tracing::{debug, warn};

use super::dispatch::{publish_event, Outcome};
use super::session::Session;
use crate::models::EventMessage;
use crate::AppState;

/// Presence events carry no preconditions.
pub async fn handle_presence_message(state: &AppState, session: &Session, msg: &EventMessage, raw: &str) -> Outcome {
    debug!("👀 Presence update on doc {}: {} joined={}", session.doc_id, msg.user_id, msg.joined);
    publish_event(state, session, raw, "presence").await
}

/// Cursor events must name their user.
pub async fn handle_cursor_message(state: &AppState, session: &Session, msg: &EventMessage, raw: &str) -> Outcome {
    if msg.user_id.is_empty() {
        warn!("⚠️ Missing userID in cursor message on doc {}", session.doc_id);
        return Outcome::Dropped("cursor without userID");
    }
    debug!("🖱️ Cursor update from user {} at position {}", msg.user_id, msg.position);
    publish_event(state, session, raw, "cursor").await
}
