use tracing::{debug, warn};

use super::dispatch::{publish_event, Outcome};
use super::session::Session;
use crate::models::EventMessage;
use crate::AppState;

/// Handle an edit: cache the content, make sure the document is being
/// persisted, then publish the original text.
pub async fn handle_edit_message(state: &AppState, session: &Session, msg: &EventMessage, raw: &str) -> Outcome {
    if msg.user_id.is_empty() || msg.content.is_empty() {
        warn!("⚠️ Missing userID/content in edit message on doc {}", session.doc_id);
        return Outcome::Dropped("edit without userID or content");
    }

    debug!("💾 Updating in-memory doc {} with content: {:.30}", session.doc_id, msg.content);
    state.cache.update(&session.doc_id, &msg.content).await;
    state.persistence.ensure_started(&session.doc_id);

    publish_event(state, session, raw, "edit").await
}
