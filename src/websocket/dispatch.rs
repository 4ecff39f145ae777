use tracing::{debug, warn};

use super::msg_edit_handler::handle_edit_message;
use super::msg_ping_handler::handle_ping_message;
use super::msg_relay_handler::{handle_cursor_message, handle_presence_message};
use super::session::Session;
use crate::models::{EventKind, EventMessage};
use crate::AppState;

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Published,
    PublishFailed,
    Ponged,
    Dropped(&'static str),
}

/// Route one text message from a client. Invalid messages are logged and
/// dropped; nothing here ends the session.
pub async fn dispatch_message(state: &AppState, session: &mut Session, raw: &str) -> Outcome {
    let msg = match EventMessage::parse(raw) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("⚠️ Invalid message on doc {}: {}", session.doc_id, e);
            return Outcome::Dropped("malformed");
        }
    };
    session.claim_user(&msg.user_id);

    match msg.event_kind() {
        EventKind::Edit => handle_edit_message(state, session, &msg, raw).await,
        EventKind::Presence => handle_presence_message(state, session, &msg, raw).await,
        EventKind::Cursor => handle_cursor_message(state, session, &msg, raw).await,
        EventKind::Ping => handle_ping_message(session),
        EventKind::Unknown => {
            debug!("Ignoring message type {:?} on doc {}", msg.kind, session.doc_id);
            Outcome::Dropped("unknown type")
        }
    }
}

pub(super) async fn publish_event(state: &AppState, session: &Session, raw: &str, kind: &str) -> Outcome {
    if state.publish(&session.doc_id, raw).await {
        debug!("📤 Published {} from {} on doc {}", kind, session.user_label(), session.doc_id);
        Outcome::Published
    } else {
        Outcome::PublishFailed
    }
}
