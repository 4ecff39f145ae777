use serde::{Deserialize, Deserializer, Serialize};

/// Wire unit exchanged with clients and over the bus.
///
/// Unknown fields are ignored and missing optional fields take zero values.
/// Accepted messages are forwarded as the original text, never re-serialized.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "userID", default, deserialize_with = "null_as_zero")]
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub joined: bool,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub content: String,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub position: i64,
}

/// An explicit `null` reads the same as an absent field.
fn null_as_zero<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Edit,
    Presence,
    Cursor,
    Ping,
    Unknown,
}

impl EventMessage {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn event_kind(&self) -> EventKind {
        match self.kind.as_str() {
            "edit" => EventKind::Edit,
            "presence" => EventKind::Presence,
            "cursor" => EventKind::Cursor,
            "ping" => EventKind::Ping,
            _ => EventKind::Unknown,
        }
    }
}

/// Application-level reply to `{"type":"ping"}`.
#[derive(Serialize, Debug)]
pub struct PongMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl PongMessage {
    pub const JSON: &'static str = r#"{"type":"pong"}"#;
}
