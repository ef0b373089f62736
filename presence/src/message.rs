use crate::connection::UserId;
use crate::error::Error;
use serde::Serialize;
use serde_json::Value;

/// Trait for getting the wire event name
pub trait EventType {
    fn event_type(&self) -> &'static str;
}

/// Events pushed from the server to connected clients.
///
/// Encoded as `{"type": <event name>, "data": <payload>}` text frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// Everyone sees the same global list of present users.
    #[serde(rename = "getOnlineUsers")]
    OnlineUsers(Vec<UserId>),

    /// A persisted message for the receiving user.
    #[serde(rename = "newMessage")]
    NewMessage(Value),
}

impl EventType for Event {
    fn event_type(&self) -> &'static str {
        match self {
            Event::OnlineUsers(_) => "getOnlineUsers",
            Event::NewMessage(_) => "newMessage",
        }
    }
}

impl Event {
    /// Encode once so a fanout can reuse the same frame for every connection.
    pub fn to_frame(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}
