//! The persisted direct-message record.

use crate::{Id, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored direct message, serialized the way clients consume it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[serde(rename = "_id")]
    pub id: Id,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Reference returned by the image store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Whether this message was exchanged between the two users, in either direction.
    pub fn is_between(&self, user_id: &str, other_user_id: &str) -> bool {
        (self.sender_id == user_id && self.receiver_id == other_user_id)
            || (self.sender_id == other_user_id && self.receiver_id == user_id)
    }
}

/// A message that has been validated but not yet stored.
#[derive(Clone, Debug, PartialEq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: Option<String>,
    pub image: Option<String>,
}
