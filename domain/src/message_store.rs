//! Storage collaborators consumed by the message flow.
//!
//! Durable storage engines live outside this workspace; they plug in by
//! implementing these traits. The in-memory implementations back the server
//! binary and the tests.

use crate::error::{EntityErrorKind, Error};
use crate::messages::{Model, NewMessage};
use crate::Id;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message, assigning its id and timestamps.
    async fn save(&self, new_message: NewMessage) -> Result<Model, Error>;

    async fn find_by_id(&self, id: Id) -> Result<Model, Error>;

    /// Every message exchanged between the two users, in either direction,
    /// oldest first.
    async fn find_conversation(&self, user_id: &str, other_user_id: &str)
        -> Result<Vec<Model>, Error>;
}

/// Turns an image the client sent into a stable reference that can be
/// stored with the message.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn upload(&self, image: &str) -> Result<String, Error>;
}

#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<Vec<Model>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn save(&self, new_message: NewMessage) -> Result<Model, Error> {
        let now = Utc::now();
        let model = Model {
            id: Id::new_v4(),
            sender_id: new_message.sender_id,
            receiver_id: new_message.receiver_id,
            text: new_message.text,
            image: new_message.image,
            created_at: now,
            updated_at: now,
        };

        self.messages.write().await.push(model.clone());
        Ok(model)
    }

    async fn find_by_id(&self, id: Id) -> Result<Model, Error> {
        self.messages
            .read()
            .await
            .iter()
            .find(|message| message.id == id)
            .cloned()
            .ok_or_else(Error::not_found)
    }

    async fn find_conversation(
        &self,
        user_id: &str,
        other_user_id: &str,
    ) -> Result<Vec<Model>, Error> {
        let messages = self.messages.read().await;
        // Stored in insertion order, which is creation order.
        Ok(messages
            .iter()
            .filter(|message| message.is_between(user_id, other_user_id))
            .cloned()
            .collect())
    }
}

/// Accepts images that are already addressable (data URLs or http(s) URLs)
/// and stores the reference as is.
#[derive(Debug, Default)]
pub struct InlineImageStore;

#[async_trait]
impl ImageStore for InlineImageStore {
    async fn upload(&self, image: &str) -> Result<String, Error> {
        let image = image.trim();
        let addressable = image.starts_with("data:image/")
            || image.starts_with("https://")
            || image.starts_with("http://");

        if addressable {
            Ok(image.to_string())
        } else {
            Err(Error::entity(EntityErrorKind::Invalid))
        }
    }
}
