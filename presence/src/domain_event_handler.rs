use crate::message::Event as PresenceEvent;
use crate::Manager;
use async_trait::async_trait;
use events::{DomainEvent, EventHandler};
use log::*;

/// Handles domain events by fanning them out to the open connections of the
/// affected users.
///
/// The domain layer has already persisted whatever the event describes, so
/// a user who is offline simply picks it up on their next fetch.
pub struct PresenceDomainEventHandler {
    manager: Manager,
}

impl PresenceDomainEventHandler {
    pub fn new(manager: Manager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl EventHandler for PresenceDomainEventHandler {
    async fn handle(&self, event: &DomainEvent) {
        match event {
            DomainEvent::MessageCreated {
                message_id,
                receiver_id,
                message,
                ..
            } => {
                debug!("Handling MessageCreated event for message {message_id}");

                match self
                    .manager
                    .deliver_to_user(receiver_id, PresenceEvent::NewMessage(message.clone()))
                    .await
                {
                    Ok(0) => debug!("No open connections for user {receiver_id}"),
                    Ok(count) => debug!(
                        "Message {message_id} sent to {count} connection(s) of user {receiver_id}"
                    ),
                    Err(e) => error!("Failed to deliver message {message_id}: {e}"),
                }
            }
        }
    }
}
