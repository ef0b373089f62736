//! Event system infrastructure for the chat server.
//!
//! This crate provides the event system that decouples the message flow in the
//! domain layer from delivery concerns (like realtime websocket fanout).
//!
//! # Architecture
//!
//! - **DomainEvent**: Enum representing all business events in the system
//! - **EventHandler**: Trait for implementing event handlers
//! - **EventPublisher**: Publishes events to registered handlers
//!
//! This crate has no dependencies on internal crates (domain, presence, etc.),
//! avoiding circular dependencies. Record data is carried as serialized JSON values.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Server-assigned identifier of a persisted record.
pub type Id = Uuid;

/// Opaque user identity handed over by the credential/session layer.
pub type UserId = String;

/// Domain events that represent business-level changes in the system.
/// These events are emitted after the triggering operation has been durably stored.
///
/// Record data is carried as `serde_json::Value` to avoid dependencies on
/// the domain crate.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// Emitted when a direct message has been persisted.
    /// Triggers realtime delivery to every open connection of the receiver.
    MessageCreated {
        /// Id assigned by the message store.
        message_id: Id,
        sender_id: UserId,
        /// The user whose connections receive the message.
        receiver_id: UserId,
        /// Complete serialized message record (id, sender, receiver, text, image, timestamp).
        message: Value,
    },
}

/// Trait for handling domain events.
/// Implementations can perform side effects like sending notifications,
/// updating caches, logging, etc.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent);
}

/// Publishes domain events to registered handlers.
/// Handlers are called sequentially in registration order.
#[derive(Clone)]
pub struct EventPublisher {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
        }
    }

    /// Register a new event handler.
    /// Note: This creates a new publisher instance with the additional handler.
    /// Store the returned publisher in your application state.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let mut handlers = (*self.handlers).clone();
        handlers.push(handler);
        self.handlers = Arc::new(handlers);
        self
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Publish an event to all registered handlers.
    /// Handlers are called sequentially and are expected to log their own failures.
    pub async fn publish(&self, event: DomainEvent) {
        for handler in self.handlers.iter() {
            handler.handle(&event).await;
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
