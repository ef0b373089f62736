//! Business rules for direct messages.
//!
//! The domain layer validates input, persists through the storage
//! collaborators in `message_store`, and publishes domain events once the
//! data is durable. It never talks to connections directly; realtime
//! delivery happens in whichever `EventHandler`s the publisher carries.

pub use events::{Id, UserId};

pub mod error;
pub mod message;
pub mod message_store;
pub mod messages;
