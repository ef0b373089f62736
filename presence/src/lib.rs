//! Realtime presence and message fanout.
//!
//! This crate tracks which users are online across any number of websocket
//! connections (one per browser tab) and pushes events to them.
//!
//! # Architecture
//!
//! - **Many connections per user**: every tab opens its own connection, and
//!   every connection of a user receives its own copy of each event.
//! - **Dual-index registry**: connections are indexed by id and by user, with
//!   an informational index from the client's tab session to its latest
//!   connection. Users with no connections are pruned, never kept empty.
//! - **Single serialization point**: the registry is owned by one actor task
//!   that applies commands from an unbounded queue in arrival order. Nothing
//!   else reads or writes it.
//! - **Transport as ground truth**: the socket layer reports which
//!   connections are really open. A periodic reconciliation pass prunes
//!   registrations whose close event was never observed.
//! - **Ephemeral delivery**: events are fire-and-forget. A user who is offline
//!   sees the persisted data on their next fetch.
//!
//! # Event Flow
//!
//! 1. A client opens `/ws?userId=..&sessionId=..`
//! 2. The web layer attaches the socket to the `ChannelTransport` and calls
//!    `Manager::connection_opened`
//! 3. The actor registers the connection and broadcasts `getOnlineUsers`
//! 4. When a message is persisted, the domain layer publishes `MessageCreated`
//! 5. `PresenceDomainEventHandler` calls `Manager::deliver_to_user`, which
//!    sends `newMessage` to each connection of the receiver
//! 6. On close the web layer detaches the socket and calls
//!    `Manager::connection_closed`, which broadcasts the new snapshot
//!
//! # Example: Starting the service
//!
//! ```rust,ignore
//! use presence::{ChannelTransport, PresenceService};
//!
//! let transport = Arc::new(ChannelTransport::new());
//! let service = PresenceService::start(transport.clone(), Duration::from_secs(30));
//! let manager = service.manager();
//! // ...
//! service.shutdown().await;
//! ```
//!
//! # Modules
//!
//! - `connection`: ConnectionRegistry and the id/handshake types
//! - `engine`: presence broadcast and per-user fanout
//! - `manager`: the actor, its handle and the reconciliation timer
//! - `message`: outbound event definitions
//! - `transport`: the socket-layer seam and its channel-backed implementation

pub mod connection;
pub mod domain_event_handler;
pub mod engine;
pub mod error;
pub mod manager;
pub mod message;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ConnectionId, Handshake, SessionId, UserId};
pub use domain_event_handler::PresenceDomainEventHandler;
pub use manager::{run_periodic_reconciliation, Manager, PresenceService, ReconciliationHandle};
pub use transport::{ChannelTransport, Transport};
