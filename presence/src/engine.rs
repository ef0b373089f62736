//! Presence broadcast and per-user fanout over a registry and a transport.
//!
//! These functions never yield: the actor calls them while it holds the only
//! reference to the registry.

use crate::connection::ConnectionRegistry;
use crate::message::{Event, EventType};
use crate::transport::Transport;
use log::*;

/// Send the current presence snapshot to every open connection.
///
/// Returns how many connections were attempted. Failures are logged per
/// connection and do not stop the broadcast.
pub fn broadcast_presence(registry: &ConnectionRegistry, transport: &dyn Transport) -> usize {
    let event = Event::OnlineUsers(registry.present_users());
    let frame = match event.to_frame() {
        Ok(frame) => frame,
        Err(e) => {
            error!("Failed to serialize presence snapshot: {e}");
            return 0;
        }
    };

    let open = transport.open_connection_ids();
    for connection_id in &open {
        if let Err(e) = transport.send(connection_id, &frame) {
            warn!(
                "Failed to send presence snapshot to connection {}: {}",
                connection_id, e
            );
        }
    }

    trace!("Broadcast presence snapshot to {} connection(s)", open.len());
    open.len()
}

/// Send `event` once to each connection of `user_id`.
///
/// Returns the number of connections attempted, 0 when the user is offline.
/// Two tabs of the same user each get their own copy.
pub fn deliver_to_user(
    registry: &ConnectionRegistry,
    transport: &dyn Transport,
    user_id: &str,
    event: &Event,
) -> usize {
    let connection_ids = registry.connections_for_user(user_id);
    if connection_ids.is_empty() {
        debug!("No open connections for user {user_id}, skipping {}", event.event_type());
        return 0;
    }

    let frame = match event.to_frame() {
        Ok(frame) => frame,
        Err(e) => {
            error!("Failed to serialize {} event: {e}", event.event_type());
            return 0;
        }
    };

    for connection_id in &connection_ids {
        if let Err(e) = transport.send(connection_id, &frame) {
            warn!(
                "Failed to send {} to connection {}: {}. Connection will be cleaned up.",
                event.event_type(),
                connection_id,
                e
            );
        }
    }

    debug!(
        "Sent {} to {} connection(s) of user {}",
        event.event_type(),
        connection_ids.len(),
        user_id
    );
    connection_ids.len()
}
