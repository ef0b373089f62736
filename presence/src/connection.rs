use log::*;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

// Type alias for user IDs (handed over opaquely by the session layer)
pub type UserId = String;

/// Client-declared identity of one browser tab
pub type SessionId = String;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Attributes a client supplies when opening a connection.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub user_id: Option<UserId>,
    pub session_id: Option<SessionId>,
}

impl Handshake {
    pub fn new(user_id: impl Into<UserId>, session_id: Option<SessionId>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            session_id,
        }
    }

    /// A connection without a user identity still receives broadcasts but is
    /// never attributed to anyone. Blank identities count as absent.
    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref().filter(|id| !id.is_empty())
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref().filter(|id| !id.is_empty())
    }
}

/// Bookkeeping kept for a registered connection (no redundant connection_id)
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub user_id: UserId,
    pub session_id: Option<SessionId>,
}

/// Live mapping of users to their open connections.
///
/// The three indices are only ever mutated together, so a connection id is
/// either present in all of the places it belongs or in none of them.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Primary storage: lookup by connection_id for registration/cleanup
    connections: HashMap<ConnectionId, ConnectionInfo>,

    /// Secondary index: user -> connections in registration order. Users with
    /// no connections are removed rather than kept with an empty list.
    user_index: BTreeMap<UserId, Vec<ConnectionId>>,

    /// Informational index: session -> most recent connection declaring it
    session_index: HashMap<SessionId, ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute `connection_id` to `user_id`.
    ///
    /// Returns `false` (and changes nothing) when the connection is already
    /// registered, so an id can never appear twice or under two users.
    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        user_id: UserId,
        session_id: Option<SessionId>,
    ) -> bool {
        if let Some(existing) = self.connections.get(&connection_id) {
            warn!(
                "Connection {} is already registered to user {}, ignoring registration for {}",
                connection_id, existing.user_id, user_id
            );
            return false;
        }

        if let Some(session_id) = &session_id {
            self.session_index
                .insert(session_id.clone(), connection_id.clone());
        }

        self.user_index
            .entry(user_id.clone())
            .or_default()
            .push(connection_id.clone());

        self.connections.insert(
            connection_id,
            ConnectionInfo {
                user_id,
                session_id,
            },
        );

        true
    }

    /// Remove a connection, returning what was known about it.
    pub fn deregister(&mut self, connection_id: &ConnectionId) -> Option<ConnectionInfo> {
        let info = self.connections.remove(connection_id)?;

        self.remove_from_user_index(&info.user_id, connection_id);

        if let Some(session_id) = &info.session_id {
            self.release_session(session_id, connection_id);
        }

        Some(info)
    }

    /// Connections currently attributed to `user_id`, oldest first.
    pub fn connections_for_user(&self, user_id: &str) -> Vec<ConnectionId> {
        self.user_index.get(user_id).cloned().unwrap_or_default()
    }

    /// First live connection of `user_id`. Which one is arbitrary when the
    /// user has several.
    pub fn primary_connection_for_user(&self, user_id: &str) -> Option<ConnectionId> {
        self.user_index
            .get(user_id)
            .and_then(|connections| connections.first().cloned())
    }

    pub fn connection_for_session(&self, session_id: &str) -> Option<ConnectionId> {
        self.session_index.get(session_id).cloned()
    }

    pub fn user_for_connection(&self, connection_id: &ConnectionId) -> Option<&UserId> {
        self.connections.get(connection_id).map(|info| &info.user_id)
    }

    /// Users with at least one open connection, sorted.
    pub fn present_users(&self) -> Vec<UserId> {
        self.user_index.keys().cloned().collect()
    }

    pub fn is_present(&self, user_id: &str) -> bool {
        self.user_index.contains_key(user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Drop every registered connection missing from `live`.
    ///
    /// Returns whether anything was removed; a second call with the same set
    /// is a no-op.
    pub fn reconcile(&mut self, live: &HashSet<ConnectionId>) -> bool {
        let stale: Vec<ConnectionId> = self
            .connections
            .keys()
            .filter(|connection_id| !live.contains(*connection_id))
            .cloned()
            .collect();

        for connection_id in &stale {
            if let Some(info) = self.deregister(connection_id) {
                warn!(
                    "Pruned stale connection {} of user {}",
                    connection_id, info.user_id
                );
            }
        }

        !stale.is_empty()
    }

    fn remove_from_user_index(&mut self, user_id: &str, connection_id: &ConnectionId) {
        let now_empty = match self.user_index.get_mut(user_id) {
            Some(connections) => {
                connections.retain(|id| id != connection_id);
                connections.is_empty()
            }
            None => false,
        };

        // Clean up empty user entries
        if now_empty {
            self.user_index.remove(user_id);
        }
    }

    // A session that has since been claimed by a newer connection keeps its mapping.
    fn release_session(&mut self, session_id: &str, connection_id: &ConnectionId) {
        if self.session_index.get(session_id) == Some(connection_id) {
            self.session_index.remove(session_id);
        }
    }
}
