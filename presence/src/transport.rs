use crate::connection::ConnectionId;
use crate::error::{Error, TransportErrorKind};
use dashmap::DashMap;
use std::collections::HashSet;
use tokio::sync::mpsc::UnboundedSender;

/// The socket layer as seen by the presence engine.
///
/// The transport is the ground truth for which connections are open. Both
/// methods must be synchronous so that the engine can read them in the middle
/// of a registry update without yielding.
pub trait Transport: Send + Sync {
    /// Push an encoded frame to one connection.
    fn send(&self, connection_id: &ConnectionId, frame: &str) -> Result<(), Error>;

    /// Snapshot of every connection currently open, registered or not.
    fn open_connection_ids(&self) -> HashSet<ConnectionId>;
}

/// Transport backed by one unbounded channel per connection.
///
/// Each socket task owns the receiving half and writes whatever arrives to
/// its websocket. A connection whose receiver has been dropped is no longer
/// reported as open, even if its socket task never got to detach it.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    senders: DashMap<ConnectionId, UnboundedSender<String>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self {
            senders: DashMap::new(),
        }
    }

    pub fn attach(&self, connection_id: ConnectionId, sender: UnboundedSender<String>) {
        self.senders.insert(connection_id, sender);
    }

    /// Returns `false` if the connection was not attached.
    pub fn detach(&self, connection_id: &ConnectionId) -> bool {
        self.senders.remove(connection_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

impl Transport for ChannelTransport {
    fn send(&self, connection_id: &ConnectionId, frame: &str) -> Result<(), Error> {
        let sender = self
            .senders
            .get(connection_id)
            .ok_or_else(|| Error::transport(TransportErrorKind::UnknownConnection))?;

        sender.send(frame.to_owned()).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: crate::error::ErrorKind::Transport(TransportErrorKind::ConnectionClosed),
        })
    }

    fn open_connection_ids(&self) -> HashSet<ConnectionId> {
        self.senders
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| entry.key().clone())
            .collect()
    }
}
