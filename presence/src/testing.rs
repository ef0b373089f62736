//! In-memory transport double used by the crate's tests.

use crate::connection::ConnectionId;
use crate::error::{Error, TransportErrorKind};
use crate::transport::Transport;
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Default)]
pub(crate) struct RecordingTransport {
    open: Mutex<HashSet<ConnectionId>>,
    failing: Mutex<HashSet<ConnectionId>>,
    sent: Mutex<Vec<(ConnectionId, String)>>,
}

impl RecordingTransport {
    pub(crate) fn with_open(ids: &[&str]) -> Self {
        let transport = Self::default();
        for id in ids {
            transport.open(id);
        }
        transport
    }

    pub(crate) fn open(&self, id: &str) {
        self.open.lock().unwrap().insert(ConnectionId::from(id));
    }

    /// Simulates a socket that vanished without a close event.
    pub(crate) fn drop_silently(&self, id: &str) {
        self.open.lock().unwrap().remove(&ConnectionId::from(id));
    }

    pub(crate) fn fail_sends_to(&self, id: &str) {
        self.failing.lock().unwrap().insert(ConnectionId::from(id));
    }

    pub(crate) fn sent(&self) -> Vec<(ConnectionId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn sent_to(&self) -> Vec<ConnectionId> {
        self.sent().into_iter().map(|(id, _)| id).collect()
    }

    /// Frames that carried the given event name.
    pub(crate) fn frames_of_type(&self, event_type: &str) -> Vec<serde_json::Value> {
        self.sent()
            .into_iter()
            .filter_map(|(_, frame)| serde_json::from_str::<serde_json::Value>(&frame).ok())
            .filter(|value| value["type"] == event_type)
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Transport for RecordingTransport {
    fn send(&self, connection_id: &ConnectionId, frame: &str) -> Result<(), Error> {
        if self.failing.lock().unwrap().contains(connection_id) {
            return Err(Error::transport(TransportErrorKind::ConnectionClosed));
        }
        if !self.open.lock().unwrap().contains(connection_id) {
            return Err(Error::transport(TransportErrorKind::UnknownConnection));
        }
        self.sent
            .lock()
            .unwrap()
            .push((connection_id.clone(), frame.to_string()));
        Ok(())
    }

    fn open_connection_ids(&self) -> HashSet<ConnectionId> {
        self.open.lock().unwrap().clone()
    }
}
