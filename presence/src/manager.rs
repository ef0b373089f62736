use crate::connection::{ConnectionId, ConnectionRegistry, Handshake, SessionId, UserId};
use crate::engine;
use crate::error::Error;
use crate::message::Event;
use crate::transport::Transport;
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Work items for the presence actor. Every registry read or write goes
/// through this single queue, so updates never interleave.
#[derive(Debug)]
enum Command {
    Open {
        connection_id: ConnectionId,
        handshake: Handshake,
    },
    Close {
        connection_id: ConnectionId,
        reason: String,
    },
    Deliver {
        user_id: UserId,
        event: Event,
        reply: oneshot::Sender<usize>,
    },
    Reconcile {
        reply: Option<oneshot::Sender<bool>>,
    },
    ConnectionsForUser {
        user_id: UserId,
        reply: oneshot::Sender<Vec<ConnectionId>>,
    },
    PrimaryConnection {
        user_id: UserId,
        reply: oneshot::Sender<Option<ConnectionId>>,
    },
    SessionConnection {
        session_id: SessionId,
        reply: oneshot::Sender<Option<ConnectionId>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<UserId>>,
    },
    Shutdown,
}

/// Cheap, cloneable handle to the presence actor.
#[derive(Clone, Debug)]
pub struct Manager {
    commands: mpsc::UnboundedSender<Command>,
}

impl Manager {
    /// A connection reached the open state. Connections without a user id
    /// are not registered but still trigger (and receive) a presence broadcast.
    pub fn connection_opened(
        &self,
        connection_id: ConnectionId,
        handshake: Handshake,
    ) -> Result<(), Error> {
        self.commands.send(Command::Open {
            connection_id,
            handshake,
        })?;
        Ok(())
    }

    /// A connection closed. The reason is only logged.
    pub fn connection_closed(
        &self,
        connection_id: ConnectionId,
        reason: impl Into<String>,
    ) -> Result<(), Error> {
        self.commands.send(Command::Close {
            connection_id,
            reason: reason.into(),
        })?;
        Ok(())
    }

    /// Fan `event` out to every open connection of `user_id`.
    ///
    /// Returns how many connections were attempted; 0 means the user is
    /// offline, which is not an error.
    pub async fn deliver_to_user(&self, user_id: &str, event: Event) -> Result<usize, Error> {
        let (reply, response) = oneshot::channel();
        self.commands.send(Command::Deliver {
            user_id: user_id.to_string(),
            event,
            reply,
        })?;
        Ok(response.await?)
    }

    /// Reconcile against the transport now and report whether anything was pruned.
    pub async fn reconcile(&self) -> Result<bool, Error> {
        let (reply, response) = oneshot::channel();
        self.commands.send(Command::Reconcile { reply: Some(reply) })?;
        Ok(response.await?)
    }

    fn request_reconcile(&self) -> Result<(), Error> {
        self.commands.send(Command::Reconcile { reply: None })?;
        Ok(())
    }

    pub async fn connections_for_user(&self, user_id: &str) -> Result<Vec<ConnectionId>, Error> {
        let (reply, response) = oneshot::channel();
        self.commands.send(Command::ConnectionsForUser {
            user_id: user_id.to_string(),
            reply,
        })?;
        Ok(response.await?)
    }

    pub async fn primary_connection_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<ConnectionId>, Error> {
        let (reply, response) = oneshot::channel();
        self.commands.send(Command::PrimaryConnection {
            user_id: user_id.to_string(),
            reply,
        })?;
        Ok(response.await?)
    }

    pub async fn connection_for_session(
        &self,
        session_id: &str,
    ) -> Result<Option<ConnectionId>, Error> {
        let (reply, response) = oneshot::channel();
        self.commands.send(Command::SessionConnection {
            session_id: session_id.to_string(),
            reply,
        })?;
        Ok(response.await?)
    }

    /// Users with at least one open connection, sorted.
    pub async fn presence_snapshot(&self) -> Result<Vec<UserId>, Error> {
        let (reply, response) = oneshot::channel();
        self.commands.send(Command::Snapshot { reply })?;
        Ok(response.await?)
    }
}

/// Owns the registry and applies commands one at a time.
struct PresenceActor {
    registry: ConnectionRegistry,
    transport: Arc<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl PresenceActor {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            if let Command::Shutdown = command {
                break;
            }
            self.handle(command);
        }
        info!(
            "Presence actor stopped with {} registered connection(s)",
            self.registry.connection_count()
        );
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Open {
                connection_id,
                handshake,
            } => {
                match handshake.user_id() {
                    Some(user_id) => {
                        let session_id = handshake.session_id().cloned();
                        if self.registry.register(
                            connection_id.clone(),
                            user_id.clone(),
                            session_id.clone(),
                        ) {
                            info!(
                                "User {} connected with connection {}, session: {:?}. Open connections: {}",
                                user_id,
                                connection_id,
                                session_id,
                                self.registry.connections_for_user(user_id).len()
                            );
                        }
                    }
                    None => debug!("Connection {connection_id} opened without a user id"),
                }
                self.broadcast_presence();
            }
            Command::Close {
                connection_id,
                reason,
            } => {
                match self.registry.deregister(&connection_id) {
                    Some(info) => info!(
                        "User {} disconnected connection {}. Reason: {}",
                        info.user_id, connection_id, reason
                    ),
                    None => debug!(
                        "Connection {connection_id} closed without a registration. Reason: {reason}"
                    ),
                }
                self.broadcast_presence();
            }
            Command::Deliver {
                user_id,
                event,
                reply,
            } => {
                let delivered = engine::deliver_to_user(
                    &self.registry,
                    self.transport.as_ref(),
                    &user_id,
                    &event,
                );
                let _ = reply.send(delivered);
            }
            Command::Reconcile { reply } => {
                // Synchronous snapshot read; nothing else can run until the
                // registry has been brought in line with it.
                let live = self.transport.open_connection_ids();
                let changed = self.registry.reconcile(&live);
                if changed {
                    self.broadcast_presence();
                }
                if let Some(reply) = reply {
                    let _ = reply.send(changed);
                }
            }
            Command::ConnectionsForUser { user_id, reply } => {
                let _ = reply.send(self.registry.connections_for_user(&user_id));
            }
            Command::PrimaryConnection { user_id, reply } => {
                let _ = reply.send(self.registry.primary_connection_for_user(&user_id));
            }
            Command::SessionConnection { session_id, reply } => {
                let _ = reply.send(self.registry.connection_for_session(&session_id));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.registry.present_users());
            }
            Command::Shutdown => {}
        }
    }

    fn broadcast_presence(&self) {
        engine::broadcast_presence(&self.registry, self.transport.as_ref());
    }
}

/// Shortest reconciliation period; a zero period is raised to this.
pub const MIN_RECONCILE_PERIOD: Duration = Duration::from_secs(1);

/// Cancel handle for the periodic reconciliation task.
pub struct ReconciliationHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReconciliationHandle {
    /// Stop the timer and wait for the task to finish.
    pub async fn cancel(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = self.task.await {
            warn!("Reconciliation task ended abnormally: {e}");
        }
    }
}

/// Enqueue a reconciliation every `period` until cancelled or the actor stops.
///
/// The first pass happens one full period after the call. A zero period is
/// raised to [`MIN_RECONCILE_PERIOD`].
pub fn run_periodic_reconciliation(manager: Manager, period: Duration) -> ReconciliationHandle {
    let period = if period.is_zero() {
        warn!("Reconciliation period must be non-zero, using {MIN_RECONCILE_PERIOD:?}");
        MIN_RECONCILE_PERIOD
    } else {
        period
    };
    let (stop, mut stopped) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stopped => break,
                _ = ticker.tick() => {
                    if manager.request_reconcile().is_err() {
                        debug!("Presence actor is gone, stopping reconciliation");
                        break;
                    }
                }
            }
        }
    });

    ReconciliationHandle {
        stop: Some(stop),
        task,
    }
}

/// The running presence subsystem: the actor plus its reconciliation timer.
pub struct PresenceService {
    manager: Manager,
    actor: JoinHandle<()>,
    reconciliation: ReconciliationHandle,
}

impl PresenceService {
    /// Spawn the actor over an empty registry and start reconciling every
    /// `reconcile_interval`. Must be called from within a tokio runtime.
    pub fn start(transport: Arc<dyn Transport>, reconcile_interval: Duration) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let manager = Manager { commands };

        let actor = tokio::spawn(
            PresenceActor {
                registry: ConnectionRegistry::new(),
                transport,
                commands: receiver,
            }
            .run(),
        );

        let reconciliation = run_periodic_reconciliation(manager.clone(), reconcile_interval);

        info!(
            "Presence service started, reconciling every {}s",
            reconcile_interval.as_secs()
        );

        Self {
            manager,
            actor,
            reconciliation,
        }
    }

    pub fn manager(&self) -> Manager {
        self.manager.clone()
    }

    /// Stop the reconciliation timer, then the actor. Commands sent after
    /// this fail with `ServiceStopped`.
    pub async fn shutdown(self) {
        self.reconciliation.cancel().await;
        let _ = self.manager.commands.send(Command::Shutdown);
        if let Err(e) = self.actor.await {
            warn!("Presence actor ended abnormally: {e}");
        }
        info!("Presence service shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::RecordingTransport;
    use serde_json::json;

    const INTERVAL: Duration = Duration::from_secs(30);

    fn start(transport: &Arc<RecordingTransport>) -> PresenceService {
        PresenceService::start(transport.clone(), INTERVAL)
    }

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::from(id)
    }

    /// Open a connection and wait until the actor has applied it.
    async fn open(
        manager: &Manager,
        transport: &RecordingTransport,
        id: &str,
        user: &str,
        session: &str,
    ) {
        transport.open(id);
        manager
            .connection_opened(conn(id), Handshake::new(user, Some(session.to_string())))
            .unwrap();
        manager.presence_snapshot().await.unwrap();
    }

    /// Close a connection and wait until the actor has applied it.
    async fn close(manager: &Manager, transport: &RecordingTransport, id: &str) {
        transport.drop_silently(id);
        manager.connection_closed(conn(id), "transport close").unwrap();
        manager.presence_snapshot().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_disconnect_scenario() {
        let transport = Arc::new(RecordingTransport::default());
        let service = start(&transport);
        let manager = service.manager();

        open(&manager, &transport, "c1", "A", "s1").await;
        assert_eq!(manager.presence_snapshot().await.unwrap(), vec!["A"]);

        open(&manager, &transport, "c2", "A", "s2").await;
        assert_eq!(manager.presence_snapshot().await.unwrap(), vec!["A"]);
        assert_eq!(
            manager.connections_for_user("A").await.unwrap(),
            vec![conn("c1"), conn("c2")]
        );
        assert_eq!(
            manager.connection_for_session("s2").await.unwrap(),
            Some(conn("c2"))
        );

        close(&manager, &transport, "c1").await;
        assert_eq!(manager.connections_for_user("A").await.unwrap(), vec![conn("c2")]);
        assert_eq!(manager.presence_snapshot().await.unwrap(), vec!["A"]);
        assert_eq!(
            manager.primary_connection_for_user("A").await.unwrap(),
            Some(conn("c2"))
        );

        close(&manager, &transport, "c2").await;
        assert!(manager.presence_snapshot().await.unwrap().is_empty());

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_every_open_and_close_broadcasts_presence() {
        let transport = Arc::new(RecordingTransport::default());
        let service = start(&transport);
        let manager = service.manager();

        open(&manager, &transport, "c1", "A", "s1").await;
        open(&manager, &transport, "c2", "B", "s2").await;
        close(&manager, &transport, "c1").await;
        manager.presence_snapshot().await.unwrap();

        let snapshots: Vec<_> = transport
            .frames_of_type("getOnlineUsers")
            .into_iter()
            .map(|frame| frame["data"].clone())
            .collect();
        // c1 sees {A}; c1 and c2 see {A, B}; c2 sees {B}.
        assert_eq!(
            snapshots,
            vec![json!(["A"]), json!(["A", "B"]), json!(["A", "B"]), json!(["B"])]
        );

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_anonymous_connection_gets_snapshot_without_registering() {
        let transport = Arc::new(RecordingTransport::default());
        let service = start(&transport);
        let manager = service.manager();

        open(&manager, &transport, "c1", "A", "s1").await;
        transport.open("guest");
        transport.clear();
        manager
            .connection_opened(conn("guest"), Handshake::default())
            .unwrap();

        assert_eq!(manager.presence_snapshot().await.unwrap(), vec!["A"]);
        let mut receivers = transport.sent_to();
        receivers.sort();
        assert_eq!(receivers, vec![conn("c1"), conn("guest")]);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_deliver_to_user_counts_connections() {
        let transport = Arc::new(RecordingTransport::default());
        let service = start(&transport);
        let manager = service.manager();
        let message = json!({"_id": "m1", "senderId": "A", "receiverId": "B", "text": "hi"});

        let offline = manager
            .deliver_to_user("B", Event::NewMessage(message.clone()))
            .await
            .unwrap();
        assert_eq!(offline, 0);
        assert!(transport.frames_of_type("newMessage").is_empty());

        open(&manager, &transport, "c3", "B", "tab1").await;
        open(&manager, &transport, "c4", "B", "tab2").await;
        let online = manager
            .deliver_to_user("B", Event::NewMessage(message.clone()))
            .await
            .unwrap();

        assert_eq!(online, 2);
        assert_eq!(transport.frames_of_type("newMessage").len(), 2);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconcile_prunes_connections_whose_close_was_missed() {
        let transport = Arc::new(RecordingTransport::default());
        let service = start(&transport);
        let manager = service.manager();

        open(&manager, &transport, "c1", "A", "s1").await;
        open(&manager, &transport, "c2", "B", "s2").await;
        transport.drop_silently("c1");
        transport.clear();

        assert!(manager.reconcile().await.unwrap());
        assert_eq!(manager.presence_snapshot().await.unwrap(), vec!["B"]);
        assert_eq!(
            transport.frames_of_type("getOnlineUsers"),
            vec![json!({"type": "getOnlineUsers", "data": ["B"]})]
        );

        transport.clear();
        assert!(!manager.reconcile().await.unwrap());
        assert!(transport.sent().is_empty());

        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_reconciliation_heals_missed_disconnects() {
        let transport = Arc::new(RecordingTransport::default());
        let service = start(&transport);
        let manager = service.manager();

        open(&manager, &transport, "c1", "A", "s1").await;
        assert_eq!(manager.presence_snapshot().await.unwrap(), vec!["A"]);

        transport.drop_silently("c1");
        tokio::time::sleep(INTERVAL / 2).await;
        assert_eq!(manager.presence_snapshot().await.unwrap(), vec!["A"]);

        tokio::time::sleep(INTERVAL).await;
        assert!(manager.presence_snapshot().await.unwrap().is_empty());
        assert!(manager.connections_for_user("A").await.unwrap().is_empty());

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_commands_fail_after_shutdown() {
        let transport = Arc::new(RecordingTransport::default());
        let service = start(&transport);
        let manager = service.manager();

        service.shutdown().await;

        let err = manager.presence_snapshot().await.unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::ServiceStopped);
        let err = manager
            .connection_opened(conn("c1"), Handshake::new("A", None))
            .unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::ServiceStopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_reconciliation_stops_ticking() {
        let (commands, mut receiver) = mpsc::unbounded_channel();
        let manager = Manager { commands };

        let handle = run_periodic_reconciliation(manager, INTERVAL);
        tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
        assert!(matches!(
            receiver.try_recv(),
            Ok(Command::Reconcile { reply: None })
        ));

        handle.cancel().await;
        tokio::time::sleep(INTERVAL * 3).await;
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_still_reconciles() {
        let transport = Arc::new(RecordingTransport::default());
        let service = PresenceService::start(transport.clone(), Duration::ZERO);
        let manager = service.manager();

        open(&manager, &transport, "c1", "A", "s1").await;
        transport.drop_silently("c1");
        tokio::time::sleep(MIN_RECONCILE_PERIOD * 2).await;

        assert!(manager.presence_snapshot().await.unwrap().is_empty());

        service.shutdown().await;
    }
}
