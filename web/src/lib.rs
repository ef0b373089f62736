use domain::message_store::{ImageStore, MessageStore};
use events::EventPublisher;
use log::*;
use presence::{ChannelTransport, Manager};
use service::config::Config;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

pub use error::{Error, Result};

mod controller;
mod error;
mod extractors;
pub mod router;
mod ws;

pub use extractors::authenticated_user::USER_ID_HEADER;

// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub message_store: Arc<dyn MessageStore>,
    pub image_store: Arc<dyn ImageStore>,
    pub event_publisher: Arc<EventPublisher>,
    /// Handle to the presence actor
    pub presence: Manager,
    /// The websocket side of presence: one outbound channel per open socket
    pub transport: Arc<ChannelTransport>,
}

impl AppState {
    pub fn new(
        config: Config,
        message_store: Arc<dyn MessageStore>,
        image_store: Arc<dyn ImageStore>,
        event_publisher: EventPublisher,
        presence: Manager,
        transport: Arc<ChannelTransport>,
    ) -> Self {
        Self {
            config,
            message_store,
            image_store,
            event_publisher: Arc::new(event_publisher),
            presence,
            transport,
        }
    }
}

/// Bind to the configured interface and port and serve until `shutdown` resolves.
pub async fn init_server<F>(app_state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(app_state.config.bind_address()).await?;
    serve(listener, app_state, shutdown).await
}

/// Serve the router on an already bound listener.
pub async fn serve<F>(listener: TcpListener, app_state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(
        "Server starting... listening for connections on http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, router::define_routes(app_state))
        .with_graceful_shutdown(shutdown)
        .await
}
