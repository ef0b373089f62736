use domain::message_store::{InMemoryMessageStore, InlineImageStore};
use events::EventPublisher;
use log::*;
use presence::{ChannelTransport, PresenceDomainEventHandler, PresenceService};
use service::{config::Config, logging::Logger};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = Config::new();
    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to initialize logger: {e}");
    }

    info!("Starting chat server in {} mode", config.runtime_env());

    let transport = Arc::new(ChannelTransport::new());
    let presence_service = PresenceService::start(transport.clone(), config.reconcile_interval());

    let event_publisher = EventPublisher::new().with_handler(Arc::new(
        PresenceDomainEventHandler::new(presence_service.manager()),
    ));

    debug!(
        "Event publisher ready with {} handler(s)",
        event_publisher.handler_count()
    );

    let app_state = web::AppState::new(
        config,
        Arc::new(InMemoryMessageStore::new()),
        Arc::new(InlineImageStore),
        event_publisher,
        presence_service.manager(),
        transport,
    );

    if let Err(e) = web::init_server(app_state, shutdown_signal()).await {
        error!("Server stopped with an error: {e}");
    }

    presence_service.shutdown().await;
    info!("Chat server stopped");
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {e}"),
    }
}
