use crate::{
    controller::{health_check_controller, message_controller, presence_controller},
    extractors::authenticated_user::USER_ID_HEADER,
    ws::handler::ws_handler,
    AppState,
};
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use log::*;
use tower_http::cors::CorsLayer;

pub fn define_routes(app_state: AppState) -> Router {
    let cors = cors_layer(&app_state.config.allowed_origins);

    Router::new()
        .merge(health_routes())
        .merge(message_routes(app_state.clone()))
        .merge(presence_routes(app_state.clone()))
        .merge(ws_routes(app_state))
        .layer(cors)
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

fn message_routes(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/messages/send/{receiver_id}",
            post(message_controller::send),
        )
        .route("/messages/{other_user_id}", get(message_controller::index))
        .with_state(app_state)
}

fn presence_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/presence", get(presence_controller::index))
        .with_state(app_state)
}

fn ws_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(app_state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin {origin}: {e}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(USER_ID_HEADER)])
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use clap::Parser;
    use axum::http::{Request, StatusCode};
    use domain::message_store::{InMemoryMessageStore, InlineImageStore};
    use events::EventPublisher;
    use presence::{
        ChannelTransport, ConnectionId, Handshake, PresenceDomainEventHandler, PresenceService,
    };
    use serde_json::{json, Value};
    use service::config::Config;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        transport: Arc<ChannelTransport>,
        service: PresenceService,
    }

    fn test_app() -> TestApp {
        let config = Config::parse_from(["chat_server_rs", "--max-message-text-len", "20"]);
        let transport = Arc::new(ChannelTransport::new());
        let service = PresenceService::start(transport.clone(), Duration::from_secs(30));
        let publisher = EventPublisher::new()
            .with_handler(Arc::new(PresenceDomainEventHandler::new(service.manager())));
        let app_state = AppState::new(
            config,
            Arc::new(InMemoryMessageStore::new()),
            Arc::new(InlineImageStore),
            publisher,
            service.manager(),
            transport.clone(),
        );

        TestApp {
            router: define_routes(app_state),
            transport,
            service,
        }
    }

    impl TestApp {
        /// Stand-in for an open websocket tab of `user_id`.
        async fn open_tab(&self, user_id: &str) -> mpsc::UnboundedReceiver<String> {
            let (tx, rx) = mpsc::unbounded_channel();
            let connection_id = ConnectionId::new();
            self.transport.attach(connection_id.clone(), tx);
            let manager = self.service.manager();
            manager
                .connection_opened(connection_id, Handshake::new(user_id, None))
                .unwrap();
            // Round-trip through the actor so the registration has been applied.
            manager.presence_snapshot().await.unwrap();
            rx
        }
    }

    fn send_request(sender: Option<&str>, receiver: &str, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("/messages/send/{receiver}"))
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(sender) = sender {
            builder = builder.header(USER_ID_HEADER, sender);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn drain_of_type(rx: &mut mpsc::UnboundedReceiver<String>, event_type: &str) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let value: Value = serde_json::from_str(&frame).unwrap();
            if value["type"] == event_type {
                frames.push(value);
            }
        }
        frames
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();

        let response = app
            .router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        app.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_requires_an_identity() {
        let app = test_app();

        let response = app
            .router
            .clone()
            .oneshot(send_request(None, "B", json!({"text": "hi"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        app.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_delivers_to_every_tab_of_the_receiver() {
        let app = test_app();
        let mut sender_tab = app.open_tab("A").await;
        let mut receiver_tab1 = app.open_tab("B").await;
        let mut receiver_tab2 = app.open_tab("B").await;

        let response = app
            .router
            .clone()
            .oneshot(send_request(Some("A"), "B", json!({"text": "hello"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["status_code"], 201);
        assert_eq!(body["data"]["senderId"], "A");
        assert_eq!(body["data"]["receiverId"], "B");
        assert_eq!(body["data"]["text"], "hello");

        for tab in [&mut receiver_tab1, &mut receiver_tab2] {
            let frames = drain_of_type(tab, "newMessage");
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0]["data"], body["data"]);
        }
        assert!(drain_of_type(&mut sender_tab, "newMessage").is_empty());

        app.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_to_offline_user_is_still_stored() {
        let app = test_app();

        let response = app
            .router
            .clone()
            .oneshot(send_request(Some("A"), "B", json!({"text": "later"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .router
            .clone()
            .oneshot(
                Request::get("/messages/A")
                    .header(USER_ID_HEADER, "B")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["text"], "later");

        app.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_messages_are_unprocessable() {
        let app = test_app();

        for body in [json!({}), json!({"text": "x".repeat(21)}), json!({"image": "ftp://x"})] {
            let response = app
                .router
                .clone()
                .oneshot(send_request(Some("A"), "B", body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        }

        app.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_presence_lists_online_users() {
        let app = test_app();
        let _tab_b = app.open_tab("B").await;
        let _tab_a = app.open_tab("A").await;

        let response = app
            .router
            .clone()
            .oneshot(Request::get("/presence").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["data"], json!(["A", "B"]));

        app.service.shutdown().await;
    }

    #[test]
    fn test_invalid_cors_origin_is_skipped() {
        // Building the layer must not panic on a malformed origin.
        let _layer = cors_layer(&["http://ok.test".to_string(), "bad\norigin".to_string()]);
    }
}
