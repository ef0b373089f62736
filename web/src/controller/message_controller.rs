use crate::controller::ApiResponse;
use crate::extractors::authenticated_user::AuthenticatedUser;
use crate::{AppState, Error};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use domain::message as MessageApi;
use domain::message::SendParams;
use domain::UserId;

use log::*;

/// POST send a direct message to `receiver_id`.
///
/// Responds once the message is stored. Realtime delivery to the receiver's
/// open tabs happens through the event publisher and never fails the request.
pub async fn send(
    AuthenticatedUser(sender_id): AuthenticatedUser,
    State(app_state): State<AppState>,
    Path(receiver_id): Path<UserId>,
    Json(params): Json<SendParams>,
) -> Result<impl IntoResponse, Error> {
    debug!(
        "POST Send message from {sender_id} to {receiver_id} (has image: {})",
        params.image.is_some()
    );

    let message = MessageApi::send(
        app_state.message_store.as_ref(),
        app_state.image_store.as_ref(),
        app_state.event_publisher.as_ref(),
        sender_id,
        receiver_id,
        params,
        app_state.config.max_message_text_len,
    )
    .await?;

    debug!("New Message: {message:?}");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(StatusCode::CREATED.into(), message)),
    ))
}

/// GET the conversation between the caller and `other_user_id`, oldest first.
pub async fn index(
    AuthenticatedUser(user_id): AuthenticatedUser,
    State(app_state): State<AppState>,
    Path(other_user_id): Path<UserId>,
) -> Result<impl IntoResponse, Error> {
    debug!("GET Messages between {user_id} and {other_user_id}");

    let messages = MessageApi::find_conversation(
        app_state.message_store.as_ref(),
        &user_id,
        &other_user_id,
    )
    .await?;

    debug!("Found {} Messages", messages.len());

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), messages)))
}
