use crate::controller::ApiResponse;
use crate::{AppState, Error};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

/// GET the users that currently have at least one open connection.
pub async fn index(State(app_state): State<AppState>) -> Result<impl IntoResponse, Error> {
    let online_users = app_state
        .presence
        .presence_snapshot()
        .await
        .map_err(Error::presence)?;

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), online_users)))
}
