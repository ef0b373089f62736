use crate::extractors::RejectionType;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use domain::UserId;
use log::*;

/// Header carrying the caller's identity, set by the session layer in front
/// of this service once the session cookie has been verified.
pub const USER_ID_HEADER: &str = "x-user-id";

pub(crate) struct AuthenticatedUser(pub UserId);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = RejectionType;

    // Returns the opaque user identity attached to the request, or an
    // Unauthorized error if there is none.
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        match user_id {
            Some(user_id) => {
                trace!("Authenticated request for user {user_id}");
                Ok(AuthenticatedUser(user_id.to_string()))
            }
            None => Err((StatusCode::UNAUTHORIZED, "Unauthorized".to_string())),
        }
    }
}
