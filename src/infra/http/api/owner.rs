//! Cart owner extraction from request headers.

use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::domain::types::CartOwner;

use super::error::{ApiError, codes};

pub const USER_HEADER: &str = "x-user-id";
pub const SESSION_HEADER: &str = "x-session-key";

const MAX_SESSION_KEY_LEN: usize = 128;

/// The signed-in user from `x-user-id`, else the anonymous session from `x-session-key`.
#[derive(Debug, Clone)]
pub struct Owner(pub CartOwner);

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(value) = parts.headers.get(USER_HEADER) {
            let id = value
                .to_str()
                .ok()
                .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
                .ok_or_else(|| {
                    ApiError::invalid_input(
                        "Invalid x-user-id header",
                        Some("expected a UUID".to_string()),
                    )
                })?;
            return Ok(Owner(CartOwner::User(id)));
        }

        if let Some(value) = parts.headers.get(SESSION_HEADER) {
            let key = value
                .to_str()
                .ok()
                .map(str::trim)
                .filter(|key| !key.is_empty() && key.len() <= MAX_SESSION_KEY_LEN)
                .ok_or_else(|| {
                    ApiError::invalid_input(
                        "Invalid x-session-key header",
                        Some(format!("expected 1 to {MAX_SESSION_KEY_LEN} visible characters")),
                    )
                })?;
            return Ok(Owner(CartOwner::Session(key.to_string())));
        }

        Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::MISSING_OWNER,
            "Cart owner required",
            Some(format!("send `{USER_HEADER}` or `{SESSION_HEADER}`")),
        ))
    }
}
