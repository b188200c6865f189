use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::error::ApiError;
use super::state::ApiState;

/// Admin bearer token, kept only as a digest.
#[derive(Debug, Clone)]
pub struct AdminToken {
    digest: Vec<u8>,
}

impl AdminToken {
    pub fn new(token: &str) -> Self {
        Self {
            digest: hash_secret(token),
        }
    }

    /// Compare digests in constant time so the token length and prefix do not leak.
    pub fn verify(&self, presented: &str) -> bool {
        self.digest.ct_eq(&hash_secret(presented)).unwrap_u8() == 1
    }
}

pub async fn require_admin(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = state.admin_token.as_ref() else {
        return ApiError::not_found("resource not found").into_response();
    };

    match extract_token(request.headers().get(axum::http::header::AUTHORIZATION)) {
        Some(presented) if token.verify(&presented) => next.run(request).await,
        _ => ApiError::unauthorized().into_response(),
    }
}

fn extract_token(header: Option<&HeaderValue>) -> Option<String> {
    let raw = header?.to_str().ok()?;
    let bearer = raw.strip_prefix("Bearer ")?;
    Some(bearer.trim().to_string())
}

fn hash_secret(secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_verification() {
        let token = AdminToken::new("s3cret");
        assert!(token.verify("s3cret"));
        assert!(!token.verify("s3cre"));
        assert!(!token.verify(""));
    }

    #[test]
    fn bearer_prefix_is_required() {
        let header = HeaderValue::from_static("Bearer abc");
        assert_eq!(extract_token(Some(&header)).as_deref(), Some("abc"));
        let header = HeaderValue::from_static("Token abc");
        assert_eq!(extract_token(Some(&header)), None);
        assert_eq!(extract_token(None), None);
    }
}
