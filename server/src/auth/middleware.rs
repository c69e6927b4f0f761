//! Authentication extractor.
//!
//! The bearer token identifies the account whose reading lists a request
//! touches. Tokens are not validated beyond being present and non-empty.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use crate::AppState;

/// Account used when no authorization is configured and none is sent.
const ANONYMOUS: &str = "anonymous";

/// Authenticated account extracted from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// The bearer token, which doubles as the account key
    pub token: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        match auth_header {
            Some(header) if header.starts_with("Bearer ") => {
                let token = header.trim_start_matches("Bearer ").trim().to_string();
                if token.is_empty() {
                    return Err((StatusCode::UNAUTHORIZED, "Empty bearer token"));
                }
                Ok(AuthUser { token })
            }
            Some(_) => Err((
                StatusCode::UNAUTHORIZED,
                "Invalid authorization header format",
            )),
            None if state.config.auth_secret.is_none() => Ok(AuthUser {
                token: ANONYMOUS.to_string(),
            }),
            None => Err((StatusCode::UNAUTHORIZED, "Missing authorization header")),
        }
    }
}
