/**
 * Routes Module
 * API route handlers
 */
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

use crate::auth::{session_cookie::ACCESS_TOKEN_COOKIE, Claims};

pub mod auth;
pub mod blog;
pub mod content;
pub mod health;

/// Error response shared by the route modules. `message` carries detail that
/// is safe for the audience of the endpoint (raw store messages are
/// admin-facing only).
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Success response (for delete and logout)
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Re-verify the caller's access token with full signature validation.
/// Gate passage is never treated as proof of identity; every admin handler
/// goes through here before touching anything.
pub(crate) fn verify_admin(headers: &HeaderMap, jar: &CookieJar) -> Result<Claims, Response> {
    let token = crate::auth::extract_bearer_token(headers)
        .or_else(|| jar.get(ACCESS_TOKEN_COOKIE).map(|c| c.value().to_string()));

    match token {
        Some(token) => match crate::auth::verify_access_token(&token) {
            Ok(claims) => Ok(claims),
            Err(_) => Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or expired token".to_string(),
                    message: None,
                }),
            )
                .into_response()),
        },
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Authorization required".to_string(),
                message: None,
            }),
        )
            .into_response()),
    }
}
