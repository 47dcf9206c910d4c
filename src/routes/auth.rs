/**
 * Admin Authentication Routes
 * Cookie-session sign-in (password and magic link), session introspection,
 * refresh, and logout for the admin area.
 */
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{
    credentials,
    rate_limit::LOGIN_LIMITER,
    session_cookie::{self, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE},
    AuthError,
};
use crate::posts::STORE_TIMEOUT;
use crate::routes::SuccessResponse;

/// The one message every authentication failure maps to. Anything more
/// specific would leak whether the identity exists.
const GENERIC_CREDENTIALS_ERROR: &str = "Invalid credentials. Please try again.";

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Return destination captured by the edge gate's redirect, echoed back
    /// so the frontend can finish the round trip.
    #[serde(default)]
    pub redirect: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub user_id: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<SessionUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MagicLinkRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MagicLinkResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MagicTokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub success: bool,
    pub user: Option<SessionUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /admin/login
/// Password sign-in. Order is fixed: validate, rate-limit check, credential
/// attempt, outcome record (exactly once per attempt that reached the
/// adapter), cookie persistence.
pub async fn login(jar: CookieJar, Json(payload): Json<LoginRequest>) -> Response {
    if payload.email.is_empty() || payload.password.is_empty() {
        return login_error(StatusCode::BAD_REQUEST, "Email and password are required");
    }
    if !payload.email.contains('@') {
        return login_error(StatusCode::BAD_REQUEST, "Invalid email format");
    }

    if !LOGIN_LIMITER.check_allowed(&payload.email).await {
        tracing::warn!("rate-limited sign-in attempt");
        return login_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many login attempts. Please try again later.",
        );
    }

    let result = match tokio::time::timeout(
        STORE_TIMEOUT,
        credentials::sign_in_with_password(&payload.email, &payload.password),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(AuthError::Timeout),
    };

    LOGIN_LIMITER
        .record_outcome(&payload.email, result.is_ok())
        .await;

    match result {
        Ok(session) => {
            let (access, refresh) = session_cookie::persist(&session, session_cookie::is_production());
            let jar = jar.add(access).add(refresh);
            tracing::info!(email = %session.email, "successful admin sign-in");
            (
                StatusCode::OK,
                jar,
                Json(LoginResponse {
                    success: true,
                    user: Some(SessionUser {
                        user_id: session.user_id,
                        email: session.email,
                    }),
                    expires_at: Some(session.expires_at),
                    redirect_to: payload.redirect,
                    error: None,
                }),
            )
                .into_response()
        }
        Err(AuthError::InvalidCredentials) => {
            login_error(StatusCode::UNAUTHORIZED, GENERIC_CREDENTIALS_ERROR)
        }
        Err(AuthError::Timeout) => login_error(
            StatusCode::GATEWAY_TIMEOUT,
            "Sign-in timed out. Please try again.",
        ),
        Err(e) => {
            tracing::error!("sign-in failed: {}", e);
            login_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// POST /admin/login/magic-link
/// Request a one-time sign-in link. Success-shaped whether or not the
/// address is registered.
pub async fn request_magic_link(Json(payload): Json<MagicLinkRequest>) -> impl IntoResponse {
    if payload.email.is_empty() || !payload.email.contains('@') {
        return (
            StatusCode::BAD_REQUEST,
            Json(MagicLinkResponse {
                success: false,
                message: "A valid email address is required".to_string(),
            }),
        );
    }

    match credentials::sign_in_with_magic_link(&payload.email).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MagicLinkResponse {
                success: true,
                message: "If this address is registered, a sign-in link is on its way.".to_string(),
            }),
        ),
        Err(e) => {
            tracing::error!("magic-link delivery failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(MagicLinkResponse {
                    success: false,
                    message: "Could not send the sign-in link. Please try again.".to_string(),
                }),
            )
        }
    }
}

/// POST /admin/login/magic
/// Redeem a magic-link token and establish a cookie session.
pub async fn complete_magic_link(jar: CookieJar, Json(payload): Json<MagicTokenRequest>) -> Response {
    match credentials::consume_magic_link(&payload.token).await {
        Ok(session) => {
            let (access, refresh) = session_cookie::persist(&session, session_cookie::is_production());
            let jar = jar.add(access).add(refresh);
            tracing::info!(email = %session.email, "magic-link sign-in completed");
            (
                StatusCode::OK,
                jar,
                Json(LoginResponse {
                    success: true,
                    user: Some(SessionUser {
                        user_id: session.user_id,
                        email: session.email,
                    }),
                    expires_at: Some(session.expires_at),
                    redirect_to: None,
                    error: None,
                }),
            )
                .into_response()
        }
        Err(AuthError::InvalidCredentials) => login_error(
            StatusCode::UNAUTHORIZED,
            "This sign-in link is invalid or has expired.",
        ),
        Err(e) => {
            tracing::error!("magic-link sign-in failed: {}", e);
            login_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// GET /admin/session
/// Who the current token says the caller is.
pub async fn session(headers: HeaderMap, jar: CookieJar) -> impl IntoResponse {
    let token = crate::auth::extract_bearer_token(&headers)
        .or_else(|| jar.get(ACCESS_TOKEN_COOKIE).map(|c| c.value().to_string()));

    match token.as_deref().and_then(credentials::get_session) {
        Some(claims) => (
            StatusCode::OK,
            Json(SessionResponse {
                success: true,
                user: Some(SessionUser {
                    user_id: claims.sub,
                    email: claims.email,
                }),
                error: None,
            }),
        ),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(SessionResponse {
                success: false,
                user: None,
                error: Some("Not signed in".to_string()),
            }),
        ),
    }
}

/// POST /admin/session/refresh
/// Rotate the refresh credential and re-persist the cookie pair. Failure
/// clears both slots so the gate stops seeing a dead token.
pub async fn refresh(jar: CookieJar, payload: Option<Json<RefreshRequest>>) -> Response {
    let presented = payload
        .and_then(|Json(p)| p.refresh_token)
        .or_else(|| jar.get(REFRESH_TOKEN_COOKIE).map(|c| c.value().to_string()));

    let Some(token) = presented else {
        return refresh_failed(jar);
    };

    let result = match tokio::time::timeout(STORE_TIMEOUT, credentials::refresh_session(&token))
        .await
    {
        Ok(result) => result,
        Err(_) => Err(AuthError::Timeout),
    };

    match result {
        Ok(session) => {
            let (access, refresh) = session_cookie::persist(&session, session_cookie::is_production());
            let jar = jar.add(access).add(refresh);
            (
                StatusCode::OK,
                jar,
                Json(LoginResponse {
                    success: true,
                    user: Some(SessionUser {
                        user_id: session.user_id,
                        email: session.email,
                    }),
                    expires_at: Some(session.expires_at),
                    redirect_to: None,
                    error: None,
                }),
            )
                .into_response()
        }
        Err(AuthError::RefreshFailed) => refresh_failed(jar),
        Err(AuthError::Timeout) => login_error(
            StatusCode::GATEWAY_TIMEOUT,
            "Session refresh timed out. Please try again.",
        ),
        Err(e) => {
            tracing::error!("session refresh failed: {}", e);
            login_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// POST /admin/logout
/// Revoke whatever the caller presented and clear both cookie slots.
/// Idempotent: always 200, even with nothing to revoke.
pub async fn logout(headers: HeaderMap, jar: CookieJar) -> impl IntoResponse {
    let access = crate::auth::extract_bearer_token(&headers)
        .or_else(|| jar.get(ACCESS_TOKEN_COOKIE).map(|c| c.value().to_string()));
    let refresh = jar.get(REFRESH_TOKEN_COOKIE).map(|c| c.value().to_string());

    credentials::sign_out(access.as_deref(), refresh.as_deref()).await;

    let (access, refresh) = session_cookie::clear();
    let jar = jar.add(access).add(refresh);
    (StatusCode::OK, jar, Json(SuccessResponse { success: true }))
}

fn login_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(LoginResponse {
            success: false,
            user: None,
            expires_at: None,
            redirect_to: None,
            error: Some(message.to_string()),
        }),
    )
        .into_response()
}

fn refresh_failed(jar: CookieJar) -> Response {
    let (access, refresh) = session_cookie::clear();
    let jar = jar.add(access).add(refresh);
    (
        StatusCode::UNAUTHORIZED,
        jar,
        Json(LoginResponse {
            success: false,
            user: None,
            expires_at: None,
            redirect_to: None,
            error: Some("Invalid or expired refresh token".to_string()),
        }),
    )
        .into_response()
}
