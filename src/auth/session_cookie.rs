/**
 * Session Token Materializer
 * The only module that builds the session cookies. Everything else either
 * asks for a persisted pair or for the clearing pair.
 */
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

use super::Session;

pub const ACCESS_TOKEN_COOKIE: &str = "access-token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh-token";

/// Session cookie lifetime in seconds. Kept equal to the access-token
/// expiry so the cookie and the claim inside it age out together.
const SESSION_COOKIE_MAX_AGE_SECS: i64 = 3600;

/// Whether cookies must carry the Secure attribute.
pub fn is_production() -> bool {
    std::env::var("ENVIRONMENT")
        .map(|v| v == "production")
        .unwrap_or(false)
}

/// Materialize a session into its cookie pair.
pub fn persist(session: &Session, secure: bool) -> (Cookie<'static>, Cookie<'static>) {
    let access = Cookie::build((ACCESS_TOKEN_COOKIE, session.access_token.clone()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(Duration::seconds(SESSION_COOKIE_MAX_AGE_SECS))
        .build();

    let refresh = Cookie::build((REFRESH_TOKEN_COOKIE, session.refresh_token.clone()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(Duration::seconds(SESSION_COOKIE_MAX_AGE_SECS))
        .build();

    (access, refresh)
}

/// Clearing pair for both slots: empty value, max-age zero. Issued
/// unconditionally, whether or not a session exists.
pub fn clear() -> (Cookie<'static>, Cookie<'static>) {
    let access = Cookie::build((ACCESS_TOKEN_COOKIE, ""))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(Duration::ZERO)
        .build();

    let refresh = Cookie::build((REFRESH_TOKEN_COOKIE, ""))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(Duration::ZERO)
        .build();

    (access, refresh)
}
