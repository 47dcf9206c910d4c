/**
 * Edge Access-Control Gate
 * Request filter evaluated before any admin logic runs: uniform security
 * headers, sensitive-path blocking, and structural screening of the
 * access-token cookie on admin paths.
 *
 * The gate never verifies token signatures. It is a coarse availability
 * filter; every state-mutating admin handler re-authenticates the token
 * against the real verifier before acting.
 */
use axum::{
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use regex::Regex;

use crate::auth::session_cookie::{self, ACCESS_TOKEN_COOKIE};

pub const ADMIN_PREFIX: &str = "/admin";
pub const LOGIN_PATH: &str = "/admin/login";

lazy_static::lazy_static! {
    /// Paths that must never resolve, whatever the router says.
    static ref SENSITIVE_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"\.env").unwrap(),
        Regex::new(r"\.git").unwrap(),
        Regex::new(r"node_modules").unwrap(),
        Regex::new(r"\.config").unwrap(),
        Regex::new(r"package\.json$").unwrap(),
    ];
}

/// Outcome of screening an admin request's access-token cookie.
enum TokenScreen {
    /// No cookie, or an empty value.
    Missing,
    /// Wrong shape, undecodable payload, or an `exp` claim in the past.
    Rejected,
    /// Shape and expiry claim look fine; let the handler verify for real.
    Passed,
}

pub async fn access_gate(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();

    if SENSITIVE_PATTERNS.iter().any(|p| p.is_match(&path)) {
        return apply_security_headers((StatusCode::NOT_FOUND, "Not Found").into_response());
    }

    // Static assets and the favicon bypass the gate entirely.
    if path.starts_with("/static/") || path == "/favicon.ico" {
        return next.run(request).await;
    }

    if path.starts_with(ADMIN_PREFIX) && !path.starts_with(LOGIN_PATH) {
        let jar = CookieJar::from_headers(request.headers());
        match screen_token(&jar) {
            TokenScreen::Missing => {
                let login = format!(
                    "{}?redirect={}",
                    LOGIN_PATH,
                    urlencoding::encode(&path)
                );
                return apply_security_headers(Redirect::temporary(&login).into_response());
            }
            TokenScreen::Rejected => {
                tracing::debug!(path = %path, "clearing unusable admin token");
                return apply_security_headers(redirect_to_login_and_clear());
            }
            TokenScreen::Passed => {}
        }
    }

    apply_security_headers(next.run(request).await)
}

fn screen_token(jar: &CookieJar) -> TokenScreen {
    let token = match jar.get(ACCESS_TOKEN_COOKIE) {
        Some(cookie) if !cookie.value().is_empty() => cookie.value().to_string(),
        _ => return TokenScreen::Missing,
    };

    // Header/payload/signature shape, nothing more.
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return TokenScreen::Rejected;
    }

    let Ok(payload) = URL_SAFE_NO_PAD.decode(parts[1]) else {
        return TokenScreen::Rejected;
    };
    let Ok(claims) = serde_json::from_slice::<serde_json::Value>(&payload) else {
        return TokenScreen::Rejected;
    };

    if let Some(exp) = claims.get("exp").and_then(|v| v.as_i64()) {
        if exp < Utc::now().timestamp() {
            return TokenScreen::Rejected;
        }
    }

    TokenScreen::Passed
}

fn apply_security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "x-xss-protection",
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

fn redirect_to_login_and_clear() -> Response {
    let (access, refresh) = session_cookie::clear();
    let mut response = Redirect::temporary(LOGIN_PATH).into_response();
    for cookie in [access, refresh] {
        if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}
