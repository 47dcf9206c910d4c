/**
 * Credential Store Adapter
 * Password and magic-link sign-in, session refresh with rotation, and
 * sign-out. Falls back to env-var credentials when no database is attached.
 */
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use rand::distr::{Alphanumeric, SampleString};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

use super::{
    create_access_token, verify_access_token, AuthError, Claims, Session,
    ACCESS_TOKEN_EXPIRY_MINUTES, ADMIN_EMAIL, ADMIN_PASSWORD_HASH, REFRESH_TOKEN_EXPIRY_DAYS,
};
use crate::db;
use crate::db::models::AdminUser;

/// Magic links are short-lived and single-use.
const MAGIC_LINK_EXPIRY_MINUTES: i64 = 15;

/// Synthetic account id used when authenticating against env credentials.
const ENV_ADMIN_USER_ID: &str = "env-admin";

/// Stored refresh token data
#[derive(Debug, Clone)]
pub struct RefreshTokenData {
    pub user_id: String,
    pub email: String,
    pub expires_at: i64,
    pub revoked: bool,
}

#[derive(Debug, Clone)]
struct MagicTokenData {
    user_id: String,
    email: String,
    expires_at: i64,
}

lazy_static::lazy_static! {
    /// In-memory refresh-token cache; keeps refresh working in no-database
    /// mode and survives transient store outages.
    static ref REFRESH_TOKENS: Arc<RwLock<HashMap<String, RefreshTokenData>>> =
        Arc::new(RwLock::new(HashMap::new()));

    /// Outstanding one-time magic-link tokens, keyed by hash.
    static ref MAGIC_TOKENS: Arc<RwLock<HashMap<String, MagicTokenData>>> =
        Arc::new(RwLock::new(HashMap::new()));
}

/// Generate a random opaque token
fn generate_token() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 64)
}

/// Hash an opaque token for storage using SHA-256. The hash lands in the
/// database, so a non-cryptographic function would invite pre-image attacks.
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Authenticate with email + password. Unknown identity, wrong password and
/// disabled account are indistinguishable to the caller: all three come back
/// as `InvalidCredentials`.
pub async fn sign_in_with_password(email: &str, password: &str) -> Result<Session, AuthError> {
    let email = email.trim().to_lowercase();

    match db::get_pool() {
        Some(pool) => {
            let user = sqlx::query_as::<_, AdminUser>(
                r#"SELECT id, email, password_hash, is_active, last_login_at, created_at, updated_at
                   FROM admin_users
                   WHERE LOWER(email) = LOWER($1)"#,
            )
            .bind(&email)
            .fetch_optional(pool.as_ref())
            .await?;

            let Some(user) = user else {
                tracing::warn!("sign-in attempt for unknown identity");
                return Err(AuthError::InvalidCredentials);
            };

            // bcrypt is CPU-bound; keep the async executor free.
            let password = password.to_string();
            let stored_hash = user.password_hash.clone();
            let password_ok =
                tokio::task::spawn_blocking(move || verify(&password, &stored_hash).unwrap_or(false))
                    .await
                    .unwrap_or(false);

            if !password_ok || !user.is_active {
                tracing::warn!(email = %user.email, "failed sign-in attempt");
                return Err(AuthError::InvalidCredentials);
            }

            let _ = sqlx::query(
                "UPDATE admin_users SET last_login_at = now(), updated_at = now() WHERE id = $1",
            )
            .bind(&user.id)
            .execute(pool.as_ref())
            .await;

            issue_session(user.id, user.email).await
        }
        None => {
            // No database attached; authenticate against env credentials so
            // local dev still has a working admin area.
            let email_matches = email == ADMIN_EMAIL.to_lowercase();
            let password_matches = verify(password, &ADMIN_PASSWORD_HASH).unwrap_or(false);
            if !email_matches || !password_matches {
                return Err(AuthError::InvalidCredentials);
            }
            issue_session(ENV_ADMIN_USER_ID.to_string(), email).await
        }
    }
}

/// Issue a one-time sign-in link for the given address. The result shape
/// never reveals whether the address is registered.
pub async fn sign_in_with_magic_link(email: &str) -> Result<(), AuthError> {
    let email = email.trim().to_lowercase();

    let account: Option<(String, String)> = match db::get_pool() {
        Some(pool) => sqlx::query_as(
            "SELECT id, email FROM admin_users WHERE LOWER(email) = LOWER($1) AND is_active",
        )
        .bind(&email)
        .fetch_optional(pool.as_ref())
        .await
        .unwrap_or_else(|e| {
            tracing::error!("magic-link account lookup failed: {}", e);
            None
        }),
        None if email == ADMIN_EMAIL.to_lowercase() => {
            Some((ENV_ADMIN_USER_ID.to_string(), email.clone()))
        }
        None => None,
    };

    if let Some((user_id, account_email)) = account {
        let token = generate_token();
        let expires_at = (Utc::now() + Duration::minutes(MAGIC_LINK_EXPIRY_MINUTES)).timestamp();
        {
            let mut tokens = MAGIC_TOKENS.write().await;
            tokens.insert(
                hash_token(&token),
                MagicTokenData {
                    user_id,
                    email: account_email.clone(),
                    expires_at,
                },
            );
        }
        deliver_magic_link(&account_email, &token);
    }

    Ok(())
}

/// Delivery channel for magic links. Stands in for an outbound mailer: the
/// link lands in the structured log for the operator to forward.
fn deliver_magic_link(email: &str, token: &str) {
    tracing::info!(
        email = %email,
        "magic link issued: /admin/login/magic?token={}",
        token
    );
}

/// Redeem a magic-link token. The token is spent on first presentation,
/// valid or not.
pub async fn consume_magic_link(token: &str) -> Result<Session, AuthError> {
    let data = {
        let mut tokens = MAGIC_TOKENS.write().await;
        tokens.remove(&hash_token(token))
    };

    match data {
        Some(data) if data.expires_at > Utc::now().timestamp() => {
            issue_session(data.user_id, data.email).await
        }
        _ => Err(AuthError::InvalidCredentials),
    }
}

/// Resolve the session behind an access token, if it is still valid.
pub fn get_session(access_token: &str) -> Option<Claims> {
    verify_access_token(access_token).ok()
}

/// Exchange a refresh token for a fresh session. The presented token is
/// rotated out whether or not the new session could be minted.
pub async fn refresh_session(refresh_token: &str) -> Result<Session, AuthError> {
    if refresh_token.is_empty() {
        return Err(AuthError::RefreshFailed);
    }

    let token_hash = hash_token(refresh_token);
    let now = Utc::now();

    // DB first so refresh survives restarts; cache as fallback.
    let token_data: Option<RefreshTokenData> = if let Some(pool) = db::get_pool() {
        match sqlx::query_as::<_, (String, String, chrono::DateTime<Utc>, bool)>(
            r#"SELECT au.id, au.email, art.expires_at, art.revoked
               FROM admin_refresh_tokens art
               JOIN admin_users au ON au.id = art.admin_user_id
               WHERE art.token_hash = $1"#,
        )
        .bind(&token_hash)
        .fetch_optional(pool.as_ref())
        .await
        {
            Ok(Some((user_id, email, expires_at, revoked))) => Some(RefreshTokenData {
                user_id,
                email,
                expires_at: expires_at.timestamp(),
                revoked,
            }),
            Ok(None) => REFRESH_TOKENS.read().await.get(&token_hash).cloned(),
            Err(e) => {
                tracing::error!("refresh lookup failed, falling back to cache: {}", e);
                REFRESH_TOKENS.read().await.get(&token_hash).cloned()
            }
        }
    } else {
        REFRESH_TOKENS.read().await.get(&token_hash).cloned()
    };

    match token_data {
        Some(data) if !data.revoked && data.expires_at > now.timestamp() => {
            if let Some(pool) = db::get_pool() {
                let _ = sqlx::query(
                    "UPDATE admin_refresh_tokens SET revoked = true WHERE token_hash = $1",
                )
                .bind(&token_hash)
                .execute(pool.as_ref())
                .await;
            }
            {
                let mut tokens = REFRESH_TOKENS.write().await;
                if let Some(old) = tokens.get_mut(&token_hash) {
                    old.revoked = true;
                }
            }

            issue_session(data.user_id, data.email).await
        }
        _ => Err(AuthError::RefreshFailed),
    }
}

/// Invalidate the presented refresh token and, given a verifiable access
/// token, every refresh token belonging to that user. Local state is always
/// cleared, even when the store write fails; sign-out itself cannot fail.
pub async fn sign_out(access_token: Option<&str>, refresh_token: Option<&str>) {
    let pool = db::get_pool();

    if let Some(refresh_token) = refresh_token {
        let token_hash = hash_token(refresh_token);

        if let Some(ref p) = pool {
            if let Err(e) =
                sqlx::query("UPDATE admin_refresh_tokens SET revoked = true WHERE token_hash = $1")
                    .bind(&token_hash)
                    .execute(p.as_ref())
                    .await
            {
                tracing::error!("failed to revoke refresh token in store: {}", e);
            }
        }

        let mut tokens = REFRESH_TOKENS.write().await;
        if let Some(data) = tokens.get_mut(&token_hash) {
            data.revoked = true;
        }
    }

    if let Some(claims) = access_token.and_then(|t| verify_access_token(t).ok()) {
        if let Some(ref p) = pool {
            if let Err(e) = sqlx::query(
                "UPDATE admin_refresh_tokens SET revoked = true WHERE admin_user_id = $1",
            )
            .bind(&claims.sub)
            .execute(p.as_ref())
            .await
            {
                tracing::error!("failed to revoke user refresh tokens in store: {}", e);
            }
        }

        let mut tokens = REFRESH_TOKENS.write().await;
        for data in tokens.values_mut() {
            if data.user_id == claims.sub {
                data.revoked = true;
            }
        }
    }
}

/// Mint a new access + refresh token pair for an authenticated account.
async fn issue_session(user_id: String, email: String) -> Result<Session, AuthError> {
    let access_token = create_access_token(&user_id, &email)?;
    let refresh_token = generate_token();
    let refresh_hash = hash_token(&refresh_token);
    let refresh_expires_at = Utc::now() + Duration::days(REFRESH_TOKEN_EXPIRY_DAYS);

    if let Some(pool) = db::get_pool() {
        if let Err(e) = sqlx::query(
            r#"INSERT INTO admin_refresh_tokens (admin_user_id, token_hash, expires_at)
               VALUES ($1, $2, $3)"#,
        )
        .bind(&user_id)
        .bind(&refresh_hash)
        .bind(refresh_expires_at)
        .execute(pool.as_ref())
        .await
        {
            tracing::error!("failed to persist refresh token to store: {}", e);
        }
    }

    {
        let mut tokens = REFRESH_TOKENS.write().await;
        tokens.insert(
            refresh_hash,
            RefreshTokenData {
                user_id: user_id.clone(),
                email: email.clone(),
                expires_at: refresh_expires_at.timestamp(),
                revoked: false,
            },
        );
    }

    Ok(Session {
        user_id,
        email,
        access_token,
        refresh_token,
        expires_at: Utc::now() + Duration::minutes(ACCESS_TOKEN_EXPIRY_MINUTES),
    })
}

/// Seed the initial admin account from env credentials when the table is
/// empty. Called once at startup, after migrations.
pub async fn ensure_bootstrap_admin(pool: &PgPool) -> Result<(), sqlx::Error> {
    let existing: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM admin_users")
        .fetch_one(pool)
        .await?;
    if existing.0 > 0 {
        return Ok(());
    }

    let email = std::env::var("ADMIN_EMAIL").unwrap_or_default();
    if email.is_empty() {
        tracing::warn!("admin_users is empty and ADMIN_EMAIL is unset; no admin account seeded");
        return Ok(());
    }

    let password_hash = if let Ok(hashed) = std::env::var("ADMIN_PASSWORD_HASH") {
        hashed
    } else if let Ok(plain) = std::env::var("ADMIN_PASSWORD") {
        match tokio::task::spawn_blocking(move || hash(&plain, DEFAULT_COST)).await {
            Ok(Ok(hashed)) => hashed,
            _ => {
                tracing::error!("failed to hash ADMIN_PASSWORD; no admin account seeded");
                return Ok(());
            }
        }
    } else {
        tracing::warn!(
            "admin_users is empty and neither ADMIN_PASSWORD_HASH nor ADMIN_PASSWORD is set; \
             no admin account seeded"
        );
        return Ok(());
    };

    sqlx::query("INSERT INTO admin_users (email, password_hash) VALUES ($1, $2)")
        .bind(email.to_lowercase())
        .bind(&password_hash)
        .execute(pool)
        .await?;

    tracing::info!("seeded initial admin account");
    Ok(())
}

/// Test hook: plant a magic-link token without going through delivery.
#[cfg(test)]
pub(crate) async fn store_magic_token(token: &str, user_id: &str, email: &str, expires_at: i64) {
    let mut tokens = MAGIC_TOKENS.write().await;
    tokens.insert(
        hash_token(token),
        MagicTokenData {
            user_id: user_id.to_string(),
            email: email.to_string(),
            expires_at,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sign_in_rejects_wrong_credentials_without_db() {
        let result = sign_in_with_password("nobody@example.com", "whatever").await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_magic_link_is_success_shaped_for_unknown_identity() {
        let result = sign_in_with_magic_link("stranger@example.com").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_consume_magic_link_rejects_unknown_token() {
        let result = consume_magic_link("no-such-token").await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_consume_magic_link_is_single_use() {
        let expires = (Utc::now() + Duration::minutes(5)).timestamp();
        store_magic_token("one-shot-token", "user-1", "owner@example.com", expires).await;

        let first = consume_magic_link("one-shot-token").await;
        assert!(first.is_ok());

        let second = consume_magic_link("one-shot-token").await;
        assert!(matches!(second, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_consume_magic_link_rejects_expired_token() {
        let expired = (Utc::now() - Duration::minutes(1)).timestamp();
        store_magic_token("stale-token", "user-1", "owner@example.com", expired).await;

        let result = consume_magic_link("stale-token").await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_refresh_rejects_empty_and_unknown_tokens() {
        assert!(matches!(
            refresh_session("").await,
            Err(AuthError::RefreshFailed)
        ));
        assert!(matches!(
            refresh_session("unknown-refresh-token").await,
            Err(AuthError::RefreshFailed)
        ));
    }

    #[tokio::test]
    async fn test_refresh_rotates_the_presented_token() {
        let expires = (Utc::now() + Duration::minutes(5)).timestamp();
        store_magic_token("rotation-seed", "user-2", "owner@example.com", expires).await;
        let session = consume_magic_link("rotation-seed").await.unwrap();

        let renewed = refresh_session(&session.refresh_token).await.unwrap();
        assert_eq!(renewed.user_id, "user-2");
        assert_ne!(renewed.refresh_token, session.refresh_token);

        // The spent token no longer refreshes.
        let replayed = refresh_session(&session.refresh_token).await;
        assert!(matches!(replayed, Err(AuthError::RefreshFailed)));
    }

    #[tokio::test]
    async fn test_sign_out_revokes_refresh_token_and_never_fails() {
        let expires = (Utc::now() + Duration::minutes(5)).timestamp();
        store_magic_token("signout-seed", "user-3", "owner@example.com", expires).await;
        let session = consume_magic_link("signout-seed").await.unwrap();

        sign_out(Some(&session.access_token), Some(&session.refresh_token)).await;

        let result = refresh_session(&session.refresh_token).await;
        assert!(matches!(result, Err(AuthError::RefreshFailed)));

        // Idempotent on a second call with nothing left to revoke.
        sign_out(None, None).await;
    }
}
