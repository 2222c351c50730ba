use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::http::{HeaderMap, StatusCode, header};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cookie::time::Duration as CookieDuration;
use rand_core::OsRng;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::web::AppState;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct AuthUser {
    pub id: Uuid,
}

pub const SESSION_COOKIE: &str = "auth_token";
pub const SESSION_TTL_DAYS: i64 = 30;
const TOKEN_HEADER: &str = "token";

/// Rejection returned by JSON endpoints when no valid session is attached.
#[derive(Debug)]
pub struct JsonAuthError {
    pub status: StatusCode,
    pub message: &'static str,
}

/// Resolve the caller from the `token` header, a bearer token, or the session cookie.
pub async fn current_user_or_json_error(
    state: &AppState,
    headers: &HeaderMap,
    jar: &CookieJar,
) -> Result<AuthUser, JsonAuthError> {
    let Some(raw) = session_token(headers, jar) else {
        return Err(JsonAuthError {
            status: StatusCode::UNAUTHORIZED,
            message: "Not authorized, no token",
        });
    };

    let token = Uuid::parse_str(&raw).map_err(|_| JsonAuthError {
        status: StatusCode::UNAUTHORIZED,
        message: "Not authorized, token failed",
    })?;

    match fetch_user_by_session(state.pool_ref(), token).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(JsonAuthError {
            status: StatusCode::UNAUTHORIZED,
            message: "Not authorized, token failed",
        }),
        Err(err) => {
            error!(?err, "failed to validate session");
            Err(JsonAuthError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "Failed to verify session",
            })
        }
    }
}

pub fn session_token(headers: &HeaderMap, jar: &CookieJar) -> Option<String> {
    let from_header = headers
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let from_bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty());

    from_header
        .or(from_bearer)
        .map(str::to_string)
        .or_else(|| jar.get(SESSION_COOKIE).map(|cookie| cookie.value().to_string()))
}

pub async fn create_session(pool: &PgPool, user_id: Uuid) -> sqlx::Result<(Uuid, DateTime<Utc>)> {
    let token = Uuid::new_v4();
    let expires_at = Utc::now() + ChronoDuration::days(SESSION_TTL_DAYS);

    sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok((token, expires_at))
}

pub async fn delete_session(pool: &PgPool, token: Uuid) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM sessions WHERE id = $1")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

pub fn session_cookie(token: Uuid) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, token.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(CookieDuration::days(SESSION_TTL_DAYS));
    cookie
}

pub fn removal_cookie() -> Cookie<'static> {
    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    removal.set_http_only(true);
    removal.set_same_site(SameSite::Lax);
    removal.set_max_age(CookieDuration::seconds(0));
    removal
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed = PasswordHash::new(password_hash);
    match parsed {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

pub async fn fetch_user_by_session(pool: &PgPool, token: Uuid) -> sqlx::Result<Option<AuthUser>> {
    sqlx::query_as::<_, AuthUser>(
        "SELECT users.id FROM sessions JOIN users ON users.id = sessions.user_id WHERE sessions.id = $1 AND sessions.expires_at > NOW()",
    )
    .bind(token)
    .fetch_optional(pool)
    .await
}

/// Remove expired sessions. Returns how many were deleted.
pub async fn purge_expired_sessions(pool: &PgPool) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("s3cret-pass").unwrap();
        assert!(verify_password("s3cret-pass", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("s3cret-pass", "not-a-hash"));
    }

    #[test]
    fn token_sources_in_priority_order() {
        let cookie_token = Uuid::new_v4();
        let jar = CookieJar::new().add(session_cookie(cookie_token));

        let mut headers = HeaderMap::new();
        assert_eq!(session_token(&headers, &jar), Some(cookie_token.to_string()));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-bearer"));
        assert_eq!(session_token(&headers, &jar).as_deref(), Some("from-bearer"));

        headers.insert(TOKEN_HEADER, HeaderValue::from_static("from-header"));
        assert_eq!(session_token(&headers, &jar).as_deref(), Some("from-header"));

        assert_eq!(session_token(&HeaderMap::new(), &CookieJar::new()), None);
    }

    #[test]
    fn session_cookie_is_http_only() {
        let cookie = session_cookie(Uuid::nil());
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(removal_cookie().max_age(), Some(CookieDuration::seconds(0)));
    }
}
