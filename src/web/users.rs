use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::web::{
    ApiMessage, AppState,
    auth::{self, JsonAuthError},
    json_error,
};

const MIN_PASSWORD_LEN: usize = 6;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users/register", post(register))
        .route("/api/users/login", post(login))
        .route("/api/users/logout", post(logout))
        .route("/api/users/profile", get(profile))
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Serialize)]
pub struct PublicUser {
    id: Uuid,
    username: String,
    email: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    success: bool,
    message: &'static str,
    token: Uuid,
    user: PublicUser,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    id: Uuid,
    username: String,
    email: String,
    current_streak: i32,
    longest_streak: i32,
    last_entry_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    username: String,
    email: String,
    current_streak: i32,
    longest_streak: i32,
    last_entry_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiMessage>)>;

async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, CookieJar, Json<SessionResponse>)> {
    let username = payload.username.trim();
    let email = payload.email.trim().to_lowercase();

    if username.is_empty() || email.is_empty() || payload.password.is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Please fill all required fields",
        ));
    }
    if !looks_like_email(&email) {
        return Err(json_error(StatusCode::BAD_REQUEST, "Please enter a valid email"));
    }
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Password must be at least 6 characters",
        ));
    }

    let password_hash = auth::hash_password(&payload.password).map_err(|err| {
        error!(%err, "failed to hash password");
        json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to register user")
    })?;

    let user_id = Uuid::new_v4();
    let inserted = sqlx::query(
        "INSERT INTO users (id, username, email, password_hash) VALUES ($1, $2, $3, $4)",
    )
    .bind(user_id)
    .bind(username)
    .bind(&email)
    .bind(&password_hash)
    .execute(state.pool_ref())
    .await;

    if let Err(err) = inserted {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Err(json_error(
                    StatusCode::CONFLICT,
                    "User with this email already exists",
                ));
            }
        }
        error!(?err, "failed to insert user");
        return Err(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to register user",
        ));
    }

    let (token, _) = auth::create_session(state.pool_ref(), user_id)
        .await
        .map_err(|err| {
            error!(?err, %user_id, "failed to create session after registration");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to register user")
        })?;

    info!(%user_id, "registered user");

    Ok((
        StatusCode::CREATED,
        jar.add(auth::session_cookie(token)),
        Json(SessionResponse {
            success: true,
            message: "User registered successfully",
            token,
            user: PublicUser {
                id: user_id,
                username: username.to_string(),
                email,
            },
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<(CookieJar, Json<SessionResponse>)> {
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || payload.password.is_empty() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Email and password are required",
        ));
    }

    let user = sqlx::query_as::<_, CredentialRow>(
        "SELECT id, username, email, password_hash FROM users WHERE email = $1",
    )
    .bind(&email)
    .fetch_optional(state.pool_ref())
    .await
    .map_err(|err| {
        error!(?err, "failed to fetch user during login");
        json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to login")
    })?;

    let Some(user) = user.filter(|user| auth::verify_password(&payload.password, &user.password_hash))
    else {
        return Err(json_error(StatusCode::UNAUTHORIZED, "Invalid credentials"));
    };

    let (token, _) = auth::create_session(state.pool_ref(), user.id)
        .await
        .map_err(|err| {
            error!(?err, user_id = %user.id, "failed to create session");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to login")
        })?;

    Ok((
        jar.add(auth::session_cookie(token)),
        Json(SessionResponse {
            success: true,
            message: "Login successful",
            token,
            user: PublicUser {
                id: user.id,
                username: user.username,
                email: user.email,
            },
        }),
    ))
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> (CookieJar, Json<ApiMessage>) {
    if let Some(token) = auth::session_token(&headers, &jar).and_then(|raw| Uuid::parse_str(&raw).ok()) {
        if let Err(err) = auth::delete_session(state.pool_ref(), token).await {
            error!(?err, "failed to remove session during logout");
        }
    }

    (
        jar.remove(auth::removal_cookie()),
        Json(ApiMessage::new("Logged out")),
    )
}

async fn profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> ApiResult<Json<ProfileResponse>> {
    let user = auth::current_user_or_json_error(&state, &headers, &jar)
        .await
        .map_err(|JsonAuthError { status, message }| json_error(status, message))?;

    let row = sqlx::query_as::<_, ProfileRow>(
        "SELECT id, username, email, current_streak, longest_streak, last_entry_date, created_at FROM users WHERE id = $1",
    )
    .bind(user.id)
    .fetch_optional(state.pool_ref())
    .await
    .map_err(|err| {
        error!(?err, user_id = %user.id, "failed to load profile");
        json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch user profile")
    })?
    .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "User not found"))?;

    Ok(Json(ProfileResponse {
        id: row.id,
        username: row.username,
        email: row.email,
        current_streak: row.current_streak,
        longest_streak: row.longest_streak,
        last_entry_date: row.last_entry_date,
        created_at: row.created_at,
    }))
}

fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, _)| !host.is_empty())
        && !domain.ends_with('.')
}

/// Consecutive-day journaling counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, sqlx::FromRow)]
pub struct Streak {
    pub current_streak: i32,
    pub longest_streak: i32,
    pub last_entry_date: Option<NaiveDate>,
}

impl Streak {
    /// Record a journal entry written on `day`.
    pub fn advance(self, day: NaiveDate) -> Streak {
        let current = match self.last_entry_date {
            None => 1,
            Some(last) if day <= last => return self,
            Some(last) if last.succ_opt() == Some(day) => self.current_streak + 1,
            Some(_) => 1,
        };

        Streak {
            current_streak: current,
            longest_streak: self.longest_streak.max(current),
            last_entry_date: Some(day),
        }
    }
}

/// Apply `Streak::advance` for `day` to the stored counters in one transaction.
pub async fn record_journal_day(pool: &PgPool, user_id: Uuid, day: NaiveDate) -> anyhow::Result<Streak> {
    use anyhow::Context;

    let mut tx = pool.begin().await.context("failed to open streak transaction")?;

    let Some(stored) = sqlx::query_as::<_, Streak>(
        "SELECT current_streak, longest_streak, last_entry_date FROM users WHERE id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to load streak")?
    else {
        warn!(%user_id, "streak update for unknown user");
        return Ok(Streak::default());
    };

    let next = stored.advance(day);
    if next != stored {
        sqlx::query(
            "UPDATE users SET current_streak = $2, longest_streak = $3, last_entry_date = $4, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .bind(next.current_streak)
        .bind(next.longest_streak)
        .bind(next.last_entry_date)
        .execute(&mut *tx)
        .await
        .context("failed to store streak")?;
    }

    tx.commit().await.context("failed to commit streak update")?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn first_entry_starts_a_streak() {
        let streak = Streak::default().advance(day(1));
        assert_eq!(
            streak,
            Streak {
                current_streak: 1,
                longest_streak: 1,
                last_entry_date: Some(day(1)),
            }
        );
    }

    #[test]
    fn consecutive_days_extend_and_gaps_reset() {
        let streak = Streak::default()
            .advance(day(1))
            .advance(day(2))
            .advance(day(3));
        assert_eq!(streak.current_streak, 3);

        let same_day = streak.advance(day(3));
        assert_eq!(same_day, streak);

        let after_gap = streak.advance(day(6));
        assert_eq!(after_gap.current_streak, 1);
        assert_eq!(after_gap.longest_streak, 3);
        assert_eq!(after_gap.last_entry_date, Some(day(6)));
    }

    #[test]
    fn backdated_entries_leave_the_streak_alone() {
        let streak = Streak::default().advance(day(10)).advance(day(11));
        assert_eq!(streak.advance(day(4)), streak);
    }

    #[test]
    fn month_boundaries_count_as_consecutive() {
        let end_of_april = NaiveDate::from_ymd_opt(2024, 4, 30).unwrap();
        let streak = Streak::default().advance(end_of_april).advance(day(1));
        assert_eq!(streak.current_streak, 2);
    }

    #[test]
    fn email_shape_check() {
        assert!(looks_like_email("sam@example.com"));
        assert!(!looks_like_email("sam@example"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("sam @example.com"));
        assert!(!looks_like_email("sam@@example.com"));
        assert!(!looks_like_email("sam@.com"));
    }
}
