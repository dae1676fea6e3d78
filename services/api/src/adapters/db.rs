//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of the
//! profile, session, message and auth-session ports from the `core` crate. It
//! handles all interactions with the SQLite database using `sqlx`.
//!
//! Ids are stored as UUID text and timestamps as RFC 3339 text with a fixed
//! microsecond precision, so that text order is time order.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use diet_assistant_core::domain::{
    restrictions_from_csv, restrictions_to_csv, ActivityLevel, ChatSession, HealthProfile, Role,
    StoredTurn, UserRecord,
};
use diet_assistant_core::ports::{
    AuthSessionStore, MessageStore, PortError, PortResult, ProfileStore, SessionStore,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::credentials::{hash_secret, verify_secret, SecretCheck};
use crate::error::ApiError;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the storage ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: SqlitePool,
    /// Last timestamp handed out, so that consecutive writes never tie.
    clock: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            clock: Arc::new(Mutex::new(None)),
        }
    }

    /// Opens the pool in WAL mode with foreign keys enforced, creating the
    /// database file when it does not exist yet.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    /// Brings the schema up to date at startup: legacy repair first, then the
    /// embedded migrations.
    pub async fn run_migrations(&self) -> Result<(), ApiError> {
        self.repair_legacy_schema().await?;
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Databases created before chat sessions existed have a `turns` table
    /// without `session_id`. Adds the column in place; a no-op otherwise.
    async fn repair_legacy_schema(&self) -> Result<bool, sqlx::Error> {
        let has_turns: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'turns'")
                .fetch_optional(&self.pool)
                .await?;
        if has_turns.is_none() {
            return Ok(false);
        }

        let columns = sqlx::query("PRAGMA table_info(turns)")
            .fetch_all(&self.pool)
            .await?;
        let has_session_id = columns
            .iter()
            .filter_map(|row| row.try_get::<String, _>("name").ok())
            .any(|name| name == "session_id");
        if has_session_id {
            return Ok(false);
        }

        warn!("Legacy schema detected: adding turns.session_id");
        sqlx::query("ALTER TABLE turns ADD COLUMN session_id TEXT")
            .execute(&self.pool)
            .await?;
        Ok(true)
    }

    /// A strictly increasing timestamp at microsecond precision.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let mut last = self
            .clock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let stamp = match *last {
            Some(previous) if now <= previous => previous + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }
}

//=========================================================================================
// Conversion Helpers
//=========================================================================================

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Also accepts SQLite's `CURRENT_TIMESTAMP` format found in older rows.
fn parse_timestamp(raw: &str) -> PortResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|n| n.and_utc()))
        .map_err(|e| PortError::Unexpected(format!("invalid timestamp '{}': {}", raw, e)))
}

fn parse_uuid(raw: &str, what: &str) -> PortResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| PortError::Unexpected(format!("invalid {}: {}", what, e)))
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found_or_unexpected(e: sqlx::Error, what: String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what),
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Row Structs
//=========================================================================================

struct UserRow {
    id: String,
    username: String,
    secret: String,
    api_key: Option<String>,
    age: Option<i64>,
    weight: Option<f64>,
    height: Option<f64>,
    activity_level: Option<String>,
    dietary_restrictions: Option<String>,
}

impl UserRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            secret: row.try_get("secret")?,
            api_key: row.try_get("api_key")?,
            age: row.try_get("age")?,
            weight: row.try_get("weight")?,
            height: row.try_get("height")?,
            activity_level: row.try_get("activity_level")?,
            dietary_restrictions: row.try_get("dietary_restrictions")?,
        })
    }

    /// Missing health columns fall back to the profile defaults.
    fn to_domain(self) -> PortResult<UserRecord> {
        let defaults = HealthProfile::default();
        let activity_level = match self.activity_level.as_deref() {
            Some(label) if !label.trim().is_empty() => {
                ActivityLevel::from_str(label).map_err(PortError::Unexpected)?
            }
            _ => defaults.activity_level,
        };
        let dietary_restrictions = match self.dietary_restrictions.as_deref() {
            Some(csv) => restrictions_from_csv(csv).map_err(PortError::Unexpected)?,
            None => defaults.dietary_restrictions,
        };

        Ok(UserRecord {
            id: parse_uuid(&self.id, "user id")?,
            username: self.username,
            api_key: self.api_key.filter(|key| !key.trim().is_empty()),
            health: HealthProfile {
                age: self.age.map(|age| age.max(0) as u32).unwrap_or(defaults.age),
                weight_kg: self.weight.unwrap_or(defaults.weight_kg),
                height_m: self.height.unwrap_or(defaults.height_m),
                activity_level,
                dietary_restrictions,
            },
        })
    }
}

struct SessionRow {
    id: String,
    user_id: String,
    title: String,
    created_at: String,
}

impl SessionRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn to_domain(self) -> PortResult<ChatSession> {
        Ok(ChatSession {
            id: parse_uuid(&self.id, "session id")?,
            user_id: parse_uuid(&self.user_id, "user id")?,
            title: self.title,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

struct TurnRow {
    role: String,
    text: String,
    created_at: String,
}

impl TurnRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            role: row.try_get("role")?,
            text: row.try_get("text")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn to_domain(self) -> PortResult<StoredTurn> {
        Ok(StoredTurn {
            role: Role::from_str(&self.role).map_err(PortError::Unexpected)?,
            text: self.text,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

const USER_COLUMNS: &str =
    "id, username, secret, api_key, age, weight, height, activity_level, dietary_restrictions";

//=========================================================================================
// `ProfileStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ProfileStore for DbAdapter {
    async fn register(
        &self,
        username: &str,
        secret: &str,
        api_key: Option<&str>,
        health: &HealthProfile,
    ) -> PortResult<Uuid> {
        let user_id = Uuid::new_v4();
        let hashed = hash_secret(secret)?;

        sqlx::query(
            "INSERT INTO users (id, username, secret, api_key, age, weight, height, activity_level, dietary_restrictions) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id.to_string())
        .bind(username)
        .bind(hashed)
        .bind(api_key.filter(|key| !key.trim().is_empty()))
        .bind(health.age as i64)
        .bind(health.weight_kg)
        .bind(health.height_m)
        .bind(health.activity_level.label())
        .bind(restrictions_to_csv(&health.dietary_restrictions))
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                PortError::AlreadyExists(format!("Username '{}' is already taken", username))
            }
            _ => unexpected(e),
        })?;

        info!("Registered user {} ({})", username, user_id);
        Ok(user_id)
    }

    async fn authenticate(&self, username: &str, secret: &str) -> PortResult<Option<UserRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE username = ?", USER_COLUMNS))
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let user = UserRow::from_row(&row).map_err(unexpected)?;

        match verify_secret(secret, &user.secret) {
            SecretCheck::Valid => {}
            SecretCheck::ValidLegacy => {
                warn!("User {} still had a plain-text secret; re-hashing it", username);
                sqlx::query("UPDATE users SET secret = ? WHERE id = ?")
                    .bind(hash_secret(secret)?)
                    .bind(&user.id)
                    .execute(&self.pool)
                    .await
                    .map_err(unexpected)?;
            }
            SecretCheck::Invalid => return Ok(None),
        }

        user.to_domain().map(Some)
    }

    async fn update_health(&self, user_id: Uuid, health: &HealthProfile) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE users SET age = ?, weight = ?, height = ?, activity_level = ?, dietary_restrictions = ? \
             WHERE id = ?",
        )
        .bind(health.age as i64)
        .bind(health.weight_kg)
        .bind(health.height_m)
        .bind(health.activity_level.label())
        .bind(restrictions_to_csv(&health.dietary_restrictions))
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<UserRecord> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(user_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| not_found_or_unexpected(e, format!("User {} not found", user_id)))?;
        UserRow::from_row(&row).map_err(unexpected)?.to_domain()
    }
}

//=========================================================================================
// `SessionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionStore for DbAdapter {
    async fn create_session(&self, user_id: Uuid, title: &str) -> PortResult<ChatSession> {
        let session = ChatSession {
            id: Uuid::new_v4(),
            user_id,
            title: title.to_string(),
            created_at: self.next_timestamp(),
        };

        sqlx::query("INSERT INTO chat_sessions (id, user_id, title, created_at) VALUES (?, ?, ?, ?)")
            .bind(session.id.to_string())
            .bind(user_id.to_string())
            .bind(&session.title)
            .bind(format_timestamp(session.created_at))
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                    PortError::NotFound(format!("User {} not found", user_id))
                }
                _ => unexpected(e),
            })?;

        Ok(session)
    }

    async fn list_sessions(&self, user_id: Uuid) -> PortResult<Vec<ChatSession>> {
        let rows = sqlx::query(
            "SELECT id, user_id, title, created_at FROM chat_sessions WHERE user_id = ? \
             ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        rows.iter()
            .map(|row| SessionRow::from_row(row).map_err(unexpected)?.to_domain())
            .collect()
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<ChatSession> {
        let row = sqlx::query("SELECT id, user_id, title, created_at FROM chat_sessions WHERE id = ?")
            .bind(session_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| not_found_or_unexpected(e, format!("Session {} not found", session_id)))?;
        SessionRow::from_row(&row).map_err(unexpected)?.to_domain()
    }

    async fn delete_all_turns(&self, session_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM turns WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        info!("Reset session {}: {} turns removed", session_id, result.rows_affected());
        Ok(())
    }
}

//=========================================================================================
// `MessageStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl MessageStore for DbAdapter {
    async fn append(&self, session_id: Uuid, user_id: Uuid, role: Role, text: &str) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO turns (id, session_id, user_id, role, text, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(session_id.to_string())
        .bind(user_id.to_string())
        .bind(role.as_str())
        .bind(text)
        .bind(format_timestamp(self.next_timestamp()))
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn history(&self, session_id: Uuid) -> PortResult<Vec<StoredTurn>> {
        let rows = sqlx::query(
            "SELECT role, text, created_at FROM turns WHERE session_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let mut turns = rows
            .iter()
            .map(|row| TurnRow::from_row(row).map_err(unexpected)?.to_domain())
            .collect::<PortResult<Vec<_>>>()?;
        // Older rows may use a different text format; order by the parsed time.
        turns.sort_by_key(|turn| turn.created_at);
        Ok(turns)
    }
}

//=========================================================================================
// `AuthSessionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AuthSessionStore for DbAdapter {
    async fn create_auth_session(
        &self,
        auth_session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(auth_session_id)
            .bind(user_id.to_string())
            .bind(format_timestamp(expires_at))
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, auth_session_id: &str) -> PortResult<Uuid> {
        let row = sqlx::query("SELECT user_id, expires_at FROM auth_sessions WHERE id = ?")
            .bind(auth_session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or(PortError::AuthenticationFailed)?;

        let user_id: String = row.try_get("user_id").map_err(unexpected)?;
        let expires_at: String = row.try_get("expires_at").map_err(unexpected)?;
        if parse_timestamp(&expires_at)? <= Utc::now() {
            return Err(PortError::AuthenticationFailed);
        }
        parse_uuid(&user_id, "user id")
    }

    async fn delete_auth_session(&self, auth_session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = ?")
            .bind(auth_session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}
