//! User and credential persistence using SQLite.
//!
//! Token columns hold ciphertext only. Every write runs inside a single
//! immediate transaction while the connection lock is held, so concurrent
//! upserts for the same (user, provider) serialize instead of racing.

use super::{Credential, User};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    subject_id TEXT NOT NULL UNIQUE,
    email TEXT UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS credentials (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id),
    provider_name TEXT NOT NULL,
    access_token TEXT NOT NULL,
    refresh_token TEXT,
    expires_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(user_id, provider_name)
);

CREATE INDEX IF NOT EXISTS idx_credentials_user ON credentials(user_id);
"#;

/// Durable mapping of users and their per-provider token material.
///
/// # Schema
/// - `users`: unique `subject_id`, unique nullable `email`
/// - `credentials`: unique `(user_id, provider_name)`, tokens encrypted by the caller
///
/// # Thread Safety
/// The connection is wrapped in a `Mutex`; each public method takes the lock
/// for its whole read-check-write sequence.
pub struct CredentialStore {
    conn: Mutex<Connection>,
}

impl CredentialStore {
    /// Creates or opens a store at `db_path` (`:memory:` for an ephemeral one).
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to create schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Credential store lock poisoned"))
    }

    /// Looks up a user by subject id, creating it when absent.
    ///
    /// A non-empty `email` that differs from the stored one replaces it. An
    /// absent or empty `email` never clears an existing address. An email
    /// already held by another user is not recorded: the user keeps (or is
    /// created without) an address and a warning is logged.
    pub fn find_or_create_user(&self, subject_id: &str, email: Option<&str>) -> Result<User> {
        let email = email.filter(|e| !e.is_empty());
        let now = Utc::now().to_rfc3339();

        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin transaction")?;

        let email = match email {
            Some(email) => {
                let holder: Option<String> = tx
                    .query_row(
                        "SELECT subject_id FROM users WHERE email = ?1",
                        params![email],
                        |row| row.get(0),
                    )
                    .optional()
                    .context("Failed to look up email")?;

                match holder {
                    Some(holder) if holder != subject_id => {
                        warn!(
                            subject = %subject_id,
                            "Email already belongs to another user; not recording it"
                        );
                        None
                    }
                    _ => Some(email),
                }
            }
            None => None,
        };

        let existing = tx
            .query_row(
                "SELECT id, subject_id, email FROM users WHERE subject_id = ?1",
                params![subject_id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        subject_id: row.get(1)?,
                        email: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to look up user")?;

        let user = match existing {
            Some(mut user) => {
                if let Some(email) = email {
                    if user.email.as_deref() != Some(email) {
                        tx.execute(
                            "UPDATE users SET email = ?1, updated_at = ?2 WHERE id = ?3",
                            params![email, now, user.id],
                        )
                        .context("Failed to update user email")?;
                        debug!(user_id = user.id, "Updated user email");
                        user.email = Some(email.to_string());
                    }
                }
                user
            }
            None => {
                tx.execute(
                    "INSERT INTO users (subject_id, email, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)",
                    params![subject_id, email, now],
                )
                .context("Failed to create user")?;
                let id = tx.last_insert_rowid();
                debug!(user_id = id, "Created user");
                User {
                    id,
                    subject_id: subject_id.to_string(),
                    email: email.map(str::to_string),
                }
            }
        };

        tx.commit().context("Failed to commit user")?;
        Ok(user)
    }

    /// Inserts or overwrites the credential for `(user_id, provider_name)`.
    ///
    /// On conflict the access token, refresh token and expiry are replaced in
    /// place; the row id and creation time are preserved.
    pub fn upsert_credential(
        &self,
        user_id: i64,
        provider_name: &str,
        encrypted_access_token: &str,
        encrypted_refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Credential> {
        let now = Utc::now().to_rfc3339();
        let expires_at_text = expires_at.map(|dt| dt.to_rfc3339());

        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin transaction")?;

        tx.execute(
            r#"
            INSERT INTO credentials (
                user_id, provider_name,
                access_token, refresh_token,
                expires_at, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT(user_id, provider_name) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
            params![
                user_id,
                provider_name,
                encrypted_access_token,
                encrypted_refresh_token,
                expires_at_text,
                now,
            ],
        )
        .context("Failed to upsert credential")?;

        let id: i64 = tx
            .query_row(
                "SELECT id FROM credentials WHERE user_id = ?1 AND provider_name = ?2",
                params![user_id, provider_name],
                |row| row.get(0),
            )
            .context("Failed to read back credential")?;

        tx.commit().context("Failed to commit credential")?;

        Ok(Credential {
            id,
            user_id,
            provider_name: provider_name.to_string(),
            access_token: encrypted_access_token.to_string(),
            refresh_token: encrypted_refresh_token.map(str::to_string),
            expires_at,
        })
    }

    /// Looks up a user by subject id without creating it.
    pub fn get_user_by_subject(&self, subject_id: &str) -> Result<Option<User>> {
        self.conn()?
            .query_row(
                "SELECT id, subject_id, email FROM users WHERE subject_id = ?1",
                params![subject_id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        subject_id: row.get(1)?,
                        email: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to look up user")
    }

    /// Returns the stored (still encrypted) credential for a user and provider.
    pub fn get_credential(&self, user_id: i64, provider_name: &str) -> Result<Option<Credential>> {
        let row = self
            .conn()?
            .query_row(
                r#"
                SELECT id, access_token, refresh_token, expires_at
                FROM credentials
                WHERE user_id = ?1 AND provider_name = ?2
                "#,
                params![user_id, provider_name],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()
            .context("Failed to look up credential")?;

        let Some((id, access_token, refresh_token, expires_at)) = row else {
            return Ok(None);
        };

        let expires_at = expires_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .context("Failed to parse expires_at timestamp")?;

        Ok(Some(Credential {
            id,
            user_id,
            provider_name: provider_name.to_string(),
            access_token,
            refresh_token,
            expires_at,
        }))
    }

    /// Lists provider names a user has credentials for.
    pub fn list_providers_for_user(&self, user_id: i64) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT provider_name FROM credentials WHERE user_id = ?1 ORDER BY provider_name",
            )
            .context("Failed to prepare query")?;

        let providers = stmt
            .query_map(params![user_id], |row| row.get(0))
            .context("Failed to execute query")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to read results")?;

        Ok(providers)
    }

    /// Total number of credential rows.
    pub fn count_credentials(&self) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM credentials", [], |row| row.get(0))
            .context("Failed to count credentials")?;
        Ok(count as u64)
    }

    /// Total number of user rows.
    pub fn count_users(&self) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("Failed to count users")?;
        Ok(count as u64)
    }
}
