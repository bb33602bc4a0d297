//! Encrypted credential storage for linked OAuth accounts.
//!
//! Two layers live here:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - users: find-or-create by subject      │
//! │  - credentials: upsert by (user, provider)│
//! └─────────────────────────────────────────┘
//!                      ↑
//!          (already-encrypted token strings)
//!                      ↑
//! ┌─────────────────────────────────────────┐
//! │       Encryption gateway                 │
//! │  - AES-256-GCM, nonce per value          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The store never sees plaintext tokens. Callers seal values with
//! [`encrypt`] before upserting and open them with [`decrypt`] after reading.
//!
//! # Usage
//!
//! ```no_run
//! use linkage::credentials::{encrypt, validate_key, CredentialStore};
//! use chrono::{Duration, Utc};
//!
//! # fn main() -> anyhow::Result<()> {
//! let key = validate_key(&std::env::var("LINKAGE_ENCRYPTION_KEY")?)?;
//! let store = CredentialStore::new("linkage.db")?;
//!
//! let user = store.find_or_create_user("firebase-uid-1", Some("a@example.com"))?;
//! store.upsert_credential(
//!     user.id,
//!     "outlook",
//!     &encrypt("access-token", &key)?,
//!     Some(&encrypt("refresh-token", &key)?),
//!     Some(Utc::now() + Duration::hours(1)),
//! )?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;

mod encryption;
mod storage;

pub use encryption::{decrypt, encrypt, generate_key, validate_key, KEY_SIZE};
pub use storage::CredentialStore;

/// A person known to this service, keyed by the identity provider's subject id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    /// Stable subject identifier issued by the identity verifier
    pub subject_id: String,
    pub email: Option<String>,
}

/// Token material for one (user, provider) link, as stored.
///
/// `access_token` and `refresh_token` hold ciphertext produced by [`encrypt`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub id: i64,
    pub user_id: i64,
    pub provider_name: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Absolute expiry of the access token; `None` when the provider gave none
    pub expires_at: Option<DateTime<Utc>>,
}
