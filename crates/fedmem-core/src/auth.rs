//! Authentication.
//!
//! Three credential shapes, resolved in order: opaque URL token, API key,
//! OAuth bearer validated by an external authority. The output is either a
//! full [`UserContext`] or unauthenticated — never a partial principal.
//! This crate only consumes token validation; issuance lives elsewhere.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{MemoryError, Result};
use crate::memory::{fmt_ts, parse_ts};
use crate::storage::Database;

/// Fixed prefix distinguishing API keys from OAuth bearers.
pub const API_KEY_PREFIX: &str = "fmk_";

/// Resolved principal attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// One row in the `users` table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    #[serde(skip_serializing)]
    pub opaque_token: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&UserRecord> for UserContext {
    fn from(user: &UserRecord) -> Self {
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
            display_name: user.name.clone(),
        }
    }
}

// ============================================================================
// USER STORE
// ============================================================================

pub struct UserStore {
    db: Arc<Database>,
}

impl UserStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a user with a fresh opaque token. Users are created once and
    /// never re-keyed.
    pub fn create(&self, email: Option<&str>, name: Option<&str>) -> Result<UserRecord> {
        let now = Utc::now();
        let record = UserRecord {
            id: Uuid::new_v4().to_string(),
            // 32 URL-safe chars, comfortably past the 20-char token floor.
            opaque_token: Uuid::new_v4().simple().to_string(),
            email: email.map(str::to_string),
            name: name.map(str::to_string),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.db.with_writer(|conn| {
            conn.execute(
                "INSERT INTO users (id, opaque_token, email, name, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
                params![
                    record.id,
                    record.opaque_token,
                    record.email,
                    record.name,
                    fmt_ts(now)
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Result<Option<UserRecord>> {
        self.query_one("id = ?1", id)
    }

    /// Active users only — inactive users resolve as unauthenticated.
    pub fn get_by_opaque_token(&self, token: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .query_one("opaque_token = ?1", token)?
            .filter(|u| u.is_active))
    }

    pub fn deactivate(&self, id: &str) -> Result<bool> {
        self.db.with_writer(|conn| {
            let n = conn.execute(
                "UPDATE users SET is_active = 0, updated_at = ?2 WHERE id = ?1",
                params![id, fmt_ts(Utc::now())],
            )?;
            Ok(n > 0)
        })
    }

    fn query_one(&self, predicate: &str, value: &str) -> Result<Option<UserRecord>> {
        self.db.with_reader(|conn| {
            conn.query_row(
                &format!(
                    "SELECT id, opaque_token, email, name, is_active, created_at, updated_at
                     FROM users WHERE {predicate}"
                ),
                params![value],
                map_user,
            )
            .optional()
            .map_err(Into::into)
        })
    }
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    Ok(UserRecord {
        id: row.get(0)?,
        opaque_token: row.get(1)?,
        email: row.get(2)?,
        name: row.get(3)?,
        is_active: row.get::<_, i64>(4)? != 0,
        created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_ts(&updated_at).unwrap_or_else(Utc::now),
    })
}

// ============================================================================
// API KEYS
// ============================================================================

pub struct ApiKeyStore {
    db: Arc<Database>,
}

impl ApiKeyStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Issue a key for a user. The plaintext is returned exactly once; only
    /// its sha256 digest is stored.
    pub fn issue(
        &self,
        user_id: &str,
        name: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<String> {
        let plaintext = format!(
            "{API_KEY_PREFIX}{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        );
        let now = Utc::now();
        let expires_at = ttl.map(|ttl| fmt_ts(now + ttl));
        self.db.with_writer(|conn| {
            conn.execute(
                "INSERT INTO api_keys (id, user_id, key_hash, name, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    user_id,
                    digest_hex(&plaintext),
                    name,
                    expires_at,
                    fmt_ts(now)
                ],
            )?;
            Ok(())
        })?;
        Ok(plaintext)
    }

    /// Resolve a plaintext key to its (active) owner, checking expiry.
    pub fn resolve(&self, key: &str) -> Result<Option<UserRecord>> {
        let hash = digest_hex(key);
        let row: Option<(String, Option<String>)> = self.db.with_reader(|conn| {
            conn.query_row(
                "SELECT user_id, expires_at FROM api_keys WHERE key_hash = ?1",
                params![hash],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(Into::into)
        })?;
        let Some((user_id, expires_at)) = row else {
            return Ok(None);
        };
        if let Some(expiry) = expires_at.as_deref().and_then(parse_ts) {
            if expiry <= Utc::now() {
                return Ok(None);
            }
        }
        let users = UserStore::new(self.db.clone());
        Ok(users.get(&user_id)?.filter(|u| u.is_active))
    }
}

fn digest_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ============================================================================
// EXTERNAL TOKEN AUTHORITY
// ============================================================================

/// Outcome of validating an OAuth access token with the external authority.
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    pub user_id: String,
    pub scope: String,
}

/// Interface to the external OAuth collaborator's `validateAccessToken`.
/// This crate never issues tokens; it only consumes validation.
#[async_trait]
pub trait TokenAuthority: Send + Sync {
    async fn validate_access_token(&self, token: &str) -> Result<Option<ValidatedToken>>;
}

/// Deny-all authority for deployments without an OAuth collaborator.
pub struct StaticTokenAuthority;

#[async_trait]
impl TokenAuthority for StaticTokenAuthority {
    async fn validate_access_token(&self, _token: &str) -> Result<Option<ValidatedToken>> {
        Ok(None)
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

/// A credential as it arrives at a transport.
#[derive(Debug, Clone, Copy)]
pub enum Credential<'a> {
    /// Opaque token embedded in the URL path.
    UrlToken(&'a str),
    /// `Authorization: Bearer <value>` — API key or OAuth token.
    Bearer(&'a str),
}

fn url_token_shape() -> &'static Regex {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    SHAPE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{20,}$").expect("static regex"))
}

/// Resolves credentials into user contexts, in the fixed shape order.
pub struct AuthResolver {
    users: UserStore,
    api_keys: ApiKeyStore,
    authority: Arc<dyn TokenAuthority>,
}

impl AuthResolver {
    pub fn new(db: Arc<Database>, authority: Arc<dyn TokenAuthority>) -> Self {
        Self {
            users: UserStore::new(db.clone()),
            api_keys: ApiKeyStore::new(db),
            authority,
        }
    }

    /// Resolve a credential. `Ok(None)` is the explicit unauthenticated
    /// marker; errors are storage-level only.
    pub async fn resolve(&self, credential: Credential<'_>) -> Result<Option<UserContext>> {
        match credential {
            Credential::UrlToken(token) => {
                if !url_token_shape().is_match(token) {
                    return Ok(None);
                }
                Ok(self
                    .users
                    .get_by_opaque_token(token)?
                    .map(|u| UserContext::from(&u)))
            }
            Credential::Bearer(value) => {
                if value.starts_with(API_KEY_PREFIX) {
                    return Ok(self.api_keys.resolve(value)?.map(|u| UserContext::from(&u)));
                }
                match self.authority.validate_access_token(value).await? {
                    Some(validated) => Ok(self
                        .users
                        .get(&validated.user_id)?
                        .filter(|u| u.is_active)
                        .map(|u| UserContext::from(&u))),
                    None => Ok(None),
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
