//! Token Store: the persisted access token, its refresh metadata, and the
//! last known user profile.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::error::StorageError;
use crate::models::{TokenGrant, User};
use crate::storage::{KeyValueStore, read_json, write_json};

/// Access token plus the metadata needed to decide when to refresh it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    /// Unknown when the API sent no lifetime and the token is not a JWT.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,
}

impl TokenRecord {
    /// Build a record from a login/register/refresh grant.
    ///
    /// Expiry comes from `expires_in` when present, else from the JWT `exp`
    /// claim. An `expires_in` too large to represent counts as unknown. A
    /// refresh grant without a new refresh token keeps `previous`'s.
    pub fn from_grant(
        grant: &TokenGrant,
        previous: Option<&TokenRecord>,
        now: OffsetDateTime,
    ) -> Self {
        let expires_at = grant
            .expires_in
            .and_then(|secs| {
                let secs = i64::try_from(secs).ok()?;
                now.checked_add(Duration::seconds(secs))
            })
            .or_else(|| jwt_expiry(&grant.token));
        let refresh_token = grant
            .refresh_token
            .clone()
            .or_else(|| previous.and_then(|p| p.refresh_token.clone()));
        Self {
            access_token: grant.token.clone(),
            refresh_token,
            issued_at: now,
            expires_at,
        }
    }

    /// Remaining lifetime at `now`. `None` when the expiry is unknown.
    pub fn remaining_at(&self, now: OffsetDateTime) -> Option<Duration> {
        self.expires_at.map(|exp| exp - now)
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.remaining_at(now).is_some_and(|d| d <= Duration::ZERO)
    }

    /// Credential sent to the refresh endpoint: the refresh token when one
    /// was issued, otherwise the access token itself.
    pub fn refresh_credential(&self) -> &str {
        self.refresh_token.as_deref().unwrap_or(&self.access_token)
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Deserialize)]
struct ExpClaim {
    exp: i64,
}

/// Read the `exp` claim of a JWT without verifying it.
fn jwt_expiry(token: &str) -> Option<OffsetDateTime> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claim: ExpClaim = serde_json::from_slice(&bytes).ok()?;
    OffsetDateTime::from_unix_timestamp(claim.exp).ok()
}

/// Persists the token record and user profile under fixed keys.
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
    token_key: String,
    user_key: String,
}

impl TokenStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        token_key: impl Into<String>,
        user_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            token_key: token_key.into(),
            user_key: user_key.into(),
        }
    }

    pub fn load(&self) -> Result<Option<TokenRecord>, StorageError> {
        read_json(self.store.as_ref(), &self.token_key)
    }

    pub fn save(&self, record: &TokenRecord) -> Result<(), StorageError> {
        write_json(self.store.as_ref(), &self.token_key, record)
    }

    /// Current access token, if one is stored and readable.
    pub fn access_token(&self) -> Option<String> {
        match self.load() {
            Ok(record) => record.map(|r| r.access_token),
            Err(e) => {
                tracing::warn!(error = %e, "Stored token is unreadable");
                None
            }
        }
    }

    pub fn load_user(&self) -> Result<Option<User>, StorageError> {
        read_json(self.store.as_ref(), &self.user_key)
    }

    pub fn save_user(&self, user: &User) -> Result<(), StorageError> {
        write_json(self.store.as_ref(), &self.user_key, user)
    }

    /// Remove token and user.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(&self.token_key)?;
        self.store.remove(&self.user_key)?;
        Ok(())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.store.get(&self.token_key)?.is_none() && self.store.get(&self.user_key)?.is_none())
    }
}
