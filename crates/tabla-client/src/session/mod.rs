//! Auth Session Manager.
//!
//! Owns the in-memory [`Session`] and every operation that changes it:
//! login, registration, logout, profile refresh and the access-token
//! lifecycle. Observers follow changes through [`SessionManager::subscribe`].
//!
//! # Token lifecycle
//!
//! - [`SessionManager::should_refresh_token`] is true once the stored
//!   token's remaining lifetime drops below `refresh_threshold`.
//! - [`SessionManager::ensure_valid_token`] refreshes when needed and logs
//!   out when the refresh fails. Refreshes are serialized, so concurrent or
//!   back-to-back calls issue at most one refresh request.
//! - While authenticated, a background timer calls `ensure_valid_token`
//!   every `refresh_interval`.

mod refresher;

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::watch;

use crate::api::RestaurantApi;
use crate::config::SessionConfig;
use crate::error::{ApiError, ClientError, Result};
use crate::models::{AuthResponse, Credentials, Registration, User};
use crate::token::{TokenRecord, TokenStore};

use refresher::RefreshTimer;

/// Authentication state shown to the rest of the application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// Gate every authenticated request passes through.
#[async_trait]
pub trait TokenGuard: Send + Sync {
    /// Make sure the stored token is usable. `false` means the session was
    /// ended and the request should not be attempted.
    async fn ensure_valid_token(&self) -> bool;
}

pub(crate) struct SessionInner {
    api: Arc<dyn RestaurantApi>,
    tokens: TokenStore,
    config: SessionConfig,
    state: watch::Sender<Session>,
    refresh_lock: tokio::sync::Mutex<()>,
    refresher: parking_lot::Mutex<Option<RefreshTimer>>,
}

/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(api: Arc<dyn RestaurantApi>, tokens: TokenStore, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(Session::default());
        Self {
            inner: Arc::new(SessionInner {
                api,
                tokens,
                config,
                state,
                refresh_lock: tokio::sync::Mutex::new(()),
                refresher: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner.state.borrow().user.clone()
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.inner.tokens
    }

    /// Restore a session from the Token Store.
    ///
    /// Never fails: any problem on this path leaves the session
    /// unauthenticated and not loading.
    pub async fn initialize(&self) {
        self.inner.state.send_modify(|s| s.is_loading = true);

        let restored = match self.restore().await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(error = %e, "Could not restore session, starting signed out");
                if let Err(e) = self.inner.tokens.clear() {
                    tracing::warn!(error = %e, "Failed to clear unusable stored session");
                }
                None
            }
        };

        match restored {
            Some(user) => {
                tracing::info!(user_id = %user.id, "Session restored");
                self.set_authenticated(user);
            }
            None => {
                self.inner.state.send_replace(Session::default());
            }
        }
    }

    async fn restore(&self) -> Result<Option<User>> {
        let Some(record) = self.inner.tokens.load()? else {
            return Ok(None);
        };

        if record.is_expired_at(OffsetDateTime::now_utc()) {
            if record.refresh_token.is_none() {
                tracing::debug!("Stored token expired and no refresh token is available");
                self.inner.tokens.clear()?;
                return Ok(None);
            }
            self.refresh_token().await?;
        }

        let stored_user = match self.inner.tokens.load_user() {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable stored user");
                None
            }
        };

        match self.inner.api.current_user().await {
            Ok(user) => {
                self.inner.tokens.save_user(&user)?;
                Ok(Some(user))
            }
            Err(e) if e.is_unauthorized() => Err(e.into()),
            Err(e) => {
                tracing::warn!(error = %e, "Profile refresh failed, using stored profile");
                Ok(stored_user)
            }
        }
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<User> {
        tracing::debug!(email = %credentials.email, "Logging in");
        self.begin_attempt();
        let result = self.inner.api.login(credentials).await;
        self.complete_authentication(result)
    }

    pub async fn register(&self, registration: &Registration) -> Result<User> {
        tracing::debug!(email = %registration.email, "Registering");
        self.begin_attempt();
        let result = self.inner.api.register(registration).await;
        self.complete_authentication(result)
    }

    fn begin_attempt(&self) {
        self.inner.state.send_modify(|s| {
            s.is_loading = true;
            s.error = None;
        });
    }

    fn complete_authentication(
        &self,
        result: std::result::Result<AuthResponse, ApiError>,
    ) -> Result<User> {
        let stored = result.map_err(ClientError::from).and_then(|resp| {
            let record =
                TokenRecord::from_grant(&resp.grant(), None, OffsetDateTime::now_utc());
            self.inner.tokens.save(&record)?;
            self.inner.tokens.save_user(&resp.user)?;
            Ok(resp.user)
        });

        match stored {
            Ok(user) => {
                tracing::info!(user_id = %user.id, "Signed in");
                self.set_authenticated(user.clone());
                Ok(user)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Authentication failed");
                let message = e.user_message();
                self.inner.state.send_modify(|s| {
                    s.is_loading = false;
                    s.error = Some(message);
                });
                Err(e)
            }
        }
    }

    fn set_authenticated(&self, user: User) {
        self.inner.state.send_replace(Session {
            user: Some(user),
            is_authenticated: true,
            is_loading: false,
            error: None,
        });
        self.start_refresh_timer();
    }

    /// End the session locally. The remote logout is best effort.
    pub async fn logout(&self) {
        self.stop_refresh_timer();

        if self.inner.tokens.access_token().is_some()
            && let Err(e) = self.inner.api.logout().await
        {
            tracing::warn!(error = %e, "Remote logout failed");
        }
        if let Err(e) = self.inner.tokens.clear() {
            tracing::warn!(error = %e, "Failed to clear token store");
        }
        self.inner.state.send_replace(Session::default());
        tracing::info!("Signed out");
    }

    /// Exchange the refresh credential for a new access token.
    ///
    /// The caller decides what a failure means (usually: log out).
    pub async fn refresh_token(&self) -> Result<()> {
        let record = self
            .inner
            .tokens
            .load()?
            .ok_or(ClientError::NotAuthenticated)?;
        let grant = self
            .inner
            .api
            .refresh(record.refresh_credential())
            .await?;
        let refreshed = TokenRecord::from_grant(&grant, Some(&record), OffsetDateTime::now_utc());
        self.inner.tokens.save(&refreshed)?;
        tracing::debug!(expires_at = ?refreshed.expires_at, "Access token refreshed");
        Ok(())
    }

    /// True when the stored token's remaining lifetime is below the threshold.
    pub fn should_refresh_token(&self) -> bool {
        let threshold = time::Duration::try_from(self.inner.config.refresh_threshold)
            .unwrap_or(time::Duration::MAX);
        match self.inner.tokens.load() {
            Ok(Some(record)) => record
                .remaining_at(OffsetDateTime::now_utc())
                .is_some_and(|remaining| remaining < threshold),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Stored token is unreadable");
                false
            }
        }
    }

    /// Refresh the token when it is close to expiry.
    ///
    /// Returns `false` when the refresh failed and the session was ended.
    pub async fn ensure_valid_token(&self) -> bool {
        if !self.is_authenticated() || !self.should_refresh_token() {
            return true;
        }

        let _guard = self.inner.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited.
        if !self.is_authenticated() {
            return false;
        }
        if !self.should_refresh_token() {
            return true;
        }

        match self.refresh_token().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed, signing out");
                self.logout().await;
                false
            }
        }
    }

    /// Re-fetch the current user's profile.
    pub async fn refresh_profile(&self) -> Result<User> {
        if !self.is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }
        let user = self.inner.api.current_user().await?;
        self.inner.tokens.save_user(&user)?;
        self.inner
            .state
            .send_modify(|s| s.user = Some(user.clone()));
        Ok(user)
    }

    pub fn clear_error(&self) {
        self.inner.state.send_if_modified(|s| s.error.take().is_some());
    }

    pub fn is_refresh_timer_running(&self) -> bool {
        self.inner
            .refresher
            .lock()
            .as_ref()
            .is_some_and(RefreshTimer::is_running)
    }

    fn start_refresh_timer(&self) {
        let timer = RefreshTimer::start(
            Arc::downgrade(&self.inner),
            self.inner.config.refresh_interval,
        );
        // Replacing an old timer drops (and stops) it.
        *self.inner.refresher.lock() = Some(timer);
    }

    fn stop_refresh_timer(&self) {
        if let Some(timer) = self.inner.refresher.lock().take() {
            timer.stop();
        }
    }

    /// Stop background work without touching stored credentials.
    pub fn shutdown(&self) {
        self.stop_refresh_timer();
    }
}

#[async_trait]
impl TokenGuard for SessionManager {
    async fn ensure_valid_token(&self) -> bool {
        SessionManager::ensure_valid_token(self).await
    }
}
