//! Explicitly constructed application context.
//!
//! [`AuthContext`] is the single access path to the session manager. It
//! starts empty and must be initialized before use; using it earlier is a
//! [`ClientError::NotInitialized`] error rather than a silent default.
//!
//! [`AppContext`] wires every component from a [`ClientConfig`] and owns
//! their lifecycle: build, [`AppContext::initialize`],
//! [`AppContext::shutdown`].

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use crate::api::{HttpApi, RestaurantApi};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::geo::{FixedPositionSource, GeolocationProvider, PositionSource};
use crate::models::{Credentials, Registration, User};
use crate::optimistic::OptimisticFlags;
use crate::query::{AutoRefresh, QueryCache};
use crate::restaurants::RestaurantService;
use crate::session::{SessionManager, TokenGuard};
use crate::storage::{FileStore, KeyValueStore};
use crate::theme::ThemeStore;
use crate::token::TokenStore;

/// Distributes the session manager to the rest of the application.
#[derive(Default)]
pub struct AuthContext {
    slot: ArcSwapOption<SessionManager>,
}

impl AuthContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&self, manager: SessionManager) {
        self.slot.store(Some(Arc::new(manager)));
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.load().is_some()
    }

    /// The session manager, or `NotInitialized`.
    pub fn session(&self) -> Result<Arc<SessionManager>> {
        self.slot.load_full().ok_or(ClientError::NotInitialized)
    }

    /// Empty the slot and stop the manager's background work.
    pub fn teardown(&self) -> Option<Arc<SessionManager>> {
        let previous = self.slot.swap(None);
        if let Some(manager) = &previous {
            manager.shutdown();
        }
        previous
    }
}

/// Builder for [`AppContext`]. Unset parts get their production default.
pub struct AppContextBuilder {
    config: ClientConfig,
    storage: Option<Arc<dyn KeyValueStore>>,
    api: Option<Arc<dyn RestaurantApi>>,
    position_source: Option<Arc<dyn PositionSource>>,
}

impl AppContextBuilder {
    pub fn storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn api(mut self, api: Arc<dyn RestaurantApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn position_source(mut self, source: Arc<dyn PositionSource>) -> Self {
        self.position_source = Some(source);
        self
    }

    pub fn build(self) -> Result<AppContext> {
        self.config.validate()?;
        let config = self.config;

        let storage: Arc<dyn KeyValueStore> = match self.storage {
            Some(storage) => storage,
            None => match &config.storage.path {
                Some(path) => Arc::new(FileStore::open(path)?),
                None => Arc::new(FileStore::open_default()?),
            },
        };

        let tokens = TokenStore::new(
            storage.clone(),
            config.storage.token_key.clone(),
            config.storage.user_key.clone(),
        );
        let api: Arc<dyn RestaurantApi> = match self.api {
            Some(api) => api,
            None => Arc::new(HttpApi::new(&config.api, Some(tokens.clone()))?),
        };

        let session = SessionManager::new(api.clone(), tokens, config.session.clone());
        let guard: Arc<dyn TokenGuard> = Arc::new(session.clone());
        let cache = QueryCache::new(config.cache.clone(), Some(guard.clone()));
        let restaurants = RestaurantService::new(
            api,
            cache.clone(),
            Arc::new(OptimisticFlags::new()),
            guard,
        );

        let source = self
            .position_source
            .unwrap_or_else(|| Arc::new(FixedPositionSource::unavailable()));
        let geolocation =
            GeolocationProvider::new(source, storage.clone(), config.geolocation.clone());
        let theme = ThemeStore::new(storage.clone(), config.storage.theme_key.clone());

        Ok(AppContext {
            config,
            storage,
            auth: AuthContext::new(),
            session,
            cache,
            restaurants,
            geolocation,
            theme,
            auto_refresh: Mutex::new(None),
        })
    }
}

pub struct AppContext {
    config: ClientConfig,
    storage: Arc<dyn KeyValueStore>,
    auth: AuthContext,
    session: SessionManager,
    cache: QueryCache,
    restaurants: RestaurantService,
    geolocation: GeolocationProvider,
    theme: ThemeStore,
    auto_refresh: Mutex<Option<AutoRefresh>>,
}

impl AppContext {
    pub fn builder(config: ClientConfig) -> AppContextBuilder {
        AppContextBuilder {
            config,
            storage: None,
            api: None,
            position_source: None,
        }
    }

    /// Restore the stored session, publish it through the auth context and
    /// start background cache maintenance.
    pub async fn initialize(&self) {
        self.session.initialize().await;
        self.auth.initialize(self.session.clone());
        *self.auto_refresh.lock() = Some(AutoRefresh::start(&self.cache));
        tracing::debug!(
            authenticated = self.session.is_authenticated(),
            "Application context initialized"
        );
    }

    /// Stop background work and empty the auth context.
    pub fn shutdown(&self) {
        if let Some(refresh) = self.auto_refresh.lock().take() {
            refresh.stop();
        }
        self.auth.teardown();
        tracing::debug!("Application context shut down");
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn KeyValueStore> {
        &self.storage
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    /// Shorthand for `auth().session()`.
    pub fn session(&self) -> Result<Arc<SessionManager>> {
        self.auth.session()
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn restaurants(&self) -> &RestaurantService {
        &self.restaurants
    }

    pub fn geolocation(&self) -> &GeolocationProvider {
        &self.geolocation
    }

    pub fn theme(&self) -> &ThemeStore {
        &self.theme
    }

    /// Sign in. Cached data and like overrides of the previous user are
    /// dropped.
    pub async fn login(&self, credentials: &Credentials) -> Result<User> {
        let user = self.session()?.login(credentials).await?;
        self.forget_user_data();
        Ok(user)
    }

    pub async fn register(&self, registration: &Registration) -> Result<User> {
        let user = self.session()?.register(registration).await?;
        self.forget_user_data();
        Ok(user)
    }

    /// Sign out and drop every cached response and like override.
    pub async fn logout(&self) -> Result<()> {
        self.session()?.logout().await;
        self.forget_user_data();
        Ok(())
    }

    fn forget_user_data(&self) {
        self.cache.reset();
        self.restaurants.flags().clear();
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
