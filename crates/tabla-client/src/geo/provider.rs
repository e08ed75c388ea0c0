use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::watch;

use super::{GeoError, PermissionState, Position, PositionOptions, PositionSource};
use crate::config::GeolocationConfig;
use crate::error::StorageError;
use crate::storage::{KeyValueStore, read_json, write_json};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeolocationState {
    pub position: Option<Position>,
    pub is_loading: bool,
    pub error: Option<GeoError>,
}

/// Owns the last known position and its persisted copy.
pub struct GeolocationProvider {
    source: Arc<dyn PositionSource>,
    store: Arc<dyn KeyValueStore>,
    config: GeolocationConfig,
    state: watch::Sender<GeolocationState>,
}

impl GeolocationProvider {
    /// Create the provider and restore the persisted position. A stored
    /// position older than the configured max age, or one that cannot be
    /// read, is dropped from storage.
    pub fn new(
        source: Arc<dyn PositionSource>,
        store: Arc<dyn KeyValueStore>,
        config: GeolocationConfig,
    ) -> Self {
        let provider = Self {
            source,
            store,
            config,
            state: watch::channel(GeolocationState::default()).0,
        };
        let restored = provider.load_stored(OffsetDateTime::now_utc());
        provider.state.send_modify(|s| s.position = restored);
        provider
    }

    fn load_stored(&self, now: OffsetDateTime) -> Option<Position> {
        let key = &self.config.storage_key;
        let stored: Result<Option<Position>, StorageError> = read_json(self.store.as_ref(), key);
        match stored {
            Ok(Some(position)) if !position.is_older_than(self.config.max_age, now) => {
                tracing::debug!(timestamp = %position.timestamp, "Restored stored location");
                Some(position)
            }
            Ok(Some(_)) => {
                tracing::debug!("Stored location expired, dropping it");
                self.remove_stored();
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Stored location is unreadable, dropping it");
                self.remove_stored();
                None
            }
        }
    }

    fn remove_stored(&self) {
        if let Err(e) = self.store.remove(&self.config.storage_key) {
            tracing::warn!(error = %e, "Failed to remove stored location");
        }
    }

    pub fn state(&self) -> GeolocationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GeolocationState> {
        self.state.subscribe()
    }

    /// Query the permission without requesting a position.
    pub async fn check_permission(&self) -> PermissionState {
        self.source.permission().await
    }

    /// Known position, unless older than the configured max age.
    pub fn position(&self) -> Option<Position> {
        self.position_at(OffsetDateTime::now_utc())
    }

    pub fn position_at(&self, now: OffsetDateTime) -> Option<Position> {
        self.state
            .borrow()
            .position
            .filter(|p| !p.is_older_than(self.config.max_age, now))
    }

    pub fn has_location(&self) -> bool {
        self.position().is_some()
    }

    pub fn has_location_at(&self, now: OffsetDateTime) -> bool {
        self.position_at(now).is_some()
    }

    /// Request the current position.
    ///
    /// A remembered fix younger than `options.maximum_age` is returned as
    /// is. Otherwise the platform is asked, bounded by `options.timeout`.
    /// Failures are recorded in the state and returned; nothing is retried.
    pub async fn get_current_position(&self, options: PositionOptions) -> Result<Position, GeoError> {
        let now = OffsetDateTime::now_utc();
        let remembered = self.state.borrow().position;
        if let Some(position) = remembered
            && !position.is_older_than(options.maximum_age, now)
        {
            return Ok(position);
        }

        self.state.send_modify(|s| {
            s.is_loading = true;
            s.error = None;
        });

        let result = tokio::time::timeout(
            options.timeout,
            self.source.current_position(options.high_accuracy),
        )
        .await
        .unwrap_or(Err(GeoError::Timeout));

        match result {
            Ok(position) => {
                if let Err(e) = write_json(self.store.as_ref(), &self.config.storage_key, &position) {
                    tracing::warn!(error = %e, "Failed to persist location");
                }
                tracing::info!(
                    latitude = position.latitude,
                    longitude = position.longitude,
                    "Location updated"
                );
                self.state.send_replace(GeolocationState {
                    position: Some(position),
                    is_loading: false,
                    error: None,
                });
                Ok(position)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Location request failed");
                self.state.send_modify(|s| {
                    s.is_loading = false;
                    s.error = Some(e.clone());
                });
                Err(e)
            }
        }
    }

    /// Forget the position, in memory and in storage.
    pub fn clear_stored_location(&self) {
        self.remove_stored();
        self.state.send_replace(GeolocationState::default());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::geo::{Coordinates, FixedPositionSource};
    use crate::storage::MemoryStore;

    const KEY: &str = "tabla_user_location";

    enum Behavior {
        Fix(Coordinates),
        Deny,
        Hang,
    }

    struct ScriptedSource {
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PositionSource for ScriptedSource {
        async fn permission(&self) -> PermissionState {
            match self.behavior {
                Behavior::Deny => PermissionState::Denied,
                _ => PermissionState::Granted,
            }
        }

        async fn current_position(&self, _high_accuracy: bool) -> Result<Position, GeoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Fix(at) => Ok(Position::new(at, Some(15.0), OffsetDateTime::now_utc())),
                Behavior::Deny => Err(GeoError::PermissionDenied),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(GeoError::PositionUnavailable("unreachable".into()))
                }
            }
        }
    }

    fn provider(source: Arc<dyn PositionSource>, store: Arc<MemoryStore>) -> GeolocationProvider {
        GeolocationProvider::new(source, store, GeolocationConfig::default())
    }

    fn stored(store: &MemoryStore, age: time::Duration) {
        let position = Position::new(
            Coordinates::new(38.7, -9.1),
            None,
            OffsetDateTime::now_utc() - age,
        );
        write_json(store, KEY, &position).unwrap();
    }

    #[tokio::test]
    async fn test_success_persists_position() {
        let store = Arc::new(MemoryStore::new());
        let source = ScriptedSource::new(Behavior::Fix(Coordinates::new(41.1, -8.6)));
        let geo = provider(source.clone(), store.clone());
        assert!(!geo.has_location());

        let fix = geo.get_current_position(PositionOptions::default()).await.unwrap();
        assert_eq!(fix.coordinates(), Coordinates::new(41.1, -8.6));
        assert!(geo.has_location());
        assert_eq!(geo.state().error, None);
        assert!(!geo.state().is_loading);

        let persisted: Position = read_json(store.as_ref(), KEY).unwrap().unwrap();
        assert_eq!(persisted, fix);
    }

    #[tokio::test]
    async fn test_recent_fix_is_reused() {
        let store = Arc::new(MemoryStore::new());
        let source = ScriptedSource::new(Behavior::Fix(Coordinates::new(0.0, 0.0)));
        let geo = provider(source.clone(), store);

        geo.get_current_position(PositionOptions::default()).await.unwrap();
        geo.get_current_position(PositionOptions::default()).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let fresh = PositionOptions::default().with_maximum_age(Duration::ZERO);
        geo.get_current_position(fresh).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permission_denied_is_recorded() {
        let store = Arc::new(MemoryStore::new());
        let source = ScriptedSource::new(Behavior::Deny);
        let geo = provider(source.clone(), store.clone());

        assert_eq!(geo.check_permission().await, PermissionState::Denied);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        let err = geo
            .get_current_position(PositionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, GeoError::PermissionDenied);
        assert_eq!(geo.state().error, Some(GeoError::PermissionDenied));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let store = Arc::new(MemoryStore::new());
        let geo = provider(ScriptedSource::new(Behavior::Hang), store);

        let options = PositionOptions::default().with_timeout(Duration::from_secs(10));
        let err = geo.get_current_position(options).await.unwrap_err();
        assert_eq!(err, GeoError::Timeout);
        assert!(!geo.state().is_loading);
    }

    #[tokio::test]
    async fn test_stored_location_older_than_a_day_is_dropped() {
        let store = Arc::new(MemoryStore::new());
        stored(&store, time::Duration::hours(25));

        let geo = provider(Arc::new(FixedPositionSource::unavailable()), store.clone());
        assert!(!geo.has_location());
        assert_eq!(store.get(KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_recent_stored_location_is_restored() {
        let store = Arc::new(MemoryStore::new());
        stored(&store, time::Duration::hours(2));

        let geo = provider(Arc::new(FixedPositionSource::unavailable()), store);
        assert!(geo.has_location());
        assert!(!geo.has_location_at(OffsetDateTime::now_utc() + time::Duration::hours(23)));
    }

    #[tokio::test]
    async fn test_unreadable_stored_location_is_dropped() {
        let store = Arc::new(MemoryStore::new());
        store.set(KEY, "{\"latitude\": \"north\"}").unwrap();

        let geo = provider(Arc::new(FixedPositionSource::unavailable()), store.clone());
        assert!(!geo.has_location());
        assert_eq!(store.get(KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_stored_location() {
        let store = Arc::new(MemoryStore::new());
        let geo = provider(
            Arc::new(FixedPositionSource::new(Coordinates::new(1.0, 1.0))),
            store.clone(),
        );
        geo.get_current_position(PositionOptions::default()).await.unwrap();
        assert!(!store.is_empty());

        geo.clear_stored_location();
        assert!(!geo.has_location());
        assert!(store.is_empty());
        assert_eq!(geo.state(), GeolocationState::default());
    }
}
