//! Restaurant data service: the operations UI actions call.
//!
//! Reads go through the [`QueryCache`]; likes go through the
//! [`OptimisticFlags`] controller. Every request is preceded by a token
//! validity check.

use std::sync::Arc;

use time::Date;

use crate::api::RestaurantApi;
use crate::error::{ClientError, Result};
use crate::geo::{Coordinates, sort_by_distance};
use crate::models::{
    Id, ListEnvelope, Restaurant, RestaurantFilters, Review, TimeSlot, TimeSlotPeriods, User,
    flatten_time_slots,
};
use crate::optimistic::{FlagEvent, OptimisticFlags};
use crate::query::{QueryCache, QueryHandle, QueryKey, typed_loader};
use crate::session::TokenGuard;

/// Cache keys used by the service.
pub mod keys {
    use super::*;

    pub fn restaurants() -> QueryKey {
        QueryKey::new("restaurants")
    }

    /// Prefix of every restaurant list, whatever its filters.
    pub fn restaurant_lists() -> QueryKey {
        restaurants().segment("list")
    }

    pub fn restaurant_list(filters: &RestaurantFilters) -> QueryKey {
        restaurant_lists().params(filters.query_pairs())
    }

    pub fn restaurant(id: &Id) -> QueryKey {
        restaurants().segment("detail").segment(id)
    }

    pub fn my_reviews() -> QueryKey {
        QueryKey::new("reviews").segment("me")
    }

    pub fn user(id: &Id) -> QueryKey {
        QueryKey::new("users").segment(id)
    }

    pub fn time_slots(id: &Id, date: Date, party_size: u32) -> QueryKey {
        QueryKey::new("time-slots")
            .segment(id)
            .params([("date", date.to_string()), ("party_size", party_size.to_string())])
    }
}

/// A restaurant with its distance from the search origin.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyRestaurant {
    pub restaurant: Restaurant,
    pub distance_km: f64,
}

#[derive(Clone)]
pub struct RestaurantService {
    api: Arc<dyn RestaurantApi>,
    cache: QueryCache,
    flags: Arc<OptimisticFlags>,
    guard: Arc<dyn TokenGuard>,
}

impl RestaurantService {
    pub fn new(
        api: Arc<dyn RestaurantApi>,
        cache: QueryCache,
        flags: Arc<OptimisticFlags>,
        guard: Arc<dyn TokenGuard>,
    ) -> Self {
        Self {
            api,
            cache,
            flags,
            guard,
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn flags(&self) -> &OptimisticFlags {
        &self.flags
    }

    async fn authorize(&self) -> Result<()> {
        if self.guard.ensure_valid_token().await {
            Ok(())
        } else {
            Err(ClientError::NotAuthenticated)
        }
    }

    pub async fn list_restaurants(
        &self,
        filters: &RestaurantFilters,
    ) -> Result<ListEnvelope<Restaurant>> {
        self.authorize().await?;
        let api = self.api.clone();
        let owned = filters.clone();
        let list = self
            .cache
            .fetch(&keys::restaurant_list(filters), move || {
                let api = api.clone();
                let filters = owned.clone();
                async move { api.list_restaurants(&filters).await }
            })
            .await?;
        Ok(list)
    }

    pub async fn get_restaurant(&self, id: &Id) -> Result<Restaurant> {
        self.authorize().await?;
        let api = self.api.clone();
        let owned = id.clone();
        let restaurant = self
            .cache
            .fetch(&keys::restaurant(id), move || {
                let api = api.clone();
                let id = owned.clone();
                async move { api.get_restaurant(&id).await }
            })
            .await?;
        Ok(restaurant)
    }

    /// Keep a restaurant's detail mounted; the handle streams its state.
    pub fn watch_restaurant(&self, id: &Id) -> QueryHandle {
        let api = self.api.clone();
        let owned = id.clone();
        self.cache.mount(
            keys::restaurant(id),
            typed_loader(move || {
                let api = api.clone();
                let id = owned.clone();
                async move { api.get_restaurant(&id).await }
            }),
        )
    }

    pub async fn user_reviews(&self) -> Result<ListEnvelope<Review>> {
        self.authorize().await?;
        let api = self.api.clone();
        let reviews = self
            .cache
            .fetch(&keys::my_reviews(), move || {
                let api = api.clone();
                async move { api.list_user_reviews().await }
            })
            .await?;
        Ok(reviews)
    }

    pub async fn get_user(&self, id: &Id) -> Result<User> {
        self.authorize().await?;
        let api = self.api.clone();
        let owned = id.clone();
        let user = self
            .cache
            .fetch(&keys::user(id), move || {
                let api = api.clone();
                let id = owned.clone();
                async move { api.get_user(&id).await }
            })
            .await?;
        Ok(user)
    }

    /// Available slots for a date and party size, flattened in response
    /// order.
    pub async fn time_slots(&self, id: &Id, date: Date, party_size: u32) -> Result<Vec<TimeSlot>> {
        self.authorize().await?;
        let api = self.api.clone();
        let owned = id.clone();
        let periods: TimeSlotPeriods = self
            .cache
            .fetch(&keys::time_slots(id, date, party_size), move || {
                let api = api.clone();
                let id = owned.clone();
                async move { api.time_slots(&id, date, party_size).await }
            })
            .await?;
        Ok(flatten_time_slots(&periods))
    }

    /// Liked flag as the user should see it.
    pub fn is_liked(&self, restaurant: &Restaurant) -> bool {
        self.flags.effective(&restaurant.id, restaurant.is_liked)
    }

    pub fn subscribe_likes(&self) -> tokio::sync::broadcast::Receiver<FlagEvent> {
        self.flags.subscribe()
    }

    /// Like or unlike, optimistically. Returns the new liked state.
    ///
    /// On success the restaurant, every restaurant list and the user's
    /// reviews are invalidated.
    pub async fn toggle_like(&self, id: &Id) -> Result<bool> {
        let authoritative = self.get_restaurant(id).await?.is_liked;
        self.authorize().await?;

        let api = self.api.clone();
        let cache = self.cache.clone();
        self.flags
            .toggle(
                id,
                authoritative,
                |liked| async move {
                    if liked {
                        api.like(id).await
                    } else {
                        api.unlike(id).await
                    }
                },
                |_| {
                    cache.invalidate(&keys::restaurant(id));
                    cache.invalidate(&keys::restaurant_lists());
                    cache.invalidate(&keys::my_reviews());
                },
            )
            .await
    }

    /// Restaurants with coordinates, nearest to `origin` first.
    pub async fn nearby(
        &self,
        filters: &RestaurantFilters,
        origin: Coordinates,
    ) -> Result<Vec<NearbyRestaurant>> {
        let list = self.list_restaurants(filters).await?;
        Ok(sort_by_distance(list.results, origin, Restaurant::coordinates)
            .into_iter()
            .map(|(restaurant, distance_km)| NearbyRestaurant {
                restaurant,
                distance_km,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use async_trait::async_trait;
    use indexmap::IndexMap;
    use time::macros::date;

    use super::*;
    use crate::config::CacheConfig;
    use crate::error::ApiError;
    use crate::testing::{MockApi, restaurant};

    struct AlwaysValid;

    #[async_trait]
    impl TokenGuard for AlwaysValid {
        async fn ensure_valid_token(&self) -> bool {
            true
        }
    }

    struct SignedOut;

    #[async_trait]
    impl TokenGuard for SignedOut {
        async fn ensure_valid_token(&self) -> bool {
            false
        }
    }

    fn service_with(api: Arc<MockApi>, guard: Arc<dyn TokenGuard>) -> RestaurantService {
        RestaurantService::new(
            api,
            QueryCache::new(CacheConfig::default(), None),
            Arc::new(OptimisticFlags::new()),
            guard,
        )
    }

    fn fixture() -> (Arc<MockApi>, RestaurantService) {
        let api = Arc::new(MockApi::with_restaurants(vec![
            restaurant("1", "Cervejaria Ramiro", 38.7206, -9.1356),
            restaurant("2", "Taberna da Rua das Flores", 38.7103, -9.1432),
            restaurant("3", "Cantinho do Avillez", 41.1464, -8.6107),
        ]));
        let service = service_with(api.clone(), Arc::new(AlwaysValid));
        (api, service)
    }

    #[tokio::test]
    async fn test_list_is_cached_per_filters() {
        let (api, service) = fixture();
        let all = RestaurantFilters::default();
        let lisbon = RestaurantFilters {
            city: Some("Lisbon".into()),
            ..Default::default()
        };

        assert_eq!(service.list_restaurants(&all).await.unwrap().results.len(), 3);
        service.list_restaurants(&all).await.unwrap();
        assert_eq!(MockApi::count(&api.list_calls), 1);

        service.list_restaurants(&lisbon).await.unwrap();
        assert_eq!(MockApi::count(&api.list_calls), 2);
    }

    #[tokio::test]
    async fn test_requests_require_valid_token() {
        let api = Arc::new(MockApi::new());
        let service = service_with(api.clone(), Arc::new(SignedOut));
        let err = service
            .list_restaurants(&RestaurantFilters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotAuthenticated));
        assert_eq!(MockApi::count(&api.list_calls), 0);
    }

    #[tokio::test]
    async fn test_toggle_like_invalidates_related_queries() {
        let (api, service) = fixture();
        let id = Id::from("1");
        service.list_restaurants(&RestaurantFilters::default()).await.unwrap();
        service.user_reviews().await.unwrap();

        let liked = service.toggle_like(&id).await.unwrap();
        assert!(liked);
        assert_eq!(MockApi::count(&api.like_calls), 1);

        let cache = service.cache();
        assert!(cache.is_stale(&keys::restaurant(&id)));
        assert!(cache.is_stale(&keys::restaurant_list(&RestaurantFilters::default())));
        assert!(cache.is_stale(&keys::my_reviews()));

        // Fresh read confirms the like and the override is dropped.
        let fresh = service.get_restaurant(&id).await.unwrap();
        assert!(fresh.is_liked);
        assert!(service.is_liked(&fresh));
        assert_eq!(service.flags().override_for(&id), None);

        assert!(!service.toggle_like(&id).await.unwrap());
        assert_eq!(MockApi::count(&api.unlike_calls), 1);
    }

    #[tokio::test]
    async fn test_failed_like_rolls_back() {
        let (api, service) = fixture();
        api.fail_like.store(true, Ordering::SeqCst);
        let id = Id::from("2");
        let mut likes = service.subscribe_likes();

        let err = service.toggle_like(&id).await.unwrap_err();
        assert!(matches!(err, ClientError::Api(ApiError::Server { .. })));
        assert!(likes.try_recv().unwrap().value);
        assert!(!likes.try_recv().unwrap().value);
        assert!(likes.try_recv().is_err());

        let r = service.get_restaurant(&id).await.unwrap();
        assert!(!service.is_liked(&r));
        assert!(!service.cache().is_stale(&keys::restaurant(&id)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_like_is_rejected() {
        let (api, service) = fixture();
        *api.mutation_delay.lock() = Some(Duration::from_millis(100));
        let id = Id::from("1");
        service.get_restaurant(&id).await.unwrap();

        let (first, second) = tokio::join!(service.toggle_like(&id), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            service.toggle_like(&id).await
        });
        assert!(first.unwrap());
        assert!(matches!(second, Err(ClientError::MutationInFlight { .. })));
        assert_eq!(MockApi::count(&api.like_calls), 1);
    }

    #[tokio::test]
    async fn test_nearby_sorts_and_drops_unlocated() {
        let (api, service) = fixture();
        let mut unlocated = restaurant("4", "Somewhere", 0.0, 0.0);
        unlocated.latitude = None;
        api.restaurants.lock().push(unlocated);

        let origin = Coordinates::new(38.7107, -9.1430);
        let nearby = service
            .nearby(&RestaurantFilters::default(), origin)
            .await
            .unwrap();
        let ids: Vec<&str> = nearby.iter().map(|n| n.restaurant.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1", "3"]);
        assert!(nearby[0].distance_km < nearby[1].distance_km);
    }

    #[tokio::test]
    async fn test_time_slots_are_flattened_and_cached() {
        let (api, service) = fixture();
        let mut periods = IndexMap::new();
        periods.insert("Lunch".to_string(), vec!["12:00".to_string(), "12:15".to_string()]);
        periods.insert("dinner".to_string(), vec![]);
        *api.slots.lock() = periods;

        let day = date!(2024 - 06 - 01);
        let slots = service.time_slots(&Id::from("1"), day, 2).await.unwrap();
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().all(|s| s.available));
        assert_eq!(slots[0].time, "12:00");

        service.time_slots(&Id::from("1"), day, 2).await.unwrap();
        assert_eq!(MockApi::count(&api.slots_calls), 1);
        service.time_slots(&Id::from("1"), day, 4).await.unwrap();
        assert_eq!(MockApi::count(&api.slots_calls), 2);
    }

    #[tokio::test]
    async fn test_watch_restaurant_streams_updates() {
        let (_api, service) = fixture();
        let id = Id::from("3");
        let mut handle = service.watch_restaurant(&id);
        let state = handle.wait_for(|s| s.value().is_some()).await.unwrap();
        let r: Restaurant = state.data().unwrap().unwrap();
        assert_eq!(r.name, "Cantinho do Avillez");
    }
}
