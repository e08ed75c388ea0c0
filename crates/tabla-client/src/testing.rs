//! In-process [`RestaurantApi`] double for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::Date;

use crate::api::RestaurantApi;
use crate::error::ApiError;
use crate::models::{
    AuthResponse, Credentials, Id, ListEnvelope, Registration, Restaurant, RestaurantFilters,
    Review, TimeSlotPeriods, TokenGrant, User,
};

pub(crate) const VALID_PASSWORD: &str = "correct-horse";

#[derive(Default)]
pub(crate) struct MockApi {
    pub login_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub me_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub like_calls: AtomicUsize,
    pub unlike_calls: AtomicUsize,
    pub slots_calls: AtomicUsize,

    /// Lifetime handed out by login/register.
    pub login_expires_in: Mutex<Option<u64>>,
    /// Lifetime handed out by refresh.
    pub refresh_expires_in: Mutex<Option<u64>>,
    pub fail_refresh: AtomicBool,
    pub fail_logout: AtomicBool,
    pub fail_me: Mutex<Option<ApiError>>,
    pub fail_like: AtomicBool,
    pub mutation_delay: Mutex<Option<Duration>>,
    pub restaurants: Mutex<Vec<Restaurant>>,
    pub liked: Mutex<HashMap<Id, bool>>,
    pub slots: Mutex<TimeSlotPeriods>,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            login_expires_in: Mutex::new(Some(3600)),
            refresh_expires_in: Mutex::new(Some(3600)),
            ..Default::default()
        }
    }

    pub fn with_restaurants(restaurants: Vec<Restaurant>) -> Self {
        let api = Self::new();
        *api.restaurants.lock() = restaurants;
        api
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn user(email: &str) -> User {
        serde_json::from_value(serde_json::json!({
            "id": 1,
            "name": "Test User",
            "email": email,
        }))
        .expect("valid user")
    }

    fn auth_response(&self, email: &str) -> AuthResponse {
        let n = self.login_calls.load(Ordering::SeqCst);
        AuthResponse {
            token: format!("access-{n}"),
            refresh_token: Some(format!("refresh-{n}")),
            expires_in: *self.login_expires_in.lock(),
            user: Self::user(email),
        }
    }

    async fn mutation_pause(&self) {
        let delay = *self.mutation_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn apply_like(&self, id: &Id, liked: bool) {
        self.liked.lock().insert(id.clone(), liked);
        for r in self.restaurants.lock().iter_mut() {
            if &r.id == id {
                r.is_liked = liked;
            }
        }
    }
}

pub(crate) fn restaurant(id: &str, name: &str, lat: f64, lon: f64) -> Restaurant {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "name": name,
        "latitude": lat,
        "longitude": lon,
    }))
    .expect("valid restaurant")
}

#[async_trait]
impl RestaurantApi for MockApi {
    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if credentials.password != VALID_PASSWORD {
            return Err(ApiError::from_status(400, "Invalid email or password"));
        }
        Ok(self.auth_response(&credentials.email))
    }

    async fn register(&self, registration: &Registration) -> Result<AuthResponse, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if registration.email.is_empty() {
            return Err(ApiError::from_status(422, "Email is required"));
        }
        Ok(self.auth_response(&registration.email))
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(ApiError::network("connection reset"));
        }
        Ok(())
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, ApiError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(ApiError::from_status(401, "Refresh token expired"));
        }
        Ok(TokenGrant {
            token: format!("refreshed-{n}"),
            refresh_token: None,
            expires_in: *self.refresh_expires_in.lock(),
        })
    }

    async fn current_user(&self) -> Result<User, ApiError> {
        self.me_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_me.lock().clone() {
            return Err(err);
        }
        Ok(Self::user("test@example.com"))
    }

    async fn get_user(&self, id: &Id) -> Result<User, ApiError> {
        let mut user = Self::user("other@example.com");
        user.id = id.clone();
        Ok(user)
    }

    async fn list_restaurants(
        &self,
        _filters: &RestaurantFilters,
    ) -> Result<ListEnvelope<Restaurant>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let results = self.restaurants.lock().clone();
        Ok(ListEnvelope {
            count: Some(results.len() as u64),
            results,
        })
    }

    async fn get_restaurant(&self, id: &Id) -> Result<Restaurant, ApiError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.restaurants
            .lock()
            .iter()
            .find(|r| &r.id == id)
            .cloned()
            .ok_or_else(|| ApiError::from_status(404, "Not found."))
    }

    async fn like(&self, id: &Id) -> Result<(), ApiError> {
        self.like_calls.fetch_add(1, Ordering::SeqCst);
        self.mutation_pause().await;
        if self.fail_like.load(Ordering::SeqCst) {
            return Err(ApiError::from_status(500, "Internal error"));
        }
        self.apply_like(id, true);
        Ok(())
    }

    async fn unlike(&self, id: &Id) -> Result<(), ApiError> {
        self.unlike_calls.fetch_add(1, Ordering::SeqCst);
        self.mutation_pause().await;
        if self.fail_like.load(Ordering::SeqCst) {
            return Err(ApiError::from_status(500, "Internal error"));
        }
        self.apply_like(id, false);
        Ok(())
    }

    async fn list_user_reviews(&self) -> Result<ListEnvelope<Review>, ApiError> {
        Ok(ListEnvelope {
            results: Vec::new(),
            count: Some(0),
        })
    }

    async fn time_slots(
        &self,
        _restaurant_id: &Id,
        _date: Date,
        _party_size: u32,
    ) -> Result<TimeSlotPeriods, ApiError> {
        self.slots_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.slots.lock().clone())
    }
}
