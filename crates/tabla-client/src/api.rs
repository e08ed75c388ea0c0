//! Remote REST API client.
//!
//! [`RestaurantApi`] is the contract the rest of the layer consumes;
//! [`HttpApi`] implements it with JSON over HTTP and a bearer token taken
//! from the [`TokenStore`] at request time.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::Date;
use time::macros::format_description;
use url::Url;

use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::models::{
    AuthResponse, Credentials, Id, ListEnvelope, Registration, Restaurant, RestaurantFilters,
    Review, TimeSlotPeriods, TokenGrant, User,
};
use crate::token::TokenStore;

#[async_trait]
pub trait RestaurantApi: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, ApiError>;

    async fn register(&self, registration: &Registration) -> Result<AuthResponse, ApiError>;

    /// Invalidate the remote session of the current token.
    async fn logout(&self) -> Result<(), ApiError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ApiError>;

    async fn current_user(&self) -> Result<User, ApiError>;

    async fn get_user(&self, id: &Id) -> Result<User, ApiError>;

    async fn list_restaurants(
        &self,
        filters: &RestaurantFilters,
    ) -> Result<ListEnvelope<Restaurant>, ApiError>;

    async fn get_restaurant(&self, id: &Id) -> Result<Restaurant, ApiError>;

    async fn like(&self, id: &Id) -> Result<(), ApiError>;

    async fn unlike(&self, id: &Id) -> Result<(), ApiError>;

    async fn list_user_reviews(&self) -> Result<ListEnvelope<Review>, ApiError>;

    async fn time_slots(
        &self,
        restaurant_id: &Id,
        date: Date,
        party_size: u32,
    ) -> Result<TimeSlotPeriods, ApiError>;
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

pub struct HttpApi {
    http: reqwest::Client,
    base: Url,
    tokens: Option<TokenStore>,
}

impl HttpApi {
    /// Build a client for `config.base_url`.
    ///
    /// When `tokens` is given, every request carries the stored access
    /// token as a bearer credential.
    pub fn new(config: &ApiConfig, tokens: Option<TokenStore>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::network(format!("Failed to create HTTP client: {e}")))?;
        let base = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| ApiError::network(format!("Invalid base URL: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::network(format!(
                "Base URL cannot carry a path: {base}"
            )));
        }
        Ok(Self { http, base, tokens })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    /// Endpoint under the base URL. Each segment is percent-encoded, so an
    /// id containing `/` or `?` stays one segment.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: reqwest::Method, segments: &[&str]) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, self.url(segments));
        if let Some(token) = self.tokens.as_ref().and_then(TokenStore::access_token) {
            req = req.bearer_auth(token);
        }
        req.header("Accept", "application/json")
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T, ApiError> {
        let resp = req.send().await.map_err(|e| {
            tracing::debug!(error = %e, "Request failed before a response");
            ApiError::from(e)
        })?;
        let body = handle_response(resp).await?;
        serde_json::from_str(&body).map_err(|e| ApiError::decode(e.to_string()))
    }

    async fn send_ack(&self, req: reqwest::RequestBuilder) -> Result<(), ApiError> {
        let resp = req.send().await.map_err(ApiError::from)?;
        handle_response(resp).await.map(|_| ())
    }
}

#[async_trait]
impl RestaurantApi for HttpApi {
    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, ApiError> {
        self.send(
            self.http
                .post(self.url(&["auth", "login"]))
                .header("Accept", "application/json")
                .json(credentials),
        )
        .await
    }

    async fn register(&self, registration: &Registration) -> Result<AuthResponse, ApiError> {
        self.send(
            self.http
                .post(self.url(&["auth", "register"]))
                .header("Accept", "application/json")
                .json(registration),
        )
        .await
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.send_ack(self.request(reqwest::Method::POST, &["auth", "logout"]))
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ApiError> {
        self.send(
            self.http
                .post(self.url(&["auth", "refresh"]))
                .header("Accept", "application/json")
                .json(&RefreshRequest { refresh_token }),
        )
        .await
    }

    async fn current_user(&self) -> Result<User, ApiError> {
        self.send(self.request(reqwest::Method::GET, &["auth", "me"]))
            .await
    }

    async fn get_user(&self, id: &Id) -> Result<User, ApiError> {
        self.send(self.request(reqwest::Method::GET, &["users", id.as_str()]))
            .await
    }

    async fn list_restaurants(
        &self,
        filters: &RestaurantFilters,
    ) -> Result<ListEnvelope<Restaurant>, ApiError> {
        self.send(
            self.request(reqwest::Method::GET, &["restaurants"])
                .query(&filters.query_pairs()),
        )
        .await
    }

    async fn get_restaurant(&self, id: &Id) -> Result<Restaurant, ApiError> {
        self.send(self.request(reqwest::Method::GET, &["restaurants", id.as_str()]))
            .await
    }

    async fn like(&self, id: &Id) -> Result<(), ApiError> {
        self.send_ack(self.request(reqwest::Method::POST, &["restaurants", id.as_str(), "like"]))
            .await
    }

    async fn unlike(&self, id: &Id) -> Result<(), ApiError> {
        self.send_ack(self.request(reqwest::Method::DELETE, &["restaurants", id.as_str(), "like"]))
            .await
    }

    async fn list_user_reviews(&self) -> Result<ListEnvelope<Review>, ApiError> {
        self.send(self.request(reqwest::Method::GET, &["users", "me", "reviews"]))
            .await
    }

    async fn time_slots(
        &self,
        restaurant_id: &Id,
        date: Date,
        party_size: u32,
    ) -> Result<TimeSlotPeriods, ApiError> {
        let date = date
            .format(format_description!("[year]-[month]-[day]"))
            .map_err(|e| ApiError::decode(format!("Invalid date: {e}")))?;
        self.send(
            self.request(
                reqwest::Method::GET,
                &["restaurants", restaurant_id.as_str(), "time-slots"],
            )
            .query(&[("date", date), ("party_size", party_size.to_string())]),
        )
        .await
    }
}

/// Turn a response into its body text, mapping non-success statuses to
/// [`ApiError`] with the most specific message the body offers.
async fn handle_response(resp: reqwest::Response) -> Result<String, ApiError> {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();

    if !status.is_success() {
        let message = error_message(&body).unwrap_or_else(|| {
            if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                body.clone()
            }
        });
        tracing::debug!(status = status.as_u16(), message = %message, "API request failed");
        return Err(ApiError::from_status(status.as_u16(), message));
    }

    Ok(body)
}

fn error_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    ["message", "detail", "error"]
        .iter()
        .find_map(|field| json.get(field).and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_fields() {
        assert_eq!(
            error_message(r#"{"message": "Invalid credentials"}"#).as_deref(),
            Some("Invalid credentials")
        );
        assert_eq!(
            error_message(r#"{"detail": "Not found."}"#).as_deref(),
            Some("Not found.")
        );
        assert_eq!(error_message(r#"{"error": "nope"}"#).as_deref(), Some("nope"));
        assert_eq!(error_message("plain text"), None);
        assert_eq!(error_message(r#"{"code": 3}"#), None);
    }

    #[test]
    fn test_url_join() {
        let config = ApiConfig {
            base_url: "http://localhost:8000/api/".into(),
            ..ApiConfig::default()
        };
        let api = HttpApi::new(&config, None).unwrap();
        assert_eq!(api.base_url(), "http://localhost:8000/api");
        assert_eq!(
            api.url(&["restaurants", "1"]).as_str(),
            "http://localhost:8000/api/restaurants/1"
        );
        assert_eq!(api.url(&["auth", "me"]).as_str(), "http://localhost:8000/api/auth/me");

        let root = HttpApi::new(
            &ApiConfig {
                base_url: "http://localhost:8000".into(),
                ..ApiConfig::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(root.url(&["auth", "me"]).as_str(), "http://localhost:8000/auth/me");
    }

    #[test]
    fn test_ids_stay_one_path_segment() {
        let api = HttpApi::new(&ApiConfig::default(), None).unwrap();
        let id = Id::from("7/like?x=1");
        assert_eq!(
            api.url(&["restaurants", id.as_str()]).as_str(),
            "https://api.tabla.app/restaurants/7%2Flike%3Fx=1"
        );
    }
}
