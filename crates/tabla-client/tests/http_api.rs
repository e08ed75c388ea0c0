use std::sync::Arc;

use serde_json::json;
use tabla_client::config::ApiConfig;
use tabla_client::models::{Credentials, Id, RestaurantFilters, flatten_time_slots};
use tabla_client::{ApiError, HttpApi, MemoryStore, RestaurantApi, TokenRecord, TokenStore};
use time::OffsetDateTime;
use time::macros::date;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api_for(server: &MockServer, tokens: Option<TokenStore>) -> HttpApi {
    let config = ApiConfig {
        base_url: server.uri(),
        ..ApiConfig::default()
    };
    HttpApi::new(&config, tokens).expect("client")
}

fn token_store_with(token: &str) -> TokenStore {
    let tokens = TokenStore::new(Arc::new(MemoryStore::new()), "tabla_auth_token", "tabla_user");
    tokens
        .save(&TokenRecord {
            access_token: token.to_string(),
            refresh_token: None,
            issued_at: OffsetDateTime::now_utc(),
            expires_at: None,
        })
        .expect("save token");
    tokens
}

#[tokio::test]
async fn login_posts_credentials_and_decodes_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({"email": "ana@example.com", "password": "pw"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "abc",
            "refresh_token": "r1",
            "expires_in": 3600,
            "user": {"id": 7, "name": "Ana", "email": "ana@example.com"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server, None);
    let resp = api
        .login(&Credentials::new("ana@example.com", "pw"))
        .await
        .unwrap();
    assert_eq!(resp.token, "abc");
    assert_eq!(resp.refresh_token.as_deref(), Some("r1"));
    assert_eq!(resp.expires_in, Some(3600));
    assert_eq!(resp.user.id, Id::from("7"));
}

#[tokio::test]
async fn stored_token_is_sent_as_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("authorization", "Bearer stored-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u1", "name": "Ana", "email": "ana@example.com"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server, Some(token_store_with("stored-token")));
    let user = api.current_user().await.unwrap();
    assert_eq!(user.email, "ana@example.com");
}

#[tokio::test]
async fn error_statuses_are_mapped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"detail": "Token expired"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"message": "Email already taken"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/restaurants/9"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let api = api_for(&server, None);

    let err = api.current_user().await.unwrap_err();
    assert_eq!(err, ApiError::Unauthorized("Token expired".into()));

    let err = api
        .register(&tabla_client::models::Registration {
            name: "Ana".into(),
            email: "ana@example.com".into(),
            password: "pw".into(),
            phone: None,
        })
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ApiError::Rejected {
            status: 422,
            message: "Email already taken".into()
        }
    );
    assert!(!err.is_retryable());

    let err = api.get_restaurant(&Id::from("9")).await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn connection_failure_is_a_network_error() {
    let config = ApiConfig {
        base_url: "http://127.0.0.1:9".into(),
        ..ApiConfig::default()
    };
    let api = HttpApi::new(&config, None).unwrap();
    let err = api.current_user().await.unwrap_err();
    assert!(matches!(err, ApiError::Network(_)), "got {err:?}");
}

#[tokio::test]
async fn restaurant_list_uses_the_canonical_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/restaurants"))
        .and(query_param("city", "Lisbon"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"id": 1, "name": "Ramiro", "latitude": 38.72, "longitude": -9.13, "is_liked": true},
                {"id": 2, "name": "Zé da Mouraria", "michelin": false}
            ],
            "count": 42
        })))
        .mount(&server)
        .await;

    let api = api_for(&server, None);
    let filters = RestaurantFilters {
        city: Some("Lisbon".into()),
        search: Some("  ".into()),
        page: Some(2),
        ..Default::default()
    };
    let list = api.list_restaurants(&filters).await.unwrap();
    assert_eq!(list.count, Some(42));
    assert_eq!(list.results.len(), 2);
    assert!(list.results[0].is_liked);
    assert!(list.results[0].coordinates().is_some());
    assert_eq!(list.results[1].extra.get("michelin"), Some(&json!(false)));
}

#[tokio::test]
async fn bare_array_list_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/me/reviews"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .mount(&server)
        .await;

    let api = api_for(&server, None);
    let err = api.list_user_reviews().await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
}

#[tokio::test]
async fn like_and_unlike_hit_the_like_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/restaurants/5/like"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/restaurants/5/like"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server, Some(token_store_with("t")));
    api.like(&Id::from("5")).await.unwrap();
    api.unlike(&Id::from("5")).await.unwrap();
}

#[tokio::test]
async fn time_slots_keep_period_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/restaurants/3/time-slots"))
        .and(query_param("date", "2024-06-01"))
        .and(query_param("party_size", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"Lunch": ["12:00", "12:15"], "dinner": [], "Late": ["23:00"]}"#,
        ))
        .mount(&server)
        .await;

    let api = api_for(&server, None);
    let periods = api
        .time_slots(&Id::from("3"), date!(2024 - 06 - 01), 2)
        .await
        .unwrap();
    let times: Vec<String> = flatten_time_slots(&periods)
        .into_iter()
        .map(|s| s.time)
        .collect();
    assert_eq!(times, vec!["12:00", "12:15", "23:00"]);
}

#[tokio::test]
async fn refresh_sends_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({"refresh_token": "r1"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"token": "new", "expires_in": 900})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server, None);
    let grant = api.refresh("r1").await.unwrap();
    assert_eq!(grant.token, "new");
    assert_eq!(grant.expires_in, Some(900));
    assert_eq!(grant.refresh_token, None);
}
