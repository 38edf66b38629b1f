use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use sebot_db::ConfigStore;
use sebot_engine::create_app;
use sebot_engine::model::Endpoint;
use sebot_engine::poller::SnapshotStore;
use sebot_engine::settings::Settings;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
// for `oneshot` method

/// Helper to create settings over an in-memory store
async fn setup_test_settings() -> Settings {
    Settings::new(
        ConfigStore::open_in_memory()
            .await
            .expect("Failed to create in-memory store"),
    )
}

/// Helper to create app with a short request timeout
fn create_test_app(settings: Settings, snapshots: Arc<SnapshotStore>) -> axum::Router {
    create_app(settings, snapshots, Duration::from_secs(5))
}

/// Helper to send a GET request and get the response
async fn get(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri(uri)
        .method("GET")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();

    // Try to parse as JSON, or return empty object
    let json = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(json!({}))
    };

    (status, json)
}

fn survival(endpoint: &Endpoint) -> sebot_engine::model::ServerSnapshot {
    sebot_engine::model::ServerSnapshot {
        name: "Survival".to_string(),
        player_count: 1,
        max_players: 16,
        players: vec![sebot_engine::model::Player::new(
            "Alex",
            Duration::from_secs(90),
        )],
        endpoint: endpoint.clone(),
    }
}

// =============================================================================
// HEALTH ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    // GIVEN: A running application
    let app = create_test_app(setup_test_settings().await, Arc::new(SnapshotStore::new()));

    // WHEN: Making a GET request to /health
    let (status, _body) = get(app, "/health").await;

    // THEN: Should return 200 OK
    assert_eq!(status, StatusCode::OK);
}

// =============================================================================
// STATUS ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_status_empty_when_nothing_tracked() {
    // GIVEN: No community has configured a server
    let app = create_test_app(setup_test_settings().await, Arc::new(SnapshotStore::new()));

    // WHEN: Listing every status
    let (status, body) = get(app, "/status").await;

    // THEN: Should return an empty list
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_status_lists_tracked_communities() {
    // GIVEN: Two communities, only one of them polled so far
    let settings = setup_test_settings().await;
    let snapshots = Arc::new(SnapshotStore::new());
    let polled = Endpoint::new("10.0.0.1", 27016);
    settings.set_endpoint(1, polled.clone()).await.unwrap();
    settings
        .set_endpoint(2, Endpoint::new("10.0.0.2", 27016))
        .await
        .unwrap();
    snapshots.replace(1, Arc::new(survival(&polled))).await;
    let app = create_test_app(settings, snapshots);

    // WHEN: Listing every status
    let (status, body) = get(app, "/status").await;

    // THEN: Both appear, with the poll result where there is one
    assert_eq!(status, StatusCode::OK);
    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["community_id"], 1);
    assert_eq!(list[0]["online"], true);
    assert_eq!(list[0]["endpoint"]["ip"], "10.0.0.1");
    assert_eq!(list[0]["snapshot"]["players"][0]["name"], "Alex");
    assert_eq!(list[1]["community_id"], 2);
    assert_eq!(list[1]["online"], false);
    assert!(list[1]["snapshot"].is_null());
}

#[tokio::test]
async fn test_community_status() {
    // GIVEN: A polled community
    let settings = setup_test_settings().await;
    let snapshots = Arc::new(SnapshotStore::new());
    let endpoint = Endpoint::new("10.0.0.1", 27016);
    settings.set_endpoint(42, endpoint.clone()).await.unwrap();
    snapshots.replace(42, Arc::new(survival(&endpoint))).await;
    let app = create_test_app(settings, snapshots);

    // WHEN: Asking for that community
    let (status, body) = get(app, "/status/42").await;

    // THEN: Should return its latest snapshot
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["snapshot"]["name"], "Survival");
    assert_eq!(body["snapshot"]["max_players"], 16);
}

#[tokio::test]
async fn test_community_status_not_tracked() {
    // GIVEN: No configuration for the community
    let app = create_test_app(setup_test_settings().await, Arc::new(SnapshotStore::new()));

    // WHEN: Asking for it
    let (status, body) = get(app, "/status/999").await;

    // THEN: Should return 404 with an error message
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Community is not tracked");
}

#[tokio::test]
async fn test_community_status_rejects_non_numeric_id() {
    // GIVEN: A running application
    let app = create_test_app(setup_test_settings().await, Arc::new(SnapshotStore::new()));

    // WHEN: The id is not a number
    let (status, _body) = get(app, "/status/abc").await;

    // THEN: Should be rejected as a bad request
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
