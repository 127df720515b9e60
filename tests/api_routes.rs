//! HTTP API tests driven through the router without binding a socket

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{memory_dispatcher, plumber};
use helper_dispatch::server::{create_router, AppState};

fn router() -> Router {
    let (dispatcher, _store) = memory_dispatcher(vec![plumber("a", 0.01, 4.5)]);
    create_router(AppState::new(dispatcher))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let app = router();
    let (status, body) = send(&app, "GET", "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["active_escalations"], 0);
}

#[tokio::test]
async fn test_booking_flow() {
    let app = router();

    let (status, body) = send(
        &app,
        "POST",
        "/api/bookings",
        Some(json!({
            "serviceType": "plumbing",
            "userLocation": {"lat": 12.9716, "lng": 77.5946},
            "description": "Leaking tap",
            "userId": "user-9"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "assigned");
    assert_eq!(body["data"]["helper"]["name"], "Helper a");
    let booking_id = body["data"]["bookingId"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "GET", &format!("/api/bookings/{booking_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["requesterId"], "user-9");
    assert_eq!(body["data"]["assignedHelperId"], "a");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/bookings/{booking_id}/complete"),
        Some(json!({"rating": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["message"], "Booking completed");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/bookings/{booking_id}/complete"),
        Some(json!({"rating": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_no_helpers_is_ok_response() {
    let app = router();
    let (status, body) = send(
        &app,
        "POST",
        "/api/bookings",
        Some(json!({"serviceType": "gardening", "location": {"lat": 0.0, "lng": 0.0}})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "no-helpers");
    assert!(body["data"]["bookingId"].is_null());
}

#[tokio::test]
async fn test_validation_errors() {
    let app = router();

    let (status, body) = send(
        &app,
        "POST",
        "/api/bookings",
        Some(json!({"serviceType": "plumbing"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");

    let (status, _) = send(&app, "GET", "/api/bookings/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "PUT",
        "/api/helpers/ghost/location",
        Some(json!({"lat": 1.0, "lng": 1.0})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_register_and_list_helpers() {
    let app = router();

    let (status, body) = send(
        &app,
        "POST",
        "/api/helpers",
        Some(json!({
            "name": "Meena",
            "skills": ["cleaning"],
            "rating": 4.6,
            "location": {"lat": 12.9, "lng": 77.6}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(!body["data"]["id"].as_str().unwrap().is_empty());

    let (status, body) = send(&app, "GET", "/api/helpers?available=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}
