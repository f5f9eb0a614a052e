mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{show_start, TestApp};

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn reserve(router: &Router, seats: &[&str]) -> (StatusCode, Value) {
    send(
        router,
        Method::POST,
        "/api/reservations",
        Some(json!({ "schedule_id": 1, "seat_ids": seats })),
    )
    .await
}

fn booking_body(session_id: &str) -> Value {
    json!({
        "schedule_id": 1,
        "session_id": session_id,
        "payment_method_id": "pm_card_visa",
        "customer_name": "Aigerim Sadykova",
        "customer_email": "aigerim@example.com",
    })
}

#[tokio::test]
async fn health_check() {
    let app = TestApp::new();
    let (status, body) = send(&app.router(), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn seat_map_reports_counts() {
    let app = TestApp::new();
    let router = app.router();
    reserve(&router, &["A1"]).await;

    let (status, body) = send(&router, Method::GET, "/api/schedules/1/seats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["counts"]["total"], 10);
    assert_eq!(body["counts"]["reserved"], 1);
    assert_eq!(body["counts"]["available"], 9);
    assert_eq!(body["needs_refresh"], false);
    assert_eq!(body["rows"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_schedule_is_404() {
    let app = TestApp::new();
    let (status, body) = send(&app.router(), Method::GET, "/api/schedules/77/seats", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "schedule_not_found");
}

#[tokio::test]
async fn booking_window_warns_shortly_before_start() {
    let app = TestApp::new();
    let router = app.router();

    let (_, body) = send(&router, Method::GET, "/api/schedules/1/booking-window", None).await;
    assert_eq!(body["window"]["state"], "open");
    assert!(body["warning"].is_null());

    app.set_now(show_start() - chrono::Duration::minutes(10));
    let (_, body) = send(&router, Method::GET, "/api/schedules/1/booking-window", None).await;
    assert_eq!(body["window"]["state"], "open");
    assert_eq!(body["warning"], "Hurry up: the show starts in 10 minutes");

    app.set_now(show_start() + chrono::Duration::minutes(16));
    let (_, body) = send(&router, Method::GET, "/api/schedules/1/booking-window", None).await;
    assert_eq!(body["window"]["state"], "closed");
}

#[tokio::test]
async fn conflicting_reservation_is_409_with_seat_list() {
    let app = TestApp::new();
    let router = app.router();

    let (status, _) = reserve(&router, &["A1", "A2"]).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = reserve(&router, &["A2", "A3"]).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "seat_conflict");
    assert_eq!(body["details"]["seat_ids"], json!(["A2"]));
}

#[tokio::test]
async fn empty_selection_is_400() {
    let app = TestApp::new();
    let (status, body) = reserve(&app.router(), &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn release_returns_freed_seats() {
    let app = TestApp::new();
    let router = app.router();

    let (_, session) = reserve(&router, &["B1", "B2"]).await;
    let session_id = session["session_id"].as_str().unwrap();

    let uri = format!("/api/reservations/{session_id}");
    let (status, body) = send(&router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"].as_array().unwrap().len(), 2);

    // Повторно: пусто, но не ошибка
    let (status, body) = send(&router, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["released"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_customer_email_is_400() {
    let app = TestApp::new();
    let router = app.router();
    let (_, session) = reserve(&router, &["A1"]).await;

    let mut body = booking_body(session["session_id"].as_str().unwrap());
    body["customer_email"] = json!("not-an-email");
    let (status, body) = send(&router, Method::POST, "/api/bookings", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn quote_book_and_cancel() {
    let app = TestApp::new();
    let router = app.router();

    let (_, session) = reserve(&router, &["A1", "A2"]).await;
    let session_id = session["session_id"].as_str().unwrap().to_string();

    let (status, quote) = send(
        &router,
        Method::POST,
        "/api/pricing/quote",
        Some(json!({ "schedule_id": 1, "session_id": session_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quote["summary"]["total"], "615");

    let (status, booking) = send(
        &router,
        Method::POST,
        "/api/bookings",
        Some(booking_body(&session_id)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["status"], "CONFIRMED");
    assert_eq!(booking["total_amount"], "615");
    let booking_id = booking["id"].as_str().unwrap().to_string();

    let (status, details) = send(&router, Method::GET, &format!("/api/bookings/{booking_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["effective_status"], "CONFIRMED");

    let (status, cancelled) = send(
        &router,
        Method::PATCH,
        &format!("/api/bookings/{booking_id}/cancel"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "CANCELLED");

    let (status, body) = send(
        &router,
        Method::PATCH,
        &format!("/api/bookings/{booking_id}/refund"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "invalid_transition");
}

#[tokio::test]
async fn checkout_after_release_is_gone() {
    let app = TestApp::new();
    let router = app.router();

    let (_, session) = reserve(&router, &["A5"]).await;
    let session_id = session["session_id"].as_str().unwrap().to_string();
    send(&router, Method::DELETE, &format!("/api/reservations/{session_id}"), None).await;

    let (status, body) = send(&router, Method::POST, "/api/bookings", Some(booking_body(&session_id))).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["code"], "session_expired");
}
