use rust_decimal_macros::dec;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use showtime_booking::config::{CircuitBreakerConfig, PaymentConfig};
use showtime_booking::services::payment::CircuitState;
use showtime_booking::services::{CaptureOutcome, HttpPaymentGateway, PaymentError, PaymentGateway};

const CONFIRM_PATH: &str = "/api/v1/PaymentConfirm/confirm";

fn gateway(server: &MockServer, failure_threshold: u32) -> HttpPaymentGateway {
    HttpPaymentGateway::from_config(
        &PaymentConfig {
            merchant_id: "showtime".to_string(),
            merchant_password: "s3cret".to_string(),
            gateway_url: format!("{}/", server.uri()),
            currency: "KZT".to_string(),
            timeout_seconds: 5,
        },
        &CircuitBreakerConfig {
            failure_threshold,
            timeout_seconds: 60,
        },
    )
    .unwrap()
}

#[tokio::test]
async fn capture_sends_signed_request_in_minor_units() {
    let server = MockServer::start().await;
    let booking_id = Uuid::new_v4();
    let order_id = booking_id.to_string();

    let expected_token = format!(
        "{:x}",
        Sha256::digest(format!("61550KZT{}s3cretshowtime", order_id).as_bytes())
    );

    Mock::given(method("POST"))
        .and(path(CONFIRM_PATH))
        .and(body_partial_json(json!({
            "teamSlug": "showtime",
            "paymentId": "pm_1",
            "amount": 61550,
            "currency": "KZT",
            "orderId": order_id,
            "token": expected_token,
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": true, "transactionId": "tx-42" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let outcome = gateway(&server, 3)
        .capture(booking_id, "pm_1", dec!(615.50))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CaptureOutcome::Captured {
            transaction_id: "tx-42".to_string()
        }
    );
}

#[tokio::test]
async fn decline_is_an_outcome_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CONFIRM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "code": 1051,
            "message": "Insufficient funds",
        })))
        .mount(&server)
        .await;

    let gateway = gateway(&server, 3);
    let outcome = gateway
        .capture(Uuid::new_v4(), "pm_1", dec!(100))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CaptureOutcome::Declined {
            reason: "Insufficient funds (code 1051)".to_string()
        }
    );
    // Отказ банка не считается сбоем шлюза
    assert_eq!(gateway.circuit_state(), CircuitState::Closed);
}

#[tokio::test]
async fn repeated_server_errors_open_the_circuit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CONFIRM_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = gateway(&server, 2);
    for _ in 0..2 {
        let err = gateway
            .capture(Uuid::new_v4(), "pm_1", dec!(100))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Gateway(_)));
    }
    assert_eq!(gateway.circuit_state(), CircuitState::Open);

    // Третий запрос до шлюза не доходит
    let err = gateway
        .capture(Uuid::new_v4(), "pm_1", dec!(100))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::CircuitOpen));
}
