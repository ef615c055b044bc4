//! End-to-end postback tests: the three-stage gate, amount reconciliation,
//! at-most-once fulfillment, replay acknowledgment, and the retry path.

mod common;

use axum::http::StatusCode;
use common::{
    checkout_payload, response_json, response_text, sign_postback, TestApp, GATEWAY_IP,
    POSTBACK_SECRET,
};
use rust_decimal_macros::dec;
use serde_json::json;

/// Creates a pending card order and returns its order number.
async fn create_card_order(app: &TestApp) -> String {
    app.seed_product(1, "bpc-157-5mg", dec!(70.99), 10);

    let mut payload = checkout_payload(1, "109.54");
    payload["payment_method"] = json!("creditcard");

    let response = app
        .post_json("/api/v1/payments/gateway/create", payload)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    body["order_number"].as_str().unwrap().to_string()
}

fn approved_body(order_number: &str, amount: &str) -> Vec<u8> {
    json!({
        "session": order_number,
        "status": "approved",
        "amount": amount
    })
    .to_string()
    .into_bytes()
}

async fn post_signed(app: &TestApp, body: Vec<u8>, source_ip: &str) -> (StatusCode, String) {
    let signature = sign_postback(&body, POSTBACK_SECRET);
    let response = app
        .post_raw(
            "/api/v1/payments/gateway/postback",
            body,
            &[
                ("x-forwarded-for", source_ip),
                ("x-gateway-signature", signature.as_str()),
                ("content-type", "application/json"),
            ],
        )
        .await;
    let status = response.status();
    (status, response_text(response).await)
}

#[tokio::test]
async fn approved_postback_fulfills_and_marks_paid_once() {
    let app = TestApp::new().await;
    let order_number = create_card_order(&app).await;

    let (status, xml) =
        post_signed(&app, approved_body(&order_number, "109.54"), GATEWAY_IP).await;
    assert_eq!(status, StatusCode::OK);
    assert!(xml.contains("stat=\"ok\""));
    assert!(xml.contains("<code>100</code>"));

    let order = app
        .state
        .services
        .orders
        .get_order_by_session(&order_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.payment_status, "paid");
    assert!(order.paid_at.is_some());
    assert!(order.stock_updated);
    assert_eq!(app.catalog.product_stock(1), Some(9));
    assert_eq!(app.mailer.sent_count(), 2);

    // Replay the identical callback: success acknowledgment, no second
    // fulfillment.
    let (status, xml) =
        post_signed(&app, approved_body(&order_number, "109.54"), GATEWAY_IP).await;
    assert_eq!(status, StatusCode::OK);
    assert!(xml.contains("stat=\"ok\""));
    assert!(xml.contains("Already processed"));
    assert_eq!(app.catalog.product_stock(1), Some(9));
    assert_eq!(app.mailer.sent_count(), 2);
}

#[tokio::test]
async fn postback_from_unknown_ip_is_rejected_with_code_101() {
    let app = TestApp::new().await;
    let order_number = create_card_order(&app).await;

    // Valid signature and amount; wrong source address.
    let (status, xml) =
        post_signed(&app, approved_body(&order_number, "109.54"), "203.0.113.9").await;
    assert_eq!(status, StatusCode::OK);
    assert!(xml.contains("stat=\"fail\""));
    assert!(xml.contains("<code>101</code>"));

    let order = app
        .state
        .services
        .orders
        .get_order_by_session(&order_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.payment_status, "pending");
}

#[tokio::test]
async fn postback_with_bad_signature_is_rejected_with_code_103() {
    let app = TestApp::new().await;
    let order_number = create_card_order(&app).await;

    let body = approved_body(&order_number, "109.54");
    let response = app
        .post_raw(
            "/api/v1/payments/gateway/postback",
            body,
            &[
                ("x-forwarded-for", GATEWAY_IP),
                ("x-gateway-signature", "deadbeefdeadbeef"),
            ],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let xml = response_text(response).await;
    assert!(xml.contains("<code>103</code>"));
}

#[tokio::test]
async fn amount_mismatch_is_rejected_without_marking_paid() {
    let app = TestApp::new().await;
    let order_number = create_card_order(&app).await;

    let (status, xml) =
        post_signed(&app, approved_body(&order_number, "99.00"), GATEWAY_IP).await;
    assert_eq!(status, StatusCode::OK);
    assert!(xml.contains("<code>102</code>"));

    let order = app
        .state
        .services
        .orders
        .get_order_by_session(&order_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.payment_status, "pending");
    assert_eq!(app.mailer.sent_count(), 0);
}

#[tokio::test]
async fn declined_payment_answers_code_105() {
    let app = TestApp::new().await;
    let order_number = create_card_order(&app).await;

    let body = json!({
        "session": order_number,
        "status": "declined",
        "amount": "109.54"
    })
    .to_string()
    .into_bytes();

    let (status, xml) = post_signed(&app, body, GATEWAY_IP).await;
    assert_eq!(status, StatusCode::OK);
    assert!(xml.contains("<code>105</code>"));

    let order = app
        .state
        .services
        .orders
        .get_order_by_session(&order_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.payment_status, "pending");
}

#[tokio::test]
async fn unknown_session_answers_code_102() {
    let app = TestApp::new().await;
    create_card_order(&app).await;

    let (status, xml) = post_signed(&app, approved_body("SO-MISSING1", "10.00"), GATEWAY_IP).await;
    assert_eq!(status, StatusCode::OK);
    assert!(xml.contains("<code>102</code>"));
}

#[tokio::test]
async fn form_encoded_postback_is_accepted() {
    let app = TestApp::new().await;
    let order_number = create_card_order(&app).await;

    let body = format!(
        "session={}&result=SUCCESS&amount=109_54",
        order_number
    )
    .into_bytes();

    let (status, xml) = post_signed(&app, body, GATEWAY_IP).await;
    assert_eq!(status, StatusCode::OK);
    assert!(xml.contains("<code>100</code>"));
}

#[tokio::test]
async fn fulfillment_failure_leaves_order_retryable() {
    let app = TestApp::new().await;
    let order_number = create_card_order(&app).await;

    // First attempt: the stock write-back fails after payment approval.
    app.catalog.fail_stock_writes(true);
    let (status, xml) =
        post_signed(&app, approved_body(&order_number, "109.54"), GATEWAY_IP).await;
    assert_eq!(status, StatusCode::OK);
    assert!(xml.contains("<code>104</code>"));

    let order = app
        .state
        .services
        .orders
        .get_order_by_session(&order_number)
        .await
        .unwrap()
        .unwrap();
    // Not paid: a crash between payment and fulfillment must stay
    // retryable, never "paid but never fulfilled".
    assert_eq!(order.payment_status, "pending");
    assert!(!order.stock_updated);

    let job = app
        .state
        .services
        .orders
        .get_retry_job_by_session(&order_number)
        .await
        .unwrap()
        .expect("retry job created");
    assert_eq!(job.status, "pending");
    assert_eq!(job.attempts, 1);

    // The gateway retries its callback once the dependency recovers.
    app.catalog.fail_stock_writes(false);
    let (status, xml) =
        post_signed(&app, approved_body(&order_number, "109.54"), GATEWAY_IP).await;
    assert_eq!(status, StatusCode::OK);
    assert!(xml.contains("<code>100</code>"));

    let order = app
        .state
        .services
        .orders
        .get_order_by_session(&order_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.payment_status, "paid");
    assert!(order.stock_updated);

    let job = app
        .state
        .services
        .orders
        .get_retry_job_by_session(&order_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, "completed");
}
