mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use common::{charge_event, read_json, TestApp, WEBHOOK_SECRET};
use marketplace_api::{
    entities::{order, FulfillmentStatus, PaymentStatus},
    errors::ServiceError,
    events::Event,
    services::webhook::{sign, WebhookOutcome},
};

async fn paid_order(app: &TestApp) -> (order::Model, String) {
    let seller = app.seed_store("S", Some("ACCT_S")).await;
    let product = app.seed_product(seller.store.id, 5000, 2).await;
    let (buyer, _) = app.buyer();
    app.add_to_cart(buyer, product.id, None, 1).await;
    let order = app.place_order(buyer).await;
    let reference = order.authorization_reference.clone().expect("reference");
    (order, reference)
}

#[tokio::test]
async fn charge_success_settles_payment_once() {
    let app = TestApp::new().await;
    let (order, reference) = paid_order(&app).await;
    let body = charge_event("charge.success", &reference, Some(150));
    let signature = sign(WEBHOOK_SECRET, &body).unwrap();
    let webhook = &app.state.services.webhook;

    let outcome = webhook.handle(&body, Some(&signature)).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);

    let payment = &app.payments(order.id).await[0];
    assert_eq!(payment.status, PaymentStatus::Paid);
    assert_eq!(payment.fees, 150);
    assert_eq!(payment.net_amount, 4850);
    assert_eq!(payment.external_transaction_id.as_deref(), Some("98765"));
    assert_eq!(payment.gateway_response.as_deref(), Some("Approved"));
    assert_eq!(app.order(order.id).await.payment_status, PaymentStatus::Paid);

    let settled_at = payment.updated_at;
    let outcome = webhook.handle(&body, Some(&signature)).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::AlreadyApplied);
    assert_eq!(app.payments(order.id).await[0].updated_at, settled_at);

    let successes = app
        .notifier
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::PaymentSucceeded { .. }))
        .count();
    assert_eq!(successes, 1);
}

#[tokio::test]
async fn late_failure_never_overrides_a_settled_payment() {
    let app = TestApp::new().await;
    let (order, reference) = paid_order(&app).await;
    app.settle_payment(&order).await;

    let body = charge_event("charge.failed", &reference, None);
    let signature = sign(WEBHOOK_SECRET, &body).unwrap();
    let outcome = app
        .state
        .services
        .webhook
        .handle(&body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::AlreadyApplied);
    assert_eq!(app.payments(order.id).await[0].status, PaymentStatus::Paid);
    assert_eq!(app.order(order.id).await.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn charge_failed_marks_pending_payment_failed() {
    let app = TestApp::new().await;
    let (order, reference) = paid_order(&app).await;
    let body = charge_event("charge.failed", &reference, None);
    let signature = sign(WEBHOOK_SECRET, &body).unwrap();

    let outcome = app
        .state
        .services
        .webhook
        .handle(&body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Applied);
    assert_eq!(app.payments(order.id).await[0].status, PaymentStatus::Failed);
    assert_eq!(app.order(order.id).await.payment_status, PaymentStatus::Failed);
    assert!(app
        .notifier
        .events()
        .iter()
        .any(|e| matches!(e, Event::PaymentFailed { order_id, .. } if *order_id == order.id)));
}

#[tokio::test]
async fn bad_or_missing_signature_is_rejected_without_effect() {
    let app = TestApp::new().await;
    let (order, reference) = paid_order(&app).await;
    let body = charge_event("charge.success", &reference, None);
    let forged = sign("not-the-secret", &body).unwrap();
    let webhook = &app.state.services.webhook;

    assert_matches!(
        webhook.handle(&body, Some(&forged)).await,
        Err(ServiceError::InvalidSignature)
    );
    assert_matches!(
        webhook.handle(&body, None).await,
        Err(ServiceError::InvalidSignature)
    );
    assert_eq!(app.payments(order.id).await[0].status, PaymentStatus::Pending);

    let response = app.post_webhook(&body, Some(&forged)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let response = app.post_webhook(&body, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_reference_and_other_events_are_acknowledged() {
    let app = TestApp::new().await;
    let webhook = &app.state.services.webhook;

    let body = charge_event("charge.success", "NO-SUCH-REF", None);
    let outcome = webhook
        .handle(&body, Some(&sign(WEBHOOK_SECRET, &body).unwrap()))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::UnknownReference);

    let body = br#"{"event":"transfer.success","data":{}}"#;
    let outcome = webhook
        .handle(body, Some(&sign(WEBHOOK_SECRET, body).unwrap()))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);

    let body = b"not json";
    let outcome = webhook
        .handle(body, Some(&sign(WEBHOOK_SECRET, body).unwrap()))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);
}

#[tokio::test]
async fn webhook_route_acknowledges_signed_delivery() {
    let app = TestApp::new().await;
    let (order, reference) = paid_order(&app).await;
    let body = charge_event("charge.success", &reference, None);
    let signature = sign(WEBHOOK_SECRET, &body).unwrap();

    let response = app.post_webhook(&body, Some(&signature)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["outcome"], "applied");
    assert_eq!(app.order(order.id).await.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn escrow_is_released_once_for_settled_payments() {
    let app = TestApp::new().await;
    let (order, _) = paid_order(&app).await;
    let payment_id = app.payments(order.id).await[0].id;
    let (platform, platform_token) = app.platform();
    let payments = &app.state.services.payments;

    assert_matches!(
        payments.release_escrow(platform, payment_id).await,
        Err(ServiceError::Conflict(_))
    );

    app.settle_payment(&order).await;
    let release = payments.release_escrow(platform, payment_id).await.unwrap();
    assert_eq!(release.order_id, order.id);
    assert_eq!(release.amount, 4850);
    assert!(app.payments(order.id).await[0].escrow_released_at.is_some());

    assert_matches!(
        payments.release_escrow(platform, payment_id).await,
        Err(ServiceError::Conflict(_))
    );
    assert_matches!(
        payments.release_escrow(platform, uuid::Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );

    // Over HTTP only the platform may release.
    let (_, buyer_token) = app.buyer();
    let uri = format!("/api/v1/payments/{}/release-escrow", payment_id);
    let response = app.request(Method::PUT, &uri, None, Some(&buyer_token)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = app.request(Method::PUT, &uri, None, Some(&platform_token)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn payment_after_expiry_keeps_order_cancelled_and_asks_for_refund() {
    let app = TestApp::new().await;
    let seller = app.seed_store("S", Some("ACCT_S")).await;
    let product = app.seed_product(seller.store.id, 5000, 2).await;
    let (buyer, _) = app.buyer();
    app.add_to_cart(buyer, product.id, None, 1).await;
    let order = app.place_order(buyer).await;

    let swept = app
        .state
        .services
        .fulfillment
        .sweep_expired(chrono::Utc::now() + chrono::Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(swept.cancelled_orders, vec![order.id]);
    assert_eq!(app.product_stock(product.id).await, 2);
    app.notifier.clear();

    assert_eq!(
        app.settle_payment(&order).await,
        WebhookOutcome::AppliedToCancelledOrder
    );

    let settled = app.order(order.id).await;
    assert_eq!(settled.status, FulfillmentStatus::Cancelled);
    assert_eq!(settled.payment_status, PaymentStatus::Paid);
    assert_eq!(app.payments(order.id).await[0].status, PaymentStatus::Paid);
    assert_eq!(app.product_stock(product.id).await, 2);

    let events = app.notifier.events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::RefundRequired { order_id, amount: 5000, .. } if *order_id == order.id
    )));
    assert!(!events
        .iter()
        .any(|e| matches!(e, Event::PaymentSucceeded { .. })));

    // A redelivery is a no-op.
    assert_eq!(app.settle_payment(&order).await, WebhookOutcome::AlreadyApplied);

    // The platform can now send the money back through the cancelled item.
    let (platform, _) = app.platform();
    let item_id = app.items(order.id).await[0].id;
    let update = app
        .state
        .services
        .fulfillment
        .refund_item(platform, item_id)
        .await
        .unwrap();
    assert_eq!(update.order_status, FulfillmentStatus::Refunded);
    let payment = &app.payments(order.id).await[0];
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(payment.refund_amount, Some(5000));
    assert_eq!(app.product_stock(product.id).await, 2);
}
