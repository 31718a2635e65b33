mod common;

use assert_matches::assert_matches;
use common::{checkout_request, TestApp};
use futures::future::join_all;
use marketplace_api::{
    errors::{ServiceError, StockTarget},
    services::stock_ledger,
};

#[tokio::test]
async fn concurrent_checkouts_never_oversell() {
    let app = TestApp::new().await;
    let seller = app.seed_store("S", None).await;
    let product = app.seed_product(seller.store.id, 100, 5).await;

    let mut buyers = Vec::new();
    for _ in 0..10 {
        let (buyer, _) = app.buyer();
        app.add_to_cart(buyer, product.id, None, 1).await;
        buyers.push(buyer);
    }

    let attempts = buyers.into_iter().map(|buyer| {
        let checkout = app.state.services.checkout.clone();
        tokio::spawn(async move { checkout.checkout(buyer, checkout_request()).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("checkout task panicked"))
        .collect();

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 5, "exactly the available stock is sold");
    for failure in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_matches!(failure, ServiceError::InsufficientStock { .. });
    }
    assert_eq!(app.product_stock(product.id).await, 0);
}

#[tokio::test]
async fn ledger_reserve_refuses_to_go_negative() {
    let app = TestApp::new().await;
    let seller = app.seed_store("S", None).await;
    let product = app.seed_product(seller.store.id, 100, 3).await;
    let target = StockTarget::Product(product.id);

    stock_ledger::reserve(app.db(), target, 2).await.unwrap();
    let err = stock_ledger::reserve(app.db(), target, 2).await.unwrap_err();
    assert_matches!(
        err,
        ServiceError::InsufficientStock {
            available: 1,
            requested: 2,
            ..
        }
    );
    assert_eq!(stock_ledger::available(app.db(), target).await.unwrap(), 1);

    stock_ledger::release(app.db(), target, 2).await.unwrap();
    assert_eq!(app.product_stock(product.id).await, 3);
}

#[tokio::test]
async fn ledger_rejects_non_positive_quantities_and_unknown_targets() {
    let app = TestApp::new().await;
    let seller = app.seed_store("S", None).await;
    let product = app.seed_product(seller.store.id, 100, 3).await;
    let target = StockTarget::Product(product.id);

    assert_matches!(
        stock_ledger::reserve(app.db(), target, 0).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        stock_ledger::release(app.db(), target, -1).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        stock_ledger::reserve(app.db(), StockTarget::Variant(uuid::Uuid::new_v4()), 1).await,
        Err(ServiceError::NotFound(_))
    );
    assert_eq!(app.product_stock(product.id).await, 3);
}

#[tokio::test]
async fn variant_stock_is_tracked_apart_from_product_stock() {
    let app = TestApp::new().await;
    let seller = app.seed_store("S", None).await;
    let product = app.seed_product(seller.store.id, 100, 9).await;
    let variant = app.seed_variant(product.id, 120, 2).await;

    stock_ledger::reserve(app.db(), StockTarget::Variant(variant.id), 2)
        .await
        .unwrap();
    assert_eq!(app.variant_stock(variant.id).await, 0);
    assert_eq!(app.product_stock(product.id).await, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_reservations_on_separate_connections_never_oversell() {
    let app = TestApp::file_backed(4).await;
    let seller = app.seed_store("S", None).await;
    let product = app.seed_product(seller.store.id, 100, 5).await;
    let target = StockTarget::Product(product.id);

    let attempts = (0..12).map(|_| {
        let db = app.state.db.clone();
        tokio::spawn(async move { stock_ledger::reserve(&*db, target, 1).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("reserve task panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 5);
    for failure in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_matches!(failure, ServiceError::InsufficientStock { requested: 1, .. });
    }
    assert_eq!(app.product_stock(product.id).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_large_reservations_cannot_both_fit() {
    let app = TestApp::file_backed(2).await;
    let seller = app.seed_store("S", None).await;
    let product = app.seed_product(seller.store.id, 100, 5).await;
    let target = StockTarget::Product(product.id);

    let first = {
        let db = app.state.db.clone();
        tokio::spawn(async move { stock_ledger::reserve(&*db, target, 3).await })
    };
    let second = {
        let db = app.state.db.clone();
        tokio::spawn(async move { stock_ledger::reserve(&*db, target, 3).await })
    };
    let (first, second) = (first.await.unwrap(), second.await.unwrap());

    assert!(first.is_ok() ^ second.is_ok(), "exactly one reservation fits");
    let refused = if first.is_err() { first } else { second };
    assert_matches!(
        refused,
        Err(ServiceError::InsufficientStock {
            available: 2,
            requested: 3,
            ..
        })
    );
    assert_eq!(app.product_stock(product.id).await, 2);
}
