#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::{Duration, Utc};
use marketplace_api::{
    app_router,
    auth::{AuthService, AuthUser, Buyer, Platform, Vendor, ADMIN_ROLE},
    config::{AppConfig, PaymentGatewayConfig},
    db,
    entities::{order, order_item, payment_details, product, product_variant, shipping_method, store},
    errors::ServiceError,
    events::{self, Event, EventSender},
    handlers::AppServices,
    services::{
        cart::AddCartItem,
        checkout::{Address, CheckoutRequest},
        notifications::OrderNotifier,
        payment_split::{InitializeTransaction, PaymentGateway, TransactionInit},
        webhook::{sign, WebhookOutcome},
    },
    AppState,
};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const WEBHOOK_SECRET: &str = "whsec_test_marketplace";

/// Gateway double: answers with a checkout URL derived from the proposed
/// reference, or fails while `fail` is set. Every request is recorded.
#[derive(Default)]
pub struct FakeGateway {
    fail: Mutex<bool>,
    requests: Mutex<Vec<InitializeTransaction>>,
}

impl FakeGateway {
    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock().unwrap() = failing;
    }

    pub fn requests(&self) -> Vec<InitializeTransaction> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> InitializeTransaction {
        self.requests()
            .pop()
            .expect("gateway was never called")
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn provider(&self) -> String {
        "fake".to_string()
    }

    async fn initialize(
        &self,
        request: &InitializeTransaction,
    ) -> Result<TransactionInit, ServiceError> {
        self.requests.lock().unwrap().push(request.clone());
        if *self.fail.lock().unwrap() {
            return Err(ServiceError::GatewayError("gateway unavailable".into()));
        }
        Ok(TransactionInit {
            authorization_url: format!("https://checkout.test/{}", request.reference),
            access_code: Some("access".into()),
            reference: request.reference.clone(),
        })
    }
}

/// Keeps every notification for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl OrderNotifier for RecordingNotifier {
    async fn notify(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// A seeded vendor: its store and a token carrying the store claim.
pub struct SeededStore {
    pub store: store::Model,
    pub vendor: Vendor,
    pub token: String,
}

/// Helper harness for an application backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    auth: Arc<AuthService>,
    db_file: Option<PathBuf>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        // One connection keeps every query on the same in-memory database.
        Self::build("sqlite::memory:".to_string(), 1, None).await
    }

    /// Backed by a temporary SQLite file so several pooled connections
    /// write to the same rows concurrently.
    pub async fn file_backed(connections: u32) -> Self {
        let path = std::env::temp_dir().join(format!("marketplace-test-{}.db", Uuid::new_v4()));
        let url = format!("sqlite://{}?mode=rwc", path.display());
        Self::build(url, connections, Some(path)).await
    }

    async fn build(database_url: String, connections: u32, db_file: Option<PathBuf>) -> Self {
        let mut gateway_cfg = PaymentGatewayConfig::new("sk_test_gateway");
        gateway_cfg.webhook_secret = Some(WEBHOOK_SECRET.to_string());
        let mut cfg = AppConfig::new(
            database_url,
            JWT_SECRET.to_string(),
            gateway_cfg,
            "test".to_string(),
        );
        cfg.db_max_connections = connections;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let auth = Arc::new(AuthService::new(JWT_SECRET, None));

        let services = AppServices::new(db_arc.clone(), &cfg, gateway.clone(), notifier.clone());
        let state = AppState {
            db: db_arc,
            config: Arc::new(cfg),
            event_sender,
            auth: auth.clone(),
            services,
        };

        Self {
            router: app_router(state.clone()),
            state,
            gateway,
            notifier,
            auth,
            db_file,
            _event_task: event_task,
        }
    }

    pub fn db(&self) -> &sea_orm::DatabaseConnection {
        &self.state.db
    }

    fn token_for(&self, user: &AuthUser) -> String {
        self.auth
            .issue_token(user, Duration::hours(1))
            .expect("issue test token")
    }

    /// A fresh buyer and a bearer token for them.
    pub fn buyer(&self) -> (Buyer, String) {
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            store_id: None,
            roles: vec![],
        };
        (user.buyer(), self.token_for(&user))
    }

    pub fn platform(&self) -> (Platform, String) {
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            store_id: None,
            roles: vec![ADMIN_ROLE.to_string()],
        };
        (user.platform().expect("admin role"), self.token_for(&user))
    }

    pub async fn seed_store(&self, name: &str, subaccount: Option<&str>) -> SeededStore {
        let now = Utc::now();
        let owner_id = Uuid::new_v4();
        let store = store::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_id: Set(owner_id),
            name: Set(name.to_string()),
            subaccount_code: Set(subaccount.map(str::to_string)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed store");

        let user = AuthUser {
            user_id: owner_id,
            store_id: Some(store.id),
            roles: vec!["vendor".to_string()],
        };
        SeededStore {
            vendor: user.vendor().expect("store claim"),
            token: self.token_for(&user),
            store,
        }
    }

    pub async fn seed_product(&self, store_id: Uuid, price: i64, stock: i32) -> product::Model {
        self.seed_product_in(store_id, price, stock, "NGN").await
    }

    pub async fn seed_product_in(
        &self,
        store_id: Uuid,
        price: i64,
        stock: i32,
        currency: &str,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            store_id: Set(store_id),
            name: Set(format!("Product {}", price)),
            price: Set(price),
            currency: Set(currency.to_string()),
            stock_quantity: Set(stock),
            is_active: Set(true),
            deleted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed product")
    }

    pub async fn seed_variant(
        &self,
        product_id: Uuid,
        price: i64,
        stock: i32,
    ) -> product_variant::Model {
        let now = Utc::now();
        product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            name: Set("Large".to_string()),
            price: Set(price),
            stock_quantity: Set(stock),
            deleted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed variant")
    }

    pub async fn seed_shipping_method(&self, price: i64, active: bool) -> shipping_method::Model {
        shipping_method::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Standard".to_string()),
            price: Set(price),
            is_active: Set(active),
            created_at: Set(Utc::now()),
        }
        .insert(self.db())
        .await
        .expect("seed shipping method")
    }

    pub async fn add_to_cart(&self, buyer: Buyer, product_id: Uuid, variant_id: Option<Uuid>, quantity: i32) {
        self.state
            .services
            .cart
            .add_item(
                buyer,
                AddCartItem {
                    product_id,
                    variant_id,
                    quantity,
                },
            )
            .await
            .expect("add to cart");
    }

    /// Checks out the buyer's cart through the service and returns the order.
    pub async fn place_order(&self, buyer: Buyer) -> order::Model {
        let response = self
            .state
            .services
            .checkout
            .checkout(buyer, checkout_request())
            .await
            .expect("checkout");
        self.order(response.order_id).await
    }

    pub async fn order(&self, order_id: Uuid) -> order::Model {
        order::Entity::find_by_id(order_id)
            .one(self.db())
            .await
            .expect("load order")
            .expect("order exists")
    }

    pub async fn items(&self, order_id: Uuid) -> Vec<order_item::Model> {
        order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(self.db())
            .await
            .expect("load items")
    }

    pub async fn item(&self, item_id: Uuid) -> order_item::Model {
        order_item::Entity::find_by_id(item_id)
            .one(self.db())
            .await
            .expect("load item")
            .expect("item exists")
    }

    pub async fn payments(&self, order_id: Uuid) -> Vec<payment_details::Model> {
        payment_details::Entity::find()
            .filter(payment_details::Column::OrderId.eq(order_id))
            .all(self.db())
            .await
            .expect("load payments")
    }

    pub async fn product_stock(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(self.db())
            .await
            .expect("load product")
            .expect("product exists")
            .stock_quantity
    }

    pub async fn variant_stock(&self, variant_id: Uuid) -> i32 {
        product_variant::Entity::find_by_id(variant_id)
            .one(self.db())
            .await
            .expect("load variant")
            .expect("variant exists")
            .stock_quantity
    }

    /// Delivers a signed `charge.success` for the order's current reference.
    pub async fn settle_payment(&self, order: &order::Model) -> WebhookOutcome {
        let reference = self
            .order(order.id)
            .await
            .authorization_reference
            .expect("order has a payment reference");
        let body = charge_event("charge.success", &reference, Some(150));
        let signature = sign(WEBHOOK_SECRET, &body).expect("sign webhook");
        self.state
            .services
            .webhook
            .handle(&body, Some(&signature))
            .await
            .expect("webhook applied")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts a raw webhook body with the given signature header value.
    pub async fn post_webhook(&self, body: &[u8], signature: Option<&str>) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/webhook/payment")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header("x-signature", sig);
        }
        let request = builder
            .body(Body::from(body.to_vec()))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
        if let Some(path) = &self.db_file {
            for suffix in ["", "-wal", "-shm"] {
                let mut file = path.clone().into_os_string();
                file.push(suffix);
                let _ = std::fs::remove_file(file);
            }
        }
    }
}

pub fn checkout_request() -> CheckoutRequest {
    CheckoutRequest {
        customer_name: "Ada Buyer".to_string(),
        email: "ada@example.com".to_string(),
        phone: None,
        shipping_address: address(),
        billing_address: None,
        shipping_method_id: None,
        notes: None,
        payment_method: None,
    }
}

pub fn address() -> Address {
    serde_json::from_value(serde_json::json!({
        "line1": "1 Marina Road",
        "city": "Lagos",
        "country": "NG"
    }))
    .expect("valid address")
}

/// Serialized `charge.*` webhook body for `reference`.
pub fn charge_event(event: &str, reference: &str, fees: Option<i64>) -> Vec<u8> {
    let mut data = serde_json::json!({
        "reference": reference,
        "id": 98765,
        "gateway_response": "Approved",
    });
    if let Some(fees) = fees {
        data["fees"] = fees.into();
    }
    serde_json::to_vec(&serde_json::json!({ "event": event, "data": data }))
        .expect("serialize webhook body")
}

pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
