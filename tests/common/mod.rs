#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::{DateTime, Utc};
use foodhub_api::{
    auth::AuthUser,
    cache::CacheStore,
    config::AppConfig,
    db,
    entities::{
        account::{self, AccountRole, AccountStatus},
        customer, enterprise, food,
        voucher::{self, VoucherStatus},
    },
    errors::ServiceError,
    rate_limiter::RateLimiter,
    services::payment_gateway::{PaymentGateway, PaymentIntent, PaymentIntentRequest},
    AppState,
};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_integration_secret";
pub const DELIVERY_FEE: i64 = 15_000;

const TEST_JWT_SECRET: &str =
    "q8Zr2LwT0vNc5XyK9sPb7GdM3hJf6AeU1oRiW4tYzQxVnCmBkLjHgFdSaPoIuYtReWqAz";

/// Payment provider double recording the calls the services make.
#[derive(Default)]
pub struct FakeGateway {
    pub intents: Mutex<Vec<PaymentIntentRequest>>,
    pub attached: Mutex<Vec<(String, Uuid)>>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntent, ServiceError> {
        let mut intents = self.intents.lock().expect("intent log poisoned");
        intents.push(request.clone());
        let id = format!("pi_test_{}", intents.len());
        Ok(PaymentIntent {
            client_secret: Some(format!("{}_secret", id)),
            id,
            amount: request.amount.to_i64().unwrap_or_default(),
            currency: request.currency,
            status: "requires_payment_method".into(),
        })
    }

    async fn attach_order_metadata(
        &self,
        payment_intent_id: &str,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        self.attached
            .lock()
            .expect("attach log poisoned")
            .push((payment_intent_id.to_string(), order_id));
        Ok(())
    }
}

/// Application wired against a fresh in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_environment("test").await
    }

    /// Same wiring under another `environment`, e.g. "development".
    pub async fn with_environment(environment: &str) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            None,
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            environment.to_string(),
        );
        // A single connection keeps every query on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.delivery_fee = Decimal::from(DELIVERY_FEE);
        cfg.stripe_webhook_secret = Some(WEBHOOK_SECRET.to_string());

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let gateway = Arc::new(FakeGateway::default());
        let cfg = Arc::new(cfg);
        let state = AppState::new(
            Arc::new(pool),
            cfg.clone(),
            None,
            RateLimiter::in_memory(),
            CacheStore::in_memory(cfg.cache_ttl()),
            gateway.clone(),
        );
        let router = foodhub_api::app_router(state.clone());

        Self {
            router,
            state,
            gateway,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.state.db
    }

    pub fn token_for(&self, account: &account::Model) -> String {
        self.state
            .auth
            .issue_token(account)
            .expect("issue test token")
            .access_token
    }

    /// Send a JSON request with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
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

        self.send(builder.body(body).expect("failed to build request"))
            .await
    }

    /// Send a raw body with explicit headers.
    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::from(body)).expect("failed to build request"))
            .await
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_account(&self, email: &str, role: AccountRole) -> account::Model {
        account::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            // Whole address, so owner@a.vn and owner@b.vn stay distinct.
            username: Set(email.replace(['@', '.'], "_")),
            password_hash: Set(foodhub_api::auth::password::hash_password("password123")
                .expect("hash seed password")),
            role: Set(role),
            status: Set(AccountStatus::Active),
            reset_token_hash: Set(None),
            reset_token_expires_at: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(self.db())
        .await
        .expect("seed account")
    }

    pub async fn seed_customer(&self, email: &str) -> (account::Model, customer::Model) {
        let account = self.seed_account(email, AccountRole::Customer).await;
        let profile = customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            account_id: Set(account.id),
            full_name: Set("Nguyen Van A".into()),
            phone: Set(Some("0901234567".into())),
            address: Set(Some("12 Le Loi, District 1".into())),
        }
        .insert(self.db())
        .await
        .expect("seed customer");
        (account, profile)
    }

    pub async fn seed_enterprise(
        &self,
        email: &str,
        commission_rate: Option<Decimal>,
    ) -> (account::Model, enterprise::Model) {
        let account = self.seed_account(email, AccountRole::Enterprise).await;
        let profile = enterprise::ActiveModel {
            id: Set(Uuid::new_v4()),
            account_id: Set(account.id),
            name: Set("Pho Hanoi".into()),
            address: Set("34 Hang Bac".into()),
            phone: Set("0241234567".into()),
            commission_rate: Set(commission_rate),
            open_hours: Set("08:00".into()),
            close_hours: Set("22:00".into()),
            is_active: Set(true),
        }
        .insert(self.db())
        .await
        .expect("seed enterprise");
        (account, profile)
    }

    pub async fn seed_food(
        &self,
        enterprise_id: Uuid,
        dish_name: &str,
        price: Decimal,
        is_available: bool,
    ) -> food::Model {
        food::ActiveModel {
            id: Set(Uuid::new_v4()),
            enterprise_id: Set(enterprise_id),
            category_id: Set(None),
            dish_name: Set(dish_name.to_string()),
            price: Set(price),
            stock: Set(100),
            is_available: Set(is_available),
            created_at: Set(Utc::now()),
        }
        .insert(self.db())
        .await
        .expect("seed food")
    }

    pub async fn seed_voucher(
        &self,
        code: &str,
        status: VoucherStatus,
        expiry_date: DateTime<Utc>,
        created_by: Uuid,
    ) -> voucher::Model {
        voucher::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            enterprise_id: Set(None),
            expiry_date: Set(expiry_date),
            discount_percent: Set(Some(Decimal::from(10))),
            discount_amount: Set(None),
            min_order_value: Set(None),
            max_usage: Set(None),
            status: Set(status),
            created_by: Set(created_by),
            created_at: Set(Utc::now()),
        }
        .insert(self.db())
        .await
        .expect("seed voucher")
    }
}

pub fn auth_user(account: &account::Model) -> AuthUser {
    AuthUser {
        account_id: account.id,
        role: account.role,
        email: account.email.clone(),
    }
}

pub async fn read_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}
