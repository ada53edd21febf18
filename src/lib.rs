//! FoodHub API Library
//!
//! Checkout, payment and settlement backend for the FoodHub food-delivery
//! marketplace.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod rate_limiter;
pub mod services;
pub mod tracing;

use axum::{
    extract::State,
    middleware,
    response::Json,
    routing::{delete, get, post, put},
    Extension, Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::auth::{AuthRouterExt, AuthService};
use crate::cache::{CacheStore, RedisCache};
use crate::entities::account::AccountRole;
use crate::rate_limiter::{enforce_ip_policy, policies, PolicyGuard, RateLimitBackend, RateLimiter};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub services: handlers::AppServices,
    pub auth: Arc<AuthService>,
    pub rate_limiter: RateLimiter,
    pub cache: CacheStore,
    pub redis: Option<Arc<redis::Client>>,
}

impl AppState {
    /// Wires every service from shared infrastructure handles.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<config::AppConfig>,
        redis: Option<Arc<redis::Client>>,
        rate_limiter: RateLimiter,
        cache: CacheStore,
        gateway: Arc<dyn services::payment_gateway::PaymentGateway>,
    ) -> Self {
        let auth = Arc::new(AuthService::new(auth::AuthConfig::from(config.as_ref())));
        let services = handlers::AppServices::new(
            db.clone(),
            config.clone(),
            auth.clone(),
            rate_limiter.clone(),
            cache.clone(),
            gateway,
        );
        Self {
            db,
            config,
            services,
            auth,
            rate_limiter,
            cache,
            redis,
        }
    }

    /// Builds state from configuration, choosing Redis-backed rate limiting
    /// and caching when a Redis URL is configured.
    pub fn from_config(
        db: Arc<DatabaseConnection>,
        config: Arc<config::AppConfig>,
    ) -> Result<Self, errors::ServiceError> {
        let redis = match config.redis_url.as_deref() {
            Some(url) => Some(Arc::new(redis::Client::open(url).map_err(|e| {
                errors::ServiceError::ServiceUnavailable(format!("Invalid Redis URL: {}", e))
            })?)),
            None => None,
        };

        let rate_limiter = match (&redis, config.uses_redis_rate_limiter()) {
            (Some(client), true) => RateLimiter::new(RateLimitBackend::Redis {
                client: client.clone(),
                namespace: config.rate_limit_namespace.clone(),
            }),
            _ => RateLimiter::in_memory(),
        };

        let cache = match &redis {
            Some(client) => CacheStore::new(
                Arc::new(RedisCache::new(client.clone(), "foodhub:cache")),
                config.cache_ttl(),
            ),
            None => CacheStore::in_memory(config.cache_ttl()),
        };

        let gateway = services::payment_gateway::gateway_from_config(&config)?;
        Ok(Self::new(db, config, redis, rate_limiter, cache, gateway))
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Business routes, mounted under `/api`
pub fn api_routes(state: &AppState) -> Router<AppState> {
    let auth_routes = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/forgot-password", post(handlers::auth::forgot_password))
        .route(
            "/auth/forgot-password/resend",
            post(handlers::auth::resend_reset),
        )
        .route("/auth/reset-password", post(handlers::auth::reset_password));

    let catalog_routes = Router::new()
        .route("/restaurants", get(handlers::catalog::list_restaurants))
        .route("/restaurants/:id/foods", get(handlers::catalog::list_foods))
        .route("/categories", get(handlers::catalog::list_categories))
        .route("/vouchers", get(handlers::vouchers::list_vouchers));

    let orders_create = Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .with_role(AccountRole::Customer)
        .route_layer(middleware::from_fn_with_state(
            PolicyGuard::new(state.rate_limiter.clone(), policies::ORDER_CREATE),
            enforce_ip_policy,
        ));

    let orders_customer = Router::new()
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", delete(handlers::orders::delete_order))
        .with_role(AccountRole::Customer);

    let orders_read = Router::new()
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/orders/:id/track", get(handlers::orders::track_order))
        .with_auth();

    let checkout_session = Router::new()
        .route(
            "/payments/checkout-session",
            post(handlers::payments::create_checkout_session),
        )
        .with_role(AccountRole::Customer)
        .route_layer(middleware::from_fn_with_state(
            PolicyGuard::new(state.rate_limiter.clone(), policies::CHECKOUT_SESSION),
            enforce_ip_policy,
        ));

    let webhook = Router::new().route(
        "/payments/webhook",
        post(handlers::payment_webhooks::payment_webhook),
    );

    let enterprise_routes = Router::new()
        .route(
            "/enterprise/orders/:id/status",
            put(handlers::orders::update_order_status),
        )
        .route(
            "/enterprise/dashboard/stats",
            get(handlers::dashboard::stats),
        )
        .route(
            "/enterprise/dashboard/recent-orders",
            get(handlers::dashboard::recent_orders),
        )
        .route(
            "/enterprise/vouchers",
            post(handlers::vouchers::create_voucher),
        )
        .route(
            "/enterprise/settlements",
            get(handlers::dashboard::settlements),
        )
        .with_role(AccountRole::Enterprise);

    let admin_routes = Router::new()
        .route(
            "/admin/vouchers/:id/approve",
            post(handlers::vouchers::approve_voucher),
        )
        .with_role(AccountRole::Admin);

    Router::new()
        .merge(auth_routes)
        .merge(catalog_routes)
        .merge(orders_create)
        .merge(orders_customer)
        .merge(orders_read)
        .merge(checkout_session)
        .merge(webhook)
        .merge(enterprise_routes)
        .merge(admin_routes)
        .layer(Extension(state.auth.clone()))
}

/// Complete application router with request ids and HTTP tracing.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes(&state))
        .route("/health", get(health_check))
        .route("/status", get(api_status))
        .merge(openapi::swagger_ui())
        .with_state(state)
        .layer(tracing::configure_http_tracing())
        .layer(middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
}

async fn api_status() -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let status_data = json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(_) => "unhealthy",
    };

    let redis_status = match &state.redis {
        None => "disabled",
        Some(client) => match client.get_async_connection().await {
            Ok(mut conn) => match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
                Ok(_) => "healthy",
                Err(_) => "unhealthy",
            },
            Err(_) => "unhealthy",
        },
    };

    let healthy = db_status == "healthy" && redis_status != "unhealthy";
    let health_data = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "checks": {
            "database": db_status,
            "redis": redis_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_envelope_carries_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn error_envelope_is_not_successful() {
        let response = ApiResponse::<()>::error("oops".into());
        assert!(!response.success);
        assert_eq!(response.message.as_deref(), Some("oops"));
        assert!(response.meta.is_some());
    }
}
