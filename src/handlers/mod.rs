pub mod auth;
pub mod catalog;
pub mod dashboard;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;
pub mod vouchers;

use crate::{
    auth::AuthService,
    cache::CacheStore,
    config::AppConfig,
    db::DbPool,
    rate_limiter::RateLimiter,
    services::{
        accounts::AccountService, catalog::CatalogService, dashboard::DashboardService,
        orders::OrderService, payment_gateway::PaymentGateway, payments::PaymentService,
        vouchers::VoucherService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub accounts: Arc<AccountService>,
    pub catalog: Arc<CatalogService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub vouchers: Arc<VoucherService>,
    pub dashboard: Arc<DashboardService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        config: Arc<AppConfig>,
        auth_service: Arc<AuthService>,
        rate_limiter: RateLimiter,
        cache: CacheStore,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            accounts: Arc::new(AccountService::new(
                db_pool.clone(),
                auth_service,
                rate_limiter,
                config.clone(),
            )),
            catalog: Arc::new(CatalogService::new(db_pool.clone())),
            orders: Arc::new(OrderService::new(
                db_pool.clone(),
                cache.clone(),
                gateway.clone(),
                config.clone(),
            )),
            payments: Arc::new(PaymentService::new(
                db_pool.clone(),
                gateway,
                cache.clone(),
                config,
            )),
            vouchers: Arc::new(VoucherService::new(db_pool.clone(), cache.clone())),
            dashboard: Arc::new(DashboardService::new(db_pool, cache)),
        }
    }
}
