use crate::{
    auth::AuthUser,
    cache::{keys, Cached, CacheStore},
    db::DbPool,
    entities::{
        enterprise,
        order::{self, OrderStatus},
        settlement::{self, SettlementStatus},
        settlement_item,
    },
    errors::ServiceError,
    middleware_helpers::retry::{with_retry, DbRetryPolicy, RetryConfig},
    services::accounts::enterprise_profile,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

pub const RECENT_ORDERS_LIMIT: u64 = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DashboardStats {
    pub total_orders: u64,
    pub pending_orders: u64,
    pub completed_orders: u64,
    pub cancelled_orders: u64,
    /// Sum of delivered and completed order totals
    pub total_revenue: Decimal,
    pub total_commission: Decimal,
}

impl DashboardStats {
    fn from_orders(orders: &[order::Model]) -> Self {
        orders.iter().fold(Self::default(), |mut stats, order| {
            stats.total_orders += 1;
            match order.status {
                OrderStatus::Pending => stats.pending_orders += 1,
                OrderStatus::Cancelled => stats.cancelled_orders += 1,
                OrderStatus::Delivered | OrderStatus::Completed => {
                    stats.completed_orders += 1;
                    stats.total_revenue += order.total_amount;
                }
                _ => {}
            }
            stats.total_commission += order.commission_amount.unwrap_or(Decimal::ZERO);
            stats
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SettlementSummary {
    pub id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub net_payout: Decimal,
    pub status: SettlementStatus,
    pub item_count: u64,
}

/// Enterprise-facing statistics, recent orders and settlements
#[derive(Clone)]
pub struct DashboardService {
    db: Arc<DbPool>,
    cache: CacheStore,
    retry: RetryConfig,
}

impl DashboardService {
    pub fn new(db: Arc<DbPool>, cache: CacheStore) -> Self {
        Self {
            db,
            cache,
            retry: RetryConfig::default(),
        }
    }

    async fn enterprise_for(&self, user: &AuthUser) -> Result<enterprise::Model, ServiceError> {
        enterprise_profile(&*self.db, user.account_id)
            .await?
            .ok_or_else(|| ServiceError::Forbidden("Enterprise profile required".into()))
    }

    #[instrument(skip(self, user), fields(account_id = %user.account_id))]
    pub async fn stats(&self, user: &AuthUser) -> Result<Cached<DashboardStats>, ServiceError> {
        let enterprise_id = self.enterprise_for(user).await?.id;
        let db = self.db.clone();
        let retry = self.retry.clone();

        self.cache
            .get_or_compute(
                &keys::enterprise_stats(enterprise_id),
                self.cache.default_ttl(),
                || async move {
                    let orders = with_retry(&retry, DbRetryPolicy, || {
                        let db = db.clone();
                        async move {
                            order::Entity::find()
                                .filter(order::Column::EnterpriseId.eq(enterprise_id))
                                .all(&*db)
                                .await
                        }
                    })
                    .await?;
                    Ok::<_, ServiceError>(DashboardStats::from_orders(&orders))
                },
            )
            .await
    }

    #[instrument(skip(self, user), fields(account_id = %user.account_id))]
    pub async fn recent_orders(
        &self,
        user: &AuthUser,
    ) -> Result<Cached<Vec<order::Model>>, ServiceError> {
        let enterprise_id = self.enterprise_for(user).await?.id;
        let db = self.db.clone();
        let retry = self.retry.clone();

        self.cache
            .get_or_compute(
                &keys::enterprise_recent_orders(enterprise_id),
                self.cache.default_ttl(),
                || async move {
                    let orders = with_retry(&retry, DbRetryPolicy, || {
                        let db = db.clone();
                        async move {
                            order::Entity::find()
                                .filter(order::Column::EnterpriseId.eq(enterprise_id))
                                .order_by_desc(order::Column::CreatedAt)
                                .limit(RECENT_ORDERS_LIMIT)
                                .all(&*db)
                                .await
                        }
                    })
                    .await?;
                    Ok::<_, ServiceError>(orders)
                },
            )
            .await
    }

    /// Settlements of the enterprise, newest period first.
    #[instrument(skip(self, user), fields(account_id = %user.account_id))]
    pub async fn list_settlements(
        &self,
        user: &AuthUser,
    ) -> Result<Vec<SettlementSummary>, ServiceError> {
        let enterprise_id = self.enterprise_for(user).await?.id;
        let db = &*self.db;

        let settlements = with_retry(&self.retry, DbRetryPolicy, move || async move {
            settlement::Entity::find()
                .filter(settlement::Column::EnterpriseId.eq(enterprise_id))
                .order_by_desc(settlement::Column::PeriodStart)
                .all(db)
                .await
        })
        .await?;

        let mut summaries = Vec::with_capacity(settlements.len());
        for settlement in settlements {
            let item_count = settlement_item::Entity::find()
                .filter(settlement_item::Column::SettlementId.eq(settlement.id))
                .count(db)
                .await?;
            summaries.push(SettlementSummary {
                id: settlement.id,
                period_start: settlement.period_start,
                period_end: settlement.period_end,
                net_payout: settlement.net_payout,
                status: settlement.status,
                item_count,
            });
        }
        Ok(summaries)
    }
}
