use crate::{
    entities::{
        settlement::{self, SettlementStatus},
        settlement_item,
    },
    errors::ServiceError,
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use tracing::{debug, info};
use uuid::Uuid;

/// First instant and last second of the calendar month containing `now` (UTC).
pub fn month_bounds(now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>), ServiceError> {
    let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1);
    let next = if now.month() == 12 {
        NaiveDate::from_ymd_opt(now.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(now.year(), now.month() + 1, 1)
    };

    let (first, next) = match (first, next) {
        (Some(first), Some(next)) => (first, next),
        _ => {
            return Err(ServiceError::InternalError(format!(
                "Cannot compute settlement period for {}",
                now
            )))
        }
    };

    let start = first
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive));
    let end = next
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive) - Duration::seconds(1));

    start
        .zip(end)
        .ok_or_else(|| ServiceError::InternalError("Invalid settlement period".to_string()))
}

/// Returns the Pending settlement of the enterprise for the month of `now`,
/// creating it with a zero payout when none exists yet.
pub async fn find_or_create_pending<C>(
    conn: &C,
    enterprise_id: Uuid,
    now: DateTime<Utc>,
) -> Result<settlement::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let (period_start, period_end) = month_bounds(now)?;

    let existing = settlement::Entity::find()
        .filter(settlement::Column::EnterpriseId.eq(enterprise_id))
        .filter(settlement::Column::PeriodStart.eq(period_start))
        .filter(settlement::Column::PeriodEnd.eq(period_end))
        .filter(settlement::Column::Status.eq(SettlementStatus::Pending))
        .one(conn)
        .await?;

    if let Some(existing) = existing {
        debug!(settlement_id = %existing.id, "Reusing pending settlement");
        return Ok(existing);
    }

    let created = settlement::ActiveModel {
        id: Set(Uuid::new_v4()),
        enterprise_id: Set(enterprise_id),
        period_start: Set(period_start),
        period_end: Set(period_end),
        net_payout: Set(Decimal::ZERO),
        status: Set(SettlementStatus::Pending),
        created_at: Set(now),
    }
    .insert(conn)
    .await
    .map_err(|e| match e.sql_err() {
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_)) => ServiceError::Conflict(
            "Settlement for this period was created concurrently".to_string(),
        ),
        _ => ServiceError::DatabaseError(e),
    })?;

    info!(
        settlement_id = %created.id,
        %enterprise_id,
        period_start = %period_start,
        "Created settlement"
    );
    Ok(created)
}

/// Links an order to a settlement.
pub async fn add_item<C>(
    conn: &C,
    settlement_id: Uuid,
    order_id: Uuid,
    is_cod: bool,
) -> Result<settlement_item::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let item = settlement_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        settlement_id: Set(settlement_id),
        order_id: Set(order_id),
        is_cod: Set(is_cod),
    }
    .insert(conn)
    .await?;
    Ok(item)
}
