use crate::{
    auth::AuthUser,
    cache::{keys, Cached, CacheStore},
    db::DbPool,
    entities::voucher::{self, VoucherStatus},
    errors::ServiceError,
    services::{accounts::enterprise_profile, payments::validate_non_negative_decimal},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn validate_percent(value: &Decimal) -> Result<(), ValidationError> {
    if *value > Decimal::ZERO && *value <= Decimal::ONE_HUNDRED {
        Ok(())
    } else {
        let mut err = ValidationError::new("range");
        err.message = Some("Discount percent must be within (0, 100]".into());
        Err(err)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateVoucherRequest {
    #[validate(length(min = 3, max = 50, message = "Code must be 3-50 characters"))]
    pub code: String,
    pub expiry_date: DateTime<Utc>,
    #[validate(custom = "validate_percent")]
    pub discount_percent: Option<Decimal>,
    #[validate(custom = "validate_non_negative_decimal")]
    pub discount_amount: Option<Decimal>,
    #[validate(custom = "validate_non_negative_decimal")]
    pub min_order_value: Option<Decimal>,
    #[validate(range(min = 1))]
    pub max_usage: Option<i32>,
}

#[derive(Clone)]
pub struct VoucherService {
    db: Arc<DbPool>,
    cache: CacheStore,
}

impl VoucherService {
    pub fn new(db: Arc<DbPool>, cache: CacheStore) -> Self {
        Self { db, cache }
    }

    /// Submits a voucher for admin approval.
    #[instrument(skip(self, user, request), fields(account_id = %user.account_id, code = %request.code))]
    pub async fn create(
        &self,
        user: &AuthUser,
        request: CreateVoucherRequest,
    ) -> Result<voucher::Model, ServiceError> {
        request.validate()?;
        let db = &*self.db;
        let now = Utc::now();

        if request.expiry_date <= now {
            return Err(ServiceError::ValidationError(
                "Expiry date must be in the future".into(),
            ));
        }

        let code = request.code.trim().to_uppercase();
        let exists = voucher::Entity::find()
            .filter(voucher::Column::Code.eq(code.clone()))
            .one(db)
            .await?;
        if exists.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Voucher code {} already exists",
                code
            )));
        }

        let enterprise_id = enterprise_profile(db, user.account_id)
            .await?
            .map(|enterprise| enterprise.id);

        let created = voucher::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            enterprise_id: Set(enterprise_id),
            expiry_date: Set(request.expiry_date),
            discount_percent: Set(request.discount_percent),
            discount_amount: Set(request.discount_amount),
            min_order_value: Set(request.min_order_value),
            max_usage: Set(request.max_usage),
            status: Set(VoucherStatus::Pending),
            created_by: Set(user.account_id),
            created_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(|e| match e.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(_)) => {
                ServiceError::Conflict("Voucher code already exists".into())
            }
            _ => ServiceError::DatabaseError(e),
        })?;

        info!(voucher_id = %created.id, "Voucher submitted");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn approve(&self, voucher_id: Uuid) -> Result<voucher::Model, ServiceError> {
        let db = &*self.db;
        let existing = voucher::Entity::find_by_id(voucher_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Voucher {} not found", voucher_id)))?;

        if existing.status != VoucherStatus::Pending {
            return Err(ServiceError::InvalidStatus(
                "Only pending vouchers can be approved".into(),
            ));
        }

        let mut active: voucher::ActiveModel = existing.into();
        active.status = Set(VoucherStatus::Approved);
        let approved = active.update(db).await?;

        self.cache.invalidate(keys::APPROVED_VOUCHERS).await;
        info!(%voucher_id, "Voucher approved");
        Ok(approved)
    }

    /// Approved vouchers that have not expired, served from cache when warm.
    pub async fn list_approved(&self) -> Result<Cached<Vec<voucher::Model>>, ServiceError> {
        let db = self.db.clone();
        self.cache
            .get_or_compute(keys::APPROVED_VOUCHERS, self.cache.default_ttl(), || async move {
                let now = Utc::now();
                let vouchers = voucher::Entity::find()
                    .filter(voucher::Column::Status.eq(VoucherStatus::Approved))
                    .order_by_asc(voucher::Column::ExpiryDate)
                    .all(&*db)
                    .await?;
                Ok::<_, ServiceError>(
                    vouchers
                        .into_iter()
                        .filter(|voucher| voucher.expiry_date > now)
                        .collect(),
                )
            })
            .await
    }
}
