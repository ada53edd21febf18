use crate::{
    auth::AuthUser,
    cache::CacheStore,
    config::AppConfig,
    db::DbPool,
    entities::{
        account::AccountRole,
        order::{self, OrderStatus},
        order_detail,
        payment::{self, PaymentMethod, PaymentStatus},
        settlement_item,
        voucher::{self, VoucherStatus},
    },
    errors::ServiceError,
    services::{
        accounts::{customer_profile, enterprise_profile},
        payment_gateway::PaymentGateway,
        payments::{commission_amount, commission_rate_for, validate_non_negative_decimal},
        settlements, stock,
    },
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// One cart line as the client saw it at checkout
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderLineRequest {
    pub food_id: Uuid,
    pub restaurant_id: Option<Uuid>,
    #[validate(custom = "validate_non_negative_decimal")]
    pub price: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<OrderLineRequest>,
    #[validate(length(min = 1, max = 500, message = "Delivery address is required"))]
    pub delivery_address: String,
    #[validate(length(min = 8, max = 20, message = "Delivery phone must be 8-20 characters"))]
    pub delivery_phone: String,
    #[validate(length(max = 500))]
    pub delivery_note: Option<String>,
    #[validate(length(max = 50))]
    pub voucher_code: Option<String>,
    pub payment_intent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderDetailsResponse {
    pub order: order::Model,
    pub details: Vec<order_detail::Model>,
    pub payment: Option<payment::Model>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrackOrderResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub estimated_delivery_time: DateTime<Utc>,
    pub payment_status: Option<PaymentStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

/// Discount granted by an attached voucher.
// TODO: apply discount_percent / discount_amount once voucher pricing rules are agreed
fn voucher_discount(_voucher: Option<&voucher::Model>, _subtotal: Decimal) -> Decimal {
    Decimal::ZERO
}

/// Service for checkout and the order lifecycle
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    cache: CacheStore,
    gateway: Arc<dyn PaymentGateway>,
    config: Arc<AppConfig>,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        cache: CacheStore,
        gateway: Arc<dyn PaymentGateway>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            cache,
            gateway,
            config,
        }
    }

    /// Places an order for the authenticated customer.
    ///
    /// Order, details, payment and settlement link are written in one
    /// transaction; any failure leaves no rows behind.
    #[instrument(skip(self, user, request), fields(account_id = %user.account_id, lines = request.items.len()))]
    pub async fn create_order(
        &self,
        user: &AuthUser,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResponse, ServiceError> {
        request.validate()?;
        for line in &request.items {
            line.validate()?;
        }

        let db = &*self.db;
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let payment_intent_id = request
            .payment_intent_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let customer = customer_profile(&txn, user.account_id)
            .await?
            .ok_or_else(|| {
                ServiceError::Forbidden("A customer profile is required to place orders".into())
            })?;

        let lines: Vec<(Uuid, i32)> = request
            .items
            .iter()
            .map(|line| (line.food_id, line.quantity))
            .collect();
        let foods = stock::check_stock(&txn, &lines).await?;

        // A line may name its restaurant, but the dish's owner decides.
        for (line, food) in request.items.iter().zip(&foods) {
            if let Some(restaurant_id) = line.restaurant_id {
                if restaurant_id != food.enterprise_id {
                    warn!(food_id = %food.id, %restaurant_id, "Cart line names the wrong restaurant");
                    return Err(ServiceError::ValidationError(format!(
                        "Dish '{}' is not sold by restaurant {}",
                        food.dish_name, restaurant_id
                    )));
                }
            }
        }
        let enterprise_id = foods
            .first()
            .map(|food| food.enterprise_id)
            .ok_or_else(|| ServiceError::ValidationError("Cannot resolve restaurant".into()))?;

        let subtotal: Decimal = request
            .items
            .iter()
            .map(|line| line.price * Decimal::from(line.quantity))
            .sum();

        let voucher = match request.voucher_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => {
                let found = voucher::Entity::find()
                    .filter(voucher::Column::Code.eq(code))
                    .filter(voucher::Column::Status.eq(VoucherStatus::Approved))
                    .one(&txn)
                    .await?
                    .filter(|voucher| voucher.expiry_date > now);
                if found.is_none() {
                    info!(code, "Voucher code not applicable, ignoring");
                }
                found
            }
            _ => None,
        };

        let delivery_fee = self.config.delivery_fee;
        let total_amount = subtotal + delivery_fee - voucher_discount(voucher.as_ref(), subtotal);

        order::ActiveModel {
            id: Set(order_id),
            customer_id: Set(customer.id),
            enterprise_id: Set(enterprise_id),
            voucher_id: Set(voucher.as_ref().map(|voucher| voucher.id)),
            total_amount: Set(total_amount),
            delivery_fee: Set(delivery_fee),
            status: Set(OrderStatus::Pending),
            delivery_address: Set(request.delivery_address.trim().to_string()),
            delivery_phone: Set(request.delivery_phone.trim().to_string()),
            delivery_note: Set(request.delivery_note.clone()),
            estimated_delivery_time: Set(
                now + Duration::minutes(self.config.estimated_delivery_minutes)
            ),
            commission_amount: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, %order_id, "Failed to create order in database");
            ServiceError::DatabaseError(e)
        })?;

        for line in &request.items {
            order_detail::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                food_id: Set(line.food_id),
                quantity: Set(line.quantity),
                unit_price: Set(line.price),
                subtotal: Set(line.price * Decimal::from(line.quantity)),
            }
            .insert(&txn)
            .await?;
        }

        let payment = match &payment_intent_id {
            Some(intent_id) => payment::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                method: Set(PaymentMethod::CreditCard),
                transaction_id: Set(intent_id.clone()),
                status: Set(PaymentStatus::Completed),
                amount: Set(total_amount),
                transaction_data: Set(Some(serde_json::json!({
                    "payment_intent_id": intent_id,
                    "amount": total_amount,
                    "currency": self.config.currency,
                    "source": "checkout",
                }))),
                created_at: Set(now),
                updated_at: Set(now),
            },
            None => payment::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                method: Set(PaymentMethod::Cash),
                transaction_id: Set(format!("cash-{}", now.timestamp_millis())),
                status: Set(PaymentStatus::Pending),
                amount: Set(total_amount),
                transaction_data: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            },
        };
        payment.insert(&txn).await?;

        let settlement = settlements::find_or_create_pending(&txn, enterprise_id, now).await?;
        settlements::add_item(&txn, settlement.id, order_id, payment_intent_id.is_none()).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(%order_id, %enterprise_id, %total_amount, "Order created");

        self.cache.invalidate_enterprise(enterprise_id).await;
        if let Some(intent_id) = &payment_intent_id {
            if let Err(e) = self.gateway.attach_order_metadata(intent_id, order_id).await {
                warn!(error = %e, %order_id, "Failed to attach order id to payment intent");
            }
        }

        Ok(CreateOrderResponse {
            order_id,
            total_amount,
        })
    }

    /// Orders of the authenticated customer, newest first
    #[instrument(skip(self, user), fields(account_id = %user.account_id))]
    pub async fn list_for_customer(&self, user: &AuthUser) -> Result<Vec<order::Model>, ServiceError> {
        let db = &*self.db;
        let customer = customer_profile(db, user.account_id)
            .await?
            .ok_or_else(|| ServiceError::Forbidden("Customer profile required".into()))?;

        Ok(order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer.id))
            .order_by_desc(order::Column::CreatedAt)
            .all(db)
            .await?)
    }

    #[instrument(skip(self, user), fields(account_id = %user.account_id))]
    pub async fn get_order(
        &self,
        user: &AuthUser,
        order_id: Uuid,
    ) -> Result<OrderDetailsResponse, ServiceError> {
        let db = &*self.db;
        let order = self.load_order(db, order_id).await?;
        authorize_read(db, user, &order).await?;

        let details = order.find_related(order_detail::Entity).all(db).await?;
        let payment = order.find_related(payment::Entity).one(db).await?;

        Ok(OrderDetailsResponse {
            order,
            details,
            payment,
        })
    }

    #[instrument(skip(self, user), fields(account_id = %user.account_id))]
    pub async fn track_order(
        &self,
        user: &AuthUser,
        order_id: Uuid,
    ) -> Result<TrackOrderResponse, ServiceError> {
        let db = &*self.db;
        let order = self.load_order(db, order_id).await?;
        authorize_read(db, user, &order).await?;

        let payment_status = order
            .find_related(payment::Entity)
            .one(db)
            .await?
            .map(|payment| payment.status);

        Ok(TrackOrderResponse {
            order_id: order.id,
            status: order.status,
            estimated_delivery_time: order.estimated_delivery_time,
            payment_status,
        })
    }

    /// Moves an order along its lifecycle on behalf of the fulfilling enterprise.
    ///
    /// Delivering a cash order completes its pending payment and books the
    /// commission.
    #[instrument(skip(self, user), fields(account_id = %user.account_id))]
    pub async fn update_status(
        &self,
        user: &AuthUser,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let order = self.load_order(&txn, order_id).await?;
        if !user.is_admin() {
            let enterprise = enterprise_profile(&txn, user.account_id)
                .await?
                .ok_or_else(|| ServiceError::Forbidden("Enterprise profile required".into()))?;
            if enterprise.id != order.enterprise_id {
                return Err(ServiceError::Forbidden(
                    "Order belongs to another enterprise".into(),
                ));
            }
        }

        if !order.status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot change order status from {} to {}",
                order.status, new_status
            )));
        }

        let now = Utc::now();
        let enterprise_id = order.enterprise_id;
        let total = order.total_amount;
        let previous = order.status;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);
        active.updated_at = Set(now);

        if new_status == OrderStatus::Delivered {
            let pending_cash = payment::Entity::find()
                .filter(payment::Column::OrderId.eq(order_id))
                .filter(payment::Column::Method.eq(PaymentMethod::Cash))
                .filter(payment::Column::Status.eq(PaymentStatus::Pending))
                .all(&txn)
                .await?;
            for cash in pending_cash {
                let mut cash: payment::ActiveModel = cash.into();
                cash.status = Set(PaymentStatus::Completed);
                cash.updated_at = Set(now);
                cash.update(&txn).await?;
            }

            let rate =
                commission_rate_for(&txn, enterprise_id, self.config.default_commission_rate)
                    .await?;
            active.commission_amount = Set(Some(commission_amount(total, rate)));
        }

        let updated = active.update(&txn).await?;
        txn.commit().await?;

        info!(%order_id, from = %previous, to = %new_status, "Order status updated");
        self.cache.invalidate_enterprise(enterprise_id).await;
        Ok(updated)
    }

    /// Removes an order of the authenticated customer with every row that
    /// references it.
    #[instrument(skip(self, user), fields(account_id = %user.account_id))]
    pub async fn delete_order(&self, user: &AuthUser, order_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db;
        let order = self.load_order(db, order_id).await?;

        if !user.is_admin() {
            let owner = customer_profile(db, user.account_id).await?;
            if owner.map(|customer| customer.id) != Some(order.customer_id) {
                return Err(ServiceError::Forbidden(
                    "You can only delete your own orders".into(),
                ));
            }
        }

        let enterprise_id = order.enterprise_id;
        let txn = db.begin().await?;

        settlement_item::Entity::delete_many()
            .filter(settlement_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        payment::Entity::delete_many()
            .filter(payment::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        order_detail::Entity::delete_many()
            .filter(order_detail::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        order::Entity::delete_by_id(order_id).exec(&txn).await?;

        txn.commit().await?;

        info!(%order_id, "Order deleted");
        self.cache.invalidate_enterprise(enterprise_id).await;
        Ok(())
    }

    async fn load_order<C>(&self, conn: &C, order_id: Uuid) -> Result<order::Model, ServiceError>
    where
        C: ConnectionTrait,
    {
        order::Entity::find_by_id(order_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }
}

/// Owning customer, fulfilling enterprise or an admin.
async fn authorize_read<C>(conn: &C, user: &AuthUser, order: &order::Model) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let allowed = match user.role {
        AccountRole::Admin => true,
        AccountRole::Customer => customer_profile(conn, user.account_id)
            .await?
            .map(|customer| customer.id == order.customer_id)
            .unwrap_or(false),
        AccountRole::Enterprise => enterprise_profile(conn, user.account_id)
            .await?
            .map(|enterprise| enterprise.id == order.enterprise_id)
            .unwrap_or(false),
    };

    if allowed {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "You do not have access to this order".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn voucher_discount_is_zero() {
        assert_eq!(voucher_discount(None, dec!(345000)), Decimal::ZERO);
    }

    #[test]
    fn order_request_requires_items_and_phone() {
        let request = CreateOrderRequest {
            items: vec![],
            delivery_address: "12 Ly Thuong Kiet".into(),
            delivery_phone: "123".into(),
            delivery_note: None,
            voucher_code: None,
            payment_intent_id: None,
        };
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("items"));
        assert!(fields.contains_key("delivery_phone"));
    }
}
