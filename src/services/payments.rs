use crate::{
    auth::AuthUser,
    cache::CacheStore,
    config::AppConfig,
    db::DbPool,
    entities::{
        enterprise,
        order::{self, OrderStatus},
        payment::{self, PaymentStatus},
        payment_webhook_event,
    },
    errors::ServiceError,
    services::payment_gateway::{PaymentGateway, PaymentIntentRequest},
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

type HmacSha256 = Hmac<Sha256>;

pub const EVENT_PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const EVENT_PAYMENT_FAILED: &str = "payment_intent.payment_failed";

pub(crate) fn validate_non_negative_decimal(value: &Decimal) -> Result<(), ValidationError> {
    if *value >= Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("range");
        err.message = Some("Amount must not be negative".into());
        Err(err)
    }
}

/// `total × rate / 100`
pub fn commission_amount(total: Decimal, rate_percent: Decimal) -> Decimal {
    (total * rate_percent / Decimal::ONE_HUNDRED).round_dp(4)
}

/// Commission rate of the enterprise, or `default_rate` when it has none.
pub async fn commission_rate_for<C>(
    conn: &C,
    enterprise_id: Uuid,
    default_rate: Decimal,
) -> Result<Decimal, ServiceError>
where
    C: ConnectionTrait,
{
    let rate = enterprise::Entity::find_by_id(enterprise_id)
        .one(conn)
        .await?
        .and_then(|enterprise| enterprise.commission_rate);
    Ok(rate.unwrap_or(default_rate))
}

/// Verifies a `t=<unix>,v1=<hex>` signature header over `"{t}.{payload}"`.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now_unix: i64,
) -> Result<(), ServiceError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| ServiceError::InvalidSignature("Missing timestamp in signature".into()))?;
    if signatures.is_empty() {
        return Err(ServiceError::InvalidSignature(
            "Missing signature in header".into(),
        ));
    }
    if (now_unix - timestamp).abs() > tolerance_secs {
        return Err(ServiceError::InvalidSignature(
            "Timestamp outside tolerance window".into(),
        ));
    }

    let matches = signatures.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    });

    if matches {
        Ok(())
    } else {
        Err(ServiceError::InvalidSignature(
            "Signature does not match payload".into(),
        ))
    }
}

/// Builds a header value the way the provider signs its deliveries.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("HMAC error: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    fn order_id(&self) -> Option<Uuid> {
        self.data
            .object
            .get("metadata")
            .and_then(|metadata| metadata.get("order_id"))
            .and_then(|value| value.as_str())
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    pub processed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckoutLine {
    pub food_id: Uuid,
    #[validate(custom = "validate_non_negative_decimal")]
    pub price: Decimal,
    #[validate(range(min = 1, max = 10, message = "Quantity must be between 1 and 10"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckoutSessionRequest {
    #[validate(length(min = 1, message = "Cart must not be empty"))]
    pub items: Vec<CheckoutLine>,
    #[validate(length(min = 1, max = 500, message = "Delivery address is required"))]
    pub delivery_address: String,
    #[validate(length(min = 8, max = 20, message = "Delivery phone must be 8-20 characters"))]
    pub delivery_phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSessionResponse {
    pub payment_intent_id: String,
    pub client_secret: Option<String>,
    pub amount: Decimal,
}

/// Card checkout and payment provider callbacks
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    cache: CacheStore,
    config: Arc<AppConfig>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        cache: CacheStore,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            gateway,
            cache,
            config,
        }
    }

    pub fn gateway(&self) -> Arc<dyn PaymentGateway> {
        self.gateway.clone()
    }

    /// Creates a payment intent for a cart; the order itself is created later
    /// with the returned intent id.
    #[instrument(skip(self, user, request), fields(account_id = %user.account_id, lines = request.items.len()))]
    pub async fn create_checkout_session(
        &self,
        user: &AuthUser,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSessionResponse, ServiceError> {
        request.validate()?;
        for line in &request.items {
            line.validate()?;
        }

        let subtotal: Decimal = request
            .items
            .iter()
            .map(|line| line.price * Decimal::from(line.quantity))
            .sum();
        let amount = subtotal + self.config.delivery_fee;

        let mut metadata = HashMap::new();
        metadata.insert(
            "customer_account_id".to_string(),
            user.account_id.to_string(),
        );
        metadata.insert(
            "delivery_phone".to_string(),
            request.delivery_phone.clone(),
        );

        let intent = self
            .gateway
            .create_payment_intent(PaymentIntentRequest {
                amount,
                currency: self.config.currency.clone(),
                metadata,
                idempotency_key: Uuid::new_v4().to_string(),
            })
            .await?;

        info!(payment_intent_id = %intent.id, %amount, "Checkout session created");
        Ok(CheckoutSessionResponse {
            payment_intent_id: intent.id,
            client_secret: intent.client_secret,
            amount,
        })
    }

    /// Verifies, dedupes and applies a provider event.
    ///
    /// Events without a known order are acknowledged without changes so the
    /// provider stops redelivering them.
    #[instrument(skip(self, payload, signature))]
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, ServiceError> {
        let secret = self
            .config
            .stripe_webhook_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .ok_or_else(|| {
                ServiceError::ServiceUnavailable("Payment webhook is not configured".into())
            })?;
        let signature = signature
            .ok_or_else(|| ServiceError::InvalidSignature("Missing Stripe-Signature header".into()))?;
        verify_signature(
            payload,
            signature,
            secret,
            self.config.webhook_tolerance_secs as i64,
            Utc::now().timestamp(),
        )?;

        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::BadRequest(format!("Malformed webhook event: {}", e)))?;
        let order_id = event.order_id();
        info!(event_id = %event.id, event_type = %event.event_type, ?order_id, "Webhook received");

        let db = &*self.db;
        let txn = db.begin().await?;

        if payment_webhook_event::Entity::find_by_id(event.id.clone())
            .one(&txn)
            .await?
            .is_some()
        {
            info!(event_id = %event.id, "Duplicate webhook event ignored");
            return Ok(WebhookAck {
                received: true,
                processed: false,
            });
        }

        let recorded = payment_webhook_event::ActiveModel {
            event_id: Set(event.id.clone()),
            order_id: Set(order_id),
            event_type: Set(event.event_type.clone()),
            received_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await;
        if let Err(e) = recorded {
            return match e.sql_err() {
                Some(sea_orm::SqlErr::UniqueConstraintViolation(_)) => {
                    info!(event_id = %event.id, "Webhook event recorded concurrently");
                    Ok(WebhookAck {
                        received: true,
                        processed: false,
                    })
                }
                _ => Err(e.into()),
            };
        }

        let outcome = match event.event_type.as_str() {
            EVENT_PAYMENT_SUCCEEDED | EVENT_PAYMENT_FAILED => match order_id {
                Some(order_id) => self.apply_payment_event(&txn, &event, order_id).await?,
                None => {
                    warn!(event_id = %event.id, "Webhook event has no order_id metadata");
                    None
                }
            },
            other => {
                info!(event_type = other, "Unhandled webhook event type");
                None
            }
        };

        txn.commit().await?;

        if let Some(enterprise_id) = outcome {
            self.cache.invalidate_enterprise(enterprise_id).await;
        }

        Ok(WebhookAck {
            received: true,
            processed: outcome.is_some(),
        })
    }

    /// Returns the enterprise of the updated order, `None` for unknown orders.
    async fn apply_payment_event<C>(
        &self,
        conn: &C,
        event: &WebhookEvent,
        order_id: Uuid,
    ) -> Result<Option<Uuid>, ServiceError>
    where
        C: ConnectionTrait,
    {
        let Some(order) = order::Entity::find_by_id(order_id).one(conn).await? else {
            warn!(%order_id, "Webhook references unknown order");
            return Ok(None);
        };

        let now = Utc::now();
        let succeeded = event.event_type == EVENT_PAYMENT_SUCCEEDED;

        let payments = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .all(conn)
            .await?;
        if payments.is_empty() {
            warn!(%order_id, "Order has no payment row to update");
        }
        for existing in payments {
            let mut active: payment::ActiveModel = existing.into();
            if succeeded {
                active.status = Set(PaymentStatus::Completed);
                active.transaction_data = Set(Some(event.data.object.clone()));
            } else {
                active.status = Set(PaymentStatus::Failed);
            }
            active.updated_at = Set(now);
            active.update(conn).await?;
        }

        let enterprise_id = order.enterprise_id;
        let total = order.total_amount;
        let mut active: order::ActiveModel = order.into();
        if succeeded {
            let rate =
                commission_rate_for(conn, enterprise_id, self.config.default_commission_rate)
                    .await?;
            active.status = Set(OrderStatus::Confirmed);
            active.commission_amount = Set(Some(commission_amount(total, rate)));
        } else {
            active.status = Set(OrderStatus::Cancelled);
        }
        active.updated_at = Set(now);
        active.update(conn).await?;

        info!(%order_id, succeeded, "Payment event applied");
        Ok(Some(enterprise_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::account::AccountRole;
    use crate::services::payment_gateway::{MockPaymentGateway, PaymentIntent};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const SECRET: &str = "whsec_test_secret";

    #[test]
    fn commission_uses_percent_rate() {
        assert_eq!(commission_amount(dec!(360000), dec!(5)), dec!(18000));
        assert_eq!(commission_amount(dec!(100), dec!(12.5)), dec!(12.5));
    }

    #[test]
    fn valid_signature_is_accepted() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_payload(body, SECRET, 1_700_000_000).unwrap();
        assert!(verify_signature(body, &header, SECRET, 300, 1_700_000_100).is_ok());
    }

    #[test]
    fn tampered_or_stale_signatures_are_rejected() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_payload(body, SECRET, 1_700_000_000).unwrap();

        assert_matches!(
            verify_signature(br#"{"id":"evt_2"}"#, &header, SECRET, 300, 1_700_000_000),
            Err(ServiceError::InvalidSignature(_))
        );
        assert_matches!(
            verify_signature(body, &header, "other", 300, 1_700_000_000),
            Err(ServiceError::InvalidSignature(_))
        );
        assert_matches!(
            verify_signature(body, &header, SECRET, 300, 1_700_000_301),
            Err(ServiceError::InvalidSignature(_))
        );
        assert_matches!(
            verify_signature(body, "v1=deadbeef", SECRET, 300, 1_700_000_000),
            Err(ServiceError::InvalidSignature(_))
        );
    }

    #[test]
    fn order_id_is_read_from_metadata() {
        let order_id = Uuid::new_v4();
        let event: WebhookEvent = serde_json::from_value(serde_json::json!({
            "id": "evt_1",
            "type": EVENT_PAYMENT_SUCCEEDED,
            "data": {"object": {"id": "pi_1", "metadata": {"order_id": order_id.to_string()}}}
        }))
        .unwrap();
        assert_eq!(event.order_id(), Some(order_id));

        let event: WebhookEvent = serde_json::from_value(serde_json::json!({
            "id": "evt_2",
            "type": EVENT_PAYMENT_SUCCEEDED,
            "data": {"object": {"id": "pi_2", "metadata": {}}}
        }))
        .unwrap();
        assert_eq!(event.order_id(), None);
    }

    fn service_with(gateway: MockPaymentGateway) -> PaymentService {
        let config = AppConfig::new(
            "sqlite::memory:".into(),
            None,
            "unit-test-secret-that-is-long-enough-for-hs256-signing".into(),
            "127.0.0.1".into(),
            0,
            "test".into(),
        );
        PaymentService::new(
            Arc::new(sea_orm::DatabaseConnection::Disconnected),
            Arc::new(gateway),
            CacheStore::in_memory(Duration::from_secs(60)),
            Arc::new(config),
        )
    }

    fn customer() -> AuthUser {
        AuthUser {
            account_id: Uuid::new_v4(),
            role: AccountRole::Customer,
            email: "diner@example.com".into(),
        }
    }

    #[tokio::test]
    async fn checkout_session_charges_cart_plus_delivery_fee() {
        let user = customer();
        let account_id = user.account_id.to_string();

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_payment_intent()
            .withf(move |request| {
                request.amount == dec!(360000)
                    && request.currency == "vnd"
                    && request.metadata.get("customer_account_id") == Some(&account_id)
            })
            .times(1)
            .returning(|request| {
                Ok(PaymentIntent {
                    id: "pi_123".into(),
                    client_secret: Some("pi_123_secret".into()),
                    amount: 360000,
                    currency: request.currency,
                    status: "requires_payment_method".into(),
                })
            });

        let response = service_with(gateway)
            .create_checkout_session(
                &user,
                CheckoutSessionRequest {
                    items: vec![
                        CheckoutLine {
                            food_id: Uuid::new_v4(),
                            price: dec!(150000),
                            quantity: 2,
                        },
                        CheckoutLine {
                            food_id: Uuid::new_v4(),
                            price: dec!(45000),
                            quantity: 1,
                        },
                    ],
                    delivery_address: "12 Ly Thuong Kiet, Ha Noi".into(),
                    delivery_phone: "0901234567".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(response.payment_intent_id, "pi_123");
        assert_eq!(response.amount, dec!(360000));
    }

    #[tokio::test]
    async fn checkout_session_rejects_oversized_lines_before_calling_gateway() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_payment_intent().times(0);

        let result = service_with(gateway)
            .create_checkout_session(
                &customer(),
                CheckoutSessionRequest {
                    items: vec![CheckoutLine {
                        food_id: Uuid::new_v4(),
                        price: dec!(150000),
                        quantity: 11,
                    }],
                    delivery_address: "12 Ly Thuong Kiet, Ha Noi".into(),
                    delivery_phone: "0901234567".into(),
                },
            )
            .await;
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn webhook_without_secret_is_unavailable() {
        let result = service_with(MockPaymentGateway::new())
            .handle_webhook(b"{}", Some("t=1,v1=00"))
            .await;
        assert_matches!(result, Err(ServiceError::ServiceUnavailable(_)));
    }
}
