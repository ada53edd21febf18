//! Card payment provider seam.
//!
//! [`StripeGateway`] speaks Stripe's form-encoded REST API. When no secret key
//! is configured the service runs with [`UnconfiguredGateway`], which answers
//! every call with `ServiceUnavailable` so cash checkout keeps working.

use async_trait::async_trait;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::ServiceError;

/// Currencies Stripe charges in whole units
const ZERO_DECIMAL_CURRENCIES: &[&str] = &["vnd", "jpy", "krw", "clp", "xof"];

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntentRequest {
    pub amount: Decimal,
    pub currency: String,
    pub metadata: HashMap<String, String>,
    pub idempotency_key: String,
}

/// Subset of the Stripe PaymentIntent object the service reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntent, ServiceError>;

    async fn attach_order_metadata(
        &self,
        payment_intent_id: &str,
        order_id: Uuid,
    ) -> Result<(), ServiceError>;
}

/// Amount in the currency's smallest unit.
pub fn to_minor_units(amount: Decimal, currency: &str) -> Result<i64, ServiceError> {
    let scaled = if ZERO_DECIMAL_CURRENCIES.contains(&currency.to_ascii_lowercase().as_str()) {
        amount
    } else {
        amount * Decimal::ONE_HUNDRED
    };
    scaled
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::BadRequest(format!("Amount {} is out of range", amount)))
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base: String,
    pub api_version: String,
}

pub struct StripeGateway {
    config: StripeConfig,
    client: reqwest::Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn post_form(
        &self,
        path: &str,
        params: &HashMap<String, String>,
        idempotency_key: Option<&str>,
    ) -> Result<reqwest::Response, ServiceError> {
        let mut request = self
            .client
            .post(self.endpoint(path))
            .basic_auth(&self.config.secret_key, Some(""))
            .header("Stripe-Version", &self.config.api_version)
            .form(params);

        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request.send().await.map_err(|e| {
            error!(error = %e, "Stripe request failed");
            ServiceError::ExternalServiceError(format!("Stripe request failed: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, error = %error_text, "Stripe API error");
            return Err(ServiceError::ExternalServiceError(format!(
                "Stripe error ({}): {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(amount = %request.amount, currency = %request.currency))]
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntent, ServiceError> {
        let mut params: HashMap<String, String> = HashMap::new();
        params.insert(
            "amount".to_string(),
            to_minor_units(request.amount, &request.currency)?.to_string(),
        );
        params.insert("currency".to_string(), request.currency.to_ascii_lowercase());
        params.insert(
            "automatic_payment_methods[enabled]".to_string(),
            "true".to_string(),
        );
        for (key, value) in request.metadata {
            params.insert(format!("metadata[{}]", key), value);
        }

        let response = self
            .post_form("payment_intents", &params, Some(&request.idempotency_key))
            .await?;
        let intent: PaymentIntent = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("Failed to parse Stripe response: {}", e))
        })?;

        info!(payment_intent_id = %intent.id, "Payment intent created");
        Ok(intent)
    }

    #[instrument(skip(self))]
    async fn attach_order_metadata(
        &self,
        payment_intent_id: &str,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let mut params: HashMap<String, String> = HashMap::new();
        params.insert("metadata[order_id]".to_string(), order_id.to_string());

        self.post_form(&format!("payment_intents/{}", payment_intent_id), &params, None)
            .await?;
        Ok(())
    }
}

/// Used when no Stripe secret key is configured
#[derive(Debug, Default, Clone)]
pub struct UnconfiguredGateway;

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn create_payment_intent(
        &self,
        _request: PaymentIntentRequest,
    ) -> Result<PaymentIntent, ServiceError> {
        Err(ServiceError::ServiceUnavailable(
            "Card payments are not configured".to_string(),
        ))
    }

    async fn attach_order_metadata(
        &self,
        _payment_intent_id: &str,
        _order_id: Uuid,
    ) -> Result<(), ServiceError> {
        Err(ServiceError::ServiceUnavailable(
            "Card payments are not configured".to_string(),
        ))
    }
}

/// Picks the gateway matching the configuration.
pub fn gateway_from_config(config: &AppConfig) -> Result<std::sync::Arc<dyn PaymentGateway>, ServiceError> {
    match config.stripe_secret_key.as_deref().filter(|key| !key.is_empty()) {
        Some(secret_key) => Ok(std::sync::Arc::new(StripeGateway::new(StripeConfig {
            secret_key: secret_key.to_string(),
            api_base: config.stripe_api_base.clone(),
            api_version: config.stripe_api_version.clone(),
        })?)),
        None => Ok(std::sync::Arc::new(UnconfiguredGateway)),
    }
}
