use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json,
};

use crate::{errors::ServiceError, services::payments::WebhookAck, AppState};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Payment provider callback. The body is taken raw so the signature can be
/// checked over the exact bytes that were signed.
#[utoipa::path(
    post,
    path = "/api/payments/webhook",
    summary = "Payment provider webhook",
    request_body(content = String, content_type = "application/json"),
    params(("Stripe-Signature" = String, Header, description = "t=<unix>,v1=<hex hmac>")),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 400, description = "Missing or invalid signature", body = crate::errors::ErrorResponse),
        (status = 503, description = "Webhook secret not configured", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let ack = state
        .services
        .payments
        .handle_webhook(&body, signature)
        .await?;
    Ok(Json(ack))
}
