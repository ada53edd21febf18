use axum::{extract::State, http::StatusCode, response::Json};

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::payments::{CheckoutSessionRequest, CheckoutSessionResponse},
    ApiResponse, AppState,
};

#[utoipa::path(
    post,
    path = "/api/payments/checkout-session",
    summary = "Create card checkout session",
    description = "Creates a payment intent for the cart total plus delivery fee",
    request_body = CheckoutSessionRequest,
    responses(
        (status = 201, description = "Payment intent created", body = ApiResponse<CheckoutSessionResponse>),
        (status = 400, description = "Invalid cart", body = crate::errors::ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider error", body = crate::errors::ErrorResponse),
        (status = 503, description = "Card payments not configured", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CheckoutSessionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutSessionResponse>>), ServiceError> {
    let session = state
        .services
        .payments
        .create_checkout_session(&user, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(session))))
}
