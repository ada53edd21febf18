use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "FoodHub API",
        version = "1.0.0",
        description = r#"
# FoodHub Food Delivery API

Checkout, payment and settlement backend for a multi-restaurant delivery marketplace.

## Authentication

Authenticated endpoints accept a JWT either as a bearer token or in the `token` cookie
set by register and login:

```
Authorization: Bearer <your-jwt-token>
```

## Roles

- **customer**: places, tracks and deletes orders, opens card checkout sessions
- **enterprise**: restaurant owners; manage order status, vouchers and settlements
- **admin**: approves vouchers and may act on any order

## Error Handling

Errors share one body shape:

```json
{
  "error": "Bad Request",
  "message": "Insufficient stock for dish 'Pho Bo'",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Registration, login and password reset"),
        (name = "catalog", description = "Restaurants, dishes and categories"),
        (name = "orders", description = "Checkout and order lifecycle"),
        (name = "payments", description = "Card checkout sessions and provider webhooks"),
        (name = "vouchers", description = "Discount vouchers"),
        (name = "enterprise", description = "Restaurant dashboard and settlements")
    ),
    paths(
        crate::handlers::auth::register,
        crate::handlers::auth::login,
        crate::handlers::auth::forgot_password,
        crate::handlers::auth::resend_reset,
        crate::handlers::auth::reset_password,

        crate::handlers::catalog::list_restaurants,
        crate::handlers::catalog::list_foods,
        crate::handlers::catalog::list_categories,

        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::track_order,
        crate::handlers::orders::delete_order,
        crate::handlers::orders::update_order_status,

        crate::handlers::payments::create_checkout_session,
        crate::handlers::payment_webhooks::payment_webhook,

        crate::handlers::vouchers::list_vouchers,
        crate::handlers::vouchers::create_voucher,
        crate::handlers::vouchers::approve_voucher,

        crate::handlers::dashboard::stats,
        crate::handlers::dashboard::recent_orders,
        crate::handlers::dashboard::settlements,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::ResponseMeta,
            crate::errors::ErrorResponse,
            crate::auth::AccessToken,

            crate::entities::account::AccountRole,
            crate::entities::account::AccountStatus,
            crate::entities::order::OrderStatus,
            crate::entities::payment::PaymentMethod,
            crate::entities::payment::PaymentStatus,
            crate::entities::voucher::VoucherStatus,
            crate::entities::settlement::SettlementStatus,

            crate::services::accounts::RegisterRequest,
            crate::services::accounts::LoginRequest,
            crate::services::accounts::ForgotPasswordRequest,
            crate::services::accounts::ResetPasswordRequest,
            crate::services::accounts::AccountView,
            crate::services::accounts::AuthResponse,
            crate::services::accounts::ForgotPasswordResponse,

            crate::services::orders::OrderLineRequest,
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::CreateOrderResponse,
            crate::services::orders::OrderDetailsResponse,
            crate::services::orders::TrackOrderResponse,
            crate::services::orders::UpdateOrderStatusRequest,

            crate::services::payments::CheckoutLine,
            crate::services::payments::CheckoutSessionRequest,
            crate::services::payments::CheckoutSessionResponse,
            crate::services::payments::WebhookAck,

            crate::services::vouchers::CreateVoucherRequest,
            crate::handlers::vouchers::VoucherListResponse,

            crate::services::dashboard::DashboardStats,
            crate::services::dashboard::SettlementSummary,
            crate::handlers::dashboard::StatsResponse,
            crate::handlers::dashboard::RecentOrdersResponse,
        )
    )
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Swagger UI at `/swagger-ui`, serving the document at `/api-docs/openapi.json`.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDocV1::openapi())
}
