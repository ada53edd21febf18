use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::voucher,
    errors::ServiceError,
    services::vouchers::CreateVoucherRequest,
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VoucherListResponse {
    pub vouchers: Vec<voucher::Model>,
    pub from_cache: bool,
}

#[utoipa::path(
    get,
    path = "/api/vouchers",
    summary = "List approved vouchers",
    responses((status = 200, description = "Approved, unexpired vouchers", body = ApiResponse<VoucherListResponse>)),
    tag = "vouchers"
)]
pub async fn list_vouchers(State(state): State<AppState>) -> ApiResult<VoucherListResponse> {
    let cached = state.services.vouchers.list_approved().await?;
    Ok(Json(ApiResponse::success(VoucherListResponse {
        vouchers: cached.data,
        from_cache: cached.from_cache,
    })))
}

#[utoipa::path(
    post,
    path = "/api/enterprise/vouchers",
    summary = "Submit voucher",
    description = "Creates a voucher awaiting admin approval",
    request_body = CreateVoucherRequest,
    responses(
        (status = 201, description = "Voucher submitted", body = ApiResponse<voucher::Model>),
        (status = 400, description = "Invalid voucher", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already exists", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "vouchers"
)]
pub async fn create_voucher(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateVoucherRequest>,
) -> Result<(StatusCode, Json<ApiResponse<voucher::Model>>), ServiceError> {
    let created = state.services.vouchers.create(&user, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

#[utoipa::path(
    post,
    path = "/api/admin/vouchers/{id}/approve",
    summary = "Approve voucher",
    params(("id" = Uuid, Path, description = "Voucher id")),
    responses(
        (status = 200, description = "Voucher approved", body = ApiResponse<voucher::Model>),
        (status = 400, description = "Voucher is not pending", body = crate::errors::ErrorResponse),
        (status = 404, description = "Voucher not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "vouchers"
)]
pub async fn approve_voucher(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<voucher::Model> {
    let approved = state.services.vouchers.approve(id).await?;
    Ok(Json(ApiResponse::success(approved)))
}
