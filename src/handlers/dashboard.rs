use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::AuthUser,
    entities::order,
    services::dashboard::{DashboardStats, SettlementSummary},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatsResponse {
    pub stats: DashboardStats,
    pub from_cache: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RecentOrdersResponse {
    pub orders: Vec<order::Model>,
    pub from_cache: bool,
}

#[utoipa::path(
    get,
    path = "/api/enterprise/dashboard/stats",
    summary = "Dashboard statistics",
    responses(
        (status = 200, description = "Order counts, revenue and commission", body = ApiResponse<StatsResponse>),
        (status = 403, description = "No enterprise profile", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "enterprise"
)]
pub async fn stats(State(state): State<AppState>, user: AuthUser) -> ApiResult<StatsResponse> {
    let cached = state.services.dashboard.stats(&user).await?;
    Ok(Json(ApiResponse::success(StatsResponse {
        stats: cached.data,
        from_cache: cached.from_cache,
    })))
}

#[utoipa::path(
    get,
    path = "/api/enterprise/dashboard/recent-orders",
    summary = "Recent orders",
    responses(
        (status = 200, description = "Ten newest orders", body = ApiResponse<RecentOrdersResponse>),
        (status = 403, description = "No enterprise profile", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "enterprise"
)]
pub async fn recent_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<RecentOrdersResponse> {
    let cached = state.services.dashboard.recent_orders(&user).await?;
    Ok(Json(ApiResponse::success(RecentOrdersResponse {
        orders: cached.data,
        from_cache: cached.from_cache,
    })))
}

#[utoipa::path(
    get,
    path = "/api/enterprise/settlements",
    summary = "Monthly settlements",
    responses(
        (status = 200, description = "Settlements newest period first", body = ApiResponse<Vec<SettlementSummary>>),
        (status = 403, description = "No enterprise profile", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "enterprise"
)]
pub async fn settlements(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Vec<SettlementSummary>> {
    let settlements = state.services.dashboard.list_settlements(&user).await?;
    Ok(Json(ApiResponse::success(settlements)))
}
