use axum::{
    extract::{Path, State},
    response::Json,
};
use uuid::Uuid;

use crate::{
    entities::{category, enterprise, food},
    ApiResponse, ApiResult, AppState,
};

#[utoipa::path(
    get,
    path = "/api/restaurants",
    summary = "List restaurants",
    responses((status = 200, description = "Active restaurants", body = ApiResponse<Vec<enterprise::Model>>)),
    tag = "catalog"
)]
pub async fn list_restaurants(State(state): State<AppState>) -> ApiResult<Vec<enterprise::Model>> {
    let restaurants = state.services.catalog.list_restaurants().await?;
    Ok(Json(ApiResponse::success(restaurants)))
}

#[utoipa::path(
    get,
    path = "/api/restaurants/{id}/foods",
    summary = "List a restaurant's menu",
    params(("id" = Uuid, Path, description = "Restaurant id")),
    responses(
        (status = 200, description = "Available dishes", body = ApiResponse<Vec<food::Model>>),
        (status = 404, description = "Unknown restaurant", body = crate::errors::ErrorResponse),
    ),
    tag = "catalog"
)]
pub async fn list_foods(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<food::Model>> {
    let foods = state.services.catalog.list_foods(id).await?;
    Ok(Json(ApiResponse::success(foods)))
}

#[utoipa::path(
    get,
    path = "/api/categories",
    summary = "List food categories",
    responses((status = 200, description = "Categories", body = ApiResponse<Vec<category::Model>>)),
    tag = "catalog"
)]
pub async fn list_categories(State(state): State<AppState>) -> ApiResult<Vec<category::Model>> {
    let categories = state.services.catalog.list_categories().await?;
    Ok(Json(ApiResponse::success(categories)))
}
