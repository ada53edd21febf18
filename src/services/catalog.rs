use crate::{
    db::DbPool,
    entities::{category, enterprise, food},
    errors::ServiceError,
    middleware_helpers::retry::{with_retry, DbRetryPolicy, RetryConfig},
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Read-only access to restaurants, menus and categories
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DbPool>,
    retry: RetryConfig,
}

impl CatalogService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self {
            db,
            retry: RetryConfig::default(),
        }
    }

    #[instrument(skip(self))]
    pub async fn list_restaurants(&self) -> Result<Vec<enterprise::Model>, ServiceError> {
        let db = &*self.db;
        with_retry(&self.retry, DbRetryPolicy, move || async move {
            enterprise::Entity::find()
                .filter(enterprise::Column::IsActive.eq(true))
                .order_by_asc(enterprise::Column::Name)
                .all(db)
                .await
        })
        .await
        .map_err(ServiceError::from)
    }

    /// Available dishes of one restaurant.
    #[instrument(skip(self))]
    pub async fn list_foods(&self, restaurant_id: Uuid) -> Result<Vec<food::Model>, ServiceError> {
        let db = &*self.db;
        let restaurant = with_retry(&self.retry, DbRetryPolicy, move || async move {
            enterprise::Entity::find_by_id(restaurant_id).one(db).await
        })
        .await?;
        if restaurant.is_none() {
            return Err(ServiceError::NotFound(format!(
                "Restaurant {} not found",
                restaurant_id
            )));
        }

        with_retry(&self.retry, DbRetryPolicy, move || async move {
            food::Entity::find()
                .filter(food::Column::EnterpriseId.eq(restaurant_id))
                .filter(food::Column::IsAvailable.eq(true))
                .order_by_asc(food::Column::DishName)
                .all(db)
                .await
        })
        .await
        .map_err(ServiceError::from)
    }

    #[instrument(skip(self))]
    pub async fn list_categories(&self) -> Result<Vec<category::Model>, ServiceError> {
        let db = &*self.db;
        with_retry(&self.retry, DbRetryPolicy, move || async move {
            category::Entity::find()
                .order_by_asc(category::Column::Name)
                .all(db)
                .await
        })
        .await
        .map_err(ServiceError::from)
    }
}
