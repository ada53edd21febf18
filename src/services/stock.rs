use crate::{entities::food, errors::ServiceError};
use sea_orm::{ConnectionTrait, EntityTrait};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Upper bound on the quantity of a single cart line
pub const MAX_QUANTITY_PER_ITEM: i32 = 10;

/// Pre-checks every `(food_id, quantity)` line and returns the loaded foods in
/// line order.
///
/// Stops at the first violation. Nothing is reserved or decremented, so the
/// result only holds for the transaction it runs in.
#[instrument(skip(conn, lines), fields(lines = lines.len()))]
pub async fn check_stock<C>(conn: &C, lines: &[(Uuid, i32)]) -> Result<Vec<food::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let mut foods = Vec::with_capacity(lines.len());

    for &(food_id, quantity) in lines {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "Quantity for food {} must be at least 1",
                food_id
            )));
        }

        let food = food::Entity::find_by_id(food_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Food {} not found", food_id)))?;

        if quantity > MAX_QUANTITY_PER_ITEM {
            warn!(%food_id, quantity, "Quantity above per-item limit");
            return Err(ServiceError::InsufficientStock(format!(
                "Insufficient stock for dish '{}'",
                food.dish_name
            )));
        }

        if !food.is_available {
            warn!(%food_id, "Dish is not available");
            return Err(ServiceError::InsufficientStock(format!(
                "Insufficient stock for dish '{}'",
                food.dish_name
            )));
        }

        debug!(%food_id, quantity, "Stock line accepted");
        foods.push(food);
    }

    Ok(foods)
}
