mod common;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use common::{auth_user, TestApp};
use foodhub_api::{
    entities::{
        order::{self, OrderStatus},
        order_detail,
        payment::{self, PaymentStatus},
        settlement::{self, SettlementStatus},
        settlement_item,
    },
    errors::ServiceError,
    services::{
        orders::{CreateOrderRequest, OrderLineRequest},
        settlements,
    },
};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

fn single_line(food_id: Uuid, quantity: i32) -> CreateOrderRequest {
    CreateOrderRequest {
        items: vec![OrderLineRequest {
            food_id,
            restaurant_id: None,
            price: dec!(100000),
            quantity,
        }],
        delivery_address: "7 Nguyen Hue".into(),
        delivery_phone: "0912345678".into(),
        delivery_note: Some("Ring twice".into()),
        voucher_code: None,
        payment_intent_id: None,
    }
}

#[tokio::test]
async fn orders_in_same_month_share_one_settlement() {
    let app = TestApp::new().await;
    let (_, restaurant) = app.seed_enterprise("owner@comtam.vn", None).await;
    let dish = app
        .seed_food(restaurant.id, "Com Tam", dec!(100000), true)
        .await;
    let (account, _) = app.seed_customer("khoa@example.com").await;
    let user = auth_user(&account);

    let first = app
        .state
        .services
        .orders
        .create_order(&user, single_line(dish.id, 1))
        .await
        .unwrap();
    let second = app
        .state
        .services
        .orders
        .create_order(&user, single_line(dish.id, 2))
        .await
        .unwrap();

    let all = settlement::Entity::find().all(app.db()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].enterprise_id, restaurant.id);
    assert_eq!(all[0].status, SettlementStatus::Pending);

    let items = settlement_item::Entity::find()
        .filter(settlement_item::Column::SettlementId.eq(all[0].id))
        .all(app.db())
        .await
        .unwrap();
    let mut linked: Vec<Uuid> = items.iter().map(|item| item.order_id).collect();
    linked.sort();
    let mut expected = vec![first.order_id, second.order_id];
    expected.sort();
    assert_eq!(linked, expected);
}

#[tokio::test]
async fn a_new_month_opens_a_new_settlement() {
    let app = TestApp::new().await;
    let (_, restaurant) = app.seed_enterprise("owner@banhmi.vn", None).await;

    let january = Utc.with_ymd_and_hms(2025, 1, 31, 23, 0, 0).unwrap();
    let february = Utc.with_ymd_and_hms(2025, 2, 1, 0, 30, 0).unwrap();

    let first = settlements::find_or_create_pending(app.db(), restaurant.id, january)
        .await
        .unwrap();
    let again = settlements::find_or_create_pending(app.db(), restaurant.id, january)
        .await
        .unwrap();
    let next = settlements::find_or_create_pending(app.db(), restaurant.id, february)
        .await
        .unwrap();

    assert_eq!(first.id, again.id);
    assert_ne!(first.id, next.id);
    assert_eq!(first.period_start, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    assert_eq!(
        first.period_end,
        Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 59).unwrap()
    );
    assert_eq!(next.period_start, Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap());
    assert_eq!(settlement::Entity::find().count(app.db()).await.unwrap(), 2);
}

#[tokio::test]
async fn deleting_an_order_removes_every_dependent_row() {
    let app = TestApp::new().await;
    let (_, restaurant) = app.seed_enterprise("owner@bunbo.vn", None).await;
    let dish = app
        .seed_food(restaurant.id, "Bun Bo Hue", dec!(100000), true)
        .await;
    let (account, _) = app.seed_customer("linh@example.com").await;
    let user = auth_user(&account);

    let kept = app
        .state
        .services
        .orders
        .create_order(&user, single_line(dish.id, 1))
        .await
        .unwrap();
    let doomed = app
        .state
        .services
        .orders
        .create_order(&user, single_line(dish.id, 3))
        .await
        .unwrap();

    app.state
        .services
        .orders
        .delete_order(&user, doomed.order_id)
        .await
        .expect("order deleted");

    assert!(order::Entity::find_by_id(doomed.order_id)
        .one(app.db())
        .await
        .unwrap()
        .is_none());
    for count in [
        order_detail::Entity::find()
            .filter(order_detail::Column::OrderId.eq(doomed.order_id))
            .count(app.db())
            .await
            .unwrap(),
        payment::Entity::find()
            .filter(payment::Column::OrderId.eq(doomed.order_id))
            .count(app.db())
            .await
            .unwrap(),
        settlement_item::Entity::find()
            .filter(settlement_item::Column::OrderId.eq(doomed.order_id))
            .count(app.db())
            .await
            .unwrap(),
    ] {
        assert_eq!(count, 0);
    }

    // The other order and the shared settlement stay intact.
    assert!(order::Entity::find_by_id(kept.order_id)
        .one(app.db())
        .await
        .unwrap()
        .is_some());
    assert_eq!(settlement::Entity::find().count(app.db()).await.unwrap(), 1);
    assert_eq!(
        settlement_item::Entity::find().count(app.db()).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn failed_deletion_keeps_every_row() {
    let app = TestApp::new().await;
    let (_, restaurant) = app.seed_enterprise("owner@goicuon.vn", None).await;
    let dish = app
        .seed_food(restaurant.id, "Goi Cuon", dec!(100000), true)
        .await;
    let (account, _) = app.seed_customer("quynh@example.com").await;
    let user = auth_user(&account);

    let created = app
        .state
        .services
        .orders
        .create_order(&user, single_line(dish.id, 2))
        .await
        .unwrap();

    // The order row goes last, after its dependents are already deleted.
    app.db()
        .execute_unprepared(
            "CREATE TRIGGER keep_orders BEFORE DELETE ON orders \
             BEGIN SELECT RAISE(ABORT, 'orders are archived'); END;",
        )
        .await
        .unwrap();

    let result = app
        .state
        .services
        .orders
        .delete_order(&user, created.order_id)
        .await;
    assert_matches!(result, Err(ServiceError::DatabaseError(_)));

    assert!(order::Entity::find_by_id(created.order_id)
        .one(app.db())
        .await
        .unwrap()
        .is_some());
    for (table, count) in [
        (
            "order_details",
            order_detail::Entity::find()
                .filter(order_detail::Column::OrderId.eq(created.order_id))
                .count(app.db())
                .await
                .unwrap(),
        ),
        (
            "payments",
            payment::Entity::find()
                .filter(payment::Column::OrderId.eq(created.order_id))
                .count(app.db())
                .await
                .unwrap(),
        ),
        (
            "settlement_items",
            settlement_item::Entity::find()
                .filter(settlement_item::Column::OrderId.eq(created.order_id))
                .count(app.db())
                .await
                .unwrap(),
        ),
    ] {
        assert_eq!(count, 1, "{} rows were removed", table);
    }
}

#[tokio::test]
async fn customers_cannot_delete_each_others_orders() {
    let app = TestApp::new().await;
    let (_, restaurant) = app.seed_enterprise("owner@xoi.vn", None).await;
    let dish = app.seed_food(restaurant.id, "Xoi Ga", dec!(100000), true).await;
    let (owner, _) = app.seed_customer("mai@example.com").await;
    let (stranger, _) = app.seed_customer("nam@example.com").await;

    let created = app
        .state
        .services
        .orders
        .create_order(&auth_user(&owner), single_line(dish.id, 1))
        .await
        .unwrap();

    let result = app
        .state
        .services
        .orders
        .delete_order(&auth_user(&stranger), created.order_id)
        .await;
    assert_matches!(result, Err(ServiceError::Forbidden(_)));

    let missing = app
        .state
        .services
        .orders
        .delete_order(&auth_user(&owner), Uuid::new_v4())
        .await;
    assert_matches!(missing, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn delivering_a_cash_order_completes_payment_and_books_commission() {
    let app = TestApp::new().await;
    let (owner, restaurant) = app
        .seed_enterprise("owner@lau.vn", Some(dec!(10)))
        .await;
    let dish = app.seed_food(restaurant.id, "Lau Thai", dec!(100000), true).await;
    let (account, _) = app.seed_customer("oanh@example.com").await;

    let created = app
        .state
        .services
        .orders
        .create_order(&auth_user(&account), single_line(dish.id, 1))
        .await
        .unwrap();

    let orders = &app.state.services.orders;
    let enterprise_user = auth_user(&owner);
    for status in [
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
    ] {
        orders
            .update_status(&enterprise_user, created.order_id, status)
            .await
            .unwrap_or_else(|e| panic!("transition to {} failed: {}", status, e));
    }

    let stored = order::Entity::find_by_id(created.order_id)
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, OrderStatus::Delivered);
    assert_eq!(
        stored.commission_amount,
        Some((created.total_amount * dec!(10) / dec!(100)).round_dp(4))
    );

    let payment = payment::Entity::find()
        .filter(payment::Column::OrderId.eq(created.order_id))
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);

    let backwards = orders
        .update_status(&enterprise_user, created.order_id, OrderStatus::Pending)
        .await;
    assert_matches!(backwards, Err(ServiceError::InvalidStatus(_)));
}

#[tokio::test]
async fn other_enterprises_cannot_move_the_order() {
    let app = TestApp::new().await;
    let (_, restaurant) = app.seed_enterprise("owner@che.vn", None).await;
    let (rival, _) = app.seed_enterprise("owner@rival.vn", None).await;
    let dish = app.seed_food(restaurant.id, "Che Ba Mau", dec!(100000), true).await;
    let (account, _) = app.seed_customer("phuong@example.com").await;

    let created = app
        .state
        .services
        .orders
        .create_order(&auth_user(&account), single_line(dish.id, 1))
        .await
        .unwrap();

    let result = app
        .state
        .services
        .orders
        .update_status(&auth_user(&rival), created.order_id, OrderStatus::Confirmed)
        .await;
    assert_matches!(result, Err(ServiceError::Forbidden(_)));
}
