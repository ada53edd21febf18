mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::{auth_user, TestApp, DELIVERY_FEE};
use foodhub_api::{
    entities::{
        order::{self, OrderStatus},
        order_detail,
        payment::{self, PaymentMethod, PaymentStatus},
        settlement, settlement_item,
        voucher::VoucherStatus,
    },
    errors::ServiceError,
    services::orders::{CreateOrderRequest, OrderLineRequest},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

struct Menu {
    enterprise_id: Uuid,
    pho: Uuid,
    spring_rolls: Uuid,
}

async fn seed_menu(app: &TestApp) -> Menu {
    let (_, restaurant) = app.seed_enterprise("owner@phohanoi.vn", None).await;
    let pho = app
        .seed_food(restaurant.id, "Pho Bo", dec!(150000), true)
        .await;
    let spring_rolls = app
        .seed_food(restaurant.id, "Cha Gio", dec!(45000), true)
        .await;
    Menu {
        enterprise_id: restaurant.id,
        pho: pho.id,
        spring_rolls: spring_rolls.id,
    }
}

fn cart(menu: &Menu, pho_qty: i32) -> CreateOrderRequest {
    CreateOrderRequest {
        items: vec![
            OrderLineRequest {
                food_id: menu.pho,
                restaurant_id: Some(menu.enterprise_id),
                price: dec!(150000),
                quantity: pho_qty,
            },
            OrderLineRequest {
                food_id: menu.spring_rolls,
                restaurant_id: Some(menu.enterprise_id),
                price: dec!(45000),
                quantity: 1,
            },
        ],
        delivery_address: "12 Le Loi, District 1".into(),
        delivery_phone: "0901234567".into(),
        delivery_note: None,
        voucher_code: None,
        payment_intent_id: None,
    }
}

#[tokio::test]
async fn cash_order_totals_cart_plus_delivery_fee() {
    let app = TestApp::new().await;
    let menu = seed_menu(&app).await;
    let (account, customer) = app.seed_customer("an@example.com").await;

    let created = app
        .state
        .services
        .orders
        .create_order(&auth_user(&account), cart(&menu, 2))
        .await
        .expect("order created");

    let expected_total = dec!(345000) + Decimal::from(DELIVERY_FEE);
    assert_eq!(created.total_amount, expected_total);

    let stored = order::Entity::find_by_id(created.order_id)
        .one(app.db())
        .await
        .unwrap()
        .expect("order row");
    assert_eq!(stored.customer_id, customer.id);
    assert_eq!(stored.enterprise_id, menu.enterprise_id);
    assert_eq!(stored.status, OrderStatus::Pending);
    assert_eq!(stored.total_amount, expected_total);
    assert_eq!(stored.delivery_fee, Decimal::from(DELIVERY_FEE));
    assert!(stored.voucher_id.is_none());
    assert!(stored.estimated_delivery_time > stored.created_at);

    let details = order_detail::Entity::find()
        .filter(order_detail::Column::OrderId.eq(created.order_id))
        .all(app.db())
        .await
        .unwrap();
    assert_eq!(details.len(), 2);
    let subtotal: Decimal = details.iter().map(|d| d.subtotal).sum();
    assert_eq!(subtotal, dec!(345000));

    let payments = payment::Entity::find()
        .filter(payment::Column::OrderId.eq(created.order_id))
        .all(app.db())
        .await
        .unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].method, PaymentMethod::Cash);
    assert_eq!(payments[0].status, PaymentStatus::Pending);
    assert_eq!(payments[0].amount, expected_total);

    let link = settlement_item::Entity::find()
        .filter(settlement_item::Column::OrderId.eq(created.order_id))
        .one(app.db())
        .await
        .unwrap()
        .expect("settlement item");
    assert!(link.is_cod);
}

#[tokio::test]
async fn approved_voucher_is_attached_without_discount() {
    let app = TestApp::new().await;
    let menu = seed_menu(&app).await;
    let (account, _) = app.seed_customer("binh@example.com").await;
    let voucher = app
        .seed_voucher(
            "TET2025",
            VoucherStatus::Approved,
            Utc::now() + Duration::days(30),
            account.id,
        )
        .await;

    let mut request = cart(&menu, 2);
    request.voucher_code = Some("TET2025".into());

    let created = app
        .state
        .services
        .orders
        .create_order(&auth_user(&account), request)
        .await
        .expect("order created");

    assert_eq!(
        created.total_amount,
        dec!(345000) + Decimal::from(DELIVERY_FEE)
    );
    let stored = order::Entity::find_by_id(created.order_id)
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.voucher_id, Some(voucher.id));
}

#[tokio::test]
async fn expired_or_pending_vouchers_are_ignored() {
    let app = TestApp::new().await;
    let menu = seed_menu(&app).await;
    let (account, _) = app.seed_customer("chi@example.com").await;
    app.seed_voucher(
        "OLDCODE",
        VoucherStatus::Approved,
        Utc::now() - Duration::days(1),
        account.id,
    )
    .await;
    app.seed_voucher(
        "NOTYET",
        VoucherStatus::Pending,
        Utc::now() + Duration::days(1),
        account.id,
    )
    .await;

    for code in ["OLDCODE", "NOTYET", "UNKNOWN"] {
        let mut request = cart(&menu, 1);
        request.voucher_code = Some(code.into());
        let created = app
            .state
            .services
            .orders
            .create_order(&auth_user(&account), request)
            .await
            .expect("order created");
        let stored = order::Entity::find_by_id(created.order_id)
            .one(app.db())
            .await
            .unwrap()
            .unwrap();
        assert!(stored.voucher_id.is_none(), "voucher {} attached", code);
    }
}

#[tokio::test]
async fn over_quantity_line_creates_nothing() {
    let app = TestApp::new().await;
    let menu = seed_menu(&app).await;
    let (account, _) = app.seed_customer("dung@example.com").await;

    let result = app
        .state
        .services
        .orders
        .create_order(&auth_user(&account), cart(&menu, 11))
        .await;

    assert_matches!(result, Err(ServiceError::InsufficientStock(msg)) if msg.contains("Pho Bo"));
    assert_eq!(order::Entity::find().count(app.db()).await.unwrap(), 0);
    assert_eq!(order_detail::Entity::find().count(app.db()).await.unwrap(), 0);
    assert_eq!(payment::Entity::find().count(app.db()).await.unwrap(), 0);
    assert_eq!(settlement::Entity::find().count(app.db()).await.unwrap(), 0);
    assert_eq!(
        settlement_item::Entity::find().count(app.db()).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn unavailable_dish_is_rejected() {
    let app = TestApp::new().await;
    let menu = seed_menu(&app).await;
    let sold_out = app
        .seed_food(menu.enterprise_id, "Bun Cha", dec!(60000), false)
        .await;
    let (account, _) = app.seed_customer("em@example.com").await;

    let mut request = cart(&menu, 1);
    request.items.push(OrderLineRequest {
        food_id: sold_out.id,
        restaurant_id: None,
        price: dec!(60000),
        quantity: 1,
    });

    let result = app
        .state
        .services
        .orders
        .create_order(&auth_user(&account), request)
        .await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(msg)) if msg.contains("Bun Cha"));
    assert_eq!(order::Entity::find().count(app.db()).await.unwrap(), 0);
}

#[tokio::test]
async fn unknown_dish_is_not_found() {
    let app = TestApp::new().await;
    let menu = seed_menu(&app).await;
    let (account, _) = app.seed_customer("giang@example.com").await;

    let mut request = cart(&menu, 1);
    request.items[0].food_id = Uuid::new_v4();

    let result = app
        .state
        .services
        .orders
        .create_order(&auth_user(&account), request)
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn payment_intent_marks_card_payment_completed() {
    let app = TestApp::new().await;
    let menu = seed_menu(&app).await;
    let (account, _) = app.seed_customer("hoa@example.com").await;

    let mut request = cart(&menu, 1);
    request.payment_intent_id = Some("pi_3PaidUp".into());

    let created = app
        .state
        .services
        .orders
        .create_order(&auth_user(&account), request)
        .await
        .expect("order created");

    let payment = payment::Entity::find()
        .filter(payment::Column::OrderId.eq(created.order_id))
        .one(app.db())
        .await
        .unwrap()
        .expect("payment row");
    assert_eq!(payment.method, PaymentMethod::CreditCard);
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.transaction_id, "pi_3PaidUp");

    let link = settlement_item::Entity::find()
        .filter(settlement_item::Column::OrderId.eq(created.order_id))
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert!(!link.is_cod);

    let attached = app.gateway.attached.lock().unwrap().clone();
    assert_eq!(attached, vec![("pi_3PaidUp".to_string(), created.order_id)]);
}

#[tokio::test]
async fn account_without_customer_profile_cannot_order() {
    let app = TestApp::new().await;
    let menu = seed_menu(&app).await;
    let account = app
        .seed_account(
            "nobody@example.com",
            foodhub_api::entities::account::AccountRole::Customer,
        )
        .await;

    let result = app
        .state
        .services
        .orders
        .create_order(&auth_user(&account), cart(&menu, 1))
        .await;
    assert_matches!(result, Err(ServiceError::Forbidden(_)));
}

#[tokio::test]
async fn restaurant_is_taken_from_the_dish_owner() {
    let app = TestApp::new().await;
    let menu = seed_menu(&app).await;
    let (account, _) = app.seed_customer("khanh@example.com").await;

    let mut request = cart(&menu, 1);
    for line in &mut request.items {
        line.restaurant_id = None;
    }

    let created = app
        .state
        .services
        .orders
        .create_order(&auth_user(&account), request)
        .await
        .expect("order created");

    let stored = order::Entity::find_by_id(created.order_id)
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.enterprise_id, menu.enterprise_id);

    let settlement = settlement::Entity::find().one(app.db()).await.unwrap().unwrap();
    assert_eq!(settlement.enterprise_id, menu.enterprise_id);
}

#[tokio::test]
async fn cart_line_naming_another_restaurant_is_rejected() {
    let app = TestApp::new().await;
    let menu = seed_menu(&app).await;
    let (_, rival) = app.seed_enterprise("owner@rival.vn", None).await;
    let (account, _) = app.seed_customer("lam@example.com").await;

    for claimed in [rival.id, Uuid::new_v4()] {
        let mut request = cart(&menu, 1);
        request.items[0].restaurant_id = Some(claimed);

        let result = app
            .state
            .services
            .orders
            .create_order(&auth_user(&account), request)
            .await;
        assert_matches!(
            result,
            Err(ServiceError::ValidationError(msg)) if msg.contains("Pho Bo")
        );
    }

    assert_eq!(order::Entity::find().count(app.db()).await.unwrap(), 0);
    assert_eq!(settlement::Entity::find().count(app.db()).await.unwrap(), 0);
}

#[tokio::test]
async fn failure_after_order_insert_rolls_back_every_row() {
    let app = TestApp::new().await;
    let menu = seed_menu(&app).await;
    let (account, _) = app.seed_customer("minh@example.com").await;

    // Settlement linking is the last write of checkout.
    app.db()
        .execute_unprepared(
            "CREATE TRIGGER block_settlement_items BEFORE INSERT ON settlement_items \
             BEGIN SELECT RAISE(ABORT, 'settlement ledger closed'); END;",
        )
        .await
        .unwrap();

    let result = app
        .state
        .services
        .orders
        .create_order(&auth_user(&account), cart(&menu, 2))
        .await;
    assert_matches!(result, Err(ServiceError::DatabaseError(_)));

    assert_eq!(order::Entity::find().count(app.db()).await.unwrap(), 0);
    assert_eq!(order_detail::Entity::find().count(app.db()).await.unwrap(), 0);
    assert_eq!(payment::Entity::find().count(app.db()).await.unwrap(), 0);
    assert_eq!(settlement::Entity::find().count(app.db()).await.unwrap(), 0);
    assert_eq!(
        settlement_item::Entity::find().count(app.db()).await.unwrap(),
        0
    );

    app.db()
        .execute_unprepared("DROP TRIGGER block_settlement_items;")
        .await
        .unwrap();
    app.state
        .services
        .orders
        .create_order(&auth_user(&account), cart(&menu, 2))
        .await
        .expect("checkout works again");
    assert_eq!(order::Entity::find().count(app.db()).await.unwrap(), 1);
}
