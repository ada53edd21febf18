mod common;

use axum::http::{Method, StatusCode};
use common::{auth_user, read_json, TestApp};
use foodhub_api::{
    entities::order::OrderStatus,
    services::orders::{CreateOrderRequest, OrderLineRequest},
};
use rust_decimal_macros::dec;
use uuid::Uuid;

fn order_for(food_id: Uuid) -> CreateOrderRequest {
    CreateOrderRequest {
        items: vec![OrderLineRequest {
            food_id,
            restaurant_id: None,
            price: dec!(50000),
            quantity: 1,
        }],
        delivery_address: "3 Hai Ba Trung".into(),
        delivery_phone: "0906667778".into(),
        delivery_note: None,
        voucher_code: None,
        payment_intent_id: None,
    }
}

#[tokio::test]
async fn stats_are_cached_until_an_order_changes() {
    let app = TestApp::new().await;
    let (owner, restaurant) = app.seed_enterprise("owner@cafe.vn", None).await;
    let dish = app
        .seed_food(restaurant.id, "Ca Phe Sua Da", dec!(50000), true)
        .await;
    let (customer, _) = app.seed_customer("yen@example.com").await;
    let token = app.token_for(&owner);

    app.state
        .services
        .orders
        .create_order(&auth_user(&customer), order_for(dish.id))
        .await
        .unwrap();

    let first = app
        .request(Method::GET, "/api/enterprise/dashboard/stats", None, Some(&token))
        .await;
    assert_eq!(first.status(), StatusCode::OK);
    let first = read_json(first).await;
    assert_eq!(first["data"]["from_cache"], false);
    assert_eq!(first["data"]["stats"]["total_orders"], 1);
    assert_eq!(first["data"]["stats"]["pending_orders"], 1);

    let second = read_json(
        app.request(Method::GET, "/api/enterprise/dashboard/stats", None, Some(&token))
            .await,
    )
    .await;
    assert_eq!(second["data"]["from_cache"], true);
    assert_eq!(second["data"]["stats"], first["data"]["stats"]);

    // A new order invalidates the enterprise's cached views.
    app.state
        .services
        .orders
        .create_order(&auth_user(&customer), order_for(dish.id))
        .await
        .unwrap();

    let third = read_json(
        app.request(Method::GET, "/api/enterprise/dashboard/stats", None, Some(&token))
            .await,
    )
    .await;
    assert_eq!(third["data"]["from_cache"], false);
    assert_eq!(third["data"]["stats"]["total_orders"], 2);
}

#[tokio::test]
async fn recent_orders_and_settlements_reflect_status_changes() {
    let app = TestApp::new().await;
    let (owner, restaurant) = app.seed_enterprise("owner@tra.vn", None).await;
    let dish = app.seed_food(restaurant.id, "Tra Da", dec!(50000), true).await;
    let (customer, _) = app.seed_customer("zung@example.com").await;
    let token = app.token_for(&owner);

    let created = app
        .state
        .services
        .orders
        .create_order(&auth_user(&customer), order_for(dish.id))
        .await
        .unwrap();

    let recent = read_json(
        app.request(
            Method::GET,
            "/api/enterprise/dashboard/recent-orders",
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(recent["data"]["from_cache"], false);
    assert_eq!(recent["data"]["orders"][0]["status"], "pending");

    let update = app
        .request(
            Method::PUT,
            &format!("/api/enterprise/orders/{}/status", created.order_id),
            Some(serde_json::json!({ "status": OrderStatus::Confirmed })),
            Some(&token),
        )
        .await;
    assert_eq!(update.status(), StatusCode::OK);

    let recent = read_json(
        app.request(
            Method::GET,
            "/api/enterprise/dashboard/recent-orders",
            None,
            Some(&token),
        )
        .await,
    )
    .await;
    assert_eq!(recent["data"]["from_cache"], false);
    assert_eq!(recent["data"]["orders"][0]["status"], "confirmed");

    let settlements = read_json(
        app.request(Method::GET, "/api/enterprise/settlements", None, Some(&token))
            .await,
    )
    .await;
    assert_eq!(settlements["data"].as_array().map(Vec::len), Some(1));
    assert_eq!(settlements["data"][0]["item_count"], 1);
    assert_eq!(settlements["data"][0]["status"], "pending");
}
