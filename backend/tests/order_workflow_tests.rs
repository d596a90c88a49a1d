mod common;

use chrono::{Duration, Utc};
use common::{CUSTOMER_PHONE, TestContext, dec};
use producer_market::{
    AppConfig,
    config::PricingConfig,
    error::ApiError,
    memory::CommitStep,
    models::{CreateOrderRequest, OrderStatus, Product},
    repository::{OrderFilter, Repository},
    services::housekeeping::purge_once,
};
use uuid::Uuid;

fn checkout(cart: Uuid, verification: Uuid) -> CreateOrderRequest {
    CreateOrderRequest {
        cart_session_id: cart,
        verification_id: verification,
        customer_name: "Ada Farmer".to_string(),
        delivery_address: "12 Orchard Lane, Springfield".to_string(),
        notes: Some("  leave at the gate ".to_string()),
        expected_total: None,
    }
}

/// A cart holding `quantity` of `product`, plus a verified phone.
async fn ready_to_order(ctx: &TestContext, product: &Product, quantity: i32) -> (Uuid, Uuid) {
    let carts = ctx.state.carts();
    let cart = carts.create().await.unwrap();
    carts
        .add_item(cart.session_id, product.id, quantity)
        .await
        .unwrap();
    let verification = ctx.verified_session(CUSTOMER_PHONE).await;
    (cart.session_id, verification)
}

async fn stock_of(ctx: &TestContext, id: Uuid) -> i32 {
    ctx.repo().get_product(id).await.unwrap().unwrap().stock
}

#[tokio::test]
async fn test_order_is_placed_with_server_totals() {
    let ctx = TestContext::new();
    let honey = ctx.product("Honey", "8.00", 10).await;
    let (cart, verification) = ready_to_order(&ctx, &honey, 3).await;

    let receipt = ctx
        .state
        .orders()
        .create_order(checkout(cart, verification))
        .await
        .unwrap();

    let order = receipt.order;
    assert!(!receipt.price_changed);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.phone, CUSTOMER_PHONE);
    assert_eq!(order.notes.as_deref(), Some("leave at the gate"));
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].unit, "kg");
    assert_eq!(order.subtotal, dec("24.00"));
    assert_eq!(order.delivery_fee, dec("5.00"));
    assert_eq!(order.total, dec("29.00"));

    // Side effects: stock decremented, cart gone, session consumed.
    assert_eq!(stock_of(&ctx, honey.id).await, 7);
    assert!(ctx.repo().get_cart(cart).await.unwrap().is_none());
    let session = ctx.repo().get_verification(verification).await.unwrap().unwrap();
    assert!(session.is_used());
}

#[tokio::test]
async fn test_tampered_cart_price_never_reaches_the_order() {
    let ctx = TestContext::new();
    let cheese = ctx.product("Aged cheese", "20.00", 5).await;
    let (cart_id, verification) = ready_to_order(&ctx, &cheese, 2).await;

    // Forge the stored snapshot price.
    let mut cart = ctx.repo().get_cart(cart_id).await.unwrap().unwrap();
    cart.items[0].unit_price = dec("0.01");
    ctx.repo().save_cart(&cart).await.unwrap();

    let mut req = checkout(cart_id, verification);
    req.expected_total = Some(dec("0.02"));
    let receipt = ctx.state.orders().create_order(req).await.unwrap();

    assert!(receipt.price_changed);
    assert_eq!(receipt.order.items[0].unit_price, dec("20.00"));
    assert_eq!(receipt.order.subtotal, dec("40.00"));
    assert_eq!(receipt.order.total, dec("45.00"));
}

#[tokio::test]
async fn test_matching_expected_total_is_not_flagged() {
    let ctx = TestContext::new();
    let jam = ctx.product("Jam", "4.50", 10).await;
    let (cart, verification) = ready_to_order(&ctx, &jam, 2).await;

    let mut req = checkout(cart, verification);
    req.expected_total = Some(dec("14.00"));
    let receipt = ctx.state.orders().create_order(req).await.unwrap();

    assert!(!receipt.price_changed);
    assert_eq!(receipt.order.total, dec("14.00"));
}

#[tokio::test]
async fn test_tax_is_applied_from_config() {
    let config = AppConfig {
        pricing: PricingConfig {
            tax_rate: dec("0.10"),
            ..PricingConfig::default()
        },
        ..AppConfig::default()
    };
    let ctx = TestContext::with_config(config);
    let beef = ctx.product("Beef", "30.00", 10).await;
    let (cart, verification) = ready_to_order(&ctx, &beef, 2).await;

    let order = ctx
        .state
        .orders()
        .create_order(checkout(cart, verification))
        .await
        .unwrap()
        .order;

    assert_eq!(order.subtotal, dec("60.00"));
    assert_eq!(order.tax, dec("6.00"));
    assert_eq!(order.delivery_fee, dec("0"));
    assert_eq!(order.total, dec("66.00"));
}

#[tokio::test]
async fn test_order_numbers_are_sequential_per_day() {
    let ctx = TestContext::new();
    let eggs = ctx.product("Eggs", "0.40", 100).await;
    let now = Utc::now();
    let today = now.format("%Y%m%d").to_string();

    let mut numbers = Vec::new();
    for _ in 0..3 {
        let (cart, verification) = ready_to_order(&ctx, &eggs, 6).await;
        let receipt = ctx
            .state
            .orders()
            .create_order_at(checkout(cart, verification), now)
            .await
            .unwrap();
        numbers.push(receipt.order.order_number);
    }

    assert_eq!(
        numbers,
        vec![
            format!("ORD-{today}-0001"),
            format!("ORD-{today}-0002"),
            format!("ORD-{today}-0003"),
        ]
    );

    // Another day has its own counter.
    let yesterday = now - Duration::days(1);
    let (cart, verification) = ready_to_order(&ctx, &eggs, 6).await;
    let receipt = ctx
        .state
        .orders()
        .create_order_at(checkout(cart, verification), yesterday)
        .await
        .unwrap();
    assert!(receipt.order.order_number.ends_with("-0001"));
}

#[tokio::test]
async fn test_concurrent_checkouts_get_distinct_numbers() {
    let ctx = TestContext::new();
    let bread = ctx.product("Bread", "3.00", 100).await;

    let mut requests = Vec::new();
    for _ in 0..8 {
        let (cart, verification) = ready_to_order(&ctx, &bread, 1).await;
        requests.push(checkout(cart, verification));
    }

    let handles: Vec<_> = requests
        .into_iter()
        .map(|req| {
            let orders = ctx.state.orders();
            tokio::spawn(async move { orders.create_order(req).await })
        })
        .collect();

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.unwrap().unwrap().order.order_number);
    }
    numbers.sort();
    numbers.dedup();
    assert_eq!(numbers.len(), 8);
    assert_eq!(stock_of(&ctx, bread.id).await, 92);
}

#[tokio::test]
async fn test_failure_at_any_commit_step_rolls_everything_back() {
    for step in [
        CommitStep::InsertOrder,
        CommitStep::DecrementStock,
        CommitStep::ConsumeVerification,
        CommitStep::DeleteCart,
    ] {
        let ctx = TestContext::new();
        let milk = ctx.product("Milk", "1.50", 10).await;
        let (cart, verification) = ready_to_order(&ctx, &milk, 4).await;
        ctx.memory.set_failure(Some(step)).await;

        let err = ctx
            .state
            .orders()
            .create_order(checkout(cart, verification))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Internal(_)), "{step:?}: {err:?}");
        assert_eq!(stock_of(&ctx, milk.id).await, 10, "{step:?}");
        assert!(ctx.repo().get_cart(cart).await.unwrap().is_some(), "{step:?}");
        let session = ctx.repo().get_verification(verification).await.unwrap().unwrap();
        assert!(!session.is_used(), "{step:?}");
        let orders = ctx.repo().list_orders(&OrderFilter::default()).await.unwrap();
        assert!(orders.is_empty(), "{step:?}");

        // Once the fault clears the same checkout succeeds.
        ctx.memory.set_failure(None).await;
        let receipt = ctx
            .state
            .orders()
            .create_order(checkout(cart, verification))
            .await
            .unwrap();
        assert_eq!(stock_of(&ctx, milk.id).await, 6);
        // The failed attempt burned a number.
        assert!(receipt.order.order_number.ends_with("-0002"), "{step:?}");
    }
}

#[tokio::test]
async fn test_verification_backs_only_one_order() {
    let ctx = TestContext::new();
    let apples = ctx.product("Apples", "2.00", 50).await;
    let (first_cart, verification) = ready_to_order(&ctx, &apples, 1).await;
    ctx.state
        .orders()
        .create_order(checkout(first_cart, verification))
        .await
        .unwrap();

    let carts = ctx.state.carts();
    let second = carts.create().await.unwrap();
    carts.add_item(second.session_id, apples.id, 1).await.unwrap();
    let err = ctx
        .state
        .orders()
        .create_order(checkout(second.session_id, verification))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Conflict(_)));
    assert_eq!(stock_of(&ctx, apples.id).await, 49);
}

#[tokio::test]
async fn test_unverified_or_unknown_session_is_refused() {
    let ctx = TestContext::new();
    let pears = ctx.product("Pears", "2.20", 10).await;
    let carts = ctx.state.carts();
    let cart = carts.create().await.unwrap();
    carts.add_item(cart.session_id, pears.id, 1).await.unwrap();

    let err = ctx
        .state
        .orders()
        .create_order(checkout(cart.session_id, Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::VerificationRequired(_)));

    let pending = ctx.state.verification().start(CUSTOMER_PHONE).await.unwrap();
    let err = ctx
        .state
        .orders()
        .create_order(checkout(cart.session_id, pending.verification_id))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::VerificationRequired(_)));
    assert_eq!(err.status(), axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_expired_cart_or_verification_is_gone() {
    let ctx = TestContext::new();
    let plums = ctx.product("Plums", "3.10", 10).await;
    let (cart, verification) = ready_to_order(&ctx, &plums, 1).await;

    let late = Utc::now() + Duration::hours(25);
    let err = ctx
        .state
        .orders()
        .create_order_at(checkout(cart, verification), late)
        .await
        .unwrap_err();
    // The verification window (30 min) closes before the cart's (24 h).
    assert!(matches!(err, ApiError::VerificationExpired));

    let (cart, verification) = ready_to_order(&ctx, &plums, 1).await;
    let mut stale = ctx.repo().get_cart(cart).await.unwrap().unwrap();
    stale.expires_at = Utc::now() - Duration::minutes(1);
    ctx.repo().save_cart(&stale).await.unwrap();
    let err = ctx
        .state
        .orders()
        .create_order(checkout(cart, verification))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::CartExpired));
}

#[tokio::test]
async fn test_empty_cart_and_bad_fields_are_rejected() {
    let ctx = TestContext::new();
    let cart = ctx.state.carts().create().await.unwrap();
    let verification = ctx.verified_session(CUSTOMER_PHONE).await;

    let err = ctx
        .state
        .orders()
        .create_order(checkout(cart.session_id, verification))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    let mut req = checkout(cart.session_id, verification);
    req.customer_name = String::new();
    let err = ctx.state.orders().create_order(req).await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidFields(_)));
}

#[tokio::test]
async fn test_stock_sold_out_between_cart_and_checkout() {
    let ctx = TestContext::new();
    let truffles = ctx.product("Truffles", "45.00", 2).await;
    let (cart, verification) = ready_to_order(&ctx, &truffles, 2).await;
    ctx.repo()
        .update_product(
            truffles.id,
            producer_market::models::UpdateProductRequest {
                stock: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let err = ctx
        .state
        .orders()
        .create_order(checkout(cart, verification))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::InsufficientStock(_)));
    assert!(ctx.repo().get_cart(cart).await.unwrap().is_some());
}

#[tokio::test]
async fn test_lookup_requires_matching_phone() {
    let ctx = TestContext::new();
    let honey = ctx.product("Honey", "8.00", 10).await;
    let (cart, verification) = ready_to_order(&ctx, &honey, 1).await;
    let order = ctx
        .state
        .orders()
        .create_order(checkout(cart, verification))
        .await
        .unwrap()
        .order;
    let orders = ctx.state.orders();

    let found = orders
        .lookup(&order.order_number, "+1 555 123 0001")
        .await
        .unwrap();
    assert_eq!(found.id, order.id);

    for (number, phone) in [
        (order.order_number.as_str(), "+15550000000"),
        (order.order_number.as_str(), "not a phone"),
        ("ORD-20200101-0001", CUSTOMER_PHONE),
        ("garbage", CUSTOMER_PHONE),
    ] {
        let err = orders.lookup(number, phone).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)), "{number} {phone}");
    }
}

#[tokio::test]
async fn test_status_machine_and_cancellation_restock() {
    let ctx = TestContext::new();
    let cider = ctx.product("Cider", "6.00", 10).await;
    let orders = ctx.state.orders();

    let (cart, verification) = ready_to_order(&ctx, &cider, 4).await;
    let order = orders
        .create_order(checkout(cart, verification))
        .await
        .unwrap()
        .order;
    assert_eq!(stock_of(&ctx, cider.id).await, 6);

    let err = orders
        .update_status(order.id, OrderStatus::Delivered)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidTransition(_)));

    let confirmed = orders
        .update_status(order.id, OrderStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.status, OrderStatus::Confirmed);

    let cancelled = orders
        .update_status(order.id, OrderStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&ctx, cider.id).await, 10);

    // Terminal.
    let err = orders
        .update_status(order.id, OrderStatus::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidTransition(_)));

    let err = orders
        .update_status(Uuid::new_v4(), OrderStatus::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[test]
fn test_status_transition_table() {
    use OrderStatus::*;
    let all = [Pending, Confirmed, Preparing, OutForDelivery, Delivered, Cancelled];
    let allowed = [
        (Pending, Confirmed),
        (Pending, Cancelled),
        (Confirmed, Preparing),
        (Confirmed, Cancelled),
        (Preparing, OutForDelivery),
        (Preparing, Cancelled),
        (OutForDelivery, Delivered),
    ];
    for from in all {
        for to in all {
            assert_eq!(
                from.can_transition_to(to),
                allowed.contains(&(from, to)),
                "{from} -> {to}"
            );
        }
    }
    assert!(Delivered.is_terminal() && Cancelled.is_terminal());
    assert!(!OutForDelivery.is_terminal());
}

#[tokio::test]
async fn test_purge_removes_expired_carts_and_unused_sessions() {
    let ctx = TestContext::new();
    let figs = ctx.product("Figs", "5.00", 10).await;
    let (cart, verification) = ready_to_order(&ctx, &figs, 1).await;
    ctx.state
        .orders()
        .create_order(checkout(cart, verification))
        .await
        .unwrap();

    let old = Utc::now() - Duration::days(2);
    ctx.state.carts().create_at(old).await.unwrap();
    let abandoned = ctx
        .state
        .verification()
        .start_at(CUSTOMER_PHONE, old)
        .await
        .unwrap();
    let live_cart = ctx.state.carts().create().await.unwrap();

    let report = purge_once(ctx.repo(), Utc::now() + Duration::hours(1)).await.unwrap();

    assert_eq!(report.carts, 1);
    assert_eq!(report.verifications, 1);
    assert!(ctx
        .repo()
        .get_verification(abandoned.verification_id)
        .await
        .unwrap()
        .is_none());
    // The session that backed an order is kept.
    assert!(ctx.repo().get_verification(verification).await.unwrap().is_some());
    assert!(ctx.repo().get_cart(live_cart.session_id).await.unwrap().is_some());
}
