use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Public Router Module
///
/// Storefront endpoints. No authentication: carts are addressed by their session
/// id, and checkout is gated by SMS verification instead of an account.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers.
        .route("/health", get(|| async { "ok" }))
        // --- Catalog ---
        .route("/categories", get(handlers::list_categories))
        // GET /products?category=&search=
        .route("/products", get(handlers::list_products))
        .route("/products/{id}", get(handlers::get_product))
        // --- Cart ---
        .route("/cart", post(handlers::create_cart))
        .route(
            "/cart/{session}",
            get(handlers::get_cart).delete(handlers::delete_cart),
        )
        .route("/cart/{session}/items", post(handlers::add_cart_item))
        .route(
            "/cart/{session}/items/{product_id}",
            put(handlers::update_cart_item).delete(handlers::remove_cart_item),
        )
        // --- Checkout ---
        .route("/verification", post(handlers::start_verification))
        .route(
            "/verification/{id}/confirm",
            post(handlers::confirm_verification),
        )
        .route("/orders", post(handlers::create_order))
        // GET /orders/{order_number}?phone=
        // Tracking requires the phone the order was placed with.
        .route("/orders/{order_number}", get(handlers::track_order))
        // POST /auth/login
        // Admin sign-in; returns the bearer token the /admin routes expect.
        .route("/auth/login", post(handlers::login))
}
