use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, put},
};

/// Admin Router Module
///
/// Catalog and order management. Nested under `/admin` and wrapped in the
/// `require_admin` layer by `create_router`, so handlers here never see a
/// non-admin request.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(handlers::get_admin_stats))
        // --- Products ---
        .route(
            "/products",
            get(handlers::admin_list_products).post(handlers::admin_create_product),
        )
        // DELETE deactivates; order history keeps referencing the product.
        .route(
            "/products/{id}",
            put(handlers::admin_update_product).delete(handlers::admin_delete_product),
        )
        // --- Categories ---
        .route(
            "/categories",
            get(handlers::admin_list_categories).post(handlers::admin_create_category),
        )
        .route(
            "/categories/{id}",
            put(handlers::admin_update_category).delete(handlers::admin_delete_category),
        )
        // --- Orders ---
        // GET /admin/orders?status=&limit=&offset=
        .route("/orders", get(handlers::admin_list_orders))
        .route("/orders/{id}", get(handlers::admin_get_order))
        .route(
            "/orders/{id}/status",
            put(handlers::admin_update_order_status),
        )
}
