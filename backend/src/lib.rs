use axum::{Router, extract::FromRef, http::HeaderName, middleware};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod order_number;
pub mod pricing;
pub mod repository;
pub mod services;
pub mod sms;

// Routing segregation (Public, Admin).
pub mod routes;
use routes::{admin, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use memory::MemoryRepository;
pub use repository::{PostgresRepository, RepositoryState};
pub use sms::{LogSmsSender, MockSmsSender, SmsState};

use services::{CartService, OrderService, VerificationService};

/// ApiDoc
///
/// OpenAPI document for every `#[utoipa::path]` handler, served at
/// `/api-docs/openapi.json` and browsable under `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_categories, handlers::list_products, handlers::get_product,
        handlers::create_cart, handlers::get_cart, handlers::delete_cart,
        handlers::add_cart_item, handlers::update_cart_item, handlers::remove_cart_item,
        handlers::start_verification, handlers::confirm_verification,
        handlers::create_order, handlers::track_order, handlers::login,
        handlers::get_admin_stats, handlers::admin_list_products,
        handlers::admin_create_product, handlers::admin_update_product,
        handlers::admin_delete_product, handlers::admin_list_categories,
        handlers::admin_create_category, handlers::admin_update_category,
        handlers::admin_delete_category, handlers::admin_list_orders,
        handlers::admin_get_order, handlers::admin_update_order_status
    ),
    components(
        schemas(
            models::Category, models::Product, models::CartItem, models::Cart,
            models::OrderStatus, models::OrderItem, models::Order,
            models::CreateCategoryRequest, models::UpdateCategoryRequest,
            models::CreateProductRequest, models::UpdateProductRequest,
            models::AddCartItemRequest, models::UpdateCartItemRequest,
            models::StartVerificationRequest, models::ConfirmVerificationRequest,
            models::CreateOrderRequest, models::UpdateOrderStatusRequest,
            models::LoginRequest, models::LoginResponse, models::CartView,
            models::CartLineView, models::VerificationStarted, models::VerificationStatus,
            models::OrderReceipt, models::AdminDashboardStats,
        )
    ),
    tags(
        (name = "producer-market", description = "Local Producer Marketplace API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Shared by every request: the store, the SMS transport and the loaded config.
#[derive(Clone)]
pub struct AppState {
    pub repo: RepositoryState,
    pub sms: SmsState,
    pub config: AppConfig,
}

impl AppState {
    pub fn carts(&self) -> CartService {
        CartService::new(self.repo.clone(), self.config.clone())
    }

    pub fn verification(&self) -> VerificationService {
        VerificationService::new(self.repo.clone(), self.sms.clone(), self.config.clone())
    }

    pub fn orders(&self) -> OrderService {
        OrderService::new(self.repo.clone(), self.config.clone())
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for SmsState {
    fn from_ref(app_state: &AppState) -> SmsState {
        app_state.sms.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the routing tree, applies the admin guard and the global
/// observability layers, and registers the application state.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        // Admin Routes: 401 without a valid token, 403 for non-admin roles.
        .nest(
            "/admin",
            admin::admin_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth::require_admin,
            )),
        )
        .with_state(state);

    // 3. Observability and Correlation Layers
    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        // 4. CORS Layer
        .layer(cors)
}

/// trace_span_logger
///
/// Span for `TraceLayer`: method, URI and the `x-request-id` set by
/// `SetRequestIdLayer`, so every log line of a request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
