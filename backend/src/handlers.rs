use crate::{
    AppState, auth,
    error::{ApiError, ApiResponse, ApiResult, ok},
    models::{
        AddCartItemRequest, AdminDashboardStats, CartView, Category, ConfirmVerificationRequest,
        CreateCategoryRequest, CreateOrderRequest, CreateProductRequest, LoginRequest,
        LoginResponse, Order, OrderReceipt, Product, StartVerificationRequest,
        UpdateCartItemRequest, UpdateCategoryRequest, UpdateOrderStatusRequest,
        UpdateProductRequest, VerificationStarted, VerificationStatus,
    },
    repository::{OrderFilter, ProductFilter},
};
use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{StatusCode, request::Parts},
};
use serde::{Deserialize, de::DeserializeOwned};
use uuid::Uuid;
use validator::Validate;

// --- Extractors ---

/// ValidJson
///
/// `Json<T>` that also runs `T::validate()`. Malformed bodies and failed rules are
/// both rejected with the 400 `VALIDATION_ERROR` envelope.
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
        value.validate()?;
        Ok(Self(value))
    }
}

/// ValidPath
///
/// `Path<T>` whose rejections (an unparsable id, say) use the `VALIDATION_ERROR`
/// envelope instead of axum's plain-text body.
pub struct ValidPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ValidPath<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// Same as `ValidPath`, for query strings.
pub struct ValidQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ValidQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// TrackOrderQuery
///
/// Query parameters for public order tracking (GET /orders/{order_number}).
#[derive(Deserialize, utoipa::IntoParams)]
pub struct TrackOrderQuery {
    /// The phone number the order was placed with.
    pub phone: Option<String>,
}

type Created<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

fn created<T: serde::Serialize>(data: T) -> Created<T> {
    Ok((StatusCode::CREATED, ok(data)))
}

async fn ensure_category_exists(state: &AppState, id: Option<Uuid>) -> Result<(), ApiError> {
    if let Some(id) = id {
        if state.repo.get_category(id).await?.is_none() {
            return Err(ApiError::Validation(format!("category {id} does not exist")));
        }
    }
    Ok(())
}

// --- Catalog ---

/// list_categories
///
/// [Public Route] Active categories, ordered by name.
#[utoipa::path(
    get,
    path = "/categories",
    responses((status = 200, description = "Active categories", body = [Category]))
)]
pub async fn list_categories(State(state): State<AppState>) -> ApiResult<Vec<Category>> {
    Ok(ok(state.repo.list_categories(false).await?))
}

/// list_products
///
/// [Public Route] Active products, filterable by category slug and a search term
/// matched against name and description.
#[utoipa::path(
    get,
    path = "/products",
    params(ProductFilter),
    responses((status = 200, description = "Matching products", body = [Product]))
)]
pub async fn list_products(
    State(state): State<AppState>,
    ValidQuery(mut filter): ValidQuery<ProductFilter>,
) -> ApiResult<Vec<Product>> {
    // Never exposed publicly.
    filter.include_inactive = false;
    Ok(ok(state.repo.list_products(&filter).await?))
}

#[utoipa::path(
    get,
    path = "/products/{id}",
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Found", body = Product),
        (status = 404, description = "Missing or inactive")
    )
)]
pub async fn get_product(
    State(state): State<AppState>,
    ValidPath(id): ValidPath<Uuid>,
) -> ApiResult<Product> {
    state
        .repo
        .get_product(id)
        .await?
        .filter(|product| product.is_active)
        .map(ok)
        .ok_or_else(|| ApiError::NotFound("product".to_string()))
}

// --- Cart ---

/// create_cart
///
/// [Public Route] Opens a new cart session. The returned `session_id` addresses
/// the cart in every other cart route.
#[utoipa::path(
    post,
    path = "/cart",
    responses((status = 201, description = "Cart created", body = CartView))
)]
pub async fn create_cart(State(state): State<AppState>) -> Created<CartView> {
    let carts = state.carts();
    let cart = carts.create().await?;
    created(carts.view(&cart).await?)
}

#[utoipa::path(
    get,
    path = "/cart/{session}",
    params(("session" = Uuid, Path, description = "Cart session ID")),
    responses(
        (status = 200, description = "Cart with live prices", body = CartView),
        (status = 404, description = "Unknown session"),
        (status = 410, description = "Cart expired")
    )
)]
pub async fn get_cart(
    State(state): State<AppState>,
    ValidPath(session): ValidPath<Uuid>,
) -> ApiResult<CartView> {
    let carts = state.carts();
    let cart = carts.get(session).await?;
    Ok(ok(carts.view(&cart).await?))
}

#[utoipa::path(
    delete,
    path = "/cart/{session}",
    params(("session" = Uuid, Path, description = "Cart session ID")),
    responses((status = 204, description = "Cart deleted"), (status = 404, description = "Unknown session"))
)]
pub async fn delete_cart(
    State(state): State<AppState>,
    ValidPath(session): ValidPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.carts().clear(session).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// add_cart_item
///
/// [Public Route] Adds a product to the cart, merging with an existing line.
#[utoipa::path(
    post,
    path = "/cart/{session}/items",
    params(("session" = Uuid, Path, description = "Cart session ID")),
    request_body = AddCartItemRequest,
    responses(
        (status = 200, description = "Updated cart", body = CartView),
        (status = 409, description = "Not enough stock")
    )
)]
pub async fn add_cart_item(
    State(state): State<AppState>,
    ValidPath(session): ValidPath<Uuid>,
    ValidJson(payload): ValidJson<AddCartItemRequest>,
) -> ApiResult<CartView> {
    let carts = state.carts();
    let cart = carts
        .add_item(session, payload.product_id, payload.quantity)
        .await?;
    Ok(ok(carts.view(&cart).await?))
}

#[utoipa::path(
    put,
    path = "/cart/{session}/items/{product_id}",
    params(
        ("session" = Uuid, Path, description = "Cart session ID"),
        ("product_id" = Uuid, Path, description = "Product ID")
    ),
    request_body = UpdateCartItemRequest,
    responses((status = 200, description = "Updated cart", body = CartView))
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    ValidPath((session, product_id)): ValidPath<(Uuid, Uuid)>,
    ValidJson(payload): ValidJson<UpdateCartItemRequest>,
) -> ApiResult<CartView> {
    let carts = state.carts();
    let cart = carts
        .update_item(session, product_id, payload.quantity)
        .await?;
    Ok(ok(carts.view(&cart).await?))
}

#[utoipa::path(
    delete,
    path = "/cart/{session}/items/{product_id}",
    params(
        ("session" = Uuid, Path, description = "Cart session ID"),
        ("product_id" = Uuid, Path, description = "Product ID")
    ),
    responses((status = 200, description = "Updated cart", body = CartView))
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    ValidPath((session, product_id)): ValidPath<(Uuid, Uuid)>,
) -> ApiResult<CartView> {
    let carts = state.carts();
    let cart = carts.remove_item(session, product_id).await?;
    Ok(ok(carts.view(&cart).await?))
}

// --- Verification ---

/// start_verification
///
/// [Public Route] Texts a six-digit code to the phone and opens a verification
/// session for it.
#[utoipa::path(
    post,
    path = "/verification",
    request_body = StartVerificationRequest,
    responses((status = 201, description = "Code sent", body = VerificationStarted))
)]
pub async fn start_verification(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<StartVerificationRequest>,
) -> Created<VerificationStarted> {
    created(state.verification().start(&payload.phone).await?)
}

#[utoipa::path(
    post,
    path = "/verification/{id}/confirm",
    params(("id" = Uuid, Path, description = "Verification session ID")),
    request_body = ConfirmVerificationRequest,
    responses(
        (status = 200, description = "Phone verified", body = VerificationStatus),
        (status = 400, description = "Wrong code"),
        (status = 410, description = "Session expired"),
        (status = 429, description = "Too many attempts")
    )
)]
pub async fn confirm_verification(
    State(state): State<AppState>,
    ValidPath(id): ValidPath<Uuid>,
    ValidJson(payload): ValidJson<ConfirmVerificationRequest>,
) -> ApiResult<VerificationStatus> {
    Ok(ok(state.verification().confirm(id, &payload.code).await?))
}

// --- Orders ---

/// create_order
///
/// [Public Route] Checkout. Consumes the cart and the verification session and
/// returns the placed order with server-computed totals.
#[utoipa::path(
    post,
    path = "/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = OrderReceipt),
        (status = 403, description = "Phone not verified"),
        (status = 409, description = "Stock or session conflict"),
        (status = 410, description = "Cart or verification expired")
    )
)]
pub async fn create_order(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<CreateOrderRequest>,
) -> Created<OrderReceipt> {
    created(state.orders().create_order(payload).await?)
}

/// track_order
///
/// [Public Route] Order status lookup by order number and phone.
#[utoipa::path(
    get,
    path = "/orders/{order_number}",
    params(("order_number" = String, Path, description = "Order number"), TrackOrderQuery),
    responses((status = 200, description = "Found", body = Order), (status = 404, description = "Not Found"))
)]
pub async fn track_order(
    State(state): State<AppState>,
    ValidPath(order_number): ValidPath<String>,
    ValidQuery(query): ValidQuery<TrackOrderQuery>,
) -> ApiResult<Order> {
    let phone = query
        .phone
        .ok_or_else(|| ApiError::Validation("phone is required".to_string()))?;
    // An unencoded `+` in a query string decodes to a space.
    let phone = match phone.strip_prefix(' ') {
        Some(rest) => format!("+{}", rest.trim_start()),
        None => phone,
    };
    Ok(ok(state.orders().lookup(&order_number, &phone).await?))
}

// --- Auth ---

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session token", body = LoginResponse),
        (status = 401, description = "Bad credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<LoginRequest>,
) -> ApiResult<LoginResponse> {
    Ok(ok(auth::login(&state.repo, &state.config, &payload).await?))
}

// --- Admin ---

/// get_admin_stats
///
/// [Admin Route] Dashboard counters.
#[utoipa::path(
    get,
    path = "/admin/stats",
    responses((status = 200, description = "Stats", body = AdminDashboardStats))
)]
pub async fn get_admin_stats(State(state): State<AppState>) -> ApiResult<AdminDashboardStats> {
    Ok(ok(state.repo.get_stats().await?))
}

/// admin_list_products
///
/// [Admin Route] All products, including deactivated ones.
#[utoipa::path(
    get,
    path = "/admin/products",
    params(ProductFilter),
    responses((status = 200, description = "All products", body = [Product]))
)]
pub async fn admin_list_products(
    State(state): State<AppState>,
    ValidQuery(mut filter): ValidQuery<ProductFilter>,
) -> ApiResult<Vec<Product>> {
    filter.include_inactive = true;
    Ok(ok(state.repo.list_products(&filter).await?))
}

#[utoipa::path(
    post,
    path = "/admin/products",
    request_body = CreateProductRequest,
    responses((status = 201, description = "Created", body = Product))
)]
pub async fn admin_create_product(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<CreateProductRequest>,
) -> Created<Product> {
    ensure_category_exists(&state, payload.category_id).await?;
    let product = state.repo.create_product(payload).await?;
    tracing::info!(product_id = %product.id, "product created");
    created(product)
}

#[utoipa::path(
    put,
    path = "/admin/products/{id}",
    params(("id" = Uuid, Path, description = "Product ID")),
    request_body = UpdateProductRequest,
    responses((status = 200, description = "Updated", body = Product), (status = 404, description = "Not Found"))
)]
pub async fn admin_update_product(
    State(state): State<AppState>,
    ValidPath(id): ValidPath<Uuid>,
    ValidJson(payload): ValidJson<UpdateProductRequest>,
) -> ApiResult<Product> {
    ensure_category_exists(&state, payload.category_id).await?;
    state
        .repo
        .update_product(id, payload)
        .await?
        .map(ok)
        .ok_or_else(|| ApiError::NotFound("product".to_string()))
}

/// admin_delete_product
///
/// [Admin Route] Soft delete: the product is deactivated, past orders keep
/// their snapshots.
#[utoipa::path(
    delete,
    path = "/admin/products/{id}",
    params(("id" = Uuid, Path, description = "Product ID")),
    responses((status = 204, description = "Deactivated"), (status = 404, description = "Not Found"))
)]
pub async fn admin_delete_product(
    State(state): State<AppState>,
    ValidPath(id): ValidPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.repo.deactivate_product(id).await? {
        tracing::info!(product_id = %id, "product deactivated");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("product".to_string()))
    }
}

#[utoipa::path(
    get,
    path = "/admin/categories",
    responses((status = 200, description = "All categories", body = [Category]))
)]
pub async fn admin_list_categories(State(state): State<AppState>) -> ApiResult<Vec<Category>> {
    Ok(ok(state.repo.list_categories(true).await?))
}

#[utoipa::path(
    post,
    path = "/admin/categories",
    request_body = CreateCategoryRequest,
    responses((status = 201, description = "Created", body = Category), (status = 409, description = "Slug taken"))
)]
pub async fn admin_create_category(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<CreateCategoryRequest>,
) -> Created<Category> {
    created(state.repo.create_category(payload).await?)
}

#[utoipa::path(
    put,
    path = "/admin/categories/{id}",
    params(("id" = Uuid, Path, description = "Category ID")),
    request_body = UpdateCategoryRequest,
    responses((status = 200, description = "Updated", body = Category), (status = 404, description = "Not Found"))
)]
pub async fn admin_update_category(
    State(state): State<AppState>,
    ValidPath(id): ValidPath<Uuid>,
    ValidJson(payload): ValidJson<UpdateCategoryRequest>,
) -> ApiResult<Category> {
    state
        .repo
        .update_category(id, payload)
        .await?
        .map(ok)
        .ok_or_else(|| ApiError::NotFound("category".to_string()))
}

#[utoipa::path(
    delete,
    path = "/admin/categories/{id}",
    params(("id" = Uuid, Path, description = "Category ID")),
    responses((status = 204, description = "Deactivated"), (status = 404, description = "Not Found"))
)]
pub async fn admin_delete_category(
    State(state): State<AppState>,
    ValidPath(id): ValidPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.repo.deactivate_category(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("category".to_string()))
    }
}

/// admin_list_orders
///
/// [Admin Route] Newest first, optionally filtered by status.
#[utoipa::path(
    get,
    path = "/admin/orders",
    params(OrderFilter),
    responses((status = 200, description = "Orders", body = [Order]))
)]
pub async fn admin_list_orders(
    State(state): State<AppState>,
    ValidQuery(filter): ValidQuery<OrderFilter>,
) -> ApiResult<Vec<Order>> {
    Ok(ok(state.repo.list_orders(&filter).await?))
}

#[utoipa::path(
    get,
    path = "/admin/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses((status = 200, description = "Found", body = Order), (status = 404, description = "Not Found"))
)]
pub async fn admin_get_order(
    State(state): State<AppState>,
    ValidPath(id): ValidPath<Uuid>,
) -> ApiResult<Order> {
    state
        .repo
        .get_order(id)
        .await?
        .map(ok)
        .ok_or_else(|| ApiError::NotFound("order".to_string()))
}

/// admin_update_order_status
///
/// [Admin Route] Moves an order along its lifecycle. Illegal moves are 409.
#[utoipa::path(
    put,
    path = "/admin/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Updated", body = Order),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Illegal transition")
    )
)]
pub async fn admin_update_order_status(
    State(state): State<AppState>,
    ValidPath(id): ValidPath<Uuid>,
    ValidJson(payload): ValidJson<UpdateOrderStatusRequest>,
) -> ApiResult<Order> {
    Ok(ok(state.orders().update_status(id, payload.status).await?))
}
