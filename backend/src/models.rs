use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::pricing;

// --- Core Records (Mapped to Database) ---

/// User
///
/// Accounts that can sign in. Customers check out anonymously with a verified
/// phone; only admins hold a password.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow, Default)]
pub struct User {
    pub id: Uuid,
    pub phone: String,
    // 'admin' or 'customer'.
    pub role: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

pub const ROLE_ADMIN: &str = "admin";

/// Category
///
/// Groups products in the catalog. `slug` is unique and used in catalog filters.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    // Soft-delete flag; inactive categories are hidden from the storefront.
    pub is_active: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// Product
///
/// A sellable item from a local producer. `price` is the live price every cart
/// and order is re-priced against.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Product {
    pub id: Uuid,
    pub category_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    // Selling unit shown to customers, e.g. "kg", "dozen", "jar".
    pub unit: String,
    #[ts(type = "string")]
    pub price: Decimal,
    pub stock: i32,
    pub is_active: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// CartItem
///
/// One line of a cart. `name` and `unit_price` are snapshots taken when the line
/// was added and are informational only.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, PartialEq)]
#[ts(export)]
pub struct CartItem {
    pub product_id: Uuid,
    pub name: String,
    #[ts(type = "string")]
    pub unit_price: Decimal,
    pub quantity: i32,
}

/// Cart
///
/// A session-scoped cart keyed by an opaque session id. Expires `cart_ttl` after
/// its last modification.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, PartialEq)]
#[ts(export)]
pub struct Cart {
    pub session_id: Uuid,
    #[sqlx(skip)]
    pub items: Vec<CartItem>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub expires_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by every save.
    #[serde(skip)]
    pub version: i64,
}

impl Cart {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn item(&self, product_id: Uuid) -> Option<&CartItem> {
        self.items.iter().find(|item| item.product_id == product_id)
    }
}

/// VerificationSession
///
/// Proof that a phone number passed SMS OTP confirmation. Only the SHA-256 hash
/// of the code is stored. A verified session backs at most one order.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct VerificationSession {
    pub id: Uuid,
    pub phone: String,
    #[serde(skip_serializing)]
    pub code_hash: String,
    pub attempts: i32,
    pub verified_at: Option<DateTime<Utc>>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl VerificationSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }

    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }
}

/// OrderStatus
///
/// Fulfilment lifecycle. Stored as the Postgres enum `order_status`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, TS, ToSchema, sqlx::Type, PartialEq, Eq, Hash, Default,
)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Preparing,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Whether an order may move from `self` to `next`.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Preparing)
                | (Confirmed, Cancelled)
                | (Preparing, OutForDelivery)
                | (Preparing, Cancelled)
                | (OutForDelivery, Delivered)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OrderItem
///
/// Snapshot of a product at the moment the order was placed.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, PartialEq)]
#[ts(export)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub name: String,
    pub unit: String,
    #[ts(type = "string")]
    pub unit_price: Decimal,
    pub quantity: i32,
    #[ts(type = "string")]
    pub line_total: Decimal,
}

/// Order
///
/// A placed order with server-computed totals.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, PartialEq)]
#[ts(export)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub customer_name: String,
    pub phone: String,
    pub delivery_address: String,
    pub notes: Option<String>,
    #[sqlx(skip)]
    pub items: Vec<OrderItem>,
    #[ts(type = "string")]
    pub subtotal: Decimal,
    #[ts(type = "string")]
    pub tax: Decimal,
    #[ts(type = "string")]
    pub delivery_fee: Decimal,
    #[ts(type = "string")]
    pub total: Decimal,
    pub status: OrderStatus,
    #[serde(skip_serializing, default)]
    #[ts(skip)]
    pub verification_id: Uuid,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

// --- Request Payloads (Input Schemas) ---

/// CreateCategoryRequest
///
/// Admin payload for POST /admin/categories.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct CreateCategoryRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(custom(function = "validate_slug"))]
    pub slug: String,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
}

/// UpdateCategoryRequest
///
/// Partial update for PUT /admin/categories/{id}. Absent fields keep their value.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct UpdateCategoryRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_slug"))]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// CreateProductRequest
///
/// Admin payload for POST /admin/products.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct CreateProductRequest {
    pub category_id: Option<Uuid>,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub unit: String,
    #[ts(type = "string")]
    #[validate(custom(function = "validate_price"))]
    pub price: Decimal,
    #[validate(range(min = 0))]
    pub stock: i32,
}

/// UpdateProductRequest
///
/// Partial update for PUT /admin/products/{id}.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct UpdateProductRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 32))]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | null")]
    #[validate(custom(function = "validate_price"))]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0))]
    pub stock: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// AddCartItemRequest
///
/// Payload for POST /cart/{session}/items. Quantities merge into an existing line.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 99))]
    pub quantity: i32,
}

/// UpdateCartItemRequest
///
/// Payload for PUT /cart/{session}/items/{product_id}. Zero removes the line.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct UpdateCartItemRequest {
    #[validate(range(min = 0, max = 99))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct StartVerificationRequest {
    #[validate(length(min = 8, max = 32))]
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct ConfirmVerificationRequest {
    #[validate(length(equal = 6))]
    pub code: String,
}

/// CreateOrderRequest
///
/// Checkout payload for POST /orders. Prices are never accepted from the client;
/// `expected_total` is only compared against the server-side total.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct CreateOrderRequest {
    pub cart_session_id: Uuid,
    pub verification_id: Uuid,
    #[validate(length(min = 1, max = 120))]
    pub customer_name: String,
    #[validate(length(min = 5, max = 500))]
    pub delivery_address: String,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    #[serde(default)]
    #[ts(type = "string | null")]
    pub expected_total: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

/// LoginRequest
///
/// Admin sign-in payload for POST /auth/login.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 8, max = 32))]
    pub phone: String,
    #[validate(length(min = 1, max = 256))]
    pub password: String,
}

// --- Response Schemas (Output) ---

/// CartView
///
/// A cart re-priced against live products, with the totals checkout would charge.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct CartView {
    pub session_id: Uuid,
    pub items: Vec<CartLineView>,
    #[ts(type = "string")]
    pub subtotal: Decimal,
    #[ts(type = "string")]
    pub tax: Decimal,
    #[ts(type = "string")]
    pub delivery_fee: Decimal,
    #[ts(type = "string")]
    pub total: Decimal,
    /// True when a snapshot price no longer matches the live price.
    pub price_changed: bool,
    #[ts(type = "string")]
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct CartLineView {
    pub product_id: Uuid,
    pub name: String,
    #[ts(type = "string")]
    pub unit_price: Decimal,
    pub quantity: i32,
    #[ts(type = "string")]
    pub line_total: Decimal,
    /// False when the product was deactivated or no longer has enough stock.
    pub available: bool,
}

/// VerificationStarted
///
/// Returned by POST /verification. The code itself travels only over SMS.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct VerificationStarted {
    pub verification_id: Uuid,
    pub phone: String,
    #[ts(type = "string")]
    pub expires_at: DateTime<Utc>,
}

/// VerificationStatus
///
/// Result of a successful confirmation. The session stays valid for checkout
/// until `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct VerificationStatus {
    pub verification_id: Uuid,
    pub phone: String,
    pub verified: bool,
    #[ts(type = "string")]
    pub expires_at: DateTime<Utc>,
}

/// OrderReceipt
///
/// Result of checkout. `price_changed` tells the client its displayed total was stale.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct OrderReceipt {
    pub order: Order,
    pub price_changed: bool,
}

/// Bearer token returned by a successful admin login.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// AdminDashboardStats
///
/// Output schema for the administrative statistics dashboard (GET /admin/stats).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct AdminDashboardStats {
    pub total_products: i64,
    pub active_products: i64,
    /// Active products with zero stock.
    pub out_of_stock: i64,
    pub total_orders: i64,
    pub pending_orders: i64,
    /// Sum of totals over non-cancelled orders.
    #[ts(type = "string")]
    pub revenue: Decimal,
}

// --- Validation Helpers ---

fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    let well_formed = !slug.is_empty()
        && slug.len() <= 100
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if well_formed {
        Ok(())
    } else {
        Err(ValidationError::new("slug"))
    }
}

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() || price.scale() > 2 || *price > pricing::max_amount() {
        return Err(ValidationError::new("price"));
    }
    Ok(())
}
