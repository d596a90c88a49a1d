use crate::{
    error::{StoreError, StoreResult},
    models::{
        AdminDashboardStats, Cart, CartItem, Category, CreateCategoryRequest,
        CreateProductRequest, Order, OrderItem, OrderStatus, Product, ROLE_ADMIN,
        UpdateCategoryRequest, UpdateProductRequest, User, VerificationSession,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use sqlx::{PgPool, Postgres, Transaction, query_builder::QueryBuilder};
use std::{collections::HashMap, sync::Arc};
use uuid::Uuid;

/// ProductFilter
///
/// Catalog query parameters. `category` is a category slug.
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub search: Option<String>,
    /// Admin listings include deactivated products and categories.
    #[serde(default)]
    pub include_inactive: bool,
}

/// OrderFilter
///
/// Admin order listing parameters. `limit` is clamped to `MAX_LIMIT`.
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl OrderFilter {
    pub const MAX_LIMIT: i64 = 200;

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// OrderCommit
///
/// Everything `commit_order` writes in one transaction: the priced order (which
/// carries its verification id) and the cart it consumes.
#[derive(Debug, Clone)]
pub struct OrderCommit {
    pub order: Order,
    pub cart_session_id: Uuid,
}

/// Rows removed by one `purge_expired` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub carts: u64,
    pub verifications: u64,
}

/// Repository Trait
///
/// The persistence contract used by handlers and services. Implemented by
/// `PostgresRepository` for production and `MemoryRepository` for tests and
/// local runs without a database.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn get_user_by_phone(&self, phone: &str) -> StoreResult<Option<User>>;
    /// Creates the admin account or resets its password hash.
    async fn upsert_admin(&self, phone: &str, password_hash: &str) -> StoreResult<User>;

    // --- Categories ---
    async fn list_categories(&self, include_inactive: bool) -> StoreResult<Vec<Category>>;
    async fn get_category(&self, id: Uuid) -> StoreResult<Option<Category>>;
    // Duplicate slugs fail with `StoreError::Conflict`.
    async fn create_category(&self, req: CreateCategoryRequest) -> StoreResult<Category>;
    async fn update_category(
        &self,
        id: Uuid,
        req: UpdateCategoryRequest,
    ) -> StoreResult<Option<Category>>;
    // Soft delete. Returns false when the category does not exist.
    async fn deactivate_category(&self, id: Uuid) -> StoreResult<bool>;

    // --- Products ---
    async fn list_products(&self, filter: &ProductFilter) -> StoreResult<Vec<Product>>;
    async fn get_product(&self, id: Uuid) -> StoreResult<Option<Product>>;
    async fn get_products(&self, ids: &[Uuid]) -> StoreResult<Vec<Product>>;
    async fn create_product(&self, req: CreateProductRequest) -> StoreResult<Product>;
    async fn update_product(
        &self,
        id: Uuid,
        req: UpdateProductRequest,
    ) -> StoreResult<Option<Product>>;
    async fn deactivate_product(&self, id: Uuid) -> StoreResult<bool>;

    // --- Carts ---
    async fn create_cart(&self, cart: &Cart) -> StoreResult<()>;
    async fn get_cart(&self, session_id: Uuid) -> StoreResult<Option<Cart>>;
    /// Replaces the cart's items and timestamps if `cart.version` is still the
    /// stored version, and returns the new version. A cart saved by someone else
    /// since it was read is a `Conflict`; a missing cart is `NotFound`.
    async fn save_cart(&self, cart: &Cart) -> StoreResult<i64>;
    async fn delete_cart(&self, session_id: Uuid) -> StoreResult<bool>;

    // --- Verification ---
    async fn create_verification(&self, session: &VerificationSession) -> StoreResult<()>;
    async fn get_verification(&self, id: Uuid) -> StoreResult<Option<VerificationSession>>;
    async fn save_verification(&self, session: &VerificationSession) -> StoreResult<()>;

    // --- Orders ---
    /// Atomically increments and returns the order counter for `day`.
    async fn next_order_sequence(&self, day: NaiveDate) -> StoreResult<i64>;
    /// Inserts the order, decrements stock, consumes the verification session and
    /// deletes the cart. Either every write lands or none does.
    async fn commit_order(&self, commit: OrderCommit) -> StoreResult<Order>;
    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>>;
    async fn get_order_by_number(&self, order_number: &str) -> StoreResult<Option<Order>>;
    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<Vec<Order>>;
    /// Moves an order along the status machine. Cancelling restores stock in the
    /// same transaction.
    async fn transition_order(&self, id: Uuid, to: OrderStatus) -> StoreResult<Option<Order>>;

    // --- Maintenance ---
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeReport>;
    async fn get_stats(&self) -> StoreResult<AdminDashboardStats>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// The `Repository` implementation backed by PostgreSQL. Multi-row writes run
/// inside `sqlx` transactions; dropping an uncommitted transaction rolls it back.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const USER_COLUMNS: &str = "id, phone, role, password_hash, created_at";
const CATEGORY_COLUMNS: &str = "id, name, slug, description, is_active, created_at, updated_at";
const PRODUCT_COLUMNS: &str = "p.id, p.category_id, p.name, p.description, p.unit, p.price, \
     p.stock, p.is_active, p.created_at, p.updated_at";
const VERIFICATION_COLUMNS: &str =
    "id, phone, code_hash, attempts, verified_at, used_at, created_at, expires_at";
const ORDER_COLUMNS: &str = "id, order_number, customer_name, phone, delivery_address, notes, \
     subtotal, tax, delivery_fee, total, status, verification_id, created_at, updated_at";

/// Maps a unique-constraint violation to `Conflict`, everything else to `Database`.
fn conflict_on_unique(err: sqlx::Error, message: &str) -> StoreError {
    match err.as_database_error() {
        Some(db_err) if db_err.is_unique_violation() => StoreError::Conflict(message.to_string()),
        _ => StoreError::Database(err),
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    order_id: Uuid,
    #[sqlx(flatten)]
    item: OrderItem,
}

impl PostgresRepository {
    async fn load_cart_items(&self, session_id: Uuid) -> StoreResult<Vec<CartItem>> {
        let items = sqlx::query_as::<_, CartItem>(
            "SELECT product_id, name, unit_price, quantity FROM cart_items \
             WHERE session_id = $1 ORDER BY position",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Attaches items to a batch of orders with a single query.
    async fn attach_items(&self, mut orders: Vec<Order>) -> StoreResult<Vec<Order>> {
        if orders.is_empty() {
            return Ok(orders);
        }
        let ids: Vec<Uuid> = orders.iter().map(|order| order.id).collect();

        let rows = sqlx::query_as::<_, OrderItemRow>(
            "SELECT order_id, product_id, name, unit, unit_price, quantity, line_total \
             FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, position",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            grouped.entry(row.order_id).or_default().push(row.item);
        }
        for order in &mut orders {
            order.items = grouped.remove(&order.id).unwrap_or_default();
        }
        Ok(orders)
    }

    async fn insert_order(tx: &mut Transaction<'_, Postgres>, order: &Order) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO orders (id, order_number, customer_name, phone, delivery_address, notes, \
             subtotal, tax, delivery_fee, total, status, verification_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(&order.customer_name)
        .bind(&order.phone)
        .bind(&order.delivery_address)
        .bind(&order.notes)
        .bind(order.subtotal)
        .bind(order.tax)
        .bind(order.delivery_fee)
        .bind(order.total)
        .bind(order.status)
        .bind(order.verification_id)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| conflict_on_unique(e, "order number or verification session already used"))?;

        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (order_id, position, product_id, name, unit, unit_price, \
                 quantity, line_total) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(order.id)
            .bind(position as i32)
            .bind(item.product_id)
            .bind(&item.name)
            .bind(&item.unit)
            .bind(item.unit_price)
            .bind(item.quantity)
            .bind(item.line_total)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_user_by_phone(&self, phone: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE phone = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn upsert_admin(&self, phone: &str, password_hash: &str) -> StoreResult<User> {
        let sql = format!(
            "INSERT INTO users (id, phone, role, password_hash) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (phone) DO UPDATE SET role = EXCLUDED.role, \
             password_hash = EXCLUDED.password_hash RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(phone)
            .bind(ROLE_ADMIN)
            .bind(password_hash)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn list_categories(&self, include_inactive: bool) -> StoreResult<Vec<Category>> {
        let sql = format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE is_active OR $1 ORDER BY name"
        );
        Ok(sqlx::query_as::<_, Category>(&sql)
            .bind(include_inactive)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_category(&self, id: Uuid) -> StoreResult<Option<Category>> {
        let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = $1");
        Ok(sqlx::query_as::<_, Category>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_category(&self, req: CreateCategoryRequest) -> StoreResult<Category> {
        let sql = format!(
            "INSERT INTO categories (id, name, slug, description, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, TRUE, NOW(), NOW()) RETURNING {CATEGORY_COLUMNS}"
        );
        sqlx::query_as::<_, Category>(&sql)
            .bind(Uuid::new_v4())
            .bind(&req.name)
            .bind(&req.slug)
            .bind(&req.description)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| conflict_on_unique(e, "category slug already exists"))
    }

    async fn update_category(
        &self,
        id: Uuid,
        req: UpdateCategoryRequest,
    ) -> StoreResult<Option<Category>> {
        let sql = format!(
            "UPDATE categories SET name = COALESCE($2, name), slug = COALESCE($3, slug), \
             description = COALESCE($4, description), is_active = COALESCE($5, is_active), \
             updated_at = NOW() WHERE id = $1 RETURNING {CATEGORY_COLUMNS}"
        );
        sqlx::query_as::<_, Category>(&sql)
            .bind(id)
            .bind(req.name)
            .bind(req.slug)
            .bind(req.description)
            .bind(req.is_active)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| conflict_on_unique(e, "category slug already exists"))
    }

    async fn deactivate_category(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE categories SET is_active = FALSE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// list_products
    ///
    /// Builds the catalog query with QueryBuilder so every filter value is bound.
    /// Storefront listings hide inactive products and products in inactive categories.
    async fn list_products(&self, filter: &ProductFilter) -> StoreResult<Vec<Product>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {PRODUCT_COLUMNS} FROM products p \
             LEFT JOIN categories c ON c.id = p.category_id WHERE TRUE"
        ));

        if !filter.include_inactive {
            builder.push(" AND p.is_active AND (c.id IS NULL OR c.is_active)");
        }
        if let Some(slug) = &filter.category {
            builder.push(" AND c.slug = ");
            builder.push_bind(slug.clone());
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{search}%");
            builder.push(" AND (p.name ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR p.description ILIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }
        builder.push(" ORDER BY p.name");

        Ok(builder
            .build_query_as::<Product>()
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_product(&self, id: Uuid) -> StoreResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.id = $1");
        Ok(sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_products(&self, ids: &[Uuid]) -> StoreResult<Vec<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.id = ANY($1)");
        Ok(sqlx::query_as::<_, Product>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn create_product(&self, req: CreateProductRequest) -> StoreResult<Product> {
        let sql = format!(
            "INSERT INTO products AS p (id, category_id, name, description, unit, price, stock, \
             is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, NOW(), NOW()) RETURNING {PRODUCT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Product>(&sql)
            .bind(Uuid::new_v4())
            .bind(req.category_id)
            .bind(&req.name)
            .bind(&req.description)
            .bind(&req.unit)
            .bind(req.price)
            .bind(req.stock)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update_product(
        &self,
        id: Uuid,
        req: UpdateProductRequest,
    ) -> StoreResult<Option<Product>> {
        let sql = format!(
            "UPDATE products AS p SET category_id = COALESCE($2, category_id), \
             name = COALESCE($3, name), description = COALESCE($4, description), \
             unit = COALESCE($5, unit), price = COALESCE($6, price), \
             stock = COALESCE($7, stock), is_active = COALESCE($8, is_active), \
             updated_at = NOW() WHERE p.id = $1 RETURNING {PRODUCT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .bind(req.category_id)
            .bind(req.name)
            .bind(req.description)
            .bind(req.unit)
            .bind(req.price)
            .bind(req.stock)
            .bind(req.is_active)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn deactivate_product(&self, id: Uuid) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE products SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_cart(&self, cart: &Cart) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO carts (session_id, created_at, updated_at, expires_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(cart.session_id)
        .bind(cart.created_at)
        .bind(cart.updated_at)
        .bind(cart.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "cart session already exists"))?;
        Ok(())
    }

    async fn get_cart(&self, session_id: Uuid) -> StoreResult<Option<Cart>> {
        let cart = sqlx::query_as::<_, Cart>(
            "SELECT session_id, created_at, updated_at, expires_at, version FROM carts \
             WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        match cart {
            Some(mut cart) => {
                cart.items = self.load_cart_items(session_id).await?;
                Ok(Some(cart))
            }
            None => Ok(None),
        }
    }

    /// save_cart
    ///
    /// The versioned UPDATE takes the row lock, so a concurrent writer blocks until
    /// this transaction ends and then sees the bumped version.
    async fn save_cart(&self, cart: &Cart) -> StoreResult<i64> {
        let mut tx = self.pool.begin().await?;

        let version: Option<i64> = sqlx::query_scalar(
            "UPDATE carts SET updated_at = $2, expires_at = $3, version = version + 1 \
             WHERE session_id = $1 AND version = $4 RETURNING version",
        )
        .bind(cart.session_id)
        .bind(cart.updated_at)
        .bind(cart.expires_at)
        .bind(cart.version)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(version) = version else {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM carts WHERE session_id = $1)")
                    .bind(cart.session_id)
                    .fetch_one(&mut *tx)
                    .await?;
            return Err(if exists {
                StoreError::Conflict("cart was changed by another request".to_string())
            } else {
                StoreError::NotFound("cart")
            });
        };

        sqlx::query("DELETE FROM cart_items WHERE session_id = $1")
            .bind(cart.session_id)
            .execute(&mut *tx)
            .await?;

        for (position, item) in cart.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO cart_items (session_id, product_id, position, name, unit_price, quantity) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(cart.session_id)
            .bind(item.product_id)
            .bind(position as i32)
            .bind(&item.name)
            .bind(item.unit_price)
            .bind(item.quantity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(version)
    }

    async fn delete_cart(&self, session_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM carts WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_verification(&self, session: &VerificationSession) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO verification_sessions (id, phone, code_hash, attempts, verified_at, \
             used_at, created_at, expires_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(session.id)
        .bind(&session.phone)
        .bind(&session.code_hash)
        .bind(session.attempts)
        .bind(session.verified_at)
        .bind(session.used_at)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_verification(&self, id: Uuid) -> StoreResult<Option<VerificationSession>> {
        let sql = format!("SELECT {VERIFICATION_COLUMNS} FROM verification_sessions WHERE id = $1");
        Ok(sqlx::query_as::<_, VerificationSession>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn save_verification(&self, session: &VerificationSession) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE verification_sessions SET attempts = $2, verified_at = $3, used_at = $4, \
             expires_at = $5 WHERE id = $1",
        )
        .bind(session.id)
        .bind(session.attempts)
        .bind(session.verified_at)
        .bind(session.used_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("verification session"));
        }
        Ok(())
    }

    async fn next_order_sequence(&self, day: NaiveDate) -> StoreResult<i64> {
        let sequence: i64 = sqlx::query_scalar(
            "INSERT INTO order_counters (day, last_seq) VALUES ($1, 1) \
             ON CONFLICT (day) DO UPDATE SET last_seq = order_counters.last_seq + 1 \
             RETURNING last_seq",
        )
        .bind(day)
        .fetch_one(&self.pool)
        .await?;
        Ok(sequence)
    }

    /// commit_order
    ///
    /// One transaction, four guarded writes. Each guard that matches no row aborts
    /// the whole commit; the early return drops `tx`, which rolls it back.
    async fn commit_order(&self, commit: OrderCommit) -> StoreResult<Order> {
        let OrderCommit {
            order,
            cart_session_id,
        } = commit;
        let mut tx = self.pool.begin().await?;

        // 1. Order and its line snapshots.
        Self::insert_order(&mut tx, &order).await?;

        // 2. Stock, guarded against going negative.
        for item in &order.items {
            let result = sqlx::query(
                "UPDATE products SET stock = stock - $1, updated_at = NOW() \
                 WHERE id = $2 AND is_active AND stock >= $1",
            )
            .bind(item.quantity)
            .bind(item.product_id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::InsufficientStock {
                    product_id: item.product_id,
                });
            }
        }

        // 3. Verification session can back exactly one order.
        let consumed = sqlx::query(
            "UPDATE verification_sessions SET used_at = $2 \
             WHERE id = $1 AND used_at IS NULL AND verified_at IS NOT NULL",
        )
        .bind(order.verification_id)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await?;
        if consumed.rows_affected() == 0 {
            return Err(StoreError::Conflict(
                "verification session is no longer valid".to_string(),
            ));
        }

        // 4. The cart is consumed by the order (items cascade).
        let deleted = sqlx::query("DELETE FROM carts WHERE session_id = $1")
            .bind(cart_session_id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::Conflict("cart was already checked out".to_string()));
        }

        tx.commit().await?;
        Ok(order)
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(self.attach_items(order.into_iter().collect()).await?.pop())
    }

    async fn get_order_by_number(&self, order_number: &str) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1");
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;
        Ok(self.attach_items(order.into_iter().collect()).await?.pop())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<Vec<Order>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {ORDER_COLUMNS} FROM orders WHERE TRUE"));
        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status);
        }
        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(filter.limit());
        builder.push(" OFFSET ");
        builder.push_bind(filter.offset());

        let orders = builder
            .build_query_as::<Order>()
            .fetch_all(&self.pool)
            .await?;
        self.attach_items(orders).await
    }

    async fn transition_order(&self, id: Uuid, to: OrderStatus) -> StoreResult<Option<Order>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        let Some(order) = sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        if !order.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                from: order.status,
                to,
            });
        }

        if to == OrderStatus::Cancelled {
            sqlx::query(
                "UPDATE products p SET stock = p.stock + oi.quantity, updated_at = NOW() \
                 FROM order_items oi WHERE oi.order_id = $1 AND oi.product_id = p.id",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(to)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.get_order(id).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeReport> {
        let carts = sqlx::query("DELETE FROM carts WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let verifications = sqlx::query(
            "DELETE FROM verification_sessions WHERE expires_at <= $1 AND used_at IS NULL",
        )
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(PurgeReport {
            carts,
            verifications,
        })
    }

    async fn get_stats(&self) -> StoreResult<AdminDashboardStats> {
        Ok(sqlx::query_as::<_, AdminDashboardStats>(
            "SELECT \
               (SELECT COUNT(*) FROM products) AS total_products, \
               (SELECT COUNT(*) FROM products WHERE is_active) AS active_products, \
               (SELECT COUNT(*) FROM products WHERE is_active AND stock = 0) AS out_of_stock, \
               (SELECT COUNT(*) FROM orders) AS total_orders, \
               (SELECT COUNT(*) FROM orders WHERE status = 'pending') AS pending_orders, \
               (SELECT COALESCE(SUM(total), 0) FROM orders WHERE status <> 'cancelled') AS revenue",
        )
        .fetch_one(&self.pool)
        .await?)
    }
}
