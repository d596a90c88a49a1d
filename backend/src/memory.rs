use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    error::{StoreError, StoreResult},
    models::{
        AdminDashboardStats, Cart, Category, CreateCategoryRequest, CreateProductRequest, Order,
        OrderStatus, Product, ROLE_ADMIN, UpdateCategoryRequest, UpdateProductRequest, User,
        VerificationSession,
    },
    repository::{OrderCommit, OrderFilter, ProductFilter, PurgeReport, Repository},
};

/// CommitStep
///
/// The writes `commit_order` performs, in order. Used to inject a failure right
/// after a given write so rollback can be observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStep {
    InsertOrder,
    DecrementStock,
    ConsumeVerification,
    DeleteCart,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    categories: HashMap<Uuid, Category>,
    products: HashMap<Uuid, Product>,
    carts: HashMap<Uuid, Cart>,
    verifications: HashMap<Uuid, VerificationSession>,
    // Insertion order doubles as creation order.
    orders: Vec<Order>,
    counters: HashMap<NaiveDate, i64>,
}

#[derive(Default)]
struct Inner {
    state: MemoryState,
    fail_at: Option<CommitStep>,
}

/// MemoryRepository
///
/// An in-process `Repository`. Order commits are applied to a clone of the state
/// that replaces the live state only when every step succeeds, which gives the
/// same all-or-nothing outcome as the Postgres transaction.
#[derive(Default)]
pub struct MemoryRepository {
    inner: Mutex<Inner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// A repository whose order commits fail right after `step` has been written.
    pub fn failing_at(step: CommitStep) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: MemoryState::default(),
                fail_at: Some(step),
            }),
        }
    }

    pub async fn set_failure(&self, step: Option<CommitStep>) {
        self.inner.lock().await.fail_at = step;
    }

    /// Inserts or replaces a user record as-is.
    pub async fn insert_user(&self, user: User) {
        self.inner.lock().await.state.users.insert(user.id, user);
    }
}

fn check_injected(fail_at: Option<CommitStep>, step: CommitStep) -> StoreResult<()> {
    if fail_at == Some(step) {
        return Err(StoreError::Unavailable(format!("injected failure after {step:?}")));
    }
    Ok(())
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

impl MemoryState {
    fn slug_taken(&self, slug: &str, except: Option<Uuid>) -> bool {
        self.categories
            .values()
            .any(|category| category.slug == slug && Some(category.id) != except)
    }

    fn apply_commit(&mut self, commit: &OrderCommit, fail_at: Option<CommitStep>) -> StoreResult<()> {
        let order = &commit.order;

        if self.orders.iter().any(|existing| {
            existing.order_number == order.order_number
                || existing.verification_id == order.verification_id
        }) {
            return Err(StoreError::Conflict(
                "order number or verification session already used".to_string(),
            ));
        }
        self.orders.push(order.clone());
        check_injected(fail_at, CommitStep::InsertOrder)?;

        for item in &order.items {
            let product = self
                .products
                .get_mut(&item.product_id)
                .filter(|product| product.is_active && product.stock >= item.quantity)
                .ok_or(StoreError::InsufficientStock {
                    product_id: item.product_id,
                })?;
            product.stock -= item.quantity;
            product.updated_at = order.created_at;
        }
        check_injected(fail_at, CommitStep::DecrementStock)?;

        let session = self
            .verifications
            .get_mut(&order.verification_id)
            .filter(|session| session.is_verified() && !session.is_used())
            .ok_or_else(|| {
                StoreError::Conflict("verification session is no longer valid".to_string())
            })?;
        session.used_at = Some(order.created_at);
        check_injected(fail_at, CommitStep::ConsumeVerification)?;

        if self.carts.remove(&commit.cart_session_id).is_none() {
            return Err(StoreError::Conflict("cart was already checked out".to_string()));
        }
        check_injected(fail_at, CommitStep::DeleteCart)?;

        Ok(())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.inner.lock().await.state.users.get(&id).cloned())
    }

    async fn get_user_by_phone(&self, phone: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner.state.users.values().find(|user| user.phone == phone).cloned())
    }

    async fn upsert_admin(&self, phone: &str, password_hash: &str) -> StoreResult<User> {
        let mut inner = self.inner.lock().await;
        let users = &mut inner.state.users;

        let existing = users.values().find(|user| user.phone == phone).map(|user| user.id);
        let user = match existing.and_then(|id| users.get_mut(&id)) {
            Some(user) => {
                user.role = ROLE_ADMIN.to_string();
                user.password_hash = Some(password_hash.to_string());
                user.clone()
            }
            None => {
                let user = User {
                    id: Uuid::new_v4(),
                    phone: phone.to_string(),
                    role: ROLE_ADMIN.to_string(),
                    password_hash: Some(password_hash.to_string()),
                    created_at: Utc::now(),
                };
                users.insert(user.id, user.clone());
                user
            }
        };
        Ok(user)
    }

    async fn list_categories(&self, include_inactive: bool) -> StoreResult<Vec<Category>> {
        let inner = self.inner.lock().await;
        let mut categories: Vec<Category> = inner
            .state
            .categories
            .values()
            .filter(|category| include_inactive || category.is_active)
            .cloned()
            .collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn get_category(&self, id: Uuid) -> StoreResult<Option<Category>> {
        Ok(self.inner.lock().await.state.categories.get(&id).cloned())
    }

    async fn create_category(&self, req: CreateCategoryRequest) -> StoreResult<Category> {
        let mut inner = self.inner.lock().await;
        if inner.state.slug_taken(&req.slug, None) {
            return Err(StoreError::Conflict("category slug already exists".to_string()));
        }
        let now = Utc::now();
        let category = Category {
            id: Uuid::new_v4(),
            name: req.name,
            slug: req.slug,
            description: req.description,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        inner.state.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn update_category(
        &self,
        id: Uuid,
        req: UpdateCategoryRequest,
    ) -> StoreResult<Option<Category>> {
        let mut inner = self.inner.lock().await;
        if let Some(slug) = &req.slug {
            if inner.state.slug_taken(slug, Some(id)) {
                return Err(StoreError::Conflict("category slug already exists".to_string()));
            }
        }
        let Some(category) = inner.state.categories.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = req.name {
            category.name = name;
        }
        if let Some(slug) = req.slug {
            category.slug = slug;
        }
        if let Some(description) = req.description {
            category.description = Some(description);
        }
        if let Some(is_active) = req.is_active {
            category.is_active = is_active;
        }
        category.updated_at = Utc::now();
        Ok(Some(category.clone()))
    }

    async fn deactivate_category(&self, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        Ok(match inner.state.categories.get_mut(&id) {
            Some(category) => {
                category.is_active = false;
                category.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn list_products(&self, filter: &ProductFilter) -> StoreResult<Vec<Product>> {
        let inner = self.inner.lock().await;
        let state = &inner.state;
        let search = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty());

        let mut products: Vec<Product> = state
            .products
            .values()
            .filter(|product| {
                let category = product.category_id.and_then(|id| state.categories.get(&id));
                let visible = filter.include_inactive
                    || (product.is_active && category.is_none_or(|c| c.is_active));
                let in_category = match &filter.category {
                    Some(slug) => category.is_some_and(|c| &c.slug == slug),
                    None => true,
                };
                let matches_search = search.is_none_or(|needle| {
                    contains_ignore_case(&product.name, needle)
                        || product
                            .description
                            .as_deref()
                            .is_some_and(|d| contains_ignore_case(d, needle))
                });
                visible && in_category && matches_search
            })
            .cloned()
            .collect();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }

    async fn get_product(&self, id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self.inner.lock().await.state.products.get(&id).cloned())
    }

    async fn get_products(&self, ids: &[Uuid]) -> StoreResult<Vec<Product>> {
        let inner = self.inner.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| inner.state.products.get(id).cloned())
            .collect())
    }

    async fn create_product(&self, req: CreateProductRequest) -> StoreResult<Product> {
        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4(),
            category_id: req.category_id,
            name: req.name,
            description: req.description,
            unit: req.unit,
            price: req.price,
            stock: req.stock,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let mut inner = self.inner.lock().await;
        inner.state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn update_product(
        &self,
        id: Uuid,
        req: UpdateProductRequest,
    ) -> StoreResult<Option<Product>> {
        let mut inner = self.inner.lock().await;
        let Some(product) = inner.state.products.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(category_id) = req.category_id {
            product.category_id = Some(category_id);
        }
        if let Some(name) = req.name {
            product.name = name;
        }
        if let Some(description) = req.description {
            product.description = Some(description);
        }
        if let Some(unit) = req.unit {
            product.unit = unit;
        }
        if let Some(price) = req.price {
            product.price = price;
        }
        if let Some(stock) = req.stock {
            product.stock = stock;
        }
        if let Some(is_active) = req.is_active {
            product.is_active = is_active;
        }
        product.updated_at = Utc::now();
        Ok(Some(product.clone()))
    }

    async fn deactivate_product(&self, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        Ok(match inner.state.products.get_mut(&id) {
            Some(product) => {
                product.is_active = false;
                product.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn create_cart(&self, cart: &Cart) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state.carts.contains_key(&cart.session_id) {
            return Err(StoreError::Conflict("cart session already exists".to_string()));
        }
        inner.state.carts.insert(cart.session_id, cart.clone());
        Ok(())
    }

    async fn get_cart(&self, session_id: Uuid) -> StoreResult<Option<Cart>> {
        Ok(self.inner.lock().await.state.carts.get(&session_id).cloned())
    }

    async fn save_cart(&self, cart: &Cart) -> StoreResult<i64> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .state
            .carts
            .get_mut(&cart.session_id)
            .ok_or(StoreError::NotFound("cart"))?;
        if stored.version != cart.version {
            return Err(StoreError::Conflict(
                "cart was changed by another request".to_string(),
            ));
        }
        stored.items = cart.items.clone();
        stored.updated_at = cart.updated_at;
        stored.expires_at = cart.expires_at;
        stored.version += 1;
        Ok(stored.version)
    }

    async fn delete_cart(&self, session_id: Uuid) -> StoreResult<bool> {
        Ok(self.inner.lock().await.state.carts.remove(&session_id).is_some())
    }

    async fn create_verification(&self, session: &VerificationSession) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.state.verifications.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_verification(&self, id: Uuid) -> StoreResult<Option<VerificationSession>> {
        Ok(self.inner.lock().await.state.verifications.get(&id).cloned())
    }

    async fn save_verification(&self, session: &VerificationSession) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.state.verifications.get_mut(&session.id) {
            Some(stored) => {
                stored.attempts = session.attempts;
                stored.verified_at = session.verified_at;
                stored.used_at = session.used_at;
                stored.expires_at = session.expires_at;
                Ok(())
            }
            None => Err(StoreError::NotFound("verification session")),
        }
    }

    async fn next_order_sequence(&self, day: NaiveDate) -> StoreResult<i64> {
        let mut inner = self.inner.lock().await;
        let counter = inner.state.counters.entry(day).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn commit_order(&self, commit: OrderCommit) -> StoreResult<Order> {
        let mut inner = self.inner.lock().await;
        let mut staged = inner.state.clone();
        staged.apply_commit(&commit, inner.fail_at)?;
        inner.state = staged;
        Ok(commit.order)
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let inner = self.inner.lock().await;
        Ok(inner.state.orders.iter().find(|order| order.id == id).cloned())
    }

    async fn get_order_by_number(&self, order_number: &str) -> StoreResult<Option<Order>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .state
            .orders
            .iter()
            .find(|order| order.order_number == order_number)
            .cloned())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<Vec<Order>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .state
            .orders
            .iter()
            .rev()
            .filter(|order| filter.status.is_none_or(|status| order.status == status))
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .cloned()
            .collect())
    }

    async fn transition_order(&self, id: Uuid, to: OrderStatus) -> StoreResult<Option<Order>> {
        let mut inner = self.inner.lock().await;
        let state = &mut inner.state;

        let Some(index) = state.orders.iter().position(|order| order.id == id) else {
            return Ok(None);
        };
        let from = state.orders[index].status;
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { from, to });
        }

        let now = Utc::now();
        if to == OrderStatus::Cancelled {
            for item in &state.orders[index].items {
                if let Some(product) = state.products.get_mut(&item.product_id) {
                    product.stock += item.quantity;
                    product.updated_at = now;
                }
            }
        }

        let order = &mut state.orders[index];
        order.status = to;
        order.updated_at = now;
        Ok(Some(order.clone()))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeReport> {
        let mut inner = self.inner.lock().await;
        let state = &mut inner.state;

        let carts_before = state.carts.len();
        state.carts.retain(|_, cart| !cart.is_expired(now));
        let verifications_before = state.verifications.len();
        state
            .verifications
            .retain(|_, session| !session.is_expired(now) || session.is_used());

        Ok(PurgeReport {
            carts: (carts_before - state.carts.len()) as u64,
            verifications: (verifications_before - state.verifications.len()) as u64,
        })
    }

    async fn get_stats(&self) -> StoreResult<AdminDashboardStats> {
        let inner = self.inner.lock().await;
        let state = &inner.state;
        let count = |n: usize| n as i64;

        Ok(AdminDashboardStats {
            total_products: count(state.products.len()),
            active_products: count(state.products.values().filter(|p| p.is_active).count()),
            out_of_stock: count(
                state
                    .products
                    .values()
                    .filter(|p| p.is_active && p.stock == 0)
                    .count(),
            ),
            total_orders: count(state.orders.len()),
            pending_orders: count(
                state
                    .orders
                    .iter()
                    .filter(|o| o.status == OrderStatus::Pending)
                    .count(),
            ),
            revenue: state
                .orders
                .iter()
                .filter(|o| o.status != OrderStatus::Cancelled)
                .map(|o| o.total)
                .sum::<Decimal>(),
        })
    }
}
