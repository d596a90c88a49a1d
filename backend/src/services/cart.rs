use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::{ApiError, StoreError},
    models::{Cart, CartItem, CartLineView, CartView, Product},
    pricing::{PricingError, compute_totals, line_total},
    repository::RepositoryState,
};

/// Upper bound for a single cart line.
pub const MAX_LINE_QUANTITY: i32 = 99;

const SAVE_ATTEMPTS: u32 = 5;

/// CartService
///
/// Session-scoped carts. Every mutation refreshes the cart's expiry.
#[derive(Clone)]
pub struct CartService {
    repo: RepositoryState,
    config: AppConfig,
}

impl CartService {
    pub fn new(repo: RepositoryState, config: AppConfig) -> Self {
        Self { repo, config }
    }

    pub async fn create(&self) -> Result<Cart, ApiError> {
        self.create_at(Utc::now()).await
    }

    pub async fn create_at(&self, now: DateTime<Utc>) -> Result<Cart, ApiError> {
        let cart = Cart {
            session_id: Uuid::new_v4(),
            items: Vec::new(),
            created_at: now,
            updated_at: now,
            expires_at: now + self.config.cart_ttl(),
            version: 0,
        };
        self.repo.create_cart(&cart).await?;
        tracing::debug!(session_id = %cart.session_id, "cart created");
        Ok(cart)
    }

    pub async fn get(&self, session_id: Uuid) -> Result<Cart, ApiError> {
        self.get_at(session_id, Utc::now()).await
    }

    /// Loads a live cart. Missing carts are 404, expired ones 410.
    pub async fn get_at(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<Cart, ApiError> {
        let cart = self
            .repo
            .get_cart(session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("cart".to_string()))?;
        if cart.is_expired(now) {
            return Err(ApiError::CartExpired);
        }
        Ok(cart)
    }

    pub async fn add_item(
        &self,
        session_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<Cart, ApiError> {
        self.add_item_at(session_id, product_id, quantity, Utc::now()).await
    }

    /// add_item_at
    ///
    /// Adds `quantity` of a product, merging with an existing line. The line's
    /// name and price snapshots are refreshed from the live product.
    pub async fn add_item_at(
        &self,
        session_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> Result<Cart, ApiError> {
        if quantity <= 0 {
            return Err(ApiError::Validation("quantity must be positive".to_string()));
        }
        self.get_at(session_id, now).await?;
        let product = self.active_product(product_id).await?;

        self.mutate(session_id, now, |cart| {
            let current = cart.item(product_id).map_or(0, |item| item.quantity);
            let wanted = current + quantity;
            check_quantity(&product, wanted)?;

            match cart.items.iter_mut().find(|item| item.product_id == product_id) {
                Some(item) => {
                    item.quantity = wanted;
                    item.name = product.name.clone();
                    item.unit_price = product.price;
                }
                None => cart.items.push(CartItem {
                    product_id,
                    name: product.name.clone(),
                    unit_price: product.price,
                    quantity: wanted,
                }),
            }
            Ok(())
        })
        .await
    }

    pub async fn update_item(
        &self,
        session_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<Cart, ApiError> {
        self.update_item_at(session_id, product_id, quantity, Utc::now()).await
    }

    /// Sets a line's quantity. Zero removes the line.
    pub async fn update_item_at(
        &self,
        session_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> Result<Cart, ApiError> {
        if quantity < 0 {
            return Err(ApiError::Validation("quantity cannot be negative".to_string()));
        }
        if quantity == 0 {
            return self.remove_item_at(session_id, product_id, now).await;
        }

        let cart = self.get_at(session_id, now).await?;
        if cart.item(product_id).is_none() {
            return Err(ApiError::NotFound("cart item".to_string()));
        }
        let product = self.active_product(product_id).await?;
        check_quantity(&product, quantity)?;

        self.mutate(session_id, now, |cart| {
            let item = cart
                .items
                .iter_mut()
                .find(|item| item.product_id == product_id)
                .ok_or_else(|| ApiError::NotFound("cart item".to_string()))?;
            item.quantity = quantity;
            item.unit_price = product.price;
            Ok(())
        })
        .await
    }

    pub async fn remove_item(&self, session_id: Uuid, product_id: Uuid) -> Result<Cart, ApiError> {
        self.remove_item_at(session_id, product_id, Utc::now()).await
    }

    pub async fn remove_item_at(
        &self,
        session_id: Uuid,
        product_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Cart, ApiError> {
        self.mutate(session_id, now, |cart| {
            let before = cart.items.len();
            cart.items.retain(|item| item.product_id != product_id);
            if cart.items.len() == before {
                return Err(ApiError::NotFound("cart item".to_string()));
            }
            Ok(())
        })
        .await
    }

    /// Deletes the whole cart session.
    pub async fn clear(&self, session_id: Uuid) -> Result<(), ApiError> {
        if self.repo.delete_cart(session_id).await? {
            Ok(())
        } else {
            Err(ApiError::NotFound("cart".to_string()))
        }
    }

    /// view
    ///
    /// Re-prices the cart against live products. Unavailable lines stay visible
    /// (flagged) but do not count towards the totals.
    pub async fn view(&self, cart: &Cart) -> Result<CartView, ApiError> {
        let ids: Vec<Uuid> = cart.items.iter().map(|item| item.product_id).collect();
        let products: HashMap<Uuid, Product> = self
            .repo
            .get_products(&ids)
            .await?
            .into_iter()
            .map(|product| (product.id, product))
            .collect();

        let items: Vec<CartLineView> = cart
            .items
            .iter()
            .map(|item| {
                let live = products.get(&item.product_id);
                let available =
                    live.is_some_and(|p| p.is_active && p.stock >= item.quantity);
                let unit_price = live.map_or(item.unit_price, |p| p.price);
                Ok(CartLineView {
                    product_id: item.product_id,
                    name: live.map_or_else(|| item.name.clone(), |p| p.name.clone()),
                    unit_price,
                    quantity: item.quantity,
                    line_total: line_total(unit_price, item.quantity)?,
                    available,
                })
            })
            .collect::<Result<_, PricingError>>()?;

        let price_changed = cart.items.iter().any(|item| {
            products
                .get(&item.product_id)
                .is_some_and(|p| p.price != item.unit_price)
        });
        let totals = compute_totals(
            items.iter().filter(|line| line.available).map(|line| line.line_total),
            &self.config.pricing,
        )?;

        Ok(CartView {
            session_id: cart.session_id,
            items,
            subtotal: totals.subtotal,
            tax: totals.tax,
            delivery_fee: totals.delivery_fee,
            total: totals.total,
            price_changed,
            expires_at: cart.expires_at,
        })
    }

    async fn active_product(&self, product_id: Uuid) -> Result<Product, ApiError> {
        self.repo
            .get_product(product_id)
            .await?
            .filter(|product| product.is_active)
            .ok_or_else(|| ApiError::NotFound("product".to_string()))
    }

    /// mutate
    ///
    /// Read-modify-write on a live cart. `apply` runs against a fresh read each
    /// attempt; a save that loses the race to another request is retried.
    async fn mutate<F>(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
        mut apply: F,
    ) -> Result<Cart, ApiError>
    where
        F: FnMut(&mut Cart) -> Result<(), ApiError>,
    {
        let mut attempt = 1;
        loop {
            let mut cart = self.get_at(session_id, now).await?;
            apply(&mut cart)?;
            cart.updated_at = now;
            cart.expires_at = now + self.config.cart_ttl();

            match self.repo.save_cart(&cart).await {
                Ok(version) => {
                    cart.version = version;
                    return Ok(cart);
                }
                Err(StoreError::Conflict(_)) if attempt < SAVE_ATTEMPTS => {
                    tracing::debug!(%session_id, attempt, "cart changed during update, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn check_quantity(product: &Product, quantity: i32) -> Result<(), ApiError> {
    if quantity > MAX_LINE_QUANTITY {
        return Err(ApiError::Validation(format!(
            "at most {MAX_LINE_QUANTITY} of one product per order"
        )));
    }
    if quantity > product.stock {
        return Err(ApiError::InsufficientStock(format!(
            "only {} of {} in stock",
            product.stock, product.name
        )));
    }
    Ok(())
}
