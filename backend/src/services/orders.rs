//! Checkout and order lifecycle.
//!
//! `create_order_at` is the only path that produces an order:
//!
//! 1. validate the payload
//! 2. check the verification session
//! 3. load the cart and check its expiry
//! 4. re-price every line against live products
//! 5. compute totals
//! 6. compare with the client's `expected_total`, if any
//! 7. allocate the day's next order number
//! 8. commit order, stock, verification and cart in one transaction
//!
//! A failure in step 8 leaves every record as it was. The order number allocated in
//! step 7 is not reused.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::AppConfig,
    error::ApiError,
    models::{CreateOrderRequest, Order, OrderItem, OrderReceipt, OrderStatus, Product},
    order_number::{format_order_number, parse_order_number},
    pricing::{compute_totals, reprice, round_money},
    repository::{OrderCommit, RepositoryState},
    services::verification::{normalize_phone, require_verified},
};

/// OrderService
///
/// Turns a cart and a verified phone into an order, and serves order tracking
/// and status changes.
#[derive(Clone)]
pub struct OrderService {
    repo: RepositoryState,
    config: AppConfig,
}

impl OrderService {
    pub fn new(repo: RepositoryState, config: AppConfig) -> Self {
        Self { repo, config }
    }

    pub async fn create_order(&self, req: CreateOrderRequest) -> Result<OrderReceipt, ApiError> {
        self.create_order_at(req, Utc::now()).await
    }

    pub async fn create_order_at(
        &self,
        req: CreateOrderRequest,
        now: DateTime<Utc>,
    ) -> Result<OrderReceipt, ApiError> {
        req.validate()?;

        let session = self
            .repo
            .get_verification(req.verification_id)
            .await?
            .ok_or_else(|| {
                ApiError::VerificationRequired("phone verification required".to_string())
            })?;
        require_verified(&session, now)?;

        let cart = self
            .repo
            .get_cart(req.cart_session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("cart".to_string()))?;
        if cart.is_expired(now) {
            return Err(ApiError::CartExpired);
        }
        if cart.items.is_empty() {
            return Err(ApiError::Validation("cart is empty".to_string()));
        }

        let ids: Vec<Uuid> = cart.items.iter().map(|item| item.product_id).collect();
        let products: HashMap<Uuid, Product> = self
            .repo
            .get_products(&ids)
            .await?
            .into_iter()
            .map(|product| (product.id, product))
            .collect();
        let lines = reprice(&cart.items, &products)?;
        let totals = compute_totals(lines.iter().map(|line| line.line_total), &self.config.pricing)?;

        let mut price_changed = lines.iter().any(|line| line.price_changed());
        if let Some(expected) = req.expected_total {
            if round_money(expected) != totals.total {
                tracing::warn!(
                    cart = %cart.session_id,
                    expected = %expected,
                    actual = %totals.total,
                    "client total does not match server total"
                );
                price_changed = true;
            }
        }

        let day = now.date_naive();
        let sequence = self.repo.next_order_sequence(day).await?;
        let order_number = format_order_number(&self.config.order_number_prefix, day, sequence);

        let order = Order {
            id: Uuid::new_v4(),
            order_number,
            customer_name: req.customer_name.trim().to_string(),
            phone: session.phone.clone(),
            delivery_address: req.delivery_address.trim().to_string(),
            notes: req
                .notes
                .map(|notes| notes.trim().to_string())
                .filter(|notes| !notes.is_empty()),
            items: lines
                .iter()
                .map(|line| OrderItem {
                    product_id: line.product.id,
                    name: line.product.name.clone(),
                    unit: line.product.unit.clone(),
                    unit_price: line.unit_price,
                    quantity: line.quantity,
                    line_total: line.line_total,
                })
                .collect(),
            subtotal: totals.subtotal,
            tax: totals.tax,
            delivery_fee: totals.delivery_fee,
            total: totals.total,
            status: OrderStatus::Pending,
            verification_id: session.id,
            created_at: now,
            updated_at: now,
        };

        let order_number = order.order_number.clone();
        let commit = OrderCommit {
            order,
            cart_session_id: cart.session_id,
        };
        match self.repo.commit_order(commit).await {
            Ok(order) => {
                tracing::info!(
                    order_number = %order.order_number,
                    total = %order.total,
                    items = order.items.len(),
                    "order placed"
                );
                Ok(OrderReceipt {
                    order,
                    price_changed,
                })
            }
            Err(err) => {
                tracing::warn!(order_number = %order_number, error = %err, "order commit rolled back");
                Err(err.into())
            }
        }
    }

    /// lookup
    ///
    /// Public order tracking. The caller must know both the order number and the
    /// phone it was placed with; any mismatch is reported as not found.
    pub async fn lookup(&self, order_number: &str, phone: &str) -> Result<Order, ApiError> {
        let not_found = || ApiError::NotFound("order".to_string());
        let parsed = parse_order_number(order_number).ok_or_else(not_found)?;
        if parsed.prefix != self.config.order_number_prefix {
            return Err(not_found());
        }
        let phone = normalize_phone(phone).map_err(|_| not_found())?;

        self.repo
            .get_order_by_number(order_number)
            .await?
            .filter(|order| order.phone == phone)
            .ok_or_else(not_found)
    }

    /// Moves an order along its status machine. Cancelling restocks its items.
    pub async fn update_status(&self, id: Uuid, to: OrderStatus) -> Result<Order, ApiError> {
        let order = self
            .repo
            .transition_order(id, to)
            .await?
            .ok_or_else(|| ApiError::NotFound("order".to_string()))?;
        tracing::info!(order_number = %order.order_number, status = %order.status, "order status changed");
        Ok(order)
    }
}
