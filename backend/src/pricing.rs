//! Money arithmetic for carts and orders.
//!
//! All amounts are `rust_decimal::Decimal` rounded to cents with half-away-from-zero
//! rounding. Client-supplied prices never enter these functions; every line is
//! priced from the live `Product` record.

use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    config::PricingConfig,
    models::{CartItem, Product},
};

/// Rounds to two decimal places, halves away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Largest amount a money column (`NUMERIC(12, 2)`) can hold.
pub fn max_amount() -> Decimal {
    Decimal::new(999_999_999_999, 2)
}

fn bounded(amount: Option<Decimal>) -> Result<Decimal, PricingError> {
    amount
        .map(round_money)
        .filter(|amount| *amount <= max_amount())
        .ok_or(PricingError::AmountTooLarge)
}

pub fn line_total(unit_price: Decimal, quantity: i32) -> Result<Decimal, PricingError> {
    bounded(unit_price.checked_mul(Decimal::from(quantity)))
}

/// Amounts charged for a cart or order, each rounded to cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,
}

/// A cart line priced against its live product.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedLine {
    pub product: Product,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    /// The price recorded in the cart when the line was added.
    pub snapshot_price: Decimal,
}

impl PricedLine {
    pub fn price_changed(&self) -> bool {
        self.unit_price != self.snapshot_price
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricingError {
    #[error("product {0} is no longer available")]
    Unavailable(Uuid),
    #[error("quantity for product {0} must be positive")]
    InvalidQuantity(Uuid),
    #[error("only {available} left of product {product_id}")]
    InsufficientStock { product_id: Uuid, available: i32 },
    #[error("amount exceeds the supported range")]
    AmountTooLarge,
}

/// compute_totals
///
/// subtotal = Σ line totals, tax = round(subtotal × rate), delivery is free at or
/// above the threshold and for an empty subtotal. Every amount must fit a money
/// column or the whole computation fails with `AmountTooLarge`.
pub fn compute_totals<I>(
    line_totals: I,
    config: &PricingConfig,
) -> Result<OrderTotals, PricingError>
where
    I: IntoIterator<Item = Decimal>,
{
    let subtotal = line_totals
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, line| bounded(acc.checked_add(line)))?;
    let tax = bounded(subtotal.checked_mul(config.tax_rate))?;
    let delivery_fee = if subtotal.is_zero() || subtotal >= config.free_delivery_threshold {
        Decimal::ZERO
    } else {
        round_money(config.delivery_fee)
    };

    let total = bounded(
        subtotal
            .checked_add(tax)
            .and_then(|amount| amount.checked_add(delivery_fee)),
    )?;

    Ok(OrderTotals {
        subtotal,
        tax,
        delivery_fee,
        total,
    })
}

/// reprice
///
/// Prices each cart line with its live product. Fails on the first line whose
/// product is missing or inactive, whose quantity is not positive, or whose
/// quantity exceeds current stock. Output order follows the cart.
pub fn reprice(
    items: &[CartItem],
    products: &HashMap<Uuid, Product>,
) -> Result<Vec<PricedLine>, PricingError> {
    items
        .iter()
        .map(|item| {
            let product = products
                .get(&item.product_id)
                .filter(|product| product.is_active)
                .ok_or(PricingError::Unavailable(item.product_id))?;

            if item.quantity <= 0 {
                return Err(PricingError::InvalidQuantity(item.product_id));
            }
            if item.quantity > product.stock {
                return Err(PricingError::InsufficientStock {
                    product_id: item.product_id,
                    available: product.stock,
                });
            }

            Ok(PricedLine {
                product: product.clone(),
                quantity: item.quantity,
                unit_price: product.price,
                line_total: line_total(product.price, item.quantity)?,
                snapshot_price: item.unit_price,
            })
        })
        .collect()
}
