use chrono::{NaiveDate, Utc};
use producer_market::{
    config::PricingConfig,
    models::{CartItem, Product},
    order_number::{format_order_number, parse_order_number},
    pricing::{PricingError, compute_totals, line_total, max_amount, reprice, round_money},
};
use rust_decimal::Decimal;
use std::{collections::HashMap, str::FromStr};
use uuid::Uuid;

fn dec(raw: &str) -> Decimal {
    Decimal::from_str(raw).unwrap()
}

fn product(price: &str, stock: i32) -> Product {
    Product {
        id: Uuid::new_v4(),
        name: "Honey".to_string(),
        unit: "jar".to_string(),
        price: dec(price),
        stock,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        ..Product::default()
    }
}

fn line(product: &Product, snapshot: &str, quantity: i32) -> CartItem {
    CartItem {
        product_id: product.id,
        name: product.name.clone(),
        unit_price: dec(snapshot),
        quantity,
    }
}

fn config(tax: &str, fee: &str, threshold: &str) -> PricingConfig {
    PricingConfig {
        tax_rate: dec(tax),
        delivery_fee: dec(fee),
        free_delivery_threshold: dec(threshold),
    }
}

// --- Rounding ---

#[test]
fn test_round_money_half_away_from_zero() {
    assert_eq!(round_money(dec("2.345")), dec("2.35"));
    assert_eq!(round_money(dec("2.344")), dec("2.34"));
    assert_eq!(round_money(dec("-2.345")), dec("-2.35"));
    assert_eq!(round_money(dec("10")), dec("10"));
}

#[test]
fn test_line_total_rounds_to_cents() {
    assert_eq!(line_total(dec("3.333"), 3).unwrap(), dec("10.00"));
    assert_eq!(line_total(dec("4.50"), 2).unwrap(), dec("9.00"));
}

#[test]
fn test_line_total_rejects_amounts_beyond_money_columns() {
    let err = line_total(Decimal::MAX, 2).unwrap_err();
    assert_eq!(err, PricingError::AmountTooLarge);

    assert_eq!(line_total(max_amount(), 1).unwrap(), max_amount());
    let err = line_total(max_amount(), 2).unwrap_err();
    assert_eq!(err, PricingError::AmountTooLarge);
}

// --- Totals ---

#[test]
fn test_totals_below_threshold_charge_delivery() {
    let totals =
        compute_totals(vec![dec("12.50"), dec("7.25")], &config("0.08", "5.00", "50")).unwrap();

    assert_eq!(totals.subtotal, dec("19.75"));
    // 19.75 * 0.08 = 1.58
    assert_eq!(totals.tax, dec("1.58"));
    assert_eq!(totals.delivery_fee, dec("5.00"));
    assert_eq!(totals.total, dec("26.33"));
}

#[test]
fn test_totals_at_threshold_ship_free() {
    let totals = compute_totals(vec![dec("50.00")], &config("0", "5.00", "50.00")).unwrap();
    assert_eq!(totals.delivery_fee, Decimal::ZERO);
    assert_eq!(totals.total, dec("50.00"));
}

#[test]
fn test_totals_empty_cart_is_zero() {
    let totals = compute_totals(Vec::<Decimal>::new(), &PricingConfig::default()).unwrap();
    assert_eq!(totals.subtotal, Decimal::ZERO);
    assert_eq!(totals.delivery_fee, Decimal::ZERO);
    assert_eq!(totals.total, Decimal::ZERO);
}

#[test]
fn test_tax_rounding_midpoint() {
    // 10.25 * 0.1 = 1.025 -> 1.03
    let totals = compute_totals(vec![dec("10.25")], &config("0.1", "0", "0")).unwrap();
    assert_eq!(totals.tax, dec("1.03"));
}

#[test]
fn test_totals_reject_subtotal_overflow() {
    let err = compute_totals(vec![max_amount(), dec("0.01")], &PricingConfig::default())
        .unwrap_err();
    assert_eq!(err, PricingError::AmountTooLarge);

    // Fits as a subtotal, but delivery pushes the total past the limit.
    let below = max_amount() - dec("1.00");
    let err = compute_totals(vec![below], &config("0", "5.00", "1000000000000"))
        .unwrap_err();
    assert_eq!(err, PricingError::AmountTooLarge);
}

#[test]
fn test_reprice_rejects_line_overflow() {
    let gold = product("9999999999.99", 10);
    let products = HashMap::from([(gold.id, gold.clone())]);

    let err = reprice(&[line(&gold, "9999999999.99", 2)], &products).unwrap_err();
    assert_eq!(err, PricingError::AmountTooLarge);
}

// --- Re-pricing ---

#[test]
fn test_reprice_uses_live_price_not_snapshot() {
    let honey = product("8.00", 10);
    let products = HashMap::from([(honey.id, honey.clone())]);
    // Client-side snapshot claims the honey costs one cent.
    let items = vec![line(&honey, "0.01", 2)];

    let lines = reprice(&items, &products).unwrap();

    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].unit_price, dec("8.00"));
    assert_eq!(lines[0].line_total, dec("16.00"));
    assert!(lines[0].price_changed());
}

#[test]
fn test_reprice_rejects_inactive_and_missing_products() {
    let mut retired = product("3.00", 5);
    retired.is_active = false;
    let products = HashMap::from([(retired.id, retired.clone())]);

    let err = reprice(&[line(&retired, "3.00", 1)], &products).unwrap_err();
    assert_eq!(err, PricingError::Unavailable(retired.id));

    let ghost = product("1.00", 1);
    let err = reprice(&[line(&ghost, "1.00", 1)], &HashMap::new()).unwrap_err();
    assert_eq!(err, PricingError::Unavailable(ghost.id));
}

#[test]
fn test_reprice_rejects_quantity_over_stock() {
    let eggs = product("0.40", 6);
    let products = HashMap::from([(eggs.id, eggs.clone())]);

    let err = reprice(&[line(&eggs, "0.40", 12)], &products).unwrap_err();
    assert_eq!(
        err,
        PricingError::InsufficientStock {
            product_id: eggs.id,
            available: 6
        }
    );
}

#[test]
fn test_reprice_keeps_cart_order() {
    let a = product("1.00", 5);
    let b = product("2.00", 5);
    let products = HashMap::from([(a.id, a.clone()), (b.id, b.clone())]);

    let lines = reprice(&[line(&b, "2.00", 1), line(&a, "1.00", 1)], &products).unwrap();
    assert_eq!(lines[0].product.id, b.id);
    assert_eq!(lines[1].product.id, a.id);
}

// --- Order numbers ---

#[test]
fn test_order_number_format() {
    let day = NaiveDate::from_ymd_opt(2026, 1, 14).unwrap();
    assert_eq!(format_order_number("ORD", day, 7), "ORD-20260114-0007");
    assert_eq!(format_order_number("ORD", day, 12345), "ORD-20260114-12345");
}

#[test]
fn test_order_number_parse() {
    let parsed = parse_order_number("FARM-20251231-0042").unwrap();
    assert_eq!(parsed.prefix, "FARM");
    assert_eq!(parsed.day, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
    assert_eq!(parsed.sequence, 42);

    // Prefixes may contain dashes themselves.
    let parsed = parse_order_number("MY-SHOP-20251231-0001").unwrap();
    assert_eq!(parsed.prefix, "MY-SHOP");
}

#[test]
fn test_order_number_parse_rejects_garbage() {
    for raw in [
        "",
        "ORD",
        "ORD-20260114",
        "ORD-2026011-0001",
        "ORD-20261399-0001",
        "ORD-20260114-01",
        "ORD-20260114-0000",
        "ORD-20260114-00a1",
        "-20260114-0001",
    ] {
        assert!(parse_order_number(raw).is_none(), "{raw:?} should not parse");
    }
}
