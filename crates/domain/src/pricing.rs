//! Order price computation.
//!
//! Everything here is pure: the same lines, discounts and policy always
//! produce the same figures. Discounts are summed, never compounded, and tax
//! is charged on the discounted subtotal.

use serde::{Deserialize, Serialize};

use crate::money::{Money, Rate};
use crate::order::LineItem;
use crate::sale::Sale;

/// Smallest total an order can be charged.
pub const MINIMUM_TOTAL: Money = Money::from_cents(1);

/// When shipping is charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingPolicy {
    pub flat_fee: Money,
    /// Discounted subtotals at or above this ship free.
    pub free_threshold: Money,
    pub free_for_members: bool,
}

impl ShippingPolicy {
    pub fn fee(&self, discounted_subtotal: Money, is_member: bool) -> Money {
        if (is_member && self.free_for_members) || discounted_subtotal >= self.free_threshold {
            Money::zero()
        } else {
            self.flat_fee
        }
    }
}

impl Default for ShippingPolicy {
    fn default() -> Self {
        Self {
            flat_fee: Money::from_major(40),
            free_threshold: Money::from_major(499),
            free_for_members: true,
        }
    }
}

/// Deployment-wide pricing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPolicy {
    pub tax_rate: Rate,
    /// Extra discount for members, applied after coupon and sale.
    pub membership_rate: Rate,
    pub shipping: ShippingPolicy,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            tax_rate: Rate::from_bps(1800),
            membership_rate: Rate::zero(),
            shipping: ShippingPolicy::default(),
        }
    }
}

impl PricingPolicy {
    /// Membership discount on what is left after coupon and sale.
    pub fn membership_discount(&self, subtotal: Money, prior: Money, is_member: bool) -> Money {
        if !is_member || self.membership_rate.is_zero() {
            return Money::zero();
        }
        (subtotal - prior).non_negative().percent(self.membership_rate)
    }
}

/// The three independent discount amounts applied to one order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discounts {
    pub coupon: Money,
    pub sale: Money,
    pub membership: Money,
}

impl Discounts {
    pub fn total(&self) -> Money {
        self.coupon + self.sale + self.membership
    }
}

/// Server-computed money figures of an order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub discount: Money,
    pub sale_discount: Money,
    pub membership_discount: Money,
    pub tax: Money,
    pub shipping: Money,
    pub total_price: Money,
}

impl OrderTotals {
    pub fn compute(
        lines: &[LineItem],
        discounts: Discounts,
        shipping: Money,
        tax_rate: Rate,
    ) -> Self {
        let subtotal = subtotal(lines);
        let taxable = (subtotal - discounts.total()).non_negative();
        let tax = taxable.percent(tax_rate);
        let total_price = (subtotal - discounts.total() + tax + shipping).max(MINIMUM_TOTAL);

        Self {
            subtotal,
            discount: discounts.coupon,
            sale_discount: discounts.sale,
            membership_discount: discounts.membership,
            tax,
            shipping,
            total_price,
        }
    }

    pub fn total_discount(&self) -> Money {
        self.discount + self.sale_discount + self.membership_discount
    }
}

pub fn subtotal(lines: &[LineItem]) -> Money {
    lines.iter().map(LineItem::line_total).sum()
}

/// Sale discount for a single line. Zero when the line has no category or
/// the sale does not cover it.
pub fn sale_discount_for_line(line: &LineItem, sale: &Sale, is_member: bool) -> Money {
    let Some(category) = line.category.as_deref() else {
        return Money::zero();
    };
    match sale.rate_for(category, is_member) {
        Some(rate) => line.unit_price.multiply(line.quantity).percent(rate),
        None => Money::zero(),
    }
}

/// Sum of per-line sale discounts. No sale means no discount.
pub fn sale_discount(lines: &[LineItem], sale: Option<&Sale>, is_member: bool) -> Money {
    match sale {
        Some(sale) => lines
            .iter()
            .map(|line| sale_discount_for_line(line, sale, is_member))
            .sum(),
        None => Money::zero(),
    }
}
