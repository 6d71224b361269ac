//! Commission models
//!
//! Pure `(order, filled_qty, exec_price) -> commission` functions, kept
//! behind a trait so the matching engine never hardcodes a fee schedule.

use crate::sim::Order;

/// Stateless commission calculator
pub trait CommissionModel: Send + Sync {
    fn commission(&self, order: &Order, filled_qty: f64, exec_price: f64) -> f64;
}

/// Fixed + per-share + per-value linear schedule
///
/// `commission = fixed + qty * per_share + qty * price * per_value`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearCommission {
    pub fixed: f64,
    pub per_share: f64,
    pub per_value: f64,
}

impl LinearCommission {
    pub fn new(fixed: f64, per_share: f64, per_value: f64) -> Self {
        Self {
            fixed,
            per_share,
            per_value,
        }
    }

    /// Commission-free schedule
    pub fn free() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

impl Default for LinearCommission {
    fn default() -> Self {
        Self::free()
    }
}

impl CommissionModel for LinearCommission {
    fn commission(&self, _order: &Order, filled_qty: f64, exec_price: f64) -> f64 {
        self.fixed + filled_qty * self.per_share + filled_qty * exec_price * self.per_value
    }
}
