//! Order and trade types for the simulated matching engine

use crate::types::{Side, Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Order ID type - u64 for performance
pub type OrderId = u64;

/// OCA ("one cancels all") group ID
pub type OcaGroupId = u64;

/// Sentinel for an order that has not been submitted yet
pub const UNASSIGNED_ORDER_ID: OrderId = 0;

/// Atomic counters for thread-safe, lock-free id generation.
/// Process-wide monotonicity means ids are never reused within a run,
/// which the execution adapter's reconciliation sets rely on.
static ORDER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static OCA_GROUP_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_order_id() -> OrderId {
    ORDER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn next_oca_group_id() -> OcaGroupId {
    OCA_GROUP_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Order type - determines fill logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Fill at the next computed price
    Market,

    /// Buy fills when computed price <= limit, sell when >= limit
    Limit,

    /// Buy triggers when computed price >= stop, sell when <= stop
    Stop,

    /// Not supported by the simulated engine; rejected at submission
    StopLimit,
}

/// Order lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    /// Submitted, awaiting price ticks
    New,

    /// Completely filled
    Filled,

    /// Cancelled (explicitly or through an OCA sibling fill)
    Cancelled,
}

/// An order intent against a single instrument
///
/// The id is allocated by the engine at submission; construct with the
/// `market`/`limit`/`stop` helpers and hand to `submit_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub state: OrderState,
    pub oca_group: Option<OcaGroupId>,
    pub parent_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    fn new(
        symbol: Symbol,
        side: Side,
        order_type: OrderType,
        quantity: f64,
        limit_price: Option<f64>,
        stop_price: Option<f64>,
    ) -> Self {
        Self {
            id: UNASSIGNED_ORDER_ID,
            symbol,
            side,
            order_type,
            quantity,
            limit_price,
            stop_price,
            state: OrderState::New,
            oca_group: None,
            parent_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn market(symbol: Symbol, side: Side, quantity: f64) -> Self {
        Self::new(symbol, side, OrderType::Market, quantity, None, None)
    }

    pub fn limit(symbol: Symbol, side: Side, quantity: f64, limit_price: f64) -> Self {
        Self::new(
            symbol,
            side,
            OrderType::Limit,
            quantity,
            Some(limit_price),
            None,
        )
    }

    pub fn stop(symbol: Symbol, side: Side, quantity: f64, stop_price: f64) -> Self {
        Self::new(
            symbol,
            side,
            OrderType::Stop,
            quantity,
            None,
            Some(stop_price),
        )
    }

    /// Price the order is anchored to, for marker annotation: limit price,
    /// stop price, or none for a pure market order
    pub fn reference_price(&self) -> Option<f64> {
        match self.order_type {
            OrderType::Limit | OrderType::StopLimit => self.limit_price,
            OrderType::Stop => self.stop_price,
            OrderType::Market => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, OrderState::Filled | OrderState::Cancelled)
    }
}

/// Immutable fill record, created exactly once per fill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    /// Venue tag, e.g. "SIM" for the simulated engine
    pub venue: Symbol,
    pub timestamp: DateTime<Utc>,
    pub quantity: f64,
    /// Raw execution price after spread and slippage
    pub price: f64,
    /// Effective per-unit price with commission folded into the cash flow;
    /// this is the price the ledger's average-cost accounting uses
    pub avg_price: f64,
    pub commission: f64,
}
