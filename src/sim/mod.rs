//! Simulated trading engine
//!
//! Order matching against ordered-series price ticks, with:
//! - Market, limit, and stop orders with mirrored buy/sell semantics
//! - Bracket orders and OCA ("one cancels all") groups
//! - Spread/slippage execution-price modeling
//! - Position and cash accounting through the [`PositionLedger`]

pub mod adapter;
pub mod ledger;
pub mod matching;
pub mod types;

// Re-export core types
pub use adapter::ExecutionAdapter;
pub use ledger::{Position, PositionLedger};
pub use matching::{
    EngineConfig, EngineError, MatchingEngine, OrderStatusListener, PositionListener,
};
pub use types::{OcaGroupId, Order, OrderId, OrderState, OrderType, Trade};
