//! Trading Simulation Core
//!
//! The data spine and simulated execution stack of an algorithmic-trading
//! platform: a thread-safe listener-driven ordered time series, a simulated
//! order-matching engine, and a position/P&L ledger, with no live market
//! involved.

pub mod commission;
pub mod config;
pub mod interfaces;
pub mod series;
pub mod sim;
pub mod types;

pub use commission::{CommissionModel, LinearCommission};
pub use config::SimConfig;
pub use series::{
    OrderedSeries, SequenceMode, SeriesChange, SeriesError, SeriesEvent, SeriesListener,
    SeriesPoint,
};
pub use sim::{
    EngineConfig, EngineError, ExecutionAdapter, MatchingEngine, Order, OrderId, OrderState,
    OrderStatusListener, OrderType, Position, PositionLedger, PositionListener, Trade,
};
pub use types::{Currency, Instrument, Side, Symbol};
