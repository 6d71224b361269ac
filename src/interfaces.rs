//! Boundary contracts consumed by the platform around the simulation core
//!
//! The core never calls these itself; trading agents and the hosting layer
//! supply implementations. They live here so that calendars, persistence,
//! and remoting can integrate without the core depending on them.

use crate::series::OrderedSeries;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

/// Trading-calendar session arithmetic
pub trait TradingSchedule: Send + Sync {
    /// Whether the instant falls inside a trading session
    fn is_trading_time(&self, at: DateTime<Utc>) -> bool;

    /// Session open for the given day, if it is a trading day
    fn first_trading_time(&self, day: NaiveDate) -> Option<DateTime<Utc>>;

    /// Session close for the given day, if it is a trading day
    fn last_trading_time(&self, day: NaiveDate) -> Option<DateTime<Utc>>;
}

/// Maps a persistent series id onto a live [`OrderedSeries`] for rehydration
pub trait SeriesResolver: Send + Sync {
    fn resolve(&self, series_id: u64) -> Option<Arc<OrderedSeries>>;
}
