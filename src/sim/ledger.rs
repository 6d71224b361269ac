//! Position and P&L accounting
//!
//! Signed per-instrument positions with weighted-average cost, realized and
//! unrealized P&L, and one synthetic cash position per settlement currency.

use crate::sim::Trade;
use crate::types::{Currency, Instrument, Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Snapshot of one instrument (or cash) holding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub currency: Currency,
    /// Contract multiplier, 1.0 for cash legs
    pub multiplier: f64,
    /// Signed quantity: positive long, negative short
    pub quantity: f64,
    /// Weighted-average cost per unit; exactly 0.0 while flat
    pub avg_cost: f64,
    pub market_price: f64,
    pub market_value: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    fn flat(instrument: &Instrument, now: DateTime<Utc>) -> Self {
        Self {
            symbol: instrument.symbol.clone(),
            currency: instrument.currency.clone(),
            multiplier: instrument.multiplier,
            quantity: 0.0,
            avg_cost: 0.0,
            market_price: 0.0,
            market_value: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            updated_at: now,
        }
    }

    fn cash(currency: &Currency, now: DateTime<Utc>) -> Self {
        Self {
            symbol: currency.clone(),
            currency: currency.clone(),
            multiplier: 1.0,
            quantity: 0.0,
            avg_cost: 1.0,
            market_price: 1.0,
            market_value: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            updated_at: now,
        }
    }

    fn mark(&mut self) {
        self.market_value = self.market_price * self.quantity * self.multiplier;
        self.unrealized_pnl = self.market_value - self.avg_cost * self.quantity * self.multiplier;
    }
}

struct LedgerInner {
    instruments: HashMap<Symbol, Instrument>,
    positions: HashMap<Symbol, Position>,
    cash: HashMap<Currency, Position>,
}

/// Per-instrument position and cash ledger
///
/// All mutation is serialized through an internal mutex, so the ledger is
/// safe to drive from inside the matching engine's notification phase.
/// Reads return clones of the current records; there is no cross-read
/// point-in-time consistency guarantee.
pub struct PositionLedger {
    default_currency: Currency,
    inner: Mutex<LedgerInner>,
}

impl PositionLedger {
    pub fn new(default_currency: Currency, instruments: Vec<Instrument>) -> Self {
        let instruments = instruments
            .into_iter()
            .map(|i| (i.symbol.clone(), i))
            .collect();
        Self {
            default_currency,
            inner: Mutex::new(LedgerInner {
                instruments,
                positions: HashMap::new(),
                cash: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register instrument metadata after construction (multiplier, currency)
    pub fn register_instrument(&self, instrument: Instrument) {
        self.lock()
            .instruments
            .insert(instrument.symbol.clone(), instrument);
    }

    /// Apply a fill: split into the portion closing an opposite-signed
    /// position (realized P&L) and the portion opening/extending (average
    /// cost blend), update the currency cash leg, then mark every tracked
    /// instrument to market. Returns the updated instrument position.
    pub fn on_trade(&self, trade: &Trade) -> Position {
        let mut inner = self.lock();

        let instrument = match inner.instruments.get(&trade.symbol).cloned() {
            Some(i) => i,
            None => {
                tracing::debug!(symbol = %trade.symbol, "unregistered instrument; assuming spot");
                let spot = Instrument {
                    symbol: trade.symbol.clone(),
                    currency: self.default_currency.clone(),
                    multiplier: 1.0,
                };
                inner
                    .instruments
                    .insert(trade.symbol.clone(), spot.clone());
                spot
            }
        };

        let multiplier = instrument.multiplier;
        let currency = instrument.currency.clone();
        let position = inner
            .positions
            .entry(trade.symbol.clone())
            .or_insert_with(|| Position::flat(&instrument, trade.timestamp));

        let signed_fill = trade.side.sign() * trade.quantity;
        let held = position.quantity;

        if held != 0.0 && held.signum() != signed_fill.signum() {
            // Closing leg first: realize P&L against the held average cost
            let reduced = trade.quantity.min(held.abs());
            let realized =
                (trade.avg_price - position.avg_cost) * multiplier * reduced * held.signum();
            position.realized_pnl += realized;

            let leftover = trade.quantity - reduced;
            position.quantity = held + signed_fill;
            if position.quantity == 0.0 {
                position.avg_cost = 0.0;
            } else if leftover > 0.0 {
                // Reversal: the surviving quantity opened at this fill
                position.avg_cost = trade.avg_price;
            }
            // Pure reduction leaves avg_cost untouched
        } else {
            // Opening or extending: quantity-weighted cost blend
            let total = held.abs() + trade.quantity;
            position.avg_cost =
                (position.avg_cost * held.abs() + trade.avg_price * trade.quantity) / total;
            position.quantity = held + signed_fill;
        }
        position.market_price = trade.price;
        position.updated_at = trade.timestamp;
        let updated = position.clone();

        // Cash moves by the signed notional net of commission
        let cash_flow = -(signed_fill * multiplier * trade.price) - trade.commission;
        let cash = inner
            .cash
            .entry(currency.clone())
            .or_insert_with(|| Position::cash(&currency, trade.timestamp));
        cash.quantity += cash_flow;
        cash.updated_at = trade.timestamp;

        Self::mark_all(&mut inner);
        updated
    }

    /// Observe a price: update market price and timestamp only if the price
    /// changed, then re-mark every tracked instrument. Creates a flat
    /// position on first touch.
    pub fn on_price(&self, symbol: &Symbol, price: f64, timestamp: DateTime<Utc>) {
        let mut inner = self.lock();

        let instrument = inner.instruments.get(symbol).cloned().unwrap_or_else(|| {
            Instrument {
                symbol: symbol.clone(),
                currency: self.default_currency.clone(),
                multiplier: 1.0,
            }
        });
        let position = inner
            .positions
            .entry(symbol.clone())
            .or_insert_with(|| Position::flat(&instrument, timestamp));
        if position.market_price != price {
            position.market_price = price;
            position.updated_at = timestamp;
        }

        Self::mark_all(&mut inner);
    }

    // Multiple instruments can share one currency cash leg, so every trade or
    // price event leaves all tracked positions marked at their latest price.
    fn mark_all(inner: &mut LedgerInner) {
        for position in inner.positions.values_mut() {
            position.mark();
        }
        for cash in inner.cash.values_mut() {
            cash.market_value = cash.quantity;
        }
    }

    /// Seed or adjust a currency cash leg (e.g. an opening balance)
    pub fn deposit(&self, currency: &Currency, amount: f64) {
        let mut inner = self.lock();
        let now = Utc::now();
        let cash = inner
            .cash
            .entry(currency.clone())
            .or_insert_with(|| Position::cash(currency, now));
        cash.quantity += amount;
        cash.market_value = cash.quantity;
        cash.updated_at = now;
    }

    pub fn position(&self, symbol: &Symbol) -> Option<Position> {
        self.lock().positions.get(symbol).cloned()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.lock().positions.values().cloned().collect()
    }

    pub fn cash_position(&self, currency: &Currency) -> Option<Position> {
        self.lock().cash.get(currency).cloned()
    }

    pub fn cash_positions(&self) -> Vec<Position> {
        self.lock().cash.values().cloned().collect()
    }

    pub fn total_realized_pnl(&self) -> f64 {
        self.lock().positions.values().map(|p| p.realized_pnl).sum()
    }

    pub fn total_unrealized_pnl(&self) -> f64 {
        self.lock()
            .positions
            .values()
            .map(|p| p.unrealized_pnl)
            .sum()
    }
}
