//! Simulated order matching
//!
//! Price ticks arrive through [`OrderedSeries`] listener callbacks; pending
//! orders are re-evaluated per tick with a current/next queue split so that
//! submissions landing mid-scan never interleave with the pass in progress.
//! Fills feed the [`PositionLedger`] and are broadcast to order-status and
//! position listeners after the engine lock is released.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::commission::CommissionModel;
use crate::config::SimConfig;
use crate::sim::ledger::{Position, PositionLedger};
use crate::sim::types::{
    next_oca_group_id, next_order_id, OcaGroupId, Order, OrderId, OrderState, OrderType, Trade,
};
use crate::series::{OrderedSeries, SeriesEvent, SeriesListener};
use crate::types::{Instrument, Side, Symbol};

/// Submission and lookup failures
#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("unsupported order type {0:?}")]
    UnsupportedOrderType(OrderType),

    #[error("unknown order id {0}")]
    UnknownOrder(OrderId),

    #[error("order quantity must be positive, got {0}")]
    InvalidQuantity(f64),

    #[error("{0:?} order is missing its price")]
    MissingPrice(OrderType),
}

/// Order lifecycle callbacks; an [`crate::sim::ExecutionAdapter`] or a
/// live-broker adapter registers here without touching matching logic
pub trait OrderStatusListener: Send + Sync {
    fn order_filled(&self, order: &Order, trade: &Trade);
    fn order_cancelled(&self, order: &Order);
}

/// Position update callbacks, fired once per fill with the updated position
pub trait PositionListener: Send + Sync {
    fn position_updated(&self, position: &Position);
}

/// Engine pricing parameters
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Full bid/ask spread as an absolute price width; half is applied per side
    pub spread: f64,
    /// Assumed execution-price degradation, absolute, applied against the order
    pub slippage: f64,
    /// Venue tag stamped on every trade
    pub venue: Symbol,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            spread: 0.0,
            slippage: 0.0,
            venue: Symbol::new("SIM"),
        }
    }
}

/// A queued order plus its evaluation flags. Entries are replaced wholesale
/// when requeued; the order inside is never mutated while queued.
#[derive(Debug, Clone)]
struct OrderQueueEntry {
    order: Order,
    /// Set when the entry is picked up by a pass; compacted out at pass end
    pending_removal: bool,
    /// Cancellation is a request flag, not an interrupt
    cancel_requested: bool,
}

impl OrderQueueEntry {
    fn queued(order: Order) -> Self {
        Self {
            order,
            pending_removal: false,
            cancel_requested: false,
        }
    }
}

struct EngineState {
    /// Orders being evaluated by the pass in progress
    current: Vec<OrderQueueEntry>,
    /// Freshly submitted or requeued orders; merged into `current` only at
    /// the start of the following pass
    next: Vec<OrderQueueEntry>,
    last_prices: HashMap<Symbol, (f64, DateTime<Utc>)>,
    /// Parent ids that have not filled yet; their children stay inert
    pending_parents: HashSet<OrderId>,
    /// OCA group id -> member order ids
    oca_groups: HashMap<OcaGroupId, HashSet<OrderId>>,
    trades: Vec<Trade>,
}

/// Deferred listener work, dispatched after the engine lock is released
enum Notice {
    Filled(Order, Trade),
    Cancelled(Order),
    Position(Position),
}

/// Simulated order-matching engine
///
/// Every public entry point takes the engine mutex at the top, which makes
/// the engine safe to invoke from within a series' post-lock notification
/// phase. Its own listener callbacks likewise fire only after that mutex is
/// released.
pub struct MatchingEngine {
    config: EngineConfig,
    commission: Box<dyn CommissionModel>,
    ledger: Arc<PositionLedger>,
    instruments: HashMap<Symbol, Instrument>,
    state: Mutex<EngineState>,
    order_listeners: Mutex<Vec<Arc<dyn OrderStatusListener>>>,
    position_listeners: Mutex<Vec<Arc<dyn PositionListener>>>,
}

impl MatchingEngine {
    pub fn new(
        config: EngineConfig,
        commission: Box<dyn CommissionModel>,
        ledger: Arc<PositionLedger>,
        instruments: Vec<Instrument>,
    ) -> Self {
        Self {
            config,
            commission,
            ledger,
            instruments: instruments
                .into_iter()
                .map(|i| (i.symbol.clone(), i))
                .collect(),
            state: Mutex::new(EngineState {
                current: Vec::new(),
                next: Vec::new(),
                last_prices: HashMap::new(),
                pending_parents: HashSet::new(),
                oca_groups: HashMap::new(),
                trades: Vec::new(),
            }),
            order_listeners: Mutex::new(Vec::new()),
            position_listeners: Mutex::new(Vec::new()),
        }
    }

    /// Build engine + ledger from a [`SimConfig`]
    pub fn from_config(cfg: &SimConfig) -> Self {
        let ledger = Arc::new(PositionLedger::new(
            cfg.account.currency.clone(),
            cfg.instruments.clone(),
        ));
        if cfg.account.initial_cash != 0.0 {
            ledger.deposit(&cfg.account.currency, cfg.account.initial_cash);
        }
        Self::new(
            EngineConfig {
                spread: cfg.engine.spread,
                slippage: cfg.engine.slippage,
                venue: cfg.engine.venue.clone(),
            },
            Box::new(cfg.commission.model()),
            ledger,
            cfg.instruments.clone(),
        )
    }

    pub fn ledger(&self) -> &Arc<PositionLedger> {
        &self.ledger
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register for fill/cancel callbacks
    pub fn subscribe_orders(&self, listener: Arc<dyn OrderStatusListener>) {
        self.order_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Register for position-update callbacks
    pub fn subscribe_positions(&self, listener: Arc<dyn PositionListener>) {
        self.position_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Subscribe the engine to an instrument's price series; each appended
    /// point becomes a tick for that symbol
    pub fn attach_price_feed(
        self: &Arc<Self>,
        symbol: Symbol,
        series: &OrderedSeries,
    ) -> Arc<dyn SeriesListener> {
        let feed: Arc<dyn SeriesListener> = Arc::new(PriceFeed {
            engine: Arc::clone(self),
            symbol,
        });
        series.subscribe(feed.clone());
        feed
    }

    fn validate(order: &Order) -> Result<(), EngineError> {
        if !(order.quantity > 0.0) {
            return Err(EngineError::InvalidQuantity(order.quantity));
        }
        match order.order_type {
            OrderType::Market => Ok(()),
            OrderType::Limit => order
                .limit_price
                .map(|_| ())
                .ok_or(EngineError::MissingPrice(OrderType::Limit)),
            OrderType::Stop => order
                .stop_price
                .map(|_| ())
                .ok_or(EngineError::MissingPrice(OrderType::Stop)),
            OrderType::StopLimit => Err(EngineError::UnsupportedOrderType(OrderType::StopLimit)),
        }
    }

    /// Submit a single order. Allocates its id, evaluates it immediately
    /// against the latest known price, and queues it if unfilled. A missing
    /// price feed is not an error; the order simply stays pending.
    pub fn submit_order(&self, mut order: Order) -> Result<OrderId, EngineError> {
        Self::validate(&order)?;
        let mut notices = Vec::new();
        let id = {
            let mut state = self.lock();
            order.id = next_order_id();
            let id = order.id;
            if !self.try_immediate_fill(&mut state, &mut order, &mut notices) {
                state.next.push(OrderQueueEntry::queued(order));
            }
            id
        };
        self.dispatch(notices);
        Ok(id)
    }

    /// Submit a parent with bracket children. All children share one freshly
    /// allocated OCA group and stay inert until the parent fills.
    pub fn submit_bracket(
        &self,
        mut parent: Order,
        mut children: Vec<Order>,
    ) -> Result<(OrderId, Vec<OrderId>), EngineError> {
        Self::validate(&parent)?;
        for child in &children {
            Self::validate(child)?;
        }

        let mut notices = Vec::new();
        let ids = {
            let mut state = self.lock();
            parent.id = next_order_id();
            let parent_id = parent.id;
            let group = next_oca_group_id();

            let mut child_ids = Vec::with_capacity(children.len());
            for child in &mut children {
                child.id = next_order_id();
                child.parent_id = Some(parent_id);
                child.oca_group = Some(group);
                child_ids.push(child.id);
            }
            state
                .oca_groups
                .insert(group, child_ids.iter().copied().collect());
            state.pending_parents.insert(parent_id);

            if !self.try_immediate_fill(&mut state, &mut parent, &mut notices) {
                state.next.push(OrderQueueEntry::queued(parent));
            }
            for mut child in children {
                // An earlier sibling filling immediately dissolves the group;
                // the remaining children are cancelled, not evaluated
                if state
                    .oca_groups
                    .get(&group)
                    .map_or(true, |members| !members.contains(&child.id))
                {
                    child.state = OrderState::Cancelled;
                    notices.push(Notice::Cancelled(child));
                    continue;
                }
                // Parent may have filled above, activating the children
                if !state.pending_parents.contains(&parent_id)
                    && self.try_immediate_fill(&mut state, &mut child, &mut notices)
                {
                    continue;
                }
                state.next.push(OrderQueueEntry::queued(child));
            }
            (parent_id, child_ids)
        };
        self.dispatch(notices);
        Ok(ids)
    }

    /// Request cancellation. The order is only flagged here; physical removal
    /// and the cancellation callback happen at the end of the next pass, and
    /// an order already mid-evaluation may still fill.
    pub fn cancel_order(&self, id: OrderId) -> Result<(), EngineError> {
        let mut state = self.lock();
        let state = &mut *state;
        for entry in state.current.iter_mut().chain(state.next.iter_mut()) {
            if entry.order.id == id {
                entry.cancel_requested = true;
                return Ok(());
            }
        }
        Err(EngineError::UnknownOrder(id))
    }

    /// Look up an order in either queue
    pub fn order(&self, id: OrderId) -> Option<Order> {
        let state = self.lock();
        state
            .current
            .iter()
            .chain(state.next.iter())
            .find(|e| e.order.id == id)
            .map(|e| e.order.clone())
    }

    /// Orders awaiting evaluation (excluding cancel-flagged entries)
    pub fn open_orders(&self) -> Vec<Order> {
        let state = self.lock();
        state
            .current
            .iter()
            .chain(state.next.iter())
            .filter(|e| !e.cancel_requested)
            .map(|e| e.order.clone())
            .collect()
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.lock().trades.clone()
    }

    pub fn trade_for_order(&self, id: OrderId) -> Option<Trade> {
        self.lock()
            .trades
            .iter()
            .find(|t| t.order_id == id)
            .cloned()
    }

    pub fn last_price(&self, symbol: &Symbol) -> Option<f64> {
        self.lock().last_prices.get(symbol).map(|&(p, _)| p)
    }

    /// Price tick entry point: record the price, mark the ledger, then run a
    /// full evaluation pass
    pub fn on_price_tick(&self, symbol: &Symbol, price: f64, timestamp: DateTime<Utc>) {
        let mut notices = Vec::new();
        {
            let mut state = self.lock();
            state
                .last_prices
                .insert(symbol.clone(), (price, timestamp));
            self.ledger.on_price(symbol, price, timestamp);
            self.run_pass(&mut state, &mut notices);
        }
        self.dispatch(notices);
    }

    /// Execution-price model: last observed price worsened by half the spread
    /// plus slippage, against the order's side
    fn computed_price(&self, side: Side, last: f64) -> f64 {
        last + side.sign() * (self.config.spread / 2.0 + self.config.slippage)
    }

    /// Whether the order fills at its instrument's last known price, and at
    /// what execution price
    fn evaluate(&self, order: &Order, last: f64) -> Option<f64> {
        let price = self.computed_price(order.side, last);
        match order.order_type {
            OrderType::Market => Some(price),
            OrderType::Limit => {
                let limit = order.limit_price?;
                let at_or_better = match order.side {
                    Side::Buy => price <= limit,
                    Side::Sell => price >= limit,
                };
                at_or_better.then_some(price)
            }
            OrderType::Stop => {
                let stop = order.stop_price?;
                let triggered = match order.side {
                    Side::Buy => price >= stop,
                    Side::Sell => price <= stop,
                };
                triggered.then_some(price)
            }
            // Rejected at submission; unreachable for queued orders
            OrderType::StopLimit => None,
        }
    }

    /// Evaluate a just-submitted order against the latest known price,
    /// processing the fill if it executes
    fn try_immediate_fill(
        &self,
        state: &mut EngineState,
        order: &mut Order,
        notices: &mut Vec<Notice>,
    ) -> bool {
        let (last, ts) = match state.last_prices.get(&order.symbol) {
            Some(&found) => found,
            None => {
                tracing::debug!(symbol = %order.symbol, id = order.id,
                    "no price feed for instrument; order stays pending");
                return false;
            }
        };
        match self.evaluate(order, last) {
            Some(exec_price) => {
                self.process_fill(state, order, exec_price, ts, notices);
                true
            }
            None => false,
        }
    }

    /// One evaluation pass: merge `next` into `current`, evaluate every
    /// unflagged order whose parent is not pending, then compact — filled
    /// entries drop, cancel-flagged entries drop with a cancellation notice,
    /// unfilled survivors requeue into `next` as fresh entries.
    fn run_pass(&self, state: &mut EngineState, notices: &mut Vec<Notice>) {
        let merged = std::mem::take(&mut state.next);
        state.current.extend(merged);

        for i in 0..state.current.len() {
            if state.current[i].pending_removal || state.current[i].cancel_requested {
                continue;
            }
            if let Some(parent) = state.current[i].order.parent_id {
                if state.pending_parents.contains(&parent) {
                    continue;
                }
            }
            let last = match state.last_prices.get(&state.current[i].order.symbol) {
                Some(&(p, ts)) => (p, ts),
                None => continue,
            };
            state.current[i].pending_removal = true;
            let mut order = state.current[i].order.clone();
            if let Some(exec_price) = self.evaluate(&order, last.0) {
                self.process_fill(state, &mut order, exec_price, last.1, notices);
                state.current[i].order = order;
            }
        }

        // Compact both buffers
        let survivors = std::mem::take(&mut state.current);
        let mut requeued = Vec::new();
        for mut entry in survivors {
            if entry.cancel_requested && entry.order.state == OrderState::New {
                entry.order.state = OrderState::Cancelled;
                notices.push(Notice::Cancelled(entry.order));
            } else if entry.order.state == OrderState::New {
                requeued.push(OrderQueueEntry::queued(entry.order));
            }
            // Filled entries drop; the fill notice was queued at fill time
        }
        let queued_later = std::mem::take(&mut state.next);
        for mut entry in queued_later {
            if entry.cancel_requested {
                entry.order.state = OrderState::Cancelled;
                notices.push(Notice::Cancelled(entry.order));
            } else {
                requeued.push(entry);
            }
        }
        state.next = requeued;
    }

    /// Record the trade, update the ledger, activate bracket children, and
    /// flag every remaining OCA sibling in both buffers
    fn process_fill(
        &self,
        state: &mut EngineState,
        order: &mut Order,
        exec_price: f64,
        timestamp: DateTime<Utc>,
        notices: &mut Vec<Notice>,
    ) {
        let multiplier = self
            .instruments
            .get(&order.symbol)
            .map(|i| i.multiplier)
            .unwrap_or(1.0);
        let commission = self
            .commission
            .commission(order, order.quantity, exec_price);

        // Commission folds into the cash flow before deriving the effective
        // average price
        let signed_qty = order.side.sign() * order.quantity;
        let cash_flow = -(signed_qty * multiplier * exec_price) - commission;
        let avg_price = (cash_flow / multiplier / order.quantity).abs();

        order.state = OrderState::Filled;
        let trade = Trade {
            order_id: order.id,
            symbol: order.symbol.clone(),
            side: order.side,
            venue: self.config.venue.clone(),
            timestamp,
            quantity: order.quantity,
            price: exec_price,
            avg_price,
            commission,
        };
        tracing::info!(id = order.id, symbol = %order.symbol, side = ?order.side,
            qty = order.quantity, price = exec_price, "order filled");

        state.trades.push(trade.clone());
        let position = self.ledger.on_trade(&trade);
        notices.push(Notice::Filled(order.clone(), trade));
        notices.push(Notice::Position(position));

        // A filled parent releases its bracket children
        state.pending_parents.remove(&order.id);

        // One sibling filling cancels the rest of its OCA group, wherever
        // they are queued
        if let Some(group) = order.oca_group {
            if let Some(members) = state.oca_groups.remove(&group) {
                let filled_id = order.id;
                for entry in state.current.iter_mut().chain(state.next.iter_mut()) {
                    if entry.order.id != filled_id && members.contains(&entry.order.id) {
                        entry.cancel_requested = true;
                    }
                }
            }
        }
    }

    /// Fire deferred notices outside the engine lock, shielding the loop from
    /// panicking listeners
    fn dispatch(&self, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }
        let order_listeners: Vec<Arc<dyn OrderStatusListener>> = self
            .order_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let position_listeners: Vec<Arc<dyn PositionListener>> = self
            .position_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for notice in &notices {
            match notice {
                Notice::Filled(order, trade) => {
                    for l in &order_listeners {
                        if catch_unwind(AssertUnwindSafe(|| l.order_filled(order, trade))).is_err()
                        {
                            tracing::error!(id = order.id, "order listener panicked on fill");
                        }
                    }
                }
                Notice::Cancelled(order) => {
                    for l in &order_listeners {
                        if catch_unwind(AssertUnwindSafe(|| l.order_cancelled(order))).is_err() {
                            tracing::error!(id = order.id, "order listener panicked on cancel");
                        }
                    }
                }
                Notice::Position(position) => {
                    for l in &position_listeners {
                        if catch_unwind(AssertUnwindSafe(|| l.position_updated(position))).is_err()
                        {
                            tracing::error!(symbol = %position.symbol,
                                "position listener panicked");
                        }
                    }
                }
            }
        }
    }
}

/// Bridges one instrument's price series onto the engine's tick entry point
struct PriceFeed {
    engine: Arc<MatchingEngine>,
    symbol: Symbol,
}

impl SeriesListener for PriceFeed {
    fn series_changed(&self, event: &SeriesEvent) {
        self.engine
            .on_price_tick(&self.symbol, event.point.value(), event.point.index());
    }
}
