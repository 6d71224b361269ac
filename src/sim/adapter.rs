//! Execution adapter
//!
//! Bridges an algorithm's order intents onto the matching engine and
//! annotates the algorithm's output series with order and trade markers.
//! A simulated fill can complete before the submission call returns, so
//! reconciliation runs through two small id-sets: whichever of
//! {submission return, fill notification} arrives second appends the trade
//! marker. Ids come from a process-wide counter and are never reused within
//! a run, which the sets rely on.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;

use crate::sim::matching::{EngineError, MatchingEngine, OrderStatusListener};
use crate::sim::types::{Order, OrderId, Trade};
use crate::series::{OrderedSeries, SeriesPoint};

struct Reconcile {
    /// Submitted, fill notification not yet seen
    in_process: HashSet<OrderId>,
    /// Fill notification seen before the submission call returned
    filled_unmatched: HashSet<OrderId>,
}

/// Adapter between an algorithm and the (simulated) matching engine
pub struct ExecutionAdapter {
    engine: Arc<MatchingEngine>,
    output: Arc<OrderedSeries>,
    reconcile: Mutex<Reconcile>,
}

impl ExecutionAdapter {
    /// Create the adapter and register it for the engine's order-status
    /// callbacks. The output series should be lenient; markers share an
    /// instant whenever a submission and its fill land on the same tick.
    pub fn attach(engine: Arc<MatchingEngine>, output: Arc<OrderedSeries>) -> Arc<Self> {
        let adapter = Arc::new(Self {
            engine,
            output,
            reconcile: Mutex::new(Reconcile {
                in_process: HashSet::new(),
                filled_unmatched: HashSet::new(),
            }),
        });
        let listener: Arc<dyn OrderStatusListener> = adapter.clone();
        adapter.engine.subscribe_orders(listener);
        adapter
    }

    pub fn output(&self) -> &Arc<OrderedSeries> {
        &self.output
    }

    /// Forward a single order to the engine and append its order marker
    pub fn send_order(&self, order: Order) -> Result<OrderId, EngineError> {
        let marker_price = order.reference_price();
        let symbol = order.symbol.clone();
        let id = self.engine.submit_order(order)?;
        self.annotate_order(id, marker_price.or_else(|| self.engine.last_price(&symbol)));
        Ok(id)
    }

    /// Forward a bracket (parent + OCA children) and append a marker per order
    pub fn send_bracket_orders(
        &self,
        parent: Order,
        children: Vec<Order>,
    ) -> Result<(OrderId, Vec<OrderId>), EngineError> {
        let symbol = parent.symbol.clone();
        let parent_price = parent.reference_price();
        let child_prices: Vec<Option<f64>> =
            children.iter().map(|c| c.reference_price()).collect();
        let (parent_id, child_ids) = self.engine.submit_bracket(parent, children)?;
        let last = self.engine.last_price(&symbol);
        self.annotate_order(parent_id, parent_price.or(last));
        for (id, price) in child_ids.iter().zip(child_prices) {
            self.annotate_order(*id, price.or(last));
        }
        Ok((parent_id, child_ids))
    }

    /// Submission-side half of the reconciliation: append the order marker,
    /// then the trade marker if the fill notification won the race
    fn annotate_order(&self, id: OrderId, marker_price: Option<f64>) {
        if let Some(price) = marker_price {
            self.append_marker(price);
        }
        let fill_arrived_first = {
            let mut reconcile = self
                .reconcile
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if reconcile.filled_unmatched.remove(&id) {
                true
            } else {
                reconcile.in_process.insert(id);
                false
            }
        };
        if fill_arrived_first {
            if let Some(trade) = self.engine.trade_for_order(id) {
                self.append_marker(trade.price);
            } else {
                tracing::warn!(id, "fill notification seen but no trade found");
            }
        }
    }

    // Duplicate markers (same instant, same value) are benign annotations and
    // are dropped rather than surfaced.
    fn append_marker(&self, value: f64) {
        if let Err(err) = self
            .output
            .insert_from_tail(SeriesPoint::discrete(Utc::now(), value))
        {
            tracing::warn!(%err, "output marker dropped");
        }
    }
}

impl OrderStatusListener for ExecutionAdapter {
    fn order_filled(&self, _order: &Order, trade: &Trade) {
        let submission_arrived_first = {
            let mut reconcile = self
                .reconcile
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if reconcile.in_process.remove(&trade.order_id) {
                true
            } else {
                reconcile.filled_unmatched.insert(trade.order_id);
                false
            }
        };
        if submission_arrived_first {
            self.append_marker(trade.price);
        }
    }

    fn order_cancelled(&self, order: &Order) {
        tracing::debug!(id = order.id, "order cancelled");
        self.reconcile
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_process
            .remove(&order.id);
    }
}
