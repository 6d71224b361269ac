//! Ordered time series
//!
//! Thread-safe, listener-driven ordered container of time-indexed points.
//! This is the data spine of the simulation core: price feeds write into it,
//! the matching engine listens to it, and the execution adapter annotates its
//! own output series through the same contract.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for series mutations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeriesError {
    #[error("index {index} violates monotonic order against boundary {boundary}")]
    OutOfOrder {
        index: DateTime<Utc>,
        boundary: DateTime<Utc>,
    },

    #[error("strict series already contains a point at {0}")]
    DuplicateIndex(DateTime<Utc>),

    #[error("series already contains an equal point at {0}")]
    DuplicatePoint(DateTime<Utc>),

    #[error("tail index mismatch: expected {expected}, found {actual}")]
    TailMismatch {
        expected: DateTime<Utc>,
        actual: DateTime<Utc>,
    },

    #[error("series is empty")]
    Empty,

    #[error("point bounds must satisfy start <= index <= end and bottom <= value <= top")]
    MalformedPoint,
}

/// A single point on a series
///
/// A discrete point collapses `start_index == index == end_index` and
/// `bottom_value == value == top_value`. A banded point spans an interval with
/// a value range (e.g. a price bar). Either way `value()` is the numeric
/// capability every consumer reads, independent of the point's shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    start_index: DateTime<Utc>,
    index: DateTime<Utc>,
    end_index: DateTime<Utc>,
    bottom_value: f64,
    top_value: f64,
    value: f64,
}

impl SeriesPoint {
    /// Discrete point at a single instant
    pub fn discrete(index: DateTime<Utc>, value: f64) -> Self {
        Self {
            start_index: index,
            index,
            end_index: index,
            bottom_value: value,
            top_value: value,
            value,
        }
    }

    /// Banded point covering an interval and a value range, with validation
    pub fn banded(
        start_index: DateTime<Utc>,
        index: DateTime<Utc>,
        end_index: DateTime<Utc>,
        bottom_value: f64,
        top_value: f64,
        value: f64,
    ) -> Result<Self, SeriesError> {
        if start_index > index || index > end_index {
            return Err(SeriesError::MalformedPoint);
        }
        if bottom_value > value || value > top_value {
            return Err(SeriesError::MalformedPoint);
        }
        Ok(Self {
            start_index,
            index,
            end_index,
            bottom_value,
            top_value,
            value,
        })
    }

    pub fn start_index(&self) -> DateTime<Utc> {
        self.start_index
    }

    pub fn index(&self) -> DateTime<Utc> {
        self.index
    }

    pub fn end_index(&self) -> DateTime<Utc> {
        self.end_index
    }

    pub fn bottom_value(&self) -> f64 {
        self.bottom_value
    }

    pub fn top_value(&self) -> f64 {
        self.top_value
    }

    /// The representative numeric value of the point
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Ordering discipline for a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceMode {
    /// No two points may share an index
    Strict,
    /// Equal indexes allowed; insertion must still preserve monotonic order
    Lenient,
}

/// Kind of structural mutation carried by a [`SeriesEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesChange {
    Appended,
    Prepended,
    Inserted,
    TailReplaced,
}

/// Notification payload delivered to series listeners
#[derive(Debug, Clone)]
pub struct SeriesEvent {
    pub change: SeriesChange,
    pub point: SeriesPoint,
}

/// Callback contract for series observers
///
/// Listeners fire synchronously after the triggering mutation, outside the
/// series lock, in registration order. The series never owns listener
/// lifetime; drop your `Arc` (after `unsubscribe`) and the listener is gone.
pub trait SeriesListener: Send + Sync {
    fn series_changed(&self, event: &SeriesEvent);
}

struct Inner {
    points: Vec<SeriesPoint>,
    last_modified: DateTime<Utc>,
}

/// Thread-safe ordered mutable container of time-indexed points
///
/// Invariant: non-decreasing by index. All structural mutations are
/// all-or-nothing; validation failures leave no partial state observable.
pub struct OrderedSeries {
    mode: SequenceMode,
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<Arc<dyn SeriesListener>>>,
}

impl OrderedSeries {
    pub fn new(mode: SequenceMode) -> Self {
        Self {
            mode,
            inner: Mutex::new(Inner {
                points: Vec::new(),
                last_modified: Utc::now(),
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn strict() -> Self {
        Self::new(SequenceMode::Strict)
    }

    pub fn lenient() -> Self {
        Self::new(SequenceMode::Lenient)
    }

    pub fn mode(&self) -> SequenceMode {
        self.mode
    }

    // The lock is held only around plain data edits; a poisoned lock cannot
    // leave the point vector torn, so recover instead of propagating.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().points.is_empty()
    }

    pub fn first(&self) -> Option<SeriesPoint> {
        self.lock().points.first().cloned()
    }

    pub fn last(&self) -> Option<SeriesPoint> {
        self.lock().points.last().cloned()
    }

    /// Point with the smallest value; O(n) scan under the lock
    pub fn minimum(&self) -> Option<SeriesPoint> {
        let inner = self.lock();
        inner
            .points
            .iter()
            .min_by(|a, b| a.value.total_cmp(&b.value))
            .cloned()
    }

    /// Point with the largest value; O(n) scan under the lock
    pub fn maximum(&self) -> Option<SeriesPoint> {
        let inner = self.lock();
        inner
            .points
            .iter()
            .max_by(|a, b| a.value.total_cmp(&b.value))
            .cloned()
    }

    /// Timestamp of the last structural mutation
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.lock().last_modified
    }

    /// Point-in-time ascending snapshot, unaffected by later mutation
    pub fn iter(&self) -> std::vec::IntoIter<SeriesPoint> {
        self.lock().points.clone().into_iter()
    }

    /// Point-in-time descending snapshot
    pub fn iter_descending(&self) -> std::iter::Rev<std::vec::IntoIter<SeriesPoint>> {
        self.lock().points.clone().into_iter().rev()
    }

    /// Prepend a point; the new index must precede the current head
    pub fn add_first(&self, point: SeriesPoint) -> Result<(), SeriesError> {
        let event = {
            let mut inner = self.lock();
            if let Some(front) = inner.points.first() {
                if point.index > front.index {
                    return Err(SeriesError::OutOfOrder {
                        index: point.index,
                        boundary: front.index,
                    });
                }
                if self.mode == SequenceMode::Strict && point.index == front.index {
                    return Err(SeriesError::DuplicateIndex(point.index));
                }
            }
            inner.points.insert(0, point.clone());
            inner.last_modified = Utc::now();
            SeriesEvent {
                change: SeriesChange::Prepended,
                point,
            }
        };
        self.notify(event);
        Ok(())
    }

    /// Append a point; the new index must follow the current tail
    pub fn add_last(&self, point: SeriesPoint) -> Result<(), SeriesError> {
        let event = {
            let mut inner = self.lock();
            if let Some(back) = inner.points.last() {
                if point.index < back.index {
                    return Err(SeriesError::OutOfOrder {
                        index: point.index,
                        boundary: back.index,
                    });
                }
                if self.mode == SequenceMode::Strict && point.index == back.index {
                    return Err(SeriesError::DuplicateIndex(point.index));
                }
            }
            inner.points.push(point.clone());
            inner.last_modified = Utc::now();
            SeriesEvent {
                change: SeriesChange::Appended,
                point,
            }
        };
        self.notify(event);
        Ok(())
    }

    /// Prepend unless the head already holds an equal-or-earlier index.
    /// Returns whether the point was inserted.
    pub fn add_first_if_absent(&self, point: SeriesPoint) -> bool {
        let event = {
            let mut inner = self.lock();
            if let Some(front) = inner.points.first() {
                if front.index <= point.index {
                    return false;
                }
            }
            inner.points.insert(0, point.clone());
            inner.last_modified = Utc::now();
            SeriesEvent {
                change: SeriesChange::Prepended,
                point,
            }
        };
        self.notify(event);
        true
    }

    /// Append unless the tail already holds an equal-or-later index.
    /// Returns whether the point was inserted.
    pub fn add_last_if_absent(&self, point: SeriesPoint) -> bool {
        let event = {
            let mut inner = self.lock();
            if let Some(back) = inner.points.last() {
                if back.index >= point.index {
                    return false;
                }
            }
            inner.points.push(point.clone());
            inner.last_modified = Utc::now();
            SeriesEvent {
                change: SeriesChange::Appended,
                point,
            }
        };
        self.notify(event);
        true
    }

    /// Insert at the sorted position found by scanning backward from the tail.
    ///
    /// Cost is proportional to distance from the tail, which is fine for the
    /// dominant workload: live order/trade/position markers landing at or
    /// near the tail. Strict mode rejects an exact index collision; lenient
    /// mode rejects only an equal-point collision.
    pub fn insert_from_tail(&self, point: SeriesPoint) -> Result<(), SeriesError> {
        let event = {
            let mut inner = self.lock();
            let mut slot = inner.points.len();
            while slot > 0 && inner.points[slot - 1].index > point.index {
                slot -= 1;
            }
            // Everything in front of `slot` with the same index is a collision
            // candidate; walk them without disturbing order.
            let mut probe = slot;
            while probe > 0 && inner.points[probe - 1].index == point.index {
                match self.mode {
                    SequenceMode::Strict => {
                        return Err(SeriesError::DuplicateIndex(point.index));
                    }
                    SequenceMode::Lenient => {
                        if inner.points[probe - 1] == point {
                            return Err(SeriesError::DuplicatePoint(point.index));
                        }
                    }
                }
                probe -= 1;
            }
            inner.points.insert(slot, point.clone());
            inner.last_modified = Utc::now();
            SeriesEvent {
                change: SeriesChange::Inserted,
                point,
            }
        };
        self.notify(event);
        Ok(())
    }

    /// Replace the current last point; the replacement must carry the same index
    pub fn update_tail(&self, point: SeriesPoint) -> Result<(), SeriesError> {
        let event = {
            let mut inner = self.lock();
            let back = inner.points.last().ok_or(SeriesError::Empty)?;
            if back.index != point.index {
                return Err(SeriesError::TailMismatch {
                    expected: back.index,
                    actual: point.index,
                });
            }
            let last_slot = inner.points.len() - 1;
            inner.points[last_slot] = point.clone();
            inner.last_modified = Utc::now();
            SeriesEvent {
                change: SeriesChange::TailReplaced,
                point,
            }
        };
        self.notify(event);
        Ok(())
    }

    /// Register a listener; fires after every structural mutation, in
    /// registration order
    pub fn subscribe(&self, listener: Arc<dyn SeriesListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Remove a previously registered listener (matched by identity)
    pub fn unsubscribe(&self, listener: &Arc<dyn SeriesListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Dispatch outside the data lock so listener re-entrancy (e.g. the
    /// matching engine appending markers from inside a callback) cannot
    /// deadlock. A panicking listener is logged and skipped.
    fn notify(&self, event: SeriesEvent) {
        let snapshot: Vec<Arc<dyn SeriesListener>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener.series_changed(&event))).is_err() {
                tracing::error!(change = ?event.change, "series listener panicked; continuing");
            }
        }
    }
}
