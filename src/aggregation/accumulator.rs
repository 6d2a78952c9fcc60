//! Shared state of every function requested for one series
//!
//! One scan pass feeds all slots at once. The accumulator keeps the number
//! of slots that still need input; the scan stops when it reaches zero.
//! A saturated slot is never written again.

use crate::aggregation::function::AggregateFunction;
use crate::aggregation::slot::AggregateSlot;
use crate::query::error::QueryError;
use crate::statistics::Statistics;
use crate::storage::tsfile::PageData;
use crate::types::{DataType, Timestamp, Value};
use serde::{Deserialize, Serialize};

/// Result of one function over one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Function that produced the value
    pub function: AggregateFunction,
    /// Type of `value`
    pub data_type: DataType,
    /// Aggregated value, `None` when there was no input
    pub value: Option<Value>,
}

/// N slots sharing one scan
#[derive(Debug, Clone)]
pub struct AggregateAccumulator {
    slots: Vec<AggregateSlot>,
    saturated: Vec<bool>,
    remaining: usize,
}

impl AggregateAccumulator {
    /// Create one slot per function
    pub fn new(functions: &[AggregateFunction], data_type: DataType) -> Result<Self, QueryError> {
        let slots = functions
            .iter()
            .map(|f| AggregateSlot::new(*f, data_type))
            .collect::<Result<Vec<_>, _>>()?;
        let remaining = slots.len();
        Ok(Self {
            saturated: vec![false; remaining],
            slots,
            remaining,
        })
    }

    /// Number of slots still accepting input
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Whether every slot is final
    pub fn is_saturated(&self) -> bool {
        self.remaining == 0
    }

    /// Per-slot saturation flags
    pub fn saturated(&self) -> &[bool] {
        &self.saturated
    }

    /// Slots in request order
    pub fn slots(&self) -> &[AggregateSlot] {
        &self.slots
    }

    /// Apply statistics to every unsaturated slot, returning the remaining count
    pub fn update_from_statistics(&mut self, stats: &Statistics) -> usize {
        self.apply(|slot| slot.update_from_statistics(stats))
    }

    /// Apply a decoded page to every unsaturated slot, returning the remaining count
    pub fn update_from_page(&mut self, page: &PageData) -> usize {
        self.apply(|slot| slot.update_from_page(page))
    }

    /// Apply one point to every unsaturated slot, returning the remaining count
    pub fn update_from_point(&mut self, timestamp: Timestamp, value: &Value) -> usize {
        self.apply(|slot| slot.update_from_point(timestamp, value))
    }

    fn apply(&mut self, mut update: impl FnMut(&mut AggregateSlot)) -> usize {
        for (slot, saturated) in self.slots.iter_mut().zip(self.saturated.iter_mut()) {
            if *saturated {
                continue;
            }
            update(slot);
            if slot.is_saturated() {
                *saturated = true;
                self.remaining -= 1;
            }
        }
        self.remaining
    }

    /// Final results in request order
    pub fn into_results(self) -> Vec<AggregateResult> {
        self.slots
            .into_iter()
            .map(|slot| AggregateResult {
                function: slot.function(),
                data_type: slot.function().result_type(slot.data_type()),
                value: slot.result(),
            })
            .collect()
    }
}
