//! Aggregate functions and their running state
//!
//! - [`AggregateFunction`]: the function catalogue, name parsing and type rules
//! - [`AggregateSlot`]: one function's state, fed statistics or raw points
//! - [`AggregateAccumulator`]: every slot of one series, sharing a single scan
//!
//! # Example
//!
//! ```rust
//! use tsagg::aggregation::{AggregateAccumulator, AggregateFunction};
//! use tsagg::types::{DataType, TimeValuePair, Value};
//! use tsagg::storage::PageData;
//!
//! let mut acc = AggregateAccumulator::new(
//!     &[AggregateFunction::Count, AggregateFunction::MaxValue],
//!     DataType::Int64,
//! ).unwrap();
//! let page: PageData = (0..4).map(|i| TimeValuePair::new(i, Value::Int64(i))).collect();
//! acc.update_from_page(&page);
//!
//! let results = acc.into_results();
//! assert_eq!(results[0].value, Some(Value::Int64(4)));
//! assert_eq!(results[1].value, Some(Value::Int64(3)));
//! ```

/// Shared state of every function requested for one series
pub mod accumulator;
/// Aggregate function catalogue
pub mod function;
/// State of one aggregate function
pub mod slot;

pub use accumulator::{AggregateAccumulator, AggregateResult};
pub use function::AggregateFunction;
pub use slot::AggregateSlot;
