//! Numeric helpers shared by statistics and aggregate slots
//!
//! [`ExactSum`] keeps a running sum as a list of non-overlapping partials
//! (Shewchuk's algorithm), so the rounded result is the correctly rounded
//! exact sum of every input. It does not depend on how the input was split
//! into pages, chunks or files, or on whether those units were summed
//! separately and merged afterwards.

use serde::{Deserialize, Serialize};

/// Exact running sum of `f64` values
///
/// Non-finite inputs are accumulated apart from the partials: any infinity
/// makes the result that infinity, opposite infinities or a NaN make it NaN.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExactSum {
    partials: Vec<f64>,
    special: f64,
}

impl ExactSum {
    /// Create a zero sum
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value to the sum
    pub fn add(&mut self, value: f64) {
        if !value.is_finite() {
            self.special += value;
            return;
        }
        let mut x = value;
        let mut kept = 0;
        for j in 0..self.partials.len() {
            let mut y = self.partials[j];
            if x.abs() < y.abs() {
                std::mem::swap(&mut x, &mut y);
            }
            let hi = x + y;
            if !hi.is_finite() {
                // Finite inputs overflowed f64
                self.special += hi;
                self.partials.clear();
                return;
            }
            let lo = y - (hi - x);
            if lo != 0.0 {
                self.partials[kept] = lo;
                kept += 1;
            }
            x = hi;
        }
        self.partials.truncate(kept);
        self.partials.push(x);
    }

    /// Merge another sum into this one without losing precision
    pub fn merge(&mut self, other: &ExactSum) {
        for &partial in &other.partials {
            self.add(partial);
        }
        self.special += other.special;
    }

    /// Correctly rounded value of the sum
    pub fn value(&self) -> f64 {
        if !self.special.is_finite() {
            return self.special;
        }
        let Some((&last, rest)) = self.partials.split_last() else {
            return 0.0;
        };
        let mut hi = last;
        let mut lo = 0.0;
        let mut n = rest.len();
        while n > 0 {
            let x = hi;
            n -= 1;
            let y = rest[n];
            hi = x + y;
            lo = y - (hi - x);
            if lo != 0.0 {
                break;
            }
        }
        // Round half-even across the remaining partials
        if n > 0 && ((lo < 0.0 && rest[n - 1] < 0.0) || (lo > 0.0 && rest[n - 1] > 0.0)) {
            let y = lo * 2.0;
            let x = hi + y;
            if y == x - hi {
                hi = x;
            }
        }
        hi
    }
}

impl PartialEq for ExactSum {
    fn eq(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}
