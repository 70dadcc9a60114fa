//! Sparse ordered series
//!
//! Accumulates values keyed by position until a contiguous prefix can be
//! released. The low-water mark only moves forward: a released position can
//! never be filled again.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Sparse, growable sequence indexed by position
#[derive(Debug)]
pub struct Series<T> {
    /// First position not yet released
    base: u64,
    /// Set once position `u64::MAX` has been released
    exhausted: bool,
    /// Values at or above `base`, keyed by position
    pending: BTreeMap<u64, T>,
}

impl<T> Default for Series<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Series<T> {
    /// Create an empty series starting at position 0
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create an empty series whose first expected position is `base`
    pub fn starting_at(base: u64) -> Self {
        Self {
            base,
            exhausted: false,
            pending: BTreeMap::new(),
        }
    }

    /// Insert a value at `num`
    pub fn insert(&mut self, num: u64, value: T) -> Result<()> {
        if self.exhausted || num < self.base || self.pending.contains_key(&num) {
            return Err(Error::SeriesPositionUsed {
                num,
                low_water: self.base,
            });
        }
        self.pending.insert(num, value);
        Ok(())
    }

    /// Release the value at the low-water mark, if present
    pub fn pop_ready(&mut self) -> Option<T> {
        if self.exhausted {
            return None;
        }
        let value = self.pending.remove(&self.base)?;
        match self.base.checked_add(1) {
            Some(next) => self.base = next,
            None => self.exhausted = true,
        }
        Some(value)
    }

    /// Release the longest contiguous prefix
    pub fn drain_ready(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(value) = self.pop_ready() {
            out.push(value);
        }
        out
    }

    /// Next position the series is waiting for
    pub fn next(&self) -> u64 {
        self.base
    }

    /// Number of values buffered behind a gap
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Fail if anything is still buffered
    pub fn check_complete(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::IncompleteSeries {
                buffered: self.pending.len(),
                next: self.base,
            })
        }
    }
}
