//! Concurrency primitives shared by every pipeline component
//!
//! - [`SlotPool`]: bounded, reusable slots (backpressure)
//! - [`FirstErr`]: reduce many outcomes to the first error
//! - [`FinishOnce`]: memoize a `finish` outcome so repeated calls agree

pub mod slots;

use std::future::Future;

use tokio::sync::OnceCell;

use crate::error::{Error, Result};

pub use slots::{Slot, SlotPool};

/// Collects outcomes and keeps only the first error
#[derive(Debug, Default)]
pub struct FirstErr {
    first: Option<Error>,
}

impl FirstErr {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome
    pub fn record(&mut self, outcome: Result<()>) {
        if let Err(e) = outcome {
            self.record_err(e);
        }
    }

    /// Record an error
    pub fn record_err(&mut self, error: Error) {
        if self.first.is_none() {
            self.first = Some(error);
        }
    }

    /// True if an error was recorded
    pub fn is_err(&self) -> bool {
        self.first.is_some()
    }

    /// The first recorded error, if any
    pub fn into_result(self) -> Result<()> {
        match self.first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Await every future concurrently and return the first error.
///
/// All futures run to completion even when an earlier one fails.
pub async fn join_first_err<I, F>(futures: I) -> Result<()>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<()>>,
{
    let mut first = FirstErr::new();
    for outcome in futures::future::join_all(futures).await {
        first.record(outcome);
    }
    first.into_result()
}

/// Memoized `finish` outcome
#[derive(Debug, Default)]
pub struct FinishOnce {
    outcome: OnceCell<Result<()>>,
}

impl FinishOnce {
    /// Create an unfinished memo
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on the first call; later calls return the same outcome
    pub async fn run<F, Fut>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.outcome.get_or_init(f).await.clone()
    }

    /// True once `run` has completed
    pub fn is_finished(&self) -> bool {
        self.outcome.initialized()
    }
}
