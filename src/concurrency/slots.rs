//! Slot Pool
//!
//! A fixed number of reusable slots backed by a Tokio semaphore. Holding a
//! [`Slot`] grants permission to keep one unit of work in flight; dropping it
//! returns the slot to the pool.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Bounded pool of reusable slots
#[derive(Debug, Clone)]
pub struct SlotPool {
    semaphore: Arc<Semaphore>,
    total: usize,
}

/// One acquired slot; released on drop
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

impl SlotPool {
    /// Create a pool with `total` slots (at least one)
    pub fn new(total: usize) -> Self {
        let total = total.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(total)),
            total,
        }
    }

    /// Total number of slots
    pub fn total(&self) -> usize {
        self.total
    }

    /// Slots currently handed out
    pub fn outstanding(&self) -> usize {
        self.total - self.semaphore.available_permits()
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<Slot> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::PipelineClosed)?;
        Ok(Slot { _permit: permit })
    }

    /// Fail if any slot has not been returned
    pub fn check_returned(&self) -> Result<()> {
        match self.outstanding() {
            0 => Ok(()),
            outstanding => Err(Error::SlotsNotReturned {
                outstanding,
                total: self.total,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_and_return() {
        let pool = SlotPool::new(2);
        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.outstanding(), 2);
        assert!(pool.check_returned().is_err());
        drop(a);
        assert_eq!(pool.outstanding(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_pool_blocks() {
        let pool = SlotPool::new(1);
        let held = pool.acquire().await.unwrap();
        let waiting = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
        assert!(waiting.is_err());
        drop(held);
        assert!(pool.acquire().await.is_ok());
        assert!(pool.check_returned().is_ok());
    }

    #[test]
    fn test_zero_rounds_up() {
        assert_eq!(SlotPool::new(0).total(), 1);
    }
}
