//! Per-backend capacity accounting
//!
//! Usage only grows. A backend whose usage reaches its maximum is evicted
//! and no longer offered for placement; re-adding it installs a fresh quota.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::copier::CopierId;

/// Capacity ceiling of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quota {
    /// At most this many bytes
    Limited(u64),
    /// Never excluded
    Unlimited,
}

impl Quota {
    /// Whether `pending` more bytes fit on top of `used`
    pub fn fits(&self, used: u64, pending: u64) -> bool {
        match self {
            Quota::Limited(max) => used.saturating_add(pending) < *max,
            Quota::Unlimited => true,
        }
    }

    /// Whether `used` has reached the ceiling
    pub fn exhausted(&self, used: u64) -> bool {
        match self {
            Quota::Limited(max) => used >= *max,
            Quota::Unlimited => false,
        }
    }
}

impl From<Option<u64>> for Quota {
    fn from(max: Option<u64>) -> Self {
        max.map_or(Quota::Unlimited, Quota::Limited)
    }
}

/// Usage record of one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub used: u64,
    pub max: Quota,
}

type Observer = Arc<dyn Fn(&CopierId, &Usage) + Send + Sync>;

/// Tracks usage against quotas for every backend
#[derive(Default)]
pub struct QuotaManager {
    usage: DashMap<CopierId, Usage>,
    observer: Option<Observer>,
}

impl QuotaManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `observer` on every accepted usage update
    pub fn with_observer<F>(observer: F) -> Self
    where
        F: Fn(&CopierId, &Usage) + Send + Sync + 'static,
    {
        Self {
            usage: DashMap::new(),
            observer: Some(Arc::new(observer)),
        }
    }

    /// Install a fresh quota for `id`
    pub fn add(&self, id: CopierId, max: Quota) {
        self.usage.insert(id, Usage { used: 0, max });
    }

    /// Charge `bytes` to `id`; returns false if the backend is not tracked.
    ///
    /// Evicts the backend once its usage reaches the maximum.
    pub fn add_use(&self, id: &CopierId, bytes: u64) -> bool {
        let usage = {
            let Some(mut entry) = self.usage.get_mut(id) else {
                return false;
            };
            entry.used = entry.used.saturating_add(bytes);
            *entry
        };
        if usage.max.exhausted(usage.used) {
            info!(copier = %id, used = usage.used, "quota exhausted, evicting backend");
            self.usage.remove(id);
        }
        if let Some(observer) = &self.observer {
            observer(id, &usage);
        }
        true
    }

    /// Current usage of a tracked backend
    pub fn usage(&self, id: &CopierId) -> Option<Usage> {
        self.usage.get(id).map(|u| *u)
    }

    /// Backends able to take `pending` more bytes, sorted by id
    pub fn resources(&self, pending: u64) -> Vec<CopierId> {
        let mut ids: Vec<CopierId> = self
            .usage
            .iter()
            .filter(|e| e.max.fits(e.used, pending))
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }
}
