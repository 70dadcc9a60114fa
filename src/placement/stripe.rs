//! Stripe placement
//!
//! Decides, for a batch of items placed together (the members of one erasure
//! group, or a single chunk), which backends receive a new copy. Existing
//! copies on eligible backends are kept for free; the rest come from a
//! round-robin cursor shared across calls so load spreads evenly. While an
//! item has fewer than `distinct` locations it avoids backends already used
//! by another item of the same batch, unless no such exclusive choice is
//! left.

use std::collections::BTreeSet;

use tracing::{debug, instrument};

use crate::chunk::Hash;
use crate::copier::CopierId;
use crate::error::{Error, Result};

/// Round-robin cursor over backend ids
#[derive(Debug, Default)]
pub struct RoundRobin {
    ids: Vec<CopierId>,
    pos: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append ids not yet in the rotation
    pub fn extend<'a>(&mut self, ids: impl IntoIterator<Item = &'a CopierId>) {
        for id in ids {
            if !self.ids.contains(id) {
                self.ids.push(id.clone());
            }
        }
    }

    /// Next id in the rotation
    pub fn next_id(&mut self) -> Option<CopierId> {
        if self.ids.is_empty() {
            return None;
        }
        let id = self.ids[self.pos % self.ids.len()].clone();
        self.pos = (self.pos + 1) % self.ids.len();
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// One item to place
#[derive(Debug, Clone)]
pub struct StripeItem {
    pub hash: Hash,
    /// Backends already holding the item
    pub existing: BTreeSet<CopierId>,
}

/// Placement decision for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub hash: Hash,
    /// Existing copies kept
    pub kept: Vec<CopierId>,
    /// Backends that must receive a new copy
    pub assigned: Vec<CopierId>,
}

impl Placement {
    /// Every location of the item after the writes
    pub fn locations(&self) -> impl Iterator<Item = &CopierId> {
        self.kept.iter().chain(self.assigned.iter())
    }
}

/// Place every item on `min` backends out of `eligible`.
///
/// `cursor` must contain every eligible id; unknown ids are appended.
#[instrument(skip(items, eligible, cursor), fields(items = items.len(), eligible = eligible.len()))]
pub fn place(
    items: &[StripeItem],
    eligible: &BTreeSet<CopierId>,
    cursor: &mut RoundRobin,
    min: usize,
    distinct: usize,
) -> Result<Vec<Placement>> {
    cursor.extend(eligible);

    let mut current: Vec<Vec<CopierId>> = items
        .iter()
        .map(|item| item.existing.intersection(eligible).cloned().collect())
        .collect();
    let mut placements = Vec::with_capacity(items.len());

    for (i, item) in items.iter().enumerate() {
        let mut chosen = current[i].clone();
        let kept = chosen.clone();
        let mut assigned = Vec::new();

        while chosen.len() < min {
            let remaining: Vec<&CopierId> =
                eligible.iter().filter(|id| !chosen.contains(id)).collect();
            if remaining.is_empty() {
                return Err(Error::NotEnoughTargets {
                    hash: item.hash,
                    min,
                    found: chosen.len(),
                });
            }

            let others: BTreeSet<&CopierId> = current
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .flat_map(|(_, locs)| locs.iter())
                .collect();
            let exclusive =
                chosen.len() < distinct && remaining.iter().any(|id| !others.contains(id));

            // A suitable id exists and the cursor holds every eligible id, so
            // one full rotation always finds it.
            let mut pick = None;
            for _ in 0..cursor.len() {
                let Some(id) = cursor.next_id() else { break };
                if !eligible.contains(&id) || chosen.contains(&id) {
                    continue;
                }
                if exclusive && others.contains(&id) {
                    continue;
                }
                pick = Some(id);
                break;
            }
            let Some(id) = pick else {
                return Err(Error::NotEnoughTargets {
                    hash: item.hash,
                    min,
                    found: chosen.len(),
                });
            };
            chosen.push(id.clone());
            assigned.push(id);
        }

        debug!(hash = %item.hash, kept = kept.len(), assigned = ?assigned, "placed item");
        current[i] = chosen;
        placements.push(Placement {
            hash: item.hash,
            kept,
            assigned,
        });
    }
    Ok(placements)
}
