//! Materialized parent lists for tiers whose game does not supply
//! `canonical_parent_positions`.
//!
//! One slot per position of the current tier and of every child tier, laid
//! out flat; an offset map gives each tier's base index. Appends during the
//! build phase take a per-slot lock; [`ReverseGraph::freeze`] strips the
//! locks so the propagation phase reads without synchronization.

use std::sync::Mutex;

use crate::containers::Int64HashMap;
use crate::error::{Error, Result};
use crate::types::{Position, PositionArray, Tier, TierPosition};

pub struct ReverseGraph {
    offset_map: Int64HashMap,
    slots: Vec<Mutex<PositionArray>>,
}

impl ReverseGraph {
    /// Lays out child tiers first, in the order given, then the current
    /// tier.
    pub fn new(
        current_tier: Tier,
        current_size: i64,
        child_tiers: &[Tier],
        child_sizes: &[i64],
    ) -> Result<Self> {
        debug_assert_eq!(child_tiers.len(), child_sizes.len());
        let mut offset_map = Int64HashMap::new();
        let mut total: i64 = 0;
        for (tier, size) in child_tiers.iter().zip(child_sizes) {
            if !offset_map.set(*tier, total) {
                return Err(Error::OutOfMemory);
            }
            total += size;
        }
        if !offset_map.set(current_tier, total) {
            return Err(Error::OutOfMemory);
        }
        total += current_size;

        let total = usize::try_from(total)
            .map_err(|_| Error::InvalidArgument("negative tier size".into()))?;
        let mut slots = Vec::new();
        slots.try_reserve_exact(total).map_err(|_| Error::OutOfMemory)?;
        slots.resize_with(total, || Mutex::new(PositionArray::new()));
        Ok(Self { offset_map, slots })
    }

    #[must_use]
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn offset_of(&self, tier: Tier) -> Option<i64> {
        self.offset_map.get(tier)
    }

    fn slot_index(&self, of: TierPosition) -> usize {
        let base = self
            .offset_map
            .get(of.tier)
            .unwrap_or_else(|| unreachable!("tier {} not in the reverse graph", of.tier));
        (base + of.position) as usize
    }

    /// Records `parent` (a position of the current tier) as a parent of
    /// `child`. Thread-safe.
    pub fn add_parent(&self, child: TierPosition, parent: Position) -> Result<()> {
        let mut slot = self.slots[self.slot_index(child)]
            .lock()
            .unwrap_or_else(|_| unreachable!("reverse graph lock poisoned"));
        if slot.len() == slot.capacity() && slot.try_reserve(1).is_err() {
            return Err(Error::OutOfMemory);
        }
        slot.push(parent);
        Ok(())
    }

    /// Ends the build phase: drops the per-slot locks.
    #[must_use]
    pub fn freeze(self) -> FrozenReverseGraph {
        FrozenReverseGraph {
            offset_map: self.offset_map,
            slots: self
                .slots
                .into_iter()
                .map(|slot| {
                    slot.into_inner()
                        .unwrap_or_else(|_| unreachable!("reverse graph lock poisoned"))
                })
                .collect(),
        }
    }
}

pub struct FrozenReverseGraph {
    offset_map: Int64HashMap,
    slots: Vec<PositionArray>,
}

impl FrozenReverseGraph {
    #[must_use]
    pub fn parents_of(&self, child: TierPosition) -> &[Position] {
        let base = self
            .offset_map
            .get(child.tier)
            .unwrap_or_else(|| unreachable!("tier {} not in the reverse graph", child.tier));
        &self.slots[(base + child.position) as usize]
    }
}
