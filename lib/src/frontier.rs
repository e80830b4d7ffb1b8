//! Per-remoteness buckets of solved positions awaiting propagation to
//! their parents.
//!
//! Positions are grouped first by remoteness, then by the child tier they
//! were loaded from ("the current tier" counting as one more group at the
//! end). Dividers record how many positions each group contributed; after
//! [`Frontier::accumulate_dividers`] they hold exclusive prefix sums, so a
//! group occupies the contiguous range `[dividers[r][j], dividers[r][j+1])`
//! of bucket `r`.

use crossbeam_utils::CachePadded;

use crate::record::{Remoteness, REMOTENESS_MAX};
use crate::types::{Position, PositionArray};

/// One frontier instance per worker, padded to a cache line so neighboring
/// workers' appends do not share one.
pub type PaddedFrontier = CachePadded<Frontier>;

#[derive(Debug, Clone)]
pub struct Frontier {
    buckets: Vec<PositionArray>,
    dividers: Vec<Vec<i64>>,
    num_groups: usize,
    accumulated: bool,
}

impl Frontier {
    /// `num_child_tiers + 1` groups per remoteness level; the last group is
    /// "from the current tier".
    #[must_use]
    pub fn new(num_child_tiers: usize) -> Self {
        let levels = usize::from(REMOTENESS_MAX) + 1;
        Self {
            buckets: vec![PositionArray::new(); levels],
            dividers: vec![vec![0; num_child_tiers + 1]; levels],
            num_groups: num_child_tiers + 1,
            accumulated: false,
        }
    }

    #[must_use]
    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    /// Appends `position` to the bucket for `remoteness`, crediting
    /// `group`. Returns false only on allocation failure.
    #[must_use]
    pub fn add(&mut self, position: Position, remoteness: Remoteness, group: usize) -> bool {
        debug_assert!(!self.accumulated);
        debug_assert!(group < self.num_groups);
        let bucket = &mut self.buckets[usize::from(remoteness)];
        if bucket.len() == bucket.capacity() && bucket.try_reserve(1).is_err() {
            return false;
        }
        bucket.push(position);
        self.dividers[usize::from(remoteness)][group] += 1;
        true
    }

    /// One-shot conversion of the per-group counts into exclusive prefix
    /// sums.
    pub fn accumulate_dividers(&mut self) {
        debug_assert!(!self.accumulated);
        for row in &mut self.dividers {
            let mut running = 0;
            for entry in row.iter_mut() {
                let count = *entry;
                *entry = running;
                running += count;
            }
        }
        self.accumulated = true;
    }

    #[must_use]
    pub fn len(&self, remoteness: Remoteness) -> usize {
        self.buckets[usize::from(remoteness)].len()
    }

    #[must_use]
    pub fn is_empty(&self, remoteness: Remoteness) -> bool {
        self.len(remoteness) == 0
    }

    #[must_use]
    pub fn get(&self, remoteness: Remoteness, i: usize) -> Position {
        self.buckets[usize::from(remoteness)][i]
    }

    #[must_use]
    pub fn positions(&self, remoteness: Remoteness) -> &[Position] {
        &self.buckets[usize::from(remoteness)]
    }

    /// Only meaningful after [`accumulate_dividers`](Self::accumulate_dividers).
    #[must_use]
    pub fn divider(&self, remoteness: Remoteness, group: usize) -> i64 {
        debug_assert!(self.accumulated);
        self.dividers[usize::from(remoteness)][group]
    }

    /// Appends to the trailing "from the current tier" group. This is the
    /// one append allowed after accumulation: the last group's extent is
    /// `[dividers[r][last], bucket len)`, so it absorbs growth without
    /// disturbing the other groups' offsets.
    #[must_use]
    pub fn push_current(&mut self, position: Position, remoteness: Remoteness) -> bool {
        let bucket = &mut self.buckets[usize::from(remoteness)];
        if bucket.len() == bucket.capacity() && bucket.try_reserve(1).is_err() {
            return false;
        }
        bucket.push(position);
        if !self.accumulated {
            self.dividers[usize::from(remoteness)][self.num_groups - 1] += 1;
        }
        true
    }

    /// Bucket index range of a group at a level, after accumulation.
    #[must_use]
    pub fn group_range(&self, remoteness: Remoteness, group: usize) -> std::ops::Range<usize> {
        debug_assert!(self.accumulated);
        let row = &self.dividers[usize::from(remoteness)];
        let start = row[group] as usize;
        let end = if group + 1 < self.num_groups {
            row[group + 1] as usize
        } else {
            self.len(remoteness)
        };
        start..end
    }

    /// The group a bucket index belongs to, by divider lookup.
    #[must_use]
    pub fn group_of(&self, remoteness: Remoteness, i: usize) -> usize {
        debug_assert!(self.accumulated);
        let row = &self.dividers[usize::from(remoteness)];
        match row.binary_search(&(i as i64)) {
            // equal dividers mean empty groups; take the last group
            // starting here
            Ok(mut group) => {
                while group + 1 < row.len() && row[group + 1] == i as i64 {
                    group += 1;
                }
                group
            }
            Err(insertion) => insertion - 1,
        }
    }

    /// Releases the bucket and divider row of a fully processed level.
    /// The level cannot be appended to afterwards.
    pub fn free_remoteness(&mut self, remoteness: Remoteness) {
        self.buckets[usize::from(remoteness)] = PositionArray::new();
        self.dividers[usize::from(remoteness)] = Vec::new();
    }

    /// Drains a level but keeps it usable: the per-worker frontiers of a
    /// propagation phase are emptied this way after every pass and reused
    /// at later levels.
    pub fn take_level(&mut self, remoteness: Remoteness) -> PositionArray {
        for entry in &mut self.dividers[usize::from(remoteness)] {
            *entry = 0;
        }
        std::mem::take(&mut self.buckets[usize::from(remoteness)])
    }

    /// Drains `other`'s buckets into self, preserving group accounting.
    /// Both frontiers must still be in the counting phase.
    pub fn merge(&mut self, other: &mut Frontier) {
        debug_assert!(!self.accumulated && !other.accumulated);
        debug_assert_eq!(self.num_groups, other.num_groups);
        for level in 0..self.buckets.len() {
            if other.buckets[level].is_empty() {
                continue;
            }
            let drained = std::mem::take(&mut other.buckets[level]);
            self.buckets[level].extend_from_slice(&drained);
            for group in 0..self.num_groups {
                self.dividers[level][group] += other.dividers[level][group];
                other.dividers[level][group] = 0;
            }
        }
    }
}
