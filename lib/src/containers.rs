//! The handful of containers with bespoke semantics. Plain sequences are
//! `Vec` aliases in `types`; only the structures whose behavior the rest of
//! the core depends on are hand-built.

use crate::types::TierPosition;

const MIN_LOAD_FACTOR: f64 = 0.25;
const MAX_LOAD_FACTOR: f64 = 0.75;
const INITIAL_CAPACITY: usize = 11;

/// Open-addressed 64-to-64 map with linear probing. On an insertion that
/// would exceed the load factor, rehashes into the next prime at least
/// twice the current capacity. Iteration order is unspecified.
#[derive(Debug, Clone, Default)]
pub struct Int64HashMap {
    keys: Vec<i64>,
    values: Vec<i64>,
    occupied: Vec<bool>,
    len: usize,
    max_load: f64,
}

impl Int64HashMap {
    /// Allocates nothing; the first insertion does.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_load(MAX_LOAD_FACTOR)
    }

    /// `max_load` is clamped to [0.25, 0.75].
    #[must_use]
    pub fn with_max_load(max_load: f64) -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
            occupied: Vec::new(),
            len: 0,
            max_load: max_load.clamp(MIN_LOAD_FACTOR, MAX_LOAD_FACTOR),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    fn capacity(&self) -> usize {
        self.keys.len()
    }

    fn slot(&self, key: i64) -> usize {
        (key as u64 % self.capacity() as u64) as usize
    }

    /// Index of `key`, or of the empty slot where it would go.
    fn probe(&self, key: i64) -> usize {
        debug_assert!(self.capacity() > 0);
        let mut index = self.slot(key);
        while self.occupied[index] && self.keys[index] != key {
            index = (index + 1) % self.capacity();
        }
        index
    }

    #[must_use]
    pub fn get(&self, key: i64) -> Option<i64> {
        if self.capacity() == 0 {
            return None;
        }
        let index = self.probe(key);
        self.occupied[index].then(|| self.values[index])
    }

    #[must_use]
    pub fn contains(&self, key: i64) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or updates. Returns false if the backing store could not be
    /// grown; the map is unchanged in that case.
    #[must_use]
    pub fn set(&mut self, key: i64, value: i64) -> bool {
        if (self.len + 1) as f64 > self.max_load * self.capacity() as f64 && !self.grow() {
            return false;
        }
        let index = self.probe(key);
        if !self.occupied[index] {
            self.occupied[index] = true;
            self.keys[index] = key;
            self.len += 1;
        }
        self.values[index] = value;
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.occupied
            .iter()
            .enumerate()
            .filter(|(_, occupied)| **occupied)
            .map(|(i, _)| (self.keys[i], self.values[i]))
    }

    fn grow(&mut self) -> bool {
        let new_capacity = if self.capacity() == 0 {
            INITIAL_CAPACITY
        } else {
            next_prime(self.capacity() * 2)
        };
        let mut keys = Vec::new();
        let mut values = Vec::new();
        let mut occupied = Vec::new();
        if keys.try_reserve_exact(new_capacity).is_err()
            || values.try_reserve_exact(new_capacity).is_err()
            || occupied.try_reserve_exact(new_capacity).is_err()
        {
            return false;
        }
        keys.resize(new_capacity, 0);
        values.resize(new_capacity, 0);
        occupied.resize(new_capacity, false);

        let old_keys = std::mem::replace(&mut self.keys, keys);
        let old_values = std::mem::replace(&mut self.values, values);
        let old_occupied = std::mem::replace(&mut self.occupied, occupied);
        for (i, was_occupied) in old_occupied.into_iter().enumerate() {
            if was_occupied {
                let index = self.probe(old_keys[i]);
                self.occupied[index] = true;
                self.keys[index] = old_keys[i];
                self.values[index] = old_values[i];
            }
        }
        true
    }
}

fn next_prime(n: usize) -> usize {
    let mut candidate = n.max(2);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    let mut d = 2;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}

/// FIFO queue of 64-bit integers backed by a ring buffer.
#[derive(Debug, Clone, Default)]
pub struct Int64Queue {
    buffer: Vec<i64>,
    head: usize,
    len: usize,
}

impl Int64Queue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns false if the ring could not be grown.
    #[must_use]
    pub fn push(&mut self, item: i64) -> bool {
        if self.len == self.buffer.len() && !self.grow() {
            return false;
        }
        let tail = (self.head + self.len) % self.buffer.len();
        self.buffer[tail] = item;
        self.len += 1;
        true
    }

    pub fn pop(&mut self) -> Option<i64> {
        if self.len == 0 {
            return None;
        }
        let item = self.buffer[self.head];
        self.head = (self.head + 1) % self.buffer.len();
        self.len -= 1;
        Some(item)
    }

    fn grow(&mut self) -> bool {
        let new_capacity = (self.buffer.len() * 2).max(8);
        let mut buffer = Vec::new();
        if buffer.try_reserve_exact(new_capacity).is_err() {
            return false;
        }
        for i in 0..self.len {
            buffer.push(self.buffer[(self.head + i) % self.buffer.len()]);
        }
        buffer.resize(new_capacity, 0);
        self.buffer = buffer;
        self.head = 0;
        true
    }
}

/// Cantor pairing of a (tier, position) pair. Injective while
/// `tier + position` stays below roughly 2^31.5, which the 63-bit position
/// budget of supported games respects.
#[must_use]
pub fn cantor_pairing(tier: i64, position: i64) -> i64 {
    debug_assert!(tier >= 0 && position >= 0);
    let (a, b) = (tier as u64, position as u64);
    let sum = a.wrapping_add(b);
    (sum.wrapping_mul(sum.wrapping_add(1)) / 2).wrapping_add(b) as i64
}

/// Hash set of tier positions keyed by their Cantor pairing.
#[derive(Debug, Clone, Default)]
pub struct TierPositionSet {
    map: Int64HashMap,
}

impl TierPositionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false only on allocation failure.
    #[must_use]
    pub fn add(&mut self, tier_position: TierPosition) -> bool {
        self.map
            .set(cantor_pairing(tier_position.tier, tier_position.position), 0)
    }

    #[must_use]
    pub fn contains(&self, tier_position: TierPosition) -> bool {
        self.map
            .contains(cantor_pairing(tier_position.tier, tier_position.position))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_set_then_get() {
        let mut map = Int64HashMap::new();
        assert_eq!(map.get(42), None);
        assert!(map.set(42, 7));
        assert_eq!(map.get(42), Some(7));
        assert!(map.contains(42));
        assert!(!map.contains(43));
    }

    #[test]
    fn test_map_set_existing_updates() {
        let mut map = Int64HashMap::new();
        assert!(map.set(1, 10));
        assert!(map.set(1, 20));
        assert_eq!(map.get(1), Some(20));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_map_growth_preserves_entries() {
        let mut map = Int64HashMap::new();
        for key in 0..10_000_i64 {
            assert!(map.set(key * 31, key));
        }
        assert_eq!(map.len(), 10_000);
        for key in 0..10_000_i64 {
            assert_eq!(map.get(key * 31), Some(key));
        }
    }

    #[test]
    fn test_map_negative_keys() {
        let mut map = Int64HashMap::new();
        assert!(map.set(-5, 1));
        assert!(map.set(i64::MIN, 2));
        assert_eq!(map.get(-5), Some(1));
        assert_eq!(map.get(i64::MIN), Some(2));
    }

    #[test]
    fn test_map_load_factor_clamped() {
        let map = Int64HashMap::with_max_load(0.99);
        assert!((map.max_load - 0.75).abs() < f64::EPSILON);
        let map = Int64HashMap::with_max_load(0.01);
        assert!((map.max_load - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_next_prime() {
        assert_eq!(next_prime(2), 2);
        assert_eq!(next_prime(22), 23);
        assert_eq!(next_prime(24), 29);
    }

    #[test]
    fn test_queue_fifo_order() {
        let mut queue = Int64Queue::new();
        assert!(queue.is_empty());
        for i in 0..100 {
            assert!(queue.push(i));
        }
        for i in 0..100 {
            assert_eq!(queue.pop(), Some(i));
        }
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_queue_wraps_around() {
        let mut queue = Int64Queue::new();
        for i in 0..6 {
            assert!(queue.push(i));
        }
        assert_eq!(queue.pop(), Some(0));
        assert_eq!(queue.pop(), Some(1));
        // the tail wraps past the end of the initial allocation
        for i in 6..10 {
            assert!(queue.push(i));
        }
        let drained: Vec<i64> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(drained, (2..10).collect::<Vec<i64>>());
    }

    #[test]
    fn test_cantor_pairing_is_injective_on_small_pairs() {
        let mut seen = std::collections::HashSet::new();
        for tier in 0..50 {
            for position in 0..50 {
                assert!(seen.insert(cantor_pairing(tier, position)));
            }
        }
    }

    #[test]
    fn test_tier_position_set() {
        let mut set = TierPositionSet::new();
        let a = TierPosition::new(5, 17);
        let b = TierPosition::new(17, 5);
        assert!(!set.contains(a));
        assert!(set.add(a));
        assert!(set.contains(a));
        assert!(!set.contains(b));
        assert!(set.add(a));
        assert_eq!(set.len(), 1);
    }
}
