//! Perfect minimal hashing of board-style positions.
//!
//! A context is built from a board size, a player mode and a piece alphabet
//! with per-piece [min, max] counts. It enumerates every valid piece
//! configuration, ranks them, and maps each (board, turn) pair to a dense
//! index in `[0, num_positions())` and back. Contexts are immutable after
//! construction, so a solver may share them freely across workers.

use arrayvec::ArrayVec;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::types::Position;

pub const MAX_PIECE_TYPES: usize = 128;

/// Which players' positions a context enumerates. `Both` reserves the low
/// bit of every hash for the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerMode {
    Both,
    First,
    Second,
}

/// One entry of the piece alphabet: a board character and the inclusive
/// range of counts it may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceRange {
    pub piece: u8,
    pub min: u32,
    pub max: u32,
}

impl PieceRange {
    #[must_use]
    pub const fn new(piece: u8, min: u32, max: u32) -> Self {
        Self { piece, min, max }
    }
}

/// Predicate over a full piece-count configuration. Counts appear in
/// alphabet order, unordered counters last.
pub type ConfigPredicate = fn(&[u32]) -> bool;

/// Construction parameters for [`GenericIndexer`].
///
/// `num_unordered` marks that many trailing alphabet entries as counters:
/// they take part in configuration enumeration and validity but occupy the
/// tail of the board string as raw counts rather than being arranged over
/// the board.
#[derive(Debug, Clone)]
pub struct IndexerSpec {
    pub board_size: usize,
    pub player_mode: PlayerMode,
    pub pieces: Vec<PieceRange>,
    pub num_unordered: usize,
    pub config_predicate: Option<ConfigPredicate>,
}

impl IndexerSpec {
    #[must_use]
    pub fn new(board_size: usize, player_mode: PlayerMode, pieces: Vec<PieceRange>) -> Self {
        Self {
            board_size,
            player_mode,
            pieces,
            num_unordered: 0,
            config_predicate: None,
        }
    }

    #[must_use]
    pub fn with_predicate(mut self, predicate: ConfigPredicate) -> Self {
        self.config_predicate = Some(predicate);
        self
    }

    #[must_use]
    pub fn with_unordered(mut self, num_unordered: usize) -> Self {
        self.num_unordered = num_unordered;
        self
    }
}

type Counts = ArrayVec<u32, MAX_PIECE_TYPES>;

/// A fully initialized hash context: a bijection between (board, turn)
/// pairs and `[0, num_positions())`.
#[derive(Debug, Clone)]
pub struct GenericIndexer {
    board_size: usize,
    player_mode: PlayerMode,
    pieces: ArrayVec<PieceRange, MAX_PIECE_TYPES>,
    num_board_pieces: usize,
    piece_index: [i8; 256],

    // configuration enumeration: mixed radix over [min, max] digit ranges
    config_weights: Vec<i64>,
    config_rank: Vec<i64>,
    rank_config_index: Vec<i64>,
    rank_offsets: Vec<i64>,

    // rearrangement cache: mixed radix over [0, max] digit ranges, board
    // pieces only
    cache_weights: Vec<i64>,
    rearrangement_cache: Vec<i64>,

    num_positions: i64,
}

impl GenericIndexer {
    pub fn new(spec: &IndexerSpec) -> Result<Self> {
        if spec.pieces.is_empty() || spec.pieces.len() > MAX_PIECE_TYPES {
            return Err(Error::GenericHash(format!(
                "piece alphabet must have between 1 and {MAX_PIECE_TYPES} entries, got {}",
                spec.pieces.len()
            )));
        }
        if spec.num_unordered >= spec.pieces.len() {
            return Err(Error::GenericHash(
                "more unordered counters than alphabet entries".into(),
            ));
        }
        let mut piece_index = [-1_i8; 256];
        for (i, range) in spec.pieces.iter().enumerate() {
            if range.min > range.max {
                return Err(Error::GenericHash(format!(
                    "piece '{}' has min {} > max {}",
                    range.piece as char, range.min, range.max
                )));
            }
            if piece_index[range.piece as usize] >= 0 {
                return Err(Error::GenericHash(format!(
                    "duplicate piece character '{}'",
                    range.piece as char
                )));
            }
            piece_index[range.piece as usize] = i as i8;
        }

        let num_board_pieces = spec.pieces.len() - spec.num_unordered;
        let mut indexer = Self {
            board_size: spec.board_size,
            player_mode: spec.player_mode,
            pieces: spec.pieces.iter().copied().collect(),
            num_board_pieces,
            piece_index,
            config_weights: Vec::new(),
            config_rank: Vec::new(),
            rank_config_index: Vec::new(),
            rank_offsets: Vec::new(),
            cache_weights: Vec::new(),
            rearrangement_cache: Vec::new(),
            num_positions: 0,
        };
        indexer.build_rearrangement_cache()?;
        indexer.enumerate_configurations(spec.config_predicate)?;
        Ok(indexer)
    }

    #[must_use]
    pub fn board_size(&self) -> usize {
        self.board_size
    }

    /// Length of the board strings this context hashes: the board cells
    /// plus one tail byte per unordered counter.
    #[must_use]
    pub fn board_len(&self) -> usize {
        self.board_size + (self.pieces.len() - self.num_board_pieces)
    }

    #[must_use]
    pub fn player_mode(&self) -> PlayerMode {
        self.player_mode
    }

    /// Size of the hash range, turn bit included.
    #[must_use]
    pub fn num_positions(&self) -> i64 {
        self.num_positions
    }

    /// Precomputes the number of arrangements of every sub-multiset of the
    /// board pieces, keyed by a mixed-radix index with `max + 1` radices.
    /// The wider radices keep every state the cruncher can reach in range
    /// even when it temporarily drops a digit below its configured minimum.
    fn build_rearrangement_cache(&mut self) -> Result<()> {
        let mut size: i64 = 1;
        self.cache_weights.clear();
        for range in &self.pieces[..self.num_board_pieces] {
            self.cache_weights.push(size);
            size = size
                .checked_mul(i64::from(range.max) + 1)
                .ok_or_else(|| Error::GenericHash("rearrangement cache too large".into()))?;
        }
        let size = usize::try_from(size)
            .map_err(|_| Error::GenericHash("rearrangement cache too large".into()))?;
        self.rearrangement_cache
            .try_reserve_exact(size)
            .map_err(|_| Error::OutOfMemory)?;

        let mut counts: Counts = self.pieces[..self.num_board_pieces].iter().map(|_| 0).collect();
        for _ in 0..size {
            self.rearrangement_cache.push(rearrangements(&counts));
            // increment the mixed-radix counter
            for (digit, range) in counts.iter_mut().zip(&self.pieces) {
                if *digit < range.max {
                    *digit += 1;
                    break;
                }
                *digit = 0;
            }
        }
        Ok(())
    }

    /// Walks every configuration in mixed-radix order, ranks the valid
    /// ones, and accumulates the per-rank starting offsets.
    fn enumerate_configurations(&mut self, predicate: Option<ConfigPredicate>) -> Result<()> {
        let mut total_configs: i64 = 1;
        self.config_weights.clear();
        for range in &self.pieces {
            self.config_weights.push(total_configs);
            total_configs = total_configs
                .checked_mul(i64::from(range.max - range.min) + 1)
                .ok_or_else(|| Error::GenericHash("configuration space too large".into()))?;
        }
        let total_configs = usize::try_from(total_configs)
            .map_err(|_| Error::GenericHash("configuration space too large".into()))?;
        self.config_rank
            .try_reserve_exact(total_configs)
            .map_err(|_| Error::OutOfMemory)?;

        let mut offset: i64 = 0;
        let mut counts: Counts = self.pieces.iter().map(|r| r.min).collect();
        for config_index in 0..total_configs {
            let board_total: u64 = counts[..self.num_board_pieces]
                .iter()
                .map(|c| u64::from(*c))
                .sum();
            let valid = board_total == self.board_size as u64
                && predicate.map_or(true, |p| p(&counts));
            if valid {
                let arrangements = self.cached_rearrangements(&counts[..self.num_board_pieces]);
                if arrangements < 0 {
                    return Err(Error::GenericHash(
                        "arrangement count overflows 63 bits".into(),
                    ));
                }
                self.config_rank.push(self.rank_offsets.len() as i64);
                self.rank_config_index.push(config_index as i64);
                self.rank_offsets.push(offset);
                offset = offset.checked_add(arrangements).ok_or_else(|| {
                    Error::GenericHash("position count overflows 63 bits".into())
                })?;
            } else {
                self.config_rank.push(-1);
            }
            for (digit, range) in counts.iter_mut().zip(&self.pieces) {
                if *digit < range.max {
                    *digit += 1;
                    break;
                }
                *digit = range.min;
            }
        }

        self.num_positions = match self.player_mode {
            PlayerMode::Both => offset
                .checked_mul(2)
                .ok_or_else(|| Error::GenericHash("position count overflows 63 bits".into()))?,
            PlayerMode::First | PlayerMode::Second => offset,
        };
        Ok(())
    }

    fn cached_rearrangements(&self, counts: &[u32]) -> i64 {
        let mut key: i64 = 0;
        for (count, weight) in counts.iter().zip(&self.cache_weights) {
            key += i64::from(*count) * weight;
        }
        self.rearrangement_cache[key as usize]
    }

    fn piece_at(&self, c: u8) -> Result<usize> {
        let index = self.piece_index[c as usize];
        if index < 0 {
            return Err(Error::GenericHash(format!(
                "unknown piece character '{}'",
                c as char
            )));
        }
        Ok(index as usize)
    }

    fn counts_of_board(&self, board: &[u8]) -> Result<Counts> {
        if board.len() != self.board_len() {
            return Err(Error::GenericHash(format!(
                "board string has {} cells, context expects {}",
                board.len(),
                self.board_len()
            )));
        }
        let mut counts: Counts = self.pieces.iter().map(|_| 0).collect();
        for c in &board[..self.board_size] {
            let index = self.piece_at(*c)?;
            if index >= self.num_board_pieces {
                return Err(Error::GenericHash(format!(
                    "counter piece '{}' found on the board proper",
                    *c as char
                )));
            }
            counts[index] += 1;
        }
        for (i, c) in board[self.board_size..].iter().enumerate() {
            counts[self.num_board_pieces + i] = u32::from(*c);
        }
        Ok(counts)
    }

    fn config_index_of(&self, counts: &[u32]) -> Result<i64> {
        let mut index: i64 = 0;
        for ((count, range), weight) in counts.iter().zip(&self.pieces).zip(&self.config_weights) {
            if *count < range.min || *count > range.max {
                return Err(Error::GenericHash(format!(
                    "count {count} of piece '{}' outside [{}, {}]",
                    range.piece as char, range.min, range.max
                )));
            }
            index += i64::from(count - range.min) * weight;
        }
        Ok(index)
    }

    fn counts_of_config_index(&self, mut config_index: i64) -> Counts {
        let mut counts: Counts = ArrayVec::new();
        for range in &self.pieces {
            let radix = i64::from(range.max - range.min) + 1;
            counts.push(range.min + (config_index % radix) as u32);
            config_index /= radix;
        }
        counts
    }

    /// Maps a board string (and, in two-player mode, the turn: 1 or 2) to
    /// its dense index.
    pub fn hash(&self, board: &[u8], turn: u8) -> Result<Position> {
        let counts = self.counts_of_board(board)?;
        let config_index = self.config_index_of(&counts)?;
        let rank = self.config_rank[config_index as usize];
        if rank < 0 {
            return Err(Error::GenericHash(
                "board's piece configuration is not valid in this context".into(),
            ));
        }

        let mut hash = self.rank_offsets[rank as usize];
        let mut remaining: Counts = counts[..self.num_board_pieces].iter().copied().collect();
        for cell in (0..self.board_size).rev() {
            let piece = self.piece_at(board[cell])?;
            for smaller in 0..piece {
                if remaining[smaller] > 0 {
                    remaining[smaller] -= 1;
                    hash += self.cached_rearrangements(&remaining);
                    remaining[smaller] += 1;
                }
            }
            remaining[piece] -= 1;
        }

        Ok(match self.player_mode {
            PlayerMode::Both => hash * 2 + i64::from(turn == 2),
            PlayerMode::First | PlayerMode::Second => hash,
        })
    }

    /// Inverse of [`hash`](Self::hash): recovers the board string and the
    /// turn (1 or 2).
    pub fn unhash(&self, hash: Position) -> Result<(Vec<u8>, u8)> {
        if hash < 0 || hash >= self.num_positions {
            return Err(Error::GenericHash(format!(
                "hash {hash} outside [0, {})",
                self.num_positions
            )));
        }
        let (mut residual, turn) = match self.player_mode {
            PlayerMode::Both => (hash / 2, if hash & 1 == 1 { 2 } else { 1 }),
            PlayerMode::First => (hash, 1),
            PlayerMode::Second => (hash, 2),
        };

        // largest per-rank offset not exceeding the residual
        let rank = match self.rank_offsets.binary_search(&residual) {
            Ok(exact) => exact,
            Err(insertion) => insertion - 1,
        };
        residual -= self.rank_offsets[rank];
        let counts = self.counts_of_config_index(self.rank_config_index[rank]);

        let mut board = vec![0_u8; self.board_len()];
        for (i, count) in counts[self.num_board_pieces..].iter().enumerate() {
            board[self.board_size + i] = *count as u8;
        }
        let mut remaining: Counts = counts[..self.num_board_pieces].iter().copied().collect();
        for cell in (0..self.board_size).rev() {
            let mut placed = false;
            for piece in 0..self.num_board_pieces {
                if remaining[piece] == 0 {
                    continue;
                }
                remaining[piece] -= 1;
                let below = self.cached_rearrangements(&remaining);
                if residual < below {
                    board[cell] = self.pieces[piece].piece;
                    placed = true;
                    break;
                }
                residual -= below;
                remaining[piece] += 1;
            }
            if !placed {
                unreachable!("cruncher exhausted the configuration before the board");
            }
        }
        Ok((board, turn))
    }

    /// The turn encoded in a hash (1 or 2). In single-player modes this is
    /// the fixed player of the context.
    #[must_use]
    pub fn turn_of(&self, hash: Position) -> u8 {
        match self.player_mode {
            PlayerMode::Both => {
                if hash & 1 == 1 {
                    2
                } else {
                    1
                }
            }
            PlayerMode::First => 1,
            PlayerMode::Second => 2,
        }
    }
}

/// Number of distinct arrangements of a piece multiset over Σcounts cells:
/// the product of binomial coefficients C(a1+a2, a1) · C(a1+a2+a3, a1+a2)
/// · …. Returns a negative value if the product overflows 63 bits.
#[must_use]
pub fn rearrangements(counts: &[u32]) -> i64 {
    let mut total: u64 = 0;
    let mut product: i64 = 1;
    for count in counts {
        total += u64::from(*count);
        match binomial(total, u64::from(*count)) {
            Some(b) => match product.checked_mul(b) {
                Some(p) => product = p,
                None => return -1,
            },
            None => return -1,
        }
    }
    product
}

fn binomial(n: u64, k: u64) -> Option<i64> {
    let k = k.min(n - k.min(n));
    let mut result: u128 = 1;
    for i in 0..k {
        result = result.checked_mul(u128::from(n - i))?;
        result /= u128::from(i) + 1;
        if result > i64::MAX as u128 {
            return None;
        }
    }
    Some(result as i64)
}

/// Registry of hash contexts keyed by an integer label. Tier games
/// typically register one context per tier so that each tier hashes under
/// its own piece-count constraints; non-tier games use the default label.
#[derive(Debug, Default)]
pub struct IndexerRegistry {
    contexts: FxHashMap<i64, GenericIndexer>,
}

pub const DEFAULT_CONTEXT: i64 = 0;

impl IndexerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_context(&mut self, label: i64, spec: &IndexerSpec) -> Result<()> {
        if self.contexts.contains_key(&label) {
            return Err(Error::InvalidArgument(format!(
                "hash context {label} already registered"
            )));
        }
        self.contexts.insert(label, GenericIndexer::new(spec)?);
        Ok(())
    }

    pub fn context(&self, label: i64) -> Result<&GenericIndexer> {
        self.contexts
            .get(&label)
            .ok_or(Error::UseBeforeInitialization)
    }

    /// Convenience for single-context games.
    pub fn add_default_context(&mut self, spec: &IndexerSpec) -> Result<()> {
        self.add_context(DEFAULT_CONTEXT, spec)
    }

    pub fn hash(&self, label: i64, board: &[u8], turn: u8) -> Result<Position> {
        self.context(label)?.hash(board, turn)
    }

    pub fn unhash(&self, label: i64, hash: Position) -> Result<(Vec<u8>, u8)> {
        self.context(label)?.unhash(hash)
    }

    pub fn num_positions(&self, label: i64) -> Result<i64> {
        Ok(self.context(label)?.num_positions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(spec: &[(u8, u32, u32)]) -> Vec<PieceRange> {
        spec.iter().map(|(p, lo, hi)| PieceRange::new(*p, *lo, *hi)).collect()
    }

    #[test]
    fn test_rearrangements_small() {
        assert_eq!(rearrangements(&[]), 1);
        assert_eq!(rearrangements(&[3]), 1);
        assert_eq!(rearrangements(&[1, 1]), 2);
        assert_eq!(rearrangements(&[2, 1]), 3);
        assert_eq!(rearrangements(&[2, 2, 1]), 30);
        // 9! / (4! 5!) and friends
        assert_eq!(rearrangements(&[4, 5]), 126);
        assert_eq!(rearrangements(&[1, 4, 4]), 630);
    }

    #[test]
    fn test_rearrangements_overflow_is_negative() {
        assert!(rearrangements(&[100, 100, 100]) < 0);
    }

    #[test]
    fn test_init_rejects_duplicate_piece() {
        let spec = IndexerSpec::new(2, PlayerMode::First, ranges(&[(b'x', 0, 2), (b'x', 0, 2)]));
        assert!(GenericIndexer::new(&spec).is_err());
    }

    #[test]
    fn test_init_rejects_inverted_range() {
        let spec = IndexerSpec::new(2, PlayerMode::First, ranges(&[(b'x', 3, 1)]));
        assert!(GenericIndexer::new(&spec).is_err());
    }

    #[test]
    fn test_two_piece_context_is_a_bijection() {
        let spec = IndexerSpec::new(
            4,
            PlayerMode::First,
            ranges(&[(b'-', 0, 4), (b'x', 0, 4)]),
        );
        let indexer = GenericIndexer::new(&spec).unwrap();
        // every count split of 4 cells: C(4,k) summed = 2^4
        assert_eq!(indexer.num_positions(), 16);
        for h in 0..indexer.num_positions() {
            let (board, turn) = indexer.unhash(h).unwrap();
            assert_eq!(indexer.hash(&board, turn).unwrap(), h);
        }
    }

    #[test]
    fn test_turn_bit_doubles_range_and_round_trips() {
        let spec = IndexerSpec::new(
            3,
            PlayerMode::Both,
            ranges(&[(b'-', 0, 3), (b'o', 0, 3), (b'x', 0, 3)]),
        );
        let indexer = GenericIndexer::new(&spec).unwrap();
        assert_eq!(indexer.num_positions(), 27 * 2);
        for h in 0..indexer.num_positions() {
            let (board, turn) = indexer.unhash(h).unwrap();
            assert_eq!(indexer.turn_of(h), turn);
            assert_eq!(indexer.hash(&board, turn).unwrap(), h);
        }
        // the low bit is exactly the turn
        assert_eq!(indexer.turn_of(0), 1);
        assert_eq!(indexer.turn_of(1), 2);
    }

    #[test]
    fn test_tictactoe_context_round_trip() {
        // the classic init: up to 9 blanks, 4 O's, 5 X's, two players
        let spec = IndexerSpec::new(
            9,
            PlayerMode::Both,
            ranges(&[(b'-', 0, 9), (b'O', 0, 4), (b'X', 0, 5)]),
        );
        let indexer = GenericIndexer::new(&spec).unwrap();
        let empty = b"---------";
        let h = indexer.hash(empty, 1).unwrap();
        assert!(h >= 0 && h < indexer.num_positions());
        let (board, turn) = indexer.unhash(h).unwrap();
        assert_eq!(&board, empty);
        assert_eq!(turn, 1);

        let mid = b"X-O--X-O-";
        let h = indexer.hash(mid, 2).unwrap();
        let (board, turn) = indexer.unhash(h).unwrap();
        assert_eq!(&board, mid);
        assert_eq!(turn, 2);
    }

    #[test]
    fn test_distinct_boards_distinct_hashes() {
        let spec = IndexerSpec::new(
            5,
            PlayerMode::First,
            ranges(&[(b'-', 0, 5), (b'o', 0, 2), (b'x', 0, 3)]),
        );
        let indexer = GenericIndexer::new(&spec).unwrap();
        let mut seen = std::collections::HashSet::new();
        for h in 0..indexer.num_positions() {
            let (board, _) = indexer.unhash(h).unwrap();
            assert!(seen.insert(board));
        }
        assert_eq!(seen.len() as i64, indexer.num_positions());
    }

    #[test]
    fn test_unknown_piece_rejected() {
        let spec = IndexerSpec::new(2, PlayerMode::First, ranges(&[(b'-', 0, 2), (b'x', 0, 2)]));
        let indexer = GenericIndexer::new(&spec).unwrap();
        assert!(indexer.hash(b"-q", 1).is_err());
    }

    #[test]
    fn test_out_of_range_hash_rejected() {
        let spec = IndexerSpec::new(2, PlayerMode::First, ranges(&[(b'-', 0, 2), (b'x', 0, 2)]));
        let indexer = GenericIndexer::new(&spec).unwrap();
        assert!(indexer.unhash(-1).is_err());
        assert!(indexer.unhash(indexer.num_positions()).is_err());
    }

    #[test]
    fn test_config_predicate_filters() {
        fn exactly_one_x(counts: &[u32]) -> bool {
            counts[1] == 1
        }
        let spec = IndexerSpec::new(3, PlayerMode::First, ranges(&[(b'-', 0, 3), (b'x', 0, 3)]))
            .with_predicate(exactly_one_x);
        let indexer = GenericIndexer::new(&spec).unwrap();
        // 3 cells, exactly one x: 3 boards
        assert_eq!(indexer.num_positions(), 3);
        for h in 0..3 {
            let (board, _) = indexer.unhash(h).unwrap();
            assert_eq!(board.iter().filter(|c| **c == b'x').count(), 1);
        }
        assert!(indexer.hash(b"xx-", 1).is_err());
    }

    #[test]
    fn test_unordered_counter_tail() {
        // 2 board cells plus a captured-piece counter in [0, 2]
        let spec = IndexerSpec::new(2, PlayerMode::First, ranges(&[(b'-', 0, 2), (b'x', 0, 2), (b'c', 0, 2)]))
            .with_unordered(1);
        let indexer = GenericIndexer::new(&spec).unwrap();
        // 4 board arrangements x 3 counter values
        assert_eq!(indexer.num_positions(), 12);
        for h in 0..indexer.num_positions() {
            let (board, turn) = indexer.unhash(h).unwrap();
            assert_eq!(board.len(), 3);
            assert!(board[2] <= 2);
            assert_eq!(indexer.hash(&board, turn).unwrap(), h);
        }
    }

    #[test]
    fn test_registry_labels() {
        let mut registry = IndexerRegistry::new();
        let spec = IndexerSpec::new(2, PlayerMode::First, ranges(&[(b'-', 0, 2), (b'x', 0, 2)]));
        registry.add_context(3, &spec).unwrap();
        assert!(registry.add_context(3, &spec).is_err());
        assert!(registry.context(4).is_err());
        let n = registry.num_positions(3).unwrap();
        assert_eq!(n, 4);
        let h = registry.hash(3, b"x-", 1).unwrap();
        assert_eq!(registry.unhash(3, h).unwrap().0, b"x-");
    }
}
