//! The tier solver: discovers the tier graph, collapses it under tier
//! symmetry, schedules canonical tiers children-first, and runs the
//! per-tier engine in `tier_worker`, flushing each finished tier before
//! starting the next.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use rustc_hash::FxHashMap;

use crate::containers::{Int64HashMap, Int64Queue};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::game::{Game, MAX_CHILD_TIERS};
use crate::record::Record;
use crate::tier_worker::{progress_bar, tier_stats, TierOutcome, TierTask};
use crate::types::{Tier, TierArray};

/// Workers default to `GAMESMAN_THREADS`, then to the hardware.
fn default_workers() -> usize {
    std::env::var("GAMESMAN_THREADS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, NonZeroUsize::get))
}

/// Canonical child tiers of `tier`, deduplicated. A symmetric child
/// collapsing onto `tier` itself is an intra-tier edge, not a tier edge.
pub(crate) fn canonical_child_tiers(game: &dyn Game, tier: Tier) -> Result<TierArray> {
    let raw = game.child_tiers(tier);
    if raw.len() > MAX_CHILD_TIERS {
        return Err(Error::InvalidArgument(format!(
            "tier {tier} has {} child tiers, limit is {MAX_CHILD_TIERS}",
            raw.len()
        )));
    }
    let mut canonical: TierArray = raw
        .into_iter()
        .map(|child| game.canonical_tier(child))
        .filter(|child| *child != tier)
        .collect();
    canonical.sort_unstable();
    canonical.dedup();
    Ok(canonical)
}

/// BFS over the canonical tier graph from the initial tier, followed by a
/// children-first topological sort.
pub(crate) fn canonical_tier_order(game: &dyn Game) -> Result<TierArray> {
    let initial = game.canonical_tier(game.initial_tier());
    let mut discovered = Int64HashMap::new();
    let mut queue = Int64Queue::new();
    if !discovered.set(initial, 0) || !queue.push(initial) {
        return Err(Error::OutOfMemory);
    }
    let mut children_of: FxHashMap<Tier, TierArray> = FxHashMap::default();
    let mut parents_of: FxHashMap<Tier, TierArray> = FxHashMap::default();
    while let Some(tier) = queue.pop() {
        let children = canonical_child_tiers(game, tier)?;
        for &child in &children {
            parents_of.entry(child).or_default().push(tier);
            if !discovered.contains(child) {
                if !discovered.set(child, 0) || !queue.push(child) {
                    return Err(Error::OutOfMemory);
                }
            }
        }
        children_of.insert(tier, children);
    }

    // children before parents
    let mut unsolved_children: FxHashMap<Tier, usize> = children_of
        .iter()
        .map(|(tier, children)| (*tier, children.len()))
        .collect();
    let mut ready: TierArray = unsolved_children
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(tier, _)| *tier)
        .collect();
    ready.sort_unstable();
    let mut order = TierArray::with_capacity(children_of.len());
    while let Some(tier) = ready.pop() {
        order.push(tier);
        if let Some(parents) = parents_of.get(&tier) {
            for &parent in parents {
                let count = unsolved_children
                    .get_mut(&parent)
                    .unwrap_or_else(|| unreachable!("parent of a discovered tier"));
                *count -= 1;
                if *count == 0 {
                    ready.push(parent);
                }
            }
        }
    }
    if order.len() != children_of.len() {
        return Err(Error::Runtime("tier graph contains a cycle".into()));
    }
    Ok(order)
}

#[derive(Debug, Clone, Default)]
pub struct SolveReport {
    pub tiers_total: usize,
    pub tiers_solved: usize,
    pub tiers_skipped: usize,
    pub canceled: bool,
}

pub struct TierSolver<'a> {
    game: &'a dyn Game,
    num_workers: usize,
    verbose: bool,
    memory_limit: Option<u64>,
    cancel: Arc<AtomicBool>,
}

impl<'a> TierSolver<'a> {
    #[must_use]
    pub fn new(game: &'a dyn Game) -> Self {
        Self {
            game,
            num_workers: default_workers(),
            verbose: false,
            memory_limit: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        if num_workers > 0 {
            self.num_workers = num_workers;
        }
        self
    }

    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[must_use]
    pub fn with_memory_limit(mut self, limit: Option<u64>) -> Self {
        self.memory_limit = limit;
        self
    }

    /// Cooperative cancellation flag: set it (e.g. from a signal handler)
    /// and the solver stops cleanly, abandoning the in-progress tier
    /// without flushing it.
    #[must_use]
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn warn_memory(&self, tier: Tier, size: i64, child_sizes: &[i64]) {
        if let Some(limit) = self.memory_limit {
            // 3 bytes per current-tier position, 2 per loaded child record
            let estimate = size as u64 * 3 + child_sizes.iter().map(|s| *s as u64 * 2).sum::<u64>();
            if estimate > limit {
                warn!(
                    "tier {tier} needs roughly {estimate} bytes in memory, \
                     over the {limit}-byte limit"
                );
            }
        }
    }

    /// Solves every canonical tier not already on disk (all of them when
    /// `force`), children first.
    pub fn solve(&self, db: &mut dyn Database, force: bool) -> Result<SolveReport> {
        let order = canonical_tier_order(self.game)?;
        let mut report = SolveReport {
            tiers_total: order.len(),
            ..SolveReport::default()
        };
        info!(
            "solving {} with {} canonical tiers on {} workers",
            self.game.name(),
            order.len(),
            self.num_workers
        );

        for &tier in &order {
            if self.cancel.load(Ordering::Relaxed) {
                report.canceled = true;
                break;
            }
            if let Some(name) = self.game.tier_name(tier) {
                db.register_tier_name(tier, &name)?;
            }
            if !force && db.is_tier_solved(tier) {
                debug!("tier {tier} already solved, skipping");
                report.tiers_skipped += 1;
                continue;
            }
            match self.solve_tier(db, tier)? {
                TierOutcome::Solved => report.tiers_solved += 1,
                TierOutcome::Canceled => {
                    report.canceled = true;
                    break;
                }
            }
        }
        if report.canceled {
            info!("solve canceled after {} tiers", report.tiers_solved);
        }
        Ok(report)
    }

    fn solve_tier(&self, db: &mut dyn Database, tier: Tier) -> Result<TierOutcome> {
        let size = self.game.tier_size(tier);
        if size < 0 {
            return Err(Error::InvalidArgument(format!(
                "tier {tier} reports negative size"
            )));
        }
        let child_tiers = canonical_child_tiers(self.game, tier)?;
        let mut child_records: Vec<Vec<Record>> = Vec::with_capacity(child_tiers.len());
        for &child in &child_tiers {
            let records = db.load_tier(child)?;
            if records.len() as i64 != self.game.tier_size(child) {
                return Err(Error::Corrupt(format!(
                    "tier {child} on disk has {} records, the game expects {}",
                    records.len(),
                    self.game.tier_size(child)
                )));
            }
            child_records.push(records);
        }
        let child_sizes: Vec<i64> = child_records.iter().map(|r| r.len() as i64).collect();
        self.warn_memory(tier, size, &child_sizes);

        db.create_solving_tier(tier, size)?;
        let outcome = {
            let task = TierTask {
                game: self.game,
                tier,
                records: db.solving_tier()?,
                child_tiers: &child_tiers,
                child_records: &child_records,
                num_workers: self.num_workers,
                cancel: &self.cancel,
                progress: progress_bar(size as u64, "Solving", self.verbose),
            };
            debug!("solving tier {tier} of size {size}");
            task.run()
        };
        match outcome {
            Ok(TierOutcome::Solved) => {
                if log::log_enabled!(log::Level::Debug) {
                    let stats = tier_stats(&db.solving_tier()?.records());
                    debug!(
                        "tier {tier}: {} win, {} lose, {} tie, {} draw, {} untouched",
                        stats.wins, stats.loses, stats.ties, stats.draws, stats.unsolved
                    );
                }
                let flushed = db.flush_solving_tier();
                db.free_solving_tier();
                flushed?;
                Ok(TierOutcome::Solved)
            }
            // an unfinished tier is never flushed
            Ok(TierOutcome::Canceled) => {
                db.free_solving_tier();
                Ok(TierOutcome::Canceled)
            }
            Err(err) => {
                db.free_solving_tier();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BlockDb, Database};
    use crate::game::TierType;
    use crate::record::Value;
    use crate::types::{Move, MoveArray, Position, PositionArray, TierPosition};
    use std::path::PathBuf;

    /// An explicit game graph: each tier is a vector of nodes, each node
    /// lists its outgoing edges.
    struct GraphGame {
        name: &'static str,
        tiers: FxHashMap<Tier, Vec<Node>>,
        with_parents: bool,
        tier_types: FxHashMap<Tier, TierType>,
    }

    #[derive(Default, Clone)]
    struct Node {
        children: Vec<TierPosition>,
        primitive: Value,
        legal: bool,
    }

    impl GraphGame {
        fn new(name: &'static str, with_parents: bool) -> Self {
            Self {
                name,
                tiers: FxHashMap::default(),
                with_parents,
                tier_types: FxHashMap::default(),
            }
        }

        fn node(&mut self, at: TierPosition, primitive: Value, children: &[TierPosition]) {
            let nodes = self.tiers.entry(at.tier).or_default();
            if nodes.len() <= at.position as usize {
                nodes.resize(at.position as usize + 1, Node::default());
            }
            nodes[at.position as usize] = Node {
                children: children.to_vec(),
                primitive,
                legal: true,
            };
        }
    }

    impl Game for GraphGame {
        fn name(&self) -> &'static str {
            self.name
        }

        fn initial_tier(&self) -> Tier {
            0
        }

        fn initial_position(&self) -> TierPosition {
            TierPosition::new(0, 0)
        }

        fn tier_size(&self, tier: Tier) -> i64 {
            self.tiers.get(&tier).map_or(0, |nodes| nodes.len() as i64)
        }

        fn child_tiers(&self, tier: Tier) -> TierArray {
            let mut children: TierArray = self.tiers[&tier]
                .iter()
                .flat_map(|node| node.children.iter().map(|c| c.tier))
                .filter(|t| *t != tier)
                .collect();
            children.sort_unstable();
            children.dedup();
            children
        }

        fn generate_moves(&self, tier_position: TierPosition) -> MoveArray {
            (0..self.tiers[&tier_position.tier][tier_position.position as usize]
                .children
                .len() as Move)
                .collect()
        }

        fn do_move(&self, tier_position: TierPosition, mov: Move) -> TierPosition {
            self.tiers[&tier_position.tier][tier_position.position as usize].children
                [mov as usize]
        }

        fn primitive(&self, tier_position: TierPosition) -> Value {
            self.tiers[&tier_position.tier][tier_position.position as usize].primitive
        }

        fn is_legal_position(&self, tier_position: TierPosition) -> bool {
            self.tiers[&tier_position.tier][tier_position.position as usize].legal
        }

        fn supports_parent_positions(&self) -> bool {
            self.with_parents
        }

        fn canonical_parent_positions(
            &self,
            child: TierPosition,
            parent_tier: Tier,
        ) -> Option<PositionArray> {
            if !self.with_parents {
                return None;
            }
            Some(
                self.tiers[&parent_tier]
                    .iter()
                    .enumerate()
                    .filter(|(_, node)| node.children.contains(&child))
                    .map(|(position, _)| position as Position)
                    .collect(),
            )
        }

        fn tier_type(&self, tier: Tier) -> TierType {
            self.tier_types
                .get(&tier)
                .copied()
                .unwrap_or(TierType::Loopy)
        }
    }

    fn scratch_dir(test: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("gamesman-solver-tests")
            .join(format!("{test}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn solve(game: &GraphGame, dir: &PathBuf) -> BlockDb {
        let mut db = BlockDb::new(dir, game.name(), "0").unwrap();
        let report = TierSolver::new(game)
            .with_workers(2)
            .solve(&mut db, false)
            .unwrap();
        assert!(!report.canceled);
        db
    }

    fn tp(tier: Tier, position: Position) -> TierPosition {
        TierPosition::new(tier, position)
    }

    #[test]
    fn test_single_tier_cycle_with_escape() {
        // 0 -> 1 -> 2 -> 0, and 2 -> 3 where 3 is a primitive Lose
        for with_parents in [false, true] {
            let mut game = GraphGame::new("cycle-escape", with_parents);
            game.node(tp(0, 0), Value::Undecided, &[tp(0, 1)]);
            game.node(tp(0, 1), Value::Undecided, &[tp(0, 2)]);
            game.node(tp(0, 2), Value::Undecided, &[tp(0, 0), tp(0, 3)]);
            game.node(tp(0, 3), Value::Lose, &[]);
            let dir = scratch_dir(if with_parents {
                "cycle-escape-parents"
            } else {
                "cycle-escape-reverse"
            });
            let db = solve(&game, &dir);
            let records = db.load_tier(0).unwrap();
            assert_eq!(records[3], Record::new(Value::Lose, 0));
            assert_eq!(records[2], Record::new(Value::Win, 1));
            assert_eq!(records[1], Record::new(Value::Lose, 2));
            assert_eq!(records[0], Record::new(Value::Win, 3));
        }
    }

    #[test]
    fn test_pure_cycle_is_a_draw() {
        let mut game = GraphGame::new("pure-cycle", true);
        game.node(tp(0, 0), Value::Undecided, &[tp(0, 1)]);
        game.node(tp(0, 1), Value::Undecided, &[tp(0, 0)]);
        let dir = scratch_dir("pure-cycle");
        let db = solve(&game, &dir);
        let records = db.load_tier(0).unwrap();
        assert_eq!(records[0], Record::new(Value::Draw, 0));
        assert_eq!(records[1], Record::new(Value::Draw, 0));
    }

    #[test]
    fn test_win_preferred_over_earlier_tie() {
        // 0 has a tying child at remoteness 0 and a losing child at
        // remoteness 1; it must come out Win(2), not Tie(1)
        let mut game = GraphGame::new("win-over-tie", true);
        game.node(tp(0, 0), Value::Undecided, &[tp(0, 1), tp(0, 2)]);
        game.node(tp(0, 1), Value::Tie, &[]);
        game.node(tp(0, 2), Value::Undecided, &[tp(0, 3)]);
        game.node(tp(0, 3), Value::Win, &[]);
        let dir = scratch_dir("win-over-tie");
        let db = solve(&game, &dir);
        let records = db.load_tier(0).unwrap();
        assert_eq!(records[3], Record::new(Value::Win, 0));
        assert_eq!(records[2], Record::new(Value::Lose, 1));
        assert_eq!(records[0], Record::new(Value::Win, 2));
        assert_eq!(records[1], Record::new(Value::Tie, 0));
    }

    #[test]
    fn test_tie_propagates_when_no_win_exists() {
        let mut game = GraphGame::new("tie-chain", true);
        game.node(tp(0, 0), Value::Undecided, &[tp(0, 1)]);
        game.node(tp(0, 1), Value::Tie, &[]);
        let dir = scratch_dir("tie-chain");
        let db = solve(&game, &dir);
        let records = db.load_tier(0).unwrap();
        assert_eq!(records[0], Record::new(Value::Tie, 1));
    }

    #[test]
    fn test_multi_tier_propagation_and_skip() {
        // tier 1 feeds tier 0; the second solve skips both tiers
        let mut game = GraphGame::new("two-tier", true);
        game.node(tp(0, 0), Value::Undecided, &[tp(1, 0)]);
        game.node(tp(0, 1), Value::Undecided, &[tp(1, 1)]);
        game.node(tp(1, 0), Value::Lose, &[]);
        game.node(tp(1, 1), Value::Win, &[]);
        let dir = scratch_dir("two-tier");
        let mut db = BlockDb::new(&dir, game.name(), "0").unwrap();
        let solver = TierSolver::new(&game).with_workers(2);
        let report = solver.solve(&mut db, false).unwrap();
        assert_eq!(report.tiers_total, 2);
        assert_eq!(report.tiers_solved, 2);

        let tier0 = db.load_tier(0).unwrap();
        assert_eq!(tier0[0], Record::new(Value::Win, 1));
        assert_eq!(tier0[1], Record::new(Value::Lose, 1));

        let report = solver.solve(&mut db, false).unwrap();
        assert_eq!(report.tiers_skipped, 2);
        assert_eq!(report.tiers_solved, 0);
    }

    #[test]
    fn test_illegal_positions_stay_unsolved() {
        let mut game = GraphGame::new("illegal", true);
        game.node(tp(0, 0), Value::Undecided, &[tp(0, 2)]);
        game.node(tp(0, 1), Value::Undecided, &[tp(0, 0)]); // illegal parent
        game.tiers.get_mut(&0).unwrap()[1].legal = false;
        game.node(tp(0, 2), Value::Lose, &[]);
        let dir = scratch_dir("illegal");
        let db = solve(&game, &dir);
        let records = db.load_tier(0).unwrap();
        assert_eq!(records[0], Record::new(Value::Win, 1));
        assert_eq!(records[1], Record::default());
    }

    #[test]
    fn test_immediate_transition_forward_scan() {
        let mut game = GraphGame::new("immediate", true);
        game.tier_types.insert(0, TierType::ImmediateTransition);
        game.node(tp(0, 0), Value::Undecided, &[tp(1, 0), tp(1, 1)]);
        game.node(tp(1, 0), Value::Win, &[]);
        game.node(tp(1, 1), Value::Lose, &[]);
        game.tier_types.insert(1, TierType::ImmediateTransition);
        let dir = scratch_dir("immediate");
        let db = solve(&game, &dir);
        let records = db.load_tier(0).unwrap();
        assert_eq!(records[0], Record::new(Value::Win, 1));
    }

    #[test]
    fn test_cancellation_stops_cleanly() {
        let mut game = GraphGame::new("cancel", true);
        game.node(tp(0, 0), Value::Undecided, &[tp(0, 1)]);
        game.node(tp(0, 1), Value::Lose, &[]);
        let dir = scratch_dir("cancel");
        let mut db = BlockDb::new(&dir, game.name(), "0").unwrap();
        let solver = TierSolver::new(&game);
        solver.cancellation_flag().store(true, Ordering::Relaxed);
        let report = solver.solve(&mut db, false).unwrap();
        assert!(report.canceled);
        assert_eq!(report.tiers_solved, 0);
        assert!(!db.is_tier_solved(0));
    }
}
