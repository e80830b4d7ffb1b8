//! The per-tier solve: a frontier-driven retrograde BFS for loopy tiers
//! and a forward scan for tiers whose moves all leave the tier.
//!
//! Loopy phases:
//! - A: stream every solved child tier into the frontiers, grouped by
//!   child tier;
//! - B: scan the current tier for primitives and seed the
//!   undiscovered-winning-moves counters (building the reverse graph here
//!   when the game cannot generate parents);
//! - C: propagate remoteness levels in ascending order, win/lose first.
//!   Tie entries live in their own frontier and propagate only after
//!   win/lose propagation has exhausted itself, so a parent with a losing
//!   child can never be mislabeled Tie by an earlier-arriving tying
//!   child. Whatever remains unlabeled afterwards is Draw.
//!
//! Workers fork-join per phase and per level. A position's value byte is
//! claimed with a compare-and-set; the Lose counter lives in the
//! remoteness slot until a claim overwrites it, and is only ever
//! decremented for a parent that is still undecided.

use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::{ProgressBar, ProgressStyle};
use log::trace;

use crate::db::SolvingTier;
use crate::error::{Error, Result};
use crate::frontier::{Frontier, PaddedFrontier};
use crate::game::{Game, TierType, MAX_MOVES};
use crate::record::{Record, Remoteness, Value, REMOTENESS_MAX};
use crate::reverse_graph::{FrozenReverseGraph, ReverseGraph};
use crate::types::{Position, Tier, TierPosition};

/// Positions per cancellation poll and progress tick.
const SCAN_STRIDE: i64 = 4096;

pub(crate) struct TierTask<'a> {
    pub game: &'a dyn Game,
    pub tier: Tier,
    pub records: &'a SolvingTier,
    pub child_tiers: &'a [Tier],
    pub child_records: &'a [Vec<Record>],
    pub num_workers: usize,
    pub cancel: &'a AtomicBool,
    pub progress: ProgressBar,
}

/// Outcome of a tier solve that did not fail: either completed, or
/// cleanly stopped by cancellation (in which case the tier must not be
/// flushed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TierOutcome {
    Solved,
    Canceled,
}

/// A legal non-primitive position must offer between 1 and [`MAX_MOVES`]
/// canonical children: none at all is a broken game module, and an
/// overflowing listing would silently truncate the Lose counter.
fn check_child_count(tier_position: TierPosition, count: usize) -> Result<()> {
    if count == 0 {
        return Err(Error::Runtime(format!(
            "non-primitive position {tier_position} has no moves"
        )));
    }
    if count > MAX_MOVES {
        return Err(Error::InvalidArgument(format!(
            "position {tier_position} has {count} canonical children, limit is {MAX_MOVES}"
        )));
    }
    Ok(())
}

pub(crate) fn progress_bar(len: u64, message: &'static str, verbose: bool) -> ProgressBar {
    if !verbose {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template(
            "{msg} {spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})",
        )
        .expect("Invalid indicatif template syntax")
        .progress_chars("#>-"),
    );
    pb.with_message(message)
}

impl TierTask<'_> {
    pub fn run(&self) -> Result<TierOutcome> {
        let outcome = match self.game.tier_type(self.tier) {
            TierType::ImmediateTransition | TierType::LoopFree => self.forward_scan()?,
            TierType::Loopy => self.retrograde()?,
        };
        self.progress.finish_and_clear();
        Ok(outcome)
    }

    fn canceled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn child_record(&self, child: TierPosition) -> Result<Record> {
        let group = self
            .child_tiers
            .iter()
            .position(|t| *t == child.tier)
            .ok_or_else(|| {
                Error::Runtime(format!(
                    "move into tier {}, which is not a child of tier {}",
                    child.tier, self.tier
                ))
            })?;
        self.child_records[group]
            .get(child.position as usize)
            .copied()
            .ok_or_else(|| {
                Error::Runtime(format!("child {child} outside its tier's size"))
            })
    }

    /// Splits `[0, size)` into one contiguous chunk per worker.
    fn chunks(&self, size: i64) -> Vec<(i64, i64)> {
        let workers = self.num_workers.max(1) as i64;
        let per_worker = size / workers + i64::from(size % workers != 0);
        (0..workers)
            .map(|w| (w * per_worker, ((w + 1) * per_worker).min(size)))
            .filter(|(from, to)| from < to)
            .collect()
    }

    /// Joins a batch of scoped workers, surfacing the first error.
    fn join_workers<T>(handles: Vec<std::thread::ScopedJoinHandle<'_, Result<T>>>) -> Result<()> {
        let mut first_error = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(_)) => (),
                Ok(Err(err)) => first_error = first_error.or(Some(err)),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Skips positions the solve leaves untouched: illegal ones, and
    /// non-canonical ones when the game has position symmetry.
    fn solvable(&self, tier_position: TierPosition) -> bool {
        self.game.is_legal_position(tier_position)
            && self.game.canonical_position(tier_position) == tier_position.position
    }

    // ------------------------------------------------------------------
    // forward scan: every child is in an already-solved smaller tier
    // ------------------------------------------------------------------

    fn forward_scan(&self) -> Result<TierOutcome> {
        let size = self.records.size();
        let canceled = AtomicBool::new(false);
        std::thread::scope(|scope| -> Result<()> {
            let handles = self
                .chunks(size)
                .into_iter()
                .map(|(from, to)| {
                    let canceled = &canceled;
                    scope.spawn(move || self.forward_scan_chunk(from, to, canceled))
                })
                .collect();
            Self::join_workers(handles)
        })?;
        Ok(if canceled.load(Ordering::Relaxed) {
            TierOutcome::Canceled
        } else {
            TierOutcome::Solved
        })
    }

    fn forward_scan_chunk(&self, from: i64, to: i64, canceled: &AtomicBool) -> Result<()> {
        for position in from..to {
            if position % SCAN_STRIDE == 0 {
                if self.canceled() {
                    canceled.store(true, Ordering::Relaxed);
                    return Ok(());
                }
                self.progress.inc(SCAN_STRIDE.min(to - position) as u64);
            }
            let tier_position = TierPosition::new(self.tier, position);
            if !self.solvable(tier_position) {
                continue;
            }
            let primitive = self.game.primitive(tier_position);
            if primitive != Value::Undecided {
                self.records.set(position, primitive, 0);
                continue;
            }
            let (value, remoteness) = self.label_from_children(tier_position)?;
            self.records.set(position, value, remoteness);
        }
        Ok(())
    }

    /// Direct minimax over solved children, for tiers without intra-tier
    /// edges.
    fn label_from_children(&self, tier_position: TierPosition) -> Result<(Value, Remoteness)> {
        let children = self.game.canonical_child_positions(tier_position);
        check_child_count(tier_position, children.len())?;
        let mut min_lose: Option<Remoteness> = None;
        let mut min_tie: Option<Remoteness> = None;
        let mut max_win: Remoteness = 0;
        let mut any_draw = false;
        for child in children {
            if child.tier == self.tier {
                return Err(Error::Runtime(format!(
                    "tier {} declares no intra-tier moves but {tier_position} \
                     has child {child}",
                    self.tier
                )));
            }
            let record = self.child_record(child)?;
            match record.value() {
                Value::Lose => {
                    min_lose =
                        Some(min_lose.map_or(record.remoteness(), |r| r.min(record.remoteness())));
                }
                Value::Tie => {
                    min_tie =
                        Some(min_tie.map_or(record.remoteness(), |r| r.min(record.remoteness())));
                }
                Value::Win => max_win = max_win.max(record.remoteness()),
                Value::Draw => any_draw = true,
                Value::Undecided => {
                    return Err(Error::Runtime(format!(
                        "child {child} of {tier_position} is unsolved"
                    )))
                }
            }
        }
        let (value, remoteness) = if let Some(remoteness) = min_lose {
            (Value::Win, remoteness + 1)
        } else if let Some(remoteness) = min_tie {
            (Value::Tie, remoteness + 1)
        } else if any_draw {
            (Value::Draw, 0)
        } else {
            (Value::Lose, max_win + 1)
        };
        if remoteness > REMOTENESS_MAX {
            return Err(Error::Runtime(format!(
                "remoteness of {tier_position} exceeds {REMOTENESS_MAX}"
            )));
        }
        Ok((value, remoteness))
    }

    // ------------------------------------------------------------------
    // retrograde solve
    // ------------------------------------------------------------------

    fn retrograde(&self) -> Result<TierOutcome> {
        let mut frontier = Frontier::new(self.child_tiers.len());
        let mut tie_frontier = Frontier::new(self.child_tiers.len());

        // Phase A: single-threaded child load; contiguity of the tier
        // groups inside each bucket depends on loading one child at a
        // time.
        for (group, records) in self.child_records.iter().enumerate() {
            if self.canceled() {
                return Ok(TierOutcome::Canceled);
            }
            for (position, record) in records.iter().enumerate() {
                let target = match record.value() {
                    Value::Lose | Value::Win => &mut frontier,
                    Value::Tie => &mut tie_frontier,
                    Value::Draw | Value::Undecided => continue,
                };
                if !target.add(position as Position, record.remoteness(), group) {
                    return Err(Error::OutOfMemory);
                }
            }
        }
        trace!("tier {}: child tiers loaded into the frontiers", self.tier);

        // Phase B: primitive scan, counter seeding, and (without a parent
        // generator) reverse-graph construction.
        let reverse_graph = if self.game.supports_parent_positions() {
            None
        } else {
            let child_sizes: Vec<i64> =
                self.child_records.iter().map(|r| r.len() as i64).collect();
            Some(ReverseGraph::new(
                self.tier,
                self.records.size(),
                self.child_tiers,
                &child_sizes,
            )?)
        };

        let mut workers: Vec<PaddedFrontier> = (0..self.num_workers.max(1))
            .map(|_| PaddedFrontier::new(Frontier::new(self.child_tiers.len())))
            .collect();
        let mut tie_workers: Vec<PaddedFrontier> = (0..self.num_workers.max(1))
            .map(|_| PaddedFrontier::new(Frontier::new(self.child_tiers.len())))
            .collect();
        if self.primitive_scan(reverse_graph.as_ref(), &mut workers, &mut tie_workers)? {
            return Ok(TierOutcome::Canceled);
        }
        for worker in &mut workers {
            frontier.merge(worker);
        }
        for worker in &mut tie_workers {
            tie_frontier.merge(worker);
        }
        frontier.accumulate_dividers();
        tie_frontier.accumulate_dividers();
        let frozen = reverse_graph.map(ReverseGraph::freeze);
        trace!("tier {}: primitive scan done", self.tier);

        // Phase C: win/lose propagation in ascending levels, then tie
        // propagation over whatever remains open.
        const WIN_LOSE_PASSES: &[Value] = &[Value::Lose, Value::Win];
        const TIE_PASSES: &[Value] = &[Value::Tie];
        for (active, passes) in [
            (&mut frontier, WIN_LOSE_PASSES),
            (&mut tie_frontier, TIE_PASSES),
        ] {
            let mut level: Remoteness = 0;
            loop {
                if self.canceled() {
                    return Ok(TierOutcome::Canceled);
                }
                if active.is_empty(level) {
                    if ((level + 1)..=REMOTENESS_MAX).all(|l| active.is_empty(l)) {
                        break;
                    }
                    level += 1;
                    continue;
                }
                for pass_value in passes {
                    if self.canceled() {
                        return Ok(TierOutcome::Canceled);
                    }
                    self.propagate_level(active, level, *pass_value, frozen.as_ref(), &mut workers)?;
                    if level == REMOTENESS_MAX {
                        // claims at the ceiling already failed the solve
                        continue;
                    }
                    let next = level + 1;
                    for worker in &mut workers {
                        for position in worker.take_level(next) {
                            if !active.push_current(position, next) {
                                return Err(Error::OutOfMemory);
                            }
                        }
                    }
                }
                active.free_remoteness(level);
                if level == REMOTENESS_MAX {
                    break;
                }
                level += 1;
            }
        }

        // Draw by exhaustion: legal non-primitive positions that never
        // received a finite label.
        if self.draw_pass()? {
            return Ok(TierOutcome::Canceled);
        }
        Ok(TierOutcome::Solved)
    }

    fn primitive_scan(
        &self,
        reverse_graph: Option<&ReverseGraph>,
        workers: &mut [PaddedFrontier],
        tie_workers: &mut [PaddedFrontier],
    ) -> Result<bool> {
        let size = self.records.size();
        let current_group = self.child_tiers.len();
        let chunks = self.chunks(size);
        let canceled = AtomicBool::new(false);
        std::thread::scope(|scope| -> Result<()> {
            let handles = chunks
                .iter()
                .zip(workers.iter_mut().zip(tie_workers.iter_mut()))
                .map(|(&(from, to), (worker, tie_worker))| {
                    let canceled = &canceled;
                    scope.spawn(move || -> Result<()> {
                        for position in from..to {
                            if position % SCAN_STRIDE == 0 {
                                if self.canceled() {
                                    canceled.store(true, Ordering::Relaxed);
                                    return Ok(());
                                }
                                self.progress.inc(SCAN_STRIDE.min(to - position) as u64);
                            }
                            let tier_position = TierPosition::new(self.tier, position);
                            if !self.solvable(tier_position) {
                                continue;
                            }
                            let primitive = self.game.primitive(tier_position);
                            if primitive != Value::Undecided {
                                self.records.set(position, primitive, 0);
                                let target = if primitive == Value::Tie {
                                    &mut **tie_worker
                                } else {
                                    &mut **worker
                                };
                                if !target.add(position, 0, current_group) {
                                    return Err(Error::OutOfMemory);
                                }
                                continue;
                            }
                            let children = self.game.canonical_child_positions(tier_position);
                            check_child_count(tier_position, children.len())?;
                            self.records.init_counter(position, children.len() as u16);
                            if let Some(graph) = reverse_graph {
                                for child in children {
                                    graph.add_parent(child, position)?;
                                }
                            }
                        }
                        Ok(())
                    })
                })
                .collect();
            Self::join_workers(handles)
        })?;
        Ok(canceled.load(Ordering::Relaxed))
    }

    /// One sub-pass of one remoteness level: processes the frontier
    /// entries whose child's value is `pass_value`, updating parents.
    fn propagate_level(
        &self,
        frontier: &Frontier,
        level: Remoteness,
        pass_value: Value,
        reverse_graph: Option<&FrozenReverseGraph>,
        workers: &mut [PaddedFrontier],
    ) -> Result<()> {
        let len = frontier.len(level) as i64;
        let chunks = self.chunks(len);
        std::thread::scope(|scope| -> Result<()> {
            let handles = chunks
                .iter()
                .zip(workers.iter_mut())
                .map(|(&(from, to), worker)| {
                    scope.spawn(move || {
                        self.propagate_entries(
                            frontier,
                            level,
                            pass_value,
                            reverse_graph,
                            worker,
                            from as usize,
                            to as usize,
                        )
                    })
                })
                .collect();
            Self::join_workers(handles)
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn propagate_entries(
        &self,
        frontier: &Frontier,
        level: Remoteness,
        pass_value: Value,
        reverse_graph: Option<&FrozenReverseGraph>,
        worker: &mut Frontier,
        from: usize,
        to: usize,
    ) -> Result<()> {
        let current_group = self.child_tiers.len();
        for i in from..to {
            if i % SCAN_STRIDE as usize == 0 && self.canceled() {
                return Ok(());
            }
            let child_position = frontier.get(level, i);
            let group = frontier.group_of(level, i);
            let (child_tier, child_value) = if group == current_group {
                (self.tier, self.records.value(child_position))
            } else {
                (
                    self.child_tiers[group],
                    self.child_records[group][child_position as usize].value(),
                )
            };
            if child_value != pass_value {
                continue;
            }
            let child = TierPosition::new(child_tier, child_position);

            let parents_scratch;
            let parents: &[Position] = match reverse_graph {
                Some(graph) => graph.parents_of(child),
                None => {
                    parents_scratch = self
                        .game
                        .canonical_parent_positions(child, self.tier)
                        .ok_or(Error::NotImplemented(
                            "game declares parent support but returned none",
                        ))?;
                    &parents_scratch
                }
            };

            for &parent in parents {
                match pass_value {
                    // Win <- Lose: the first level at which a losing child
                    // appears fixes the minimal remoteness.
                    Value::Lose => {
                        if !self.parent_open(parent) {
                            continue;
                        }
                        if level == REMOTENESS_MAX {
                            return Err(self.remoteness_overflow());
                        }
                        if self.records.try_claim(parent, Value::Win, level + 1)
                            && !worker.add(parent, level + 1, current_group)
                        {
                            return Err(Error::OutOfMemory);
                        }
                    }
                    // Lose <- AllWin: the decrement that zeroes the
                    // counter owns the claim; the current level is the
                    // maximum child remoteness.
                    Value::Win => {
                        if !self.parent_open(parent) {
                            continue;
                        }
                        if self.records.decrement_counter(parent) == 0 {
                            if level == REMOTENESS_MAX {
                                return Err(self.remoteness_overflow());
                            }
                            let claimed = self.records.try_claim(parent, Value::Lose, level + 1);
                            debug_assert!(claimed, "lose claim contested");
                            if claimed && !worker.add(parent, level + 1, current_group) {
                                return Err(Error::OutOfMemory);
                            }
                        }
                    }
                    // Tie <- Tie: runs only after win/lose propagation has
                    // finished, so every parent still open here truly has
                    // no path to a losing child.
                    Value::Tie => {
                        if !self.parent_open(parent) {
                            continue;
                        }
                        if level == REMOTENESS_MAX {
                            return Err(self.remoteness_overflow());
                        }
                        if self.records.try_claim(parent, Value::Tie, level + 1)
                            && !worker.add(parent, level + 1, current_group)
                        {
                            return Err(Error::OutOfMemory);
                        }
                    }
                    Value::Undecided | Value::Draw => {
                        unreachable!("frontier entries always carry a decided, finite value")
                    }
                }
            }
        }
        Ok(())
    }

    fn remoteness_overflow(&self) -> Error {
        Error::Runtime(format!(
            "remoteness exceeds {REMOTENESS_MAX} in tier {}",
            self.tier
        ))
    }

    /// A parent that may still be claimed: undecided with a live counter.
    /// Parent lists may over-approximate; illegal (and skipped
    /// non-canonical) positions keep a zero counter and stay untouched.
    fn parent_open(&self, parent: Position) -> bool {
        self.records.value(parent) == Value::Undecided && self.records.counter(parent) > 0
    }

    fn draw_pass(&self) -> Result<bool> {
        let size = self.records.size();
        let canceled = AtomicBool::new(false);
        std::thread::scope(|scope| -> Result<()> {
            let handles = self
                .chunks(size)
                .into_iter()
                .map(|(from, to)| {
                    let canceled = &canceled;
                    scope.spawn(move || -> Result<()> {
                        for position in from..to {
                            if position % SCAN_STRIDE == 0 && self.canceled() {
                                canceled.store(true, Ordering::Relaxed);
                                return Ok(());
                            }
                            if self.records.value(position) == Value::Undecided
                                && self.records.counter(position) > 0
                            {
                                self.records.set(position, Value::Draw, 0);
                            }
                        }
                        Ok(())
                    })
                })
                .collect();
            Self::join_workers(handles)
        })?;
        Ok(canceled.load(Ordering::Relaxed))
    }
}

/// Value distribution of one flushed tier, for solve-time logging.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TierStats {
    pub wins: u64,
    pub loses: u64,
    pub ties: u64,
    pub draws: u64,
    pub unsolved: u64,
}

pub(crate) fn tier_stats(records: &[Record]) -> TierStats {
    let mut stats = TierStats::default();
    for record in records {
        match record.value() {
            Value::Win => stats.wins += 1,
            Value::Lose => stats.loses += 1,
            Value::Tie => stats.ties += 1,
            Value::Draw => stats.draws += 1,
            Value::Undecided => stats.unsolved += 1,
        }
    }
    stats
}
