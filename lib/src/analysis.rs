//! Aggregation over a finished database: per-value remoteness histograms,
//! counts, example positions and move totals, merged across tiers by
//! element-wise addition and max.

use std::fmt;

use log::debug;
use rustc_hash::FxHashMap;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::game::Game;
use crate::record::{Record, Remoteness, Value, REMOTENESS_MAX};
use crate::solver::canonical_tier_order;
use crate::types::TierPosition;

/// Counts and examples for one value across whatever has been aggregated.
#[derive(Debug, Clone, Default)]
pub struct ValueSummary {
    pub count: u64,
    /// remoteness -> number of positions, win/lose/tie only
    pub histogram: Vec<u64>,
    /// the first position seen at each remoteness
    pub examples: FxHashMap<Remoteness, TierPosition>,
    /// position with the largest remoteness
    pub longest: Option<(Remoteness, TierPosition)>,
}

impl ValueSummary {
    fn new() -> Self {
        Self {
            count: 0,
            histogram: vec![0; usize::from(REMOTENESS_MAX) + 1],
            examples: FxHashMap::default(),
            longest: None,
        }
    }

    fn record(&mut self, tier_position: TierPosition, remoteness: Remoteness) {
        self.count += 1;
        self.histogram[usize::from(remoteness)] += 1;
        self.examples.entry(remoteness).or_insert(tier_position);
        if self.longest.map_or(true, |(r, _)| remoteness > r) {
            self.longest = Some((remoteness, tier_position));
        }
    }

    fn merge(&mut self, other: &Self) {
        self.count += other.count;
        for (into, from) in self.histogram.iter_mut().zip(&other.histogram) {
            *into += from;
        }
        for (remoteness, example) in &other.examples {
            self.examples.entry(*remoteness).or_insert(*example);
        }
        match (self.longest, other.longest) {
            (None, longest) => self.longest = longest,
            (Some((mine, _)), Some(longest)) if longest.0 > mine => {
                self.longest = Some(longest);
            }
            _ => (),
        }
    }
}

/// The aggregate. All counts are over canonical positions: with position
/// symmetry on, the database only records class representatives.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub win: ValueSummary,
    pub lose: ValueSummary,
    pub tie: ValueSummary,
    pub draw_count: u64,
    /// canonical legal positions carrying any value
    pub canonical_count: u64,
    /// sum of out-degrees over counted positions
    pub total_moves: u64,
    /// position with the most moves
    pub most_moves: Option<(usize, TierPosition)>,
}

impl Default for Analysis {
    fn default() -> Self {
        Self::new()
    }
}

impl Analysis {
    #[must_use]
    pub fn new() -> Self {
        Self {
            win: ValueSummary::new(),
            lose: ValueSummary::new(),
            tie: ValueSummary::new(),
            draw_count: 0,
            canonical_count: 0,
            total_moves: 0,
            most_moves: None,
        }
    }

    pub fn record(&mut self, tier_position: TierPosition, record: Record, out_degree: usize) {
        match record.value() {
            Value::Undecided => return,
            Value::Win => self.win.record(tier_position, record.remoteness()),
            Value::Lose => self.lose.record(tier_position, record.remoteness()),
            Value::Tie => self.tie.record(tier_position, record.remoteness()),
            Value::Draw => self.draw_count += 1,
        }
        self.canonical_count += 1;
        self.total_moves += out_degree as u64;
        if self.most_moves.map_or(true, |(n, _)| out_degree > n) {
            self.most_moves = Some((out_degree, tier_position));
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.win.merge(&other.win);
        self.lose.merge(&other.lose);
        self.tie.merge(&other.tie);
        self.draw_count += other.draw_count;
        self.canonical_count += other.canonical_count;
        self.total_moves += other.total_moves;
        match (self.most_moves, other.most_moves) {
            (None, most) => self.most_moves = most,
            (Some((mine, _)), Some(most)) if most.0 > mine => self.most_moves = Some(most),
            _ => (),
        }
    }

    #[must_use]
    pub fn ratio(&self, value: Value) -> f64 {
        if self.canonical_count == 0 {
            return 0.0;
        }
        let count = match value {
            Value::Win => self.win.count,
            Value::Lose => self.lose.count,
            Value::Tie => self.tie.count,
            Value::Draw => self.draw_count,
            Value::Undecided => 0,
        };
        count as f64 / self.canonical_count as f64
    }

    fn max_remoteness(&self) -> Remoteness {
        [&self.win, &self.lose, &self.tie]
            .iter()
            .filter_map(|summary| summary.longest.map(|(r, _)| r))
            .max()
            .unwrap_or(0)
    }
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>10} {:>12} {:>8}", "value", "count", "ratio")?;
        for (label, count) in [
            ("win", self.win.count),
            ("lose", self.lose.count),
            ("tie", self.tie.count),
            ("draw", self.draw_count),
        ] {
            let ratio = if self.canonical_count == 0 {
                0.0
            } else {
                count as f64 / self.canonical_count as f64
            };
            writeln!(f, "{label:>10} {count:>12} {ratio:>8.4}")?;
        }
        writeln!(f, "{:>10} {:>12}", "total", self.canonical_count)?;
        writeln!(f, "total moves: {}", self.total_moves)?;
        if let Some((degree, tier_position)) = self.most_moves {
            writeln!(f, "most moves: {degree} at {tier_position}")?;
        }

        let max = self.max_remoteness();
        writeln!(f, "{:>10} {:>10} {:>10} {:>10}", "rem", "win", "lose", "tie")?;
        for remoteness in 0..=max {
            let index = usize::from(remoteness);
            let (w, l, t) = (
                self.win.histogram[index],
                self.lose.histogram[index],
                self.tie.histogram[index],
            );
            if w + l + t > 0 {
                writeln!(f, "{remoteness:>10} {w:>10} {l:>10} {t:>10}")?;
            }
        }
        for (label, summary) in [("win", &self.win), ("lose", &self.lose), ("tie", &self.tie)] {
            if let Some((remoteness, tier_position)) = summary.longest {
                writeln!(f, "longest {label}: remoteness {remoteness} at {tier_position}")?;
            }
        }
        Ok(())
    }
}

/// Walks every canonical tier of a solved game and aggregates it.
pub fn analyze(game: &dyn Game, db: &dyn Database) -> Result<Analysis> {
    let order = canonical_tier_order(game)?;
    let mut total = Analysis::new();
    for &tier in &order {
        if !db.is_tier_solved(tier) {
            return Err(Error::Runtime(format!(
                "tier {tier} is not solved; run solve first"
            )));
        }
        let records = db.load_tier(tier)?;
        let mut per_tier = Analysis::new();
        for (position, record) in records.iter().enumerate() {
            let tier_position = TierPosition::new(tier, position as i64);
            if record.value() == Value::Undecided {
                continue;
            }
            let out_degree = game.generate_moves(tier_position).len();
            per_tier.record(tier_position, *record, out_degree);
        }
        debug!(
            "tier {tier}: {} win, {} lose, {} tie, {} draw",
            per_tier.win.count, per_tier.lose.count, per_tier.tie.count, per_tier.draw_count
        );
        total.merge(&per_tier);
    }
    Ok(total)
}
