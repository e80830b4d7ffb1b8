//! Single-active-game lifecycle: one game, one database, one solver at a
//! time, held by an explicit context object rather than process globals.

use std::path::Path;

use serde::Serialize;

use crate::analysis::{analyze, Analysis};
use crate::db::{BlockDb, Database};
use crate::error::Result;
use crate::game::Game;
use crate::record::{Remoteness, Value};
use crate::solver::{SolveReport, TierSolver};
use crate::types::TierPosition;

/// Options shared by solve and analyze.
#[derive(Debug, Clone, Default)]
pub struct SolveOptions {
    /// Re-solve tiers already on disk.
    pub force: bool,
    /// Progress bars and chattier logging.
    pub verbose: bool,
    /// Soft per-tier memory bound in bytes; exceeding it warns.
    pub memory_limit: Option<u64>,
    /// Worker threads; defaults to `GAMESMAN_THREADS` or the hardware.
    pub workers: Option<usize>,
}

/// One move of a query response, probed against the database.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMove {
    #[serde(rename = "move")]
    pub mov: String,
    pub autogui_move: String,
    pub from: String,
    pub to: String,
    pub full: String,
    pub position: String,
    pub position_value: &'static str,
    pub remoteness: Remoteness,
}

/// Alias kept for the web front-end's "partMoves" wire field.
pub type PartMove = QueryMove;

/// The JSON body served to the web front-end for one position.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub position: String,
    pub autogui_position: String,
    pub position_value: &'static str,
    pub remoteness: Remoteness,
    pub moves: Vec<QueryMove>,
    pub part_moves: Vec<PartMove>,
}

pub struct Manager {
    game: Box<dyn Game>,
    db: BlockDb,
}

impl Manager {
    /// Binds `game` to its database directory under `data_path`.
    pub fn init(game: Box<dyn Game>, data_path: &Path) -> Result<Self> {
        let db = BlockDb::new(data_path, game.name(), &game.variant())?;
        let mut manager = Self { game, db };
        manager.register_tier_names()?;
        Ok(manager)
    }

    /// Game-supplied tier file names must be known before any read.
    fn register_tier_names(&mut self) -> Result<()> {
        let order = crate::solver::canonical_tier_order(self.game.as_ref())?;
        for tier in order {
            if let Some(name) = self.game.tier_name(tier) {
                self.db.register_tier_name(tier, &name)?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn game(&self) -> &dyn Game {
        self.game.as_ref()
    }

    pub fn solve(&mut self, options: &SolveOptions) -> Result<SolveReport> {
        let solver = TierSolver::new(self.game.as_ref())
            .with_verbose(options.verbose)
            .with_memory_limit(options.memory_limit)
            .with_workers(options.workers.unwrap_or(0));
        solver.solve(&mut self.db, options.force)
    }

    pub fn analyze(&mut self, options: &SolveOptions) -> Result<Analysis> {
        // analysis runs over a complete database; solve skips whatever is
        // already on disk
        self.solve(options)?;
        analyze(self.game.as_ref(), &self.db)
    }

    /// Canonical representative of an arbitrary tier position: symmetric
    /// tier first, then the position's class representative.
    #[must_use]
    pub fn canonicalize(&self, tier_position: TierPosition) -> TierPosition {
        let tier = self.game.canonical_tier(tier_position.tier);
        let position = if tier == tier_position.tier {
            tier_position.position
        } else {
            self.game.position_in_symmetric_tier(tier_position, tier)
        };
        let mapped = TierPosition::new(tier, position);
        TierPosition::new(tier, self.game.canonical_position(mapped))
    }

    pub fn get_value(&self, tier_position: TierPosition) -> Result<Value> {
        self.db.probe_init().value(self.canonicalize(tier_position))
    }

    pub fn get_remoteness(&self, tier_position: TierPosition) -> Result<Remoteness> {
        self.db
            .probe_init()
            .remoteness(self.canonicalize(tier_position))
    }

    /// The response the web front-end consumes: the position's own label
    /// plus one probed entry per legal move.
    pub fn query(&self, tier_position: TierPosition) -> Result<QueryResponse> {
        let mut probe = self.db.probe_init();
        let record = probe.record(self.canonicalize(tier_position))?;
        let mut moves = Vec::new();
        for mov in self.game.generate_moves(tier_position) {
            let child = self.game.do_move(tier_position, mov);
            let child_record = probe.record(self.canonicalize(child))?;
            moves.push(QueryMove {
                mov: mov.to_string(),
                autogui_move: mov.to_string(),
                from: tier_position.to_string(),
                to: child.to_string(),
                full: child.to_string(),
                position: child.to_string(),
                position_value: child_record.value().as_str(),
                remoteness: child_record.remoteness(),
            });
        }
        Ok(QueryResponse {
            position: tier_position.to_string(),
            autogui_position: tier_position.to_string(),
            position_value: record.value().as_str(),
            remoteness: record.remoteness(),
            moves,
            part_moves: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::tictactoe::TicTacToe;
    use std::path::PathBuf;

    fn scratch_dir(test: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("gamesman-manager-tests")
            .join(format!("{test}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_unsolved_game_probes_as_unsolved() {
        let dir = scratch_dir("unsolved");
        let game = Box::new(TicTacToe::new(None).unwrap());
        let manager = Manager::init(game, &dir).unwrap();
        let initial = manager.game().initial_position();
        assert_eq!(manager.get_value(initial).unwrap(), Value::Undecided);
        assert_eq!(manager.get_remoteness(initial).unwrap(), 0);
    }

    #[test]
    fn test_query_serializes_with_wire_names() {
        let response = QueryResponse {
            position: "0:0".into(),
            autogui_position: "0:0".into(),
            position_value: Value::Tie.as_str(),
            remoteness: 9,
            moves: vec![QueryMove {
                mov: "4".into(),
                autogui_move: "4".into(),
                from: "0:0".into(),
                to: "1:4".into(),
                full: "1:4".into(),
                position: "1:4".into(),
                position_value: Value::Tie.as_str(),
                remoteness: 8,
            }],
            part_moves: Vec::new(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["positionValue"], "tie");
        assert_eq!(json["partMoves"], serde_json::json!([]));
        assert_eq!(json["moves"][0]["move"], "4");
        assert_eq!(json["moves"][0]["autoguiMove"], "4");
    }
}
