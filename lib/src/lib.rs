#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::module_name_repetitions
)]

mod analysis;
mod compression;
mod containers;
mod db;
mod error;
mod frontier;
mod game;
pub mod games;
mod indexer;
mod manager;
mod record;
mod reverse_graph;
mod solver;
mod tier_worker;
mod types;

pub use crate::analysis::{analyze, Analysis, ValueSummary};
pub use crate::compression::{DecodedBlock, EncoderDecoder};
pub use crate::containers::{cantor_pairing, Int64HashMap, Int64Queue, TierPositionSet};
pub use crate::db::{BlockDb, BlockProbe, Database, Probe, SolvingTier, MAX_TIER_FILE_NAME_LEN};
pub use crate::error::{Error, Result};
pub use crate::frontier::{Frontier, PaddedFrontier};
pub use crate::game::{Game, TierType, MAX_CHILD_TIERS, MAX_MOVES};
pub use crate::indexer::{
    rearrangements, GenericIndexer, IndexerRegistry, IndexerSpec, PieceRange, PlayerMode,
    DEFAULT_CONTEXT, MAX_PIECE_TYPES,
};
pub use crate::manager::{Manager, PartMove, QueryMove, QueryResponse, SolveOptions};
pub use crate::record::{Record, Remoteness, Value, REMOTENESS_MAX};
pub use crate::reverse_graph::{FrozenReverseGraph, ReverseGraph};
pub use crate::solver::{SolveReport, TierSolver};
pub use crate::types::{
    Move, MoveArray, Position, PositionArray, Tier, TierArray, TierPosition, TierPositionArray,
    TierStack,
};
