//! The contract the solver consumes from each game module.

use crate::record::Value;
use crate::types::{Move, MoveArray, Position, Tier, TierArray, TierPosition, TierPositionArray};

/// Upper bound on the child tiers of any tier.
pub const MAX_CHILD_TIERS: usize = 128;

/// Upper bound on the moves available at any position.
pub const MAX_MOVES: usize = 4096;

/// How the position subgraph of a tier may look.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierType {
    /// Every move leaves the tier. Solvable by one forward scan.
    ImmediateTransition,
    /// Intra-tier moves exist but form no cycle.
    LoopFree,
    /// Intra-tier cycles are possible; requires full retrograde
    /// propagation. The safe default.
    Loopy,
}

/// A game module. The mandatory operations define the tier graph, the
/// position graph and the primitives; the provided methods are the
/// optional capabilities, whose defaults declare "no symmetry" and "no
/// parent generation".
///
/// Contracts the solver relies on:
/// - every canonicalization is idempotent and invariant under the game's
///   symmetry group;
/// - `child_tiers` and `canonical_child_positions` deduplicate;
/// - `is_legal_position` may over-approximate the reachable set but must
///   never exclude a reachable position;
/// - `canonical_parent_positions` may over-approximate by including
///   illegal positions (the solver filters them).
pub trait Game: Send + Sync {
    fn name(&self) -> &'static str;

    fn variant(&self) -> String {
        "0".to_string()
    }

    fn initial_tier(&self) -> Tier;

    fn initial_position(&self) -> TierPosition;

    /// Upper bound on the number of position hashes inside `tier`.
    fn tier_size(&self, tier: Tier) -> i64;

    /// At most [`MAX_CHILD_TIERS`] entries, deduplicated.
    fn child_tiers(&self, tier: Tier) -> TierArray;

    /// At most [`MAX_MOVES`] entries. Empty for primitive positions.
    fn generate_moves(&self, tier_position: TierPosition) -> MoveArray;

    fn do_move(&self, tier_position: TierPosition, mov: Move) -> TierPosition;

    /// `Undecided` for non-primitive positions.
    fn primitive(&self, tier_position: TierPosition) -> Value;

    fn is_legal_position(&self, tier_position: TierPosition) -> bool;

    /// Representative of `tier`'s symmetry class.
    fn canonical_tier(&self, tier: Tier) -> Tier {
        tier
    }

    /// Maps a position into a tier symmetric to its own. Only called with
    /// tiers of the same symmetry class.
    fn position_in_symmetric_tier(
        &self,
        tier_position: TierPosition,
        symmetric: Tier,
    ) -> Position {
        debug_assert_eq!(tier_position.tier, symmetric);
        tier_position.position
    }

    /// Representative of the position's symmetry class within its tier.
    fn canonical_position(&self, tier_position: TierPosition) -> Position {
        tier_position.position
    }

    /// Distinct canonical children of a position, with both tier and
    /// position symmetries applied. Games with a fused implementation
    /// should override this and
    /// [`num_canonical_child_positions`](Self::num_canonical_child_positions).
    fn canonical_child_positions(&self, tier_position: TierPosition) -> TierPositionArray {
        let mut children: TierPositionArray = self
            .generate_moves(tier_position)
            .into_iter()
            .map(|mov| {
                let child = self.do_move(tier_position, mov);
                let tier = self.canonical_tier(child.tier);
                let position = if tier == child.tier {
                    child.position
                } else {
                    self.position_in_symmetric_tier(child, tier)
                };
                let mapped = TierPosition::new(tier, position);
                TierPosition::new(tier, self.canonical_position(mapped))
            })
            .collect();
        children.sort_unstable_by_key(|child| (child.tier, child.position));
        children.dedup();
        children
    }

    fn num_canonical_child_positions(&self, tier_position: TierPosition) -> usize {
        self.canonical_child_positions(tier_position).len()
    }

    /// Whether [`canonical_parent_positions`](Self::canonical_parent_positions)
    /// is implemented. When false, the solver materializes the reverse
    /// graph for every loopy tier. Games overriding one must override
    /// both.
    fn supports_parent_positions(&self) -> bool {
        false
    }

    /// Canonical positions of `parent_tier` with a move into `child`.
    /// `None` means unsupported, in which case the solver materializes the
    /// reverse graph instead.
    fn canonical_parent_positions(
        &self,
        child: TierPosition,
        parent_tier: Tier,
    ) -> Option<crate::types::PositionArray> {
        let _ = (child, parent_tier);
        None
    }

    fn tier_type(&self, tier: Tier) -> TierType {
        let _ = tier;
        TierType::Loopy
    }

    /// Database file name for `tier` (at most 31 characters); `None` names
    /// the file after the decimal tier.
    fn tier_name(&self, tier: Tier) -> Option<String> {
        let _ = tier;
        None
    }
}
