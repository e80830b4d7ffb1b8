use std::fmt;

/// A position hash, dense within its tier. Negative values are reserved for
/// errors and sentinels.
pub type Position = i64;

/// Names a partition of the position space.
pub type Tier = i64;

/// Opaque to the core; only the game module interprets it.
pub type Move = i64;

pub type PositionArray = Vec<Position>;
pub type MoveArray = Vec<Move>;
pub type TierArray = Vec<Tier>;
pub type TierStack = Vec<Tier>;
pub type TierPositionArray = Vec<TierPosition>;

/// The globally unique identifier of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TierPosition {
    pub tier: Tier,
    pub position: Position,
}

impl TierPosition {
    #[must_use]
    pub const fn new(tier: Tier, position: Position) -> Self {
        Self { tier, position }
    }
}

impl fmt::Display for TierPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tier, self.position)
    }
}
