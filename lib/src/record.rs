use std::fmt;

/// Number of plies to the end of the game under optimal play; 0 for
/// primitive positions. Fits in 10 bits on disk.
pub type Remoteness = u16;

pub const REMOTENESS_MAX: Remoteness = 1023;

const VALUE_BITS: u16 = 3;
const VALUE_MASK: u16 = (1 << VALUE_BITS) - 1;

/// Game-theoretic value of a position. `Undecided` is the numeric zero so
/// that zero-initialized storage means "not yet solved".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Value {
    #[default]
    Undecided = 0,
    Lose = 1,
    Draw = 2,
    Tie = 3,
    Win = 4,
}

impl Value {
    #[must_use]
    pub fn from_raw_u8(u: u8) -> Option<Self> {
        match u {
            0 => Some(Self::Undecided),
            1 => Some(Self::Lose),
            2 => Some(Self::Draw),
            3 => Some(Self::Tie),
            4 => Some(Self::Win),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_raw_u8(self) -> u8 {
        self as u8
    }

    /// The wire spelling used by the web front-end.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undecided => "unsolved",
            Self::Lose => "lose",
            Self::Draw => "draw",
            Self::Tie => "tie",
            Self::Win => "win",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A solved (value, remoteness) pair packed into 16 bits: value in the low
/// 3 bits, remoteness in the next 10. The all-zero record is
/// (Undecided, 0).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Record(u16);

impl Record {
    #[must_use]
    pub fn new(value: Value, remoteness: Remoteness) -> Self {
        debug_assert!(remoteness <= REMOTENESS_MAX);
        Self(u16::from(value.as_raw_u8()) | (remoteness << VALUE_BITS))
    }

    #[must_use]
    pub fn value(self) -> Value {
        Value::from_raw_u8((self.0 & VALUE_MASK) as u8)
            .unwrap_or_else(|| unreachable!("record holds a 3-bit value"))
    }

    #[must_use]
    pub fn remoteness(self) -> Remoteness {
        self.0 >> VALUE_BITS
    }

    #[must_use]
    pub fn from_raw_u16(u: u16) -> Self {
        Self(u)
    }

    #[must_use]
    pub fn as_raw_u16(self) -> u16 {
        self.0
    }
}
