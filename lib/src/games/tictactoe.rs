//! 3×3 Tic-Tac-Toe, tiered by the number of pieces on the board.
//!
//! Tier `t` holds exactly the boards with `t` pieces, so every move leaves
//! its tier and the whole game is immediate-transition. Each tier gets its
//! own hash context with exact piece counts; the side to move is implied
//! by the tier, so the contexts are single-player and carry no turn bit.

use crate::error::{Error, Result};
use crate::game::{Game, TierType};
use crate::indexer::{IndexerRegistry, IndexerSpec, PieceRange, PlayerMode};
use crate::record::Value;
use crate::types::{Move, MoveArray, Position, PositionArray, Tier, TierArray, TierPosition};

const BOARD_SIZE: usize = 9;
const NUM_TIERS: Tier = BOARD_SIZE as Tier + 1;

const BLANK: u8 = b'-';
const X: u8 = b'X';
const O: u8 = b'O';

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

// new_board[i] = old_board[SYMMETRIES[s][i]]
const SYMMETRIES: [[usize; 9]; 8] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8], // identity
    [6, 3, 0, 7, 4, 1, 8, 5, 2], // rotate 90
    [8, 7, 6, 5, 4, 3, 2, 1, 0], // rotate 180
    [2, 5, 8, 1, 4, 7, 0, 3, 6], // rotate 270
    [2, 1, 0, 5, 4, 3, 8, 7, 6], // mirror columns
    [6, 7, 8, 3, 4, 5, 0, 1, 2], // mirror rows
    [0, 3, 6, 1, 4, 7, 2, 5, 8], // main diagonal
    [8, 5, 2, 7, 4, 1, 6, 3, 0], // anti diagonal
];

pub struct TicTacToe {
    registry: IndexerRegistry,
}

/// Player to move in a tier: X moves on even piece counts.
fn turn_of_tier(tier: Tier) -> u8 {
    if tier % 2 == 0 {
        1
    } else {
        2
    }
}

fn piece_of_turn(turn: u8) -> u8 {
    if turn == 1 {
        X
    } else {
        O
    }
}

fn has_line(board: &[u8], piece: u8) -> bool {
    LINES
        .iter()
        .any(|line| line.iter().all(|cell| board[*cell] == piece))
}

impl TicTacToe {
    pub fn new(variant: Option<&str>) -> Result<Self> {
        match variant {
            None | Some("0") => (),
            Some(other) => {
                return Err(Error::InvalidArgument(format!(
                    "tictactoe has no variant \"{other}\""
                )))
            }
        }
        let mut registry = IndexerRegistry::new();
        for tier in 0..NUM_TIERS {
            let x_count = ((tier + 1) / 2) as u32;
            let o_count = (tier / 2) as u32;
            let blanks = (BOARD_SIZE as Tier - tier) as u32;
            let mode = if turn_of_tier(tier) == 1 {
                PlayerMode::First
            } else {
                PlayerMode::Second
            };
            let spec = IndexerSpec::new(
                BOARD_SIZE,
                mode,
                vec![
                    PieceRange::new(BLANK, blanks, blanks),
                    PieceRange::new(O, o_count, o_count),
                    PieceRange::new(X, x_count, x_count),
                ],
            );
            registry.add_context(tier, &spec)?;
        }
        Ok(Self { registry })
    }

    fn board_of(&self, tier_position: TierPosition) -> Vec<u8> {
        self.registry
            .unhash(tier_position.tier, tier_position.position)
            .expect("solver only passes positions within the tier")
            .0
    }

    fn hash_board(&self, tier: Tier, board: &[u8]) -> Position {
        self.registry
            .hash(tier, board, turn_of_tier(tier))
            .expect("boards built from legal moves stay hashable")
    }
}

impl Game for TicTacToe {
    fn name(&self) -> &'static str {
        "tictactoe"
    }

    fn initial_tier(&self) -> Tier {
        0
    }

    fn initial_position(&self) -> TierPosition {
        TierPosition::new(0, 0)
    }

    fn tier_size(&self, tier: Tier) -> i64 {
        self.registry
            .num_positions(tier)
            .expect("all ten tiers are registered")
    }

    fn child_tiers(&self, tier: Tier) -> TierArray {
        if tier + 1 < NUM_TIERS {
            vec![tier + 1]
        } else {
            Vec::new()
        }
    }

    fn generate_moves(&self, tier_position: TierPosition) -> MoveArray {
        if self.primitive(tier_position) != Value::Undecided {
            return MoveArray::new();
        }
        self.board_of(tier_position)
            .iter()
            .enumerate()
            .filter(|(_, cell)| **cell == BLANK)
            .map(|(i, _)| i as Move)
            .collect()
    }

    fn do_move(&self, tier_position: TierPosition, mov: Move) -> TierPosition {
        let mut board = self.board_of(tier_position);
        debug_assert_eq!(board[mov as usize], BLANK);
        board[mov as usize] = piece_of_turn(turn_of_tier(tier_position.tier));
        let child_tier = tier_position.tier + 1;
        TierPosition::new(child_tier, self.hash_board(child_tier, &board))
    }

    fn primitive(&self, tier_position: TierPosition) -> Value {
        let board = self.board_of(tier_position);
        let mover = piece_of_turn(turn_of_tier(tier_position.tier));
        let opponent = if mover == X { O } else { X };
        if has_line(&board, opponent) {
            Value::Lose
        } else if tier_position.tier == NUM_TIERS - 1 {
            Value::Tie
        } else {
            Value::Undecided
        }
    }

    fn is_legal_position(&self, tier_position: TierPosition) -> bool {
        // the player to move cannot already own a line: the game would
        // have ended on their previous move
        let board = self.board_of(tier_position);
        !has_line(&board, piece_of_turn(turn_of_tier(tier_position.tier)))
    }

    fn canonical_position(&self, tier_position: TierPosition) -> Position {
        let board = self.board_of(tier_position);
        SYMMETRIES
            .iter()
            .map(|map| {
                let mut transformed = [BLANK; BOARD_SIZE];
                for (i, source) in map.iter().enumerate() {
                    transformed[i] = board[*source];
                }
                self.hash_board(tier_position.tier, &transformed)
            })
            .min()
            .unwrap_or_else(|| unreachable!("eight symmetries"))
    }

    fn supports_parent_positions(&self) -> bool {
        true
    }

    fn canonical_parent_positions(
        &self,
        child: TierPosition,
        parent_tier: Tier,
    ) -> Option<PositionArray> {
        debug_assert_eq!(parent_tier + 1, child.tier);
        let board = self.board_of(child);
        let placed = piece_of_turn(turn_of_tier(parent_tier));
        let mut parents: PositionArray = board
            .iter()
            .enumerate()
            .filter(|(_, cell)| **cell == placed)
            .map(|(i, _)| {
                let mut parent_board = board.clone();
                parent_board[i] = BLANK;
                let parent = TierPosition::new(parent_tier, self.hash_board(parent_tier, &parent_board));
                self.canonical_position(parent)
            })
            .collect();
        parents.sort_unstable();
        parents.dedup();
        Some(parents)
    }

    fn tier_type(&self, _tier: Tier) -> TierType {
        TierType::ImmediateTransition
    }

    fn tier_name(&self, tier: Tier) -> Option<String> {
        Some(format!("{tier}pieces"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paste::paste;

    fn game() -> TicTacToe {
        TicTacToe::new(None).unwrap()
    }

    fn position_of(game: &TicTacToe, board: &[u8; 9]) -> TierPosition {
        let tier = board.iter().filter(|c| **c != BLANK).count() as Tier;
        TierPosition::new(tier, game.hash_board(tier, board))
    }

    #[test]
    fn test_rejects_unknown_variant() {
        assert!(TicTacToe::new(Some("misere")).is_err());
    }

    #[test]
    fn test_initial_position_is_the_empty_board() {
        let game = game();
        let initial = game.initial_position();
        assert_eq!(initial, TierPosition::new(0, 0));
        assert_eq!(game.board_of(initial), b"---------");
        assert_eq!(game.tier_size(0), 1);
    }

    #[test]
    fn test_tier_sizes_are_multinomials() {
        let game = game();
        assert_eq!(game.tier_size(1), 9); // 9 spots for the first X
        assert_eq!(game.tier_size(2), 72); // 9 * 8
        assert_eq!(game.tier_size(9), 126); // 9! / (4! 5!)
    }

    #[test]
    fn test_initial_moves_and_children() {
        let game = game();
        let moves = game.generate_moves(game.initial_position());
        assert_eq!(moves.len(), 9);
        for mov in moves {
            let child = game.do_move(game.initial_position(), mov);
            assert_eq!(child.tier, 1);
            let board = game.board_of(child);
            assert_eq!(board[mov as usize], X);
        }
        // all nine openings collapse to three canonical children
        assert_eq!(game.num_canonical_child_positions(game.initial_position()), 3);
    }

    // board, expected primitive value
    macro_rules! gen_tests_primitive {
        ($($fn_name:ident, $board:literal, $value:expr,)+) => {
            $(
            paste! {
                #[test]
                fn [<test_primitive_ $fn_name>]() {
                    let game = game();
                    let position = position_of(&game, $board);
                    assert_eq!(game.primitive(position), $value);
                }
            }
            )+
        }
    }

    gen_tests_primitive! {
        top_row_win, b"XXXOO----", Value::Lose,
        column_win, b"XO-XO-X--", Value::Lose,
        diagonal_win, b"XO--XO--X", Value::Lose,
        full_board_tie, b"XXOOOXXXO", Value::Tie,
        open_midgame, b"X-O------", Value::Undecided,
    }

    #[test]
    fn test_finished_games_offer_no_moves() {
        let game = game();
        let lost = position_of(&game, b"XXXOO----");
        assert!(game.is_legal_position(lost));
        assert_eq!(game.generate_moves(lost).len(), 0);
    }

    #[test]
    fn test_mover_with_line_is_illegal() {
        let game = game();
        // three X in a row with X to move again cannot be reached
        let board = position_of(&game, b"XXXOOO---");
        assert!(!game.is_legal_position(board));
    }

    #[test]
    fn test_canonical_position_is_idempotent_and_invariant() {
        let game = game();
        let position = position_of(&game, b"X-O--X---");
        let canonical = game.canonical_position(position);
        let again = game
            .canonical_position(TierPosition::new(position.tier, canonical));
        assert_eq!(canonical, again);

        // the same board rotated a quarter turn
        let rotated = position_of(&game, b"--X----XO");
        assert_eq!(game.canonical_position(rotated), canonical);
    }

    #[test]
    fn test_symmetry_maps_are_permutations() {
        for map in &SYMMETRIES {
            let mut seen = [false; 9];
            for source in map {
                assert!(!seen[*source]);
                seen[*source] = true;
            }
        }
    }

    #[test]
    fn test_parents_invert_children() {
        let game = game();
        let parent = position_of(&game, b"X-O------");
        let canonical_parent = game.canonical_position(parent);
        for child in game.canonical_child_positions(parent) {
            let parents = game
                .canonical_parent_positions(child, parent.tier)
                .unwrap();
            assert!(
                parents.contains(&canonical_parent),
                "child {child} does not list its parent"
            );
        }
    }
}
