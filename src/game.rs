//! Match state machine: board, turn owner and phase.

use thiserror::Error;
use tracing::info;

use crate::board::{Board, IllegalMove, Outcome, Player};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    WaitingForPlayers,
    InProgress,
    Finished(Outcome),
}

/// Why a submitted move left the match unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MoveRejection {
    #[error("no match in progress")]
    NotInProgress,
    #[error("it is player {current}'s turn")]
    NotYourTurn { current: Player },
    #[error(transparent)]
    Illegal(#[from] IllegalMove),
}

#[derive(Debug, Clone)]
pub struct MatchState {
    board: Board,
    current: Player,
    phase: Phase,
}

impl Default for MatchState {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchState {
    pub fn new() -> Self {
        Self {
            board: Board::new(),
            current: Player::First,
            phase: Phase::WaitingForPlayers,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn current_player(&self) -> Player {
        self.current
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_in_progress(&self) -> bool {
        self.phase == Phase::InProgress
    }

    /// Outcome of the current board.
    pub fn outcome(&self) -> Outcome {
        self.board.evaluate()
    }

    /// Starts a fresh match. Called when the second player is paired.
    pub fn start(&mut self) {
        self.board.reset();
        self.current = Player::First;
        self.phase = Phase::InProgress;
        info!("Match started, player {} to move", self.current);
    }

    /// Returns to waiting after a player left. Returns `true` if a match was
    /// interrupted, i.e. the remaining player must be told.
    pub fn abandon(&mut self) -> bool {
        let interrupted = self.is_in_progress();
        self.phase = Phase::WaitingForPlayers;
        interrupted
    }

    /// Applies `player`'s move to `cell`. On success the turn passes to the
    /// opponent if the game continues; otherwise the match finishes with the
    /// turn owner unchanged.
    pub fn play(&mut self, player: Player, cell: usize) -> Result<Outcome, MoveRejection> {
        if !self.is_in_progress() {
            return Err(MoveRejection::NotInProgress);
        }
        if player != self.current {
            return Err(MoveRejection::NotYourTurn {
                current: self.current,
            });
        }

        self.board.apply_move(cell, player)?;

        let outcome = self.board.evaluate();
        match outcome {
            Outcome::Continue => self.current = player.opponent(),
            Outcome::Win(_) | Outcome::Draw => {
                self.phase = Phase::Finished(outcome);
                info!("Match finished: {:?}", outcome);
            }
        }
        Ok(outcome)
    }
}
