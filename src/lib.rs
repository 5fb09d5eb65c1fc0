//! Authoritative server for two-player tic-tac-toe over a text
//! protocol on TCP.
//!
//! The first connection plays `X` (player 0), the second `O` (player 1).
//! Once both seats are taken the match starts and every accepted move is
//! broadcast to both players as a `GAME_STATE` message.

pub mod board;
pub mod config;
pub mod game;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use board::{Board, Cell, IllegalMove, Outcome, Player};
pub use config::ServerConfig;
pub use game::{MatchState, MoveRejection, Phase};
pub use protocol::{ClientMessage, FrameDecoder, ProtocolError, ServerMessage};
pub use registry::{ConnectionId, ConnectionRegistry, RegistryFull};
pub use session::GameSession;
