//! Text protocol spoken between the server and game clients.
//!
//! Server messages are `TAG:payload` or a bare `TAG`, written with no
//! terminator. Clients send `MOVE:<cell>`, optionally newline-terminated.
//! Neither side may assume one read is one message, so both directions are
//! split by [`FrameDecoder`].

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BytesMut};
use thiserror::Error;

use crate::board::{Board, BoardParseError, Outcome, Player};

/// Tags that can start a client frame
pub const CLIENT_TAGS: &[&[u8]] = &[b"MOVE:"];

/// Tags that can start a server frame
pub const SERVER_TAGS: &[&[u8]] = &[
    b"PLAYER:",
    b"GAME_STATE:",
    b"WAIT:",
    b"NOT_YOUR_TURN:",
    b"INVALID_MOVE:",
    b"OPPONENT_DISCONNECTED",
];

/// Initial capacity of a connection's read buffer.
pub const READ_BUFFER_SIZE: usize = 1024;

pub const WAIT_TEXT: &str = "Waiting for the second player.";
pub const NOT_YOUR_TURN_TEXT: &str = "It is not your turn.";
pub const INVALID_MOVE_TEXT: &str = "Invalid move.";
pub const CELL_OCCUPIED_TEXT: &str = "This cell is already occupied.";

/// Client -> Server messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `MOVE:<n>` with a base-10 cell index, not yet range checked
    Move(usize),
    /// `MOVE:` followed by something that is not a cell index
    MalformedMove(String),
    /// Anything else
    Other(String),
}

impl ClientMessage {
    pub fn decode(frame: &str) -> Self {
        let frame = frame.trim();
        match frame.strip_prefix("MOVE:") {
            Some(payload) => match payload.trim().parse::<usize>() {
                Ok(cell) => ClientMessage::Move(cell),
                Err(_) => ClientMessage::MalformedMove(payload.to_string()),
            },
            None => ClientMessage::Other(frame.to_string()),
        }
    }
}

impl fmt::Display for ClientMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientMessage::Move(cell) => write!(f, "MOVE:{cell}"),
            ClientMessage::MalformedMove(payload) => write!(f, "MOVE:{payload}"),
            ClientMessage::Other(text) => f.write_str(text),
        }
    }
}

/// Server -> Client messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Seat assignment, sent once on admission
    Player(Player),
    /// Authoritative board after pairing and after every accepted move
    GameState {
        board: Board,
        current: Player,
        outcome: Outcome,
    },
    /// A move arrived before the match started
    Wait(String),
    /// A move arrived from the player who is not on turn
    NotYourTurn(String),
    /// Malformed or illegal move
    InvalidMove(String),
    /// The other player left mid-match
    OpponentDisconnected,
}

impl ServerMessage {
    pub fn wait() -> Self {
        ServerMessage::Wait(WAIT_TEXT.to_string())
    }

    pub fn not_your_turn() -> Self {
        ServerMessage::NotYourTurn(NOT_YOUR_TURN_TEXT.to_string())
    }

    pub fn invalid_move() -> Self {
        ServerMessage::InvalidMove(INVALID_MOVE_TEXT.to_string())
    }

    pub fn cell_occupied() -> Self {
        ServerMessage::InvalidMove(CELL_OCCUPIED_TEXT.to_string())
    }

    /// Wire tag, the stable part of every message.
    pub fn tag(&self) -> &'static str {
        match self {
            ServerMessage::Player(_) => "PLAYER",
            ServerMessage::GameState { .. } => "GAME_STATE",
            ServerMessage::Wait(_) => "WAIT",
            ServerMessage::NotYourTurn(_) => "NOT_YOUR_TURN",
            ServerMessage::InvalidMove(_) => "INVALID_MOVE",
            ServerMessage::OpponentDisconnected => "OPPONENT_DISCONNECTED",
        }
    }
}

fn encode_outcome(outcome: Outcome) -> String {
    match outcome {
        Outcome::Continue => "CONTINUE".to_string(),
        Outcome::Win(player) => format!("WIN:{player}"),
        Outcome::Draw => "DRAW".to_string(),
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        match self {
            ServerMessage::Player(player) => write!(f, "{tag}:{}", player.number()),
            ServerMessage::GameState {
                board,
                current,
                outcome,
            } => write!(f, "{tag}:{board}|{current}|{}", encode_outcome(*outcome)),
            ServerMessage::Wait(text)
            | ServerMessage::NotYourTurn(text)
            | ServerMessage::InvalidMove(text) => write!(f, "{tag}:{text}"),
            ServerMessage::OpponentDisconnected => f.write_str(tag),
        }
    }
}

/// Failure to decode a server message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown message tag in {0:?}")]
    UnknownTag(String),
    #[error("missing payload for {0}")]
    MissingPayload(&'static str),
    #[error("invalid player {0:?}")]
    InvalidPlayer(String),
    #[error("invalid outcome {0:?}")]
    InvalidOutcome(String),
    #[error("malformed game state {0:?}")]
    MalformedGameState(String),
    #[error(transparent)]
    Board(#[from] BoardParseError),
}

fn parse_player_index(s: &str) -> Result<Player, ProtocolError> {
    s.parse::<usize>()
        .ok()
        .and_then(Player::from_index)
        .ok_or_else(|| ProtocolError::InvalidPlayer(s.to_string()))
}

fn parse_outcome(s: &str) -> Result<Outcome, ProtocolError> {
    match s {
        "CONTINUE" => Ok(Outcome::Continue),
        "DRAW" => Ok(Outcome::Draw),
        _ => match s.strip_prefix("WIN:") {
            Some(player) => Ok(Outcome::Win(parse_player_index(player)?)),
            None => Err(ProtocolError::InvalidOutcome(s.to_string())),
        },
    }
}

impl FromStr for ServerMessage {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (tag, payload) = match line.split_once(':') {
            Some((tag, payload)) => (tag, Some(payload)),
            None => (line, None),
        };

        let text = |tag: &'static str| {
            payload
                .map(str::to_string)
                .ok_or(ProtocolError::MissingPayload(tag))
        };

        match tag {
            "PLAYER" => {
                let payload = payload.ok_or(ProtocolError::MissingPayload("PLAYER"))?;
                payload
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(Player::from_index)
                    .map(ServerMessage::Player)
                    .ok_or_else(|| ProtocolError::InvalidPlayer(payload.to_string()))
            }
            "GAME_STATE" => {
                let payload = payload.ok_or(ProtocolError::MissingPayload("GAME_STATE"))?;
                let mut parts = payload.splitn(3, '|');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(board), Some(current), Some(outcome)) => Ok(ServerMessage::GameState {
                        board: board.parse()?,
                        current: parse_player_index(current)?,
                        outcome: parse_outcome(outcome)?,
                    }),
                    _ => Err(ProtocolError::MalformedGameState(payload.to_string())),
                }
            }
            "WAIT" => text("WAIT").map(ServerMessage::Wait),
            "NOT_YOUR_TURN" => text("NOT_YOUR_TURN").map(ServerMessage::NotYourTurn),
            "INVALID_MOVE" => text("INVALID_MOVE").map(ServerMessage::InvalidMove),
            "OPPONENT_DISCONNECTED" => Ok(ServerMessage::OpponentDisconnected),
            _ => Err(ProtocolError::UnknownTag(line.to_string())),
        }
    }
}

/// Splits a byte stream into frames.
///
/// A frame ends at `\n` or where the next known tag starts. An unterminated
/// remainder is released by [`FrameDecoder::flush`] at the end of a read,
/// unless it could still grow into a tag (`MO`, `MOVE:`, `OPPONENT_DIS`).
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    tags: &'static [&'static [u8]],
}

impl FrameDecoder {
    /// Decoder for frames sent by clients, used by the server.
    pub fn new() -> Self {
        Self::with_tags(CLIENT_TAGS)
    }

    /// Decoder for frames sent by the server, used by clients.
    pub fn for_server_messages() -> Self {
        Self::with_tags(SERVER_TAGS)
    }

    fn with_tags(tags: &'static [&'static [u8]]) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            tags,
        }
    }

    /// Buffer the socket reads into.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn skip_separators(&mut self) {
        let skip = self
            .buf
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        self.buf.advance(skip);
    }

    fn take(&mut self, len: usize) -> String {
        let frame = self.buf.split_to(len);
        String::from_utf8_lossy(&frame).trim().to_string()
    }

    fn next_tag(&self) -> Option<usize> {
        (1..self.buf.len()).find(|&pos| {
            self.tags
                .iter()
                .any(|tag| self.buf[pos..].starts_with(tag))
        })
    }

    /// Next complete frame, if any.
    pub fn next_frame(&mut self) -> Option<String> {
        self.skip_separators();
        if self.buf.is_empty() {
            return None;
        }

        let newline = self.buf.iter().position(|b| *b == b'\n');
        let end = match (newline, self.next_tag()) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return None,
        };
        Some(self.take(end))
    }

    /// Releases the unterminated remainder after a read.
    pub fn flush(&mut self) -> Option<String> {
        self.skip_separators();
        if self.buf.is_empty() || self.is_incomplete_tag() {
            return None;
        }
        let len = self.buf.len();
        Some(self.take(len))
    }

    /// A strict prefix of a tag, or a `TAG:` still waiting for its payload.
    fn is_incomplete_tag(&self) -> bool {
        self.tags.iter().any(|tag| {
            tag.starts_with(&self.buf) && (self.buf.len() < tag.len() || tag.ends_with(b":"))
        })
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
