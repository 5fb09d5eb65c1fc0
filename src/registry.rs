use std::fmt;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::board::Player;
use crate::protocol::ServerMessage;

/// Sender channel for a connected client
pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

/// Identifies one accepted connection for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Both seats are taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("both player slots are occupied")]
pub struct RegistryFull;

/// A connection occupying one seat
#[derive(Debug, Clone)]
struct Slot {
    id: ConnectionId,
    sender: ClientSender,
}

/// Fixed two-seat table of connected players
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    slots: [Option<Slot>; 2],
    next_id: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seats a connection in the lowest free slot.
    pub fn admit(&mut self, sender: ClientSender) -> Result<(ConnectionId, Player), RegistryFull> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(RegistryFull)?;
        let player = Player::from_index(index).ok_or(RegistryFull)?;

        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.slots[index] = Some(Slot { id, sender });

        Ok((id, player))
    }

    /// Frees the slot held by `id`. Returns the player it was seated as, or
    /// `None` if the connection was already removed.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Player> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|slot| slot.id == id))?;
        self.slots[index] = None;
        Player::from_index(index)
    }

    pub fn count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Sends to every seated connection
    pub fn broadcast(&self, msg: &ServerMessage) {
        for slot in self.slots.iter().flatten() {
            let _ = slot.sender.send(msg.clone());
        }
    }

    /// Sends to one seat; a vacant seat or closed channel is skipped
    pub fn send_to(&self, player: Player, msg: ServerMessage) {
        if let Some(slot) = &self.slots[player.index()] {
            let _ = slot.sender.send(msg);
        }
    }
}
