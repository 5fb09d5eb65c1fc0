use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::{debug, info};

use crate::board::{IllegalMove, Outcome, Player};
use crate::game::{MatchState, MoveRejection, Phase};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::{ClientSender, ConnectionId, ConnectionRegistry, RegistryFull};

/// A seat handed out by [`GameSession::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub id: ConnectionId,
    pub player: Player,
}

/// Shared match: the registry and match state behind one lock.
///
/// Every admission, inbound message and removal is processed while holding
/// the lock, so at most one of them touches the match at a time. Outbound
/// messages go through per-connection channels and never block on sockets.
#[derive(Debug, Clone, Default)]
pub struct GameSession {
    inner: Arc<Mutex<SessionInner>>,
    slot_freed: Arc<Notify>,
}

#[derive(Debug, Default)]
struct SessionInner {
    registry: ConnectionRegistry,
    game: MatchState,
}

impl SessionInner {
    fn game_state(&self) -> ServerMessage {
        ServerMessage::GameState {
            board: *self.game.board(),
            current: self.game.current_player(),
            outcome: self.game.outcome(),
        }
    }
}

impl GameSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        // State is only mutated by non-panicking code, so a poisoned lock
        // still holds a consistent match.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seats a new connection, announces its player number and starts the
    /// match when this fills the second seat.
    pub fn admit(&self, sender: ClientSender) -> Result<Admission, RegistryFull> {
        let mut inner = self.lock();
        let (id, player) = inner.registry.admit(sender)?;

        inner.registry.send_to(player, ServerMessage::Player(player));

        if inner.registry.is_full() {
            inner.game.start();
            let state = inner.game_state();
            inner.registry.broadcast(&state);
        }

        Ok(Admission { id, player })
    }

    /// Frees the connection's seat. An interrupted match ends and the
    /// remaining player is told. Calling this twice for one id is harmless.
    pub fn disconnect(&self, id: ConnectionId) {
        let mut inner = self.lock();
        let Some(player) = inner.registry.remove(id) else {
            return;
        };

        if inner.game.abandon() {
            info!("Player {} left mid-match, match abandoned", player.number());
            inner.registry.broadcast(&ServerMessage::OpponentDisconnected);
        }
        drop(inner);

        self.slot_freed.notify_one();
    }

    /// Handles one inbound frame from `player`. Rejections are sent to the
    /// sender only; an accepted move is broadcast as the new game state.
    pub fn handle_message(&self, player: Player, msg: ClientMessage) {
        let mut inner = self.lock();

        if !inner.game.is_in_progress() || !inner.registry.is_full() {
            debug!("Player {} sent {} before the match started", player.number(), msg);
            inner.registry.send_to(player, ServerMessage::wait());
            return;
        }

        if inner.game.current_player() != player {
            debug!("Player {} moved out of turn", player.number());
            inner.registry.send_to(player, ServerMessage::not_your_turn());
            return;
        }

        let cell = match msg {
            ClientMessage::Move(cell) => cell,
            ClientMessage::MalformedMove(payload) => {
                debug!("Player {} sent malformed move {:?}", player.number(), payload);
                inner.registry.send_to(player, ServerMessage::invalid_move());
                return;
            }
            ClientMessage::Other(text) => {
                debug!("Ignoring {:?} from player {}", text, player.number());
                return;
            }
        };

        match inner.game.play(player, cell) {
            Ok(outcome) => {
                info!(
                    "Player {} marked cell {} ({:?})",
                    player.number(),
                    cell,
                    outcome
                );
                let state = inner.game_state();
                inner.registry.broadcast(&state);
            }
            Err(MoveRejection::Illegal(IllegalMove::Occupied(_))) => {
                inner.registry.send_to(player, ServerMessage::cell_occupied());
            }
            Err(MoveRejection::Illegal(IllegalMove::OutOfRange(_))) => {
                inner.registry.send_to(player, ServerMessage::invalid_move());
            }
            // Both checked above under the same lock.
            Err(MoveRejection::NotInProgress) => {
                inner.registry.send_to(player, ServerMessage::wait());
            }
            Err(MoveRejection::NotYourTurn { .. }) => {
                inner.registry.send_to(player, ServerMessage::not_your_turn());
            }
        }
    }

    pub fn is_full(&self) -> bool {
        self.lock().registry.is_full()
    }

    pub fn player_count(&self) -> usize {
        self.lock().registry.count()
    }

    pub fn phase(&self) -> Phase {
        self.lock().game.phase()
    }

    pub fn outcome(&self) -> Outcome {
        self.lock().game.outcome()
    }

    /// Resolves once a seat is free. Wakes on [`GameSession::disconnect`]
    /// instead of polling.
    pub async fn wait_for_free_slot(&self) {
        loop {
            let notified = self.slot_freed.notified();
            if !self.is_full() {
                return;
            }
            notified.await;
        }
    }

    /// Guard that disconnects `id` when dropped.
    pub fn guard(&self, id: ConnectionId) -> ConnectionGuard {
        ConnectionGuard {
            session: self.clone(),
            id,
        }
    }
}

/// Frees a seat on every exit path of a connection task, including abort
/// and panic.
#[derive(Debug)]
pub struct ConnectionGuard {
    session: GameSession,
    id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.session.disconnect(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Board;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct Client {
        admission: Admission,
        rx: UnboundedReceiver<ServerMessage>,
    }

    impl Client {
        fn join(session: &GameSession) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let admission = session.admit(tx).unwrap();
            Self { admission, rx }
        }

        fn recv(&mut self) -> ServerMessage {
            self.rx.try_recv().unwrap()
        }

        fn assert_idle(&mut self) {
            assert!(self.rx.try_recv().is_err());
        }

        fn send(&self, session: &GameSession, frame: &str) {
            session.handle_message(self.admission.player, ClientMessage::decode(frame));
        }
    }

    fn game_state(board: &str, current: Player, outcome: Outcome) -> ServerMessage {
        ServerMessage::GameState {
            board: board.parse().unwrap(),
            current,
            outcome,
        }
    }

    fn paired() -> (GameSession, Client, Client) {
        let session = GameSession::new();
        let mut a = Client::join(&session);
        let mut b = Client::join(&session);
        let start = game_state("         ", Player::First, Outcome::Continue);
        assert_eq!(a.recv(), ServerMessage::Player(Player::First));
        assert_eq!(a.recv(), start);
        assert_eq!(b.recv(), ServerMessage::Player(Player::Second));
        assert_eq!(b.recv(), start);
        (session, a, b)
    }

    #[test]
    fn lone_player_is_told_to_wait() {
        let session = GameSession::new();
        let mut a = Client::join(&session);
        assert_eq!(a.recv(), ServerMessage::Player(Player::First));

        a.send(&session, "MOVE:0");
        assert_eq!(a.recv(), ServerMessage::wait());
        a.send(&session, "anything");
        assert_eq!(a.recv(), ServerMessage::wait());
        assert_eq!(session.phase(), Phase::WaitingForPlayers);
    }

    #[test]
    fn pairing_starts_match() {
        let (session, _a, _b) = paired();
        assert!(session.is_full());
        assert_eq!(session.phase(), Phase::InProgress);
    }

    #[test]
    fn third_connection_is_rejected() {
        let (session, _a, _b) = paired();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(session.admit(tx), Err(RegistryFull));
    }

    #[test]
    fn accepted_move_is_broadcast() {
        let (session, mut a, mut b) = paired();
        a.send(&session, "MOVE:4");
        let expected = game_state("    X    ", Player::Second, Outcome::Continue);
        assert_eq!(a.recv(), expected);
        assert_eq!(b.recv(), expected);
    }

    #[test]
    fn out_of_turn_is_unicast() {
        let (session, mut a, mut b) = paired();
        b.send(&session, "MOVE:0");
        assert_eq!(b.recv(), ServerMessage::not_your_turn());
        a.assert_idle();

        a.send(&session, "MOVE:4");
        a.recv();
        b.recv();
        a.send(&session, "MOVE:0");
        assert_eq!(a.recv(), ServerMessage::not_your_turn());
        b.assert_idle();
    }

    #[test]
    fn invalid_moves_are_rejected_without_state_change() {
        let (session, mut a, mut b) = paired();
        a.send(&session, "MOVE:4");
        a.recv();
        b.recv();

        b.send(&session, "MOVE:4");
        assert_eq!(b.recv(), ServerMessage::cell_occupied());
        b.send(&session, "MOVE:9");
        assert_eq!(b.recv(), ServerMessage::invalid_move());
        b.send(&session, "MOVE:x");
        assert_eq!(b.recv(), ServerMessage::invalid_move());
        b.send(&session, "PING");
        b.assert_idle();
        a.assert_idle();

        b.send(&session, "MOVE:0");
        let expected = game_state("O   X    ", Player::First, Outcome::Continue);
        assert_eq!(a.recv(), expected);
        assert_eq!(b.recv(), expected);
    }

    #[test]
    fn winning_move_finishes_match() {
        let (session, mut a, mut b) = paired();
        for (player, cell) in [(0, 4), (1, 1), (0, 0), (1, 5), (0, 3), (1, 2), (0, 6)] {
            let client = if player == 0 { &a } else { &b };
            client.send(&session, &format!("MOVE:{cell}"));
            a.recv();
            b.recv();
        }
        assert_eq!(session.phase(), Phase::Finished(Outcome::Win(Player::First)));

        b.send(&session, "MOVE:8");
        assert_eq!(b.recv(), ServerMessage::wait());
    }

    #[test]
    fn disconnect_mid_match_notifies_survivor_once() {
        let (session, mut a, b) = paired();
        session.disconnect(b.admission.id);
        session.disconnect(b.admission.id);

        assert_eq!(a.recv(), ServerMessage::OpponentDisconnected);
        a.assert_idle();
        assert_eq!(session.phase(), Phase::WaitingForPlayers);
        assert_eq!(session.player_count(), 1);
    }

    #[test]
    fn survivor_pairs_with_new_player_on_fresh_board() {
        let (session, mut a, b) = paired();
        a.send(&session, "MOVE:4");
        a.recv();
        session.disconnect(b.admission.id);
        assert_eq!(a.recv(), ServerMessage::OpponentDisconnected);

        let mut c = Client::join(&session);
        let start = game_state("         ", Player::First, Outcome::Continue);
        assert_eq!(c.recv(), ServerMessage::Player(Player::Second));
        assert_eq!(c.recv(), start);
        assert_eq!(a.recv(), start);
        assert_eq!(session.outcome(), Board::new().evaluate());
    }

    #[test]
    fn disconnect_after_finish_sends_no_notice() {
        let (session, mut a, mut b) = paired();
        for cell in [0, 3, 1, 4, 2] {
            let client = if cell == 3 || cell == 4 { &b } else { &a };
            client.send(&session, &format!("MOVE:{cell}"));
            a.recv();
            b.recv();
        }
        assert_eq!(session.phase(), Phase::Finished(Outcome::Win(Player::First)));

        session.disconnect(b.admission.id);
        a.assert_idle();
        assert_eq!(session.phase(), Phase::WaitingForPlayers);
    }

    #[test]
    fn guard_frees_slot_on_drop() {
        let (session, mut a, b) = paired();
        let guard = session.guard(b.admission.id);
        drop(guard);
        assert_eq!(a.recv(), ServerMessage::OpponentDisconnected);
        assert!(!session.is_full());
    }

    #[tokio::test]
    async fn free_slot_wakes_waiter() {
        let (session, _a, b) = paired();
        let waiter = tokio::spawn({
            let session = session.clone();
            async move { session.wait_for_free_slot().await }
        });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        session.disconnect(b.admission.id);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
