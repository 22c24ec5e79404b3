//! Game Session: the per-match turn state machine
//!
//! Each match is owned by exactly one actor task consuming a serialized
//! command queue, so near-simultaneous messages for the same match apply one
//! at a time in arrival order with the turn-ownership check as the filter.
//! Settlement is awaited inside the actor, which means further commands for
//! the match queue behind it and no move can interleave with a payout.
//! Different matches run fully in parallel.
//!
//! Illegal actions (wrong turn, wrong phase, out-of-range piece) are ignored
//! without mutating state; they are debug-logged, never protocol errors.

use crate::dice::DiceRoller;
use crate::ledger::Ledger;
use crate::models::{GamePlayer, GameStateSnapshot, FINISH_THRESHOLD, PIECES_PER_PLAYER};
use crate::protocol::GameEvent;
use crate::registry::ConnectionRegistry;
use crate::settlement::SettlementEngine;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Commands the session actor processes, one at a time.
#[derive(Debug)]
pub enum SessionCommand {
    Join {
        user_id: u64,
        username: String,
    },
    RollDice {
        user_id: u64,
    },
    MovePiece {
        user_id: u64,
        piece_index: usize,
    },
    /// Push a fresh snapshot to one player only (reconnect resync).
    PushState {
        user_id: u64,
    },
    /// Programmatic snapshot request.
    Snapshot {
        reply: oneshot::Sender<GameStateSnapshot>,
    },
}

/// Cheap cloneable handle to a session actor's queue.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    match_id: u64,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn match_id(&self) -> u64 {
        self.match_id
    }

    /// Enqueue a command. A send failure means the session already ended
    /// (settled and evicted); late messages are dropped by design.
    pub fn send(&self, command: SessionCommand) {
        if self.tx.send(command).is_err() {
            debug!(
                "Session for match {} is gone, command dropped",
                self.match_id
            );
        }
    }

    /// Current state of the session, if the actor is still alive.
    pub async fn snapshot(&self) -> Option<GameStateSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot { reply });
        rx.await.ok()
    }
}

/// Result of applying a move to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveOutcome {
    Ignored,
    Advanced,
    Won,
}

/// Pure turn state machine, free of I/O so it can be tested directly.
#[derive(Debug)]
struct SessionState {
    match_id: u64,
    max_players: u8,
    players: Vec<GamePlayer>,
    current_turn: u64,
    dice_value: Option<u8>,
    winner: Option<u64>,
}

impl SessionState {
    fn new(match_id: u64, max_players: u8, creator_id: u64, creator_name: String) -> Self {
        let creator = GamePlayer::new(creator_id, creator_name, 0);
        Self {
            match_id,
            max_players,
            current_turn: creator.id,
            players: vec![creator],
            dice_value: None,
            winner: None,
        }
    }

    fn is_full(&self) -> bool {
        self.players.len() >= self.max_players as usize
    }

    fn seated(&self, user_id: u64) -> bool {
        self.players.iter().any(|p| p.id == user_id)
    }

    /// Seat a player at the next index. Returns false (ignored) on a full
    /// table, a finished match, or a duplicate join.
    fn join(&mut self, user_id: u64, username: String) -> bool {
        if self.winner.is_some() || self.is_full() || self.seated(user_id) {
            debug!(
                "Ignoring join by user {} on match {} (full, finished or duplicate)",
                user_id, self.match_id
            );
            return false;
        }
        let seat = self.players.len() as u8;
        self.players.push(GamePlayer::new(user_id, username, seat));
        true
    }

    /// Roll for the current-turn player. Ignored when the dice is already
    /// set (a second roll before moving changes nothing) or out of turn.
    fn roll(&mut self, user_id: u64, dice: &dyn DiceRoller) -> bool {
        if self.winner.is_some() || self.current_turn != user_id || self.dice_value.is_some() {
            debug!(
                "Ignoring roll by user {} on match {} (not their turn or dice pending)",
                user_id, self.match_id
            );
            return false;
        }
        self.dice_value = Some(dice.roll());
        true
    }

    /// Apply the pending dice to one piece. Movement is unconditional
    /// addition: no clamping, no capturing, no exact-exit rule. A single
    /// piece reaching the finish threshold ends the whole match.
    fn move_piece(&mut self, user_id: u64, piece_index: usize) -> MoveOutcome {
        if self.winner.is_some() || self.current_turn != user_id {
            debug!(
                "Ignoring move by user {} on match {} (not their turn)",
                user_id, self.match_id
            );
            return MoveOutcome::Ignored;
        }
        let dice = match self.dice_value {
            Some(d) => d,
            None => {
                debug!(
                    "Ignoring move by user {} on match {} (no dice rolled)",
                    user_id, self.match_id
                );
                return MoveOutcome::Ignored;
            }
        };
        if piece_index >= PIECES_PER_PLAYER {
            debug!(
                "Ignoring move by user {} on match {} (piece index {} out of range)",
                user_id, self.match_id, piece_index
            );
            return MoveOutcome::Ignored;
        }

        let seat = match self.players.iter().position(|p| p.id == user_id) {
            Some(seat) => seat,
            // current_turn always names a seated player, but never panic on
            // a protocol-driven path.
            None => return MoveOutcome::Ignored,
        };
        let new_position = self.players[seat].pieces[piece_index] + dice as u16;
        self.players[seat].pieces[piece_index] = new_position;
        self.dice_value = None;

        if new_position >= FINISH_THRESHOLD {
            self.winner = Some(user_id);
            MoveOutcome::Won
        } else {
            let next = (seat + 1) % self.players.len();
            self.current_turn = self.players[next].id;
            MoveOutcome::Advanced
        }
    }

    fn snapshot(&self) -> GameStateSnapshot {
        GameStateSnapshot {
            match_id: self.match_id,
            players: self.players.clone(),
            current_turn: self.current_turn,
            dice_value: self.dice_value,
            winner: self.winner,
        }
    }
}

/// Shared map from match id to the live session handle.
pub type SessionMap = Arc<DashMap<u64, SessionHandle>>;

/// Everything a session actor needs besides its own state.
pub struct SessionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub ledger: Arc<dyn Ledger>,
    pub settlement: Arc<SettlementEngine>,
    pub dice: Arc<dyn DiceRoller>,
    pub sessions: SessionMap,
}

/// Spawn the actor for a freshly created match, seeded with the creator at
/// seat 0, and broadcast the initial state.
pub fn spawn_session(
    ctx: Arc<SessionContext>,
    match_id: u64,
    max_players: u8,
    creator_id: u64,
    creator_name: String,
) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SessionHandle { match_id, tx };
    let state = SessionState::new(match_id, max_players, creator_id, creator_name);

    ctx.sessions.insert(match_id, handle.clone());
    tokio::spawn(run_session(ctx, state, rx));

    handle
}

async fn run_session(
    ctx: Arc<SessionContext>,
    mut state: SessionState,
    mut rx: mpsc::UnboundedReceiver<SessionCommand>,
) {
    let match_id = state.match_id;
    broadcast_state(&ctx.registry, &state);

    while let Some(command) = rx.recv().await {
        match command {
            SessionCommand::Join { user_id, username } => {
                if state.join(user_id, username) {
                    info!("User {} joined match {}", user_id, match_id);
                    if state.is_full() {
                        if let Err(e) = ctx.ledger.mark_match_playing(match_id).await {
                            warn!("Failed to mark match {} playing: {}", match_id, e);
                        }
                    }
                    broadcast_state(&ctx.registry, &state);
                }
            }
            SessionCommand::RollDice { user_id } => {
                if state.roll(user_id, ctx.dice.as_ref()) {
                    debug!(
                        "User {} rolled {} on match {}",
                        user_id,
                        state.dice_value.unwrap_or_default(),
                        match_id
                    );
                    broadcast_state(&ctx.registry, &state);
                }
            }
            SessionCommand::MovePiece {
                user_id,
                piece_index,
            } => match state.move_piece(user_id, piece_index) {
                MoveOutcome::Ignored => {}
                MoveOutcome::Advanced => broadcast_state(&ctx.registry, &state),
                MoveOutcome::Won => {
                    info!("🏆 User {} won match {}", user_id, match_id);
                    // Awaited here: no further command for this match is
                    // applied while its settlement is in flight.
                    if let Err(e) = ctx
                        .settlement
                        .settle(match_id, user_id, state.players.len() as u64)
                        .await
                    {
                        error!(
                            "Settlement for match {} failed after retries: {}",
                            match_id, e
                        );
                    }
                    broadcast_state(&ctx.registry, &state);
                    break;
                }
            },
            SessionCommand::PushState { user_id } => {
                if state.seated(user_id) {
                    ctx.registry.push_game(
                        user_id,
                        &GameEvent::GameStateUpdate {
                            game_state: state.snapshot(),
                        },
                    );
                }
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(state.snapshot());
            }
        }
    }

    // Terminal: final state has been broadcast, drop the session.
    ctx.sessions.remove(&match_id);
    info!("Session for match {} evicted", match_id);
}

fn broadcast_state(registry: &ConnectionRegistry, state: &SessionState) {
    let event = GameEvent::GameStateUpdate {
        game_state: state.snapshot(),
    };
    for player in &state.players {
        registry.push_game(player.id, &event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::ScriptedDice;

    fn three_player_state() -> SessionState {
        let mut state = SessionState::new(1, 3, 10, "a".into());
        assert!(state.join(20, "b".into()));
        assert!(state.join(30, "c".into()));
        state
    }

    #[test]
    fn test_join_capacity_and_contiguous_seats() {
        let mut state = SessionState::new(1, 2, 10, "a".into());
        assert!(state.join(20, "b".into()));
        assert!(!state.join(30, "c".into())); // table full
        assert!(!state.join(20, "b".into())); // duplicate

        let seats: Vec<u8> = state.players.iter().map(|p| p.position).collect();
        assert_eq!(seats, vec![0, 1]);
        assert_eq!(state.current_turn, 10);
    }

    #[test]
    fn test_second_roll_is_ignored() {
        let mut state = three_player_state();
        let dice = ScriptedDice::new(vec![4, 6]);

        assert!(state.roll(10, &dice));
        assert_eq!(state.dice_value, Some(4));
        // Same player rolling again, and another player rolling, both leave
        // the pending value untouched.
        assert!(!state.roll(10, &dice));
        assert!(!state.roll(20, &dice));
        assert_eq!(state.dice_value, Some(4));
    }

    #[test]
    fn test_non_turn_move_changes_nothing() {
        let mut state = three_player_state();
        let dice = ScriptedDice::new(vec![4]);
        state.roll(10, &dice);

        assert_eq!(state.move_piece(20, 0), MoveOutcome::Ignored);
        assert_eq!(state.players[1].pieces, [0, 0, 0, 0]);
        assert_eq!(state.current_turn, 10);
        assert_eq!(state.dice_value, Some(4));
    }

    #[test]
    fn test_move_without_roll_is_ignored() {
        let mut state = three_player_state();
        assert_eq!(state.move_piece(10, 0), MoveOutcome::Ignored);
        assert_eq!(state.players[0].pieces, [0, 0, 0, 0]);
    }

    #[test]
    fn test_out_of_range_piece_is_ignored() {
        let mut state = three_player_state();
        let dice = ScriptedDice::new(vec![4]);
        state.roll(10, &dice);
        assert_eq!(state.move_piece(10, 4), MoveOutcome::Ignored);
        assert_eq!(state.dice_value, Some(4));
    }

    #[test]
    fn test_turn_advances_round_robin_and_wraps() {
        let mut state = three_player_state();
        let dice = ScriptedDice::new(vec![2]);

        state.roll(10, &dice);
        assert_eq!(state.move_piece(10, 0), MoveOutcome::Advanced);
        assert_eq!(state.current_turn, 20);
        assert_eq!(state.dice_value, None);

        state.roll(20, &dice);
        assert_eq!(state.move_piece(20, 0), MoveOutcome::Advanced);
        assert_eq!(state.current_turn, 30);

        state.roll(30, &dice);
        assert_eq!(state.move_piece(30, 0), MoveOutcome::Advanced);
        assert_eq!(state.current_turn, 10);
    }

    #[test]
    fn test_movement_is_unconditional_addition() {
        let mut state = three_player_state();
        let dice = ScriptedDice::new(vec![5, 3]);

        state.roll(10, &dice);
        state.move_piece(10, 2);
        assert_eq!(state.players[0].pieces, [0, 0, 5, 0]);

        // Next lap for the same piece once the turn comes back.
        state.players[0].pieces[2] = 54;
        state.current_turn = 10;
        state.roll(10, &dice);
        assert_eq!(state.move_piece(10, 2), MoveOutcome::Won);
        assert_eq!(state.players[0].pieces[2], 57);
    }

    #[test]
    fn test_single_piece_at_threshold_wins() {
        let mut state = three_player_state();
        state.players[0].pieces = [55, 0, 0, 0];
        let dice = ScriptedDice::new(vec![1]);

        state.roll(10, &dice);
        assert_eq!(state.move_piece(10, 0), MoveOutcome::Won);
        assert_eq!(state.winner, Some(10));
        assert_eq!(state.dice_value, None);
        // Other pieces still at home; the single finished piece decides it.
        assert_eq!(&state.players[0].pieces[1..], &[0, 0, 0]);
    }

    #[test]
    fn test_no_action_after_win() {
        let mut state = three_player_state();
        state.players[0].pieces = [55, 0, 0, 0];
        let dice = ScriptedDice::new(vec![1, 6]);
        state.roll(10, &dice);
        state.move_piece(10, 0);

        assert!(!state.roll(20, &dice));
        assert_eq!(state.move_piece(20, 0), MoveOutcome::Ignored);
        assert!(!state.join(40, "d".into()));
    }
}
