//! Wire protocol for the game and lobby WebSocket channels
//!
//! All messages are JSON objects discriminated by a `type` tag. Inbound
//! messages deserialize into an exhaustively-matched enum so a new message
//! kind cannot be silently unhandled.

use crate::amount::Amount;
use crate::models::{GameStateSnapshot, Match, Transaction, User};
use serde::{Deserialize, Serialize};

/// Client -> server messages on the game channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Binds an identity to this channel. Everything sent before a `join`
    /// is ignored.
    Join {
        #[serde(rename = "userId")]
        user_id: u64,
        username: String,
    },

    /// Creates a new wagered match with the sender seated at seat 0.
    CreateMatch {
        #[serde(rename = "userId")]
        user_id: u64,
        username: String,
        #[serde(rename = "betAmount")]
        bet_amount: Amount,
        #[serde(rename = "maxPlayers")]
        max_players: u8,
    },

    /// Takes the next free seat in an open match.
    JoinMatch {
        #[serde(rename = "userId")]
        user_id: u64,
        username: String,
        #[serde(rename = "matchId")]
        match_id: u64,
        #[serde(rename = "maxPlayers")]
        max_players: u8,
    },

    RollDice {
        #[serde(rename = "userId")]
        user_id: u64,
        #[serde(rename = "matchId")]
        match_id: u64,
    },

    MovePiece {
        #[serde(rename = "userId")]
        user_id: u64,
        #[serde(rename = "matchId")]
        match_id: u64,
        #[serde(rename = "pieceIndex")]
        piece_index: usize,
    },

    /// Resync hook: asks for a fresh snapshot of one match, delivered to the
    /// requester only. Used after a reconnect, since pushes in between were
    /// dropped best-effort.
    CurrentState {
        #[serde(rename = "userId")]
        user_id: u64,
        #[serde(rename = "matchId")]
        match_id: u64,
    },
}

/// Server -> client messages on the game channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    GameStateUpdate {
        #[serde(rename = "gameState")]
        game_state: GameStateSnapshot,
    },
}

/// Server -> client messages on the lobby/notification channel. Payloads
/// mirror the ledger and match entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LobbyEvent {
    UserUpdate {
        user: User,
    },
    BalanceUpdate {
        #[serde(rename = "userId")]
        user_id: u64,
        balance: Amount,
    },
    TransactionUpdate {
        transaction: Transaction,
    },
    TransactionDeleted {
        #[serde(rename = "transactionId")]
        transaction_id: u64,
    },
    MatchUpdate {
        #[serde(rename = "match")]
        match_record: Match,
    },
}
