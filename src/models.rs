//! Core data model: users, matches, transactions, and live game state
//!
//! Wire representations use camelCase field names and decimal-string money,
//! matching what lobby and game clients consume.

use crate::amount::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position at which a piece (and with it the match) counts as finished.
pub const FINISH_THRESHOLD: u16 = 56;

/// Number of pieces each player races around the board.
pub const PIECES_PER_PLAYER: usize = 4;

/// A registered account as the ledger stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u64,
    pub username: String,
    pub balance: Amount,
    pub referral_code: String,
    /// User id of whoever referred this account, if any. Drives the
    /// referral commission at settlement time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referred_by: Option<u64>,
}

/// Lifecycle of a wagered match. Transitions are monotonic: a match never
/// reverts to an earlier status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Waiting,
    Playing,
    Finished,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStatus::Waiting => write!(f, "waiting"),
            MatchStatus::Playing => write!(f, "playing"),
            MatchStatus::Finished => write!(f, "finished"),
        }
    }
}

/// Durable record of a wagered match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: u64,
    pub creator_id: u64,
    pub bet_amount: Amount,
    pub max_players: u8,
    pub status: MatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Match {
    /// Total stake if `players` seats are filled at this match's bet.
    pub fn pot(&self, players: u64) -> Option<Amount> {
        self.bet_amount.checked_mul(players)
    }
}

/// Transaction kinds the ledger records. The match engine itself only ever
/// appends `Win` and `Referral`; the rest come from deposit/withdrawal flows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Bet,
    Win,
    Referral,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Rejected,
}

/// A ledger transaction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: u64,
    pub user_id: u64,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub amount: Amount,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A seated player inside a live game session. Seat order is join order and
/// never changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GamePlayer {
    pub id: u64,
    pub username: String,
    /// Seat index, contiguous from 0 in join order.
    pub position: u8,
    /// Piece positions: 0 = home, 1..=55 on the path, >=56 finished.
    pub pieces: [u16; PIECES_PER_PLAYER],
}

impl GamePlayer {
    pub fn new(id: u64, username: String, position: u8) -> Self {
        Self {
            id,
            username,
            position,
            pieces: [0; PIECES_PER_PLAYER],
        }
    }
}

/// Snapshot of a live session, broadcast to every seated player after any
/// state-changing operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameStateSnapshot {
    pub match_id: u64,
    pub players: Vec<GamePlayer>,
    pub current_turn: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dice_value: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_serializes_camel_case() {
        let m = Match {
            id: 1,
            creator_id: 2,
            bet_amount: Amount::from_units(10),
            max_players: 4,
            status: MatchStatus::Waiting,
            winner_id: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["betAmount"], "10.00");
        assert_eq!(json["status"], "waiting");
        assert!(json.get("winnerId").is_none());
    }

    #[test]
    fn test_snapshot_omits_unset_dice() {
        let snap = GameStateSnapshot {
            match_id: 3,
            players: vec![GamePlayer::new(1, "alice".into(), 0)],
            current_turn: 1,
            dice_value: None,
            winner: None,
        };
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.get("diceValue").is_none());
        assert_eq!(json["players"][0]["pieces"], serde_json::json!([0, 0, 0, 0]));
    }

    #[test]
    fn test_transaction_type_tag() {
        let tx = Transaction {
            id: 1,
            user_id: 2,
            tx_type: TransactionType::Win,
            amount: Amount::from_units(36),
            status: TransactionStatus::Approved,
            order_id: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "win");
        assert_eq!(json["amount"], "36.00");
    }
}
