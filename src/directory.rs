//! Session Directory
//!
//! The single entry point for starting wagered matches, looking up live
//! sessions, and routing inbound protocol messages to the owning session
//! actor. Owns the match-id to session map explicitly; there is no ambient
//! global state.

use crate::amount::Amount;
use crate::config::GameConfig;
use crate::dice::DiceRoller;
use crate::errors::{LudoBetResult, MatchError};
use crate::ledger::Ledger;
use crate::models::{GameStateSnapshot, Match};
use crate::protocol::ClientMessage;
use crate::registry::ConnectionRegistry;
use crate::session::{spawn_session, SessionCommand, SessionContext, SessionHandle, SessionMap};
use crate::settlement::SettlementEngine;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SessionDirectory {
    ctx: Arc<SessionContext>,
    game_config: GameConfig,
    sessions: SessionMap,
}

impl SessionDirectory {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        ledger: Arc<dyn Ledger>,
        settlement: Arc<SettlementEngine>,
        dice: Arc<dyn DiceRoller>,
        game_config: GameConfig,
    ) -> Self {
        let sessions: SessionMap = Arc::new(DashMap::new());
        let ctx = Arc::new(SessionContext {
            registry,
            ledger,
            settlement,
            dice,
            sessions: sessions.clone(),
        });
        Self {
            ctx,
            game_config,
            sessions,
        }
    }

    /// Create a match and spawn its paired session with the creator at
    /// seat 0. Validation failures reject here, before any state exists.
    pub async fn create_match(
        &self,
        creator_id: u64,
        creator_name: &str,
        bet_amount: Amount,
        max_players: u8,
    ) -> LudoBetResult<Match> {
        if !(2..=4).contains(&max_players) {
            return Err(MatchError::InvalidPlayerCount(max_players).into());
        }
        if bet_amount < self.game_config.min_bet || bet_amount > self.game_config.max_bet {
            return Err(MatchError::BetOutOfRange {
                amount: bet_amount.to_string(),
                min: self.game_config.min_bet.to_string(),
                max: self.game_config.max_bet.to_string(),
            }
            .into());
        }

        let match_record = self
            .ctx
            .ledger
            .create_match(creator_id, bet_amount, max_players)
            .await?;

        spawn_session(
            self.ctx.clone(),
            match_record.id,
            max_players,
            creator_id,
            creator_name.to_string(),
        );
        info!(
            "🎲 Match {} created by user {} (bet {}, {} players)",
            match_record.id, creator_id, bet_amount, max_players
        );
        Ok(match_record)
    }

    /// All matches still waiting for players, deterministic insertion order.
    pub async fn list_open_matches(&self) -> LudoBetResult<Vec<Match>> {
        Ok(self.ctx.ledger.list_open_matches().await?)
    }

    /// Live session handle for a match, if it has not been evicted.
    pub fn session(&self, match_id: u64) -> Option<SessionHandle> {
        self.sessions.get(&match_id).map(|h| h.clone())
    }

    /// Snapshot of a live session's state.
    pub async fn current_state(&self, match_id: u64) -> Option<GameStateSnapshot> {
        self.session(match_id)?.snapshot().await
    }

    /// Route an inbound message from an authenticated player. `sender_id` is
    /// the identity bound to the channel; a message claiming someone else's
    /// user id is dropped.
    pub async fn dispatch(&self, sender_id: u64, message: ClientMessage) {
        match message {
            // Channel identity binding happens at the transport layer; by
            // the time a Join reaches dispatch there is nothing left to do.
            ClientMessage::Join { user_id, .. } => {
                debug!("User {} already bound to game channel", user_id);
            }
            ClientMessage::CreateMatch {
                user_id,
                username,
                bet_amount,
                max_players,
            } => {
                if user_id != sender_id {
                    warn!(
                        "Dropping create_match claiming user {} from user {}",
                        user_id, sender_id
                    );
                    return;
                }
                if let Err(e) = self
                    .create_match(user_id, &username, bet_amount, max_players)
                    .await
                {
                    warn!("Rejected create_match from user {}: {}", user_id, e);
                }
            }
            ClientMessage::JoinMatch {
                user_id,
                username,
                match_id,
                ..
            } => {
                if user_id != sender_id {
                    warn!(
                        "Dropping join_match claiming user {} from user {}",
                        user_id, sender_id
                    );
                    return;
                }
                self.route(match_id, SessionCommand::Join { user_id, username });
            }
            ClientMessage::RollDice { user_id, match_id } => {
                if user_id != sender_id {
                    return;
                }
                self.route(match_id, SessionCommand::RollDice { user_id });
            }
            ClientMessage::MovePiece {
                user_id,
                match_id,
                piece_index,
            } => {
                if user_id != sender_id {
                    return;
                }
                self.route(
                    match_id,
                    SessionCommand::MovePiece {
                        user_id,
                        piece_index,
                    },
                );
            }
            ClientMessage::CurrentState { user_id, match_id } => {
                if user_id != sender_id {
                    return;
                }
                self.route(match_id, SessionCommand::PushState { user_id });
            }
        }
    }

    fn route(&self, match_id: u64, command: SessionCommand) {
        match self.session(match_id) {
            Some(handle) => handle.send(command),
            None => debug!("No live session for match {}, message ignored", match_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettlementConfig;
    use crate::dice::ScriptedDice;
    use crate::errors::LudoBetError;
    use crate::ledger::MemoryLedger;

    fn directory(dice_script: Vec<u8>) -> (SessionDirectory, Arc<MemoryLedger>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let ledger = Arc::new(MemoryLedger::new(registry.clone()));
        let settlement = Arc::new(SettlementEngine::new(
            ledger.clone(),
            SettlementConfig::default(),
        ));
        let dir = SessionDirectory::new(
            registry,
            ledger.clone(),
            settlement,
            Arc::new(ScriptedDice::new(dice_script)),
            GameConfig::default(),
        );
        (dir, ledger)
    }

    #[tokio::test]
    async fn test_create_match_validates_bet_range() {
        let (dir, ledger) = directory(vec![1]);
        let user = ledger.create_user("alice", None).await.unwrap();

        let too_small = dir
            .create_match(user.id, "alice", Amount::from_minor(1), 2)
            .await;
        assert!(matches!(too_small, Err(LudoBetError::Match(_))));

        let too_many = dir
            .create_match(user.id, "alice", Amount::from_units(10), 5)
            .await;
        assert!(matches!(too_many, Err(LudoBetError::Match(_))));

        // No match record was persisted by the rejected attempts.
        assert!(dir.list_open_matches().await.unwrap().is_empty());

        let ok = dir
            .create_match(user.id, "alice", Amount::from_units(10), 2)
            .await
            .unwrap();
        assert_eq!(dir.list_open_matches().await.unwrap()[0].id, ok.id);
    }

    #[tokio::test]
    async fn test_create_match_seats_creator() {
        let (dir, ledger) = directory(vec![1]);
        let user = ledger.create_user("alice", None).await.unwrap();
        let m = dir
            .create_match(user.id, "alice", Amount::from_units(5), 3)
            .await
            .unwrap();

        let snap = dir.current_state(m.id).await.unwrap();
        assert_eq!(snap.players.len(), 1);
        assert_eq!(snap.players[0].id, user.id);
        assert_eq!(snap.current_turn, user.id);
    }

    #[tokio::test]
    async fn test_dispatch_drops_spoofed_sender() {
        let (dir, ledger) = directory(vec![6]);
        let alice = ledger.create_user("alice", None).await.unwrap();
        let bob = ledger.create_user("bob", None).await.unwrap();
        let m = dir
            .create_match(alice.id, "alice", Amount::from_units(5), 2)
            .await
            .unwrap();
        dir.dispatch(
            bob.id,
            ClientMessage::JoinMatch {
                user_id: bob.id,
                username: "bob".into(),
                match_id: m.id,
                max_players: 2,
            },
        )
        .await;

        // Bob tries to roll as Alice.
        dir.dispatch(
            bob.id,
            ClientMessage::RollDice {
                user_id: alice.id,
                match_id: m.id,
            },
        )
        .await;

        let snap = dir.current_state(m.id).await.unwrap();
        assert_eq!(snap.dice_value, None);
    }
}
