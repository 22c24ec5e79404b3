//! Ledger: durable store of users, matches, and transactions
//!
//! The match engine consumes the ledger through the `Ledger` trait only, so
//! the backing technology stays swappable (and tests can inject failures).
//! `MemoryLedger` is the in-process implementation. Balance mutation and the
//! paired transaction record are applied under one lock, so no reader ever
//! observes a half-applied payout. Ledger mutations push lobby notifications
//! for the affected user, mirroring what game clients expect.

use crate::amount::Amount;
use crate::errors::LedgerError;
use crate::models::{
    Match, MatchStatus, Transaction, TransactionStatus, TransactionType, User,
};
use crate::protocol::LobbyEvent;
use crate::registry::ConnectionRegistry;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Contract the match engine holds against the persistent store.
///
/// Behavioral requirements for any implementation:
/// - no operation may drive a user balance negative;
/// - a withdrawal debits optimistically at submission and is refunded on
///   rejection; a deposit credits only on approval;
/// - `credit_with_transaction` applies the balance change and appends the
///   record as one atomic unit;
/// - `finish_match` flips a match to finished at most once and reports
///   whether this call was the one that did it.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn get_user(&self, id: u64) -> Result<Option<User>, LedgerError>;

    /// Create an account, resolving an optional referral code to the
    /// referring user.
    async fn create_user(
        &self,
        username: &str,
        referral_code: Option<&str>,
    ) -> Result<User, LedgerError>;

    async fn create_match(
        &self,
        creator_id: u64,
        bet_amount: Amount,
        max_players: u8,
    ) -> Result<Match, LedgerError>;

    async fn get_match(&self, id: u64) -> Result<Option<Match>, LedgerError>;

    /// All matches still waiting for players, in insertion order.
    async fn list_open_matches(&self) -> Result<Vec<Match>, LedgerError>;

    /// Waiting -> Playing. A no-op on any later status (transitions are
    /// monotonic).
    async fn mark_match_playing(&self, id: u64) -> Result<(), LedgerError>;

    /// Record the winner and flip the match to Finished. Returns true if
    /// this call performed the transition, false if the match was already
    /// finished. Settlement idempotence hangs on this flag.
    async fn finish_match(&self, match_id: u64, winner_id: u64) -> Result<bool, LedgerError>;

    /// Credit a payout and append its pre-approved transaction record as a
    /// single atomic unit.
    async fn credit_with_transaction(
        &self,
        user_id: u64,
        tx_type: TransactionType,
        amount: Amount,
    ) -> Result<Transaction, LedgerError>;

    /// Submit a deposit or withdrawal request (Pending). A withdrawal
    /// debits the balance optimistically; insufficient funds reject the
    /// submission with no record created.
    async fn create_transaction(
        &self,
        user_id: u64,
        tx_type: TransactionType,
        amount: Amount,
        order_id: Option<String>,
    ) -> Result<Transaction, LedgerError>;

    /// Approve a pending transaction. An approved deposit credits the
    /// balance now.
    async fn approve_transaction(&self, id: u64) -> Result<Transaction, LedgerError>;

    /// Reject a pending transaction. A rejected withdrawal refunds the
    /// optimistic debit.
    async fn reject_transaction(&self, id: u64) -> Result<Transaction, LedgerError>;

    /// Delete a transaction record. Has no balance side effect, matching
    /// the legacy behavior (see DESIGN.md for the flagged gap).
    async fn delete_transaction(&self, id: u64) -> Result<(), LedgerError>;

    async fn get_user_transactions(&self, user_id: u64) -> Result<Vec<Transaction>, LedgerError>;
}

#[derive(Debug, Default)]
struct LedgerInner {
    users: BTreeMap<u64, User>,
    matches: BTreeMap<u64, Match>,
    transactions: BTreeMap<u64, Transaction>,
    next_user_id: u64,
    next_match_id: u64,
    next_tx_id: u64,
}

/// In-memory ledger. One RwLock guards all tables, which keeps every
/// balance-plus-record mutation atomic and safe under concurrent
/// settlements. Lobby events are pushed after the lock is released.
pub struct MemoryLedger {
    inner: RwLock<LedgerInner>,
    registry: Arc<ConnectionRegistry>,
}

impl MemoryLedger {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            inner: RwLock::new(LedgerInner::default()),
            registry,
        }
    }

    fn notify(&self, user_id: u64, event: LobbyEvent) {
        self.registry.push_lobby(user_id, &event);
    }

    fn generate_referral_code() -> String {
        const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::thread_rng();
        (0..6)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect()
    }

    fn lock_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, LedgerInner>, LedgerError> {
        self.inner
            .write()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".to_string()))
    }

    fn lock_read(&self) -> Result<std::sync::RwLockReadGuard<'_, LedgerInner>, LedgerError> {
        self.inner
            .read()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".to_string()))
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get_user(&self, id: u64) -> Result<Option<User>, LedgerError> {
        Ok(self.lock_read()?.users.get(&id).cloned())
    }

    async fn create_user(
        &self,
        username: &str,
        referral_code: Option<&str>,
    ) -> Result<User, LedgerError> {
        let user = {
            let mut inner = self.lock_write()?;
            if inner.users.values().any(|u| u.username == username) {
                return Err(LedgerError::UsernameTaken(username.to_string()));
            }

            let referred_by = referral_code.and_then(|code| {
                inner
                    .users
                    .values()
                    .find(|u| u.referral_code == code)
                    .map(|u| u.id)
            });

            inner.next_user_id += 1;
            let user = User {
                id: inner.next_user_id,
                username: username.to_string(),
                balance: Amount::ZERO,
                referral_code: Self::generate_referral_code(),
                referred_by,
            };
            inner.users.insert(user.id, user.clone());
            user
        };

        info!("👤 Created user {} ({})", user.id, user.username);
        Ok(user)
    }

    async fn create_match(
        &self,
        creator_id: u64,
        bet_amount: Amount,
        max_players: u8,
    ) -> Result<Match, LedgerError> {
        let match_record = {
            let mut inner = self.lock_write()?;
            if !inner.users.contains_key(&creator_id) {
                return Err(LedgerError::UnknownUser(creator_id));
            }
            inner.next_match_id += 1;
            let m = Match {
                id: inner.next_match_id,
                creator_id,
                bet_amount,
                max_players,
                status: MatchStatus::Waiting,
                winner_id: None,
                created_at: Utc::now(),
            };
            inner.matches.insert(m.id, m.clone());
            m
        };

        self.registry.broadcast_lobby(&LobbyEvent::MatchUpdate {
            match_record: match_record.clone(),
        });
        Ok(match_record)
    }

    async fn get_match(&self, id: u64) -> Result<Option<Match>, LedgerError> {
        Ok(self.lock_read()?.matches.get(&id).cloned())
    }

    async fn list_open_matches(&self) -> Result<Vec<Match>, LedgerError> {
        // BTreeMap iteration gives id order = insertion order, so the
        // listing is deterministic.
        Ok(self
            .lock_read()?
            .matches
            .values()
            .filter(|m| m.status == MatchStatus::Waiting)
            .cloned()
            .collect())
    }

    async fn mark_match_playing(&self, id: u64) -> Result<(), LedgerError> {
        let updated = {
            let mut inner = self.lock_write()?;
            let m = inner
                .matches
                .get_mut(&id)
                .ok_or(LedgerError::UnknownMatch(id))?;
            if m.status == MatchStatus::Waiting {
                m.status = MatchStatus::Playing;
                Some(m.clone())
            } else {
                None
            }
        };

        if let Some(m) = updated {
            self.registry
                .broadcast_lobby(&LobbyEvent::MatchUpdate { match_record: m });
        }
        Ok(())
    }

    async fn finish_match(&self, match_id: u64, winner_id: u64) -> Result<bool, LedgerError> {
        let finished = {
            let mut inner = self.lock_write()?;
            let m = inner
                .matches
                .get_mut(&match_id)
                .ok_or(LedgerError::UnknownMatch(match_id))?;
            if m.status == MatchStatus::Finished {
                None
            } else {
                m.status = MatchStatus::Finished;
                m.winner_id = Some(winner_id);
                Some(m.clone())
            }
        };

        match finished {
            Some(m) => {
                self.registry
                    .broadcast_lobby(&LobbyEvent::MatchUpdate { match_record: m });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn credit_with_transaction(
        &self,
        user_id: u64,
        tx_type: TransactionType,
        amount: Amount,
    ) -> Result<Transaction, LedgerError> {
        let (user, tx) = {
            let mut inner = self.lock_write()?;
            inner.next_tx_id += 1;
            let tx_id = inner.next_tx_id;
            let user = inner
                .users
                .get_mut(&user_id)
                .ok_or(LedgerError::UnknownUser(user_id))?;

            user.balance = user
                .balance
                .checked_add(amount)
                .ok_or_else(|| LedgerError::Unavailable("balance overflow".to_string()))?;
            let user = user.clone();

            let tx = Transaction {
                id: tx_id,
                user_id,
                tx_type,
                amount,
                status: TransactionStatus::Approved,
                order_id: None,
                created_at: Utc::now(),
            };
            inner.transactions.insert(tx.id, tx.clone());
            (user, tx)
        };

        self.notify(user_id, LobbyEvent::UserUpdate { user: user.clone() });
        self.notify(
            user_id,
            LobbyEvent::BalanceUpdate {
                user_id,
                balance: user.balance,
            },
        );
        self.notify(
            user_id,
            LobbyEvent::TransactionUpdate {
                transaction: tx.clone(),
            },
        );
        Ok(tx)
    }

    async fn create_transaction(
        &self,
        user_id: u64,
        tx_type: TransactionType,
        amount: Amount,
        order_id: Option<String>,
    ) -> Result<Transaction, LedgerError> {
        let (updated_user, tx) = {
            let mut inner = self.lock_write()?;
            inner.next_tx_id += 1;
            let tx_id = inner.next_tx_id;
            let user = inner
                .users
                .get_mut(&user_id)
                .ok_or(LedgerError::UnknownUser(user_id))?;

            // Withdrawals debit optimistically at submission. A rejection
            // later refunds; insufficient funds reject right here with no
            // record created.
            let updated_user = if tx_type == TransactionType::Withdrawal {
                let new_balance = user.balance.checked_sub(amount).ok_or_else(|| {
                    LedgerError::InsufficientBalance {
                        user_id,
                        balance: user.balance.to_string(),
                        required: amount.to_string(),
                    }
                })?;
                user.balance = new_balance;
                Some(user.clone())
            } else {
                None
            };

            let tx = Transaction {
                id: tx_id,
                user_id,
                tx_type,
                amount,
                status: TransactionStatus::Pending,
                order_id,
                created_at: Utc::now(),
            };
            inner.transactions.insert(tx.id, tx.clone());
            (updated_user, tx)
        };

        if let Some(user) = updated_user {
            self.notify(user_id, LobbyEvent::UserUpdate { user });
        }
        self.notify(
            user_id,
            LobbyEvent::TransactionUpdate {
                transaction: tx.clone(),
            },
        );
        Ok(tx)
    }

    async fn approve_transaction(&self, id: u64) -> Result<Transaction, LedgerError> {
        let (updated_user, tx) = {
            let mut inner = self.lock_write()?;
            let tx = inner
                .transactions
                .get_mut(&id)
                .ok_or(LedgerError::UnknownTransaction(id))?;
            tx.status = TransactionStatus::Approved;
            let tx = tx.clone();

            // Deposits credit the balance only on approval.
            let updated_user = if tx.tx_type == TransactionType::Deposit {
                let user = inner
                    .users
                    .get_mut(&tx.user_id)
                    .ok_or(LedgerError::UnknownUser(tx.user_id))?;
                user.balance = user
                    .balance
                    .checked_add(tx.amount)
                    .ok_or_else(|| LedgerError::Unavailable("balance overflow".to_string()))?;
                Some(user.clone())
            } else {
                None
            };
            (updated_user, tx)
        };

        if let Some(user) = updated_user {
            self.notify(tx.user_id, LobbyEvent::UserUpdate { user });
        }
        self.notify(
            tx.user_id,
            LobbyEvent::TransactionUpdate {
                transaction: tx.clone(),
            },
        );
        Ok(tx)
    }

    async fn reject_transaction(&self, id: u64) -> Result<Transaction, LedgerError> {
        let (updated_user, tx) = {
            let mut inner = self.lock_write()?;
            let tx = inner
                .transactions
                .get_mut(&id)
                .ok_or(LedgerError::UnknownTransaction(id))?;
            tx.status = TransactionStatus::Rejected;
            let tx = tx.clone();

            // A rejected withdrawal refunds the optimistic debit.
            let updated_user = if tx.tx_type == TransactionType::Withdrawal {
                let user = inner
                    .users
                    .get_mut(&tx.user_id)
                    .ok_or(LedgerError::UnknownUser(tx.user_id))?;
                user.balance = user
                    .balance
                    .checked_add(tx.amount)
                    .ok_or_else(|| LedgerError::Unavailable("balance overflow".to_string()))?;
                Some(user.clone())
            } else {
                None
            };
            (updated_user, tx)
        };

        if let Some(user) = updated_user {
            self.notify(tx.user_id, LobbyEvent::UserUpdate { user });
        }
        self.notify(
            tx.user_id,
            LobbyEvent::TransactionUpdate {
                transaction: tx.clone(),
            },
        );
        Ok(tx)
    }

    async fn delete_transaction(&self, id: u64) -> Result<(), LedgerError> {
        let user_id = {
            let mut inner = self.lock_write()?;
            let tx = inner
                .transactions
                .remove(&id)
                .ok_or(LedgerError::UnknownTransaction(id))?;
            tx.user_id
        };

        self.notify(user_id, LobbyEvent::TransactionDeleted { transaction_id: id });
        Ok(())
    }

    async fn get_user_transactions(&self, user_id: u64) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self
            .lock_read()?
            .transactions
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }
}
