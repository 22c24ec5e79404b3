//! Settlement Engine
//!
//! Converts a finished match into ledger payouts, exactly once. The pot is
//! `bet × players`; 90% goes to the winner, 10% is the platform fee, and
//! half of the fee is paid to the winner's referrer if one is recorded. The
//! retained half is never materialized as a ledger entry.
//!
//! Idempotence: `Ledger::finish_match` flips the match to Finished at most
//! once and only that call proceeds to pay out, so re-invoking settlement
//! for a settled match is a no-op. Within the winning invocation every
//! ledger write is retried with backoff; money correctness is the one place
//! a failure must not be dropped.

use crate::amount::Amount;
use crate::config::SettlementConfig;
use crate::errors::LedgerError;
use crate::ledger::Ledger;
use crate::models::TransactionType;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// What a settlement run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// This invocation paid out.
    Settled {
        winner_id: u64,
        winner_share: Amount,
        platform_fee: Amount,
        /// Referrer id and commission, when the winner was referred.
        referral: Option<(u64, Amount)>,
    },
    /// The match was already finished; nothing was paid.
    AlreadySettled,
}

pub struct SettlementEngine {
    ledger: Arc<dyn Ledger>,
    config: SettlementConfig,
}

impl SettlementEngine {
    pub fn new(ledger: Arc<dyn Ledger>, config: SettlementConfig) -> Self {
        Self { ledger, config }
    }

    /// Settle a finished match. `player_count` is the number of seated
    /// players at the moment of the win.
    pub async fn settle(
        &self,
        match_id: u64,
        winner_id: u64,
        player_count: u64,
    ) -> Result<SettlementOutcome, LedgerError> {
        let match_record = self
            .with_retry("load match", || self.ledger.get_match(match_id))
            .await?
            .ok_or(LedgerError::UnknownMatch(match_id))?;

        let finished_now = self
            .with_retry("finish match", || {
                self.ledger.finish_match(match_id, winner_id)
            })
            .await?;
        if !finished_now {
            info!("Match {} already settled, skipping payout", match_id);
            return Ok(SettlementOutcome::AlreadySettled);
        }

        let pot = match_record
            .pot(player_count)
            .ok_or_else(|| LedgerError::Unavailable("pot overflow".to_string()))?;
        let winner_share = pot
            .percent(90)
            .ok_or_else(|| LedgerError::Unavailable("payout overflow".to_string()))?;
        // Fee as the remainder, so share + fee always reconstructs the pot
        // even when the 90% cut truncated.
        let platform_fee = pot
            .checked_sub(winner_share)
            .ok_or_else(|| LedgerError::Unavailable("fee exceeds pot".to_string()))?;

        self.with_retry("credit winner", || {
            self.ledger
                .credit_with_transaction(winner_id, TransactionType::Win, winner_share)
        })
        .await?;
        info!(
            "💰 Match {} settled: pot {}, winner {} paid {}",
            match_id, pot, winner_id, winner_share
        );

        let winner = self
            .with_retry("load winner", || self.ledger.get_user(winner_id))
            .await?
            .ok_or(LedgerError::UnknownUser(winner_id))?;

        let referral = match winner.referred_by {
            Some(referrer_id) => {
                let commission = platform_fee.halved();
                self.with_retry("credit referrer", || {
                    self.ledger.credit_with_transaction(
                        referrer_id,
                        TransactionType::Referral,
                        commission,
                    )
                })
                .await?;
                info!(
                    "Referral commission {} paid to user {} for match {}",
                    commission, referrer_id, match_id
                );
                Some((referrer_id, commission))
            }
            None => None,
        };

        Ok(SettlementOutcome::Settled {
            winner_id,
            winner_share,
            platform_fee,
            referral,
        })
    }

    /// Run one ledger operation, retrying transient failures with linear
    /// backoff. Exhaustion surfaces the error to the caller, which logs it
    /// at error level; the game state is already terminal for the players.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let backoff =
                        Duration::from_millis(self.config.retry_backoff_ms * attempt as u64);
                    warn!(
                        "Ledger op '{}' failed (attempt {}/{}): {}, retrying in {:?}",
                        what, attempt, self.config.max_retries, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!("Ledger op '{}' failed permanently: {}", what, e);
                    return Err(e);
                }
            }
        }
    }
}
