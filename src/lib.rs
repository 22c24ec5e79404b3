//! LudoBet - Wagered Real-Time Ludo Match Engine
//!
//! Players stake a fixed bet, race four pieces around a shared track, and
//! the first piece to reach the finish threshold wins the pot minus a 10%
//! platform fee (half of which goes to the winner's referrer, if any).
//!
//! The crate is organized around five pieces:
//! - [`directory::SessionDirectory`]: creates matches and routes inbound
//!   protocol messages to the owning session.
//! - [`session`]: one actor per match owning the turn state machine.
//! - [`registry::ConnectionRegistry`]: identity to live-channel mapping
//!   with best-effort push delivery.
//! - [`settlement::SettlementEngine`]: exactly-once, retried conversion of
//!   a finished match into ledger payouts.
//! - [`ledger::Ledger`]: the contract against the persistent store, with an
//!   in-memory implementation.

pub mod amount;
pub mod config;
pub mod dice;
pub mod directory;
pub mod errors;
pub mod ledger;
pub mod models;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod settlement;

pub use amount::Amount;
pub use config::{ConfigLoader, LudoBetConfig};
pub use errors::{LudoBetError, LudoBetResult};
