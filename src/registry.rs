//! Connection Registry
//!
//! Maps a player identity to its live channels, one per kind (lobby, game).
//! Registering replaces any prior channel of that kind. Deregistration is
//! keyed on channel identity, not just player identity: a disconnect handler
//! firing for a stale, already-replaced channel must not tear down the
//! replacement. Delivery is best-effort; with no open channel the event is
//! dropped and the client resyncs on reconnect.

use crate::protocol::{GameEvent, LobbyEvent};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Which logical channel a connection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Lobby,
    Game,
}

/// Handle to one live connection: a unique identity plus a sender of
/// serialized JSON frames. The transport side pumps the paired receiver
/// into its socket.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: Uuid,
    pub tx: mpsc::UnboundedSender<String>,
}

impl Channel {
    /// Create a channel handle and the receiver its transport drains.
    pub fn new() -> (Channel, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Channel { id: Uuid::new_v4(), tx }, rx)
    }
}

/// Registry of live connections, shared across the server.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    channels: DashMap<(u64, ChannelKind), Channel>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Register a channel for an identity, replacing any prior channel of
    /// the same kind.
    pub fn register(&self, user_id: u64, kind: ChannelKind, channel: Channel) {
        let replaced = self.channels.insert((user_id, kind), channel);
        if replaced.is_some() {
            debug!("Replaced {:?} channel for user {}", kind, user_id);
        }
    }

    /// Remove a channel mapping, but only if `channel_id` still names the
    /// currently registered channel. A stale disconnect is a no-op.
    pub fn deregister(&self, user_id: u64, kind: ChannelKind, channel_id: Uuid) {
        self.channels
            .remove_if(&(user_id, kind), |_, current| current.id == channel_id);
    }

    /// Whether an identity currently has a channel of the given kind.
    pub fn is_connected(&self, user_id: u64, kind: ChannelKind) -> bool {
        self.channels.contains_key(&(user_id, kind))
    }

    /// Push a game event to one player, best-effort.
    pub fn push_game(&self, user_id: u64, event: &GameEvent) {
        self.push(user_id, ChannelKind::Game, event);
    }

    /// Push a lobby event to one player, best-effort.
    pub fn push_lobby(&self, user_id: u64, event: &LobbyEvent) {
        self.push(user_id, ChannelKind::Lobby, event);
    }

    /// Push a lobby event to every connected lobby channel (admin fan-out).
    pub fn broadcast_lobby(&self, event: &LobbyEvent) {
        let frame = match serde_json::to_string(event) {
            Ok(f) => f,
            Err(e) => {
                warn!("Failed to serialize lobby event: {}", e);
                return;
            }
        };
        for entry in self.channels.iter() {
            let (_, kind) = entry.key();
            if *kind == ChannelKind::Lobby {
                let _ = entry.value().tx.send(frame.clone());
            }
        }
    }

    fn push<E: Serialize>(&self, user_id: u64, kind: ChannelKind, event: &E) {
        let frame = match serde_json::to_string(event) {
            Ok(f) => f,
            Err(e) => {
                warn!("Failed to serialize event for user {}: {}", user_id, e);
                return;
            }
        };
        match self.channels.get(&(user_id, kind)) {
            Some(channel) => {
                // A send error means the transport task already went away;
                // the disconnect handler will clean the entry up.
                let _ = channel.tx.send(frame);
            }
            None => debug!("No {:?} channel for user {}, event dropped", kind, user_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GameStateSnapshot;

    fn snapshot_event(match_id: u64) -> GameEvent {
        GameEvent::GameStateUpdate {
            game_state: GameStateSnapshot {
                match_id,
                players: vec![],
                current_turn: 1,
                dice_value: None,
                winner: None,
            },
        }
    }

    #[tokio::test]
    async fn test_push_reaches_registered_channel() {
        let registry = ConnectionRegistry::new();
        let (channel, mut rx) = Channel::new();
        registry.register(7, ChannelKind::Game, channel);

        registry.push_game(7, &snapshot_event(1));
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("game_state_update"));
    }

    #[tokio::test]
    async fn test_push_without_channel_is_dropped() {
        let registry = ConnectionRegistry::new();
        // No panic, no delivery.
        registry.push_game(99, &snapshot_event(1));
        assert!(!registry.is_connected(99, ChannelKind::Game));
    }

    #[tokio::test]
    async fn test_stale_disconnect_keeps_replacement() {
        let registry = ConnectionRegistry::new();
        let (old, _old_rx) = Channel::new();
        let old_id = old.id;
        registry.register(7, ChannelKind::Game, old);

        // A reconnect replaces the channel before the old one's disconnect
        // handler fires.
        let (new, mut new_rx) = Channel::new();
        registry.register(7, ChannelKind::Game, new);

        registry.deregister(7, ChannelKind::Game, old_id);
        assert!(registry.is_connected(7, ChannelKind::Game));

        registry.push_game(7, &snapshot_event(2));
        assert!(new_rx.recv().await.unwrap().contains("\"matchId\":2"));
    }

    #[tokio::test]
    async fn test_matching_disconnect_removes_mapping() {
        let registry = ConnectionRegistry::new();
        let (channel, _rx) = Channel::new();
        let id = channel.id;
        registry.register(7, ChannelKind::Game, channel);

        registry.deregister(7, ChannelKind::Game, id);
        assert!(!registry.is_connected(7, ChannelKind::Game));
    }

    #[tokio::test]
    async fn test_kinds_are_independent() {
        let registry = ConnectionRegistry::new();
        let (lobby, _l_rx) = Channel::new();
        let (game, _g_rx) = Channel::new();
        let game_id = game.id;
        registry.register(7, ChannelKind::Lobby, lobby);
        registry.register(7, ChannelKind::Game, game);

        registry.deregister(7, ChannelKind::Game, game_id);
        assert!(registry.is_connected(7, ChannelKind::Lobby));
        assert!(!registry.is_connected(7, ChannelKind::Game));
    }
}
