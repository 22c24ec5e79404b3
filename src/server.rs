//! WebSocket server: game and lobby channels
//!
//! Two endpoints over one axum listener. `/ws/game` carries the match
//! protocol; identity is bound by the first `join` message and everything
//! before it is ignored. `/ws` is the outbound-only lobby/notification
//! channel; it authenticates at connect time and unauthenticated upgrade
//! attempts are refused. Malformed inbound frames are logged and dropped,
//! never a reason to close the connection.

use crate::config::LudoBetConfig;
use crate::directory::SessionDirectory;
use crate::ledger::Ledger;
use crate::protocol::ClientMessage;
use crate::registry::{Channel, ChannelKind, ConnectionRegistry};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

/// Connect-time authentication for the lobby channel. Session handling is
/// an external collaborator; the server only consumes this narrow contract.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a connect token to a user id, or None to refuse.
    async fn authenticate(&self, token: &str) -> Option<u64>;
}

/// Development authenticator: the token is the numeric user id, accepted
/// when that account exists in the ledger.
pub struct LedgerAuthenticator {
    ledger: Arc<dyn Ledger>,
}

impl LedgerAuthenticator {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl Authenticator for LedgerAuthenticator {
    async fn authenticate(&self, token: &str) -> Option<u64> {
        let user_id: u64 = token.parse().ok()?;
        self.ledger.get_user(user_id).await.ok().flatten()?;
        Some(user_id)
    }
}

/// Shared state behind every handler.
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub directory: Arc<SessionDirectory>,
    pub ledger: Arc<dyn Ledger>,
    pub auth: Arc<dyn Authenticator>,
}

/// The WebSocket server for game and lobby channels.
pub struct GameServer {
    config: LudoBetConfig,
    state: Arc<AppState>,
}

impl GameServer {
    pub fn new(config: LudoBetConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Bind and serve until a shutdown signal arrives.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = SocketAddr::from((
            self.config
                .server
                .listen_address
                .parse::<std::net::IpAddr>()?,
            self.config.server.port,
        ));
        let app = self.router();

        info!("🚀 Starting LudoBet match server");
        info!("   Listen: ws://{}", addr);
        info!(
            "   Bet range: [{}, {}]",
            self.config.game.min_bet, self.config.game.max_bet
        );
        info!("📊 Endpoints:");
        info!("   GET /ws/game - game channel (join/create/roll/move)");
        info!("   GET /ws      - lobby notifications (authenticated)");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("🛑 Match server stopped gracefully");
        Ok(())
    }

    /// Build the router; public so tests can drive it without a listener.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws/game", get(game_ws_handler))
            .route("/ws", get(lobby_ws_handler))
            .with_state(self.state.clone())
            .layer(build_cors_layer(&self.config.server.allowed_origins))
            .layer(TraceLayer::new_for_http())
    }
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any)
    } else {
        let parsed: Vec<axum::http::HeaderValue> =
            origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(parsed))
    }
}

async fn game_ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_game_socket(state, socket))
}

async fn handle_game_socket(state: Arc<AppState>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (channel, mut outbound) = Channel::new();
    let channel_id = channel.id;
    let mut identity: Option<u64> = None;

    info!("🔌 Game channel {} connected", channel_id);

    // Pump registry pushes out to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let parsed: Result<ClientMessage, _> = serde_json::from_str(&text);
                let message = match parsed {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("Malformed game message on channel {}: {}", channel_id, e);
                        continue;
                    }
                };

                match message {
                    ClientMessage::Join { user_id, username } => {
                        bind_game_identity(&state, &mut identity, &channel, user_id, &username)
                            .await;
                    }
                    other => match identity {
                        Some(user_id) => state.directory.dispatch(user_id, other).await,
                        None => {
                            debug!(
                                "Message before join on channel {}, ignored",
                                channel_id
                            )
                        }
                    },
                }
            }
            Ok(Message::Close(_)) => {
                debug!("Game channel {} requested close", channel_id);
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => {}
            Err(e) => {
                warn!("Game channel {} error: {}", channel_id, e);
                break;
            }
        }
    }

    send_task.abort();
    if let Some(user_id) = identity {
        // Guarded by channel identity: if this socket was already replaced
        // by a reconnect, the newer registration stays.
        state
            .registry
            .deregister(user_id, ChannelKind::Game, channel_id);
    }
    info!("🔌 Game channel {} disconnected", channel_id);
}

/// Bind an identity to a game channel on its first `join`. A channel binds
/// exactly once: later `join` messages are ignored, so a bound socket can
/// never be re-pointed at another account while the first user's registry
/// entry still names it.
async fn bind_game_identity(
    state: &AppState,
    identity: &mut Option<u64>,
    channel: &Channel,
    user_id: u64,
    username: &str,
) {
    if let Some(bound) = *identity {
        warn!(
            "Ignoring join as user {} on channel {} already bound to user {}",
            user_id, channel.id, bound
        );
        return;
    }
    match state.ledger.get_user(user_id).await {
        Ok(Some(_)) => {
            *identity = Some(user_id);
            state
                .registry
                .register(user_id, ChannelKind::Game, channel.clone());
            info!(
                "User {} ({}) joined game channel {}",
                user_id, username, channel.id
            );
        }
        Ok(None) => warn!("Join from unknown user {}, ignored", user_id),
        Err(e) => warn!("Ledger lookup failed during join: {}", e),
    }
}

#[derive(Debug, Deserialize)]
struct LobbyQuery {
    token: String,
}

async fn lobby_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<LobbyQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.auth.authenticate(&query.token).await {
        Some(user_id) => {
            ws.on_upgrade(move |socket| handle_lobby_socket(state, socket, user_id))
        }
        None => {
            warn!("Refused unauthenticated lobby connection");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

async fn handle_lobby_socket(state: Arc<AppState>, socket: WebSocket, user_id: u64) {
    let (mut sink, mut stream) = socket.split();
    let (channel, mut outbound) = Channel::new();
    let channel_id = channel.id;

    state
        .registry
        .register(user_id, ChannelKind::Lobby, channel);
    info!("🔔 User {} connected to lobby channel {}", user_id, channel_id);

    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    // Outbound-only: inbound frames are drained and ignored until close.
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Lobby channel {} error: {}", channel_id, e);
                break;
            }
        }
    }

    send_task.abort();
    state
        .registry
        .deregister(user_id, ChannelKind::Lobby, channel_id);
    info!("🔔 User {} left lobby channel {}", user_id, channel_id);
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GameConfig, SettlementConfig};
    use crate::dice::ThreadRngDice;
    use crate::ledger::MemoryLedger;
    use crate::settlement::SettlementEngine;

    fn app_state(registry: Arc<ConnectionRegistry>, ledger: Arc<MemoryLedger>) -> AppState {
        let settlement = Arc::new(SettlementEngine::new(
            ledger.clone(),
            SettlementConfig::default(),
        ));
        let directory = Arc::new(SessionDirectory::new(
            registry.clone(),
            ledger.clone(),
            settlement,
            Arc::new(ThreadRngDice),
            GameConfig::default(),
        ));
        AppState {
            registry,
            directory,
            auth: Arc::new(LedgerAuthenticator::new(ledger.clone())),
            ledger,
        }
    }

    #[tokio::test]
    async fn test_game_channel_binds_identity_once() {
        let registry = Arc::new(ConnectionRegistry::new());
        let ledger = Arc::new(MemoryLedger::new(registry.clone()));
        let alice = ledger.create_user("alice", None).await.unwrap();
        let bob = ledger.create_user("bob", None).await.unwrap();
        let state = app_state(registry, ledger);

        let (channel, _rx) = Channel::new();
        let mut identity = None;
        bind_game_identity(&state, &mut identity, &channel, alice.id, "alice").await;
        assert_eq!(identity, Some(alice.id));
        assert!(state.registry.is_connected(alice.id, ChannelKind::Game));

        // A second join on the same socket must not rebind it to another
        // account.
        bind_game_identity(&state, &mut identity, &channel, bob.id, "bob").await;
        assert_eq!(identity, Some(alice.id));
        assert!(!state.registry.is_connected(bob.id, ChannelKind::Game));
    }

    #[tokio::test]
    async fn test_join_from_unknown_user_stays_unbound() {
        let registry = Arc::new(ConnectionRegistry::new());
        let ledger = Arc::new(MemoryLedger::new(registry.clone()));
        let state = app_state(registry, ledger);

        let (channel, _rx) = Channel::new();
        let mut identity = None;
        bind_game_identity(&state, &mut identity, &channel, 42, "ghost").await;
        assert_eq!(identity, None);
        assert!(!state.registry.is_connected(42, ChannelKind::Game));
    }

    #[tokio::test]
    async fn test_ledger_authenticator() {
        let registry = Arc::new(ConnectionRegistry::new());
        let ledger = Arc::new(MemoryLedger::new(registry));
        let user = ledger.create_user("alice", None).await.unwrap();
        let auth = LedgerAuthenticator::new(ledger);

        assert_eq!(auth.authenticate(&user.id.to_string()).await, Some(user.id));
        assert_eq!(auth.authenticate("9999").await, None);
        assert_eq!(auth.authenticate("not-a-number").await, None);
    }
}
