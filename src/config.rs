//! Configuration for the LudoBet match server
//!
//! TOML file with environment variable overrides and validation. Every value
//! has a sensible default so the server can start with no config at all.

use crate::amount::Amount;
use crate::errors::{ConfigurationError, LudoBetResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LudoBetConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
}

/// Listener settings for the WebSocket server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_address: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
        }
    }
}

/// Match creation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Smallest allowed bet per player.
    pub min_bet: Amount,
    /// Largest allowed bet per player.
    pub max_bet: Amount,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            min_bet: Amount::from_units(1),
            max_bet: Amount::from_units(1_000),
        }
    }
}

/// Retry policy for settlement ledger writes. Settlement never fails
/// silently; on exhaustion the failure is logged at error level for
/// operator intervention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_backoff_ms: 200,
        }
    }
}

/// Configuration loader with environment variable support.
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path.
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables.
    pub fn load(&self) -> LudoBetResult<LudoBetConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            LudoBetConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> LudoBetResult<LudoBetConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into()
        })
    }

    fn apply_env_overrides(&self, config: &mut LudoBetConfig) -> LudoBetResult<()> {
        if let Ok(addr) = env::var("LUDOBET_LISTEN_ADDRESS") {
            config.server.listen_address = addr;
        }
        if let Ok(port) = env::var("LUDOBET_PORT") {
            config.server.port = port.parse().map_err(|_| ConfigurationError::InvalidValue {
                field: "LUDOBET_PORT".to_string(),
                value: port,
                reason: "Invalid port number".to_string(),
            })?;
        }
        if let Ok(min_bet) = env::var("LUDOBET_MIN_BET") {
            config.game.min_bet =
                min_bet
                    .parse()
                    .map_err(|_| ConfigurationError::InvalidValue {
                        field: "LUDOBET_MIN_BET".to_string(),
                        value: min_bet,
                        reason: "Invalid decimal amount".to_string(),
                    })?;
        }
        if let Ok(max_bet) = env::var("LUDOBET_MAX_BET") {
            config.game.max_bet =
                max_bet
                    .parse()
                    .map_err(|_| ConfigurationError::InvalidValue {
                        field: "LUDOBET_MAX_BET".to_string(),
                        value: max_bet,
                        reason: "Invalid decimal amount".to_string(),
                    })?;
        }

        Ok(())
    }

    /// Validate configuration values.
    fn validate(&self, config: &LudoBetConfig) -> LudoBetResult<()> {
        if config.server.port == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "server.port".to_string(),
                value: "0".to_string(),
                reason: "Port cannot be zero".to_string(),
            }
            .into());
        }

        if config.game.min_bet.is_zero() {
            return Err(ConfigurationError::InvalidValue {
                field: "game.min_bet".to_string(),
                value: config.game.min_bet.to_string(),
                reason: "Minimum bet must be positive".to_string(),
            }
            .into());
        }

        if config.game.max_bet < config.game.min_bet {
            return Err(ConfigurationError::InvalidValue {
                field: "game.max_bet".to_string(),
                value: config.game.max_bet.to_string(),
                reason: "Maximum bet cannot be below minimum bet".to_string(),
            }
            .into());
        }

        if config.settlement.retry_backoff_ms == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "settlement.retry_backoff_ms".to_string(),
                value: "0".to_string(),
                reason: "Backoff must be at least 1ms".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Save configuration to file.
    pub fn save(&self, config: &LudoBetConfig, path: &str) -> LudoBetResult<()> {
        let toml_string = toml::to_string_pretty(config).map_err(|e| {
            ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, toml_string).map_err(|e| {
            ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into()
        })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = LudoBetConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.game.min_bet, Amount::from_units(1));
        assert!(config.game.max_bet > config.game.min_bet);
    }

    #[test]
    fn test_config_validation() {
        let loader = ConfigLoader::new();
        let mut config = LudoBetConfig::default();
        assert!(loader.validate(&config).is_ok());

        config.server.port = 0;
        assert!(loader.validate(&config).is_err());

        config.server.port = 8080;
        config.game.max_bet = Amount::from_minor(1);
        assert!(loader.validate(&config).is_err());
    }

    #[test]
    fn test_save_and_load_config() -> LudoBetResult<()> {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let mut original = LudoBetConfig::default();
        original.game.min_bet = Amount::from_minor(250);

        let loader = ConfigLoader::new();
        loader.save(&original, path)?;

        let loaded = ConfigLoader::new().with_path(path).load()?;
        assert_eq!(loaded.server.port, original.server.port);
        assert_eq!(loaded.game.min_bet, Amount::from_minor(250));

        Ok(())
    }
}
