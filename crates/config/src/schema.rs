//! Config schema (gateway binding, game defaults).

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChorusConfig {
    pub gateway: GatewaySection,
    pub game: GameSection,
}

/// Where the WebSocket/HTTP server listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    pub bind: String,
    pub port: u16,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 18620,
        }
    }
}

/// Defaults applied when `session.create` omits a field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSection {
    /// Question theme used when the creator does not pick one.
    pub default_theme: String,
    /// Rounds per session.
    pub default_max_rounds: u32,
    /// Countdown length per round, in seconds.
    pub default_round_seconds: u32,
    /// Pause between a round's result broadcast and the next round.
    pub settle_seconds: u32,
}

impl Default for GameSection {
    fn default() -> Self {
        Self {
            default_theme: "Pop".into(),
            default_max_rounds: 10,
            default_round_seconds: 30,
            settle_seconds: 5,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg: ChorusConfig = toml::from_str("[gateway]\nport = 9000\n").expect("parse");
        assert_eq!(cfg.gateway.port, 9000);
        assert_eq!(cfg.gateway.bind, "127.0.0.1");
        assert_eq!(cfg.game.default_max_rounds, 10);
        assert_eq!(cfg.game.settle_seconds, 5);
    }
}
