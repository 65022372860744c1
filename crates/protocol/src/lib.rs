//! Wire protocol shared between the gateway and its clients.
//!
//! Three frame kinds travel over the WebSocket:
//! - [`RequestFrame`]: client → gateway method call
//! - [`ResponseFrame`]: gateway → caller reply, correlated by request id
//! - [`EventFrame`]: gateway → session/caller push, ordered by `seq`

use serde::{Deserialize, Serialize};

/// Bumped on breaking changes to frame or event payload shapes.
pub const PROTOCOL_VERSION: u32 = 1;

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const INVALID_STATE: &str = "INVALID_STATE";
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const ALREADY_ON_TEAM: &str = "ALREADY_ON_TEAM";
    pub const NOT_ON_TEAM: &str = "NOT_ON_TEAM";
    pub const NOT_READY: &str = "NOT_READY";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const INTERNAL: &str = "INTERNAL";
}

// ── Event names ──────────────────────────────────────────────────────────────

/// Names carried in [`EventFrame::event`].
pub mod events {
    pub const PLAYER_JOINED: &str = "player.joined";
    pub const PLAYER_RECONNECTED: &str = "player.reconnected";
    pub const PLAYER_JOINED_TEAM: &str = "player.joined_team";
    pub const PLAYER_READY_CHANGED: &str = "player.ready_changed";
    pub const PLAYER_DISCONNECTED: &str = "player.disconnected";
    pub const TEAM_CREATED: &str = "team.created";
    pub const GAME_STARTED: &str = "game.started";
    pub const NEW_QUESTION: &str = "round.question";
    pub const TIMER_UPDATE: &str = "round.timer";
    pub const ANSWER_RECORDED: &str = "round.answer_recorded";
    pub const ROUND_RESULT: &str = "round.result";
    pub const GAME_ENDED: &str = "game.ended";
    pub const ERROR: &str = "error";
}

// ── Error shape ──────────────────────────────────────────────────────────────

/// A typed error surfaced to exactly one caller. Never fatal to the session.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL, message)
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Client → gateway method invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Gateway → caller reply to a [`RequestFrame`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    pub fn ok(id: &str, payload: serde_json::Value) -> Self {
        Self {
            id: id.to_string(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: &str, error: ErrorShape) -> Self {
        Self {
            id: id.to_string(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }
}

/// Gateway → client push event. `seq` is monotonically increasing per
/// gateway; clients observe session events in emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub seq: u64,
    pub event: String,
    pub payload: serde_json::Value,
}
