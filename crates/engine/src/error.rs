//! Typed error taxonomy. Every variant is recovered at the coordinator
//! boundary and surfaced to the originating caller only; none of them
//! terminate a session.

use chorus_protocol::{ErrorShape, error_codes};

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("already on a team")]
    AlreadyOnTeam,
    #[error("not on a team")]
    NotOnTeam,
    #[error("not ready to start: {0}")]
    NotReady(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => error_codes::NOT_FOUND,
            Self::InvalidState(_) => error_codes::INVALID_STATE,
            Self::PermissionDenied(_) => error_codes::PERMISSION_DENIED,
            Self::AlreadyOnTeam => error_codes::ALREADY_ON_TEAM,
            Self::NotOnTeam => error_codes::NOT_ON_TEAM,
            Self::NotReady(_) => error_codes::NOT_READY,
            Self::Internal(_) => error_codes::INTERNAL,
        }
    }
}

impl From<EngineError> for ErrorShape {
    fn from(err: EngineError) -> Self {
        ErrorShape::new(err.code(), err.to_string())
    }
}
