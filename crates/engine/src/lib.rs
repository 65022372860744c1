//! Session engine: per-session coordinator tasks, roster and round logic.
//!
//! One coordinator task owns each active session. Every state-mutating
//! operation (join, team change, answer, disconnect, timer tick) is a
//! [`coordinator::SessionCommand`] drained from a single queue, so no two
//! events for the same session ever run concurrently. Sessions for
//! different codes are fully independent tasks.
//!
//! Transport and persistence live elsewhere: outbound fan-out goes through
//! the [`outbound::Outbound`] trait, questions come from a
//! [`questions::QuestionSource`].

pub mod coordinator;
pub mod error;
pub mod events;
pub mod model;
pub mod outbound;
pub mod questions;
pub mod registry;
pub mod roster;
pub mod rounds;

pub use {
    coordinator::{SessionHandle, spawn_session},
    error::EngineError,
    registry::{CreateSessionOpts, SessionRegistry},
};
