//! Cross-session registry: join code → coordinator handle. Lookups are
//! read-mostly and safe under concurrent creation/removal; everything that
//! mutates a session goes through its handle, never through the registry.

use std::{sync::Arc, time::Duration};

use {
    dashmap::{DashMap, mapref::entry::Entry},
    serde::Serialize,
    tracing::debug,
};

use crate::{
    coordinator::{SessionHandle, spawn_session},
    model::{Session, SessionOptions, generate_code},
    outbound::Outbound,
    questions::QuestionSource,
};

#[derive(Debug, Clone)]
pub struct CreateSessionOpts {
    pub theme: String,
    pub max_rounds: u32,
    pub round_seconds: u32,
}

/// What `session.create` returns to the creator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub code: String,
    pub theme: String,
    pub max_rounds: u32,
    pub round_seconds: u32,
}

pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
    outbound: Arc<dyn Outbound>,
    questions: Arc<dyn QuestionSource>,
    settle: Duration,
}

impl SessionRegistry {
    pub fn new(
        outbound: Arc<dyn Outbound>,
        questions: Arc<dyn QuestionSource>,
        settle: Duration,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            outbound,
            questions,
            settle,
        }
    }

    /// Create a session under a fresh join code and spawn its coordinator.
    pub fn create(&self, opts: CreateSessionOpts) -> SessionInfo {
        loop {
            let code = generate_code();
            match self.sessions.entry(code.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let session = Session::new(code.clone(), SessionOptions {
                        theme: opts.theme.clone(),
                        max_rounds: opts.max_rounds,
                        round_seconds: opts.round_seconds,
                    });
                    let handle = spawn_session(
                        session,
                        Arc::clone(&self.outbound),
                        Arc::clone(&self.questions),
                        self.settle,
                    );
                    slot.insert(handle);
                    debug!(code, theme = %opts.theme, rounds = opts.max_rounds, "session created");
                    return SessionInfo {
                        code,
                        theme: opts.theme,
                        max_rounds: opts.max_rounds,
                        round_seconds: opts.round_seconds,
                    };
                },
            }
        }
    }

    pub fn get(&self, code: &str) -> Option<SessionHandle> {
        self.sessions.get(code).map(|h| h.clone())
    }

    /// Drop handles whose coordinator task has exited (finished game, last
    /// player gone). Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, handle| !handle.is_closed());
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
