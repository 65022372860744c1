//! Owned data model for one session. Everything here is mutated only by the
//! session's coordinator task.

use std::{
    collections::HashMap,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    rand::seq::IndexedRandom,
    serde::{Deserialize, Serialize},
};

pub type PlayerId = String;
pub type TeamId = String;
pub type QuestionId = String;

/// Opaque transport handle for one live connection. Changes on every
/// reconnect; logical player identity is carried by the reconnect token.
pub type CallerId = String;

// ── Join codes ───────────────────────────────────────────────────────────────

/// Join-code alphabet without ambiguous characters (no I/O/0/1).
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const CODE_LENGTH: usize = 5;

/// Generate a random join code. Uniqueness among live sessions is enforced
/// by the registry, not here.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| char::from(*CODE_ALPHABET.choose(&mut rng).unwrap_or(&b'A')))
        .collect()
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Entities ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    InProgress,
    Finished,
}

#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    /// Live connection, if any. Replaced wholesale on reconnect.
    pub conn: Option<CallerId>,
    pub is_connected: bool,
    pub is_leader: bool,
    /// Joined after the session left `waiting`: receives state but never
    /// counts toward readiness or scoring.
    pub is_observer: bool,
    pub team_id: Option<TeamId>,
    pub is_ready: bool,
}

#[derive(Debug, Clone)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub avatar: String,
    pub score: u32,
    pub player_ids: Vec<PlayerId>,
    /// At most one non-null write per round; reset when the next round starts.
    pub current_answer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Question {
    pub id: QuestionId,
    pub audio_url: String,
    /// Exactly four shuffled options, one of which equals `correct_answer`.
    pub answers: Vec<String>,
    pub correct_answer: String,
}

impl Question {
    /// Client-facing view. The correct answer is only revealed in the
    /// round result.
    pub fn view(&self) -> QuestionView {
        QuestionView {
            id: self.id.clone(),
            audio_url: self.audio_url.clone(),
            answers: self.answers.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub id: QuestionId,
    pub audio_url: String,
    pub answers: Vec<String>,
}

/// Append-only record of one team's scored answer to one question.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub team_id: TeamId,
    pub question_id: QuestionId,
    pub selected_answer: String,
    pub is_correct: bool,
    pub elapsed_seconds: u32,
    pub recorded_at: u64,
}

// ── Session ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub theme: String,
    pub max_rounds: u32,
    pub round_seconds: u32,
}

#[derive(Debug)]
pub struct Session {
    pub code: String,
    pub theme: String,
    pub max_rounds: u32,
    pub round_duration: Duration,
    pub status: SessionStatus,
    /// 0-based; -1 before the first round starts, `max_rounds` once finished.
    pub current_round: i32,
    pub team_order: Vec<TeamId>,
    pub question_ids: Vec<QuestionId>,
    pub players: HashMap<PlayerId, Player>,
    pub teams: HashMap<TeamId, Team>,
    pub questions: HashMap<QuestionId, Question>,
    pub answers: Vec<AnswerRecord>,
    /// Stable token → logical player, resolved on reconnect.
    pub reconnect_tokens: HashMap<String, PlayerId>,
    pub created_at: u64,
}

impl Session {
    pub fn new(code: String, opts: SessionOptions) -> Self {
        Self {
            code,
            theme: opts.theme,
            max_rounds: opts.max_rounds,
            round_duration: Duration::from_secs(u64::from(opts.round_seconds)),
            status: SessionStatus::Waiting,
            current_round: -1,
            team_order: Vec::new(),
            question_ids: Vec::new(),
            players: HashMap::new(),
            teams: HashMap::new(),
            questions: HashMap::new(),
            answers: Vec::new(),
            reconnect_tokens: HashMap::new(),
            created_at: now_ms(),
        }
    }

    pub fn round_seconds(&self) -> u32 {
        self.round_duration.as_secs() as u32
    }

    pub fn connected_players(&self) -> impl Iterator<Item = &Player> {
        self.players.values().filter(|p| p.is_connected)
    }

    /// Teams in creation order (stable tiebreak for auto-balancing).
    pub fn teams_in_order(&self) -> impl Iterator<Item = &Team> {
        self.team_order.iter().filter_map(|id| self.teams.get(id))
    }

    pub fn current_question(&self) -> Option<&Question> {
        if self.current_round < 0 {
            return None;
        }
        self.question_ids
            .get(self.current_round as usize)
            .and_then(|id| self.questions.get(id))
    }

    pub fn all_teams_answered(&self) -> bool {
        self.teams_in_order().all(|t| t.current_answer.is_some())
    }

    // ── Snapshots ────────────────────────────────────────────────────────

    pub fn player_snapshot(&self, player: &Player) -> PlayerSnapshot {
        PlayerSnapshot {
            id: player.id.clone(),
            display_name: player.display_name.clone(),
            is_connected: player.is_connected,
            is_leader: player.is_leader,
            is_observer: player.is_observer,
            team_id: player.team_id.clone(),
            is_ready: player.is_ready,
        }
    }

    pub fn team_snapshot(&self, team: &Team) -> TeamSnapshot {
        TeamSnapshot {
            id: team.id.clone(),
            name: team.name.clone(),
            avatar: team.avatar.clone(),
            score: team.score,
            player_ids: team.player_ids.clone(),
            has_answered: team.current_answer.is_some(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            code: self.code.clone(),
            theme: self.theme.clone(),
            status: self.status,
            current_round: self.current_round,
            max_rounds: self.max_rounds,
            round_seconds: self.round_seconds(),
            teams: self.teams_in_order().map(|t| self.team_snapshot(t)).collect(),
            players: {
                let mut players: Vec<_> =
                    self.players.values().map(|p| self.player_snapshot(p)).collect();
                players.sort_by(|a, b| a.id.cmp(&b.id));
                players
            },
        }
    }
}

// ── Wire snapshots ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub display_name: String,
    pub is_connected: bool,
    pub is_leader: bool,
    pub is_observer: bool,
    pub team_id: Option<TeamId>,
    pub is_ready: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSnapshot {
    pub id: TeamId,
    pub name: String,
    pub avatar: String,
    pub score: u32,
    pub player_ids: Vec<PlayerId>,
    /// Whether the team has locked in an answer this round. The answer
    /// itself stays hidden until the round result.
    pub has_answered: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub code: String,
    pub theme: String,
    pub status: SessionStatus,
    pub current_round: i32,
    pub max_rounds: u32,
    pub round_seconds: u32,
    pub teams: Vec<TeamSnapshot>,
    pub players: Vec<PlayerSnapshot>,
}
