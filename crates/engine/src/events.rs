//! Outbound events emitted by a session coordinator. The transport decides
//! fan-out (whole session vs. single caller); emission order is delivery
//! order.

use {
    serde::Serialize,
    serde_json::Value,
};

use chorus_protocol::events as names;

use crate::model::{PlayerSnapshot, QuestionView, SessionSnapshot, SessionStatus, TeamSnapshot};

/// One team's line in a round result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundTeamResult {
    pub id: String,
    pub name: String,
    pub score: u32,
    pub answer: Option<String>,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum OutboundEvent {
    PlayerJoined {
        player: PlayerSnapshot,
    },
    PlayerReconnected {
        player: PlayerSnapshot,
    },
    PlayerJoinedTeam {
        player: PlayerSnapshot,
        team: TeamSnapshot,
    },
    PlayerReadyChanged {
        player: PlayerSnapshot,
    },
    PlayerDisconnected {
        player: PlayerSnapshot,
    },
    TeamCreated {
        team: TeamSnapshot,
    },
    GameStarted {
        session: SessionSnapshot,
    },
    NewQuestion {
        question: QuestionView,
        round_index: i32,
        max_rounds: u32,
        theme: String,
        status: SessionStatus,
    },
    TimerUpdate {
        seconds_remaining: u32,
    },
    /// Caller-only acknowledgement of a scored submission.
    AnswerRecorded {
        is_correct: bool,
        points: u32,
        answer: String,
    },
    RoundResult {
        correct_answer: String,
        teams: Vec<RoundTeamResult>,
    },
    GameEnded {
        teams: Vec<TeamSnapshot>,
    },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlayerJoined { .. } => names::PLAYER_JOINED,
            Self::PlayerReconnected { .. } => names::PLAYER_RECONNECTED,
            Self::PlayerJoinedTeam { .. } => names::PLAYER_JOINED_TEAM,
            Self::PlayerReadyChanged { .. } => names::PLAYER_READY_CHANGED,
            Self::PlayerDisconnected { .. } => names::PLAYER_DISCONNECTED,
            Self::TeamCreated { .. } => names::TEAM_CREATED,
            Self::GameStarted { .. } => names::GAME_STARTED,
            Self::NewQuestion { .. } => names::NEW_QUESTION,
            Self::TimerUpdate { .. } => names::TIMER_UPDATE,
            Self::AnswerRecorded { .. } => names::ANSWER_RECORDED,
            Self::RoundResult { .. } => names::ROUND_RESULT,
            Self::GameEnded { .. } => names::GAME_ENDED,
        }
    }

    pub fn payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_payload_is_camel_case() {
        let payload = OutboundEvent::TimerUpdate {
            seconds_remaining: 12,
        }
        .payload();
        assert_eq!(payload["secondsRemaining"], 12);
    }

    #[test]
    fn round_result_hides_nothing_about_the_answer() {
        let event = OutboundEvent::RoundResult {
            correct_answer: "Toxic".into(),
            teams: vec![RoundTeamResult {
                id: "t1".into(),
                name: "Team Red".into(),
                score: 150,
                answer: Some("Toxic".into()),
                is_correct: true,
            }],
        };
        assert_eq!(event.name(), "round.result");
        let payload = event.payload();
        assert_eq!(payload["correctAnswer"], "Toxic");
        assert_eq!(payload["teams"][0]["isCorrect"], true);
    }
}
