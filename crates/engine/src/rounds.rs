//! Round lifecycle helpers: question intake, answer recording, scoring,
//! result assembly. The coordinator drives these and owns the timers.

use crate::{
    error::EngineError,
    events::{OutboundEvent, RoundTeamResult},
    model::{AnswerRecord, PlayerId, Question, Session, now_ms},
};

pub const BASE_POINTS: u32 = 100;
pub const BONUS_PER_SECOND: u32 = 10;

/// Speed bonus from the measured time between round start and the team's
/// answer. Monotonically non-increasing in elapsed time, floor 0.
pub fn speed_bonus(round_seconds: u32, elapsed_seconds: u32) -> u32 {
    BONUS_PER_SECOND * round_seconds.saturating_sub(elapsed_seconds)
}

/// Advance to the next round: bump the index, register the question, and
/// clear every team's answer slot.
///
/// Returns the `NewQuestion` broadcast.
pub fn begin_round(session: &mut Session, question: Question) -> OutboundEvent {
    session.current_round += 1;
    clear_answers(session);

    let view = question.view();
    session.question_ids.push(question.id.clone());
    session.questions.insert(question.id.clone(), question);

    OutboundEvent::NewQuestion {
        question: view,
        round_index: session.current_round,
        max_rounds: session.max_rounds,
        theme: session.theme.clone(),
        status: session.status,
    }
}

pub fn clear_answers(session: &mut Session) {
    for team in session.teams.values_mut() {
        team.current_answer = None;
    }
}

// ── Answer intake ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SubmitOutcome {
    Recorded {
        /// Caller-only `AnswerRecorded` acknowledgement.
        ack: OutboundEvent,
        /// Every team has now answered; the round can resolve early.
        all_answered: bool,
    },
    /// The team already has an answer this round. Silently tolerated so
    /// client retries and racing teammates cannot double-score.
    Duplicate,
}

/// Record a team's collective answer. The first write wins; the team's
/// `current_answer` transitions null → non-null at most once per round.
pub fn submit(
    session: &mut Session,
    player_id: &PlayerId,
    answer: String,
    elapsed_seconds: u32,
) -> Result<SubmitOutcome, EngineError> {
    let player = session
        .players
        .get(player_id)
        .ok_or_else(|| EngineError::NotFound("player".into()))?;
    let team_id = player.team_id.clone().ok_or(EngineError::NotOnTeam)?;

    let question = session
        .current_question()
        .ok_or_else(|| EngineError::NotFound("question".into()))?;
    let question_id = question.id.clone();
    let is_correct = answer == question.correct_answer;

    {
        let team = session
            .teams
            .get(&team_id)
            .ok_or_else(|| EngineError::NotFound("team".into()))?;
        if team.current_answer.is_some() {
            return Ok(SubmitOutcome::Duplicate);
        }
    }

    let points = if is_correct {
        BASE_POINTS + speed_bonus(session.round_seconds(), elapsed_seconds)
    } else {
        0
    };

    let team = session
        .teams
        .get_mut(&team_id)
        .ok_or_else(|| EngineError::NotFound("team".into()))?;
    team.current_answer = Some(answer.clone());
    team.score += points;

    session.answers.push(AnswerRecord {
        team_id,
        question_id,
        selected_answer: answer.clone(),
        is_correct,
        elapsed_seconds,
        recorded_at: now_ms(),
    });

    Ok(SubmitOutcome::Recorded {
        ack: OutboundEvent::AnswerRecorded {
            is_correct,
            points,
            answer,
        },
        all_answered: session.all_teams_answered(),
    })
}

// ── Resolution ───────────────────────────────────────────────────────────────

/// Assemble the `RoundResult` broadcast. Teams that never answered show up
/// with a null answer and `is_correct: false`.
pub fn round_result(session: &Session, question: &Question) -> OutboundEvent {
    let teams = session
        .teams_in_order()
        .map(|team| RoundTeamResult {
            id: team.id.clone(),
            name: team.name.clone(),
            score: team.score,
            answer: team.current_answer.clone(),
            is_correct: team.current_answer.as_deref() == Some(question.correct_answer.as_str()),
        })
        .collect();

    OutboundEvent::RoundResult {
        correct_answer: question.correct_answer.clone(),
        teams,
    }
}
