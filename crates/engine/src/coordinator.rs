//! Per-session coordinator: one task owns the [`Session`] and drains a
//! single command queue, so every event (join, team change, answer,
//! disconnect, timer tick) runs to completion, broadcasts included, before
//! the next one starts.
//!
//! Timers never mutate state directly: the countdown and settle tasks only
//! feed commands back into the same queue, tagged with the round they
//! belong to, and the loop discards anything stale. Each round holds one
//! cancellation token that resolution cancels before any transition, so a
//! superseded round can never tick again.

use std::{sync::Arc, time::Duration};

use {
    tokio::{
        sync::{mpsc, oneshot},
        time::Instant,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    error::EngineError,
    events::OutboundEvent,
    model::{CallerId, PlayerId, Session, SessionSnapshot, SessionStatus, TeamId},
    outbound::Outbound,
    questions::QuestionSource,
    roster::{self, JoinReply},
    rounds::{self, SubmitOutcome},
};

// ── Commands ─────────────────────────────────────────────────────────────────

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

pub enum SessionCommand {
    Join {
        caller: CallerId,
        display_name: String,
        reconnect_token: Option<String>,
        reply: Reply<JoinReply>,
    },
    CreateTeam {
        player_id: PlayerId,
        name: String,
        avatar: String,
        reply: Reply<crate::model::TeamSnapshot>,
    },
    JoinTeam {
        player_id: PlayerId,
        team_id: TeamId,
        reply: Reply<()>,
    },
    SetReady {
        player_id: PlayerId,
        is_ready: bool,
        reply: Reply<()>,
    },
    Start {
        player_id: PlayerId,
        reply: Reply<()>,
    },
    SubmitAnswer {
        player_id: PlayerId,
        answer: String,
        reply: Reply<()>,
    },
    Disconnect {
        player_id: PlayerId,
        caller: CallerId,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    // Internal: fed back by the countdown and settle tasks.
    TimerTick {
        round: i32,
        seconds_remaining: u32,
    },
    SettleElapsed {
        round: i32,
    },
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Cloneable handle to one session's command queue. All methods serialize
/// through the owning task; a closed queue means the session is gone.
#[derive(Clone)]
pub struct SessionHandle {
    code: String,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn code(&self) -> &str {
        &self.code
    }

    /// True once the coordinator task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .map_err(|_| EngineError::NotFound("session".into()))?;
        rx.await
            .map_err(|_| EngineError::Internal("session dropped the reply".into()))?
    }

    pub async fn join(
        &self,
        caller: CallerId,
        display_name: String,
        reconnect_token: Option<String>,
    ) -> Result<JoinReply, EngineError> {
        self.request(|reply| SessionCommand::Join {
            caller,
            display_name,
            reconnect_token,
            reply,
        })
        .await
    }

    pub async fn create_team(
        &self,
        player_id: PlayerId,
        name: String,
        avatar: String,
    ) -> Result<crate::model::TeamSnapshot, EngineError> {
        self.request(|reply| SessionCommand::CreateTeam {
            player_id,
            name,
            avatar,
            reply,
        })
        .await
    }

    pub async fn join_team(&self, player_id: PlayerId, team_id: TeamId) -> Result<(), EngineError> {
        self.request(|reply| SessionCommand::JoinTeam {
            player_id,
            team_id,
            reply,
        })
        .await
    }

    pub async fn set_ready(&self, player_id: PlayerId, is_ready: bool) -> Result<(), EngineError> {
        self.request(|reply| SessionCommand::SetReady {
            player_id,
            is_ready,
            reply,
        })
        .await
    }

    pub async fn start(&self, player_id: PlayerId) -> Result<(), EngineError> {
        self.request(|reply| SessionCommand::Start { player_id, reply })
            .await
    }

    pub async fn submit_answer(
        &self,
        player_id: PlayerId,
        answer: String,
    ) -> Result<(), EngineError> {
        self.request(|reply| SessionCommand::SubmitAnswer {
            player_id,
            answer,
            reply,
        })
        .await
    }

    /// Transport-driven; fire-and-forget. `caller` identifies the closed
    /// connection so a stale socket cannot sever a reconnected player.
    pub fn disconnect(&self, player_id: PlayerId, caller: CallerId) {
        let _ = self.tx.send(SessionCommand::Disconnect { player_id, caller });
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Snapshot { reply: tx })
            .map_err(|_| EngineError::NotFound("session".into()))?;
        rx.await
            .map_err(|_| EngineError::Internal("session dropped the reply".into()))
    }
}

// ── Task ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundPhase {
    Active,
    Resolving,
}

/// Live state of the round in flight. Exists only between round start and
/// the settle transition that follows resolution.
struct RoundRuntime {
    index: i32,
    started_at: Instant,
    cancel: CancellationToken,
    phase: RoundPhase,
}

struct SessionTask {
    session: Session,
    outbound: Arc<dyn Outbound>,
    questions: Arc<dyn QuestionSource>,
    settle: Duration,
    tx: mpsc::UnboundedSender<SessionCommand>,
    round: Option<RoundRuntime>,
}

/// Spawn the coordinator task for a session and return its handle.
pub fn spawn_session(
    session: Session,
    outbound: Arc<dyn Outbound>,
    questions: Arc<dyn QuestionSource>,
    settle: Duration,
) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SessionHandle {
        code: session.code.clone(),
        tx: tx.clone(),
    };
    let task = SessionTask {
        session,
        outbound,
        questions,
        settle,
        tx,
        round: None,
    };
    tokio::spawn(run(task, rx));
    handle
}

async fn run(mut task: SessionTask, mut rx: mpsc::UnboundedReceiver<SessionCommand>) {
    debug!(code = %task.session.code, "session coordinator started");
    while let Some(cmd) = rx.recv().await {
        task.handle(cmd).await;
        if task.finished_and_abandoned() {
            break;
        }
    }
    if let Some(round) = task.round.take() {
        round.cancel.cancel();
    }
    info!(code = %task.session.code, "session coordinator stopped");
}

impl SessionTask {
    /// The task exits once the game is over and the last player has left;
    /// the registry sweep then drops the handle.
    fn finished_and_abandoned(&self) -> bool {
        self.session.status == SessionStatus::Finished
            && self.session.connected_players().next().is_none()
    }

    async fn handle(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Join {
                caller,
                display_name,
                reconnect_token,
                reply,
            } => {
                let outcome =
                    roster::join(&mut self.session, caller.clone(), display_name, reconnect_token);
                self.broadcast_all(&outcome.broadcasts).await;
                // Late joiners and reconnects get the in-flight round
                // replayed to them alone.
                if outcome.reconnected || outcome.reply.player.is_observer {
                    self.replay_round_to(&caller).await;
                }
                let _ = reply.send(Ok(outcome.reply));
            },
            SessionCommand::CreateTeam {
                player_id,
                name,
                avatar,
                reply,
            } => {
                let res = match roster::create_team(&mut self.session, &player_id, name, avatar) {
                    Ok((team, broadcasts)) => {
                        self.broadcast_all(&broadcasts).await;
                        Ok(team)
                    },
                    Err(e) => Err(e),
                };
                self.reply_logged("create_team", reply, res);
            },
            SessionCommand::JoinTeam {
                player_id,
                team_id,
                reply,
            } => {
                let res = match roster::join_team(&mut self.session, &player_id, &team_id) {
                    Ok(broadcasts) => {
                        self.broadcast_all(&broadcasts).await;
                        Ok(())
                    },
                    Err(e) => Err(e),
                };
                self.reply_logged("join_team", reply, res);
            },
            SessionCommand::SetReady {
                player_id,
                is_ready,
                reply,
            } => {
                let res = match roster::set_ready(&mut self.session, &player_id, is_ready) {
                    Ok(broadcasts) => {
                        self.broadcast_all(&broadcasts).await;
                        Ok(())
                    },
                    Err(e) => Err(e),
                };
                self.reply_logged("set_ready", reply, res);
            },
            SessionCommand::Start { player_id, reply } => {
                let res = self.handle_start(&player_id).await;
                self.reply_logged("start", reply, res);
            },
            SessionCommand::SubmitAnswer {
                player_id,
                answer,
                reply,
            } => {
                let res = self.handle_submit(&player_id, answer).await;
                self.reply_logged("submit_answer", reply, res);
            },
            SessionCommand::Disconnect { player_id, caller } => {
                let broadcasts = roster::disconnect(&mut self.session, &player_id, &caller);
                self.broadcast_all(&broadcasts).await;
            },
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot());
            },
            SessionCommand::TimerTick {
                round,
                seconds_remaining,
            } => {
                self.handle_tick(round, seconds_remaining).await;
            },
            SessionCommand::SettleElapsed { round } => {
                self.handle_settle(round).await;
            },
        }
    }

    fn reply_logged<T>(&self, op: &str, reply: Reply<T>, res: Result<T, EngineError>) {
        if let Err(e) = &res {
            warn!(code = %self.session.code, op, error = %e, "operation rejected");
        }
        let _ = reply.send(res);
    }

    async fn broadcast_all(&self, events: &[OutboundEvent]) {
        for event in events {
            self.outbound.send_to_session(&self.session.code, event).await;
        }
    }

    /// Caller-only replay of the active question and countdown, used for
    /// reconnects and observers arriving mid-round.
    async fn replay_round_to(&self, caller: &CallerId) {
        if self.session.status != SessionStatus::InProgress {
            return;
        }
        let Some(round) = &self.round else { return };
        if round.phase != RoundPhase::Active {
            return;
        }
        let Some(question) = self.session.current_question() else {
            return;
        };
        let replay = OutboundEvent::NewQuestion {
            question: question.view(),
            round_index: self.session.current_round,
            max_rounds: self.session.max_rounds,
            theme: self.session.theme.clone(),
            status: self.session.status,
        };
        self.outbound.send_to_caller(caller, &replay).await;

        let elapsed = round.started_at.elapsed();
        let remaining = self.session.round_duration.saturating_sub(elapsed).as_secs() as u32;
        self.outbound
            .send_to_caller(caller, &OutboundEvent::TimerUpdate {
                seconds_remaining: remaining,
            })
            .await;
    }

    // ── Start / rounds ───────────────────────────────────────────────────

    async fn handle_start(&mut self, player_id: &PlayerId) -> Result<(), EngineError> {
        if self.session.status != SessionStatus::Waiting {
            return Err(EngineError::InvalidState(
                "the session has already started".into(),
            ));
        }
        let player = self
            .session
            .players
            .get(player_id)
            .ok_or_else(|| EngineError::NotFound("player".into()))?;
        if !player.is_leader {
            return Err(EngineError::PermissionDenied(
                "only the leader can start the session".into(),
            ));
        }
        roster::start_readiness(&self.session)?;

        self.session.status = SessionStatus::InProgress;
        self.outbound
            .send_to_session(&self.session.code, &OutboundEvent::GameStarted {
                session: self.session.snapshot(),
            })
            .await;
        self.start_round().await;
        Ok(())
    }

    async fn start_round(&mut self) {
        let question = self.questions.next_question(&self.session.theme);
        let event = rounds::begin_round(&mut self.session, question);
        self.outbound.send_to_session(&self.session.code, &event).await;

        let cancel = CancellationToken::new();
        self.round = Some(RoundRuntime {
            index: self.session.current_round,
            started_at: Instant::now(),
            cancel: cancel.clone(),
            phase: RoundPhase::Active,
        });
        spawn_countdown(
            self.tx.clone(),
            cancel,
            self.session.current_round,
            self.session.round_seconds(),
        );
    }

    async fn handle_submit(
        &mut self,
        player_id: &PlayerId,
        answer: String,
    ) -> Result<(), EngineError> {
        if self.session.status != SessionStatus::InProgress {
            return Err(EngineError::InvalidState("no round in progress".into()));
        }
        let Some(round) = &self.round else {
            return Err(EngineError::InvalidState("no round in progress".into()));
        };
        if round.phase == RoundPhase::Resolving {
            // Late submission racing the resolution; tolerated silently.
            return Ok(());
        }

        let elapsed = round.started_at.elapsed().as_secs() as u32;
        match rounds::submit(&mut self.session, player_id, answer, elapsed)? {
            SubmitOutcome::Recorded { ack, all_answered } => {
                let conn = self
                    .session
                    .players
                    .get(player_id)
                    .and_then(|p| p.conn.clone());
                if let Some(conn) = conn {
                    self.outbound.send_to_caller(&conn, &ack).await;
                }
                if all_answered {
                    self.resolve_round().await;
                }
            },
            SubmitOutcome::Duplicate => {},
        }
        Ok(())
    }

    async fn handle_tick(&mut self, round: i32, seconds_remaining: u32) {
        let live = self
            .round
            .as_ref()
            .is_some_and(|rt| rt.index == round && rt.phase == RoundPhase::Active);
        if !live {
            // Tick from a superseded round; the token is already cancelled.
            return;
        }
        self.outbound
            .send_to_session(&self.session.code, &OutboundEvent::TimerUpdate {
                seconds_remaining,
            })
            .await;
        if seconds_remaining == 0 {
            debug!(code = %self.session.code, round, "countdown expired, forcing resolution");
            self.resolve_round().await;
        }
    }

    /// Exactly once per round: either the last team answered or the
    /// countdown hit zero, never both.
    async fn resolve_round(&mut self) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        if round.phase == RoundPhase::Resolving {
            return;
        }
        round.phase = RoundPhase::Resolving;
        // Cancel before any transition so no tick outlives this round.
        round.cancel.cancel();
        let index = round.index;

        let Some(question) = self.session.current_question().cloned() else {
            warn!(code = %self.session.code, round = index, "resolving round without a question");
            return;
        };
        let result = rounds::round_result(&self.session, &question);
        self.outbound.send_to_session(&self.session.code, &result).await;

        let tx = self.tx.clone();
        let settle = self.settle;
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            let _ = tx.send(SessionCommand::SettleElapsed { round: index });
        });
    }

    async fn handle_settle(&mut self, round: i32) {
        let matches = self
            .round
            .as_ref()
            .is_some_and(|rt| rt.index == round && rt.phase == RoundPhase::Resolving);
        if !matches {
            return;
        }
        self.round = None;
        rounds::clear_answers(&mut self.session);

        if self.session.current_round + 1 >= self.session.max_rounds as i32 {
            self.session.current_round = self.session.max_rounds as i32;
            self.session.status = SessionStatus::Finished;
            let teams = self
                .session
                .teams_in_order()
                .map(|t| self.session.team_snapshot(t))
                .collect();
            self.outbound
                .send_to_session(&self.session.code, &OutboundEvent::GameEnded { teams })
                .await;
            info!(code = %self.session.code, "game ended");
        } else {
            self.start_round().await;
        }
    }
}

/// One cancellable countdown per round. Emits a tick immediately (full
/// duration), then once per second down to zero; the zero tick doubles as
/// the expiry signal. Cancellation wins every race against the next tick.
fn spawn_countdown(
    tx: mpsc::UnboundedSender<SessionCommand>,
    cancel: CancellationToken,
    round: i32,
    seconds: u32,
) {
    tokio::spawn(async move {
        for seconds_remaining in (0..=seconds).rev() {
            if cancel.is_cancelled() {
                return;
            }
            if tx
                .send(SessionCommand::TimerTick {
                    round,
                    seconds_remaining,
                })
                .is_err()
            {
                return;
            }
            if seconds_remaining == 0 {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {},
            }
        }
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {async_trait::async_trait, serde_json::Value, tokio::sync::Mutex};

    use super::*;
    use crate::model::{Question, SessionOptions};

    const CORRECT: &str = "Mr. Brightside";

    struct ScriptedSource;

    impl QuestionSource for ScriptedSource {
        fn next_question(&self, theme: &str) -> Question {
            Question {
                id: uuid::Uuid::new_v4().to_string(),
                audio_url: format!("/audio/{theme}/mr_brightside.mp3"),
                answers: vec![
                    CORRECT.into(),
                    "Toxic".into(),
                    "Hey Ya!".into(),
                    "Umbrella".into(),
                ],
                correct_answer: CORRECT.into(),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Scope {
        Session,
        Caller(String),
    }

    #[derive(Default)]
    struct RecordingOutbound {
        events: Mutex<Vec<(Scope, &'static str, Value)>>,
    }

    #[async_trait]
    impl Outbound for RecordingOutbound {
        async fn send_to_session(&self, _code: &str, event: &OutboundEvent) {
            self.events
                .lock()
                .await
                .push((Scope::Session, event.name(), event.payload()));
        }

        async fn send_to_caller(&self, caller: &CallerId, event: &OutboundEvent) {
            self.events
                .lock()
                .await
                .push((Scope::Caller(caller.clone()), event.name(), event.payload()));
        }
    }

    impl RecordingOutbound {
        async fn session_names(&self) -> Vec<&'static str> {
            self.events
                .lock()
                .await
                .iter()
                .filter(|(scope, ..)| *scope == Scope::Session)
                .map(|(_, name, _)| *name)
                .collect()
        }

        async fn count(&self, name: &str) -> usize {
            self.events
                .lock()
                .await
                .iter()
                .filter(|(_, n, _)| *n == name)
                .count()
        }

        async fn caller_names(&self, caller: &str) -> Vec<&'static str> {
            self.events
                .lock()
                .await
                .iter()
                .filter(|(scope, ..)| *scope == Scope::Caller(caller.to_string()))
                .map(|(_, name, _)| *name)
                .collect()
        }

        async fn payloads(&self, name: &str) -> Vec<Value> {
            self.events
                .lock()
                .await
                .iter()
                .filter(|(_, n, _)| *n == name)
                .map(|(.., payload)| payload.clone())
                .collect()
        }
    }

    fn spawn(max_rounds: u32, round_seconds: u32) -> (SessionHandle, Arc<RecordingOutbound>) {
        let outbound = Arc::new(RecordingOutbound::default());
        let session = Session::new("ABC23".into(), SessionOptions {
            theme: "Pop".into(),
            max_rounds,
            round_seconds,
        });
        let outbound_dyn: Arc<dyn Outbound> = outbound.clone();
        let handle = spawn_session(
            session,
            outbound_dyn,
            Arc::new(ScriptedSource),
            Duration::from_secs(5),
        );
        (handle, outbound)
    }

    /// Let spawned tasks drain the command queue after a virtual time jump.
    async fn drain() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    async fn join_two(handle: &SessionHandle) -> (JoinReply, JoinReply) {
        let ana = handle
            .join("conn-ana".into(), "ana".into(), None)
            .await
            .expect("join ana");
        let bo = handle
            .join("conn-bo".into(), "bo".into(), None)
            .await
            .expect("join bo");
        handle
            .set_ready(ana.player.id.clone(), true)
            .await
            .expect("ready ana");
        handle
            .set_ready(bo.player.id.clone(), true)
            .await
            .expect("ready bo");
        (ana, bo)
    }

    #[tokio::test]
    async fn concurrent_joins_elect_exactly_one_leader() {
        let (handle, _outbound) = spawn(2, 30);
        let (a, b, c, d) = tokio::join!(
            handle.join("c1".into(), "p1".into(), None),
            handle.join("c2".into(), "p2".into(), None),
            handle.join("c3".into(), "p3".into(), None),
            handle.join("c4".into(), "p4".into(), None),
        );
        let replies = [
            a.expect("p1"),
            b.expect("p2"),
            c.expect("p3"),
            d.expect("p4"),
        ];
        let snapshot = handle.snapshot().await.expect("snapshot");
        let leaders = snapshot.players.iter().filter(|p| p.is_leader).count();
        assert_eq!(leaders, 1);
        // The first join to complete is the leader.
        let leader_ids: Vec<_> = replies
            .iter()
            .filter(|r| r.player.is_leader)
            .map(|r| r.player.id.clone())
            .collect();
        assert_eq!(leader_ids.len(), 1);
    }

    #[tokio::test]
    async fn start_gate_checks_leader_state_and_readiness() {
        let (handle, _outbound) = spawn(1, 30);
        let ana = handle
            .join("conn-ana".into(), "ana".into(), None)
            .await
            .expect("join");
        let bo = handle
            .join("conn-bo".into(), "bo".into(), None)
            .await
            .expect("join");

        // Submitting before the game starts is an invalid state.
        assert!(matches!(
            handle
                .submit_answer(ana.player.id.clone(), "Toxic".into())
                .await,
            Err(EngineError::InvalidState(_))
        ));

        // Non-leader cannot start.
        assert!(matches!(
            handle.start(bo.player.id.clone()).await,
            Err(EngineError::PermissionDenied(_))
        ));

        // Leader blocked until everyone connected is ready.
        assert!(matches!(
            handle.start(ana.player.id.clone()).await,
            Err(EngineError::NotReady(_))
        ));

        handle
            .set_ready(ana.player.id.clone(), true)
            .await
            .expect("ready");
        handle
            .set_ready(bo.player.id.clone(), true)
            .await
            .expect("ready");
        handle.start(ana.player.id.clone()).await.expect("start");

        // Starting twice is an invalid state, not a crash.
        assert!(matches!(
            handle.start(ana.player.id.clone()).await,
            Err(EngineError::InvalidState(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_round_scores_the_silent_team_zero_and_ends_the_game() {
        let (handle, outbound) = spawn(1, 30);
        let (ana, bo) = join_two(&handle).await;
        handle.start(ana.player.id.clone()).await.expect("start");

        // A answers correctly five seconds in; B never answers.
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle
            .submit_answer(ana.player.id.clone(), CORRECT.into())
            .await
            .expect("submit");

        let acks = outbound.payloads(chorus_protocol::events::ANSWER_RECORDED).await;
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0]["isCorrect"], true);
        assert_eq!(acks[0]["points"], 100 + 10 * 25);

        // Ride past the countdown: the round force-resolves at 30s.
        tokio::time::sleep(Duration::from_secs(26)).await;
        drain().await;

        let results = outbound.payloads(chorus_protocol::events::ROUND_RESULT).await;
        assert_eq!(results.len(), 1, "resolution must happen exactly once");
        assert_eq!(results[0]["correctAnswer"], CORRECT);
        let teams = results[0]["teams"].as_array().expect("teams");
        let correct_of = |team_id: &str| {
            teams
                .iter()
                .find(|t| t["id"] == team_id)
                .map(|t| t["isCorrect"].as_bool().unwrap_or(false))
                .unwrap_or(false)
        };
        let ana_team = ana.player.team_id.as_deref().expect("ana team");
        let bo_team = bo.player.team_id.as_deref().expect("bo team");
        assert!(correct_of(ana_team));
        assert!(!correct_of(bo_team));

        // After the settle delay the single-round game is over.
        tokio::time::sleep(Duration::from_secs(6)).await;
        drain().await;
        assert_eq!(outbound.count(chorus_protocol::events::GAME_ENDED).await, 1);

        let snapshot = handle.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.status, SessionStatus::Finished);
        assert_eq!(snapshot.current_round, snapshot.max_rounds as i32);
        let scores: Vec<u32> = snapshot.teams.iter().map(|t| t.score).collect();
        assert!(scores.contains(&350));
        assert!(scores.contains(&0));
    }

    #[tokio::test(start_paused = true)]
    async fn all_teams_answering_resolves_before_the_timer() {
        let (handle, outbound) = spawn(2, 30);
        let (ana, bo) = join_two(&handle).await;
        handle.start(ana.player.id.clone()).await.expect("start");

        tokio::time::sleep(Duration::from_secs(2)).await;
        handle
            .submit_answer(ana.player.id.clone(), CORRECT.into())
            .await
            .expect("submit ana");
        handle
            .submit_answer(bo.player.id.clone(), "Toxic".into())
            .await
            .expect("submit bo");
        drain().await;

        assert_eq!(outbound.count(chorus_protocol::events::ROUND_RESULT).await, 1);
        // No zero tick: the countdown was cancelled, not expired.
        let ticks = outbound.payloads(chorus_protocol::events::TIMER_UPDATE).await;
        assert!(ticks.iter().all(|t| t["secondsRemaining"] != 0));

        // Settle, then the next round starts with a fresh question.
        tokio::time::sleep(Duration::from_secs(6)).await;
        drain().await;
        assert_eq!(outbound.count(chorus_protocol::events::NEW_QUESTION).await, 2);
        let snapshot = handle.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.current_round, 1);
        assert_eq!(snapshot.status, SessionStatus::InProgress);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_and_late_submissions_are_silently_ignored() {
        let (handle, outbound) = spawn(2, 30);
        let (ana, bo) = join_two(&handle).await;
        handle.start(ana.player.id.clone()).await.expect("start");

        handle
            .submit_answer(ana.player.id.clone(), "Toxic".into())
            .await
            .expect("first");
        // Retry from the same team: accepted, ignored, never re-scored.
        handle
            .submit_answer(ana.player.id.clone(), CORRECT.into())
            .await
            .expect("retry");
        assert_eq!(
            outbound
                .caller_names("conn-ana")
                .await
                .iter()
                .filter(|n| **n == chorus_protocol::events::ANSWER_RECORDED)
                .count(),
            1
        );

        handle
            .submit_answer(bo.player.id.clone(), CORRECT.into())
            .await
            .expect("bo");
        drain().await;
        assert_eq!(outbound.count(chorus_protocol::events::ROUND_RESULT).await, 1);

        // The round is settling; another submit is tolerated silently.
        handle
            .submit_answer(bo.player.id.clone(), "Toxic".into())
            .await
            .expect("late");
        assert_eq!(outbound.count(chorus_protocol::events::ANSWER_RECORDED).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_replays_the_in_flight_round_to_the_caller_only() {
        let (handle, outbound) = spawn(1, 30);
        let (ana, _bo) = join_two(&handle).await;
        handle.start(ana.player.id.clone()).await.expect("start");

        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.disconnect(ana.player.id.clone(), "conn-ana".into());

        let back = handle
            .join(
                "conn-ana-2".into(),
                "ana".into(),
                Some(ana.reconnect_token.clone()),
            )
            .await
            .expect("rejoin");
        assert_eq!(back.player.id, ana.player.id);
        assert_eq!(back.player.team_id, ana.player.team_id);

        drain().await;
        // Same logical player: reconnected broadcast, no third join.
        assert_eq!(outbound.count(chorus_protocol::events::PLAYER_JOINED).await, 2);
        assert_eq!(
            outbound.count(chorus_protocol::events::PLAYER_RECONNECTED).await,
            1
        );

        // The new connection got the question and the live countdown value.
        let replayed = outbound.caller_names("conn-ana-2").await;
        assert!(replayed.contains(&chorus_protocol::events::NEW_QUESTION));
        let timers: Vec<Value> = outbound
            .events
            .lock()
            .await
            .iter()
            .filter(|(scope, name, _)| {
                *scope == Scope::Caller("conn-ana-2".to_string())
                    && *name == chorus_protocol::events::TIMER_UPDATE
            })
            .map(|(.., p)| p.clone())
            .collect();
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0]["secondsRemaining"], 27);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_socket_close_does_not_sever_a_reconnected_player() {
        let (handle, _outbound) = spawn(1, 30);
        let ana = handle
            .join("conn-old".into(), "ana".into(), None)
            .await
            .expect("join");

        let back = handle
            .join(
                "conn-new".into(),
                "ana".into(),
                Some(ana.reconnect_token.clone()),
            )
            .await
            .expect("rejoin");
        assert_eq!(back.player.id, ana.player.id);

        // The replaced transport's close lands after the reconnect.
        handle.disconnect(ana.player.id.clone(), "conn-old".into());
        drain().await;

        let snapshot = handle.snapshot().await.expect("snapshot");
        let player = snapshot
            .players
            .iter()
            .find(|p| p.id == ana.player.id)
            .expect("player");
        assert!(player.is_connected);

        // Closing the live transport still severs.
        handle.disconnect(ana.player.id.clone(), "conn-new".into());
        drain().await;
        let snapshot = handle.snapshot().await.expect("snapshot");
        let player = snapshot
            .players
            .iter()
            .find(|p| p.id == ana.player.id)
            .expect("player");
        assert!(!player.is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn late_joiner_is_an_observer_and_gets_the_question() {
        let (handle, outbound) = spawn(1, 30);
        let (ana, _bo) = join_two(&handle).await;
        handle.start(ana.player.id.clone()).await.expect("start");
        tokio::time::sleep(Duration::from_secs(1)).await;

        let zed = handle
            .join("conn-zed".into(), "zed".into(), None)
            .await
            .expect("late join");
        assert!(zed.player.is_observer);
        assert!(zed.player.team_id.is_none());

        drain().await;
        let replayed = outbound.caller_names("conn-zed").await;
        assert!(replayed.contains(&chorus_protocol::events::NEW_QUESTION));

        // Observers cannot score.
        assert!(matches!(
            handle
                .submit_answer(zed.player.id.clone(), CORRECT.into())
                .await,
            Err(EngineError::NotOnTeam)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_ticks_once_per_second_in_order() {
        let (handle, outbound) = spawn(1, 30);
        let (ana, _bo) = join_two(&handle).await;
        handle.start(ana.player.id.clone()).await.expect("start");

        tokio::time::sleep(Duration::from_secs(3)).await;
        drain().await;

        let ticks: Vec<u64> = outbound
            .payloads(chorus_protocol::events::TIMER_UPDATE)
            .await
            .iter()
            .filter_map(|t| t["secondsRemaining"].as_u64())
            .collect();
        assert_eq!(ticks, vec![30, 29, 28, 27]);

        // Broadcast order so far: started, question, then ticks.
        let names = outbound.session_names().await;
        let started_at = names
            .iter()
            .position(|n| *n == chorus_protocol::events::GAME_STARTED)
            .expect("game.started");
        let question_at = names
            .iter()
            .position(|n| *n == chorus_protocol::events::NEW_QUESTION)
            .expect("round.question");
        assert!(started_at < question_at);
    }
}
