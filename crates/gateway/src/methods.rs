use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use {
    serde::Deserialize,
    serde::de::DeserializeOwned,
    tracing::{debug, warn},
};

use {
    chorus_engine::{CreateSessionOpts, SessionHandle, model::PlayerId},
    chorus_protocol::{ErrorShape, ResponseFrame, error_codes},
};

use crate::state::GatewayState;

// ── Types ────────────────────────────────────────────────────────────────────

/// Context passed to every method handler.
pub struct MethodContext {
    pub request_id: String,
    pub method: String,
    pub params: serde_json::Value,
    pub conn_id: String,
    pub state: Arc<GatewayState>,
}

/// The result a method handler produces.
pub type MethodResult = Result<serde_json::Value, ErrorShape>;

/// A boxed async method handler.
pub type HandlerFn =
    Box<dyn Fn(MethodContext) -> Pin<Box<dyn Future<Output = MethodResult> + Send>> + Send + Sync>;

fn parse<T: DeserializeOwned>(params: serde_json::Value) -> Result<T, ErrorShape> {
    serde_json::from_value(params)
        .map_err(|e| ErrorShape::invalid_request(format!("invalid params: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> MethodResult {
    serde_json::to_value(value).map_err(|e| ErrorShape::internal(e.to_string()))
}

/// Resolve the session this connection joined. Most methods require one.
async fn bound_handle(ctx: &MethodContext) -> Result<(SessionHandle, PlayerId), ErrorShape> {
    let binding = ctx
        .state
        .binding_of(&ctx.conn_id)
        .await
        .ok_or_else(|| ErrorShape::invalid_request("this connection has not joined a session"))?;
    let handle = ctx.state.registry.get(&binding.code).ok_or_else(|| {
        ErrorShape::new(error_codes::NOT_FOUND, "the session no longer exists")
    })?;
    Ok((handle, binding.player_id))
}

// ── Params ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct CreateParams {
    theme: Option<String>,
    max_rounds: Option<u32>,
    round_seconds: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetParams {
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinParams {
    code: String,
    display_name: String,
    #[serde(default)]
    reconnect_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeamCreateParams {
    name: String,
    #[serde(default)]
    avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeamJoinParams {
    team_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadyParams {
    is_ready: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitParams {
    answer: String,
}

// ── Method registry ──────────────────────────────────────────────────────────

pub struct MethodRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodRegistry {
    pub fn new() -> Self {
        let mut reg = Self {
            handlers: HashMap::new(),
        };
        reg.register_defaults();
        reg
    }

    pub fn register(&mut self, method: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert(method.into(), handler);
    }

    pub async fn dispatch(&self, ctx: MethodContext) -> ResponseFrame {
        let method = ctx.method.clone();
        let request_id = ctx.request_id.clone();
        let conn_id = ctx.conn_id.clone();

        let Some(handler) = self.handlers.get(&method) else {
            warn!(method, conn_id = %conn_id, "unknown method");
            return ResponseFrame::err(
                &request_id,
                ErrorShape::invalid_request(format!("unknown method: {method}")),
            );
        };

        debug!(method, request_id = %request_id, conn_id = %conn_id, "dispatching method");
        match handler(ctx).await {
            Ok(payload) => {
                debug!(method, request_id = %request_id, "method ok");
                ResponseFrame::ok(&request_id, payload)
            },
            Err(err) => {
                warn!(method, request_id = %request_id, code = %err.code, msg = %err.message, "method error");
                ResponseFrame::err(&request_id, err)
            },
        }
    }

    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    fn register_defaults(&mut self) {
        self.register_gateway_methods();
        self.register_session_methods();
        self.register_game_methods();
    }

    // ── Gateway-internal methods ─────────────────────────────────────────

    fn register_gateway_methods(&mut self) {
        // health
        self.register(
            "health",
            Box::new(|ctx| {
                Box::pin(async move {
                    let count = ctx.state.client_count().await;
                    Ok(serde_json::json!({
                        "status": "ok",
                        "version": ctx.state.version,
                        "connections": count,
                        "sessions": ctx.state.registry.len(),
                    }))
                })
            }),
        );
    }

    // ── Session lifecycle ────────────────────────────────────────────────

    fn register_session_methods(&mut self) {
        // session.create
        self.register(
            "session.create",
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: CreateParams = parse(ctx.params)?;
                    let defaults = &ctx.state.defaults;
                    let max_rounds = params.max_rounds.unwrap_or(defaults.default_max_rounds);
                    let round_seconds =
                        params.round_seconds.unwrap_or(defaults.default_round_seconds);
                    if !(1..=50).contains(&max_rounds) {
                        return Err(ErrorShape::invalid_request(
                            "maxRounds must be between 1 and 50",
                        ));
                    }
                    if !(5..=120).contains(&round_seconds) {
                        return Err(ErrorShape::invalid_request(
                            "roundSeconds must be between 5 and 120",
                        ));
                    }
                    let info = ctx.state.registry.create(CreateSessionOpts {
                        theme: params.theme.unwrap_or_else(|| defaults.default_theme.clone()),
                        max_rounds,
                        round_seconds,
                    });
                    to_json(&info)
                })
            }),
        );

        // session.get
        self.register(
            "session.get",
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: GetParams = parse(ctx.params)?;
                    let handle = ctx.state.registry.get(&params.code).ok_or_else(|| {
                        ErrorShape::new(error_codes::NOT_FOUND, "unknown session code")
                    })?;
                    let snapshot = handle.snapshot().await.map_err(ErrorShape::from)?;
                    to_json(&snapshot)
                })
            }),
        );

        // session.join: on success the connection speaks for that player
        // until it drops.
        self.register(
            "session.join",
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: JoinParams = parse(ctx.params)?;
                    if params.display_name.trim().is_empty() {
                        return Err(ErrorShape::invalid_request("displayName must not be empty"));
                    }
                    let handle = ctx.state.registry.get(&params.code).ok_or_else(|| {
                        ErrorShape::new(error_codes::NOT_FOUND, "unknown session code")
                    })?;
                    let reply = handle
                        .join(
                            ctx.conn_id.clone(),
                            params.display_name.trim().to_string(),
                            params.reconnect_token,
                        )
                        .await
                        .map_err(ErrorShape::from)?;
                    ctx.state
                        .bind_session(&ctx.conn_id, params.code, reply.player.id.clone())
                        .await;
                    to_json(&reply)
                })
            }),
        );
    }

    // ── In-session play ──────────────────────────────────────────────────

    fn register_game_methods(&mut self) {
        // team.create
        self.register(
            "team.create",
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: TeamCreateParams = parse(ctx.params.clone())?;
                    if params.name.trim().is_empty() {
                        return Err(ErrorShape::invalid_request("name must not be empty"));
                    }
                    let (handle, player_id) = bound_handle(&ctx).await?;
                    let team = handle
                        .create_team(
                            player_id,
                            params.name.trim().to_string(),
                            params.avatar.unwrap_or_else(|| "note".to_string()),
                        )
                        .await
                        .map_err(ErrorShape::from)?;
                    to_json(&team)
                })
            }),
        );

        // team.join
        self.register(
            "team.join",
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: TeamJoinParams = parse(ctx.params.clone())?;
                    let (handle, player_id) = bound_handle(&ctx).await?;
                    handle
                        .join_team(player_id, params.team_id)
                        .await
                        .map_err(ErrorShape::from)?;
                    Ok(serde_json::json!({}))
                })
            }),
        );

        // player.ready
        self.register(
            "player.ready",
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: ReadyParams = parse(ctx.params.clone())?;
                    let (handle, player_id) = bound_handle(&ctx).await?;
                    handle
                        .set_ready(player_id, params.is_ready)
                        .await
                        .map_err(ErrorShape::from)?;
                    Ok(serde_json::json!({}))
                })
            }),
        );

        // game.start
        self.register(
            "game.start",
            Box::new(|ctx| {
                Box::pin(async move {
                    let (handle, player_id) = bound_handle(&ctx).await?;
                    handle.start(player_id).await.map_err(ErrorShape::from)?;
                    Ok(serde_json::json!({}))
                })
            }),
        );

        // answer.submit
        self.register(
            "answer.submit",
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: SubmitParams = parse(ctx.params.clone())?;
                    let (handle, player_id) = bound_handle(&ctx).await?;
                    handle
                        .submit_answer(player_id, params.answer)
                        .await
                        .map_err(ErrorShape::from)?;
                    Ok(serde_json::json!({}))
                })
            }),
        );
    }
}
