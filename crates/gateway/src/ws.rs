//! Per-connection WebSocket plumbing: a read loop that feeds frames into
//! the method registry and a write loop draining the client's channel.
//!
//! A dropped socket is the only disconnect signal; teardown forwards it to
//! the session the connection was bound to so the engine can mark the
//! player disconnected.

use std::{net::SocketAddr, sync::Arc};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use chorus_protocol::{EventFrame, RequestFrame, ResponseFrame, error_codes, events};

use crate::{
    methods::{MethodContext, MethodRegistry},
    state::GatewayState,
};

pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    methods: Arc<MethodRegistry>,
    addr: SocketAddr,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let (sender, mut outbox) = mpsc::unbounded_channel::<String>();
    state.register_client(conn_id.clone(), sender).await;
    info!(conn_id = %conn_id, %addr, "client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => {
                handle_frame(text.as_str(), &conn_id, &state, &methods).await;
            },
            Message::Close(_) => break,
            // Pings are answered by axum; binary frames are not part of
            // the protocol.
            _ => {},
        }
    }

    if let Some(client) = state.remove_client(&conn_id).await
        && let Some(binding) = client.binding
    {
        if let Some(handle) = state.registry.get(&binding.code) {
            handle.disconnect(binding.player_id, conn_id.clone());
        }
        debug!(conn_id = %conn_id, code = %binding.code, "unbound from session");
    }
    writer.abort();
    info!(conn_id = %conn_id, "client disconnected");
}

async fn handle_frame(
    text: &str,
    conn_id: &str,
    state: &Arc<GatewayState>,
    methods: &MethodRegistry,
) {
    let frame: RequestFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            // No request id to correlate a response with; push a caller-only
            // error event instead.
            warn!(conn_id = %conn_id, error = %e, "unparseable frame");
            let event = EventFrame {
                seq: state.next_seq(),
                event: events::ERROR.to_string(),
                payload: serde_json::json!({
                    "code": error_codes::INVALID_REQUEST,
                    "message": format!("unparseable frame: {e}"),
                }),
            };
            if let Ok(text) = serde_json::to_string(&event) {
                state.send_to_conn(conn_id, &text).await;
            }
            return;
        },
    };

    let response = methods
        .dispatch(MethodContext {
            request_id: frame.id,
            method: frame.method,
            params: frame.params,
            conn_id: conn_id.to_string(),
            state: Arc::clone(state),
        })
        .await;
    send_response(state, conn_id, &response).await;
}

async fn send_response(state: &GatewayState, conn_id: &str, response: &ResponseFrame) {
    match serde_json::to_string(response) {
        Ok(text) => {
            state.send_to_conn(conn_id, &text).await;
        },
        Err(e) => warn!(conn_id = %conn_id, error = %e, "response serialization failed"),
    }
}
