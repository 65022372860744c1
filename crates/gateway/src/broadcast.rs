//! Fan-out from the engine to connected WebSocket clients.
//!
//! The engine hands over one event at a time, already in emission order
//! (the per-session coordinator serializes them); this side only stamps a
//! sequence number and writes to the matching client channels. A client
//! whose channel is gone is skipped, never retried.

use std::sync::Weak;

use {async_trait::async_trait, tracing::trace};

use {
    chorus_engine::{events::OutboundEvent, model::CallerId, outbound::Outbound},
    chorus_protocol::EventFrame,
};

use crate::state::GatewayState;

pub struct GatewayOutbound {
    state: Weak<GatewayState>,
}

impl GatewayOutbound {
    pub fn new(state: Weak<GatewayState>) -> Self {
        Self { state }
    }

    fn frame(state: &GatewayState, event: &OutboundEvent) -> Option<String> {
        let frame = EventFrame {
            seq: state.next_seq(),
            event: event.name().to_string(),
            payload: event.payload(),
        };
        serde_json::to_string(&frame).ok()
    }
}

#[async_trait]
impl Outbound for GatewayOutbound {
    async fn send_to_session(&self, code: &str, event: &OutboundEvent) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let Some(text) = Self::frame(&state, event) else {
            return;
        };
        let clients = state.clients.read().await;
        let mut delivered = 0usize;
        for client in clients.values() {
            let in_session = client.binding.as_ref().is_some_and(|b| b.code == code);
            if in_session && client.send(&text) {
                delivered += 1;
            }
        }
        trace!(code, event = event.name(), delivered, "session broadcast");
    }

    async fn send_to_caller(&self, caller: &CallerId, event: &OutboundEvent) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let Some(text) = Self::frame(&state, event) else {
            return;
        };
        state.send_to_conn(caller, &text).await;
    }
}
