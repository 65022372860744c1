use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::sync::{RwLock, mpsc};

use {
    chorus_config::{ChorusConfig, GameSection},
    chorus_engine::{
        SessionRegistry, model::PlayerId, outbound::Outbound, questions::SongCatalog,
    },
};

use crate::broadcast::GatewayOutbound;

// ── Connected client ─────────────────────────────────────────────────────────

/// What a connection is playing as, set once `session.join` succeeds.
#[derive(Debug, Clone)]
pub struct SessionBinding {
    pub code: String,
    pub player_id: PlayerId,
}

/// A WebSocket client currently connected to the gateway.
#[derive(Debug)]
pub struct ConnectedClient {
    pub conn_id: String,
    /// Channel for sending serialized frames to this client's write loop.
    pub sender: mpsc::UnboundedSender<String>,
    pub connected_at: Instant,
    pub binding: Option<SessionBinding>,
}

impl ConnectedClient {
    /// Send a serialized JSON frame to this client.
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

pub struct GatewayState {
    pub clients: RwLock<HashMap<String, ConnectedClient>>,
    pub registry: SessionRegistry,
    /// Applied when `session.create` omits a field.
    pub defaults: GameSection,
    pub version: String,
    seq: AtomicU64,
}

impl GatewayState {
    /// Build the state graph. The registry's outbound fan-out needs to see
    /// the client table, so the outbound holds a weak reference back here.
    pub fn new(config: &ChorusConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<GatewayState>| {
            let outbound: Arc<dyn Outbound> = Arc::new(GatewayOutbound::new(Weak::clone(weak)));
            let registry = SessionRegistry::new(
                outbound,
                Arc::new(SongCatalog::new()),
                Duration::from_secs(u64::from(config.game.settle_seconds)),
            );
            Self {
                clients: RwLock::new(HashMap::new()),
                registry,
                defaults: config.game.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                seq: AtomicU64::new(0),
            }
        })
    }

    /// Next event sequence number. Monotonic across the whole gateway.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn register_client(&self, conn_id: String, sender: mpsc::UnboundedSender<String>) {
        self.clients.write().await.insert(conn_id.clone(), ConnectedClient {
            conn_id,
            sender,
            connected_at: Instant::now(),
            binding: None,
        });
    }

    /// Remove a client, returning it so the caller can unwind its binding.
    pub async fn remove_client(&self, conn_id: &str) -> Option<ConnectedClient> {
        self.clients.write().await.remove(conn_id)
    }

    /// Record which session/player this connection now speaks for.
    pub async fn bind_session(&self, conn_id: &str, code: String, player_id: PlayerId) {
        if let Some(client) = self.clients.write().await.get_mut(conn_id) {
            client.binding = Some(SessionBinding { code, player_id });
        }
    }

    pub async fn binding_of(&self, conn_id: &str) -> Option<SessionBinding> {
        self.clients
            .read()
            .await
            .get(conn_id)
            .and_then(|c| c.binding.clone())
    }

    pub async fn send_to_conn(&self, conn_id: &str, frame: &str) -> bool {
        self.clients
            .read()
            .await
            .get(conn_id)
            .is_some_and(|c| c.send(frame))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binding_survives_until_the_client_is_removed() {
        let state = GatewayState::new(&ChorusConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        state.register_client("c1".into(), tx).await;
        assert_eq!(state.client_count().await, 1);
        assert!(state.binding_of("c1").await.is_none());

        state.bind_session("c1", "ABC23".into(), "p1".into()).await;
        let binding = state.binding_of("c1").await.expect("binding");
        assert_eq!(binding.code, "ABC23");

        let removed = state.remove_client("c1").await.expect("client");
        assert_eq!(removed.binding.expect("binding").player_id, "p1");
        assert_eq!(state.client_count().await, 0);
    }

    #[tokio::test]
    async fn seq_is_monotonic() {
        let state = GatewayState::new(&ChorusConfig::default());
        let first = state.next_seq();
        let second = state.next_seq();
        assert!(second > first);
    }
}
