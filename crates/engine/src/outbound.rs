//! Fan-out seam between the engine and the transport.

use async_trait::async_trait;

use crate::{events::OutboundEvent, model::CallerId};

/// Delivery primitive the coordinator emits through. Implementations must
/// deliver session events to all currently-attached members in the order
/// the calls were made, at least once.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Fan an event out to every member of the session.
    async fn send_to_session(&self, code: &str, event: &OutboundEvent);

    /// Deliver an event to exactly one caller.
    async fn send_to_caller(&self, caller: &CallerId, event: &OutboundEvent);
}
