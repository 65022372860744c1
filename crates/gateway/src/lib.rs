//! Gateway: WebSocket/HTTP server, frame dispatch, session registry wiring.
//!
//! Lifecycle:
//! 1. Load config (bind address, game defaults)
//! 2. Build shared state: client table + session registry
//! 3. Start the HTTP server (health) and attach the WebSocket upgrade
//! 4. Spawn the registry sweep timer
//!
//! Game logic lives in `chorus-engine` and is invoked through method
//! handlers registered in `methods.rs`; this crate only moves frames.

pub mod broadcast;
pub mod methods;
pub mod server;
pub mod state;
pub mod ws;
