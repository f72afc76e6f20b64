//! Gateway: realtime direct-messaging core over WebSocket, plus the REST
//! history surface.
//!
//! Lifecycle:
//! 1. Load config, resolve the JWT verifier
//! 2. Open the Conversation Store (SQLite, or memory for development)
//! 3. Start the presence broadcaster
//! 4. Serve HTTP: health, REST history, `/ws` upgrade (authenticated first)
//! 5. Per connection: register presence, route inbound events, deregister on close
//!
//! Storage lives in `murmur-store`; this crate owns delivery and ordering.

pub mod api;
pub mod auth;
pub mod broadcast;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod inbound;
pub mod presence;
pub mod seen;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    error::DispatchError,
    server::{build_gateway_app, open_store, start_gateway},
    state::{GatewayOptions, GatewayState},
};
