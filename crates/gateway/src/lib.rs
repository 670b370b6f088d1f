//! Gateway: WebSocket server for charging stations, admission, OCPP-J
//! dispatch, and the per-session telemetry push.
//!
//! Lifecycle:
//! 1. Seed the credential store (config, `CHARGEGATE_TOKENS`, generated)
//! 2. Build the action registry and bind the listener
//! 3. On upgrade, admit the station by path identity and `token` query
//! 4. Read loop dispatches calls and routes responses; telemetry runs alongside
//! 5. On disconnect, supersession, or shutdown, close and deregister
//!
//! Action handlers are registered in `actions.rs`.

pub mod actions;
pub mod auth;
pub mod server;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod ws;

pub use {
    auth::{AdmissionRequest, CredentialStore, Rejection, StaticCredentialStore},
    server::{build_gateway_app, serve, start_gateway},
    session::{CallOutcome, Session, SessionError},
    state::{GatewayState, StationCallError},
};
