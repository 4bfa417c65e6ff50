//! Sarah gateway control plane: one WebSocket endpoint multiplexing RPC and
//! server-push events, plus a plain HTTP health probe.

pub mod agent;
pub mod server;
pub mod state;
mod ws;

pub use {
    agent::{AgentService, MockAgent},
    server::{build_app, serve, start},
    state::{ConnectedClient, GatewayState},
};
