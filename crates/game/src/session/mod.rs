mod client;
mod config;
mod server;

pub use client::{ActionError, ClientSession, Inbound};
pub use config::SessionConfig;
pub use server::{DenyReason, Outbound, SPAWN_SEARCH_RADIUS, ServerSession};
