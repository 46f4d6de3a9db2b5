mod client;
mod config;

pub use client::{ClientEvent, NetworkClient};
pub use config::ClientConfig;
