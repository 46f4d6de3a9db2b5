mod config;
mod events;
mod server;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use glam::IVec2;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;

use config::ServerConfig;
use events::ServerEvent;
use server::GameServer;

#[derive(Parser)]
#[command(name = "tilesync-server")]
#[command(about = "Authoritative tilesync world server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = tilesync::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = tilesync::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(long, default_value_t = 30, help = "Seconds of silence before a client is dropped")]
    timeout: u64,

    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    spawn_x: i32,

    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    spawn_y: i32,

    #[arg(long, help = "Place some walls, crates and a sign at startup")]
    seed_demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let mut config = ServerConfig {
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        timeout_secs: args.timeout,
        ..Default::default()
    };
    config.session.spawn_point = IVec2::new(args.spawn_x, args.spawn_y);

    let mut server = GameServer::new(&bind_addr, config)?;
    if args.seed_demo {
        server.seed_demo();
    }
    log::info!("Server started on {}", server.local_addr());

    let mut interval = tokio::time::interval(Duration::from_millis(1));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut console = BufReader::new(tokio::io::stdin()).lines();
    let mut console_open = true;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = console.next_line(), if console_open => match line? {
                Some(line) => {
                    if !run_command(&mut server, line.trim()) {
                        break;
                    }
                }
                None => console_open = false,
            },
            _ = interval.tick() => {
                server.tick_once();
                log_events(&mut server);
            }
        }
    }

    log::info!("Server shutting down");
    server.shutdown_connections();
    log_events(&mut server);

    Ok(())
}

fn log_events(server: &mut GameServer) {
    for event in server.drain_events() {
        match event {
            ServerEvent::ClientConnecting { addr, username } => {
                log::info!("Connection request from {} as '{}'", addr, username);
            }
            ServerEvent::ClientConnected {
                client_id,
                addr,
                entity_id,
            } => {
                log::info!(
                    "Client {} connected from {} (entity {})",
                    client_id,
                    addr,
                    entity_id
                );
            }
            ServerEvent::ClientDisconnected { client_id, reason } => {
                log::info!("Client {} {}", client_id, reason.as_str());
            }
            ServerEvent::ConnectionDenied { addr, reason } => {
                log::warn!("Connection denied to {}: {}", addr, reason);
            }
            ServerEvent::Error { message } => {
                log::error!("{}", message);
            }
        }
    }
}

/// Operator console. Returns false when the server should stop.
fn run_command(server: &mut GameServer, line: &str) -> bool {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "" => {}
        "quit" | "exit" => return false,
        "list" => {
            let clients = server.client_infos();
            if clients.is_empty() {
                log::info!("No clients connected");
            }
            for client in clients {
                log::info!(
                    "#{} {} '{}' at {:?}, {}s, {} unacked, {} resent",
                    client.client_id,
                    client.addr,
                    client.username,
                    client.position,
                    client.connected_secs,
                    client.unacked,
                    client.resent
                );
            }
        }
        "stats" => {
            let stats = server.stats();
            log::info!(
                "tick {} | {}/{} clients | {} entities | {} sent / {} received / {} rejected packets",
                stats.tick,
                stats.client_count,
                stats.max_clients,
                stats.entity_count,
                stats.network_stats.packets_sent,
                stats.network_stats.packets_received,
                stats.network_stats.packets_rejected
            );
        }
        "kick" => match rest.trim().parse() {
            Ok(client_id) => {
                if !server.kick_client(client_id) {
                    log::warn!("No client {}", client_id);
                }
            }
            Err(_) => log::warn!("usage: kick <client id>"),
        },
        "say" => server.broadcast_system(rest.trim()),
        other => log::warn!("Unknown command '{}' (list, stats, kick, say, quit)", other),
    }
    log_events(server);
    true
}
