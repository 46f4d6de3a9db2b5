mod commands;
mod net;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;

use tilesync::{ChatMessage, ClientSession, Entity, EntityBody, Inbound};

use commands::Command;
use net::{ClientConfig, ClientEvent, NetworkClient};

#[derive(Parser)]
#[command(name = "tilesync-client")]
#[command(about = "Line-oriented tilesync client")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:27016",
        help = "Server address to connect to"
    )]
    server: String,

    #[arg(short, long, help = "Unique login name ([a-z0-9_-]+)")]
    username: String,

    #[arg(short, long, help = "Name shown to other players; defaults to the username")]
    display_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server_addr: SocketAddr = args.server.parse()?;
    let display_name = args.display_name.unwrap_or_else(|| args.username.clone());

    let mut client = NetworkClient::new(ClientConfig::default(), args.username, display_name)?;
    client.connect(server_addr)?;
    log::info!("{}", commands::HELP);

    let mut interval = tokio::time::interval(Duration::from_millis(5));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = input.next_line(), if input_open => match line? {
                Some(line) => match Command::parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => run_command(client.session_mut(), command),
                    Ok(None) => {}
                    Err(e) => log::warn!("{:#}", e),
                },
                None => input_open = false,
            },
            _ = interval.tick() => {
                client.update()?;
                let events: Vec<ClientEvent> = client.drain_events().collect();
                for event in events {
                    if !report(client.session(), event) {
                        return Ok(());
                    }
                }
                if client.session_mut().take_ping_dirty() {
                    log::debug!("RTT {:.1} ms", client.stats().rtt_ms);
                }
            }
        }
    }

    client.disconnect();
    Ok(())
}

fn run_command(session: &mut ClientSession, command: Command) {
    let result = match command {
        Command::Move(direction) => {
            session.request_move(direction);
            Ok(())
        }
        Command::Spawn(kind, position) => session.request_spawn(kind, position).map(drop),
        Command::Sign(position, text) => session.request_sign(position, text).map(drop),
        Command::Remove(position) => session.request_remove_at(position).map(drop),
        Command::Chat(text) => {
            session.send_chat(text);
            Ok(())
        }
        Command::Who => {
            let mut players: Vec<&Entity> = session.world().players().collect();
            players.sort_by_key(|e| e.id());
            for entity in players {
                if let Some(player) = entity.as_player() {
                    log::info!(
                        "{} ({}) at {}{}",
                        player.display_name,
                        player.username(),
                        entity.position,
                        if player.highlighted { " *" } else { "" }
                    );
                }
            }
            Ok(())
        }
        Command::Look(position) => {
            session.highlight_at(position);
            let here: Vec<String> = session
                .world()
                .entities_at(position)
                .map(describe)
                .collect();
            if here.is_empty() {
                log::info!("Nothing at {}", position);
            }
            for line in here {
                log::info!("{}", line);
            }
            Ok(())
        }
        Command::Quit => Ok(()),
    };
    if let Err(e) = result {
        log::warn!("{}", e);
    }
}

fn describe(entity: &Entity) -> String {
    match &entity.body {
        EntityBody::Player(player) => {
            format!("player {} at {}", player.display_name, entity.position)
        }
        EntityBody::Sign(sign) => {
            format!("sign at {}: \"{}\"", entity.position, sign.text)
        }
        _ => format!("{} at {}", entity.kind().name(), entity.position),
    }
}

fn sender_name(session: &ClientSession, message: &ChatMessage) -> String {
    if message.is_system() {
        return "*".into();
    }
    session
        .world()
        .get(message.sender)
        .and_then(Entity::as_player)
        .map(|p| p.display_name.clone())
        .unwrap_or_else(|| "?".into())
}

/// Logs a client event. Returns false once the connection is over.
fn report(session: &ClientSession, event: ClientEvent) -> bool {
    match event {
        ClientEvent::Connected { client_id } => log::info!("Connected as client {}", client_id),
        ClientEvent::Denied { reason } => {
            log::error!("Connection denied: {}", reason);
            return false;
        }
        ClientEvent::Disconnected { reason } => {
            log::error!("Disconnected: {}", reason);
            return false;
        }
        ClientEvent::Inbound(Inbound::Joined(count)) => {
            log::info!("Joined world with {} entities", count);
        }
        ClientEvent::Inbound(Inbound::Added(id)) => {
            if let Some(entity) = session.world().get(id) {
                log::info!("+ {}", describe(entity));
            }
        }
        ClientEvent::Inbound(Inbound::Removed(id)) => log::info!("- {}", id),
        ClientEvent::Inbound(Inbound::Changed(id)) => {
            if let Some(entity) = session.world().get(id) {
                log::debug!("~ {}", describe(entity));
            }
        }
        ClientEvent::Inbound(Inbound::Chat(message)) => {
            log::info!("<{}> {}", sender_name(session, &message), message.text);
        }
        ClientEvent::Inbound(Inbound::Ignored) => {}
    }
    true
}
