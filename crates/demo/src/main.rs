//! Combined host/connect binary exercising both halves of the engine
//! against [`tidewire_game_logic::DemoGameLogic`]: a single executable
//! that can be launched as either a dedicated server or a client pointed
//! at one.

use anyhow::{Context, Result};
use clap::Parser;

use tidewire_core::ServerConfig;
use tidewire_client::{ClientSession, connect};
use tidewire_server::GameServerSession;

#[derive(Parser)]
#[command(name = "tidewire-demo")]
#[command(about = "Runs the demo game logic as either a server or a client")]
struct Args {
    /// Run as the authoritative server instead of connecting to one.
    #[arg(long)]
    host: bool,

    /// Port to listen on in `--host` mode.
    #[arg(long, default_value_t = 12345)]
    port: u16,

    /// Server address to connect to when not running with `--host`.
    #[arg(long, default_value = "127.0.0.1:12345")]
    connect: String,

    /// Client id to present during the handshake; only meaningful without
    /// `--host`. A random one is generated when omitted.
    #[arg(long)]
    id: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.host {
        run_host(args.port)
    } else {
        run_client(&args.connect, args.id)
    }
}

fn run_host(port: u16) -> Result<()> {
    let config = ServerConfig {
        port,
        ..ServerConfig::default()
    };
    let delta_engine = tidewire_game_logic::build_delta_engine();
    let game_logic: Box<dyn tidewire_core::GameLogic> =
        Box::new(tidewire_game_logic::DemoGameLogic::new());
    let mut session = GameServerSession::new(config, game_logic, delta_engine)
        .context("failed to bind server socket")?;

    log::info!("listening on {}", session.local_addr()?);
    session.run();
    log::info!("session stopped");
    Ok(())
}

fn run_client(server_addr: &str, id: Option<String>) -> Result<()> {
    let client_id = id.unwrap_or_else(generate_client_id);
    log::info!("connecting to {server_addr} as {client_id:?}");

    let outcome = connect(server_addr, &client_id)
        .with_context(|| format!("failed to connect to {server_addr}"))?;
    log::info!(
        "accepted as player {} (reconnection: {})",
        outcome.player_id,
        outcome.is_reconnection
    );

    let game_logic: Box<dyn tidewire_core::GameLogic> =
        Box::new(tidewire_game_logic::DemoGameLogic::new());
    let delta_engine = tidewire_game_logic::build_delta_engine();
    let mut session = ClientSession::from_handshake(
        outcome,
        game_logic,
        delta_engine,
        tidewire_core::TICKS_PER_SECOND,
    );
    session.start();

    while session.is_running() {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
    session.stop();
    log::info!("disconnected from server");
    Ok(())
}

/// Random enough for a demo handshake id; must stay within
/// `is_valid_client_id`'s `[0-9A-Za-z_-]` charset.
fn generate_client_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("client-{}-{}", std::process::id(), millis)
}
