use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;

use tidewire_client::{ClientSession, connect};
use tidewire_core::ClientConfig;

#[derive(Parser)]
#[command(name = "tidewire-client")]
#[command(about = "Tidewire predicting game client")]
struct Args {
    /// Address of the server to connect to.
    #[arg(long, default_value = "127.0.0.1:12345")]
    connect: String,

    /// Custom clientId to present during the handshake; a random one is
    /// generated when omitted.
    #[arg(long)]
    id: Option<String>,
}

impl From<Args> for ClientConfig {
    fn from(args: Args) -> Self {
        ClientConfig {
            server_addr: args.connect,
            client_id: args.id,
            ..ClientConfig::default()
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config: ClientConfig = Args::parse().into();

    let client_id = config.client_id.unwrap_or_else(generate_client_id);
    log::info!("connecting to {} as {client_id:?}", config.server_addr);

    let outcome = connect(&config.server_addr, &client_id)
        .with_context(|| format!("failed to connect to {}", config.server_addr))?;
    log::info!(
        "accepted as player {} (reconnection: {})",
        outcome.player_id,
        outcome.is_reconnection
    );

    let game_logic: Box<dyn tidewire_core::GameLogic> = Box::new(tidewire_game_logic::DemoGameLogic::new());
    let delta_engine = tidewire_game_logic::build_delta_engine();
    let mut session = ClientSession::from_handshake(
        outcome,
        game_logic,
        delta_engine,
        config.tick_rate,
    );
    session.start();

    while session.is_running() {
        std::thread::sleep(Duration::from_millis(50));
    }
    session.stop();
    log::info!("disconnected from server");

    Ok(())
}

/// Random enough for a demo handshake id; must stay within
/// `is_valid_client_id`'s `[0-9A-Za-z_-]` charset.
fn generate_client_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("client-{}-{}", std::process::id(), millis)
}
