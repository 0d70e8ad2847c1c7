use anyhow::Result;
use clap::Parser;

use tidewire_core::ServerConfig;
use tidewire_server::GameServerSession;

#[derive(Parser)]
#[command(name = "tidewire-server")]
#[command(about = "Tidewire authoritative game server")]
struct Args {
    #[arg(long, default_value_t = 12345)]
    port: u16,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ServerConfig {
        port: args.port,
        ..ServerConfig::default()
    };

    let delta_engine = tidewire_game_logic::build_delta_engine();
    let game_logic: Box<dyn tidewire_core::GameLogic> = Box::new(tidewire_game_logic::DemoGameLogic::new());
    let mut session = GameServerSession::new(config, game_logic, delta_engine)?;

    log::info!("listening on {}", session.local_addr()?);
    session.run();
    log::info!("session stopped");

    Ok(())
}
