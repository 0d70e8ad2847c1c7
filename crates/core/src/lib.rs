pub mod client_core;
pub mod config;
pub mod delta;
pub mod event;
pub mod game_logic;
pub mod input_delay;
pub mod server_core;
pub mod snapshot;
pub mod transport;
pub mod types;
pub mod wire;

pub use client_core::ClientPredictionCore;
pub use config::{
    ClientConfig, MAX_ROLLBACK_FRAMES, MS_PER_TICK, PRUNE_PERIOD_SERVER, RTT_SAMPLE_WINDOW,
    ServerConfig, TICKS_PER_SECOND,
};
pub use delta::{DeltaEngine, DeltaHandler};
pub use event::{EventDispatcher, EventHandler, EventQueue};
pub use game_logic::GameLogic;
pub use input_delay::InputDelayController;
pub use server_core::ServerSimulationCore;
pub use snapshot::SnapshotRing;
pub use transport::{ClientTransport, ConnectionEvent, PeerHandle, ServerTransport, TransportError};
pub use types::{
    DeltaStateBlob, Frame, GameEventBlob, GameStateBlob, InputBlob, InputEntry, PeerInfo,
    PlayerId, Snapshot, StateUpdate, is_valid_client_id,
};
pub use wire::{Packet, PacketTag, WireError};
