use std::time::Duration;

/// Server-side session configuration. `reconnection_timeout ==
/// Duration::ZERO` means unbounded, a plain zero-sentinel rather than
/// wrapping the field in an `Option`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub min_players: usize,
    pub max_players: usize,
    pub allow_mid_game_join: bool,
    pub stop_on_below_min: bool,
    pub allow_reconnection: bool,
    pub require_client_id: bool,
    pub max_frames: u32,
    pub reconnection_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 12345,
            min_players: 2,
            max_players: 2,
            allow_mid_game_join: false,
            stop_on_below_min: true,
            allow_reconnection: false,
            require_client_id: false,
            max_frames: 0,
            reconnection_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// `max_frames == 0` means run indefinitely.
    pub fn is_frame_budget_exhausted(&self, current_frame: crate::types::Frame) -> bool {
        self.max_frames != 0 && current_frame >= self.max_frames
    }

    /// `Duration::ZERO` means no upper bound on reconnection.
    pub fn reconnection_is_unbounded(&self) -> bool {
        self.reconnection_timeout.is_zero()
    }
}

/// Client-side connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub client_id: Option<String>,
    pub tick_rate: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_addr: "127.0.0.1:12345".to_string(),
            client_id: None,
            tick_rate: TICKS_PER_SECOND,
        }
    }
}

pub const TICKS_PER_SECOND: u32 = 30;
pub const MS_PER_TICK: u64 = 1000 / TICKS_PER_SECOND as u64;
pub const MAX_ROLLBACK_FRAMES: u32 = 10;
pub const INPUT_DELAY_FRAMES_DEFAULT: u32 = 3;
pub const FRAMES_TO_KEEP: usize = 300;
pub const PRUNE_PERIOD_SERVER: u32 = 60;
pub const RTT_SAMPLE_WINDOW: usize = 5;
