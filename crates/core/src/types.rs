use std::collections::HashMap;

/// Monotonically increasing simulation step counter. Never wraps in practice
/// (a 30 Hz session would need ~4.5 years to overflow a u32).
pub type Frame = u32;

pub type PlayerId = u32;

/// Capacity of a [`GameStateBlob`].
pub const GAME_STATE_CAPACITY: usize = 4096;

/// Capacity of a [`GameEventBlob`]'s payload.
pub const GAME_EVENT_CAPACITY: usize = 256;

/// Capacity of a [`DeltaStateBlob`]'s payload.
pub const DELTA_STATE_CAPACITY: usize = 512;

/// Fixed-width encoding of one player's intent for one frame. The core never
/// interprets these bytes; only the `GameLogic` in use does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputBlob(pub [u8; 4]);

impl InputBlob {
    pub const fn zero() -> Self {
        InputBlob([0; 4])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEntry {
    pub frame: Frame,
    pub player_id: PlayerId,
    pub input: InputBlob,
}

/// Opaque, bounded-capacity simulation state. `len` bytes of `data` are
/// meaningful; the remainder is padding that must not be interpreted.
#[derive(Debug, Clone, Copy)]
pub struct GameStateBlob {
    pub frame: Frame,
    pub len: usize,
    pub data: [u8; GAME_STATE_CAPACITY],
}

impl Default for GameStateBlob {
    fn default() -> Self {
        GameStateBlob {
            frame: 0,
            len: 0,
            data: [0; GAME_STATE_CAPACITY],
        }
    }
}

impl GameStateBlob {
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn set_bytes(&mut self, bytes: &[u8]) {
        assert!(
            bytes.len() <= GAME_STATE_CAPACITY,
            "game state payload exceeds capacity"
        );
        self.len = bytes.len();
        self.data[..bytes.len()].copy_from_slice(bytes);
    }
}

/// Typed, opaque message emitted by the simulation and applied one frame
/// after it was generated, giving every peer the same delivery window
/// before the event is visible.
#[derive(Debug, Clone, Copy)]
pub struct GameEventBlob {
    pub event_type: u32,
    pub len: usize,
    pub data: [u8; GAME_EVENT_CAPACITY],
}

impl Default for GameEventBlob {
    fn default() -> Self {
        GameEventBlob {
            event_type: 0,
            len: 0,
            data: [0; GAME_EVENT_CAPACITY],
        }
    }
}

impl GameEventBlob {
    pub fn new(event_type: u32, bytes: &[u8]) -> Self {
        assert!(
            bytes.len() <= GAME_EVENT_CAPACITY,
            "event payload exceeds capacity"
        );
        let mut data = [0u8; GAME_EVENT_CAPACITY];
        data[..bytes.len()].copy_from_slice(bytes);
        GameEventBlob {
            event_type,
            len: bytes.len(),
            data,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// Typed, opaque patch record describing how one state differs from another.
#[derive(Debug, Clone, Copy)]
pub struct DeltaStateBlob {
    pub frame: Frame,
    pub delta_type: u32,
    pub len: usize,
    pub data: [u8; DELTA_STATE_CAPACITY],
}

impl Default for DeltaStateBlob {
    fn default() -> Self {
        DeltaStateBlob {
            frame: 0,
            delta_type: 0,
            len: 0,
            data: [0; DELTA_STATE_CAPACITY],
        }
    }
}

impl DeltaStateBlob {
    pub fn new(frame: Frame, delta_type: u32, bytes: &[u8]) -> Self {
        assert!(
            bytes.len() <= DELTA_STATE_CAPACITY,
            "delta payload exceeds capacity"
        );
        let mut data = [0u8; DELTA_STATE_CAPACITY];
        data[..bytes.len()].copy_from_slice(bytes);
        DeltaStateBlob {
            frame,
            delta_type,
            len: bytes.len(),
            data,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// `{frame, state, inputs}` recorded per-frame to drive replay/reconciliation.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub frame: Frame,
    pub state: GameStateBlob,
    pub inputs: HashMap<PlayerId, InputEntry>,
}

impl Snapshot {
    pub fn new(frame: Frame) -> Self {
        Snapshot {
            frame,
            state: GameStateBlob {
                frame,
                ..GameStateBlob::default()
            },
            inputs: HashMap::new(),
        }
    }
}

/// A server-authoritative snapshot as carried on the wire: the confirmed
/// state plus the inputs the server used to produce it.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub frame: Frame,
    pub state: GameStateBlob,
    pub confirmed_inputs: HashMap<PlayerId, InputEntry>,
}

/// A transport-level peer, which may or may not currently map to a `playerId`.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub player_id: PlayerId,
    pub client_id: String,
    pub is_connected: bool,
    pub last_acked_frame: Frame,
    pub disconnect_time: Option<std::time::Instant>,
}

/// Validates a clientId: non-empty, at most 63 bytes, and every character
/// drawn from `[0-9A-Za-z_-]`.
pub fn is_valid_client_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 63
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
