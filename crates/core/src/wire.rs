//! Fixed big-endian framing for every packet type the core exchanges with
//! its peers. This module performs no I/O; [`crate::transport`] frames these
//! encoded bytes with a length prefix before writing them to a socket.

use thiserror::Error;

use crate::types::{
    DELTA_STATE_CAPACITY, DeltaStateBlob, Frame, GAME_EVENT_CAPACITY, GAME_STATE_CAPACITY,
    GameEventBlob, GameStateBlob, InputBlob, PlayerId,
};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("packet buffer ended before the expected field could be read")]
    UnexpectedEof,
    #[error("unknown packet tag 0x{0:02x}")]
    UnknownTag(u8),
    #[error("{field} length {actual} exceeds capacity {max}")]
    OversizedLength {
        field: &'static str,
        max: usize,
        actual: u32,
    },
    #[error("clientId is not valid UTF-8")]
    InvalidClientId,
}

/// One byte identifying a packet's payload shape, the same role Quake-3's
/// `svc_*`/`clc_*` opcodes play ahead of a command buffer. `InputAck` and
/// `Hash` round-trip through the codec but nothing in this workspace emits
/// them yet: `InputAck` is reserved for a future send-window scheme, `Hash`
/// for an optional state-integrity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketTag {
    Input = 0x01,
    StateUpdate = 0x02,
    InputUpdate = 0x03,
    GameStart = 0x04,
    InputAck = 0x05,
    DeltaStateUpdate = 0x06,
    EventUpdate = 0x07,
    InputDelay = 0x08,
    Hash = 0x09,
    ClientHello = 0x0A,
    ServerAccept = 0x0B,
    ServerReject = 0x0C,
}

impl TryFrom<u8> for PacketTag {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => PacketTag::Input,
            0x02 => PacketTag::StateUpdate,
            0x03 => PacketTag::InputUpdate,
            0x04 => PacketTag::GameStart,
            0x05 => PacketTag::InputAck,
            0x06 => PacketTag::DeltaStateUpdate,
            0x07 => PacketTag::EventUpdate,
            0x08 => PacketTag::InputDelay,
            0x09 => PacketTag::Hash,
            0x0A => PacketTag::ClientHello,
            0x0B => PacketTag::ServerAccept,
            0x0C => PacketTag::ServerReject,
            other => return Err(WireError::UnknownTag(other)),
        })
    }
}

const CLIENT_ID_WIDTH: usize = 64;

#[derive(Debug, Clone)]
pub enum Packet {
    Input {
        player_id: PlayerId,
        frame: Frame,
        input: InputBlob,
    },
    StateUpdate {
        frame: Frame,
        state: GameStateBlob,
    },
    InputUpdate {
        player_id: PlayerId,
        frame: Frame,
        input: InputBlob,
    },
    GameStart {
        player_id: PlayerId,
    },
    InputAck,
    DeltaStateUpdate {
        frame: Frame,
        deltas: Vec<DeltaStateBlob>,
    },
    EventUpdate {
        frame: Frame,
        event: GameEventBlob,
    },
    InputDelay {
        player_id: PlayerId,
        timestamp_ms: u32,
    },
    Hash {
        frame: Frame,
        digest: [u8; 32],
    },
    ClientHello {
        client_id: String,
    },
    ServerAccept {
        player_id: i32,
        is_reconnection: bool,
    },
    ServerReject,
}

/// Small cursor over a byte slice; panics are never produced, every read is
/// fallible so malformed packets surface as [`WireError`] instead of a crash.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.pos + n > self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32, WireError> {
        Ok(self.u32()? as i32)
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn put_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

impl Packet {
    pub fn tag(&self) -> PacketTag {
        match self {
            Packet::Input { .. } => PacketTag::Input,
            Packet::StateUpdate { .. } => PacketTag::StateUpdate,
            Packet::InputUpdate { .. } => PacketTag::InputUpdate,
            Packet::GameStart { .. } => PacketTag::GameStart,
            Packet::InputAck => PacketTag::InputAck,
            Packet::DeltaStateUpdate { .. } => PacketTag::DeltaStateUpdate,
            Packet::EventUpdate { .. } => PacketTag::EventUpdate,
            Packet::InputDelay { .. } => PacketTag::InputDelay,
            Packet::Hash { .. } => PacketTag::Hash,
            Packet::ClientHello { .. } => PacketTag::ClientHello,
            Packet::ServerAccept { .. } => PacketTag::ServerAccept,
            Packet::ServerReject => PacketTag::ServerReject,
        }
    }

    /// Encodes the tag byte followed by the payload. The caller's framing
    /// layer is responsible for the length prefix in front of this.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.tag() as u8);

        match self {
            Packet::Input {
                player_id,
                frame,
                input,
            }
            | Packet::InputUpdate {
                player_id,
                frame,
                input,
            } => {
                put_u32(&mut buf, *player_id);
                put_u32(&mut buf, *frame);
                buf.extend_from_slice(&input.0);
            }
            Packet::StateUpdate { frame, state } => {
                put_u32(&mut buf, *frame);
                put_u32(&mut buf, state.len as u32);
                buf.extend_from_slice(state.as_slice());
            }
            Packet::GameStart { player_id } => {
                put_u32(&mut buf, *player_id);
            }
            Packet::InputAck => {}
            Packet::DeltaStateUpdate { frame, deltas } => {
                put_u32(&mut buf, *frame);
                put_u32(&mut buf, deltas.len() as u32);
                for delta in deltas {
                    put_u32(&mut buf, delta.delta_type);
                    put_u32(&mut buf, delta.len as u32);
                    buf.extend_from_slice(delta.as_slice());
                }
            }
            Packet::EventUpdate { frame, event } => {
                put_u32(&mut buf, *frame);
                put_u32(&mut buf, event.event_type);
                put_u32(&mut buf, event.len as u32);
                buf.extend_from_slice(event.as_slice());
            }
            Packet::InputDelay {
                player_id,
                timestamp_ms,
            } => {
                put_u32(&mut buf, *player_id);
                put_u32(&mut buf, *timestamp_ms);
            }
            Packet::Hash { frame, digest } => {
                put_u32(&mut buf, *frame);
                buf.extend_from_slice(digest);
            }
            Packet::ClientHello { client_id } => {
                let mut padded = [0u8; CLIENT_ID_WIDTH];
                let bytes = client_id.as_bytes();
                let n = bytes.len().min(CLIENT_ID_WIDTH);
                padded[..n].copy_from_slice(&bytes[..n]);
                buf.extend_from_slice(&padded);
            }
            Packet::ServerAccept {
                player_id,
                is_reconnection,
            } => {
                put_i32(&mut buf, *player_id);
                buf.push(*is_reconnection as u8);
            }
            Packet::ServerReject => {}
        }

        buf
    }

    /// Decodes a single packet from `bytes` (tag byte plus payload, no
    /// length prefix). A length field that would overflow a blob's fixed
    /// capacity is rejected outright rather than used to grow it.
    pub fn decode(bytes: &[u8]) -> Result<Packet, WireError> {
        let mut r = Reader::new(bytes);
        let tag = PacketTag::try_from(r.u8()?)?;

        Ok(match tag {
            PacketTag::Input | PacketTag::InputUpdate => {
                let player_id = r.u32()?;
                let frame = r.u32()?;
                let raw = r.take(4)?;
                let input = InputBlob(raw.try_into().unwrap());
                if tag == PacketTag::Input {
                    Packet::Input {
                        player_id,
                        frame,
                        input,
                    }
                } else {
                    Packet::InputUpdate {
                        player_id,
                        frame,
                        input,
                    }
                }
            }
            PacketTag::StateUpdate => {
                let frame = r.u32()?;
                let len = r.u32()?;
                if len as usize > GAME_STATE_CAPACITY {
                    return Err(WireError::OversizedLength {
                        field: "state_len",
                        max: GAME_STATE_CAPACITY,
                        actual: len,
                    });
                }
                let payload = r.take(len as usize)?;
                let mut state = GameStateBlob {
                    frame,
                    ..GameStateBlob::default()
                };
                state.set_bytes(payload);
                Packet::StateUpdate { frame, state }
            }
            PacketTag::GameStart => Packet::GameStart {
                player_id: r.u32()?,
            },
            PacketTag::InputAck => Packet::InputAck,
            PacketTag::DeltaStateUpdate => {
                let frame = r.u32()?;
                let n = r.u32()?;
                let mut deltas = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    let delta_type = r.u32()?;
                    let len = r.u32()?;
                    if len as usize > DELTA_STATE_CAPACITY {
                        return Err(WireError::OversizedLength {
                            field: "delta_len",
                            max: DELTA_STATE_CAPACITY,
                            actual: len,
                        });
                    }
                    let payload = r.take(len as usize)?;
                    deltas.push(DeltaStateBlob::new(frame, delta_type, payload));
                }
                Packet::DeltaStateUpdate { frame, deltas }
            }
            PacketTag::EventUpdate => {
                let frame = r.u32()?;
                let event_type = r.u32()?;
                let len = r.u32()?;
                if len as usize > GAME_EVENT_CAPACITY {
                    return Err(WireError::OversizedLength {
                        field: "event_len",
                        max: GAME_EVENT_CAPACITY,
                        actual: len,
                    });
                }
                let payload = r.take(len as usize)?;
                Packet::EventUpdate {
                    frame,
                    event: GameEventBlob::new(event_type, payload),
                }
            }
            PacketTag::InputDelay => Packet::InputDelay {
                player_id: r.u32()?,
                timestamp_ms: r.u32()?,
            },
            PacketTag::Hash => {
                let frame = r.u32()?;
                let digest = r.take(32)?;
                Packet::Hash {
                    frame,
                    digest: digest.try_into().unwrap(),
                }
            }
            PacketTag::ClientHello => {
                let raw = r.take(CLIENT_ID_WIDTH)?;
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                let client_id = std::str::from_utf8(&raw[..end])
                    .map_err(|_| WireError::InvalidClientId)?
                    .to_string();
                Packet::ClientHello { client_id }
            }
            PacketTag::ServerAccept => {
                let player_id = r.i32()?;
                let is_reconnection = r.u8()? != 0;
                Packet::ServerAccept {
                    player_id,
                    is_reconnection,
                }
            }
            PacketTag::ServerReject => Packet::ServerReject,
        })
    }
}

/// Convenience used by callers assembling a `DELTA_STATE_UPDATE` packet from
/// a fresh delta-engine `check()` result.
pub fn delta_state_update(frame: Frame, deltas: Vec<DeltaStateBlob>) -> Packet {
    Packet::DeltaStateUpdate { frame, deltas }
}
