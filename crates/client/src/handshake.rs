//! Client connect sequence: a plain `CLIENT_HELLO`/`SERVER_ACCEPT`/
//! `SERVER_REJECT` exchange, with no cryptographic authentication —
//! just enough to identify a returning client by its clientId.
//!
//! ```text
//! INIT -> TRANSPORT_CONNECTING -> CONNECTED -> HELLO_SENT -> ACCEPTED
//!   (!isReconnection) -> WAIT_GAME_START -> RUNNING
//!   ( isReconnection) -> WAIT_STATE_UPDATE -> RUNNING
//! ```

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use thiserror::Error;

use tidewire_core::{ClientTransport, Packet, PlayerId, StateUpdate, TransportError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);
const GAME_START_TIMEOUT: Duration = Duration::from_secs(60);
const POST_RECONNECT_STATE_TIMEOUT: Duration = Duration::from_secs(10);

/// One variant per stage of the connect sequence that can fail, returned
/// as an explicit `Result` rather than left to a caught exception.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to establish the transport connection: {0}")]
    SocketsFailed(#[from] TransportError),
    #[error("could not parse server address {0:?}")]
    ParseError(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("server denied the connection (SERVER_REJECT or an unexpected packet)")]
    Denied,
}

/// The outcome of a successful handshake: a connected transport plus
/// whatever the server told us about our player/session.
pub struct HandshakeOutcome {
    pub transport: ClientTransport,
    pub player_id: PlayerId,
    pub is_reconnection: bool,
    /// Present when the server greeted us with a full `STATE_UPDATE`
    /// instead of (or alongside, on reconnect) `GAME_START`.
    pub initial_state: Option<StateUpdate>,
}

/// Blocks through the full connect sequence: TCP connect, `CLIENT_HELLO`,
/// wait for `SERVER_ACCEPT`/`SERVER_REJECT`, then wait for `GAME_START`
/// (fresh join) or a full `STATE_UPDATE` (reconnect). Each stage enforces
/// its own timeout budget independently.
pub fn connect(server_addr: &str, client_id: &str) -> Result<HandshakeOutcome, ConnectError> {
    let addr: SocketAddr = server_addr
        .parse()
        .map_err(|_| ConnectError::ParseError(server_addr.to_string()))?;

    let mut transport = ClientTransport::connect(addr, CONNECT_TIMEOUT)?;
    transport.send(&Packet::ClientHello {
        client_id: client_id.to_string(),
    })?;

    let (player_id, is_reconnection) = wait_for_accept(&mut transport)?;

    let initial_state = if is_reconnection {
        Some(wait_for_state_update(&mut transport)?)
    } else {
        wait_for_game_start(&mut transport, player_id)?;
        None
    };

    Ok(HandshakeOutcome {
        transport,
        player_id,
        is_reconnection,
        initial_state,
    })
}

fn poll_until<T>(
    transport: &mut ClientTransport,
    timeout: Duration,
    timeout_label: &'static str,
    mut try_extract: impl FnMut(Packet) -> Result<Option<T>, ConnectError>,
) -> Result<T, ConnectError> {
    let deadline = Instant::now() + timeout;
    loop {
        let Some(packets) = transport.poll() else {
            return Err(ConnectError::Denied);
        };
        for packet in packets {
            if let Some(value) = try_extract(packet)? {
                return Ok(value);
            }
        }
        if Instant::now() >= deadline {
            return Err(ConnectError::Timeout(timeout_label));
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn wait_for_accept(transport: &mut ClientTransport) -> Result<(PlayerId, bool), ConnectError> {
    poll_until(transport, ACCEPT_TIMEOUT, "SERVER_ACCEPT", |packet| {
        match packet {
            Packet::ServerAccept {
                player_id,
                is_reconnection,
            } => {
                if player_id < 0 {
                    return Err(ConnectError::Denied);
                }
                Ok(Some((player_id as PlayerId, is_reconnection)))
            }
            Packet::ServerReject => Err(ConnectError::Denied),
            _ => Ok(None),
        }
    })
}

fn wait_for_game_start(
    transport: &mut ClientTransport,
    expected_player_id: PlayerId,
) -> Result<(), ConnectError> {
    poll_until(transport, GAME_START_TIMEOUT, "GAME_START", |packet| {
        match packet {
            Packet::GameStart { player_id } if player_id == expected_player_id => Ok(Some(())),
            _ => Ok(None),
        }
    })
}

fn wait_for_state_update(transport: &mut ClientTransport) -> Result<StateUpdate, ConnectError> {
    poll_until(
        transport,
        POST_RECONNECT_STATE_TIMEOUT,
        "post-reconnect STATE_UPDATE",
        |packet| match packet {
            Packet::StateUpdate { frame, state } => Ok(Some(StateUpdate {
                frame,
                state,
                confirmed_inputs: Default::default(),
            })),
            _ => Ok(None),
        },
    )
}
