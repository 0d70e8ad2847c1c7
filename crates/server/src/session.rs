//! Server session orchestrator. Binds a [`ServerTransport`] to a
//! [`ServerSimulationCore`], owns the peer table and the WAITING/RUNNING
//! FSM, and fans out state over the wire. The core itself has no notion
//! of peers or the network; this is the glue that turns ticks and packets
//! into a running session.

use std::collections::HashMap;
use std::io;
use std::time::{Duration, Instant};

use tidewire_core::{
    ConnectionEvent, DeltaEngine, Frame, GameLogic, InputEntry, Packet, PeerHandle, PlayerId,
    ServerConfig, ServerSimulationCore, ServerTransport, TransportError, is_valid_client_id,
};

const FANOUT_PERIOD: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    Running,
    Stopped,
}

struct Peer {
    handle: Option<PeerHandle>,
    player_id: PlayerId,
    client_id: String,
    connected: bool,
    last_acked_frame: Frame,
    disconnect_time: Option<Instant>,
}

pub struct GameServerSession {
    transport: ServerTransport,
    core: ServerSimulationCore,
    config: ServerConfig,
    phase: Phase,
    peers_by_handle: HashMap<PeerHandle, PlayerId>,
    peers: HashMap<PlayerId, Peer>,
    client_ids: HashMap<String, PlayerId>,
    last_sent_state: HashMap<PlayerId, tidewire_core::GameStateBlob>,
    next_player_id: PlayerId,
}

impl GameServerSession {
    pub fn new(
        config: ServerConfig,
        game_logic: Box<dyn GameLogic>,
        delta_engine: DeltaEngine,
    ) -> io::Result<Self> {
        let transport = ServerTransport::bind(("0.0.0.0", config.port))
            .map_err(transport_err_to_io)?;
        Ok(GameServerSession {
            transport,
            core: ServerSimulationCore::new(game_logic, delta_engine),
            config,
            phase: Phase::Waiting,
            peers_by_handle: HashMap::new(),
            peers: HashMap::new(),
            client_ids: HashMap::new(),
            last_sent_state: HashMap::new(),
            next_player_id: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Runs the fixed-tick loop until the session reaches `Stopped` or the
    /// frame budget is exhausted. One transport poll plus (when RUNNING)
    /// exactly one simulation tick per iteration, paced to `MS_PER_TICK`.
    pub fn run(&mut self) {
        let tick_duration = Duration::from_millis(tidewire_core::MS_PER_TICK);
        loop {
            let next_tick = Instant::now() + tick_duration;
            self.tick_once();
            if self.phase == Phase::Stopped {
                break;
            }
            if self.config.is_frame_budget_exhausted(self.core.current_frame()) {
                log::info!("frame budget exhausted at frame {}", self.core.current_frame());
                break;
            }
            let now = Instant::now();
            if next_tick > now {
                std::thread::sleep(next_tick - now);
            }
        }
    }

    pub fn tick_once(&mut self) {
        self.poll_transport();
        self.reap_expired_reconnections();

        if self.phase != Phase::Running {
            return;
        }

        let update = self.core.tick();
        if update.frame % FANOUT_PERIOD as u32 == 0 {
            self.fanout(update.frame);
        }
    }

    fn poll_transport(&mut self) {
        let (events, packets) = self.transport.poll();
        for event in events {
            match event {
                ConnectionEvent::Connected(handle, addr) => {
                    log::debug!("peer {handle} connected from {addr}, awaiting CLIENT_HELLO");
                }
                ConnectionEvent::Disconnected(handle) => self.handle_disconnect(handle),
            }
        }
        for (handle, packet) in packets {
            self.handle_packet(handle, packet);
        }
    }

    fn handle_packet(&mut self, handle: PeerHandle, packet: Packet) {
        match packet {
            Packet::ClientHello { client_id } => self.handle_hello(handle, client_id),
            Packet::Input {
                player_id,
                frame,
                input,
            } => {
                if self.peers_by_handle.get(&handle) != Some(&player_id) {
                    log::warn!("dropping INPUT from peer {handle} claiming player {player_id}");
                    return;
                }
                self.core.on_client_input_received(InputEntry {
                    frame,
                    player_id,
                    input,
                });
                if let Some(peer) = self.peers.get_mut(&player_id) {
                    peer.last_acked_frame = peer.last_acked_frame.max(frame);
                }
                self.transport.broadcast(
                    &Packet::InputUpdate {
                        player_id,
                        frame,
                        input,
                    },
                    Some(handle),
                );
            }
            Packet::InputDelay {
                player_id,
                timestamp_ms,
            } => {
                let _ = self.transport.send(
                    handle,
                    &Packet::InputDelay {
                        player_id,
                        timestamp_ms,
                    },
                );
            }
            other => {
                log::warn!("dropping unexpected packet from peer {handle}: {other:?}");
            }
        }
    }

    fn handle_hello(&mut self, handle: PeerHandle, client_id: String) {
        if !is_valid_client_id(&client_id) {
            log::warn!("rejecting peer {handle}: invalid clientId {client_id:?}");
            self.reject(handle);
            return;
        }

        if let Some(&player_id) = self.client_ids.get(&client_id) {
            let reconnecting = self.peers.get(&player_id).is_some_and(|p| !p.connected);
            if reconnecting {
                self.handle_reconnect(handle, player_id);
            } else {
                log::warn!("rejecting peer {handle}: clientId {client_id:?} already connected");
                self.reject(handle);
            }
            return;
        }

        match self.phase {
            Phase::Waiting => self.admit_new_peer(handle, client_id),
            Phase::Running => {
                if !self.config.allow_mid_game_join {
                    log::warn!("rejecting peer {handle}: mid-game join disallowed");
                    self.reject(handle);
                    return;
                }
                self.admit_new_peer(handle, client_id);
            }
            Phase::Stopped => self.reject(handle),
        }
    }

    fn admit_new_peer(&mut self, handle: PeerHandle, client_id: String) {
        if self.peers.len() >= self.config.max_players {
            log::warn!("rejecting peer {handle}: server full");
            self.reject(handle);
            return;
        }

        let player_id = self.next_player_id;
        self.next_player_id += 1;
        self.peers.insert(
            player_id,
            Peer {
                handle: Some(handle),
                player_id,
                client_id: client_id.clone(),
                connected: true,
                last_acked_frame: 0,
                disconnect_time: None,
            },
        );
        self.client_ids.insert(client_id, player_id);
        self.peers_by_handle.insert(handle, player_id);
        self.core.on_player_connected(player_id);

        let _ = self.transport.send(
            handle,
            &Packet::ServerAccept {
                player_id: player_id as i32,
                is_reconnection: false,
            },
        );

        if self.phase == Phase::Running {
            // Joining mid-game: there is no lobby GAME_START to wait for, so
            // hand the new peer a full snapshot immediately.
            let state = self.core.game_state_snapshot();
            let _ = self.transport.send(handle, &Packet::StateUpdate {
                frame: state.frame,
                state,
            });
            self.last_sent_state.insert(player_id, state);
            log::info!("peer {handle} joined mid-game as player {player_id}");
            return;
        }

        log::info!("peer {handle} joined the lobby as player {player_id}");
        if self.peers.len() >= self.config.min_players {
            self.start_running();
        }
    }

    fn handle_reconnect(&mut self, handle: PeerHandle, player_id: PlayerId) {
        if !self.config.allow_reconnection {
            log::warn!("rejecting reconnection for player {player_id}: disabled");
            self.reject(handle);
            return;
        }

        let within_window = {
            let peer = self.peers.get(&player_id).expect("reconnect target exists");
            self.config.reconnection_is_unbounded()
                || peer
                    .disconnect_time
                    .is_some_and(|t| t.elapsed() <= self.config.reconnection_timeout)
        };
        if !within_window {
            log::warn!("rejecting reconnection for player {player_id}: timeout elapsed");
            self.reject(handle);
            if let Some(peer) = self.peers.remove(&player_id) {
                self.client_ids.remove(&peer.client_id);
            }
            return;
        }

        if let Some(peer) = self.peers.get_mut(&player_id) {
            peer.handle = Some(handle);
            peer.connected = true;
            peer.disconnect_time = None;
        }
        self.peers_by_handle.insert(handle, player_id);
        self.core.on_player_reconnected(player_id);

        let _ = self.transport.send(
            handle,
            &Packet::ServerAccept {
                player_id: player_id as i32,
                is_reconnection: true,
            },
        );
        let state = self.core.game_state_snapshot();
        let _ = self.transport.send(handle, &Packet::StateUpdate {
            frame: state.frame,
            state,
        });
        self.last_sent_state.insert(player_id, state);
        log::info!("player {player_id} reconnected as peer {handle}");
    }

    fn start_running(&mut self) {
        self.phase = Phase::Running;
        log::info!("minPlayers reached, session is now RUNNING");
        let assignments: Vec<(PeerHandle, PlayerId)> = self
            .peers
            .values()
            .filter_map(|p| p.handle.map(|h| (h, p.player_id)))
            .collect();
        for (handle, player_id) in assignments {
            let _ = self.transport.send(handle, &Packet::GameStart { player_id });
        }
    }

    fn reject(&mut self, handle: PeerHandle) {
        let _ = self.transport.send(handle, &Packet::ServerReject);
        self.transport.close(handle);
    }

    fn handle_disconnect(&mut self, handle: PeerHandle) {
        let Some(player_id) = self.peers_by_handle.remove(&handle) else {
            return;
        };
        self.core.on_player_disconnected(player_id);

        if self.config.allow_reconnection {
            if let Some(peer) = self.peers.get_mut(&player_id) {
                peer.connected = false;
                peer.disconnect_time = Some(Instant::now());
                peer.handle = None;
            }
            log::info!("player {player_id} disconnected, awaiting reconnection");
        } else {
            if let Some(peer) = self.peers.remove(&player_id) {
                self.client_ids.remove(&peer.client_id);
            }
            self.last_sent_state.remove(&player_id);
            log::info!("player {player_id} disconnected");
        }

        if self.phase == Phase::Running && self.config.stop_on_below_min {
            let active = self.peers.values().filter(|p| p.connected).count();
            if active < self.config.min_players {
                log::info!("active players {active} below minPlayers, stopping session");
                self.phase = Phase::Stopped;
            }
        }
    }

    /// Frees peer slots whose reconnection window has elapsed, so a later
    /// `HELLO` for the same clientId is treated as brand new.
    fn reap_expired_reconnections(&mut self) {
        if self.config.reconnection_is_unbounded() {
            return;
        }
        let expired: Vec<PlayerId> = self
            .peers
            .values()
            .filter(|p| {
                !p.connected
                    && p.disconnect_time
                        .is_some_and(|t| t.elapsed() > self.config.reconnection_timeout)
            })
            .map(|p| p.player_id)
            .collect();
        for player_id in expired {
            if let Some(peer) = self.peers.remove(&player_id) {
                self.client_ids.remove(&peer.client_id);
                self.last_sent_state.remove(&player_id);
                log::debug!("reconnection window for player {player_id} expired, slot freed");
            }
        }
    }

    /// Sends each connected peer a full `STATE_UPDATE` on first delivery,
    /// otherwise a `DELTA_STATE_UPDATE` against the last state sent to that
    /// peer specifically, so a newly-joined or just-reconnected peer always
    /// gets a full baseline before any delta is diffed against it.
    fn fanout(&mut self, frame: Frame) {
        let state = self.core.game_state_snapshot();
        let events = self.core.peek_events(frame);
        let peers: Vec<(PeerHandle, PlayerId)> = self
            .peers
            .values()
            .filter_map(|p| p.handle.map(|h| (h, p.player_id)))
            .collect();

        for (handle, player_id) in peers {
            match self.last_sent_state.get(&player_id).copied() {
                None => {
                    let _ = self.transport.send(handle, &Packet::StateUpdate { frame, state });
                }
                Some(prev) => {
                    let deltas = self.core.delta_engine().check(&prev, &state);
                    if !deltas.is_empty() {
                        let _ = self
                            .transport
                            .send(handle, &Packet::DeltaStateUpdate { frame, deltas });
                    }
                }
            }
            self.last_sent_state.insert(player_id, state);

            for event in &events {
                let _ = self.transport.send(
                    handle,
                    &Packet::EventUpdate {
                        frame,
                        event: *event,
                    },
                );
            }
        }
    }
}

fn transport_err_to_io(err: TransportError) -> io::Error {
    match err {
        TransportError::Io(e) => e,
        other => io::Error::other(other.to_string()),
    }
}
