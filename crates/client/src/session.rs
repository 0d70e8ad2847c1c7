//! Client session orchestrator: binds a [`ClientTransport`] to a
//! [`ClientPredictionCore`] and an [`InputDelayController`]. Splits the
//! network-draining step from the fixed-timestep simulation step across
//! two dedicated OS threads: one draining transport into the core, one
//! driving local input submission and prediction ticks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tidewire_core::{
    ClientPredictionCore, ClientTransport, DeltaEngine, GameLogic, InputDelayController, Packet,
    PlayerId,
};

use crate::handshake::HandshakeOutcome;

/// Client sends an `INPUT_DELAY` probe every this many local ticks.
const INPUT_DELAY_PROBE_PERIOD: u32 = 30;

pub struct ClientSession {
    core: Arc<ClientPredictionCore>,
    transport: Arc<Mutex<ClientTransport>>,
    delay_controller: Arc<Mutex<InputDelayController>>,
    // `DeltaHandler` is only required to be `Send`, not `Sync`, so the
    // engine is owned solely by the network thread rather than shared
    // behind an `Arc` like the other fields.
    delta_engine: Option<DeltaEngine>,
    local_player_id: PlayerId,
    tick_rate: u32,
    running: Arc<AtomicBool>,
    network_thread: Option<std::thread::JoinHandle<()>>,
    tick_thread: Option<std::thread::JoinHandle<()>>,
}

impl ClientSession {
    /// Builds a session from an already-completed handshake, applying any
    /// `STATE_UPDATE` the server sent during a reconnect before the
    /// prediction loop starts.
    pub fn from_handshake(
        outcome: HandshakeOutcome,
        game_logic: Box<dyn GameLogic>,
        delta_engine: DeltaEngine,
        tick_rate: u32,
    ) -> Self {
        let core = Arc::new(ClientPredictionCore::new(outcome.player_id, game_logic));
        if let Some(initial) = outcome.initial_state {
            core.on_server_state_update(initial);
        }

        ClientSession {
            core,
            transport: Arc::new(Mutex::new(outcome.transport)),
            delay_controller: Arc::new(Mutex::new(InputDelayController::new())),
            delta_engine: Some(delta_engine),
            local_player_id: outcome.player_id,
            tick_rate,
            running: Arc::new(AtomicBool::new(true)),
            network_thread: None,
            tick_thread: None,
        }
    }

    pub fn local_player_id(&self) -> PlayerId {
        self.local_player_id
    }

    pub fn core(&self) -> &Arc<ClientPredictionCore> {
        &self.core
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the network-drain thread and the simulation/tick thread.
    /// Returns immediately; call [`ClientSession::stop`] for an orderly
    /// shutdown.
    pub fn start(&mut self) {
        self.network_thread = Some(self.spawn_network_thread());
        self.tick_thread = Some(self.spawn_tick_thread());
    }

    /// Signals both threads to exit, joins them, then closes the transport
    /// with a clean-close opcode. No mid-tick cancellation: the snapshot
    /// ring's memory is only released once both threads have stopped
    /// touching it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.network_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.tick_thread.take() {
            let _ = handle.join();
        }
        self.transport.lock().unwrap().close();
    }

    fn spawn_network_thread(&mut self) -> std::thread::JoinHandle<()> {
        let core = Arc::clone(&self.core);
        let transport = Arc::clone(&self.transport);
        let delay_controller = Arc::clone(&self.delay_controller);
        let delta_engine = self
            .delta_engine
            .take()
            .expect("start() called more than once");
        let running = Arc::clone(&self.running);
        let tick_rate = self.tick_rate;

        std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let packets = {
                    let mut guard = transport.lock().unwrap();
                    guard.poll()
                };
                let Some(packets) = packets else {
                    log::warn!("server connection lost");
                    running.store(false, Ordering::SeqCst);
                    break;
                };
                for packet in packets {
                    dispatch_packet(
                        packet,
                        &core,
                        &delta_engine,
                        &delay_controller,
                        tick_rate,
                    );
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        })
    }

    fn spawn_tick_thread(&mut self) -> std::thread::JoinHandle<()> {
        let core = Arc::clone(&self.core);
        let transport = Arc::clone(&self.transport);
        let running = Arc::clone(&self.running);
        let local_player_id = self.local_player_id;
        let tick_duration = Duration::from_millis(1000 / self.tick_rate as u64);

        std::thread::spawn(move || {
            let mut local_tick: u32 = 0;
            while running.load(Ordering::SeqCst) {
                let next_tick = Instant::now() + tick_duration;

                let input = core.generate_local_input();
                let submit_frame = core.submit_local_input(input);
                let send_result = transport.lock().unwrap().send(&Packet::Input {
                    player_id: local_player_id,
                    frame: submit_frame,
                    input,
                });
                if send_result.is_err() {
                    log::warn!("failed to send INPUT to server, stopping session");
                    running.store(false, Ordering::SeqCst);
                    break;
                }
                core.tick();

                local_tick += 1;
                if local_tick % INPUT_DELAY_PROBE_PERIOD == 0 {
                    let timestamp_ms = InputDelayController::timestamp_ms();
                    let _ = transport.lock().unwrap().send(&Packet::InputDelay {
                        player_id: local_player_id,
                        timestamp_ms,
                    });
                }

                let now = Instant::now();
                if next_tick > now {
                    std::thread::sleep(next_tick - now);
                }
            }
        })
    }
}

fn dispatch_packet(
    packet: Packet,
    core: &ClientPredictionCore,
    delta_engine: &DeltaEngine,
    delay_controller: &Mutex<InputDelayController>,
    tick_rate: u32,
) {
    match packet {
        Packet::StateUpdate { frame, state } => {
            core.on_server_state_update(tidewire_core::StateUpdate {
                frame,
                state,
                confirmed_inputs: Default::default(),
            });
        }
        Packet::InputUpdate {
            player_id,
            frame,
            input,
        } => {
            core.on_server_input_update(tidewire_core::InputEntry {
                frame,
                player_id,
                input,
            });
        }
        Packet::DeltaStateUpdate { frame, deltas } => {
            core.on_server_deltas_update(&deltas, frame, delta_engine, Default::default());
        }
        Packet::EventUpdate { frame, event } => {
            core.on_event_update(frame, event);
        }
        Packet::InputDelay { timestamp_ms, .. } => {
            let now_ms = InputDelayController::timestamp_ms();
            let mut controller = delay_controller.lock().unwrap();
            if let Some(delay_frames) = controller.update_rtt(now_ms, timestamp_ms, tick_rate) {
                core.update_current_frame(delay_frames);
            }
        }
        other => {
            log::debug!("ignoring post-handshake packet: {other:?}");
        }
    }
}
