//! Client-side prediction core: predicts ahead of the server using local
//! input, then reconciles against authoritative state updates as they
//! arrive. The snapshot-ring lookup is always
//! locked-copy-release-simulate-relock, so `simulate_frame` is never
//! invoked while the core's mutex is held.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::MAX_ROLLBACK_FRAMES;
use crate::event::EventQueue;
use crate::game_logic::GameLogic;
use crate::snapshot::SnapshotRing;
use crate::types::{Frame, GameEventBlob, GameStateBlob, InputBlob, InputEntry, PlayerId, StateUpdate};

struct Inner {
    current_prediction_frame: Frame,
    game_state: GameStateBlob,
    input_delay_frames: u32,
    ring: SnapshotRing,
    events: EventQueue,
}

pub struct ClientPredictionCore {
    local_player_id: PlayerId,
    inner: Mutex<Inner>,
    game_logic: Mutex<Box<dyn GameLogic>>,
}

impl ClientPredictionCore {
    pub fn new(local_player_id: PlayerId, mut game_logic: Box<dyn GameLogic>) -> Self {
        game_logic.set_is_server(false);
        let mut game_state = GameStateBlob::default();
        game_logic.init(&mut game_state);

        ClientPredictionCore {
            local_player_id,
            inner: Mutex::new(Inner {
                current_prediction_frame: 0,
                game_state,
                input_delay_frames: crate::config::INPUT_DELAY_FRAMES_DEFAULT,
                ring: SnapshotRing::new(2 * MAX_ROLLBACK_FRAMES as usize),
                events: EventQueue::new(),
            }),
            game_logic: Mutex::new(game_logic),
        }
    }

    pub fn current_prediction_frame(&self) -> Frame {
        self.inner.lock().unwrap().current_prediction_frame
    }

    pub fn predicted_state(&self) -> GameStateBlob {
        self.inner.lock().unwrap().game_state
    }

    /// Records `input` for `currentPredictionFrame + input_delay_frames`
    /// and returns that frame so the caller can tag the outgoing `INPUT`
    /// packet.
    pub fn submit_local_input(&self, input: InputBlob) -> Frame {
        let mut inner = self.inner.lock().unwrap();
        let submit_frame = inner.current_prediction_frame + inner.input_delay_frames;
        let player_id = self.local_player_id;
        inner.ring.with_snapshot(submit_frame, |snap| {
            snap.inputs.insert(
                player_id,
                InputEntry {
                    frame: submit_frame,
                    player_id,
                    input,
                },
            );
        });
        submit_frame
    }

    /// Advances local prediction by one frame and prunes history outside
    /// the rollback window.
    pub fn tick(&self) {
        let next = {
            let inner = self.inner.lock().unwrap();
            inner.current_prediction_frame + 1
        };
        self.predict_frame(next);

        let mut inner = self.inner.lock().unwrap();
        inner.current_prediction_frame = next;
        let keep_from = next.saturating_sub(MAX_ROLLBACK_FRAMES);
        inner.ring.prune_outside(keep_from, next);
        inner.events.prune_before(keep_from);
    }

    /// Copies inputs for `f` under lock, simulates *without* holding the
    /// lock, then re-acquires to store the result, so a slow `simulate_frame`
    /// never blocks a concurrent reader of the predicted state.
    fn predict_frame(&self, f: Frame) {
        let (inputs, events, mut state) = {
            let mut inner = self.inner.lock().unwrap();
            let inputs = inner.ring.with_snapshot(f, |snap| snap.inputs.clone());
            let events = inner.events.drain(f);
            (inputs, events, inner.game_state)
        };

        let emitted = {
            let mut logic = self.game_logic.lock().unwrap();
            logic.simulate_frame(&mut state, &events, &inputs)
        };
        state.frame = f;
        // Speculative events emitted during local prediction are not
        // scheduled here: the server is the sole source of truth for event
        // delivery, so the client only ever applies events it receives via
        // `on_event_update`, never ones its own prediction guessed at.
        let _ = emitted;

        let mut inner = self.inner.lock().unwrap();
        inner.game_state = state;
        inner.ring.with_snapshot(f, |snap| snap.state = state);
    }

    /// Writes a server-echoed input into the snapshot for its frame. No
    /// simulation is triggered here; reconciliation only happens on a
    /// state update.
    pub fn on_server_input_update(&self, entry: InputEntry) {
        let mut inner = self.inner.lock().unwrap();
        inner.ring.with_snapshot(entry.frame, |snap| {
            snap.inputs.insert(entry.player_id, entry);
        });
    }

    /// Compares the locally predicted state at `update.frame` against the
    /// server's, then either resimulates forward from the authoritative
    /// state (misprediction within the rollback window) or fast-forwards
    /// to adopt it (the server is ahead of local prediction).
    pub fn on_server_state_update(&self, update: StateUpdate) {
        let current = self.current_prediction_frame();
        if update.frame + MAX_ROLLBACK_FRAMES < current {
            log::warn!(
                "discarding server update for frame {} older than rollback horizon (current {})",
                update.frame,
                current
            );
            return;
        }

        let mispredicted = {
            let mut inner = self.inner.lock().unwrap();
            let mispredicted = inner.ring.with_snapshot(update.frame, |snap| {
                let logic = self.game_logic.lock().unwrap();
                !logic.compare_states(&snap.state, &update.state)
            });
            inner.ring.with_snapshot(update.frame, |snap| {
                snap.state = update.state;
                snap.inputs = update.confirmed_inputs.clone();
            });
            mispredicted
        };

        if mispredicted {
            log::warn!("misprediction detected at server frame {}", update.frame);
        }

        let current = self.current_prediction_frame();
        if mispredicted && update.frame <= current {
            {
                let mut inner = self.inner.lock().unwrap();
                inner.game_state = update.state;
                inner.game_state.frame = update.frame;
            }
            for f in (update.frame + 1)..=current {
                self.predict_frame(f);
            }
            log::info!(
                "applied correction from frame {} to {}",
                update.frame,
                current
            );
        } else if update.frame >= current {
            let mut inner = self.inner.lock().unwrap();
            inner.game_state = update.state;
            inner.current_prediction_frame = update.frame;
        }
    }

    /// Reconstructs the server's state for `frame` by applying `deltas` on
    /// top of the latest adopted baseline, then routes through the same
    /// reconciliation path as a full state update.
    pub fn on_server_deltas_update(
        &self,
        deltas: &[crate::types::DeltaStateBlob],
        frame: Frame,
        delta_engine: &crate::delta::DeltaEngine,
        confirmed_inputs: HashMap<PlayerId, InputEntry>,
    ) {
        let mut baseline = self.inner.lock().unwrap().game_state;
        delta_engine.apply_all(&mut baseline, deltas);
        baseline.frame = frame;
        self.on_server_state_update(StateUpdate {
            frame,
            state: baseline,
            confirmed_inputs,
        });
    }

    /// Schedules an event the server delivered via `EVENT_UPDATE` for replay
    /// at the frame the server stamped it with (always one frame after the
    /// server generated it).
    pub fn on_event_update(&self, frame: Frame, event: GameEventBlob) {
        self.inner.lock().unwrap().events.schedule(frame, event);
    }

    pub fn update_current_frame(&self, delay_frames: u32) {
        self.inner.lock().unwrap().input_delay_frames = delay_frames;
    }

    pub fn input_delay_frames(&self) -> u32 {
        self.inner.lock().unwrap().input_delay_frames
    }

    pub fn local_player_id(&self) -> PlayerId {
        self.local_player_id
    }

    /// Asks the underlying game logic for this tick's local input, for
    /// callers that drive input generation from the core rather than from
    /// a renderer-side input device.
    pub fn generate_local_input(&self) -> InputBlob {
        self.game_logic.lock().unwrap().generate_local_input()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GameEventBlob;

    /// State is a single u32 accumulator; `simulate_frame` adds the local
    /// player's input byte every frame. Deterministic and replayable.
    struct AccumulatorLogic;
    impl GameLogic for AccumulatorLogic {
        fn set_is_server(&mut self, _is_server: bool) {}
        fn init(&mut self, state: &mut GameStateBlob) {
            state.set_bytes(&0u32.to_be_bytes());
        }
        fn generate_local_input(&self) -> InputBlob {
            InputBlob::zero()
        }
        fn simulate_frame(
            &mut self,
            state: &mut GameStateBlob,
            _events: &[GameEventBlob],
            inputs: &HashMap<PlayerId, InputEntry>,
        ) -> Vec<GameEventBlob> {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&state.data[..4]);
            let mut total = u32::from_be_bytes(bytes);
            for entry in inputs.values() {
                total += entry.input.0[0] as u32;
            }
            state.data[..4].copy_from_slice(&total.to_be_bytes());
            state.len = state.len.max(4);
            Vec::new()
        }
        fn compare_states(&self, a: &GameStateBlob, b: &GameStateBlob) -> bool {
            a.as_slice() == b.as_slice()
        }
        fn print_state(&self, _state: &GameStateBlob) {}
    }

    fn counter_of(state: &GameStateBlob) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&state.data[..4]);
        u32::from_be_bytes(bytes)
    }

    #[test]
    fn submit_local_input_stamps_frame_with_input_delay() {
        let core = ClientPredictionCore::new(0, Box::new(AccumulatorLogic));
        core.update_current_frame(2);
        let frame = core.submit_local_input(InputBlob([1, 0, 0, 0]));
        assert_eq!(frame, 2);
    }

    #[test]
    fn tick_advances_prediction_and_applies_submitted_input() {
        let core = ClientPredictionCore::new(0, Box::new(AccumulatorLogic));
        core.update_current_frame(0);
        core.submit_local_input(InputBlob([3, 0, 0, 0]));
        core.tick();
        assert_eq!(core.current_prediction_frame(), 1);
        assert_eq!(counter_of(&core.predicted_state()), 3);
    }

    #[test]
    fn fast_forward_adopts_server_state_when_ahead_of_prediction() {
        let core = ClientPredictionCore::new(0, Box::new(AccumulatorLogic));
        core.update_current_frame(0);
        core.tick(); // currentPredictionFrame = 1

        let mut server_state = GameStateBlob {
            frame: 5,
            ..GameStateBlob::default()
        };
        server_state.set_bytes(&99u32.to_be_bytes());
        core.on_server_state_update(StateUpdate {
            frame: 5,
            state: server_state,
            confirmed_inputs: HashMap::new(),
        });

        assert_eq!(core.current_prediction_frame(), 5);
        assert_eq!(counter_of(&core.predicted_state()), 99);
    }

    #[test]
    fn misprediction_triggers_resimulation_to_current_frame() {
        let core = ClientPredictionCore::new(0, Box::new(AccumulatorLogic));
        core.update_current_frame(0);

        // Predict three frames locally with input 1 each tick (no input
        // submitted for frame 1, since real inputs only land via
        // submit_local_input; this models a local guess of zero_input that
        // later turns out wrong).
        core.tick(); // frame 1, counter 0
        core.tick(); // frame 2, counter 0
        core.tick(); // frame 3, counter 0
        assert_eq!(core.current_prediction_frame(), 3);
        assert_eq!(counter_of(&core.predicted_state()), 0);

        // Server says frame 1 actually had input 10 applied.
        let mut server_state = GameStateBlob {
            frame: 1,
            ..GameStateBlob::default()
        };
        server_state.set_bytes(&10u32.to_be_bytes());
        let mut confirmed = HashMap::new();
        confirmed.insert(
            0,
            InputEntry {
                frame: 1,
                player_id: 0,
                input: InputBlob([10, 0, 0, 0]),
            },
        );
        core.on_server_state_update(StateUpdate {
            frame: 1,
            state: server_state,
            confirmed_inputs: confirmed,
        });

        // Resimulated frames 2 and 3 replay from the corrected frame-1
        // baseline; since frames 2/3 carry no further input, the
        // accumulator stays at 10 through frame 3.
        assert_eq!(core.current_prediction_frame(), 3);
        assert_eq!(counter_of(&core.predicted_state()), 10);
    }
}
