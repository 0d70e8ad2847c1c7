//! Server simulation core. Pure simulation/bookkeeping logic with no
//! transport dependency, so it can be driven directly in tests; the session
//! orchestrator in the server binary wires this to a [`crate::transport::ServerTransport`].

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::config::PRUNE_PERIOD_SERVER;
use crate::delta::DeltaEngine;
use crate::event::EventQueue;
use crate::game_logic::GameLogic;
use crate::types::{Frame, GameStateBlob, InputBlob, InputEntry, PlayerId, StateUpdate};

struct Inner {
    current_frame: Frame,
    game_state: GameStateBlob,
    applied_inputs: HashMap<Frame, HashMap<PlayerId, InputEntry>>,
    event_queue: EventQueue,
    connected_players: HashSet<PlayerId>,
}

/// Authoritative simulation state, guarded by a single mutex.
/// `simulate_frame` runs with the lock held (unlike the client core, the
/// server never releases its lock mid-tick: it has no rollback to perform
/// and so no reason to run `simulate_frame` outside the critical section).
pub struct ServerSimulationCore {
    inner: Mutex<Inner>,
    game_logic: Mutex<Box<dyn GameLogic>>,
    delta_engine: DeltaEngine,
}

impl ServerSimulationCore {
    pub fn new(mut game_logic: Box<dyn GameLogic>, delta_engine: DeltaEngine) -> Self {
        game_logic.set_is_server(true);
        let mut game_state = GameStateBlob::default();
        game_logic.init(&mut game_state);

        ServerSimulationCore {
            inner: Mutex::new(Inner {
                current_frame: 0,
                game_state,
                applied_inputs: HashMap::new(),
                event_queue: EventQueue::new(),
                connected_players: HashSet::new(),
            }),
            game_logic: Mutex::new(game_logic),
            delta_engine,
        }
    }

    pub fn current_frame(&self) -> Frame {
        self.inner.lock().unwrap().current_frame
    }

    /// Records `entry` for the frame it targets. Input for a frame at or
    /// before the retention horizon is still accepted and stored, since the
    /// server never rewinds to resimulate a past frame regardless of when
    /// the input for it shows up.
    pub fn on_client_input_received(&self, entry: InputEntry) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .applied_inputs
            .entry(entry.frame)
            .or_default()
            .insert(entry.player_id, entry);
    }

    pub fn on_player_connected(&self, player_id: PlayerId) {
        self.inner.lock().unwrap().connected_players.insert(player_id);
    }

    pub fn on_player_reconnected(&self, player_id: PlayerId) {
        self.inner.lock().unwrap().connected_players.insert(player_id);
    }

    pub fn on_player_disconnected(&self, player_id: PlayerId) {
        self.inner
            .lock()
            .unwrap()
            .connected_players
            .remove(&player_id);
    }

    /// Advances the simulation by exactly one frame and returns the
    /// resulting authoritative state. Runs `cleanup_old_frames_internal`
    /// every `PRUNE_PERIOD` frames.
    pub fn tick(&self) -> StateUpdate {
        let mut inner = self.inner.lock().unwrap();
        let f = inner.current_frame;
        self.simulate_frame_locked(&mut inner, f);
        inner.current_frame = f + 1;

        if inner.current_frame % PRUNE_PERIOD_SERVER == 0 {
            self.cleanup_old_frames_locked(&mut inner);
        }

        let confirmed_inputs = inner
            .applied_inputs
            .get(&f)
            .cloned()
            .unwrap_or_default();

        StateUpdate {
            frame: inner.current_frame,
            state: inner.game_state,
            confirmed_inputs,
        }
    }

    /// Assumes `inner`'s lock is held (it's always called from within
    /// `tick`, which owns the `MutexGuard` for the duration).
    fn simulate_frame_locked(&self, inner: &mut Inner, f: Frame) {
        let inputs = inner.applied_inputs.get(&f).cloned().unwrap_or_default();
        let events = inner.event_queue.drain(f);

        let mut logic = self.game_logic.lock().unwrap();
        let emitted = logic.simulate_frame(&mut inner.game_state, &events, &inputs);
        drop(logic);

        for event in emitted {
            inner.event_queue.schedule(f + 1, event);
        }
        inner.game_state.frame = f + 1;
    }

    fn cleanup_old_frames_locked(&self, inner: &mut Inner) {
        let keep_from = inner
            .current_frame
            .saturating_sub(crate::config::FRAMES_TO_KEEP as u32);
        inner.applied_inputs.retain(|&f, _| f >= keep_from);
        inner.event_queue.prune_before(keep_from);
    }

    pub fn delta_engine(&self) -> &DeltaEngine {
        &self.delta_engine
    }

    /// Non-destructively reads events already scheduled for `frame`, for an
    /// orchestrator broadcasting `EVENT_UPDATE` alongside a tick's state
    /// fanout: these were generated during the previous frame's
    /// `simulate_frame` and are due to apply on `frame`.
    pub fn peek_events(&self, frame: Frame) -> Vec<crate::types::GameEventBlob> {
        self.inner.lock().unwrap().event_queue.peek(frame).to_vec()
    }

    pub fn game_state_snapshot(&self) -> GameStateBlob {
        self.inner.lock().unwrap().game_state
    }
}
