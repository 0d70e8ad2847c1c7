//! A small deterministic arena game used to exercise the core's opaque
//! `GameLogic`/`DeltaHandler` contracts end to end. Movement is integrated
//! from a per-player input each frame; position is a plain integer pair
//! rather than a rigid-body simulation, since physics is an external
//! concern the core never touches directly.
//!
//! State layout (big-endian, packed, `MAX_PLAYERS` fixed-size records):
//! `[{x: i32, y: i32, health: i32} ; MAX_PLAYERS]`. A disconnected player's
//! record is left as-is rather than zeroed, so a reconnecting player finds
//! their slot exactly as they left it.

use std::collections::HashMap;

use tidewire_core::{
    DeltaEngine, DeltaHandler, DeltaStateBlob, EventHandler, GameEventBlob, GameLogic,
    GameStateBlob, InputBlob, InputEntry, PlayerId,
};

pub const MAX_PLAYERS: usize = 8;
const RECORD_SIZE: usize = 12;
const STATE_LEN: usize = MAX_PLAYERS * RECORD_SIZE;

const INPUT_UP: u8 = 1 << 0;
const INPUT_DOWN: u8 = 1 << 1;
const INPUT_LEFT: u8 = 1 << 2;
const INPUT_RIGHT: u8 = 1 << 3;
const INPUT_ATTACK: u8 = 1 << 4;

const MELEE_RANGE: i32 = 1;
const ATTACK_DAMAGE: i32 = 10;
const STARTING_HEALTH: i32 = 100;

pub const DAMAGE_EVENT_TYPE: u32 = 1;
pub const POSITION_DELTA_TYPE: u32 = 1;
pub const HEALTH_DELTA_TYPE: u32 = 2;

fn record_offset(player_id: PlayerId) -> Option<usize> {
    let idx = player_id as usize;
    (idx < MAX_PLAYERS).then(|| idx * RECORD_SIZE)
}

fn read_i32(state: &GameStateBlob, offset: usize) -> i32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&state.data[offset..offset + 4]);
    i32::from_be_bytes(bytes)
}

fn write_i32(state: &mut GameStateBlob, offset: usize, value: i32) {
    state.data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn player_x(state: &GameStateBlob, player_id: PlayerId) -> i32 {
    record_offset(player_id).map(|o| read_i32(state, o)).unwrap_or(0)
}

fn player_y(state: &GameStateBlob, player_id: PlayerId) -> i32 {
    record_offset(player_id)
        .map(|o| read_i32(state, o + 4))
        .unwrap_or(0)
}

fn player_health(state: &GameStateBlob, player_id: PlayerId) -> i32 {
    record_offset(player_id)
        .map(|o| read_i32(state, o + 8))
        .unwrap_or(0)
}

/// Builds the encode/check/apply triple every delta handler below shares:
/// read one `i32` field out of a fixed-size per-player record, compare
/// against the previous state, and round-trip it through an 8-byte
/// `{player_id, value}` payload.
fn encode_player_value(player_id: PlayerId, value: i32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.extend_from_slice(&player_id.to_be_bytes());
    buf.extend_from_slice(&value.to_be_bytes());
    buf
}

fn decode_player_value(bytes: &[u8]) -> Option<(PlayerId, i32)> {
    if bytes.len() != 8 {
        return None;
    }
    let player_id = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    let value = i32::from_be_bytes(bytes[4..8].try_into().unwrap());
    Some((player_id, value))
}

/// Diffs/patches the `x, y` pair of every player record.
pub struct PositionDeltaHandler;

impl DeltaHandler for PositionDeltaHandler {
    fn delta_type(&self) -> u32 {
        POSITION_DELTA_TYPE
    }

    fn check(&self, prev: &GameStateBlob, cur: &GameStateBlob) -> Vec<DeltaStateBlob> {
        let mut out = Vec::new();
        for player_id in 0..MAX_PLAYERS as PlayerId {
            let prev_pos = (player_x(prev, player_id), player_y(prev, player_id));
            let cur_pos = (player_x(cur, player_id), player_y(cur, player_id));
            if prev_pos != cur_pos {
                let mut payload = encode_player_value(player_id, cur_pos.0);
                payload.extend_from_slice(&cur_pos.1.to_be_bytes());
                out.push(DeltaStateBlob::new(cur.frame, POSITION_DELTA_TYPE, &payload));
            }
        }
        out
    }

    fn apply(&self, delta: &DeltaStateBlob, state: &mut GameStateBlob) {
        let bytes = delta.as_slice();
        if bytes.len() != 12 {
            log::warn!("malformed position delta payload of {} bytes", bytes.len());
            return;
        }
        let player_id = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let x = i32::from_be_bytes(bytes[4..8].try_into().unwrap());
        let y = i32::from_be_bytes(bytes[8..12].try_into().unwrap());
        if let Some(offset) = record_offset(player_id) {
            write_i32(state, offset, x);
            write_i32(state, offset + 4, y);
            state.len = state.len.max(STATE_LEN);
        }
    }

    fn compare(&self, delta: &DeltaStateBlob, state: &GameStateBlob) -> bool {
        let bytes = delta.as_slice();
        if bytes.len() != 12 {
            return false;
        }
        let player_id = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let x = i32::from_be_bytes(bytes[4..8].try_into().unwrap());
        let y = i32::from_be_bytes(bytes[8..12].try_into().unwrap());
        player_x(state, player_id) == x && player_y(state, player_id) == y
    }
}

/// Diffs/patches the `health` field of every player record.
pub struct HealthDeltaHandler;

impl DeltaHandler for HealthDeltaHandler {
    fn delta_type(&self) -> u32 {
        HEALTH_DELTA_TYPE
    }

    fn check(&self, prev: &GameStateBlob, cur: &GameStateBlob) -> Vec<DeltaStateBlob> {
        let mut out = Vec::new();
        for player_id in 0..MAX_PLAYERS as PlayerId {
            let prev_hp = player_health(prev, player_id);
            let cur_hp = player_health(cur, player_id);
            if prev_hp != cur_hp {
                let payload = encode_player_value(player_id, cur_hp);
                out.push(DeltaStateBlob::new(cur.frame, HEALTH_DELTA_TYPE, &payload));
            }
        }
        out
    }

    fn apply(&self, delta: &DeltaStateBlob, state: &mut GameStateBlob) {
        let Some((player_id, health)) = decode_player_value(delta.as_slice()) else {
            log::warn!("malformed health delta payload of {} bytes", delta.len);
            return;
        };
        if let Some(offset) = record_offset(player_id) {
            write_i32(state, offset + 8, health);
            state.len = state.len.max(STATE_LEN);
        }
    }

    fn compare(&self, delta: &DeltaStateBlob, state: &GameStateBlob) -> bool {
        match decode_player_value(delta.as_slice()) {
            Some((player_id, health)) => player_health(state, player_id) == health,
            None => false,
        }
    }
}

/// Registers [`PositionDeltaHandler`] and [`HealthDeltaHandler`], the pair
/// every binary in this workspace wires up during init.
pub fn build_delta_engine() -> DeltaEngine {
    let mut engine = DeltaEngine::new();
    engine.register(Box::new(PositionDeltaHandler));
    engine.register(Box::new(HealthDeltaHandler));
    engine
}

/// Applies a damage event scheduled for the following frame.
pub struct DamageEventHandler;

impl EventHandler for DamageEventHandler {
    fn event_type(&self) -> u32 {
        DAMAGE_EVENT_TYPE
    }

    fn apply(&self, event: &GameEventBlob, state: &mut GameStateBlob) {
        let bytes = event.as_slice();
        if bytes.len() != 8 {
            log::warn!("malformed damage event payload of {} bytes", bytes.len());
            return;
        }
        let target = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let amount = i32::from_be_bytes(bytes[4..8].try_into().unwrap());
        if let Some(offset) = record_offset(target) {
            let current = read_i32(state, offset + 8);
            write_i32(state, offset + 8, (current - amount).max(0));
        }
    }
}

fn damage_event(target: PlayerId, amount: i32) -> GameEventBlob {
    let mut payload = Vec::with_capacity(8);
    payload.extend_from_slice(&target.to_be_bytes());
    payload.extend_from_slice(&amount.to_be_bytes());
    GameEventBlob::new(DAMAGE_EVENT_TYPE, &payload)
}

/// The `GameLogic` every binary in this workspace runs: players move on an
/// integer grid and can melee an adjacent opponent. Deterministic given
/// `(state, events, inputs)`, as the `GameLogic` contract requires.
pub struct DemoGameLogic {
    is_server: bool,
    damage_handler: DamageEventHandler,
}

impl DemoGameLogic {
    pub fn new() -> Self {
        DemoGameLogic {
            is_server: false,
            damage_handler: DamageEventHandler,
        }
    }
}

impl Default for DemoGameLogic {
    fn default() -> Self {
        Self::new()
    }
}

impl GameLogic for DemoGameLogic {
    fn set_is_server(&mut self, is_server: bool) {
        self.is_server = is_server;
    }

    fn init(&mut self, state: &mut GameStateBlob) {
        let mut bytes = vec![0u8; STATE_LEN];
        for player_id in 0..MAX_PLAYERS {
            let offset = player_id * RECORD_SIZE;
            bytes[offset + 8..offset + 12].copy_from_slice(&STARTING_HEALTH.to_be_bytes());
        }
        state.set_bytes(&bytes);
    }

    fn generate_local_input(&self) -> InputBlob {
        InputBlob::zero()
    }

    fn simulate_frame(
        &mut self,
        state: &mut GameStateBlob,
        events: &[GameEventBlob],
        inputs: &HashMap<PlayerId, InputEntry>,
    ) -> Vec<GameEventBlob> {
        self.damage_handler_apply_all(events, state);

        let mut emitted = Vec::new();
        for entry in inputs.values() {
            let Some(offset) = record_offset(entry.player_id) else {
                continue;
            };
            let flags = entry.input.0[0];
            let mut x = read_i32(state, offset);
            let mut y = read_i32(state, offset + 4);
            if flags & INPUT_UP != 0 {
                y -= 1;
            }
            if flags & INPUT_DOWN != 0 {
                y += 1;
            }
            if flags & INPUT_LEFT != 0 {
                x -= 1;
            }
            if flags & INPUT_RIGHT != 0 {
                x += 1;
            }
            write_i32(state, offset, x);
            write_i32(state, offset + 4, y);

            if flags & INPUT_ATTACK != 0 {
                for target_id in 0..MAX_PLAYERS as PlayerId {
                    if target_id == entry.player_id {
                        continue;
                    }
                    if player_health(state, target_id) <= 0 {
                        continue;
                    }
                    let dx = (x - player_x(state, target_id)).abs();
                    let dy = (y - player_y(state, target_id)).abs();
                    if dx <= MELEE_RANGE && dy <= MELEE_RANGE {
                        emitted.push(damage_event(target_id, ATTACK_DAMAGE));
                    }
                }
            }
        }

        state.len = state.len.max(STATE_LEN);
        emitted
    }

    fn compare_states(&self, a: &GameStateBlob, b: &GameStateBlob) -> bool {
        a.as_slice() == b.as_slice()
    }

    fn print_state(&self, state: &GameStateBlob) {
        for player_id in 0..MAX_PLAYERS as PlayerId {
            log::debug!(
                "player {player_id}: x={} y={} hp={}",
                player_x(state, player_id),
                player_y(state, player_id),
                player_health(state, player_id),
            );
        }
        let _ = self.is_server;
    }
}

impl DemoGameLogic {
    fn damage_handler_apply_all(&self, events: &[GameEventBlob], state: &mut GameStateBlob) {
        for event in events {
            if event.event_type == DAMAGE_EVENT_TYPE {
                self.damage_handler.apply(event, state);
            } else {
                log::warn!("unhandled event type {}", event.event_type);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidewire_core::InputBlob;

    fn input(player_id: PlayerId, flags: u8) -> InputEntry {
        InputEntry {
            frame: 0,
            player_id,
            input: InputBlob([flags, 0, 0, 0]),
        }
    }

    #[test]
    fn init_sets_starting_health_for_every_slot() {
        let mut logic = DemoGameLogic::new();
        let mut state = GameStateBlob::default();
        logic.init(&mut state);
        for player_id in 0..MAX_PLAYERS as PlayerId {
            assert_eq!(player_health(&state, player_id), STARTING_HEALTH);
            assert_eq!(player_x(&state, player_id), 0);
        }
    }

    #[test]
    fn movement_input_displaces_the_acting_player_only() {
        let mut logic = DemoGameLogic::new();
        let mut state = GameStateBlob::default();
        logic.init(&mut state);

        let mut inputs = HashMap::new();
        inputs.insert(0, input(0, INPUT_RIGHT | INPUT_UP));
        logic.simulate_frame(&mut state, &[], &inputs);

        assert_eq!(player_x(&state, 0), 1);
        assert_eq!(player_y(&state, 0), -1);
        assert_eq!(player_x(&state, 1), 0);
    }

    #[test]
    fn melee_attack_on_an_adjacent_target_emits_a_damage_event_not_applied_this_frame() {
        let mut logic = DemoGameLogic::new();
        let mut state = GameStateBlob::default();
        logic.init(&mut state);
        // Player 1 starts adjacent to player 0 (both at origin satisfies
        // dx=dy=0 <= MELEE_RANGE).
        let mut inputs = HashMap::new();
        inputs.insert(0, input(0, INPUT_ATTACK));
        let emitted = logic.simulate_frame(&mut state, &[], &inputs);

        assert_eq!(emitted.len(), MAX_PLAYERS - 1);
        // Health is untouched this frame: damage only lands once the event
        // is scheduled for f+1 and replayed through simulate_frame's events
        // argument.
        assert_eq!(player_health(&state, 1), STARTING_HEALTH);
    }

    #[test]
    fn damage_event_replayed_next_frame_reduces_target_health() {
        let mut logic = DemoGameLogic::new();
        let mut state = GameStateBlob::default();
        logic.init(&mut state);

        let event = damage_event(1, ATTACK_DAMAGE);
        logic.simulate_frame(&mut state, &[event], &HashMap::new());

        assert_eq!(player_health(&state, 1), STARTING_HEALTH - ATTACK_DAMAGE);
    }

    #[test]
    fn damage_cannot_reduce_health_below_zero() {
        let mut logic = DemoGameLogic::new();
        let mut state = GameStateBlob::default();
        logic.init(&mut state);

        for _ in 0..20 {
            let event = damage_event(1, ATTACK_DAMAGE);
            logic.simulate_frame(&mut state, &[event], &HashMap::new());
        }
        assert_eq!(player_health(&state, 1), 0);
    }

    #[test]
    fn position_delta_round_trips_a_moved_player() {
        let engine = build_delta_engine();
        let mut logic = DemoGameLogic::new();
        let mut prev = GameStateBlob::default();
        logic.init(&mut prev);
        prev.frame = 1;

        let mut cur = prev;
        cur.frame = 2;
        let mut inputs = HashMap::new();
        inputs.insert(0, input(0, INPUT_RIGHT));
        logic.simulate_frame(&mut cur, &[], &inputs);

        let deltas = engine.check(&prev, &cur);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].delta_type, POSITION_DELTA_TYPE);

        let mut reconstructed = prev;
        engine.apply_all(&mut reconstructed, &deltas);
        assert_eq!(player_x(&reconstructed, 0), 1);
        assert!(engine.compare_all(&reconstructed, &deltas));
    }

    #[test]
    fn health_delta_is_emitted_only_for_the_player_whose_health_changed() {
        let engine = build_delta_engine();
        let mut logic = DemoGameLogic::new();
        let mut prev = GameStateBlob::default();
        logic.init(&mut prev);
        prev.frame = 1;

        let mut cur = prev;
        cur.frame = 2;
        let event = damage_event(3, ATTACK_DAMAGE);
        logic.simulate_frame(&mut cur, &[event], &HashMap::new());

        let deltas = engine.check(&prev, &cur);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].delta_type, HEALTH_DELTA_TYPE);
        let (player_id, health) = decode_player_value(deltas[0].as_slice()).unwrap();
        assert_eq!(player_id, 3);
        assert_eq!(health, STARTING_HEALTH - ATTACK_DAMAGE);
    }
}
