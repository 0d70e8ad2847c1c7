//! The simulation capability the core treats as opaque. Neither the
//! server nor client core ever inspects `GameStateBlob` bytes directly;
//! every byte-level decision is delegated through this trait.

use std::collections::HashMap;

use crate::types::{GameEventBlob, GameStateBlob, InputEntry, PlayerId};

pub trait GameLogic: Send {
    /// Set by the core before `init`. Implementations needing it for
    /// branching (e.g. a demo that logs differently server-side) should
    /// record it here.
    fn set_is_server(&mut self, is_server: bool);

    fn init(&mut self, state: &mut GameStateBlob);

    /// Produces this tick's local input from whatever input source the
    /// implementation wraps (keyboard, scripted bot, headless replay).
    fn generate_local_input(&self) -> crate::types::InputBlob;

    /// Advances `state` by exactly one frame given the events scheduled for
    /// it and the inputs collected for it. Must be deterministic: the same
    /// `(state, events, inputs)` triple always produces the same resulting
    /// `state`, since both server and client rely on bit-for-bit agreement
    /// for misprediction detection.
    fn simulate_frame(
        &mut self,
        state: &mut GameStateBlob,
        events: &[GameEventBlob],
        inputs: &HashMap<PlayerId, InputEntry>,
    ) -> Vec<GameEventBlob>;

    /// Byte-equal or semantic-equal as the implementation chooses; must
    /// agree with `simulate_frame`'s determinism, since it drives
    /// misprediction detection on reconciliation.
    fn compare_states(&self, a: &GameStateBlob, b: &GameStateBlob) -> bool;

    /// Diagnostic dump, invoked by orchestrators on a detected desync.
    fn print_state(&self, state: &GameStateBlob);
}
