//! Registered per-type delta handlers that diff and patch opaque game
//! states. The core is agnostic to which fields each handler covers;
//! the surrounding game layer registers handlers during init.

use std::collections::HashMap;

use crate::types::{DeltaStateBlob, Frame, GameStateBlob};

/// A single delta type's check/apply/compare behaviour.
pub trait DeltaHandler: Send {
    fn delta_type(&self) -> u32;

    /// Emits zero or more deltas describing what changed between `prev` and
    /// `cur` for the fields this handler owns. Called on the server.
    fn check(&self, prev: &GameStateBlob, cur: &GameStateBlob) -> Vec<DeltaStateBlob>;

    /// Patches `state` in place with `delta`. Called on the client.
    fn apply(&self, delta: &DeltaStateBlob, state: &mut GameStateBlob);

    /// Predicate used to verify a delta matches a state, for
    /// acknowledgement/debugging.
    fn compare(&self, delta: &DeltaStateBlob, state: &GameStateBlob) -> bool;
}

#[derive(Default)]
pub struct DeltaEngine {
    handlers: HashMap<u32, Box<dyn DeltaHandler>>,
}

impl DeltaEngine {
    pub fn new() -> Self {
        DeltaEngine::default()
    }

    pub fn register(&mut self, handler: Box<dyn DeltaHandler>) {
        self.handlers.insert(handler.delta_type(), handler);
    }

    /// Runs every registered handler's `check` against the same pair of
    /// states and concatenates the results, stamping each delta with
    /// `cur.frame`.
    pub fn check(&self, prev: &GameStateBlob, cur: &GameStateBlob) -> Vec<DeltaStateBlob> {
        let mut out = Vec::new();
        for handler in self.handlers.values() {
            for mut delta in handler.check(prev, cur) {
                delta.frame = cur.frame;
                out.push(delta);
            }
        }
        out
    }

    /// Applies every delta whose type has a registered handler, in order.
    /// A delta whose type is unregistered is skipped and logged rather
    /// than treated as an error, since handler coverage is a game-layer
    /// concern the core has no way to validate up front.
    pub fn apply_all(&self, state: &mut GameStateBlob, deltas: &[DeltaStateBlob]) {
        for delta in deltas {
            match self.handlers.get(&delta.delta_type) {
                Some(handler) => handler.apply(delta, state),
                None => log::warn!("no delta handler registered for type {}", delta.delta_type),
            }
        }
        state.frame = deltas.iter().map(|d| d.frame).max().unwrap_or(state.frame);
    }

    pub fn compare_all(&self, state: &GameStateBlob, deltas: &[DeltaStateBlob]) -> bool {
        deltas.iter().all(|delta| match self.handlers.get(&delta.delta_type) {
            Some(handler) => handler.compare(delta, state),
            None => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A handler that treats the whole payload as one opaque field: `check`
    /// emits a full copy whenever the bytes differ, `apply` overwrites.
    struct WholeStateHandler;

    impl DeltaHandler for WholeStateHandler {
        fn delta_type(&self) -> u32 {
            1
        }

        fn check(&self, prev: &GameStateBlob, cur: &GameStateBlob) -> Vec<DeltaStateBlob> {
            if prev.as_slice() == cur.as_slice() {
                Vec::new()
            } else {
                vec![DeltaStateBlob::new(cur.frame, 1, cur.as_slice())]
            }
        }

        fn apply(&self, delta: &DeltaStateBlob, state: &mut GameStateBlob) {
            state.set_bytes(delta.as_slice());
        }

        fn compare(&self, delta: &DeltaStateBlob, state: &GameStateBlob) -> bool {
            delta.as_slice() == state.as_slice()
        }
    }

    fn state_with(frame: Frame, bytes: &[u8]) -> GameStateBlob {
        let mut s = GameStateBlob {
            frame,
            ..GameStateBlob::default()
        };
        s.set_bytes(bytes);
        s
    }

    #[test]
    fn check_emits_nothing_for_identical_states() {
        let mut engine = DeltaEngine::new();
        engine.register(Box::new(WholeStateHandler));
        let a = state_with(1, b"same");
        let b = state_with(2, b"same");
        assert!(engine.check(&a, &b).is_empty());
    }

    #[test]
    fn apply_all_reconstructs_target_state() {
        let mut engine = DeltaEngine::new();
        engine.register(Box::new(WholeStateHandler));

        let prev = state_with(1, b"AAAA");
        let cur = state_with(2, b"BBBB");

        let deltas = engine.check(&prev, &cur);
        assert_eq!(deltas.len(), 1);

        let mut reconstructed = prev.clone();
        engine.apply_all(&mut reconstructed, &deltas);

        assert_eq!(reconstructed.as_slice(), cur.as_slice());
        assert!(engine.compare_all(&reconstructed, &deltas));
    }

    #[test]
    fn unregistered_delta_type_is_skipped_not_fatal() {
        let engine = DeltaEngine::new();
        let mut state = state_with(1, b"data");
        let delta = DeltaStateBlob::new(2, 99, b"ignored");
        engine.apply_all(&mut state, &[delta]);
        assert_eq!(state.as_slice(), b"data");
    }
}
