//! Ordered per-frame bag of game-logic events. Events emitted during the
//! simulation of frame `f` are always scheduled for delivery at `f+1`,
//! giving every peer the same one-frame delivery window before an event
//! can affect visible state.
//!
//! Carries no reliability or ack bookkeeping of its own; `EVENT_UPDATE`
//! packets handle delivery at the wire layer, so this queue only tracks
//! what's scheduled and when it's due.

use std::collections::HashMap;

use crate::types::{Frame, GameEventBlob};

#[derive(Default)]
pub struct EventQueue {
    pending: HashMap<Frame, Vec<GameEventBlob>>,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue::default()
    }

    /// Schedules `event` for delivery at `frame`. Callers stamp the frame
    /// themselves (simulation core: `f+1`; client replay: the frame carried
    /// by `EVENT_UPDATE`).
    pub fn schedule(&mut self, frame: Frame, event: GameEventBlob) {
        self.pending.entry(frame).or_default().push(event);
    }

    /// Removes and returns every event scheduled for `frame`.
    pub fn drain(&mut self, frame: Frame) -> Vec<GameEventBlob> {
        self.pending.remove(&frame).unwrap_or_default()
    }

    /// Non-destructively inspects events scheduled for `frame`, e.g. for a
    /// fanout step that needs to read before clearing on tick boundary.
    pub fn peek(&self, frame: Frame) -> &[GameEventBlob] {
        self.pending.get(&frame).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Drops every pending entry older than `keep_from`, mirroring the
    /// snapshot ring's prune policy so the queue cannot grow unbounded if a
    /// scheduled frame is never drained (e.g. a peer disconnects first).
    pub fn prune_before(&mut self, keep_from: Frame) {
        self.pending.retain(|&frame, _| frame >= keep_from);
    }

    pub fn len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-type handler a `GameLogic` implementation can use to dispatch opaque
/// events into its own simulation world, mirroring the registration shape
/// of [`crate::delta::DeltaHandler`].
pub trait EventHandler: Send {
    fn event_type(&self) -> u32;
    fn apply(&self, event: &GameEventBlob, state: &mut crate::types::GameStateBlob);
}

/// Optional reusable dispatcher: a `GameLogic` implementation may compose
/// one of these internally rather than hand-rolling a match over event
/// types in `simulate_frame`.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<u32, Box<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        EventDispatcher::default()
    }

    pub fn register(&mut self, handler: Box<dyn EventHandler>) {
        self.handlers.insert(handler.event_type(), handler);
    }

    pub fn dispatch(&self, events: &[GameEventBlob], state: &mut crate::types::GameStateBlob) {
        for event in events {
            match self.handlers.get(&event.event_type) {
                Some(handler) => handler.apply(event, state),
                None => log::warn!("no event handler registered for type {}", event.event_type),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_removes_only_the_requested_frame() {
        let mut queue = EventQueue::new();
        queue.schedule(51, GameEventBlob::new(1, b"a"));
        queue.schedule(52, GameEventBlob::new(2, b"b"));

        let at_51 = queue.drain(51);
        assert_eq!(at_51.len(), 1);
        assert_eq!(at_51[0].as_slice(), b"a");
        assert!(queue.drain(51).is_empty());
        assert_eq!(queue.peek(52).len(), 1);
    }

    #[test]
    fn prune_before_drops_old_frames_only() {
        let mut queue = EventQueue::new();
        queue.schedule(10, GameEventBlob::new(1, b"old"));
        queue.schedule(20, GameEventBlob::new(1, b"new"));
        queue.prune_before(15);
        assert!(queue.peek(10).is_empty());
        assert_eq!(queue.peek(20).len(), 1);
    }

    struct CounterHandler;
    impl EventHandler for CounterHandler {
        fn event_type(&self) -> u32 {
            7
        }
        fn apply(&self, event: &GameEventBlob, state: &mut crate::types::GameStateBlob) {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(event.as_slice());
            let add = i32::from_be_bytes(bytes);
            let mut cur = [0u8; 4];
            cur.copy_from_slice(&state.data[..4]);
            let total = i32::from_be_bytes(cur) + add;
            state.data[..4].copy_from_slice(&total.to_be_bytes());
            state.len = state.len.max(4);
        }
    }

    #[test]
    fn dispatcher_routes_events_by_type() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(Box::new(CounterHandler));
        let mut state = crate::types::GameStateBlob::default();
        dispatcher.dispatch(&[GameEventBlob::new(7, &5i32.to_be_bytes())], &mut state);
        dispatcher.dispatch(&[GameEventBlob::new(7, &3i32.to_be_bytes())], &mut state);
        let mut cur = [0u8; 4];
        cur.copy_from_slice(&state.data[..4]);
        assert_eq!(i32::from_be_bytes(cur), 8);
    }
}
