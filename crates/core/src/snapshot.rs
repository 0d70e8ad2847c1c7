//! Per-frame snapshot ring: a dense `Vec<Option<_>>` indexed by
//! `frame % capacity` gives O(1) lookup and insert for bounded frame
//! history, the same ring-by-modulo shape a physics tick buffer uses to
//! keep a fixed window of past states without reallocating.

use crate::types::{Frame, Snapshot};

/// Bounded ring of [`Snapshot`]s keyed by frame. The client sizes this to
/// twice its rollback window, the server to however many frames it keeps
/// for late joiners and acks.
pub struct SnapshotRing {
    slots: Vec<Option<Snapshot>>,
    capacity: usize,
}

impl SnapshotRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "snapshot ring capacity must be positive");
        SnapshotRing {
            slots: (0..capacity).map(|_| None).collect(),
            capacity,
        }
    }

    fn index(&self, frame: Frame) -> usize {
        (frame as usize) % self.capacity
    }

    /// Looks up or creates the snapshot for `frame` and invokes `f` with a
    /// mutable reference to it. Create-on-miss lets an input for a frame
    /// arrive before that frame has actually been simulated.
    pub fn with_snapshot<F, R>(&mut self, frame: Frame, f: F) -> R
    where
        F: FnOnce(&mut Snapshot) -> R,
    {
        let idx = self.index(frame);
        let is_fresh = !matches!(&self.slots[idx], Some(s) if s.frame == frame);
        if is_fresh {
            self.slots[idx] = Some(Snapshot::new(frame));
        }
        f(self.slots[idx].as_mut().expect("slot just populated"))
    }

    pub fn get(&self, frame: Frame) -> Option<&Snapshot> {
        let idx = self.index(frame);
        self.slots[idx].as_ref().filter(|s| s.frame == frame)
    }

    /// Clears every slot whose stored frame falls outside `[keep_from,
    /// keep_to]`. A ring naturally overwrites stale entries as frames wrap
    /// around, but explicit pruning also reclaims slots that were created
    /// ahead of `current` (e.g. a submitted input delayed into the future)
    /// and then fell behind the window without being revisited.
    pub fn prune_outside(&mut self, keep_from: Frame, keep_to: Frame) {
        for slot in &mut self.slots {
            if let Some(s) = slot {
                if s.frame < keep_from || s.frame > keep_to {
                    *slot = None;
                }
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_snapshot_creates_on_miss_and_reuses_on_hit() {
        let mut ring = SnapshotRing::new(8);
        ring.with_snapshot(3, |snap| snap.state.frame = 3);
        assert_eq!(ring.get(3).unwrap().state.frame, 3);

        ring.with_snapshot(3, |snap| assert_eq!(snap.frame, 3));
    }

    #[test]
    fn stale_wrapped_slot_is_treated_as_a_miss() {
        let mut ring = SnapshotRing::new(4);
        ring.with_snapshot(1, |snap| snap.state.len = 7);
        // Frame 5 maps to the same slot index as frame 1 (5 % 4 == 1).
        ring.with_snapshot(5, |snap| assert_eq!(snap.state.len, 0));
        assert!(ring.get(1).is_none());
        assert_eq!(ring.get(5).unwrap().frame, 5);
    }

    #[test]
    fn prune_outside_clears_frames_beyond_the_window() {
        let mut ring = SnapshotRing::new(16);
        for f in 0..10 {
            ring.with_snapshot(f, |_| {});
        }
        ring.prune_outside(5, 9);
        for f in 0..5 {
            assert!(ring.get(f).is_none(), "frame {f} should have been pruned");
        }
        for f in 5..10 {
            assert!(ring.get(f).is_some(), "frame {f} should be retained");
        }
    }
}
