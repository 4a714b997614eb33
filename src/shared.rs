//! Latest-result cell shared between the frame thread and the render thread.
//!
//! The frame thread publishes once per completed inference; readers take
//! snapshots on their own schedule. Classification and overlay live under one
//! lock so a snapshot never mixes two inferences. The lock is only held for a
//! copy, never across inference.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::extract::Classification;
use crate::overlay::OverlayImage;

/// Output of one successful inference.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InferenceResult {
    pub classification: Option<Classification>,
    pub overlay: Option<OverlayImage>,
}

/// Copy of the latest published result.
#[derive(Clone, Debug, Default)]
pub struct ResultSnapshot {
    pub classification: Option<Classification>,
    pub overlay: Option<OverlayImage>,
    /// Number of results published so far; 0 means nothing yet.
    pub sequence: u64,
    pub updated_at: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct LatestResult {
    state: Mutex<ResultSnapshot>,
}

impl LatestResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current result. Returns the new sequence number.
    pub fn publish(&self, result: InferenceResult) -> u64 {
        let now = Instant::now();
        let mut state = self.lock();
        state.classification = result.classification;
        state.overlay = result.overlay;
        state.sequence += 1;
        state.updated_at = Some(now);
        state.sequence
    }

    pub fn snapshot(&self) -> ResultSnapshot {
        self.lock().clone()
    }

    // The state is plain data and every write replaces it whole, so a
    // poisoned lock still guards a consistent value.
    fn lock(&self) -> MutexGuard<'_, ResultSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn result(index: usize, fill: u8) -> InferenceResult {
        InferenceResult {
            classification: Some(Classification {
                index,
                confidence: 0.5,
            }),
            overlay: OverlayImage::new(8, vec![fill; 64]),
        }
    }

    #[test]
    fn empty_until_first_publish() {
        let cell = LatestResult::new();
        let snap = cell.snapshot();
        assert_eq!(snap.sequence, 0);
        assert!(snap.classification.is_none());
        assert!(snap.overlay.is_none());
        assert!(snap.updated_at.is_none());
    }

    #[test]
    fn publish_then_snapshot_round_trips() {
        let cell = LatestResult::new();
        let published = result(3, 7);
        assert_eq!(cell.publish(published.clone()), 1);

        let snap = cell.snapshot();
        assert_eq!(snap.sequence, 1);
        assert_eq!(snap.classification, published.classification);
        assert_eq!(snap.overlay, published.overlay);
    }

    #[test]
    fn snapshot_is_independent_of_caller_buffers() {
        let cell = LatestResult::new();
        let mut local = vec![9u8; 4];
        cell.publish(InferenceResult {
            classification: None,
            overlay: OverlayImage::new(2, local.clone()),
        });
        local.fill(0);

        let mut first = cell.snapshot();
        assert_eq!(first.overlay.as_ref().map(OverlayImage::as_bytes), Some(&[9u8; 4][..]));

        first.overlay = None;
        let second = cell.snapshot();
        assert_eq!(second.overlay.map(OverlayImage::into_bytes), Some(vec![9u8; 4]));
    }

    #[test]
    fn publish_replaces_whole_result() {
        let cell = LatestResult::new();
        cell.publish(result(1, 1));
        cell.publish(InferenceResult::default());
        let snap = cell.snapshot();
        assert!(snap.classification.is_none());
        assert!(snap.overlay.is_none());
        assert_eq!(snap.sequence, 2);
    }

    #[test]
    fn concurrent_snapshots_never_tear() {
        let cell = Arc::new(LatestResult::new());
        let writer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                for i in 0..2_000usize {
                    let fill = (i % 251) as u8;
                    cell.publish(result(fill as usize, fill));
                }
            })
        };
        let readers: Vec<_> = (0..2)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    let mut last_sequence = 0;
                    for _ in 0..2_000 {
                        let snap = cell.snapshot();
                        assert!(snap.sequence >= last_sequence);
                        last_sequence = snap.sequence;
                        let (Some(class), Some(overlay)) = (snap.classification, snap.overlay)
                        else {
                            continue;
                        };
                        let bytes = overlay.as_bytes();
                        assert!(bytes.iter().all(|&b| b == bytes[0]), "torn overlay");
                        assert_eq!(class.index, bytes[0] as usize, "label and overlay disagree");
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(cell.snapshot().sequence, 2_000);
    }
}
