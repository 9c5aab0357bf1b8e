// src/core/scheduler/dispatcher.rs - Frame submission and sequence stamping
//
// Core features:
// - Monotonic, gap-free sequence numbers assigned under a single dispatcher
// - Bounded work queue; a queue that cannot accept work makes submit a
//   logged no-op and the frame's buffer is released by RAII

use crossbeam_channel::{Sender, TrySendError};
use log::{debug, warn};

use crate::core::frame::RawFrame;

/// Accepts raw frames from the capture source and enqueues encode work.
///
/// One dispatcher exists per pipeline session and it is single-producer:
/// `submit` takes `&mut self`, which is what guarantees that no two frames
/// ever share a sequence number and that dropped frames leave no gap.
pub struct EncodeDispatcher {
    tx: Sender<RawFrame>,
    next_seq: u64,
}

impl EncodeDispatcher {
    pub(crate) fn new(tx: Sender<RawFrame>) -> Self {
        Self { tx, next_seq: 0 }
    }

    /// Stamp the next sequence number and enqueue the frame.
    ///
    /// A full queue (workers behind) or a disconnected queue (shutdown in
    /// progress) drops the frame: the release hook fires as the frame goes
    /// out of scope, and the sequence number is not consumed.
    pub fn submit(&mut self, mut frame: RawFrame) {
        frame.seq = self.next_seq;
        match self.tx.try_send(frame) {
            Ok(()) => {
                debug!("dispatched frame seq={}", self.next_seq);
                self.next_seq += 1;
            }
            Err(TrySendError::Full(frame)) => {
                warn!(
                    "encode queue full, dropping frame (would-be seq={})",
                    frame.seq()
                );
            }
            Err(TrySendError::Disconnected(frame)) => {
                debug!(
                    "encode queue closed, dropping frame (would-be seq={})",
                    frame.seq()
                );
            }
        }
    }

    /// Number of frames successfully enqueued this session.
    pub fn submitted(&self) -> u64 {
        self.next_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::planar_size;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn frame() -> RawFrame {
        RawFrame::new(vec![0u8; planar_size(16, 16)], 16, 16, 16, 0)
    }

    #[test]
    fn test_sequence_numbers_are_gap_free() {
        let (tx, rx) = crossbeam_channel::bounded(8);
        let mut dispatcher = EncodeDispatcher::new(tx);
        for _ in 0..5 {
            dispatcher.submit(frame());
        }
        assert_eq!(dispatcher.submitted(), 5);
        let seqs: Vec<u64> = rx.try_iter().map(|f| f.seq()).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_full_queue_drops_without_consuming_seq() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut dispatcher = EncodeDispatcher::new(tx);
        dispatcher.submit(frame());
        dispatcher.submit(frame()); // queue full, dropped
        assert_eq!(dispatcher.submitted(), 1);

        // Drain and submit again: the next accepted frame continues at 1.
        let first = rx.recv().unwrap();
        assert_eq!(first.seq(), 0);
        dispatcher.submit(frame());
        assert_eq!(rx.recv().unwrap().seq(), 1);
    }

    #[test]
    fn test_shutdown_queue_is_a_noop_and_releases_frame() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        drop(rx);
        let released = Arc::new(AtomicUsize::new(0));
        let hook_released = released.clone();
        let mut dispatcher = EncodeDispatcher::new(tx);
        dispatcher.submit(frame().with_release_hook(Arc::new(move || {
            hook_released.fetch_add(1, Ordering::SeqCst);
        })));
        assert_eq!(dispatcher.submitted(), 0);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
