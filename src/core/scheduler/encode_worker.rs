// src/core/scheduler/encode_worker.rs - Encode worker pool and result slots
//
// Core features:
// - Fixed set of worker threads; whichever is idle picks up the next frame
// - Bounded channel waits so every worker observes cancellation within one
//   poll interval
// - Per-worker completed-result slots (one mutex each, no cross-worker
//   contention) read by the single-consumer output coordinator
// - A failed job publishes an empty placeholder result so ordered delivery
//   never waits on a sequence number that cannot arrive
// - In-flight work finishes on shutdown; enqueued-but-unpicked work does not

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::core::cancel::CancellationToken;
use crate::core::error::Result;
use crate::core::frame::{EncodedResult, RawFrame};
use crate::encode::{encode_frame, EncodeParams};

/// How long a worker blocks on the queue before re-checking cancellation.
const WORKER_POLL: Duration = Duration::from_millis(200);

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Per-worker completed-result holding areas.
///
/// Workers only ever touch their own slot; the coordinator scans all of
/// them. Each worker's deque is in that worker's completion order, which is
/// increasing sequence order because jobs are pulled from a FIFO queue.
pub(crate) struct ResultSlots {
    slots: Vec<Mutex<VecDeque<EncodedResult>>>,
    publish_epoch: Mutex<u64>,
    publish_cond: Condvar,
}

impl ResultSlots {
    pub fn new(workers: usize) -> Self {
        Self {
            slots: (0..workers).map(|_| Mutex::new(VecDeque::new())).collect(),
            publish_epoch: Mutex::new(0),
            publish_cond: Condvar::new(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.slots.len()
    }

    /// Park a finished result in the worker's own slot and wake the
    /// coordinator.
    pub fn publish(&self, worker: usize, result: EncodedResult) {
        lock_ignore_poison(&self.slots[worker]).push_back(result);
        *lock_ignore_poison(&self.publish_epoch) += 1;
        self.publish_cond.notify_all();
    }

    /// Remove the result with exactly this sequence number, if some worker
    /// has finished it. Earlier sequences have already been consumed, so a
    /// matching result can only sit at the front of its slot.
    pub fn take_seq(&self, seq: u64) -> Option<EncodedResult> {
        for slot in &self.slots {
            let mut queue = lock_ignore_poison(slot);
            if queue.front().is_some_and(|r| r.seq == seq) {
                return queue.pop_front();
            }
        }
        None
    }

    /// Remove any available result, preserving each worker's internal order.
    pub fn take_any(&self) -> Option<EncodedResult> {
        for slot in &self.slots {
            let mut queue = lock_ignore_poison(slot);
            if let Some(result) = queue.pop_front() {
                return Some(result);
            }
        }
        None
    }

    /// Block until a worker publishes (or the timeout elapses). The bounded
    /// wait is the safety net for missed wakeups and for cancellation.
    pub fn wait_publish(&self, timeout: Duration) {
        let epoch = lock_ignore_poison(&self.publish_epoch);
        let seen = *epoch;
        let _unused = self
            .publish_cond
            .wait_timeout_while(epoch, timeout, |e| *e == seen)
            .unwrap_or_else(|e| e.into_inner());
    }

    /// Drop everything still parked (shutdown path). Release hooks fire as
    /// the results are dropped.
    pub fn clear(&self) {
        for slot in &self.slots {
            lock_ignore_poison(slot).clear();
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.slots.iter().map(|s| lock_ignore_poison(s).len()).sum()
    }
}

/// The fixed set of encode worker threads.
pub(crate) struct EncodeWorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl EncodeWorkerPool {
    /// Spawn `slots.worker_count()` workers consuming from `rx`.
    pub fn spawn(
        rx: Receiver<RawFrame>,
        slots: Arc<ResultSlots>,
        params: EncodeParams,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut handles = Vec::with_capacity(slots.worker_count());
        for id in 0..slots.worker_count() {
            let rx = rx.clone();
            let slots = slots.clone();
            let params = params.clone();
            let cancel = cancel.clone();
            let handle = std::thread::Builder::new()
                .name(format!("encoder{id}"))
                .spawn(move || worker_loop(id, rx, slots, params, cancel))?;
            handles.push(handle);
        }
        Ok(Self { handles })
    }

    /// Wait for every worker to exit. Call after cancelling.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                error!("encode worker panicked");
            }
        }
    }
}

/// Idle -> Dequeuing -> Transforming/Compressing -> Publishing -> Idle;
/// Shutting-down whenever the cancel flag is observed.
fn worker_loop(
    id: usize,
    rx: Receiver<RawFrame>,
    slots: Arc<ResultSlots>,
    params: EncodeParams,
    cancel: CancellationToken,
) {
    debug!("encoder{id}: started");
    let mut frames = 0u64;
    let mut encode_time = Duration::ZERO;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let frame = match rx.recv_timeout(WORKER_POLL) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let seq = frame.seq();
        let timestamp_us = frame.timestamp_us();
        let start = Instant::now();
        match encode_frame(frame, &params) {
            Ok(result) => {
                encode_time += start.elapsed();
                frames += 1;
                slots.publish(id, result);
            }
            // Malformed input fails fast for this job only; the frame (and
            // its buffer) is already gone. The job's sequence number was
            // consumed at submit, so an empty placeholder still has to be
            // published or strict delivery would wait on it forever.
            Err(e) => {
                error!("encoder{id}: dropping frame seq={seq}: {e}");
                slots.publish(
                    id,
                    EncodedResult {
                        seq,
                        timestamp_us,
                        renditions: vec![],
                        metadata: None,
                        source: None,
                    },
                );
            }
        }
    }

    if frames > 0 {
        debug!(
            "encoder{id}: encoded {frames} frames, average {:.2} ms",
            encode_time.as_secs_f64() * 1000.0 / frames as f64
        );
    }
    debug!("encoder{id}: exiting");
}
