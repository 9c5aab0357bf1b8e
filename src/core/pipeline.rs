// src/core/pipeline.rs - Pipeline assembly and lifecycle
//
// Core features:
// - Builds ledger, worker pool, output coordinator and eviction thread from
//   one PipelineConfig; the writer runs on the coordinator thread
// - submit() is the single ingress for capture buffers
// - shutdown(): cancel, drain, join; in-flight dequeued work finishes,
//   enqueued-but-unpicked work is dropped with release hooks fired
// - restart(): shutdown + rebuild, the drain-and-restart cycle behind live
//   reconfiguration

use log::{debug, info, warn};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::core::cancel::CancellationToken;
use crate::core::config::{DestinationRole, PipelineConfig};
use crate::core::error::{Error, Result};
use crate::core::frame::RawFrame;
use crate::core::scheduler::dispatcher::EncodeDispatcher;
use crate::core::scheduler::encode_worker::{EncodeWorkerPool, ResultSlots};
use crate::encode::EncodeParams;
use crate::output::coordinator::OutputCoordinator;
use crate::output::retention::RetentionLedger;
use crate::output::writer::DestinationWriter;

/// One running capture-to-disk session.
///
/// Owns every thread it spawns. Dropping the pipeline shuts it down; calling
/// [`CapturePipeline::shutdown`] does the same thing earlier and joins.
pub struct CapturePipeline {
    cancel: CancellationToken,
    slots: Arc<ResultSlots>,
    // All torn down (in order) by shutdown; None afterwards.
    dispatcher: Option<EncodeDispatcher>,
    pool: Option<EncodeWorkerPool>,
    coordinator: Option<OutputCoordinator>,
    eviction: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    /// Spawn a session from the given configuration.
    ///
    /// Fails only when not a single destination is usable; a subset of
    /// destinations failing their startup scan is tolerated and logged.
    pub fn start(config: &PipelineConfig) -> Result<Self> {
        let ledger = Arc::new(RetentionLedger::new(&config.destinations));
        if ledger.enabled_count() == 0 {
            return Err(Error::NoUsableDestination);
        }

        let cancel = CancellationToken::new();
        let workers = config.effective_workers();
        let slots = Arc::new(ResultSlots::new(workers));
        let (tx, rx) = crossbeam_channel::bounded(config.queue_depth.max(1));

        // The preview rendition is only worth encoding when somewhere to
        // store it survived the startup scan.
        let preview_enabled = (0..ledger.destination_count()).any(|i| {
            ledger.is_enabled(i) && ledger.config(i).role == DestinationRole::Preview
        });
        let params = EncodeParams::from_config(config, preview_enabled);

        let pool = EncodeWorkerPool::spawn(rx, slots.clone(), params, cancel.clone())?;

        let mut writer = DestinationWriter::new(config, ledger.clone(), cancel.clone());
        let coordinator = OutputCoordinator::spawn(
            slots.clone(),
            config.delivery_order,
            move |result| writer.write_result(result),
            cancel.clone(),
        )?;

        let eviction = ledger.spawn_eviction_thread(cancel.clone())?;

        info!(
            "pipeline started: {workers} workers, {} of {} destinations usable",
            ledger.enabled_count(),
            ledger.destination_count()
        );
        Ok(Self {
            cancel,
            slots,
            dispatcher: Some(EncodeDispatcher::new(tx)),
            pool: Some(pool),
            coordinator: Some(coordinator),
            eviction: Some(eviction),
        })
    }

    /// Hand one capture buffer to the encode stage. See
    /// [`EncodeDispatcher::submit`] for the overload behavior.
    pub fn submit(&mut self, frame: RawFrame) {
        match self.dispatcher.as_mut() {
            Some(dispatcher) => dispatcher.submit(frame),
            // Frame dropped here; its release hook fires.
            None => warn!("submit after shutdown, dropping frame"),
        }
    }

    /// Frames accepted into the pipeline so far this session.
    pub fn submitted(&self) -> u64 {
        self.dispatcher.as_ref().map_or(0, |d| d.submitted())
    }

    /// Stop the session and join every thread. Idempotent.
    ///
    /// Work a worker has already dequeued finishes and is delivered;
    /// enqueued-but-unpicked frames and undelivered results are dropped,
    /// firing their release hooks.
    pub fn shutdown(&mut self) {
        if self.dispatcher.is_none() && self.pool.is_none() {
            return;
        }
        debug!("pipeline shutting down");
        self.cancel.cancel();
        // Dropping the sender disconnects the work queue.
        self.dispatcher = None;
        if let Some(pool) = self.pool.take() {
            pool.join();
        }
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.join();
        }
        if let Some(eviction) = self.eviction.take() {
            if eviction.join().is_err() {
                warn!("eviction thread panicked");
            }
        }
        self.slots.clear();
        info!("pipeline stopped");
    }

    /// Drain-and-restart with a new configuration. The old session is fully
    /// joined before the new one spawns.
    pub fn restart(&mut self, config: &PipelineConfig) -> Result<()> {
        self.shutdown();
        *self = CapturePipeline::start(config)?;
        Ok(())
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DestinationConfig;
    use crate::core::frame::planar_size;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn config_for(root: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.workers = 2;
        config
            .destinations
            .push(DestinationConfig::new(DestinationRole::Primary, root));
        config
    }

    fn frame(i: u64) -> RawFrame {
        let mut data = vec![0u8; planar_size(64, 48)];
        for (n, b) in data.iter_mut().enumerate() {
            *b = (n % 251) as u8;
        }
        RawFrame::new(data, 64, 48, 64, i as i64 * 33_333)
    }

    fn capture_files(root: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("cap_"))
            .collect();
        names.sort();
        names
    }

    fn wait_for_files(root: &Path, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(20);
        while capture_files(root).len() < count && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_start_requires_a_usable_destination() {
        let config = PipelineConfig::default();
        assert!(matches!(
            CapturePipeline::start(&config),
            Err(Error::NoUsableDestination)
        ));

        let mut config = PipelineConfig::default();
        config.destinations.push(DestinationConfig::new(
            DestinationRole::Primary,
            "/nonexistent/framestore",
        ));
        assert!(CapturePipeline::start(&config).is_err());
    }

    #[test]
    fn test_end_to_end_frames_land_on_disk() {
        init_logs();
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = CapturePipeline::start(&config_for(dir.path())).unwrap();

        for i in 0..4 {
            pipeline.submit(frame(i));
        }
        assert_eq!(pipeline.submitted(), 4);
        wait_for_files(dir.path(), 4);
        pipeline.shutdown();

        let names = capture_files(dir.path());
        assert_eq!(names.len(), 4);
        // Distinct capture timestamps give distinct, sorted names.
        for pair in names.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        // The latest pointer names the newest file.
        let pointer = std::fs::read_to_string(dir.path().join("latest.txt")).unwrap();
        assert!(pointer.ends_with(names.last().unwrap()));
    }

    #[test]
    fn test_rejected_frame_does_not_stall_strict_delivery() {
        init_logs();
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path());
        config.workers = 1;
        let mut pipeline = CapturePipeline::start(&config).unwrap();

        // Zero-width frame consumes seq 0 and fails in the worker; the
        // frames behind it must still reach the disk.
        pipeline.submit(RawFrame::new(vec![0u8; 64], 0, 48, 64, 0));
        for i in 1..4 {
            pipeline.submit(frame(i));
        }
        wait_for_files(dir.path(), 3);
        pipeline.shutdown();

        assert_eq!(capture_files(dir.path()).len(), 3);
    }

    #[test]
    fn test_shutdown_fires_all_release_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = CapturePipeline::start(&config_for(dir.path())).unwrap();

        let released = Arc::new(AtomicUsize::new(0));
        for i in 0..6 {
            let hook_released = released.clone();
            pipeline.submit(frame(i).with_release_hook(Arc::new(move || {
                hook_released.fetch_add(1, Ordering::SeqCst);
            })));
        }
        pipeline.shutdown();
        // Delivered or dropped, every buffer goes back to the capture source.
        assert_eq!(released.load(Ordering::SeqCst), 6);

        // And submit after shutdown releases immediately.
        let hook_released = released.clone();
        pipeline.submit(frame(6).with_release_hook(Arc::new(move || {
            hook_released.fetch_add(1, Ordering::SeqCst);
        })));
        assert_eq!(released.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_restart_with_new_configuration() {
        init_logs();
        let dir = tempfile::tempdir().unwrap();
        let dir2 = tempfile::tempdir().unwrap();
        let mut pipeline = CapturePipeline::start(&config_for(dir.path())).unwrap();
        pipeline.submit(frame(0));
        wait_for_files(dir.path(), 1);

        let mut new_config = config_for(dir2.path());
        new_config.prefix = "cap_".to_string();
        pipeline.restart(&new_config).unwrap();
        // Sequence numbering starts over with the new session.
        assert_eq!(pipeline.submitted(), 0);
        pipeline.submit(frame(0));
        wait_for_files(dir2.path(), 1);
        pipeline.shutdown();

        assert_eq!(capture_files(dir.path()).len(), 1);
        assert_eq!(capture_files(dir2.path()).len(), 1);
    }
}
