// src/output/writer.rs - Durable per-destination file writes
//
// Core features:
// - Deterministic wall-clock file names from capture-relative timestamps
//   via a one-time clock offset
// - Temp-then-rename protocol: a reader polling the directory never sees a
//   partially written file under the final name
// - Disk pressure is a transient condition: block on the ledger's
//   space-freed signal and retry instead of failing the frame
// - Latest-pointer file for the primary destination
// - Sentinel-gated secondary destination, skipped silently while ungated

use log::{debug, error, info, warn};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::core::cancel::CancellationToken;
use crate::core::config::{DestinationRole, PipelineConfig};
use crate::core::error::{Error, Result};
use crate::core::frame::{EncodedResult, RenditionKind};
use crate::output::retention::RetentionLedger;

/// How long one capacity-retry wait lasts before re-checking cancellation.
const CAPACITY_RETRY_WAIT: Duration = Duration::from_millis(200);

/// Name of the latest-pointer file under the primary root.
const LATEST_POINTER_NAME: &str = "latest.txt";

/// Default gate sentinel under the secondary root.
const DEFAULT_GATE_SENTINEL: &str = ".mounted";

/// Cached sentinel check for the gated secondary destination. The sentinel
/// is probed at most once per poll interval, not on every frame.
struct SecondaryGate {
    sentinel: PathBuf,
    poll: Duration,
    last_check: Option<Instant>,
    engaged: bool,
}

impl SecondaryGate {
    fn engaged(&mut self) -> bool {
        let due = self
            .last_check
            .map_or(true, |at| at.elapsed() >= self.poll);
        if due {
            let now_engaged = self.sentinel.exists();
            if now_engaged != self.engaged {
                info!(
                    "secondary gate {}: sentinel {:?}",
                    if now_engaged { "engaged" } else { "released" },
                    self.sentinel
                );
            }
            self.engaged = now_engaged;
            self.last_check = Some(Instant::now());
        }
        self.engaged
    }
}

/// Writes encoded results to every configured destination, consulting the
/// retention ledger for admission.
pub struct DestinationWriter {
    ledger: Arc<RetentionLedger>,
    prefix: String,
    extension: String,
    write_tmp: bool,
    /// Wall-clock minus capture-clock, captured at the first frame.
    clock_offset_us: Option<i64>,
    gate: Option<SecondaryGate>,
    cancel: CancellationToken,
}

impl DestinationWriter {
    pub fn new(
        config: &PipelineConfig,
        ledger: Arc<RetentionLedger>,
        cancel: CancellationToken,
    ) -> Self {
        let gate = config
            .destination(DestinationRole::Secondary)
            .and_then(|dest| dest.root.as_ref())
            .map(|root| SecondaryGate {
                sentinel: config
                    .gate_sentinel
                    .clone()
                    .unwrap_or_else(|| root.join(DEFAULT_GATE_SENTINEL)),
                poll: config.gate_poll,
                last_check: None,
                engaged: false,
            });

        Self {
            ledger,
            prefix: config.prefix.clone(),
            extension: config.extension.clone(),
            write_tmp: config.write_tmp,
            clock_offset_us: None,
            gate,
            cancel,
        }
    }

    /// Capture-relative timestamp adjusted onto the wall clock. The offset
    /// is computed once, at the first frame, so successive frames map to
    /// strictly increasing wall-clock names.
    fn adjust_timestamp(&mut self, timestamp_us: i64) -> i64 {
        let offset = *self.clock_offset_us.get_or_insert_with(|| {
            let now_us = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_micros() as i64)
                .unwrap_or(0);
            now_us - timestamp_us
        });
        timestamp_us + offset
    }

    /// `<prefix><10-digit seconds>_<6-digit microseconds><extension>`.
    fn file_name(&self, wall_us: i64) -> String {
        let secs = wall_us.div_euclid(1_000_000);
        let micros = wall_us.rem_euclid(1_000_000);
        format!(
            "{}{:010}_{:06}{}",
            self.prefix, secs, micros, self.extension
        )
    }

    /// Deliver one result to every enabled destination. Per-destination
    /// failures are logged and isolated; only cancellation stops delivery.
    pub fn write_result(&mut self, result: &EncodedResult) {
        let wall_us = self.adjust_timestamp(result.timestamp_us);
        let name = self.file_name(wall_us);

        for index in 0..self.ledger.destination_count() {
            if !self.ledger.is_enabled(index) {
                continue;
            }
            let role = self.ledger.config(index).role;
            let kind = match role {
                DestinationRole::Primary | DestinationRole::Secondary => RenditionKind::Full,
                DestinationRole::Preview => RenditionKind::Preview,
            };
            let Some(rendition) = result.rendition(kind) else {
                continue;
            };
            if role == DestinationRole::Secondary {
                // While the gate is released the destination is skipped
                // silently; this is not an error.
                if !self.gate.as_mut().map_or(false, |g| g.engaged()) {
                    debug!("frame {}: secondary gate closed, skipping", result.seq);
                    continue;
                }
            }

            match self.write_one(index, &name, &rendition.data) {
                Ok(path) => {
                    if role == DestinationRole::Primary {
                        self.update_latest_pointer(index, &path);
                    }
                }
                Err(Error::Cancelled) => {
                    warn!(
                        "frame {}: shutdown while waiting for space on destination {index}",
                        result.seq
                    );
                    return;
                }
                Err(e) => {
                    error!(
                        "frame {}: write to destination {index} failed: {e}",
                        result.seq
                    );
                }
            }
        }
    }

    /// Write one rendition to one destination, retrying through disk
    /// pressure and recording the admission.
    fn write_one(&self, index: usize, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        // Disk pressure is transient: poll the ledger, bounded only by the
        // cancellation token.
        while !self.ledger.can_write(index) {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            debug!("destination {index}: over budget, write of {name} waiting");
            self.ledger.wait_space_freed(CAPACITY_RETRY_WAIT);
        }

        let root = self
            .ledger
            .config(index)
            .root
            .as_ref()
            .ok_or(Error::NoUsableDestination)?;
        let final_path = root.join(name);
        write_atomic(&final_path, bytes, self.write_tmp)?;
        self.ledger.admit(index, final_path.clone(), bytes.len() as u64);
        debug!(
            "destination {index}: wrote {} bytes to {:?}",
            bytes.len(),
            final_path
        );
        Ok(final_path)
    }

    /// Overwrite the primary destination's latest-pointer file with the
    /// full path of the newest capture.
    fn update_latest_pointer(&self, index: usize, newest: &Path) {
        let Some(root) = self.ledger.config(index).root.as_ref() else {
            return;
        };
        let pointer = root.join(LATEST_POINTER_NAME);
        if let Err(e) = write_atomic(&pointer, newest.to_string_lossy().as_bytes(), true) {
            warn!("error updating latest pointer {pointer:?}: {e}");
        }
    }
}

/// Write all bytes to `path`. With `via_tmp`, the bytes land in
/// `<path>.tmp` first and are renamed into place, so the final name is
/// never observable in a partially written state.
fn write_atomic(path: &Path, bytes: &[u8], via_tmp: bool) -> Result<()> {
    if via_tmp {
        let mut tmp_path = path.as_os_str().to_owned();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(bytes)?;
        }
        fs::rename(&tmp_path, path)?;
    } else {
        let mut file = fs::File::create(path)?;
        file.write_all(bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{DestinationConfig, PipelineConfig};
    use crate::core::frame::Rendition;
    use bytes::Bytes;

    fn result_with(seq: u64, timestamp_us: i64, payload: &[u8]) -> EncodedResult {
        EncodedResult {
            seq,
            timestamp_us,
            renditions: vec![
                Rendition {
                    kind: RenditionKind::Full,
                    data: Bytes::copy_from_slice(payload),
                },
                Rendition {
                    kind: RenditionKind::Preview,
                    data: Bytes::from_static(b"preview"),
                },
            ],
            metadata: None,
            source: None,
        }
    }

    fn writer_for(config: &PipelineConfig) -> DestinationWriter {
        let ledger = Arc::new(RetentionLedger::new(&config.destinations));
        DestinationWriter::new(config, ledger, CancellationToken::new())
    }

    fn primary_config(root: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config
            .destinations
            .push(DestinationConfig::new(DestinationRole::Primary, root));
        config
    }

    #[test]
    fn test_file_name_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_for(&primary_config(dir.path()));
        writer.clock_offset_us = Some(0);
        let name = writer.file_name(1_700_000_123_000_042);
        assert_eq!(name, "cap_1700000123_000042.jpg");
    }

    #[test]
    fn test_clock_offset_makes_names_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_for(&primary_config(dir.path()));
        // Capture-relative timestamps with an arbitrary epoch.
        let a = writer.adjust_timestamp(1_000);
        let b = writer.adjust_timestamp(34_333);
        let c = writer.adjust_timestamp(67_666);
        assert!(a < b && b < c);
        assert_eq!(b - a, 33_333);
        // Offset is computed once: spacing is exactly the capture spacing.
        assert_eq!(c - b, 33_333);
        // And the adjusted time is wall-clock meaningful (after 2020).
        assert!(a > 1_577_000_000_000_000);
    }

    #[test]
    fn test_write_lands_file_and_updates_latest_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer_for(&primary_config(dir.path()));
        writer.write_result(&result_with(0, 0, b"jpegdata"));

        let pointer = fs::read_to_string(dir.path().join(LATEST_POINTER_NAME)).unwrap();
        let written = PathBuf::from(pointer);
        assert_eq!(fs::read(&written).unwrap(), b"jpegdata");
        assert!(written.file_name().unwrap().to_string_lossy().ends_with(".jpg"));
        // No temp file left behind.
        assert!(!written.with_extension("jpg.tmp").exists());
    }

    #[test]
    fn test_crash_between_tmp_and_rename_leaves_no_partial_final() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("cap_0000000001_000000.jpg");

        // Simulate the crash: the temp file exists, the rename never ran.
        fs::write(dir.path().join("cap_0000000001_000000.jpg.tmp"), b"par").unwrap();
        assert!(!final_path.exists());

        // A later full write is complete under the final name.
        write_atomic(&final_path, b"complete", true).unwrap();
        assert_eq!(fs::read(&final_path).unwrap(), b"complete");
    }

    #[test]
    fn test_preview_destination_gets_preview_rendition() {
        let dir = tempfile::tempdir().unwrap();
        let preview_dir = tempfile::tempdir().unwrap();
        let mut config = primary_config(dir.path());
        config
            .destinations
            .push(DestinationConfig::new(DestinationRole::Preview, preview_dir.path()));
        let mut writer = writer_for(&config);
        writer.write_result(&result_with(0, 0, b"fullres"));

        let preview_files: Vec<_> = fs::read_dir(preview_dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(preview_files.len(), 1);
        assert_eq!(fs::read(&preview_files[0]).unwrap(), b"preview");
    }

    #[test]
    fn test_ungated_secondary_is_skipped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let secondary_dir = tempfile::tempdir().unwrap();
        let mut config = primary_config(dir.path());
        config.destinations.push(DestinationConfig::new(
            DestinationRole::Secondary,
            secondary_dir.path(),
        ));
        let mut writer = writer_for(&config);
        writer.write_result(&result_with(0, 0, b"fullres"));
        assert_eq!(fs::read_dir(secondary_dir.path()).unwrap().count(), 0);

        // Engage the gate and the next frame lands.
        fs::write(secondary_dir.path().join(DEFAULT_GATE_SENTINEL), b"").unwrap();
        writer.gate.as_mut().unwrap().last_check = None;
        writer.write_result(&result_with(1, 1_000_000, b"fullres"));
        // Sentinel plus one capture file.
        assert_eq!(fs::read_dir(secondary_dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_cancelled_capacity_wait_abandons_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = primary_config(dir.path());
        config.destinations[0].max_used_bytes = 10;
        let ledger = Arc::new(RetentionLedger::new(&config.destinations));
        // Push the ledger over budget with an untracked-on-disk admission.
        ledger.admit(0, dir.path().join("big.jpg"), 1000);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut writer = DestinationWriter::new(&config, ledger, cancel);
        writer.write_result(&result_with(0, 0, b"jpegdata"));
        // Only the ghost admission exists; nothing was written.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_io_failure_on_one_destination_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let preview_dir = tempfile::tempdir().unwrap();
        let mut config = primary_config(dir.path());
        config
            .destinations
            .push(DestinationConfig::new(DestinationRole::Preview, preview_dir.path()));
        let ledger = Arc::new(RetentionLedger::new(&config.destinations));
        let mut writer = DestinationWriter::new(&config, ledger, CancellationToken::new());

        // Remove the primary directory after the scan: its writes now fail.
        fs::remove_dir_all(dir.path()).unwrap();
        writer.write_result(&result_with(0, 0, b"fullres"));

        // The preview destination still received its file.
        assert_eq!(fs::read_dir(preview_dir.path()).unwrap().count(), 1);
    }
}
