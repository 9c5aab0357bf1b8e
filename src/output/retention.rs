// src/output/retention.rs - Per-destination capacity accounting and eviction
//
// Core features:
// - Startup accounting: scan each destination directory, sum existing file
//   sizes, seed an oldest-first record heap keyed by modification time
// - canWrite/admit contract consulted by the writer before every write
// - Background eviction thread deletes the single oldest tracked file until
//   the destination is back under budget
// - Space-freed condvar wakes writers blocked on disk pressure
// - No ledger lock is ever held across file I/O

use log::{debug, error, info, warn};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use crate::core::cancel::CancellationToken;
use crate::core::config::DestinationConfig;
use crate::core::error::Result;

/// Pause between eviction passes.
const EVICTION_INTERVAL: Duration = Duration::from_millis(500);

/// Safety cap on files removed from one destination in a single pass,
/// mirroring the appliance's bounded delete loop.
const MAX_EVICTIONS_PER_PASS: usize = 64;

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// One tracked file, ordered by modification time (ties broken by path so
/// the ordering is total).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct FileRecord {
    mtime: SystemTime,
    path: PathBuf,
    size: u64,
}

#[derive(Debug, Default)]
struct DestState {
    used_bytes: u64,
    files: BinaryHeap<Reverse<FileRecord>>,
}

struct DestEntry {
    config: DestinationConfig,
    /// Set at startup only; a missing directory disables the destination
    /// for the whole session.
    enabled: bool,
    state: Mutex<DestState>,
}

/// Free bytes available to unprivileged writers on the filesystem backing
/// `path`, or `None` if the probe fails (e.g. the mount vanished).
#[cfg(unix)]
fn available_bytes(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is a valid NUL-terminated string and stat is a valid
    // out-pointer for the duration of the call.
    if unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) } == 0 {
        Some(stat.f_bavail as u64 * stat.f_frsize as u64)
    } else {
        None
    }
}

#[cfg(not(unix))]
fn available_bytes(_path: &Path) -> Option<u64> {
    None
}

/// Per-destination accounting of used bytes and known files.
///
/// The tally is seeded from a directory scan at construction, which keeps
/// quota enforcement correct across process restarts without an index file.
/// It may transiently exceed the budget between `admit` and the next
/// eviction pass, and converges within one pass.
pub struct RetentionLedger {
    dests: Vec<DestEntry>,
    space_epoch: Mutex<u64>,
    space_cond: Condvar,
}

impl RetentionLedger {
    /// Scan every configured destination and seed the accounting.
    pub fn new(configs: &[DestinationConfig]) -> Self {
        let dests = configs
            .iter()
            .map(|config| {
                let mut state = DestState::default();
                let enabled = match &config.root {
                    None => false,
                    Some(root) => match seed_from_directory(root, &mut state) {
                        Ok(()) => {
                            info!(
                                "destination {:?} ({:?}): tracking {} files, {} bytes used",
                                root,
                                config.role,
                                state.files.len(),
                                state.used_bytes
                            );
                            true
                        }
                        Err(e) => {
                            warn!(
                                "error scanning directory {:?}: {e}; not using it",
                                root
                            );
                            false
                        }
                    },
                };
                DestEntry {
                    config: config.clone(),
                    enabled,
                    state: Mutex::new(state),
                }
            })
            .collect();

        Self {
            dests,
            space_epoch: Mutex::new(0),
            space_cond: Condvar::new(),
        }
    }

    pub fn destination_count(&self) -> usize {
        self.dests.len()
    }

    pub fn enabled_count(&self) -> usize {
        self.dests.iter().filter(|d| d.enabled).count()
    }

    pub fn is_enabled(&self, index: usize) -> bool {
        self.dests.get(index).is_some_and(|d| d.enabled)
    }

    pub fn config(&self, index: usize) -> &DestinationConfig {
        &self.dests[index].config
    }

    /// Whether a write is currently admissible: tally within the used-space
    /// budget and the live filesystem free space above the floor. A failed
    /// free-space probe counts as no free space when a floor is configured.
    pub fn can_write(&self, index: usize) -> bool {
        let dest = &self.dests[index];
        if !dest.enabled {
            return false;
        }

        // Probe the filesystem before taking the ledger lock.
        let free_ok = match (dest.config.min_free_bytes, &dest.config.root) {
            (0, _) | (_, None) => true,
            (floor, Some(root)) => match available_bytes(root) {
                Some(avail) => avail >= floor,
                None => false,
            },
        };
        if !free_ok {
            return false;
        }

        let state = lock_ignore_poison(&dest.state);
        dest.config.max_used_bytes == 0 || state.used_bytes <= dest.config.max_used_bytes
    }

    /// Record a newly written file. Never counts the same path twice per
    /// write because the writer generates unique names.
    pub fn admit(&self, index: usize, path: PathBuf, size: u64) {
        let mut state = lock_ignore_poison(&self.dests[index].state);
        state.used_bytes += size;
        state.files.push(Reverse(FileRecord {
            mtime: SystemTime::now(),
            path,
            size,
        }));
        debug!(
            "destination {index}: admitted {size} bytes, tally {}",
            state.used_bytes
        );
    }

    /// Bytes currently attributed to tracked files.
    pub fn used_bytes(&self, index: usize) -> u64 {
        lock_ignore_poison(&self.dests[index].state).used_bytes
    }

    #[cfg(test)]
    pub fn tracked_files(&self, index: usize) -> usize {
        lock_ignore_poison(&self.dests[index].state).files.len()
    }

    /// Delete the single oldest tracked file. Returns false when there is
    /// nothing left to evict. The ledger lock is dropped across the unlink.
    fn evict_oldest(&self, index: usize) -> bool {
        let record = {
            let mut state = lock_ignore_poison(&self.dests[index].state);
            match state.files.pop() {
                Some(Reverse(record)) => record,
                None => return false,
            }
        };

        // The record leaves the tally either way: the tally is the sum of
        // tracked file sizes, and a file that is already gone (or that we
        // cannot delete) is no longer tracked.
        let removed = std::fs::remove_file(&record.path);
        let mut state = lock_ignore_poison(&self.dests[index].state);
        state.used_bytes = state.used_bytes.saturating_sub(record.size);
        match removed {
            Ok(()) => info!(
                "destination {index}: evicted {:?} ({} bytes), tally {}",
                record.path, record.size, state.used_bytes
            ),
            Err(e) => error!(
                "destination {index}: error deleting {:?} ({} bytes dropped from tally): {e}",
                record.path, record.size
            ),
        }
        true
    }

    /// One eviction pass over every enabled destination.
    pub fn run_eviction_pass(&self, cancel: &CancellationToken) {
        for index in 0..self.dests.len() {
            if cancel.is_cancelled() {
                return;
            }
            if !self.dests[index].enabled {
                continue;
            }
            let mut evicted = false;
            let mut removed = 0;
            while !self.can_write(index) && removed < MAX_EVICTIONS_PER_PASS {
                if !self.evict_oldest(index) {
                    break;
                }
                evicted = true;
                removed += 1;
            }
            if evicted {
                self.notify_space_freed();
            }
            std::thread::yield_now();
        }
    }

    fn notify_space_freed(&self) {
        *lock_ignore_poison(&self.space_epoch) += 1;
        self.space_cond.notify_all();
    }

    /// Block until an eviction frees space somewhere (or the timeout
    /// elapses). Callers re-check `can_write` themselves.
    pub fn wait_space_freed(&self, timeout: Duration) {
        let epoch = lock_ignore_poison(&self.space_epoch);
        let seen = *epoch;
        let _unused = self
            .space_cond
            .wait_timeout_while(epoch, timeout, |e| *e == seen)
            .unwrap_or_else(|e| e.into_inner());
    }

    /// Spawn the background eviction thread.
    pub fn spawn_eviction_thread(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let ledger = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("retention".to_string())
            .spawn(move || {
                debug!("retention: eviction thread started");
                loop {
                    ledger.run_eviction_pass(&cancel);
                    if cancel.sleep_interruptibly(EVICTION_INTERVAL) {
                        break;
                    }
                }
                debug!("retention: eviction thread exiting");
            })?;
        Ok(handle)
    }
}

/// Enumerate regular files already present and seed the tally and heap.
fn seed_from_directory(root: &Path, state: &mut DestState) -> std::io::Result<()> {
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let size = meta.len();
        debug!(
            "marking {:?} size {} mtime {:?}",
            entry.path(),
            size,
            mtime
        );
        state.used_bytes += size;
        state.files.push(Reverse(FileRecord {
            mtime,
            path: entry.path(),
            size,
        }));
    }
    Ok(())
}
