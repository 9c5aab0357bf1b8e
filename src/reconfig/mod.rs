//! Live reconfiguration.
//!
//! The appliance's control plane delivers configuration changes as JSON
//! payloads (the transport that carries them is the embedding binary's
//! concern). [`ReconfigurationGate`] parses each payload into typed partial
//! update structs, merges every field that is present into the held
//! [`PipelineConfig`], and raises a restart-requested flag the pipeline
//! owner consumes with [`ReconfigurationGate::take_restart_request`].
//!
//! A payload that fails to parse changes nothing and raises nothing.

use log::{debug, error, info, warn};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::core::config::{DestinationRole, PipelineConfig, Rotation};
use crate::core::error::Error;

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------
// Event schema
// ---------------------------------------------------
//
// Every field is optional: an event carries only the settings it changes.

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReconfigEvent {
    recording: Option<RecordingSection>,
    camera: Option<CameraSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordingSection {
    connection: Option<ConnectionSection>,
    directory: Option<DirectorySection>,
}

/// Transport settings for the control socket. Parsed for schema
/// completeness; the embedding binary owns the socket, so the pipeline only
/// notes their presence.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionSection {
    socket: Option<String>,
    socket_type: Option<String>,
    listen: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectorySection {
    prefix: Option<String>,
    write_tmp: Option<bool>,
    output: Option<PathBuf>,
    output2: Option<PathBuf>,
    minfreespace: Option<u64>,
    maxusedspace: Option<u64>,
    minfreespace2: Option<u64>,
    maxusedspace2: Option<u64>,
    downsample_dir: Option<PathBuf>,
    downsample_factor: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CameraSection {
    encoding: Option<EncodingSection>,
    color_balance: Option<ColorBalanceSection>,
    exposure: Option<ExposureSection>,
    adjustment: Option<AdjustmentSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncodingSection {
    fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    quality: Option<u8>,
    denoise: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColorBalanceSection {
    awb: Option<String>,
    awb_gains: Option<[f32; 2]>,
    brightness: Option<f32>,
    contrast: Option<f32>,
    saturation: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExposureSection {
    exposure: Option<String>,
    ev: Option<f32>,
    fixed_gain: Option<f32>,
    metering: Option<String>,
    sharpness: Option<f32>,
    shutter: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdjustmentSection {
    /// Degrees; only multiples of 90 are applicable.
    rotation: Option<u32>,
    hflip: Option<bool>,
    vflip: Option<bool>,
}

// ---------------------------------------------------
// Gate
// ---------------------------------------------------

/// Holds the session configuration and absorbs reconfiguration events.
///
/// The pipeline never reads this mid-session: workers run on a snapshot.
/// Changes take effect when the owner observes the restart flag, drains the
/// pipeline, and rebuilds it from [`ReconfigurationGate::current`].
pub struct ReconfigurationGate {
    config: Mutex<PipelineConfig>,
    restart: AtomicBool,
}

impl ReconfigurationGate {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Mutex::new(config),
            restart: AtomicBool::new(false),
        }
    }

    /// Merge one JSON event payload. Returns whether anything was applied.
    ///
    /// A payload that does not parse is logged and ignored; the held config
    /// and the restart flag are untouched.
    pub fn apply_event(&self, payload: &[u8]) -> bool {
        let event: ReconfigEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                error!("{}", Error::Reconfig(e));
                return false;
            }
        };
        if event.recording.is_none() && event.camera.is_none() {
            debug!("reconfiguration payload carried no recognized section");
            return false;
        }

        {
            let mut config = lock_ignore_poison(&self.config);
            if let Some(recording) = &event.recording {
                merge_recording(&mut config, recording);
            }
            if let Some(camera) = &event.camera {
                merge_camera(&mut config, camera);
            }
        }
        self.restart.store(true, Ordering::Release);
        info!("reconfiguration applied, restart requested");
        true
    }

    /// Consume the restart-requested flag.
    pub fn take_restart_request(&self) -> bool {
        self.restart.swap(false, Ordering::AcqRel)
    }

    /// Snapshot of the merged configuration.
    pub fn current(&self) -> PipelineConfig {
        lock_ignore_poison(&self.config).clone()
    }
}

fn merge_recording(config: &mut PipelineConfig, section: &RecordingSection) {
    if let Some(connection) = &section.connection {
        // The control socket belongs to the embedding binary.
        debug!("connection settings noted (handled outside the pipeline): {connection:?}");
    }
    let Some(dir) = &section.directory else {
        return;
    };

    if let Some(prefix) = &dir.prefix {
        config.prefix = prefix.clone();
    }
    if let Some(write_tmp) = dir.write_tmp {
        config.write_tmp = write_tmp;
    }
    if let Some(output) = &dir.output {
        config.set_destination_root(DestinationRole::Primary, output.clone());
    }
    if let Some(output2) = &dir.output2 {
        config.set_destination_root(DestinationRole::Secondary, output2.clone());
    }
    if let Some(downsample_dir) = &dir.downsample_dir {
        config.set_destination_root(DestinationRole::Preview, downsample_dir.clone());
    }
    if let Some(dest) = config.destination_mut(DestinationRole::Primary) {
        if let Some(floor) = dir.minfreespace {
            dest.min_free_bytes = floor;
        }
        if let Some(cap) = dir.maxusedspace {
            dest.max_used_bytes = cap;
        }
    }
    if let Some(dest) = config.destination_mut(DestinationRole::Secondary) {
        if let Some(floor) = dir.minfreespace2 {
            dest.min_free_bytes = floor;
        }
        if let Some(cap) = dir.maxusedspace2 {
            dest.max_used_bytes = cap;
        }
    }
    if let Some(factor) = dir.downsample_factor {
        if factor == 0 {
            warn!("downsampleFactor 0 ignored");
        } else {
            config.downsample_factor = factor;
        }
    }
}

fn merge_camera(config: &mut PipelineConfig, section: &CameraSection) {
    if let Some(encoding) = &section.encoding {
        if let Some(quality) = encoding.quality {
            config.quality = quality.clamp(1, 100);
        }
        config.camera.fps = encoding.fps.or(config.camera.fps);
        config.camera.width = encoding.width.or(config.camera.width);
        config.camera.height = encoding.height.or(config.camera.height);
        config.camera.denoise = encoding.denoise.clone().or(config.camera.denoise.take());
    }
    if let Some(balance) = &section.color_balance {
        config.camera.awb = balance.awb.clone().or(config.camera.awb.take());
        config.camera.awb_gains = balance.awb_gains.or(config.camera.awb_gains);
        config.camera.brightness = balance.brightness.or(config.camera.brightness);
        config.camera.contrast = balance.contrast.or(config.camera.contrast);
        config.camera.saturation = balance.saturation.or(config.camera.saturation);
    }
    if let Some(exposure) = &section.exposure {
        config.camera.exposure = exposure.exposure.clone().or(config.camera.exposure.take());
        config.camera.ev = exposure.ev.or(config.camera.ev);
        config.camera.fixed_gain = exposure.fixed_gain.or(config.camera.fixed_gain);
        config.camera.metering = exposure.metering.clone().or(config.camera.metering.take());
        config.camera.sharpness = exposure.sharpness.or(config.camera.sharpness);
        config.camera.shutter_us = exposure.shutter.or(config.camera.shutter_us);
    }
    if let Some(adjustment) = &section.adjustment {
        if let Some(deg) = adjustment.rotation {
            match Rotation::from_degrees(deg) {
                Some(rotation) => config.rotation = rotation,
                None => warn!("rotation {deg} is not a multiple of 90, ignored"),
            }
        }
        if let Some(hflip) = adjustment.hflip {
            config.hflip = hflip;
        }
        if let Some(vflip) = adjustment.vflip {
            config.vflip = vflip;
        }
    }
}
