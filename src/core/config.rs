// src/core/config.rs - Pipeline configuration
//
// Core features:
// - Destination roles: primary, gated secondary (removable media), preview
// - Geometric transform and encode parameters for the worker pool
// - Camera tuning pass-through fields merged by live reconfiguration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of encode worker threads. The legacy appliance hardcoded
/// four; here it is a runtime default, clamped to the available cores.
pub const DEFAULT_WORKERS: usize = 4;

/// Default work-queue depth (frames buffered between dispatcher and workers).
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

/// Default JPEG quality.
pub const DEFAULT_QUALITY: u8 = 90;

/// Default preview downsample factor.
pub const DEFAULT_DOWNSAMPLE: u32 = 4;

/// How often the secondary destination's gate sentinel is re-checked.
pub const DEFAULT_GATE_POLL: Duration = Duration::from_secs(5);

/// Delivery ordering contract between workers and the writer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryOrder {
    /// Results reach the writer in exact capture order across all workers.
    #[default]
    Strict,
    /// Results are delivered as soon as any worker finishes; only each
    /// worker's internal order is preserved. Higher throughput, explicit
    /// opt-in.
    PerWorker,
}

/// What a destination stores and how the writer treats it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DestinationRole {
    /// Full-resolution stills; also owns the latest-pointer file.
    Primary,
    /// Full-resolution stills on removable media, gated on a sentinel file.
    Secondary,
    /// Downsampled preview stills.
    Preview,
}

/// One configured storage target with its capacity budget.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub role: DestinationRole,
    /// Filesystem root. `None` (or a path that does not exist at startup)
    /// disables the destination for the whole session.
    pub root: Option<PathBuf>,
    /// Minimum free space on the backing filesystem, bytes. 0 = unlimited.
    #[serde(default)]
    pub min_free_bytes: u64,
    /// Maximum bytes attributed to tracked files. 0 = unlimited.
    #[serde(default)]
    pub max_used_bytes: u64,
}

impl DestinationConfig {
    pub fn new(role: DestinationRole, root: impl Into<PathBuf>) -> Self {
        Self {
            role,
            root: Some(root.into()),
            min_free_bytes: 0,
            max_used_bytes: 0,
        }
    }

    pub fn disabled(role: DestinationRole) -> Self {
        Self {
            role,
            root: None,
            min_free_bytes: 0,
            max_used_bytes: 0,
        }
    }
}

/// Crop region on the luma plane, in pixels. Offsets and sizes are rounded
/// to even values before use so 4:2:0 chroma sampling stays valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Rotation applied after the optional crop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    R90,
    R180,
    R270,
}

impl Rotation {
    /// Map a degree value from a reconfiguration event. Only multiples of
    /// 90 are representable.
    pub fn from_degrees(deg: u32) -> Option<Self> {
        match deg % 360 {
            0 => Some(Rotation::None),
            90 => Some(Rotation::R90),
            180 => Some(Rotation::R180),
            270 => Some(Rotation::R270),
            _ => None,
        }
    }
}

/// Camera tuning passed through to the capture collaborator. The pipeline
/// itself never interprets these; live reconfiguration merges them and the
/// restart hands them back to the capture source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraTuning {
    pub fps: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub denoise: Option<String>,
    pub awb: Option<String>,
    pub awb_gains: Option<[f32; 2]>,
    pub brightness: Option<f32>,
    pub contrast: Option<f32>,
    pub saturation: Option<f32>,
    pub exposure: Option<String>,
    pub ev: Option<f32>,
    pub fixed_gain: Option<f32>,
    pub metering: Option<String>,
    pub sharpness: Option<f32>,
    pub shutter_us: Option<u64>,
}

/// Full configuration for one pipeline session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Encode worker thread count; clamped to `[1, available cores]`.
    pub workers: usize,
    pub queue_depth: usize,
    pub delivery_order: DeliveryOrder,
    pub quality: u8,
    /// File name prefix for every written still.
    pub prefix: String,
    pub extension: String,
    /// Write through a `.tmp` file and rename, so readers polling the
    /// directory never observe a partial file.
    pub write_tmp: bool,
    pub crop: Option<CropRegion>,
    pub rotation: Rotation,
    pub hflip: bool,
    pub vflip: bool,
    /// Preview downsample factor; the preview rendition is produced only
    /// when a preview destination is enabled.
    pub downsample_factor: u32,
    /// Attach the EXIF-like auxiliary block to each result.
    pub attach_metadata: bool,
    pub destinations: Vec<DestinationConfig>,
    /// Sentinel file whose existence un-gates the secondary destination.
    /// Defaults to `.mounted` under the secondary root.
    pub gate_sentinel: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "duration_is_default")]
    #[serde(with = "duration_secs")]
    pub gate_poll: Duration,
    pub camera: CameraTuning,
}

fn duration_is_default(d: &Duration) -> bool {
    *d == DEFAULT_GATE_POLL
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            delivery_order: DeliveryOrder::Strict,
            quality: DEFAULT_QUALITY,
            prefix: "cap_".to_string(),
            extension: ".jpg".to_string(),
            write_tmp: true,
            crop: None,
            rotation: Rotation::None,
            hflip: false,
            vflip: false,
            downsample_factor: DEFAULT_DOWNSAMPLE,
            attach_metadata: true,
            destinations: Vec::new(),
            gate_sentinel: None,
            gate_poll: DEFAULT_GATE_POLL,
            camera: CameraTuning::default(),
        }
    }
}

impl PipelineConfig {
    /// Worker count clamped to something the host can actually run.
    pub fn effective_workers(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.workers.clamp(1, cores.max(1))
    }

    pub fn destination(&self, role: DestinationRole) -> Option<&DestinationConfig> {
        self.destinations.iter().find(|d| d.role == role)
    }

    pub fn destination_mut(&mut self, role: DestinationRole) -> Option<&mut DestinationConfig> {
        self.destinations.iter_mut().find(|d| d.role == role)
    }

    /// Upsert a destination root for a role, creating the entry if absent.
    pub(crate) fn set_destination_root(&mut self, role: DestinationRole, root: PathBuf) {
        match self.destination_mut(role) {
            Some(dest) => dest.root = Some(root),
            None => self.destinations.push(DestinationConfig::new(role, root)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_workers_clamped() {
        let mut config = PipelineConfig::default();
        config.workers = 0;
        assert_eq!(config.effective_workers(), 1);
        config.workers = 10_000;
        assert!(config.effective_workers() >= 1);
        assert!(config.effective_workers() <= 10_000);
    }

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(0), Some(Rotation::None));
        assert_eq!(Rotation::from_degrees(90), Some(Rotation::R90));
        assert_eq!(Rotation::from_degrees(180), Some(Rotation::R180));
        assert_eq!(Rotation::from_degrees(270), Some(Rotation::R270));
        assert_eq!(Rotation::from_degrees(450), Some(Rotation::R90));
        assert_eq!(Rotation::from_degrees(45), None);
    }

    #[test]
    fn test_destination_lookup_by_role() {
        let mut config = PipelineConfig::default();
        config
            .destinations
            .push(DestinationConfig::new(DestinationRole::Primary, "/data"));
        assert!(config.destination(DestinationRole::Primary).is_some());
        assert!(config.destination(DestinationRole::Preview).is_none());

        config.set_destination_root(DestinationRole::Preview, "/preview".into());
        assert!(config.destination(DestinationRole::Preview).is_some());
        config.set_destination_root(DestinationRole::Preview, "/preview2".into());
        assert_eq!(config.destinations.len(), 2);
    }
}
