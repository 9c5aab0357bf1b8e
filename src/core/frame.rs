// src/core/frame.rs - Frame and result ownership types
//
// Core features:
// - RawFrame: move-only, single-owner planar YUV 4:2:0 buffer handle
// - Release hook fired exactly once when the buffer leaves the pipeline,
//   so the capture source can recycle its buffer slot
// - EncodedResult: one versioned result type carrying all renditions and
//   the optional auxiliary metadata block

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use crate::core::error::{Error, Result};

/// Callback invoked when a `RawFrame`'s underlying buffer is released.
/// The capture source registers one per buffer slot to recycle it.
pub type ReleaseHook = Arc<dyn Fn() + Send + Sync>;

/// Capture-time sensor metadata that rides along with a frame. Consumed by
/// the auxiliary metadata (EXIF-like) synthesis step; all fields optional.
#[derive(Clone, Debug, Default)]
pub struct CaptureMetadata {
    pub device_make: Option<String>,
    pub device_model: Option<String>,
    /// Exposure time in microseconds.
    pub exposure_time_us: Option<u64>,
    /// Analogue sensor gain.
    pub analogue_gain: Option<f32>,
    /// Sensor-reported capture timestamp in microseconds.
    pub sensor_timestamp_us: Option<i64>,
}

/// One raw sensor buffer in planar YUV 4:2:0 layout.
///
/// Plane layout follows the capture pipeline convention: the Y plane is
/// `stride * height` bytes, immediately followed by the U and V planes at
/// half resolution in each dimension with `stride / 2` row stride.
///
/// `RawFrame` is move-only and deliberately implements neither `Clone` nor
/// any byte-exposing trait: ownership transfers explicitly at each stage
/// boundary (dispatcher → worker → coordinator) and the buffer is released
/// exactly once, when the frame is dropped at the final stage.
pub struct RawFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    stride: u32,
    timestamp_us: i64,
    pub(crate) seq: u64,
    metadata: CaptureMetadata,
    release: Option<ReleaseHook>,
}

impl RawFrame {
    /// Wrap a raw planar YUV 4:2:0 buffer.
    ///
    /// `stride` is the luma row stride in bytes; the chroma planes are
    /// assumed to use `stride / 2`. The sequence number is assigned later by
    /// the dispatcher; it is not a caller concern.
    pub fn new(data: Vec<u8>, width: u32, height: u32, stride: u32, timestamp_us: i64) -> Self {
        Self {
            data,
            width,
            height,
            stride,
            timestamp_us,
            seq: 0,
            metadata: CaptureMetadata::default(),
            release: None,
        }
    }

    pub fn with_metadata(mut self, metadata: CaptureMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach the buffer-slot recycle hook. Fired exactly once, on drop.
    pub fn with_release_hook(mut self, hook: ReleaseHook) -> Self {
        self.release = Some(hook);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn metadata(&self) -> &CaptureMetadata {
        &self.metadata
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    /// Validate that the geometry describes a real planar 4:2:0 buffer.
    ///
    /// Malformed input is a programming error in the capture layer; the
    /// worker fails fast on the job rather than risking out-of-bounds reads.
    pub fn check_geometry(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidFrame(format!(
                "zero dimension: {}x{}",
                self.width, self.height
            )));
        }
        if self.stride < self.width {
            return Err(Error::InvalidFrame(format!(
                "stride {} smaller than width {}",
                self.stride, self.width
            )));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(Error::InvalidFrame(format!(
                "odd dimensions {}x{} cannot carry 4:2:0 chroma",
                self.width, self.height
            )));
        }
        let needed = planar_size(self.stride, self.height);
        if self.data.len() < needed {
            return Err(Error::InvalidFrame(format!(
                "buffer {} bytes, geometry needs {}",
                self.data.len(),
                needed
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("seq", &self.seq)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("timestamp_us", &self.timestamp_us)
            .finish_non_exhaustive()
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        // Option::take guarantees the hook fires at most once even if drop
        // glue runs through unwinding.
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

/// Total byte size of a planar 4:2:0 buffer with the given luma stride.
pub(crate) fn planar_size(stride: u32, height: u32) -> usize {
    let luma = stride as usize * height as usize;
    let chroma = (stride as usize / 2) * (height as usize / 2);
    luma + 2 * chroma
}

/// Which compressed variant of the frame a buffer holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenditionKind {
    /// Full-resolution still.
    Full,
    /// Downsampled preview still.
    Preview,
}

/// One compressed variant of a frame.
#[derive(Clone, Debug)]
pub struct Rendition {
    pub kind: RenditionKind,
    pub data: Bytes,
}

/// Completed encode output for one frame.
///
/// Owned exclusively by the worker until handed to the coordinator. Carries
/// the consumed `RawFrame` so the coordinator can release the capture buffer
/// after delivery.
pub struct EncodedResult {
    pub seq: u64,
    pub timestamp_us: i64,
    pub renditions: Vec<Rendition>,
    /// EXIF-like auxiliary block; absent when synthesis failed (non-fatal).
    pub metadata: Option<Bytes>,
    pub(crate) source: Option<RawFrame>,
}

impl EncodedResult {
    pub fn rendition(&self, kind: RenditionKind) -> Option<&Rendition> {
        self.renditions.iter().find(|r| r.kind == kind)
    }

    /// Drop the originating raw frame, firing its release hook. Called by
    /// the coordinator once delivery is complete; harmless if repeated.
    pub(crate) fn release_source(&mut self) {
        self.source = None;
    }
}

impl fmt::Debug for EncodedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedResult")
            .field("seq", &self.seq)
            .field("timestamp_us", &self.timestamp_us)
            .field("renditions", &self.renditions.len())
            .field("has_metadata", &self.metadata.is_some())
            .finish()
    }
}
