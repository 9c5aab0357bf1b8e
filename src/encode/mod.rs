//! The **encode** module turns one raw sensor buffer into an
//! [`EncodedResult`](crate::core::frame::EncodedResult): geometric transform,
//! JPEG compression per rendition, and optional auxiliary metadata.
//!
//! ## Key Components
//!
//! - `transform`: crop / rotate / flip / downscale on planar YUV 4:2:0
//! - `jpeg`: stride-aware color conversion plus the baseline JPEG codec
//! - `metadata`: EXIF-like tag/value block synthesis
//!
//! The pipeline stage order is fixed: validate geometry, crop, orient,
//! compress the full rendition, downscale and compress the preview
//! rendition, then synthesize metadata. Preview and metadata failures never
//! fail the frame; the full rendition is still delivered.

pub mod jpeg;
pub mod metadata;
pub mod transform;

use log::warn;

use crate::core::config::{CropRegion, PipelineConfig, Rotation};
use crate::core::error::Result;
use crate::core::frame::{EncodedResult, RawFrame, Rendition, RenditionKind};
use crate::encode::transform::{YuvBuffer, YuvView};

/// Worker-side encode parameters, snapshotted from the session config so the
/// workers never chase a live config behind a lock.
#[derive(Clone, Debug)]
pub struct EncodeParams {
    pub quality: u8,
    pub crop: Option<CropRegion>,
    pub rotation: Rotation,
    pub hflip: bool,
    pub vflip: bool,
    /// Produce the downsampled preview rendition.
    pub preview: Option<u32>,
    pub attach_metadata: bool,
}

impl EncodeParams {
    pub fn from_config(config: &PipelineConfig, preview_enabled: bool) -> Self {
        Self {
            quality: config.quality,
            crop: config.crop,
            rotation: config.rotation,
            hflip: config.hflip,
            vflip: config.vflip,
            preview: preview_enabled.then_some(config.downsample_factor),
            attach_metadata: config.attach_metadata,
        }
    }

    fn needs_orient(&self) -> bool {
        self.rotation != Rotation::None || self.hflip || self.vflip
    }
}

/// Run the full encode stage for one frame.
///
/// Consumes the frame and carries it inside the result so the coordinator
/// can release the capture buffer after delivery. Malformed geometry fails
/// the job; a preview or metadata synthesis failure only drops that piece
/// of the result.
pub fn encode_frame(frame: RawFrame, params: &EncodeParams) -> Result<EncodedResult> {
    frame.check_geometry()?;

    // Each transform stage produces an owned buffer; `current` tracks the
    // most recent one so `active_view` can borrow from frame or buffer alike.
    let mut current: Option<YuvBuffer> = None;

    if let Some(region) = params.crop {
        current = Some(transform::crop(&YuvView::from_frame(&frame), region)?);
    }
    if params.needs_orient() {
        let oriented = {
            let view = match &current {
                Some(buf) => buf.view(),
                None => YuvView::from_frame(&frame),
            };
            transform::orient(&view, params.rotation, params.hflip, params.vflip)
        };
        current = Some(oriented);
    }

    let mut renditions = Vec::with_capacity(2);
    {
        let view = match &current {
            Some(buf) => buf.view(),
            None => YuvView::from_frame(&frame),
        };
        renditions.push(Rendition {
            kind: RenditionKind::Full,
            data: jpeg::compress(&view, params.quality)?,
        });
        if let Some(factor) = params.preview {
            // The preview is auxiliary: losing it must not discard the
            // already-compressed full rendition.
            let preview = transform::downscale(&view, factor)
                .and_then(|p| jpeg::compress(&p.view(), params.quality));
            match preview {
                Ok(data) => renditions.push(Rendition {
                    kind: RenditionKind::Preview,
                    data,
                }),
                Err(e) => warn!("frame {}: preview rendition failed: {e}", frame.seq()),
            }
        }
    }

    let metadata = if params.attach_metadata {
        match metadata::synthesize(frame.metadata(), frame.timestamp_us(), frame.seq()) {
            Ok(block) => Some(block),
            Err(e) => {
                warn!("frame {}: metadata synthesis failed: {e}", frame.seq());
                None
            }
        }
    } else {
        None
    };

    Ok(EncodedResult {
        seq: frame.seq(),
        timestamp_us: frame.timestamp_us(),
        renditions,
        metadata,
        source: Some(frame),
    })
}
