//! **framestore** is the encode-and-store pipeline of an embedded camera
//! appliance: raw planar YUV 4:2:0 sensor buffers in, JPEG stills out,
//! persisted to up to three storage destinations under disk-capacity
//! budgets, with live reconfiguration through JSON events.
//!
//! # Architecture
//!
//! A fixed pool of CPU-bound encode workers sits between a single-producer
//! dispatcher and a single delivery thread:
//!
//! - [`EncodeDispatcher`](core::scheduler::dispatcher::EncodeDispatcher)
//!   stamps gap-free sequence numbers and feeds a bounded work queue
//! - The worker pool crops, rotates and scales each frame, compresses the
//!   full and preview JPEG renditions and synthesizes the auxiliary
//!   metadata block
//! - The output coordinator restores exact capture order across workers
//!   (strict mode, the default) and runs the destination writer
//! - [`RetentionLedger`](output::retention::RetentionLedger) keeps every
//!   destination inside its used-space budget and free-space floor,
//!   evicting oldest files in the background
//!
//! Capture buffers are move-only [`RawFrame`]s; the release hook fires
//! exactly once when a buffer leaves the pipeline, delivered or dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut config = PipelineConfig::default();
//! config.destinations.push(DestinationConfig::new(
//!     DestinationRole::Primary,
//!     "/data/stills",
//! ));
//!
//! let mut pipeline = CapturePipeline::start(&config)?;
//! for buffer in capture_source {
//!     pipeline.submit(buffer.into_raw_frame());
//! }
//! pipeline.shutdown();
//! ```

pub mod core;
pub mod encode;
pub mod output;
pub mod reconfig;

pub use crate::core::cancel::CancellationToken;
pub use crate::core::config::{
    CameraTuning, CropRegion, DeliveryOrder, DestinationConfig, DestinationRole,
    PipelineConfig, Rotation,
};
pub use crate::core::error::{Error, Result};
pub use crate::core::frame::{
    CaptureMetadata, EncodedResult, RawFrame, ReleaseHook, Rendition, RenditionKind,
};
pub use crate::core::pipeline::CapturePipeline;
pub use crate::output::retention::RetentionLedger;
pub use crate::reconfig::ReconfigurationGate;
