use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Frame geometry that cannot describe a valid planar YUV 4:2:0 buffer
    /// (zero dimensions, stride smaller than width, short buffer).
    #[error("invalid frame geometry: {0}")]
    InvalidFrame(String),

    /// Filesystem or syscall failure while writing or deleting output files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure inside the JPEG codec.
    #[error("JPEG encode error: {0}")]
    Jpeg(#[from] image::ImageError),

    /// Malformed reconfiguration event payload.
    #[error("reconfiguration parse error: {0}")]
    Reconfig(#[from] serde_json::Error),

    /// Auxiliary metadata block could not be synthesized. Non-fatal: the
    /// frame is still delivered without the block.
    #[error("metadata synthesis error: {0}")]
    Metadata(String),

    /// No destination directory could be used at startup. This is the only
    /// error that escalates to session failure.
    #[error("no usable destination configured")]
    NoUsableDestination,

    /// The operation was abandoned because shutdown was requested.
    #[error("pipeline is shutting down")]
    Cancelled,
}
