use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while turning an albedo image into channel masks.
#[derive(Debug, Error)]
pub enum MaskError {
    /// The source could not be read or its format is not supported.
    #[error("unable to decode image {origin}: {source}")]
    ImageDecode {
        /// Path of the source, or `<memory>` for in-memory input.
        origin: String,
        #[source]
        source: image::ImageError,
    },

    /// A caller-supplied parameter is out of range. Raised before any clustering work.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A label or buffer invariant was violated. Always a defect, never bad input.
    #[error("internal error: {0}")]
    Internal(String),

    /// A single output image could not be persisted.
    #[error("failed to write {path}: {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The run was stopped through its [`CancelToken`](crate::CancelToken).
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, MaskError>;
