//! Error taxonomy for the slide tile pipeline.
//!
//! [`SlideError`] is the top-level error surfaced by readers, plan builders,
//! the tile cache and the registry. It layers over [`IoError`] and
//! [`TiffError`] the same way the pipeline layers over the TIFF byte reader:
//! I/O failures and TIFF-structural failures are wrapped rather than
//! re-described.
//!
//! The variants map directly onto the error-kind table: `InvalidArgument`,
//! `NotFound`, `OutOfRange`, `Internal`, `Unimplemented`, `IoError`. Which
//! variants are surfaced to the caller and which are logged-and-skipped is a
//! policy decision made by callers (plan builders and executors), not by the
//! error type itself.

use thiserror::Error;

/// Errors reading bytes from the backing file.
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Requested range exceeds resource bounds.
    #[error("range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Underlying OS-level I/O failure (open, read, seek).
    #[error("I/O failure on {path}: {message}")]
    Os { path: String, message: String },

    /// File or sidecar not found at the expected path.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Errors that can occur when parsing TIFF files.
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    #[error("invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    #[error("invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    #[error("file too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    #[error("invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    #[error("missing required tag: {0}")]
    MissingTag(&'static str),

    #[error("invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    #[error("unsupported compression: {0}")]
    UnsupportedCompression(u16),

    #[error("file uses strips instead of tiles")]
    StripOrganization,

    #[error("unknown field type: {0}")]
    UnknownFieldType(u16),

    #[error("too many IFDs (possible cycle in the IFD chain)")]
    TooManyIfds,
}

/// Top-level error kind for the slide pipeline.
#[derive(Debug, Clone, Error)]
pub enum SlideError {
    /// Bad level, invalid region (zero size or negative level), capacity == 0.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Unknown extension, unknown associated image name, unknown metadata key.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Tile destination exceeds output bounds. Operation-level, not fatal.
    #[error("out of range: {message}")]
    OutOfRange { message: String },

    /// TIFF read returned <= 0 bytes, unexpected tile size, or other broken
    /// invariant that is not the caller's fault.
    #[error("internal error: {message}")]
    Internal { message: String },

    /// `prepare_request`/`execute_plan` on a reader that has not adopted the
    /// two-stage pipeline, or `quickhash` where unsupported.
    #[error("unimplemented: {message}")]
    Unimplemented { message: String },

    /// Failure opening or reading the backing file, surfaced at construction.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Structural TIFF parsing failure, surfaced at construction.
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),
}

impl SlideError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        SlideError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        SlideError::NotFound {
            message: message.into(),
        }
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        SlideError::OutOfRange {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        SlideError::Internal {
            message: message.into(),
        }
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        SlideError::Unimplemented {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SlideError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts_into_slide_error() {
        let io = IoError::NotFound("slide.svs".to_string());
        let slide_err: SlideError = io.into();
        assert!(matches!(slide_err, SlideError::Io(_)));
    }

    #[test]
    fn tiff_error_converts_into_slide_error() {
        let tiff_err = TiffError::InvalidMagic(0x1234);
        let slide_err: SlideError = tiff_err.into();
        assert!(matches!(slide_err, SlideError::Tiff(_)));
    }

    #[test]
    fn helper_constructors_set_message() {
        let err = SlideError::invalid_argument("level out of range");
        assert_eq!(err.to_string(), "invalid argument: level out of range");
    }
}
