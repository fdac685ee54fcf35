//! # wsi-tile-core
//!
//! The core tile-read pipeline for pyramidal whole-slide images used in
//! digital pathology: Aperio SVS, MIRAX (MRXS), and PerkinElmer QPTIFF.
//!
//! Every format reader splits a tile read into two stages — a pure
//! [`slide::SlideReader::prepare_request`] that turns a region request into
//! an ordered list of tile operations, and an I/O-bound
//! [`slide::SlideReader::execute_plan`] that reads and decodes those tiles
//! and composes them through a [`writer::TileWriter`]. Most callers only
//! need [`slide::SlideReader::read_region`], which runs both stages.
//!
//! ## Architecture
//!
//! - [`model`] - Shared geometry, plan, and metadata types every other
//!   module builds on.
//! - [`format`] - The `svs`, `mrxs`, and `qptiff` readers, plus the shared
//!   TIFF/BigTIFF parsing layer and JPEG helpers they build on.
//! - [`slide`] - The format-agnostic `SlideReader` trait and the reader
//!   registry that maps a file extension to the reader that opens it.
//! - [`writer`] - Tile composition: direct copies for non-overlapping
//!   formats, weighted linear-RGB blending with sub-pixel resampling for
//!   MRXS.
//! - [`kernels`] - The pixel-level building blocks (copy, fill, blend,
//!   resample, sRGB conversion) the writer strategies call into.
//! - [`cache`] - A concurrent LRU cache for decoded tiles, shared across
//!   readers via a process-wide singleton unless a caller opts out.
//! - [`io`] - Positioned byte-range reads over a backing file.
//! - [`runtime`] - The process-wide thread pool used for the blended
//!   writer's finalize pass.
//! - [`config`] - Runtime configuration (thread count, cache capacity).
//!
//! ## Example
//!
//! ```no_run
//! use wsi_tile_core::slide::global_registry;
//! use std::path::Path;
//!
//! let reader = global_registry()
//!     .create_reader(Path::new("sample.svs"), None)
//!     .expect("failed to open slide");
//! println!("levels: {}", reader.level_count());
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod kernels;
pub mod model;
pub mod runtime;
pub mod slide;
pub mod writer;

pub use cache::{CacheStats, GlobalCacheManager, TileCache, DEFAULT_CACHE_CAPACITY};
pub use config::RuntimeConfig;
pub use error::{IoError, Result, SlideError, TiffError};
pub use format::tiff::{
    ByteOrder, Compression, FieldType, Ifd, IfdEntry, PyramidLevel, TiffHeader, TiffTag, TileData,
    ValueReader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE,
};
pub use format::{MrxsReader, QptiffReader, SvsReader};
pub use io::{LocalFileReader, RangeReader};
pub use model::{
    BatchTilePlan, BlendMetadata, BlendMode, CachedTileData, ChannelMetadata, Image,
    ImageCoordinate, ImageDimensions, ImageFormat, OutputSpec, PixelFormat, PlanCost, PlanarConfig,
    RegionSpec, SlideProperties, TileKey, TilePlan, TileReadOp, TileRequest, TileTransform,
};
pub use slide::{global_registry, FormatCapability, FormatDescriptor, ReaderRegistry, SlideReader};
pub use writer::{TileWriter, TileWriterStrategy};
