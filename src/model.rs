//! Core data model shared by plan builders, executors, writers and readers.
//!
//! These types carry no I/O and no format-specific knowledge; they are the
//! vocabulary the rest of the crate is built from. A [`TilePlan`] produced by
//! `prepare_request` is fully owned by the caller and never retains a
//! reference back into the reader that built it.

use std::collections::HashSet;

/// Width/height pair in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Top-left pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageCoordinate {
    pub x: u32,
    pub y: u32,
}

impl ImageCoordinate {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned integer rectangle, used for transform source/dest rects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersection with another rect, or an empty rect if disjoint.
    pub fn intersect(&self, other: &Rect) -> Rect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width).min(other.x + other.width);
        let y1 = (self.y + self.height).min(other.y + other.height);
        if x1 <= x0 || y1 <= y0 {
            Rect::default()
        } else {
            Rect::new(x0, y0, x1 - x0, y1 - y0)
        }
    }
}

/// A requested region at a given pyramid level. `level` is non-negative by
/// construction (`u32`); `size` must be non-zero, enforced by plan builders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionSpec {
    pub top_left: ImageCoordinate,
    pub size: ImageDimensions,
    pub level: u32,
}

/// Fractional region bounds, used when a caller wants sub-pixel precision
/// (e.g. when following an affine transform back to level-0 coordinates).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FractionalBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A region read request. Extends [`RegionSpec`] with optional fractional
/// bounds and a channel subset selector (empty = all visible channels).
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    pub region: RegionSpec,
    pub fractional_bounds: Option<FractionalBounds>,
    pub channel_indices: Vec<u32>,
}

impl TileRequest {
    pub fn new(region: RegionSpec) -> Self {
        Self {
            region,
            fractional_bounds: None,
            channel_indices: Vec::new(),
        }
    }
}

/// Pyramid level metadata. Level 0 has `downsample == 1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelInfo {
    pub dimensions: ImageDimensions,
    pub downsample: f64,
    pub tile_size: ImageDimensions,
    pub tiles_x: u32,
    pub tiles_y: u32,
}

/// Per-channel metadata, populated for spectral (QPTIFF) formats.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMetadata {
    pub name: String,
    pub biomarker: String,
    pub color: (u8, u8, u8),
    pub exposure_time: f64,
    pub signal_units: i32,
}

/// Slide-level physical/scan properties.
#[derive(Debug, Clone, PartialEq)]
pub struct SlideProperties {
    pub microns_per_pixel: (f64, f64),
    pub objective_magnification: f64,
    pub objective_name: String,
    pub scanner_model: String,
    pub scan_date: Option<String>,
    pub bounds: Rect,
}

impl Default for SlideProperties {
    fn default() -> Self {
        Self {
            microns_per_pixel: (0.0, 0.0),
            objective_magnification: 0.0,
            objective_name: String::new(),
            scanner_model: String::new(),
            scan_date: None,
            bounds: Rect::default(),
        }
    }
}

/// Output pixel format / color layout of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Rgb,
    Rgba,
    Gray,
    Spectral,
}

/// Complete immutable slide metadata, built once at reader construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SlideDescriptor {
    pub levels: Vec<LevelInfo>,
    pub channels: Vec<ChannelMetadata>,
    pub properties: SlideProperties,
    pub format: ImageFormat,
    pub native_tile_size: ImageDimensions,
    pub associated_image_names: HashSet<String>,
}

/// Whether multi-channel samples are interleaved or stored plane-by-plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanarConfig {
    Interleaved,
    Separate,
}

/// Output sample representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    UInt8,
    UInt16,
    Float32,
}

/// Source/dest rectangle mapping for a single tile-read operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileTransform {
    pub source: Rect,
    pub dest: Rect,
    pub scale_x: f64,
    pub scale_y: f64,
}

impl TileTransform {
    pub fn identity(source: Rect, dest: Rect) -> Self {
        Self {
            source,
            dest,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }

    pub fn needs_scaling(&self) -> bool {
        (self.scale_x - 1.0).abs() > f64::EPSILON || (self.scale_y - 1.0).abs() > f64::EPSILON
    }

    pub fn needs_cropping(&self) -> bool {
        self.source.width != self.dest.width || self.source.height != self.dest.height
    }
}

/// Pixel composition rule. Only `Overwrite` and `Average` are implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Overwrite,
    Average,
    MaxIntensity,
    MinIntensity,
}

/// Per-operation blend parameters, present only for formats whose tiles
/// overlap and carry subpixel placement (MRXS).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendMetadata {
    pub fractional_offset: (f64, f64),
    pub weight: f64,
    pub gain: f32,
    pub mode: BlendMode,
    pub enable_subpixel_resampling: bool,
}

impl Default for BlendMetadata {
    fn default() -> Self {
        Self {
            fractional_offset: (0.0, 0.0),
            weight: 1.0,
            gain: 1.0,
            mode: BlendMode::default(),
            enable_subpixel_resampling: true,
        }
    }
}

/// One tile-read unit produced by a plan builder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileReadOp {
    pub level: u32,
    pub tile_coord: ImageCoordinate,
    pub transform: TileTransform,
    pub source_id: u32,
    pub byte_offset: u64,
    pub byte_size: u32,
    pub priority: i32,
    pub blend: Option<BlendMetadata>,
}

/// Shape and color contract of a plan's output image.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    pub dimensions: ImageDimensions,
    pub channels: u32,
    pub channel_indices: Vec<u32>,
    pub pixel_format: PixelFormat,
    pub planar_config: PlanarConfig,
    pub apply_color_correction: bool,
    pub background: [u8; 4],
}

impl OutputSpec {
    pub fn total_bytes(&self) -> u64 {
        let bytes_per_sample = match self.pixel_format {
            PixelFormat::UInt8 => 1u64,
            PixelFormat::UInt16 => 2,
            PixelFormat::Float32 => 4,
        };
        self.dimensions.width as u64
            * self.dimensions.height as u64
            * self.channels as u64
            * bytes_per_sample
    }
}

/// Cost accounting attached to a [`TilePlan`], populated by the plan builder
/// and refined by the executor as the cache is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlanCost {
    pub total_bytes_to_read: u64,
    pub total_tiles: u32,
    pub tiles_to_decode: u32,
    pub tiles_from_cache: u32,
    pub estimated_time_ms: u32,
}

/// The pure output of planning: what to read and how to compose it. Produced
/// by `prepare_request`, owned entirely by the caller, and never aliases the
/// reader's internal state.
#[derive(Debug, Clone, PartialEq)]
pub struct TilePlan {
    pub request: TileRequest,
    pub output: OutputSpec,
    pub operations: Vec<TileReadOp>,
    pub actual_region: RegionSpec,
    pub cost: PlanCost,
}

impl TilePlan {
    pub fn is_valid(&self) -> bool {
        self.output.dimensions.width > 0 && self.output.dimensions.height > 0
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }
}

/// A batch of plans sharing deduplicated tile-read operations, used by
/// `prepare_batch`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchTilePlan {
    pub plans: Vec<TilePlan>,
    pub unique_operations: Vec<TileReadOp>,
    /// For each plan, the indices into `unique_operations` it uses.
    pub plan_operation_map: Vec<Vec<usize>>,
}

impl BatchTilePlan {
    pub fn total_operations(&self) -> usize {
        self.plans.iter().map(|p| p.operations.len()).sum()
    }

    pub fn unique_operation_count(&self) -> usize {
        self.unique_operations.len()
    }

    pub fn estimated_io(&self) -> u64 {
        self.unique_operations.iter().map(|op| op.byte_size as u64).sum()
    }
}

/// Tile cache key: equality and hash over all four fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub filename: String,
    pub level: u32,
    pub tile_x: u32,
    pub tile_y: u32,
}

impl TileKey {
    pub fn new(filename: impl Into<String>, level: u32, tile_x: u32, tile_y: u32) -> Self {
        Self {
            filename: filename.into(),
            level,
            tile_x,
            tile_y,
        }
    }
}

/// A cached, already-decoded tile.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTileData {
    pub bytes: Vec<u8>,
    pub size: ImageDimensions,
    pub channels: u32,
}

/// A decoded output image: the final product of `TileWriter::get_output`.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub dimensions: ImageDimensions,
    pub channels: u32,
    pub planar_config: PlanarConfig,
    pub pixel_format: PixelFormat,
    pub bytes: Vec<u8>,
}

impl Image {
    pub fn zeroed(
        dimensions: ImageDimensions,
        channels: u32,
        planar_config: PlanarConfig,
        pixel_format: PixelFormat,
    ) -> Self {
        let bytes_per_sample = match pixel_format {
            PixelFormat::UInt8 => 1usize,
            PixelFormat::UInt16 => 2,
            PixelFormat::Float32 => 4,
        };
        let len = dimensions.width as usize
            * dimensions.height as usize
            * channels as usize
            * bytes_per_sample;
        Self {
            dimensions,
            channels,
            planar_config,
            pixel_format,
            bytes: vec![0u8; len],
        }
    }
}

/// Moves a region inside `image_dims`, shrinking `size` to fit. A region
/// entirely outside the image bounds becomes zero-sized at a clamped origin.
pub fn clamp_region(region: &RegionSpec, image_dims: ImageDimensions) -> RegionSpec {
    let x = region.top_left.x.min(image_dims.width);
    let y = region.top_left.y.min(image_dims.height);
    let width = region.size.width.min(image_dims.width.saturating_sub(x));
    let height = region.size.height.min(image_dims.height.saturating_sub(y));
    RegionSpec {
        top_left: ImageCoordinate::new(x, y),
        size: ImageDimensions::new(width, height),
        level: region.level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_region_keeps_fully_contained_region() {
        let region = RegionSpec {
            top_left: ImageCoordinate::new(10, 10),
            size: ImageDimensions::new(100, 100),
            level: 0,
        };
        let clamped = clamp_region(&region, ImageDimensions::new(1000, 1000));
        assert_eq!(clamped, region);
    }

    #[test]
    fn clamp_region_shrinks_overhanging_region() {
        let region = RegionSpec {
            top_left: ImageCoordinate::new(900, 900),
            size: ImageDimensions::new(200, 200),
            level: 0,
        };
        let clamped = clamp_region(&region, ImageDimensions::new(1000, 1000));
        assert_eq!(clamped.top_left, ImageCoordinate::new(900, 900));
        assert_eq!(clamped.size, ImageDimensions::new(100, 100));
    }

    #[test]
    fn clamp_region_entirely_outside_becomes_zero_sized() {
        let region = RegionSpec {
            top_left: ImageCoordinate::new(100_000, 100_000),
            size: ImageDimensions::new(64, 64),
            level: 0,
        };
        let clamped = clamp_region(&region, ImageDimensions::new(1000, 1000));
        assert_eq!(clamped.size, ImageDimensions::new(0, 0));
        assert_eq!(clamped.level, 0);
    }

    #[test]
    fn rect_intersect_disjoint_is_empty() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(20, 20, 10, 10);
        assert!(a.intersect(&b).is_empty());
    }

    #[test]
    fn rect_intersect_overlap() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 10, 10);
        assert_eq!(a.intersect(&b), Rect::new(5, 5, 5, 5));
    }

    #[test]
    fn output_spec_total_bytes() {
        let spec = OutputSpec {
            dimensions: ImageDimensions::new(10, 10),
            channels: 3,
            channel_indices: vec![],
            pixel_format: PixelFormat::UInt8,
            planar_config: PlanarConfig::Interleaved,
            apply_color_correction: false,
            background: [255, 255, 255, 255],
        };
        assert_eq!(spec.total_bytes(), 300);
    }

    #[test]
    fn tile_key_equality_over_all_fields() {
        let a = TileKey::new("slide.svs", 0, 1, 2);
        let b = TileKey::new("slide.svs", 0, 1, 2);
        let c = TileKey::new("slide.svs", 0, 1, 3);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
