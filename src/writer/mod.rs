//! Tile composition: assembling decoded source tiles into one output image.
//!
//! Two strategies implement [`TileWriterStrategy`]: [`direct::DirectWriter`]
//! places axis-aligned, non-overlapping tiles with a byte copy, and
//! [`blended::BlendedWriter`] accumulates overlapping, fractionally-placed,
//! gain-corrected tiles in linear RGB before converting back to sRGB8 once at
//! `finalize`. [`TileWriter`] is the public facade that picks between them.

mod blended;
mod direct;

pub use blended::BlendedWriter;
pub use direct::DirectWriter;

use std::sync::Mutex;

use crate::error::Result;
use crate::model::{Image, OutputSpec, TileReadOp, TilePlan};

/// Composition strategy shared by [`DirectWriter`] and [`BlendedWriter`].
///
/// All methods take `&self`: both strategies guard their mutable state with
/// an internal mutex so a single writer can be driven by multiple executor
/// threads concurrently decoding different operations of the same plan.
pub trait TileWriterStrategy: Send + Sync {
    /// Place one decoded tile according to `op`. `tile_bytes` holds
    /// `tile_dims.width * tile_dims.height * tile_channels` samples,
    /// interleaved. Returns [`crate::error::SlideError::OutOfRange`] if the
    /// operation's destination rectangle falls entirely outside the output;
    /// this is an operation-level failure the caller may log and skip rather
    /// than propagate.
    fn write_tile(
        &self,
        op: &TileReadOp,
        tile_bytes: &[u8],
        tile_dims: crate::model::ImageDimensions,
        tile_channels: u32,
    ) -> Result<()>;

    /// As [`Self::write_tile`], but takes an externally-supplied mutex to
    /// hold for the duration of the write. Used when several writers share
    /// one synchronization domain (batched plans writing into independent
    /// outputs that must still serialize against a caller-held resource).
    fn write_tile_locked(
        &self,
        op: &TileReadOp,
        tile_bytes: &[u8],
        tile_dims: crate::model::ImageDimensions,
        tile_channels: u32,
        external_mutex: &Mutex<()>,
    ) -> Result<()> {
        let _guard = external_mutex.lock().expect("external tile writer mutex poisoned");
        self.write_tile(op, tile_bytes, tile_dims, tile_channels)
    }

    /// Place a single-channel decoded tile (`tile_bytes` holds
    /// `tile_dims.width * tile_dims.height` samples) into one destination
    /// plane of a multi-channel planar output. QPTIFF decodes one channel's
    /// tile per operation, so unlike [`Self::write_tile`] the destination
    /// plane isn't always 0. Default implementation delegates to
    /// `write_tile`, which is only correct for single-channel outputs;
    /// [`crate::writer::DirectWriter`] overrides it to target `dest_channel`.
    fn write_tile_channel(
        &self,
        op: &TileReadOp,
        tile_bytes: &[u8],
        tile_dims: crate::model::ImageDimensions,
        dest_channel: u32,
    ) -> Result<()> {
        let _ = dest_channel;
        self.write_tile(op, tile_bytes, tile_dims, 1)
    }

    /// Fill the entire output with `color` (RGBA; unused trailing channels
    /// ignored for narrower formats). Used for empty plans and as the
    /// pre-fill before any tiles are written.
    fn fill_with_color(&self, color: [u8; 4]);

    /// Finish composition. For [`DirectWriter`] this is a no-op; for
    /// [`BlendedWriter`] it normalizes the accumulators and encodes sRGB8.
    /// Idempotent: calling it more than once re-derives the same output.
    fn finalize(&self);

    /// The current output image. Valid to call before `finalize` (reflects
    /// whatever has been written so far), though the Blended strategy's
    /// buffer only reflects accumulated, not normalized, data until then.
    fn get_output(&self) -> Image;
}

/// Public facade over the two composition strategies. Construct via
/// [`TileWriter::direct`], [`TileWriter::blended`], or
/// [`TileWriter::for_plan`] (which inspects the plan's operations and picks
/// automatically).
pub struct TileWriter {
    strategy: Box<dyn TileWriterStrategy>,
}

impl TileWriter {
    pub fn direct(output: OutputSpec) -> Self {
        Self {
            strategy: Box::new(DirectWriter::new(output)),
        }
    }

    pub fn blended(output: OutputSpec) -> Self {
        Self {
            strategy: Box::new(BlendedWriter::new(output)),
        }
    }

    /// Pick [`Self::blended`] if any operation in `plan` carries blend
    /// metadata, [`Self::direct`] otherwise.
    pub fn for_plan(plan: &TilePlan) -> Self {
        if plan.operations.iter().any(|op| op.blend.is_some()) {
            Self::blended(plan.output.clone())
        } else {
            Self::direct(plan.output.clone())
        }
    }

    pub fn write_tile(
        &self,
        op: &TileReadOp,
        tile_bytes: &[u8],
        tile_dims: crate::model::ImageDimensions,
        tile_channels: u32,
    ) -> Result<()> {
        self.strategy.write_tile(op, tile_bytes, tile_dims, tile_channels)
    }

    pub fn write_tile_locked(
        &self,
        op: &TileReadOp,
        tile_bytes: &[u8],
        tile_dims: crate::model::ImageDimensions,
        tile_channels: u32,
        external_mutex: &Mutex<()>,
    ) -> Result<()> {
        self.strategy
            .write_tile_locked(op, tile_bytes, tile_dims, tile_channels, external_mutex)
    }

    pub fn write_tile_channel(
        &self,
        op: &TileReadOp,
        tile_bytes: &[u8],
        tile_dims: crate::model::ImageDimensions,
        dest_channel: u32,
    ) -> Result<()> {
        self.strategy.write_tile_channel(op, tile_bytes, tile_dims, dest_channel)
    }

    pub fn fill_with_color(&self, color: [u8; 4]) {
        self.strategy.fill_with_color(color)
    }

    pub fn finalize(&self) {
        self.strategy.finalize()
    }

    pub fn get_output(&self) -> Image {
        self.strategy.get_output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BlendMetadata, ImageCoordinate, ImageDimensions, OutputSpec, PixelFormat, PlanCost, PlanarConfig, Rect,
        RegionSpec, TileRequest, TileTransform,
    };

    fn sample_output(w: u32, h: u32) -> OutputSpec {
        OutputSpec {
            dimensions: ImageDimensions::new(w, h),
            channels: 3,
            channel_indices: vec![],
            pixel_format: PixelFormat::UInt8,
            planar_config: PlanarConfig::Interleaved,
            apply_color_correction: true,
            background: [0, 0, 0, 255],
        }
    }

    fn op_without_blend() -> TileReadOp {
        TileReadOp {
            level: 0,
            tile_coord: ImageCoordinate::new(0, 0),
            transform: TileTransform::identity(Rect::new(0, 0, 4, 4), Rect::new(0, 0, 4, 4)),
            source_id: 0,
            byte_offset: 0,
            byte_size: 48,
            priority: 0,
            blend: None,
        }
    }

    fn op_with_blend() -> TileReadOp {
        let mut op = op_without_blend();
        op.blend = Some(BlendMetadata::default());
        op
    }

    fn empty_plan(output: OutputSpec) -> TilePlan {
        TilePlan {
            request: TileRequest::new(RegionSpec {
                top_left: ImageCoordinate::new(0, 0),
                size: output.dimensions,
                level: 0,
            }),
            output,
            operations: vec![],
            actual_region: RegionSpec {
                top_left: ImageCoordinate::new(0, 0),
                size: ImageDimensions::new(0, 0),
                level: 0,
            },
            cost: PlanCost::default(),
        }
    }

    #[test]
    fn for_plan_picks_direct_without_blend_ops() {
        let mut plan = empty_plan(sample_output(4, 4));
        plan.operations.push(op_without_blend());
        let writer = TileWriter::for_plan(&plan);
        writer.fill_with_color([1, 2, 3, 255]);
        let image = writer.get_output();
        assert_eq!(&image.bytes[0..3], &[1, 2, 3]);
    }

    #[test]
    fn for_plan_picks_blended_with_blend_ops() {
        let mut plan = empty_plan(sample_output(4, 4));
        plan.operations.push(op_with_blend());
        let writer = TileWriter::for_plan(&plan);
        let tile = vec![128u8; 4 * 4 * 3];
        writer
            .write_tile(&plan.operations[0], &tile, ImageDimensions::new(4, 4), 3)
            .unwrap();
        writer.finalize();
        let image = writer.get_output();
        assert!(image.bytes.iter().any(|&b| b != 0));
    }

    #[test]
    fn write_tile_locked_delegates_through_external_mutex() {
        let writer = TileWriter::direct(sample_output(4, 4));
        let lock = Mutex::new(());
        writer
            .write_tile_locked(&op_without_blend(), &[7u8; 4 * 4 * 3], ImageDimensions::new(4, 4), 3, &lock)
            .unwrap();
        let image = writer.get_output();
        assert_eq!(image.bytes[0], 7);
    }
}
