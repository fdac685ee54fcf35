//! `SlideReader`: the format-agnostic contract every reader implements.
//!
//! The trait splits tile reads into a pure planning stage (`prepare_request`)
//! and an I/O-bound execution stage (`execute_plan`); `read_region` composes
//! both as a default method so callers who don't need the split never see it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::cache::TileCache;
use crate::error::{Result, SlideError};
use crate::model::{
    BatchTilePlan, ChannelMetadata, Image, ImageDimensions, ImageFormat, LevelInfo, SlideProperties,
    TilePlan, TileRequest,
};
use crate::writer::TileWriter;

/// Format-agnostic interface for reading tiles from whole-slide images.
///
/// Implementations own their backing file handle(s) and any per-format
/// metadata; they never retain a reference into a caller-supplied buffer.
/// All methods take `&self` — readers are shared across threads, guarding
/// their small amount of mutable state (visible channels, cache handle)
/// behind a mutex.
pub trait SlideReader: Send + Sync {
    /// Number of pyramid levels. Level 0 is always full resolution.
    fn level_count(&self) -> usize;

    /// Metadata for a single level, or `None` if `level` is out of range.
    fn level_info(&self, level: usize) -> Option<LevelInfo>;

    /// Slide-wide physical/scan properties (MPP, magnification, bounds, ...).
    fn properties(&self) -> &SlideProperties;

    /// Per-channel metadata. Empty for RGB formats (SVS, MRXS); populated
    /// for spectral formats (QPTIFF).
    fn channel_metadata(&self) -> &[ChannelMetadata];

    /// Names of associated images (label, macro, thumbnail) embedded in the file.
    fn associated_image_names(&self) -> &HashSet<String>;

    /// Dimensions of a named associated image, or `None` if it doesn't exist.
    fn associated_image_dimensions(&self, name: &str) -> Option<ImageDimensions>;

    /// Decode and return a named associated image in full.
    fn read_associated_image(&self, name: &str) -> Result<Image>;

    /// Index of the level whose downsample is the smallest one `>=` the
    /// requested factor, falling back to the lowest-resolution level.
    /// Returns `None` if the reader has no levels.
    fn best_level_for_downsample(&self, downsample: f64) -> Option<usize>;

    /// Native tile size for a level, or `None` if out of range.
    fn tile_size(&self, level: usize) -> Option<ImageDimensions> {
        self.level_info(level).map(|info| info.tile_size)
    }

    /// Short format identifier (`"svs"`, `"mrxs"`, `"qptiff"`), used in logs
    /// and by the reader registry.
    fn format_name(&self) -> &str;

    /// The output pixel layout this reader produces.
    fn image_format(&self) -> ImageFormat;

    /// A cheap content fingerprint for cache invalidation. Left
    /// unimplemented by every built-in reader (see design notes).
    fn quickhash(&self) -> Result<String> {
        Err(SlideError::unimplemented("quickhash is not implemented"))
    }

    /// Turn a region request into an ordered list of tile-read operations,
    /// without touching the backing file. Pure and cheap to call repeatedly.
    fn prepare_request(&self, request: &TileRequest) -> Result<TilePlan>;

    /// Execute a previously prepared plan: read each operation's bytes from
    /// the backing file, decode, and write into `writer`. Per-operation
    /// failures are logged and skipped rather than propagated; only a
    /// `TileWriter::finalize` failure or a structurally invalid plan is
    /// returned as an error.
    fn execute_plan(&self, plan: &TilePlan, writer: &TileWriter) -> Result<()>;

    /// Plan several requests at once, deduplicating tile-read operations that
    /// more than one request touches.
    ///
    /// Default implementation: loop over `prepare_request` per request (no
    /// reader needs to override this), folding each plan's operations into a
    /// shared `unique_operations` table keyed on the physical tile identity
    /// `(level, source_id, tile_coord)` — the same tile bytes requested by
    /// two different regions are read/decoded once. `plan_operation_map`
    /// records, per plan, the indices into `unique_operations` its own
    /// operations list maps to, in the same order `prepare_request` produced
    /// them.
    fn prepare_batch(&self, requests: &[TileRequest]) -> Result<BatchTilePlan> {
        let mut plans = Vec::with_capacity(requests.len());
        let mut unique_operations = Vec::new();
        let mut plan_operation_map = Vec::with_capacity(requests.len());
        let mut index_of: HashMap<(u32, u32, u32, u32), usize> = HashMap::new();

        for request in requests {
            let plan = self.prepare_request(request)?;
            let mut indices = Vec::with_capacity(plan.operations.len());
            for op in &plan.operations {
                let key = (op.level, op.source_id, op.tile_coord.x, op.tile_coord.y);
                let idx = match index_of.get(&key) {
                    Some(&idx) => idx,
                    None => {
                        unique_operations.push(*op);
                        let idx = unique_operations.len() - 1;
                        index_of.insert(key, idx);
                        idx
                    }
                };
                indices.push(idx);
            }
            plan_operation_map.push(indices);
            plans.push(plan);
        }

        Ok(BatchTilePlan {
            plans,
            unique_operations,
            plan_operation_map,
        })
    }

    /// Read a region end to end: plan, execute, finalize, and return the
    /// composed image. This is the only entry point most callers need;
    /// readers should not override it.
    fn read_region(&self, request: &TileRequest) -> Result<Image> {
        let plan = self.prepare_request(request)?;
        let writer = TileWriter::for_plan(&plan);
        if plan.is_empty() {
            writer.fill_with_color(plan.output.background);
        } else {
            self.execute_plan(&plan, &writer)?;
        }
        writer.finalize();
        Ok(writer.get_output())
    }

    /// Restrict subsequent plans/reads to this channel subset (QPTIFF).
    fn set_visible_channels(&self, indices: &[u32]);

    /// Reset to "all channels visible".
    fn show_all_channels(&self);

    /// Attach a tile cache that `execute_plan` consults before decoding.
    fn set_cache(&self, cache: Arc<TileCache>);

    /// The currently attached tile cache, if any.
    fn get_cache(&self) -> Option<Arc<TileCache>>;
}

/// Shared interior-mutable state every built-in reader embeds: the visible
/// channel subset and the attached cache handle. Kept separate from the
/// immutable [`crate::model::SlideDescriptor`] so `&self` methods never need
/// to lock more than this.
#[derive(Default)]
pub struct ReaderState {
    pub visible_channels: Mutex<Vec<u32>>,
    pub cache: Mutex<Option<Arc<TileCache>>>,
}

impl ReaderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_visible_channels(&self, indices: &[u32]) {
        *self.visible_channels.lock().expect("visible channels mutex poisoned") = indices.to_vec();
    }

    pub fn show_all_channels(&self) {
        self.visible_channels.lock().expect("visible channels mutex poisoned").clear();
    }

    pub fn visible_channels(&self) -> Vec<u32> {
        self.visible_channels.lock().expect("visible channels mutex poisoned").clone()
    }

    pub fn set_cache(&self, cache: Arc<TileCache>) {
        *self.cache.lock().expect("cache mutex poisoned") = Some(cache);
    }

    pub fn get_cache(&self) -> Option<Arc<TileCache>> {
        self.cache.lock().expect("cache mutex poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ImageCoordinate, OutputSpec, PixelFormat, PlanarConfig, Rect, TileReadOp, TileTransform,
    };
    use std::collections::VecDeque;

    /// Canned-plan reader used only to exercise `prepare_batch`'s default
    /// dedup logic; every other trait method is unreachable from that path.
    struct CannedPlanReader {
        plans: Mutex<VecDeque<TilePlan>>,
    }

    impl SlideReader for CannedPlanReader {
        fn level_count(&self) -> usize {
            1
        }

        fn level_info(&self, _level: usize) -> Option<LevelInfo> {
            None
        }

        fn properties(&self) -> &SlideProperties {
            unimplemented!("not exercised by prepare_batch")
        }

        fn channel_metadata(&self) -> &[ChannelMetadata] {
            &[]
        }

        fn associated_image_names(&self) -> &HashSet<String> {
            unimplemented!("not exercised by prepare_batch")
        }

        fn associated_image_dimensions(&self, _name: &str) -> Option<ImageDimensions> {
            None
        }

        fn read_associated_image(&self, name: &str) -> Result<Image> {
            Err(SlideError::not_found(format!("no associated image '{name}'")))
        }

        fn best_level_for_downsample(&self, _downsample: f64) -> Option<usize> {
            Some(0)
        }

        fn format_name(&self) -> &str {
            "canned"
        }

        fn image_format(&self) -> ImageFormat {
            ImageFormat::Rgb
        }

        fn prepare_request(&self, _request: &TileRequest) -> Result<TilePlan> {
            self.plans
                .lock()
                .expect("plans mutex poisoned")
                .pop_front()
                .ok_or_else(|| SlideError::internal("no more canned plans"))
        }

        fn execute_plan(&self, _plan: &TilePlan, _writer: &TileWriter) -> Result<()> {
            Ok(())
        }

        fn set_visible_channels(&self, _indices: &[u32]) {}

        fn show_all_channels(&self) {}

        fn set_cache(&self, _cache: Arc<TileCache>) {}

        fn get_cache(&self) -> Option<Arc<TileCache>> {
            None
        }
    }

    fn canned_output() -> OutputSpec {
        OutputSpec {
            dimensions: ImageDimensions::new(256, 256),
            channels: 3,
            channel_indices: vec![],
            pixel_format: PixelFormat::UInt8,
            planar_config: PlanarConfig::Interleaved,
            apply_color_correction: false,
            background: [255, 255, 255, 255],
        }
    }

    fn canned_region() -> RegionSpec {
        RegionSpec {
            top_left: ImageCoordinate::new(0, 0),
            size: ImageDimensions::new(256, 256),
            level: 0,
        }
    }

    fn canned_op(tile_x: u32, tile_y: u32) -> TileReadOp {
        TileReadOp {
            level: 0,
            tile_coord: ImageCoordinate::new(tile_x, tile_y),
            transform: TileTransform::identity(Rect::new(0, 0, 256, 256), Rect::new(0, 0, 256, 256)),
            source_id: 0,
            byte_offset: (tile_y as u64 * 4 + tile_x as u64) * 65536,
            byte_size: 65536,
            priority: 0,
            blend: None,
        }
    }

    fn canned_plan(ops: Vec<TileReadOp>) -> TilePlan {
        let total_bytes = ops.iter().map(|op| op.byte_size as u64).sum();
        TilePlan {
            request: TileRequest::new(canned_region()),
            output: canned_output(),
            cost: PlanCost {
                total_bytes_to_read: total_bytes,
                total_tiles: ops.len() as u32,
                tiles_to_decode: ops.len() as u32,
                tiles_from_cache: 0,
                estimated_time_ms: 0,
            },
            operations: ops,
            actual_region: canned_region(),
        }
    }

    #[test]
    fn prepare_batch_deduplicates_shared_tile_reads() {
        // Two requests whose plans both touch tile (0, 0); each also touches
        // a tile unique to itself.
        let plan_a = canned_plan(vec![canned_op(0, 0), canned_op(1, 0)]);
        let plan_b = canned_plan(vec![canned_op(0, 0), canned_op(0, 1)]);

        let reader = CannedPlanReader {
            plans: Mutex::new(VecDeque::from([plan_a, plan_b])),
        };

        let requests = [TileRequest::new(canned_region()), TileRequest::new(canned_region())];
        let batch = reader.prepare_batch(&requests).unwrap();

        assert_eq!(batch.plans.len(), 2);
        assert_eq!(batch.total_operations(), 4);
        // Only 3 distinct physical tiles across both plans: (0,0), (1,0), (0,1).
        assert_eq!(batch.unique_operation_count(), 3);
        // Both plans' first operation resolves to the same shared tile (0, 0).
        assert_eq!(batch.plan_operation_map[0][0], batch.plan_operation_map[1][0]);
        // Each plan's second (non-shared) operation is a distinct entry.
        assert_ne!(batch.plan_operation_map[0][1], batch.plan_operation_map[1][1]);
        assert_eq!(batch.estimated_io(), 3 * 65536);
    }

    #[test]
    fn prepare_batch_propagates_prepare_request_errors() {
        let reader = CannedPlanReader {
            plans: Mutex::new(VecDeque::new()),
        };
        let requests = [TileRequest::new(canned_region())];
        assert!(reader.prepare_batch(&requests).is_err());
    }

    #[test]
    fn reader_state_starts_with_no_visible_channel_restriction() {
        let state = ReaderState::new();
        assert!(state.visible_channels().is_empty());
    }

    #[test]
    fn reader_state_set_and_show_all_channels() {
        let state = ReaderState::new();
        state.set_visible_channels(&[0, 2]);
        assert_eq!(state.visible_channels(), vec![0, 2]);
        state.show_all_channels();
        assert!(state.visible_channels().is_empty());
    }

    #[test]
    fn reader_state_cache_round_trip() {
        let state = ReaderState::new();
        assert!(state.get_cache().is_none());
        let cache = Arc::new(TileCache::new(4).unwrap());
        state.set_cache(cache.clone());
        assert!(state.get_cache().is_some());
    }
}
