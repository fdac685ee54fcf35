//! MIRAX (MRXS) reader.
//!
//! Unlike SVS/QPTIFF's single self-contained TIFF, an MRXS slide is a
//! `Slidedat.ini` sidecar plus one or more binary datafiles: the sidecar maps
//! each tile to a `(datafile_index, byte_offset, byte_size)` triple, a
//! sub-pixel stage position, and a per-tile gain. Camera stitching means
//! neighboring tiles physically overlap and their true positions deviate from
//! the nominal grid by a fraction of a pixel, so composition here always
//! blends through [`crate::writer::BlendedWriter`] rather than placing tiles
//! directly.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::cache::TileCache;
use crate::error::{Result, SlideError};
use crate::io::RangeReader;
use crate::model::{
    BlendMetadata, ChannelMetadata, Image, ImageCoordinate, ImageDimensions, ImageFormat, LevelInfo, OutputSpec,
    PixelFormat, PlanCost, PlanarConfig, Rect, RegionSpec, SlideProperties, TileKey, TilePlan, TileReadOp,
    TileRequest,
};
use crate::slide::reader::{ReaderState, SlideReader};

use super::super::common::{clamp_to_level, tile_transform};
use super::slidedat::Slidedat;

impl MrxsReader<crate::io::LocalFileReader> {
    /// Open from a `Slidedat.ini`-style sidecar path. `GENERAL.DATAFILE_COUNT`
    /// and `GENERAL.DATAFILE_<n>` (paths relative to the sidecar's own
    /// directory) name the datafiles to open alongside it.
    pub fn open_path(ini_path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(ini_path).map_err(|e| {
            SlideError::from(crate::error::IoError::Os {
                path: ini_path.display().to_string(),
                message: e.to_string(),
            })
        })?;
        let ini = Slidedat::parse(&text);
        let count = ini
            .get_usize("GENERAL", "DATAFILE_COUNT")
            .ok_or_else(|| SlideError::invalid_argument("Slidedat.ini missing GENERAL.DATAFILE_COUNT"))?;
        let base_dir = ini_path.parent().unwrap_or_else(|| std::path::Path::new("."));

        let mut datafiles = Vec::with_capacity(count);
        for i in 0..count {
            let key = format!("DATAFILE_{i}");
            let rel = ini
                .get("GENERAL", &key)
                .ok_or_else(|| SlideError::invalid_argument(format!("Slidedat.ini missing GENERAL.{key}")))?;
            datafiles.push(crate::io::LocalFileReader::open(base_dir.join(rel)).map_err(SlideError::from)?);
        }

        Self::open(&text, datafiles)
    }
}

#[derive(Debug, Clone, Copy)]
struct MrxsTileEntry {
    datafile: usize,
    offset: u64,
    size: u64,
    pos_x: f64,
    pos_y: f64,
    gain: f32,
}

struct MrxsLevel {
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    tiles_x: u32,
    tiles_y: u32,
    downsample: f64,
    tiles: Vec<MrxsTileEntry>,
}

impl MrxsLevel {
    fn tile(&self, tile_x: u32, tile_y: u32) -> Option<&MrxsTileEntry> {
        if tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return None;
        }
        self.tiles.get((tile_y * self.tiles_x + tile_x) as usize)
    }

    /// Number of grid tiles (including this one) whose physical, fractional
    /// footprint overlaps this tile's — the "overlap_count" the weight
    /// policy `weight = 1.0 / overlap_count` divides by. Only the 8
    /// immediate grid neighbors are checked since stage jitter is always
    /// much smaller than one tile stride.
    fn overlap_count(&self, tile_x: u32, tile_y: u32) -> u32 {
        let Some(this) = self.tile(tile_x, tile_y) else { return 1 };
        let this_rect = Rect::new(this.pos_x.floor() as u32, this.pos_y.floor() as u32, self.tile_width, self.tile_height);

        let mut count = 0u32;
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let nx = tile_x as i64 + dx;
                let ny = tile_y as i64 + dy;
                if nx < 0 || ny < 0 || nx >= self.tiles_x as i64 || ny >= self.tiles_y as i64 {
                    continue;
                }
                let Some(neighbor) = self.tile(nx as u32, ny as u32) else { continue };
                let neighbor_rect = Rect::new(
                    neighbor.pos_x.floor() as u32,
                    neighbor.pos_y.floor() as u32,
                    self.tile_width,
                    self.tile_height,
                );
                if !this_rect.intersect(&neighbor_rect).is_empty() {
                    count += 1;
                }
            }
        }
        count.max(1)
    }
}

/// Reader for MIRAX slides. Generic over the datafile backing store; the
/// sidecar is parsed once at construction from `slidedat_text`.
pub struct MrxsReader<R: RangeReader> {
    datafiles: Vec<R>,
    filename: String,
    levels: Vec<MrxsLevel>,
    properties: SlideProperties,
    state: ReaderState,
    decode_lock: Mutex<()>,
}

impl<R: RangeReader> MrxsReader<R> {
    pub fn open(slidedat_text: &str, datafiles: Vec<R>) -> Result<Self> {
        if datafiles.is_empty() {
            return Err(SlideError::invalid_argument("MRXS slide has no datafiles"));
        }
        let filename = datafiles[0].identifier().to_string();
        let ini = Slidedat::parse(slidedat_text);

        let level_count = ini
            .get_usize("GENERAL", "LEVEL_COUNT")
            .ok_or_else(|| SlideError::invalid_argument("Slidedat.ini missing GENERAL.LEVEL_COUNT"))?;
        if level_count == 0 {
            return Err(SlideError::invalid_argument("MRXS slide declares zero levels"));
        }

        let mut levels = Vec::with_capacity(level_count);
        for level_idx in 0..level_count {
            let section = format!("LEVEL_{level_idx}");
            let width = ini
                .get_u32(&section, "WIDTH")
                .ok_or_else(|| SlideError::invalid_argument(format!("{section} missing WIDTH")))?;
            let height = ini
                .get_u32(&section, "HEIGHT")
                .ok_or_else(|| SlideError::invalid_argument(format!("{section} missing HEIGHT")))?;
            let tile_width = ini
                .get_u32(&section, "TILE_WIDTH")
                .ok_or_else(|| SlideError::invalid_argument(format!("{section} missing TILE_WIDTH")))?;
            let tile_height = ini
                .get_u32(&section, "TILE_HEIGHT")
                .ok_or_else(|| SlideError::invalid_argument(format!("{section} missing TILE_HEIGHT")))?;
            let tiles_x = ini
                .get_u32(&section, "TILES_X")
                .ok_or_else(|| SlideError::invalid_argument(format!("{section} missing TILES_X")))?;
            let tiles_y = ini
                .get_u32(&section, "TILES_Y")
                .ok_or_else(|| SlideError::invalid_argument(format!("{section} missing TILES_Y")))?;
            let downsample = ini.get_f64(&section, "DOWNSAMPLE").unwrap_or(2f64.powi(level_idx as i32));

            let mut tiles = Vec::with_capacity((tiles_x * tiles_y) as usize);
            for ty in 0..tiles_y {
                for tx in 0..tiles_x {
                    let tile_section = format!("LEVEL_{level_idx}_TILE_{tx}_{ty}");
                    let datafile = ini
                        .get_usize(&tile_section, "DATAFILE")
                        .ok_or_else(|| SlideError::invalid_argument(format!("{tile_section} missing DATAFILE")))?;
                    let offset = ini
                        .get(&tile_section, "OFFSET")
                        .and_then(|v| v.parse::<u64>().ok())
                        .ok_or_else(|| SlideError::invalid_argument(format!("{tile_section} missing OFFSET")))?;
                    let size = ini
                        .get(&tile_section, "SIZE")
                        .and_then(|v| v.parse::<u64>().ok())
                        .ok_or_else(|| SlideError::invalid_argument(format!("{tile_section} missing SIZE")))?;
                    let pos_x = ini.get_f64(&tile_section, "POS_X").unwrap_or((tx * tile_width) as f64);
                    let pos_y = ini.get_f64(&tile_section, "POS_Y").unwrap_or((ty * tile_height) as f64);
                    let gain = ini.get_f64(&tile_section, "GAIN").unwrap_or(1.0) as f32;
                    if datafile >= datafiles.len() {
                        return Err(SlideError::invalid_argument(format!(
                            "{tile_section} references datafile {datafile}, only {} provided",
                            datafiles.len()
                        )));
                    }
                    tiles.push(MrxsTileEntry {
                        datafile,
                        offset,
                        size,
                        pos_x,
                        pos_y,
                        gain,
                    });
                }
            }

            levels.push(MrxsLevel {
                width,
                height,
                tile_width,
                tile_height,
                tiles_x,
                tiles_y,
                downsample,
                tiles,
            });
        }

        let mpp_x = ini.get_f64("GENERAL", "MICRONS_PER_PIXEL_X").unwrap_or(0.0);
        let mpp_y = ini.get_f64("GENERAL", "MICRONS_PER_PIXEL_Y").unwrap_or(mpp_x);
        let properties = SlideProperties {
            microns_per_pixel: (mpp_x, mpp_y),
            objective_magnification: ini.get_f64("GENERAL", "OBJECTIVE_MAGNIFICATION").unwrap_or(0.0),
            objective_name: ini.get("GENERAL", "OBJECTIVE_NAME").unwrap_or_default().to_string(),
            scanner_model: ini.get("GENERAL", "SCANNER_MODEL").unwrap_or_default().to_string(),
            scan_date: None,
            bounds: Rect::new(0, 0, levels[0].width, levels[0].height),
        };

        Ok(Self {
            datafiles,
            filename,
            levels,
            properties,
            state: ReaderState::new(),
            decode_lock: Mutex::new(()),
        })
    }

    fn decode_tile(&self, level_idx: usize, tile_x: u32, tile_y: u32) -> Result<(Vec<u8>, ImageDimensions)> {
        let level = &self.levels[level_idx];
        let entry = level
            .tile(tile_x, tile_y)
            .ok_or_else(|| SlideError::internal(format!("tile ({tile_x}, {tile_y}) out of range at level {level_idx}")))?;

        let raw = self.datafiles[entry.datafile]
            .read_exact_at(entry.offset, entry.size as usize)
            .map_err(SlideError::from)?;
        let decoded = image::load_from_memory_with_format(&raw, image::ImageFormat::Jpeg)
            .map_err(|e| SlideError::internal(format!("JPEG decode failed: {e}")))?
            .to_rgb8();
        let (w, h) = decoded.dimensions();
        Ok((decoded.into_raw(), ImageDimensions::new(w, h)))
    }
}

impl<R: RangeReader> SlideReader for MrxsReader<R> {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_info(&self, level: usize) -> Option<LevelInfo> {
        let l = self.levels.get(level)?;
        Some(LevelInfo {
            dimensions: ImageDimensions::new(l.width, l.height),
            downsample: l.downsample,
            tile_size: ImageDimensions::new(l.tile_width, l.tile_height),
            tiles_x: l.tiles_x,
            tiles_y: l.tiles_y,
        })
    }

    fn properties(&self) -> &SlideProperties {
        &self.properties
    }

    fn channel_metadata(&self) -> &[ChannelMetadata] {
        &[]
    }

    fn associated_image_names(&self) -> &HashSet<String> {
        static EMPTY: std::sync::OnceLock<HashSet<String>> = std::sync::OnceLock::new();
        EMPTY.get_or_init(HashSet::new)
    }

    fn associated_image_dimensions(&self, _name: &str) -> Option<ImageDimensions> {
        None
    }

    fn read_associated_image(&self, name: &str) -> Result<Image> {
        Err(SlideError::not_found(format!("associated image '{name}' is not present")))
    }

    fn best_level_for_downsample(&self, downsample: f64) -> Option<usize> {
        self.levels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.downsample >= downsample * 0.99)
            .min_by(|(_, a), (_, b)| a.downsample.partial_cmp(&b.downsample).unwrap())
            .or_else(|| self.levels.iter().enumerate().last())
            .map(|(idx, _)| idx)
    }

    fn format_name(&self) -> &str {
        "mrxs"
    }

    fn image_format(&self) -> ImageFormat {
        ImageFormat::Rgb
    }

    fn prepare_request(&self, request: &TileRequest) -> Result<TilePlan> {
        let level_idx = request.region.level as usize;
        let level = self
            .levels
            .get(level_idx)
            .ok_or_else(|| SlideError::invalid_argument(format!("level {level_idx} out of range")))?;

        let (origin, size) = clamp_to_level(
            request.region.top_left,
            (request.region.size.width, request.region.size.height),
            level.width,
            level.height,
        );
        let actual_region = RegionSpec {
            top_left: origin,
            size: ImageDimensions::new(size.0, size.1),
            level: request.region.level,
        };

        let output = OutputSpec {
            dimensions: ImageDimensions::new(request.region.size.width, request.region.size.height),
            channels: 3,
            channel_indices: vec![],
            pixel_format: PixelFormat::UInt8,
            planar_config: PlanarConfig::Interleaved,
            apply_color_correction: true,
            background: [255, 255, 255, 255],
        };

        let mut operations = Vec::new();
        let mut total_bytes = 0u64;

        if size.0 > 0 && size.1 > 0 {
            // No spatial index over the tile grid: every candidate tile is
            // tested against the region directly. Grids here are small
            // enough (hundreds, not millions, of tiles) that this stays
            // cheap relative to the JPEG decode each hit triggers.
            for tile_y in 0..level.tiles_y {
                for tile_x in 0..level.tiles_x {
                    let entry = level.tile(tile_x, tile_y).expect("in-range tile index");
                    let origin_x = entry.pos_x.floor() as u32;
                    let origin_y = entry.pos_y.floor() as u32;

                    let Some(mut transform) = tile_transform(
                        &actual_region,
                        origin_x,
                        origin_y,
                        1,
                        1,
                        level.tile_width,
                        level.tile_height,
                    ) else {
                        continue;
                    };
                    transform.dest.x += origin.x - request.region.top_left.x;
                    transform.dest.y += origin.y - request.region.top_left.y;

                    let overlap_count = level.overlap_count(tile_x, tile_y);
                    let blend = BlendMetadata {
                        fractional_offset: (entry.pos_x.fract(), entry.pos_y.fract()),
                        weight: 1.0 / overlap_count as f64,
                        gain: entry.gain,
                        ..BlendMetadata::default()
                    };

                    total_bytes += entry.size;
                    operations.push(TileReadOp {
                        level: request.region.level,
                        tile_coord: ImageCoordinate::new(tile_x, tile_y),
                        transform,
                        source_id: entry.datafile as u32,
                        byte_offset: entry.offset,
                        byte_size: entry.size as u32,
                        priority: 0,
                        blend: Some(blend),
                    });
                }
            }
        }

        let cost = PlanCost {
            total_bytes_to_read: total_bytes,
            total_tiles: operations.len() as u32,
            tiles_to_decode: operations.len() as u32,
            tiles_from_cache: 0,
            estimated_time_ms: 0,
        };

        Ok(TilePlan {
            request: request.clone(),
            output,
            operations,
            actual_region,
            cost,
        })
    }

    fn execute_plan(&self, plan: &TilePlan, writer: &crate::writer::TileWriter) -> Result<()> {
        if !plan.is_valid() {
            return Err(SlideError::invalid_argument("plan has zero-sized output"));
        }

        let cache = self.get_cache();
        for op in &plan.operations {
            let key = TileKey::new(
                format!("{}#{}", self.filename, op.source_id),
                op.level,
                op.tile_coord.x,
                op.tile_coord.y,
            );

            let cached = cache.as_ref().and_then(|c| c.get(&key));
            let (bytes, dims) = if let Some(cached) = cached {
                (cached.bytes.clone(), cached.size)
            } else {
                match self.decode_tile(op.level as usize, op.tile_coord.x, op.tile_coord.y) {
                    Ok((bytes, dims)) => {
                        if let Some(c) = cache.as_ref() {
                            c.put(
                                key,
                                crate::model::CachedTileData {
                                    bytes: bytes.clone(),
                                    size: dims,
                                    channels: 3,
                                },
                            );
                        }
                        (bytes, dims)
                    }
                    Err(e) => {
                        warn!(tile_x = op.tile_coord.x, tile_y = op.tile_coord.y, error = %e, "skipping tile");
                        continue;
                    }
                }
            };

            if let Err(e) = writer.write_tile_locked(op, &bytes, dims, 3, &self.decode_lock) {
                warn!(tile_x = op.tile_coord.x, tile_y = op.tile_coord.y, error = %e, "skipping tile write");
            }
        }

        Ok(())
    }

    fn set_visible_channels(&self, _indices: &[u32]) {}

    fn show_all_channels(&self) {}

    fn set_cache(&self, cache: Arc<TileCache>) {
        self.state.set_cache(cache);
    }

    fn get_cache(&self) -> Option<Arc<TileCache>> {
        self.state.get_cache()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ini() -> String {
        "[GENERAL]\n\
         LEVEL_COUNT=1\n\
         MICRONS_PER_PIXEL_X=0.23\n\
         OBJECTIVE_MAGNIFICATION=20\n\
         OBJECTIVE_NAME=20x Plan Apo\n\
         SCANNER_MODEL=Hamamatsu NanoZoomer\n\
         \n\
         [LEVEL_0]\n\
         WIDTH=28\n\
         HEIGHT=16\n\
         TILE_WIDTH=16\n\
         TILE_HEIGHT=16\n\
         TILES_X=2\n\
         TILES_Y=1\n\
         DOWNSAMPLE=1.0\n\
         \n\
         [LEVEL_0_TILE_0_0]\n\
         DATAFILE=0\n\
         OFFSET=0\n\
         SIZE=100\n\
         POS_X=0.0\n\
         POS_Y=0.0\n\
         GAIN=1.0\n\
         \n\
         [LEVEL_0_TILE_1_0]\n\
         DATAFILE=0\n\
         OFFSET=100\n\
         SIZE=100\n\
         POS_X=12.0\n\
         POS_Y=0.0\n\
         GAIN=1.0\n"
            .to_string()
    }

    struct StubReader;
    impl RangeReader for StubReader {
        fn read_exact_at(&self, _offset: u64, len: usize) -> std::result::Result<Vec<u8>, crate::error::IoError> {
            Ok(vec![0u8; len])
        }
        fn size(&self) -> u64 {
            200
        }
        fn identifier(&self) -> &str {
            "slide.mrxs"
        }
    }

    #[test]
    fn open_parses_levels_and_tiles() {
        let reader = MrxsReader::open(&sample_ini(), vec![StubReader]).unwrap();
        assert_eq!(reader.level_count(), 1);
        let info = reader.level_info(0).unwrap();
        assert_eq!(info.dimensions, ImageDimensions::new(28, 16));
        assert_eq!(info.tiles_x, 2);
    }

    #[test]
    fn overlapping_tiles_get_weight_below_one() {
        let reader = MrxsReader::open(&sample_ini(), vec![StubReader]).unwrap();
        let level = &reader.levels[0];
        // Tiles are 16 wide placed at x=0 and x=12: they overlap by 4px.
        assert_eq!(level.overlap_count(0, 0), 2);
        assert_eq!(level.overlap_count(1, 0), 2);
    }

    #[test]
    fn prepare_request_populates_blend_metadata() {
        let reader = MrxsReader::open(&sample_ini(), vec![StubReader]).unwrap();
        let request = TileRequest::new(RegionSpec {
            top_left: ImageCoordinate::new(0, 0),
            size: ImageDimensions::new(28, 16),
            level: 0,
        });
        let plan = reader.prepare_request(&request).unwrap();
        assert_eq!(plan.operations.len(), 2);
        for op in &plan.operations {
            let blend = op.blend.expect("MRXS ops always carry blend metadata");
            assert!((blend.weight - 0.5).abs() < 1e-9);
        }
    }

    #[test]
    fn missing_level_count_is_invalid_argument() {
        let result = MrxsReader::open("[GENERAL]\n", vec![StubReader]);
        assert!(matches!(result, Err(SlideError::InvalidArgument { .. })));
    }
}
