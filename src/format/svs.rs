//! Aperio SVS reader.
//!
//! SVS files are single-file, tiled, JPEG-compressed BigTIFFs. Each tile's
//! JPEG stream is abbreviated (no quantization/Huffman tables of its own);
//! the tables live once per level in the `JPEGTables` tag and must be merged
//! in before decoding (see [`super::jpeg`]). Tiles are axis-aligned and
//! non-overlapping, so plans built here never carry `blend` metadata and are
//! always composed with [`crate::writer::DirectWriter`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::cache::TileCache;
use crate::error::{Result, SlideError};
use crate::io::RangeReader;
use crate::kernels::copy::copy_rect_rgb8_interleaved;
use crate::model::{
    ChannelMetadata, Image, ImageCoordinate, ImageDimensions, ImageFormat, LevelInfo, OutputSpec, PixelFormat,
    PlanCost, PlanarConfig, Rect, RegionSpec, SlideProperties, TileKey, TilePlan, TileReadOp, TileRequest,
};
use crate::slide::reader::{ReaderState, SlideReader};

use super::common::{clamp_to_level, intersecting_tile_range, tile_transform};
use super::jpeg::prepare_tile_jpeg;
use super::tiff::{Ifd, PyramidLevel, TiffHeader, TiffPyramid, TiffTag, TileData, ValueReader};

/// Metadata parsed from the `ImageDescription` tag of an SVS file's base
/// level. The string is a pipe-separated `key=value` list, prefixed with a
/// vendor banner line (`"Aperio Image Library vX.Y.Z"`).
#[derive(Debug, Clone, Default)]
pub struct SvsMetadata {
    pub mpp: Option<f64>,
    pub magnification: Option<f64>,
    pub vendor: Option<String>,
    pub image_description: Option<String>,
    pub properties: HashMap<String, String>,
}

impl SvsMetadata {
    pub fn parse(description: &str) -> Self {
        let mut metadata = SvsMetadata {
            image_description: Some(description.to_string()),
            ..Default::default()
        };

        if description.contains("Aperio") {
            metadata.vendor = Some("Aperio".to_string());
        }

        for part in description.split('|') {
            let part = part.trim();
            if let Some(eq_pos) = part.find('=') {
                let key = part[..eq_pos].trim();
                let value = part[eq_pos + 1..].trim();
                metadata.properties.insert(key.to_string(), value.to_string());
                match key {
                    "MPP" => {
                        if let Ok(mpp) = value.parse::<f64>() {
                            metadata.mpp = Some(mpp);
                        }
                    }
                    "AppMag" => {
                        if let Ok(mag) = value.parse::<f64>() {
                            metadata.magnification = Some(mag);
                        }
                    }
                    _ => {}
                }
            }
        }

        metadata
    }
}

/// One pyramid level plus its loaded tile offset/size table.
#[derive(Debug, Clone)]
struct SvsLevelData {
    level: PyramidLevel,
    tile_data: TileData,
}

impl SvsLevelData {
    fn get_tile_location(&self, tile_x: u32, tile_y: u32) -> Option<(u64, u64)> {
        let tile_index = self.level.tile_index(tile_x, tile_y)?;
        self.tile_data.get_tile_location(tile_index)
    }

    fn jpeg_tables(&self) -> Option<&[u8]> {
        self.tile_data.jpeg_tables.as_deref()
    }
}

/// Reader for Aperio SVS files, backed by a local file via [`RangeReader`].
pub struct SvsReader<R: RangeReader> {
    reader: R,
    filename: String,
    levels: Vec<SvsLevelData>,
    header: TiffHeader,
    metadata: SvsMetadata,
    properties: SlideProperties,
    associated_image_names: HashSet<String>,
    associated_images: HashMap<String, Ifd>,
    state: ReaderState,
    decode_lock: Mutex<()>,
}

impl<R: RangeReader> SvsReader<R> {
    /// Parse the TIFF pyramid, load tile tables for every level, and pull
    /// slide-wide properties out of the base level's `ImageDescription`.
    pub fn open(reader: R) -> Result<Self> {
        let filename = reader.identifier().to_string();
        let pyramid = TiffPyramid::parse(&reader).map_err(SlideError::from)?;
        if pyramid.levels.is_empty() {
            return Err(SlideError::invalid_argument("SVS file has no pyramid levels"));
        }

        let header = pyramid.header;
        let mut levels = Vec::with_capacity(pyramid.levels.len());
        for level in &pyramid.levels {
            let tile_data = TileData::load(&reader, level, &header).map_err(SlideError::from)?;
            levels.push(SvsLevelData {
                level: level.clone(),
                tile_data,
            });
        }

        let description = levels[0]
            .level
            .ifd
            .get_entry_by_tag(super::tiff::TiffTag::ImageDescription)
            .and_then(|entry| {
                let value_reader = super::tiff::ValueReader::new(&reader, &header);
                value_reader.read_string(entry).ok()
            })
            .unwrap_or_default();
        let metadata = SvsMetadata::parse(&description);

        let base = &levels[0].level;
        let properties = SlideProperties {
            microns_per_pixel: (metadata.mpp.unwrap_or(0.0), metadata.mpp.unwrap_or(0.0)),
            objective_magnification: metadata.magnification.unwrap_or(0.0),
            objective_name: String::new(),
            scanner_model: metadata.vendor.clone().unwrap_or_default(),
            scan_date: None,
            bounds: crate::model::Rect::new(0, 0, base.width, base.height),
        };

        // Non-pyramid IFDs (label/macro/thumbnail) are exposed by name and
        // decoded lazily, on demand, by `read_associated_image`.
        let mut associated_image_names = HashSet::new();
        let mut associated_images = HashMap::new();
        for (_, ifd) in pyramid.other_ifds {
            if let Some(name) = classify_associated_image(&ifd, header.byte_order) {
                associated_image_names.insert(name.clone());
                associated_images.insert(name, ifd);
            }
        }

        Ok(Self {
            reader,
            filename,
            levels,
            header,
            metadata,
            properties,
            associated_image_names,
            associated_images,
            state: ReaderState::new(),
            decode_lock: Mutex::new(()),
        })
    }

    pub fn metadata(&self) -> &SvsMetadata {
        &self.metadata
    }

    fn decode_tile(&self, level_idx: usize, tile_x: u32, tile_y: u32) -> Result<(Vec<u8>, ImageDimensions)> {
        let level_data = &self.levels[level_idx];
        let (offset, size) = level_data.get_tile_location(tile_x, tile_y).ok_or_else(|| {
            SlideError::internal(format!("tile ({tile_x}, {tile_y}) has no location entry at level {level_idx}"))
        })?;

        let raw = self.reader.read_exact_at(offset, size as usize).map_err(SlideError::from)?;
        let jpeg_data = prepare_tile_jpeg(level_data.jpeg_tables(), &raw);

        let decoded = image::load_from_memory_with_format(&jpeg_data, image::ImageFormat::Jpeg)
            .map_err(|e| SlideError::internal(format!("JPEG decode failed: {e}")))?
            .to_rgb8();
        let (w, h) = decoded.dimensions();
        Ok((decoded.into_raw(), ImageDimensions::new(w, h)))
    }
}

/// Guess whether a non-pyramid IFD is the label, macro, or thumbnail image,
/// using the heuristics Aperio's own tools document: label images are
/// roughly square and small; macro images share the base level's aspect
/// ratio at much lower resolution; anything else with tile structure is a
/// thumbnail.
fn classify_associated_image(ifd: &super::tiff::Ifd, byte_order: super::tiff::ByteOrder) -> Option<String> {
    let w = ifd.image_width(byte_order)?;
    let h = ifd.image_height(byte_order)?;
    if w == 0 || h == 0 {
        return None;
    }
    let aspect = w as f64 / h as f64;
    if (0.5..=2.0).contains(&aspect) && w.max(h) <= 2000 {
        Some("label".to_string())
    } else if w > h {
        Some("macro".to_string())
    } else {
        Some("thumbnail".to_string())
    }
}

/// Decode a single associated-image tile or strip, given the IFD's
/// compression scheme. Unlike pyramid tiles, associated images may be
/// uncompressed (`Compression::None`) as well as JPEG.
fn decode_associated_tile(
    compression: u16,
    jpeg_tables: Option<&[u8]>,
    raw: &[u8],
    expected_w: u32,
    expected_h: u32,
) -> Result<(Vec<u8>, (u32, u32))> {
    match compression {
        7 => {
            let jpeg_data = prepare_tile_jpeg(jpeg_tables, raw);
            let decoded = image::load_from_memory_with_format(&jpeg_data, image::ImageFormat::Jpeg)
                .map_err(|e| SlideError::internal(format!("JPEG decode failed: {e}")))?
                .to_rgb8();
            let (w, h) = decoded.dimensions();
            Ok((decoded.into_raw(), (w, h)))
        }
        1 | 0 => {
            let expected_len = expected_w as usize * expected_h as usize * 3;
            if raw.len() < expected_len {
                return Err(SlideError::internal(format!(
                    "uncompressed associated image data too short: got {} bytes, expected {expected_len}",
                    raw.len()
                )));
            }
            Ok((raw[..expected_len].to_vec(), (expected_w, expected_h)))
        }
        other => Err(SlideError::unimplemented(format!(
            "associated image compression {other} is not supported"
        ))),
    }
}

/// Decode a non-pyramid IFD (label/macro/thumbnail) in full, whether tiled or
/// stripped, into an interleaved RGB8 image.
fn decode_associated_ifd<R: RangeReader>(reader: &R, header: &TiffHeader, ifd: &Ifd) -> Result<Image> {
    let byte_order = header.byte_order;
    let width = ifd
        .image_width(byte_order)
        .ok_or_else(|| SlideError::internal("associated image IFD has no ImageWidth"))?;
    let height = ifd
        .image_height(byte_order)
        .ok_or_else(|| SlideError::internal("associated image IFD has no ImageLength"))?;
    let compression = ifd.compression(byte_order).unwrap_or(1);
    let value_reader = ValueReader::new(reader, header);

    let mut image = Image::zeroed(ImageDimensions::new(width, height), 3, PlanarConfig::Interleaved, PixelFormat::UInt8);
    let region = RegionSpec {
        top_left: ImageCoordinate::new(0, 0),
        size: ImageDimensions::new(width, height),
        level: 0,
    };

    if ifd.is_tiled() {
        let tile_width = ifd
            .tile_width(byte_order)
            .ok_or_else(|| SlideError::internal("tiled associated image IFD has no TileWidth"))?;
        let tile_height = ifd
            .tile_height(byte_order)
            .ok_or_else(|| SlideError::internal("tiled associated image IFD has no TileLength"))?;
        let offsets_entry = ifd
            .get_entry_by_tag(TiffTag::TileOffsets)
            .ok_or_else(|| SlideError::internal("tiled associated image IFD has no TileOffsets"))?;
        let sizes_entry = ifd
            .get_entry_by_tag(TiffTag::TileByteCounts)
            .ok_or_else(|| SlideError::internal("tiled associated image IFD has no TileByteCounts"))?;
        let offsets = value_reader.read_u64_array(offsets_entry).map_err(SlideError::from)?;
        let sizes = value_reader.read_u64_array(sizes_entry).map_err(SlideError::from)?;
        let jpeg_tables = ifd
            .get_entry_by_tag(TiffTag::JpegTables)
            .map(|entry| value_reader.read_raw_bytes(entry))
            .transpose()
            .map_err(SlideError::from)?;

        let tiles_x = (width + tile_width - 1) / tile_width;
        let tiles_y = (height + tile_height - 1) / tile_height;

        if let Some((first_tx, last_tx, first_ty, last_ty)) =
            intersecting_tile_range(&region, tile_width, tile_height, tiles_x, tiles_y)
        {
            for tile_y in first_ty..=last_ty {
                for tile_x in first_tx..=last_tx {
                    let tile_index = (tile_y * tiles_x + tile_x) as usize;
                    let (Some(&offset), Some(&size)) = (offsets.get(tile_index), sizes.get(tile_index)) else {
                        continue;
                    };

                    let w = tile_width.min(width - tile_x * tile_width);
                    let h = tile_height.min(height - tile_y * tile_height);
                    let Some(transform) = tile_transform(&region, tile_x, tile_y, tile_width, tile_height, w, h) else {
                        continue;
                    };

                    let raw = reader.read_exact_at(offset, size as usize).map_err(SlideError::from)?;
                    let (decoded, (dw, dh)) = decode_associated_tile(compression, jpeg_tables.as_deref(), &raw, w, h)?;

                    let src_rect = transform.source.intersect(&Rect::new(0, 0, dw, dh));
                    if src_rect.is_empty() {
                        continue;
                    }
                    copy_rect_rgb8_interleaved(
                        &decoded,
                        dw as usize,
                        src_rect,
                        &mut image.bytes,
                        width as usize,
                        (transform.dest.x, transform.dest.y),
                    );
                }
            }
        }
    } else if ifd.is_stripped() {
        let rows_per_strip = match ifd.get_entry_by_tag(TiffTag::RowsPerStrip) {
            Some(entry) => value_reader.read_u32(entry).map_err(SlideError::from)?,
            None => height,
        };
        let offsets_entry = ifd
            .get_entry_by_tag(TiffTag::StripOffsets)
            .ok_or_else(|| SlideError::internal("stripped associated image IFD has no StripOffsets"))?;
        let sizes_entry = ifd
            .get_entry_by_tag(TiffTag::StripByteCounts)
            .ok_or_else(|| SlideError::internal("stripped associated image IFD has no StripByteCounts"))?;
        let offsets = value_reader.read_u64_array(offsets_entry).map_err(SlideError::from)?;
        let sizes = value_reader.read_u64_array(sizes_entry).map_err(SlideError::from)?;
        let jpeg_tables = ifd
            .get_entry_by_tag(TiffTag::JpegTables)
            .map(|entry| value_reader.read_raw_bytes(entry))
            .transpose()
            .map_err(SlideError::from)?;

        for (strip_index, (&offset, &size)) in offsets.iter().zip(sizes.iter()).enumerate() {
            let strip_y = strip_index as u32 * rows_per_strip;
            if strip_y >= height {
                break;
            }
            let strip_h = rows_per_strip.min(height - strip_y);

            let raw = reader.read_exact_at(offset, size as usize).map_err(SlideError::from)?;
            let (decoded, (dw, dh)) = decode_associated_tile(compression, jpeg_tables.as_deref(), &raw, width, strip_h)?;

            let copy_rect = Rect::new(0, 0, width.min(dw), strip_h.min(dh));
            if copy_rect.is_empty() {
                continue;
            }
            copy_rect_rgb8_interleaved(&decoded, dw as usize, copy_rect, &mut image.bytes, width as usize, (0, strip_y));
        }
    } else {
        return Err(SlideError::internal("associated image IFD has neither tile nor strip structure"));
    }

    Ok(image)
}

impl<R: RangeReader> SlideReader for SvsReader<R> {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_info(&self, level: usize) -> Option<LevelInfo> {
        let l = self.levels.get(level)?;
        Some(LevelInfo {
            dimensions: ImageDimensions::new(l.level.width, l.level.height),
            downsample: l.level.downsample,
            tile_size: ImageDimensions::new(l.level.tile_width, l.level.tile_height),
            tiles_x: l.level.tiles_x,
            tiles_y: l.level.tiles_y,
        })
    }

    fn properties(&self) -> &SlideProperties {
        &self.properties
    }

    fn channel_metadata(&self) -> &[ChannelMetadata] {
        &[]
    }

    fn associated_image_names(&self) -> &HashSet<String> {
        &self.associated_image_names
    }

    fn associated_image_dimensions(&self, name: &str) -> Option<ImageDimensions> {
        let ifd = self.associated_images.get(name)?;
        let w = ifd.image_width(self.header.byte_order)?;
        let h = ifd.image_height(self.header.byte_order)?;
        Some(ImageDimensions::new(w, h))
    }

    fn read_associated_image(&self, name: &str) -> Result<Image> {
        let ifd = self
            .associated_images
            .get(name)
            .ok_or_else(|| SlideError::not_found(format!("associated image '{name}' not found")))?;
        let _guard = self.decode_lock.lock().expect("decode lock poisoned");
        decode_associated_ifd(&self.reader, &self.header, ifd)
    }

    fn best_level_for_downsample(&self, downsample: f64) -> Option<usize> {
        self.levels
            .iter()
            .filter(|l| l.level.downsample >= downsample * 0.99)
            .min_by(|a, b| a.level.downsample.partial_cmp(&b.level.downsample).unwrap())
            .or_else(|| self.levels.last())
            .map(|l| l.level.level_index)
    }

    fn format_name(&self) -> &str {
        "svs"
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

        let (origin, size) = clamp_to_level(request.region.top_left, (request.region.size.width, request.region.size.height), level.level.width, level.level.height);
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
            apply_color_correction: false,
            background: [255, 255, 255, 255],
        };

        let mut operations = Vec::new();
        let mut total_bytes = 0u64;

        if size.0 > 0 && size.1 > 0 {
            if let Some((first_tx, last_tx, first_ty, last_ty)) =
                intersecting_tile_range(&actual_region, level.level.tile_width, level.level.tile_height, level.level.tiles_x, level.level.tiles_y)
            {
                for tile_y in first_ty..=last_ty {
                    for tile_x in first_tx..=last_tx {
                        let (tw, th) = match level.level.tile_dimensions(tile_x, tile_y) {
                            Some(dims) => dims,
                            None => continue,
                        };
                        let Some(transform) = tile_transform(
                            &actual_region,
                            tile_x,
                            tile_y,
                            level.level.tile_width,
                            level.level.tile_height,
                            tw,
                            th,
                        ) else {
                            continue;
                        };
                        let Some((offset, byte_size)) = level.get_tile_location(tile_x, tile_y) else {
                            continue;
                        };

                        // Transform was computed against actual_region (clamped
                        // to the level); rebase dest into the full, possibly
                        // larger, output rect the caller requested.
                        let mut transform = transform;
                        transform.dest.x += origin.x - request.region.top_left.x;
                        transform.dest.y += origin.y - request.region.top_left.y;

                        total_bytes += byte_size;
                        operations.push(TileReadOp {
                            level: request.region.level,
                            tile_coord: crate::model::ImageCoordinate::new(tile_x, tile_y),
                            transform,
                            source_id: level.level.ifd_index as u32,
                            byte_offset: offset,
                            byte_size: byte_size as u32,
                            priority: 0,
                            blend: None,
                        });
                    }
                }
            }
        }

        // Tiles arrive in y-major order from the nested loop above already.
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
            let key = TileKey::new(self.filename.clone(), op.level, op.tile_coord.x, op.tile_coord.y);

            let cached = cache.as_ref().and_then(|c| c.get(&key));
            let (bytes, dims, channels) = if let Some(cached) = cached {
                (cached.bytes.clone(), cached.size, cached.channels)
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
                        (bytes, dims, 3)
                    }
                    Err(e) => {
                        warn!(tile_x = op.tile_coord.x, tile_y = op.tile_coord.y, error = %e, "skipping tile");
                        continue;
                    }
                }
            };

            if let Err(e) = writer.write_tile_locked(op, &bytes, dims, channels, &self.decode_lock) {
                warn!(tile_x = op.tile_coord.x, tile_y = op.tile_coord.y, error = %e, "skipping tile write");
            }
        }

        Ok(())
    }

    fn set_visible_channels(&self, indices: &[u32]) {
        self.state.set_visible_channels(indices);
    }

    fn show_all_channels(&self) {
        self.state.show_all_channels();
    }

    fn set_cache(&self, cache: Arc<TileCache>) {
        self.state.set_cache(cache);
    }

    fn get_cache(&self) -> Option<Arc<TileCache>> {
        self.state.get_cache()
    }
}
