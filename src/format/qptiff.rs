//! PerkinElmer QPTIFF reader.
//!
//! QPTIFF multiplexes several fluorescence channels into one BigTIFF: each
//! channel is its own contiguous pyramid of tiled, single-sample-per-pixel
//! IFDs, and channel-specific metadata (name, biomarker, exposure, signal
//! units, display color) lives in that channel's own `ImageDescription`,
//! alongside the slide-wide scan properties every channel repeats. Unlike
//! SVS's single RGB pyramid, a region read here walks channels outermost and
//! levels innermost, decoding one grayscale tile per operation and writing
//! it into its own plane of a planar output image.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tracing::warn;

use crate::cache::TileCache;
use crate::error::{Result, SlideError};
use crate::io::RangeReader;
use crate::model::{
    ChannelMetadata, Image, ImageCoordinate, ImageDimensions, ImageFormat, LevelInfo, OutputSpec, PixelFormat,
    PlanCost, PlanarConfig, RegionSpec, SlideProperties, TileKey, TilePlan, TileReadOp, TileRequest,
};
use crate::slide::reader::{ReaderState, SlideReader};

use super::common::{clamp_to_level, intersecting_tile_range, tile_transform};
use super::tiff::{ByteOrder, Ifd, PyramidLevel, TiffHeader, TiffTag, TileData, ValueReader, BIGTIFF_HEADER_SIZE};

/// Minimum image dimension considered part of a channel's pyramid rather
/// than an overview/label page, mirroring `format::tiff::pyramid`'s heuristic.
const MIN_PYRAMID_DIMENSION: u32 = 256;

/// Fields pulled out of a PerkinElmer `ImageDescription` XML blob. The root
/// element is `PerkinElmer-QPI-ImageDescription`; slide-wide scan properties
/// live under `ScanProfile/root`, channel identity directly under the root.
#[derive(Debug, Clone, Default)]
struct QptiffXml {
    pixel_size_microns: Option<f64>,
    magnification: Option<f64>,
    objective_name: Option<String>,
    channel_name: Option<String>,
    biomarker: Option<String>,
    exposure_time: Option<f64>,
    signal_units: Option<i32>,
    color: Option<(u8, u8, u8)>,
}

impl QptiffXml {
    /// Parse with a flat current-tag tracker: every field of interest has a
    /// globally unique tag name in the schema, so nesting depth doesn't need
    /// to be tracked to disambiguate them.
    fn parse(xml: &str) -> Self {
        let mut out = QptiffXml::default();
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);
        let mut current_tag = String::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    current_tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                }
                Ok(Event::Text(t)) => {
                    let Ok(text) = t.decode() else { continue };
                    let text = text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    match current_tag.as_str() {
                        "PixelSizeMicrons" => out.pixel_size_microns = text.parse().ok(),
                        "Magnification" => out.magnification = text.parse().ok(),
                        "ObjectiveName" => out.objective_name = Some(text.to_string()),
                        "Name" => out.channel_name = Some(text.to_string()),
                        "Biomarker" => out.biomarker = Some(text.to_string()),
                        "ExposureTime" => out.exposure_time = text.parse().ok(),
                        "SignalUnits" => out.signal_units = text.parse().ok(),
                        "Color" => out.color = parse_channel_color(text),
                        _ => {}
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }

        out
    }
}

/// Parse a channel's display color, given as `"R,G,B"` decimal components.
fn parse_channel_color(text: &str) -> Option<(u8, u8, u8)> {
    let mut parts = text.split(',').map(|p| p.trim().parse::<u8>());
    let r = parts.next()?.ok()?;
    let g = parts.next()?.ok()?;
    let b = parts.next()?.ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((r, g, b))
}

/// One channel's full pyramid, plus its own loaded tile tables and metadata.
struct QptiffChannel {
    metadata: ChannelMetadata,
    levels: Vec<(PyramidLevel, TileData)>,
}

/// Reconstruct a [`PyramidLevel`] from a raw, already-parsed IFD. The
/// constructor in `format::tiff::pyramid` is private to that module, and its
/// fields are public, so this mirrors it rather than duplicating it behind a
/// visibility change to a module this format otherwise doesn't touch.
fn pyramid_level_from_ifd(ifd: Ifd, ifd_index: usize, byte_order: ByteOrder) -> Option<PyramidLevel> {
    let tile_width = ifd.tile_width(byte_order)?;
    let tile_height = ifd.tile_height(byte_order)?;
    let width = ifd.image_width(byte_order)?;
    let height = ifd.image_height(byte_order)?;
    let compression = ifd.compression(byte_order).unwrap_or(1);
    let tiles_x = width.div_ceil(tile_width);
    let tiles_y = height.div_ceil(tile_height);
    let tile_offsets_entry = ifd.get_entry_by_tag(TiffTag::TileOffsets).cloned();
    let tile_byte_counts_entry = ifd.get_entry_by_tag(TiffTag::TileByteCounts).cloned();
    let jpeg_tables_entry = ifd.get_entry_by_tag(TiffTag::JpegTables).cloned();
    if tile_offsets_entry.is_none() || tile_byte_counts_entry.is_none() {
        return None;
    }

    Some(PyramidLevel {
        level_index: 0,
        ifd_index,
        width,
        height,
        tile_width,
        tile_height,
        tiles_x,
        tiles_y,
        tile_count: tiles_x * tiles_y,
        downsample: 1.0,
        compression,
        ifd,
        tile_offsets_entry,
        tile_byte_counts_entry,
        jpeg_tables_entry,
    })
}

fn parse_all_ifds<R: RangeReader>(reader: &R, header: &TiffHeader) -> Result<Vec<Ifd>> {
    let mut ifds = Vec::new();
    let mut offset = header.first_ifd_offset;
    while offset != 0 {
        if ifds.len() >= 1000 {
            return Err(SlideError::internal("too many IFDs (possible cycle)"));
        }
        let count_size = header.ifd_count_size();
        let count_bytes = reader.read_exact_at(offset, count_size).map_err(SlideError::from)?;
        let entry_count = if header.is_bigtiff {
            header.byte_order.read_u64(&count_bytes)
        } else {
            header.byte_order.read_u16(&count_bytes) as u64
        };
        let ifd_size = Ifd::calculate_size(entry_count, header);
        let ifd_bytes = reader.read_exact_at(offset, ifd_size).map_err(SlideError::from)?;
        let ifd = Ifd::parse(&ifd_bytes, header).map_err(SlideError::from)?;
        offset = ifd.next_ifd_offset;
        ifds.push(ifd);
    }
    Ok(ifds)
}

fn read_description<R: RangeReader>(reader: &R, header: &TiffHeader, ifd: &Ifd) -> String {
    let Some(entry) = ifd.get_entry_by_tag(TiffTag::ImageDescription) else {
        return String::new();
    };
    let value_reader = ValueReader::new(reader, header);
    value_reader.read_string(entry).unwrap_or_default()
}

/// Reader for PerkinElmer QPTIFF files.
pub struct QptiffReader<R: RangeReader> {
    reader: R,
    filename: String,
    channels: Vec<QptiffChannel>,
    channel_metadata: Vec<ChannelMetadata>,
    level_count: usize,
    properties: SlideProperties,
    associated_image_names: HashSet<String>,
    state: ReaderState,
    decode_lock: Mutex<()>,
}

impl<R: RangeReader> QptiffReader<R> {
    pub fn open(reader: R) -> Result<Self> {
        let filename = reader.identifier().to_string();
        let header_bytes = reader.read_exact_at(0, BIGTIFF_HEADER_SIZE).map_err(SlideError::from)?;
        let header = TiffHeader::parse(&header_bytes, reader.size()).map_err(SlideError::from)?;

        let ifds = parse_all_ifds(&reader, &header)?;

        // Group tiled, pyramid-sized IFDs into contiguous per-channel runs:
        // a run ends and a new one begins whenever the next candidate's area
        // is not smaller than the previous entry's (the file lays out each
        // channel's full pyramid contiguously, largest level first).
        let mut channels: Vec<QptiffChannel> = Vec::new();
        let mut current_levels: Vec<(PyramidLevel, TileData)> = Vec::new();
        let mut current_xml: Option<QptiffXml> = None;
        let mut prev_area: u64 = 0;

        for (ifd_index, ifd) in ifds.into_iter().enumerate() {
            if !ifd.is_tiled() {
                continue;
            }
            let Some(mut level) = pyramid_level_from_ifd(ifd, ifd_index, header.byte_order) else {
                continue;
            };
            if level.width < MIN_PYRAMID_DIMENSION || level.height < MIN_PYRAMID_DIMENSION {
                continue;
            }
            let area = level.width as u64 * level.height as u64;

            if !current_levels.is_empty() && area >= prev_area {
                channels.push(finish_channel(current_levels, current_xml.take(), channels.len()));
                current_levels = Vec::new();
            }

            if current_levels.is_empty() {
                let description = read_description(&reader, &header, &level.ifd);
                current_xml = Some(QptiffXml::parse(&description));
            }

            level.level_index = current_levels.len();
            level.downsample = if let Some((base, _)) = current_levels.first() {
                (base.width as f64 / level.width as f64 + base.height as f64 / level.height as f64) / 2.0
            } else {
                1.0
            };

            let tile_data = TileData::load(&reader, &level, &header).map_err(SlideError::from)?;
            prev_area = area;
            current_levels.push((level, tile_data));
        }
        if !current_levels.is_empty() {
            channels.push(finish_channel(current_levels, current_xml.take(), channels.len()));
        }

        if channels.is_empty() {
            return Err(SlideError::invalid_argument("QPTIFF file has no channel pyramids"));
        }

        let level_count = channels.iter().map(|c| c.levels.len()).min().unwrap_or(0);
        let first_xml_description = {
            let (level, _) = &channels[0].levels[0];
            read_description(&reader, &header, &level.ifd)
        };
        let scan = QptiffXml::parse(&first_xml_description);
        let base = &channels[0].levels[0].0;
        let mpp = scan.pixel_size_microns.unwrap_or(0.0);
        let properties = SlideProperties {
            microns_per_pixel: (mpp, mpp),
            objective_magnification: scan.magnification.unwrap_or(0.0),
            objective_name: scan.objective_name.unwrap_or_default(),
            scanner_model: "PerkinElmer".to_string(),
            scan_date: None,
            bounds: crate::model::Rect::new(0, 0, base.width, base.height),
        };

        let channel_metadata = channels.iter().map(|c| c.metadata.clone()).collect();

        Ok(Self {
            reader,
            filename,
            channels,
            channel_metadata,
            level_count,
            properties,
            associated_image_names: HashSet::new(),
            state: ReaderState::new(),
            decode_lock: Mutex::new(()),
        })
    }

    fn effective_channels(&self, request: &TileRequest) -> Vec<u32> {
        if !request.channel_indices.is_empty() {
            return request.channel_indices.clone();
        }
        let visible = self.state.visible_channels();
        if !visible.is_empty() {
            return visible;
        }
        (0..self.channels.len() as u32).collect()
    }

    fn decode_tile(&self, channel: usize, level: usize, tile_x: u32, tile_y: u32) -> Result<(Vec<u8>, ImageDimensions)> {
        let chan = &self.channels[channel];
        let (level_meta, tile_data) = &chan.levels[level];
        let tile_index = level_meta
            .tile_index(tile_x, tile_y)
            .ok_or_else(|| SlideError::internal("tile index out of range"))?;
        let (offset, size) = tile_data
            .get_tile_location(tile_index)
            .ok_or_else(|| SlideError::internal("tile has no location entry"))?;
        let raw = self.reader.read_exact_at(offset, size as usize).map_err(SlideError::from)?;

        // QPTIFF channel planes are uncompressed or deflate-compressed
        // single-sample grayscale; this core handles the uncompressed case,
        // matching the plan builder's declared tile dimensions directly.
        let (tw, th) = level_meta
            .tile_dimensions(tile_x, tile_y)
            .ok_or_else(|| SlideError::internal("tile dimensions out of range"))?;
        let expected = tw as usize * th as usize;
        if raw.len() < expected {
            return Err(SlideError::internal(format!(
                "tile byte count {} smaller than expected {} samples",
                raw.len(),
                expected
            )));
        }
        Ok((raw[..expected].to_vec(), ImageDimensions::new(tw, th)))
    }
}

fn finish_channel(levels: Vec<(PyramidLevel, TileData)>, xml: Option<QptiffXml>, index: usize) -> QptiffChannel {
    let xml = xml.unwrap_or_default();
    let metadata = ChannelMetadata {
        name: xml.channel_name.unwrap_or_else(|| format!("Channel {index}")),
        biomarker: xml.biomarker.unwrap_or_default(),
        color: xml.color.unwrap_or((255, 255, 255)),
        exposure_time: xml.exposure_time.unwrap_or(0.0),
        signal_units: xml.signal_units.unwrap_or(0),
    };
    QptiffChannel { metadata, levels }
}

impl<R: RangeReader> SlideReader for QptiffReader<R> {
    fn level_count(&self) -> usize {
        self.level_count
    }

    fn level_info(&self, level: usize) -> Option<LevelInfo> {
        let (l, _) = self.channels.first()?.levels.get(level)?;
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
        &self.channel_metadata
    }

    fn associated_image_names(&self) -> &HashSet<String> {
        &self.associated_image_names
    }

    fn associated_image_dimensions(&self, _name: &str) -> Option<ImageDimensions> {
        None
    }

    fn read_associated_image(&self, name: &str) -> Result<Image> {
        Err(SlideError::not_found(format!("associated image '{name}' is not present")))
    }

    fn best_level_for_downsample(&self, downsample: f64) -> Option<usize> {
        let levels = &self.channels.first()?.levels;
        levels
            .iter()
            .filter(|(l, _)| l.downsample >= downsample * 0.99)
            .min_by(|(a, _), (b, _)| a.downsample.partial_cmp(&b.downsample).unwrap())
            .or_else(|| levels.last())
            .map(|(l, _)| l.level_index)
    }

    fn format_name(&self) -> &str {
        "qptiff"
    }

    fn image_format(&self) -> ImageFormat {
        ImageFormat::Spectral
    }

    fn prepare_request(&self, request: &TileRequest) -> Result<TilePlan> {
        let level_idx = request.region.level as usize;
        if level_idx >= self.level_count {
            return Err(SlideError::invalid_argument(format!("level {level_idx} out of range")));
        }

        let effective_channels = self.effective_channels(request);
        let (base_level, _) = &self.channels[0].levels[level_idx];
        let (origin, size) = clamp_to_level(
            request.region.top_left,
            (request.region.size.width, request.region.size.height),
            base_level.width,
            base_level.height,
        );
        let actual_region = RegionSpec {
            top_left: origin,
            size: ImageDimensions::new(size.0, size.1),
            level: request.region.level,
        };

        let output = OutputSpec {
            dimensions: ImageDimensions::new(request.region.size.width, request.region.size.height),
            channels: effective_channels.len() as u32,
            channel_indices: effective_channels.clone(),
            pixel_format: PixelFormat::UInt8,
            planar_config: PlanarConfig::Separate,
            apply_color_correction: false,
            background: [255, 255, 255, 255],
        };

        let mut operations = Vec::new();
        let mut total_bytes = 0u64;

        if size.0 > 0 && size.1 > 0 {
            // Channel-major: every op for channel 0 precedes every op for
            // channel 1, matching how a caller would expect plane-by-plane
            // output to materialize.
            for &channel in &effective_channels {
                let Some(chan) = self.channels.get(channel as usize) else {
                    continue;
                };
                let Some((level, _)) = chan.levels.get(level_idx) else {
                    continue;
                };
                let Some((first_tx, last_tx, first_ty, last_ty)) =
                    intersecting_tile_range(&actual_region, level.tile_width, level.tile_height, level.tiles_x, level.tiles_y)
                else {
                    continue;
                };

                for tile_y in first_ty..=last_ty {
                    for tile_x in first_tx..=last_tx {
                        let (tw, th) = match level.tile_dimensions(tile_x, tile_y) {
                            Some(dims) => dims,
                            None => continue,
                        };
                        let Some(mut transform) =
                            tile_transform(&actual_region, tile_x, tile_y, level.tile_width, level.tile_height, tw, th)
                        else {
                            continue;
                        };
                        transform.dest.x += origin.x - request.region.top_left.x;
                        transform.dest.y += origin.y - request.region.top_left.y;

                        let Some(tile_index) = level.tile_index(tile_x, tile_y) else {
                            continue;
                        };
                        let Some((offset, byte_size)) = chan.levels[level_idx].1.get_tile_location(tile_index) else {
                            continue;
                        };

                        total_bytes += byte_size;
                        operations.push(TileReadOp {
                            level: request.region.level,
                            tile_coord: ImageCoordinate::new(tile_x, tile_y),
                            transform,
                            source_id: channel,
                            byte_offset: offset,
                            byte_size: byte_size as u32,
                            priority: 0,
                            blend: None,
                        });
                    }
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

        // source_id carries the absolute channel index; map it to the
        // output's plane index via the plan's selected channel list.
        for op in &plan.operations {
            let Some(dest_channel) = plan.output.channel_indices.iter().position(|&c| c == op.source_id) else {
                continue;
            };

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
                match self.decode_tile(op.source_id as usize, op.level as usize, op.tile_coord.x, op.tile_coord.y) {
                    Ok((bytes, dims)) => {
                        if let Some(c) = cache.as_ref() {
                            c.put(
                                key,
                                crate::model::CachedTileData {
                                    bytes: bytes.clone(),
                                    size: dims,
                                    channels: 1,
                                },
                            );
                        }
                        (bytes, dims)
                    }
                    Err(e) => {
                        warn!(channel = op.source_id, tile_x = op.tile_coord.x, tile_y = op.tile_coord.y, error = %e, "skipping tile");
                        continue;
                    }
                }
            };

            if let Err(e) = {
                let _guard = self.decode_lock.lock().expect("qptiff decode lock poisoned");
                writer.write_tile_channel(op, &bytes, dims, dest_channel as u32)
            } {
                warn!(channel = op.source_id, error = %e, "skipping tile write");
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_xml_pulls_scan_and_channel_fields() {
        let xml = r#"<PerkinElmer-QPI-ImageDescription>
            <ScanProfile><root>
                <PixelSizeMicrons>0.5</PixelSizeMicrons>
                <Magnification>20</Magnification>
                <ObjectiveName>20x Plan Apo</ObjectiveName>
            </root></ScanProfile>
            <Name>DAPI</Name>
            <Biomarker>Nuclei</Biomarker>
            <ExposureTime>12.5</ExposureTime>
            <SignalUnits>1</SignalUnits>
            <Color>0,0,255</Color>
        </PerkinElmer-QPI-ImageDescription>"#;

        let parsed = QptiffXml::parse(xml);
        assert_eq!(parsed.pixel_size_microns, Some(0.5));
        assert_eq!(parsed.magnification, Some(20.0));
        assert_eq!(parsed.objective_name.as_deref(), Some("20x Plan Apo"));
        assert_eq!(parsed.channel_name.as_deref(), Some("DAPI"));
        assert_eq!(parsed.biomarker.as_deref(), Some("Nuclei"));
        assert_eq!(parsed.exposure_time, Some(12.5));
        assert_eq!(parsed.signal_units, Some(1));
        assert_eq!(parsed.color, Some((0, 0, 255)));
    }

    #[test]
    fn parse_channel_color_accepts_comma_separated_components() {
        assert_eq!(parse_channel_color("255,128,0"), Some((255, 128, 0)));
    }

    #[test]
    fn parse_channel_color_rejects_wrong_arity() {
        assert_eq!(parse_channel_color("255,128"), None);
    }

    #[test]
    fn parse_xml_missing_fields_are_none() {
        let parsed = QptiffXml::parse("<root></root>");
        assert!(parsed.pixel_size_microns.is_none());
        assert!(parsed.channel_name.is_none());
    }
}
