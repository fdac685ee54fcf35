//! Direct composition: axis-aligned, non-overlapping tile placement.
//!
//! Used for formats whose pyramid tiles tile the plane exactly (SVS,
//! QPTIFF). Each `write_tile` is an independent byte copy into a disjoint
//! destination rectangle; no accumulation or color-space conversion happens
//! here.

use std::sync::Mutex;

use crate::error::{Result, SlideError};
use crate::kernels::{copy_rect_general, copy_rect_rgb8_interleaved, copy_tile_planar, fill_gray8, fill_rgb8, fill_rgba8};
use crate::model::{Image, ImageDimensions, OutputSpec, PixelFormat, PlanarConfig, Rect, TileReadOp};
use crate::writer::TileWriterStrategy;

pub struct DirectWriter {
    output: OutputSpec,
    image: Mutex<Image>,
}

impl DirectWriter {
    pub fn new(output: OutputSpec) -> Self {
        let image = Image::zeroed(output.dimensions, output.channels, output.planar_config, output.pixel_format);
        Self {
            output,
            image: Mutex::new(image),
        }
    }

    fn bytes_per_sample(&self) -> usize {
        match self.output.pixel_format {
            PixelFormat::UInt8 => 1,
            PixelFormat::UInt16 => 2,
            PixelFormat::Float32 => 4,
        }
    }

    /// Clip `op`'s dest rect to the output bounds and shrink the source rect
    /// by the same amount, or `OutOfRange` if nothing survives. Shared by
    /// `write_tile` and `write_tile_channel`.
    fn clip(&self, op: &TileReadOp) -> Result<Rect> {
        let image_bounds = Rect::new(0, 0, self.output.dimensions.width, self.output.dimensions.height);
        let dest = op.transform.dest.intersect(&image_bounds);
        if dest.is_empty() {
            return Err(SlideError::out_of_range(
                "tile destination rectangle falls entirely outside the output image",
            ));
        }
        Ok(dest)
    }
}

impl TileWriterStrategy for DirectWriter {
    fn write_tile(
        &self,
        op: &TileReadOp,
        tile_bytes: &[u8],
        tile_dims: ImageDimensions,
        tile_channels: u32,
    ) -> Result<()> {
        let image_bounds = Rect::new(0, 0, self.output.dimensions.width, self.output.dimensions.height);
        let dest = op.transform.dest.intersect(&image_bounds);
        if dest.is_empty() {
            return Err(SlideError::out_of_range(
                "tile destination rectangle falls entirely outside the output image",
            ));
        }

        // Shrink the source rect by the same amount the dest rect was
        // clipped by, so src/dst stay the same size.
        let dx = dest.x - op.transform.dest.x;
        let dy = dest.y - op.transform.dest.y;
        let src_rect = Rect::new(
            op.transform.source.x + dx,
            op.transform.source.y + dy,
            dest.width,
            dest.height,
        );

        let mut image = self.image.lock().expect("direct writer mutex poisoned");
        let bytes_per_sample = self.bytes_per_sample();
        let channels = self.output.channels as usize;
        let img_w = self.output.dimensions.width as usize;
        let img_h = self.output.dimensions.height as usize;

        match self.output.planar_config {
            PlanarConfig::Interleaved => {
                if bytes_per_sample == 1 && channels == 3 && tile_channels == 3 {
                    copy_rect_rgb8_interleaved(
                        tile_bytes,
                        tile_dims.width as usize,
                        src_rect,
                        &mut image.bytes,
                        img_w,
                        (dest.x, dest.y),
                    );
                } else {
                    copy_rect_general(
                        tile_bytes,
                        tile_dims.width as usize,
                        src_rect,
                        bytes_per_sample,
                        tile_channels as usize,
                        &mut image.bytes,
                        img_w,
                        (dest.x, dest.y),
                        channels,
                    );
                }
            }
            PlanarConfig::Separate => {
                let target_channels = tile_channels.min(self.output.channels) as usize;
                for ch in 0..target_channels {
                    copy_tile_planar(
                        tile_bytes,
                        tile_dims.width as usize,
                        src_rect,
                        bytes_per_sample,
                        &mut image.bytes,
                        img_w,
                        img_h,
                        (dest.x, dest.y),
                        ch,
                        channels,
                    );
                }
            }
        }
        Ok(())
    }

    fn write_tile_channel(
        &self,
        op: &TileReadOp,
        tile_bytes: &[u8],
        tile_dims: ImageDimensions,
        dest_channel: u32,
    ) -> Result<()> {
        let dest = self.clip(op)?;
        let dx = dest.x - op.transform.dest.x;
        let dy = dest.y - op.transform.dest.y;
        let src_rect = Rect::new(
            op.transform.source.x + dx,
            op.transform.source.y + dy,
            dest.width,
            dest.height,
        );

        let mut image = self.image.lock().expect("direct writer mutex poisoned");
        let bytes_per_sample = self.bytes_per_sample();
        let channels = self.output.channels as usize;
        let img_w = self.output.dimensions.width as usize;
        let img_h = self.output.dimensions.height as usize;

        copy_tile_planar(
            tile_bytes,
            tile_dims.width as usize,
            src_rect,
            bytes_per_sample,
            &mut image.bytes,
            img_w,
            img_h,
            (dest.x, dest.y),
            dest_channel as usize,
            channels,
        );
        Ok(())
    }

    fn fill_with_color(&self, color: [u8; 4]) {
        let mut image = self.image.lock().expect("direct writer mutex poisoned");
        let w = self.output.dimensions.width as usize;
        let h = self.output.dimensions.height as usize;
        match (self.output.planar_config, self.output.channels) {
            (PlanarConfig::Interleaved, 3) => fill_rgb8(&mut image.bytes, w, h, color[0], color[1], color[2]),
            (PlanarConfig::Interleaved, 4) => {
                fill_rgba8(&mut image.bytes, w, h, color[0], color[1], color[2], color[3])
            }
            (PlanarConfig::Interleaved, 1) => fill_gray8(&mut image.bytes, w, h, color[0]),
            _ => {
                // Multi-channel separate-planar or non-RGB channel counts:
                // fill each plane with the corresponding component, cycling
                // through `color` if there are more planes than components.
                let plane_size = w * h;
                for ch in 0..self.output.channels as usize {
                    let value = color[ch % 4];
                    let start = ch * plane_size;
                    image.bytes[start..start + plane_size].fill(value);
                }
            }
        }
    }

    fn finalize(&self) {}

    fn get_output(&self) -> Image {
        self.image.lock().expect("direct writer mutex poisoned").clone()
    }
}
