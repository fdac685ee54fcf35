//! Byte-wise rectangular tile copies with edge clipping. No color
//! conversion happens here; the Direct strategy uses these to place decoded
//! tile bytes directly into the output image.

use crate::model::Rect;

/// Fast path: copy an RGB8 interleaved rectangle using per-row `copy_from_slice`.
/// `src` is `src_stride` pixels wide; `dst` is `dst_stride` pixels wide.
pub fn copy_rect_rgb8_interleaved(
    src: &[u8],
    src_stride: usize,
    src_rect: Rect,
    dst: &mut [u8],
    dst_stride: usize,
    dst_origin: (u32, u32),
) {
    if src_rect.is_empty() {
        return;
    }
    let row_bytes = src_rect.width as usize * 3;
    for row in 0..src_rect.height as usize {
        let src_y = src_rect.y as usize + row;
        let src_x = src_rect.x as usize;
        let src_start = (src_y * src_stride + src_x) * 3;

        let dst_y = dst_origin.1 as usize + row;
        let dst_x = dst_origin.0 as usize;
        let dst_start = (dst_y * dst_stride + dst_x) * 3;

        dst[dst_start..dst_start + row_bytes].copy_from_slice(&src[src_start..src_start + row_bytes]);
    }
}

/// General byte-wise copy for arbitrary sample width / channel counts.
/// Copies `min(tile_channels, img_channels)` channels per pixel; if
/// `img_channels` exceeds `tile_channels`, the remaining destination
/// channels are left untouched (already zero-initialized by the writer).
#[allow(clippy::too_many_arguments)]
pub fn copy_rect_general(
    src: &[u8],
    src_stride: usize,
    src_rect: Rect,
    bytes_per_sample: usize,
    tile_channels: usize,
    dst: &mut [u8],
    dst_stride: usize,
    dst_origin: (u32, u32),
    img_channels: usize,
) {
    if src_rect.is_empty() {
        return;
    }
    let channels = tile_channels.min(img_channels);
    let copy_bytes = channels * bytes_per_sample;
    let src_pixel_bytes = tile_channels * bytes_per_sample;
    let dst_pixel_bytes = img_channels * bytes_per_sample;

    for row in 0..src_rect.height as usize {
        let src_y = src_rect.y as usize + row;
        let dst_y = dst_origin.1 as usize + row;
        for col in 0..src_rect.width as usize {
            let src_x = src_rect.x as usize + col;
            let dst_x = dst_origin.0 as usize + col;

            let src_off = (src_y * src_stride + src_x) * src_pixel_bytes;
            let dst_off = (dst_y * dst_stride + dst_x) * dst_pixel_bytes;

            dst[dst_off..dst_off + copy_bytes].copy_from_slice(&src[src_off..src_off + copy_bytes]);
        }
    }
}

/// Copy a single-channel rectangle from `src` (one sample per pixel, stride
/// `src_stride`) into the `target_channel`-indexed plane of a separate-planar
/// output image of stride `dst_stride` and `total_channels` planes.
#[allow(clippy::too_many_arguments)]
pub fn copy_tile_planar(
    src: &[u8],
    src_stride: usize,
    src_rect: Rect,
    bytes_per_sample: usize,
    dst: &mut [u8],
    dst_stride: usize,
    dst_height: usize,
    dst_origin: (u32, u32),
    target_channel: usize,
    total_channels: usize,
) {
    if src_rect.is_empty() {
        return;
    }
    let plane_size = dst_stride * dst_height * bytes_per_sample;
    let plane_offset = target_channel * plane_size;
    debug_assert!(target_channel < total_channels);

    let row_bytes = src_rect.width as usize * bytes_per_sample;
    for row in 0..src_rect.height as usize {
        let src_y = src_rect.y as usize + row;
        let src_x = src_rect.x as usize;
        let src_start = (src_y * src_stride + src_x) * bytes_per_sample;

        let dst_y = dst_origin.1 as usize + row;
        let dst_x = dst_origin.0 as usize;
        let dst_start = plane_offset + (dst_y * dst_stride + dst_x) * bytes_per_sample;

        dst[dst_start..dst_start + row_bytes].copy_from_slice(&src[src_start..src_start + row_bytes]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_rgb8_interleaved_full_tile() {
        let src = vec![7u8; 4 * 4 * 3];
        let mut dst = vec![0u8; 8 * 8 * 3];
        copy_rect_rgb8_interleaved(&src, 4, Rect::new(0, 0, 4, 4), &mut dst, 8, (2, 2));
        // Spot check a pixel inside the copied region.
        let idx = (3 * 8 + 3) * 3;
        assert_eq!(&dst[idx..idx + 3], &[7, 7, 7]);
        // Outside the copied region remains zero.
        assert_eq!(dst[0], 0);
    }

    #[test]
    fn copy_rect_general_clips_to_fewer_channels() {
        // Source has 4 samples/pixel, destination image has 3 channels.
        let src = vec![9u8; 2 * 2 * 4];
        let mut dst = vec![0u8; 2 * 2 * 3];
        copy_rect_general(&src, 2, Rect::new(0, 0, 2, 2), 1, 4, &mut dst, 2, (0, 0), 3);
        assert_eq!(dst, vec![9u8; 12]);
    }

    #[test]
    fn copy_tile_planar_targets_single_channel() {
        let src = vec![5u8; 2 * 2];
        let mut dst = vec![0u8; 3 * 2 * 2]; // 3 channels, 2x2 each
        copy_tile_planar(&src, 2, Rect::new(0, 0, 2, 2), 1, &mut dst, 2, 2, (0, 0), 1, 3);
        assert_eq!(&dst[0..4], &[0, 0, 0, 0]);
        assert_eq!(&dst[4..8], &[5, 5, 5, 5]);
        assert_eq!(&dst[8..12], &[0, 0, 0, 0]);
    }
}
