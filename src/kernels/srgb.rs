//! sRGB <-> linear conversion, gain correction and finalize.
//!
//! LUT sizes and thresholds match the reference implementation exactly: a
//! 256-entry forward (sRGB8 -> linear) table and a 4096-entry reverse
//! (linear -> sRGB8) table, gain correction skipped below `1e-4` relative
//! difference from unity.

use std::sync::OnceLock;

/// Trailing float slack kept after each accumulator/scratch plane so that
/// vectorized stores may overwrite harmlessly near the tail.
pub const SIMD_PAD: usize = 16;

const LINEAR_TO_SRGB_LUT_SIZE: usize = 4096;

fn srgb_to_linear_scalar(s: f32) -> f32 {
    if s <= 0.04045 {
        s / 12.92
    } else {
        ((s + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb_scalar(l: f32) -> f32 {
    if l <= 0.0031308 {
        12.92 * l
    } else {
        1.055 * l.powf(1.0 / 2.4) - 0.055
    }
}

fn srgb8_to_linear_lut() -> &'static [f32; 256] {
    static LUT: OnceLock<[f32; 256]> = OnceLock::new();
    LUT.get_or_init(|| {
        let mut table = [0.0f32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            *entry = srgb_to_linear_scalar(i as f32 / 255.0);
        }
        table
    })
}

fn linear_to_srgb8_lut() -> &'static [u8; LINEAR_TO_SRGB_LUT_SIZE] {
    static LUT: OnceLock<[u8; LINEAR_TO_SRGB_LUT_SIZE]> = OnceLock::new();
    LUT.get_or_init(|| {
        let mut table = [0u8; LINEAR_TO_SRGB_LUT_SIZE];
        for (i, entry) in table.iter_mut().enumerate() {
            let l = i as f32 / (LINEAR_TO_SRGB_LUT_SIZE - 1) as f32;
            let s = linear_to_srgb_scalar(l);
            *entry = (s * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
        }
        table
    })
}

/// Convert a single 8-bit sRGB sample to its linear [0,1] value via LUT.
#[inline]
pub fn srgb8_to_linear(sample: u8) -> f32 {
    srgb8_to_linear_lut()[sample as usize]
}

/// Convert a clamped-to-[0,1] linear value to an 8-bit sRGB sample via LUT.
#[inline]
pub fn linear_to_srgb8_fast(value: f32) -> u8 {
    let clamped = value.clamp(0.0, 1.0);
    let idx = (clamped * (LINEAR_TO_SRGB_LUT_SIZE - 1) as f32).round() as usize;
    linear_to_srgb8_lut()[idx.min(LINEAR_TO_SRGB_LUT_SIZE - 1)]
}

/// Convert `w x h` interleaved 8-bit sRGB RGB into linear float32 planar
/// (R plane, then G plane, then B plane), each plane padded by [`SIMD_PAD`]
/// floats of trailing slack.
pub fn srgb8_to_linear_planar(src_interleaved: &[u8], w: usize, h: usize, dst_linear_planar: &mut [f32]) {
    let plane_size = w * h;
    debug_assert!(src_interleaved.len() >= plane_size * 3);
    debug_assert!(dst_linear_planar.len() >= plane_size * 3 + SIMD_PAD);

    for i in 0..plane_size {
        let r = src_interleaved[i * 3];
        let g = src_interleaved[i * 3 + 1];
        let b = src_interleaved[i * 3 + 2];
        dst_linear_planar[i] = srgb8_to_linear(r);
        dst_linear_planar[plane_size + i] = srgb8_to_linear(g);
        dst_linear_planar[2 * plane_size + i] = srgb8_to_linear(b);
    }
}

/// Minimum relative deviation from unity gain before correction is applied.
pub const GAIN_EPSILON: f32 = 1e-4;

/// In-place scalar multiply by `gain` across all three planes (each of
/// `plane_size` floats, contiguous, as written by [`srgb8_to_linear_planar`]).
pub fn gain_correction_linear_planar(linear_planar: &mut [f32], plane_size: usize, gain: f32) {
    if (gain - 1.0).abs() < GAIN_EPSILON {
        return;
    }
    for v in linear_planar.iter_mut().take(plane_size * 3) {
        *v *= gain;
    }
}

/// Size (in output pixels per side) of a finalize work unit. Disjoint tiles
/// need no synchronization between parallel tasks.
pub const FINALIZE_TILE_SIZE: usize = 64;

/// Compute `L = acc / w_sum` (0 when `w_sum == 0`), clamp to [0,1], encode to
/// sRGB8 via LUT, and store interleaved RGB into `out_interleaved`. The
/// image is partitioned into [`FINALIZE_TILE_SIZE`] x `FINALIZE_TILE_SIZE`
/// blocks executed in parallel with `rayon`; each block writes a disjoint
/// region of `out_interleaved`, so no locking is required.
pub fn finalize_linear_to_srgb8(
    acc_r: &[f32],
    acc_g: &[f32],
    acc_b: &[f32],
    w_sum: &[f32],
    img_w: usize,
    img_h: usize,
    out_interleaved: &mut [u8],
) {
    use rayon::prelude::*;

    let tiles_x = img_w.div_ceil(FINALIZE_TILE_SIZE);
    let tiles_y = img_h.div_ceil(FINALIZE_TILE_SIZE);
    let total_tiles = tiles_x * tiles_y;

    let out_ptr = SendPtr(out_interleaved.as_mut_ptr());

    (0..total_tiles).into_par_iter().for_each(|tile_idx| {
        let tx = tile_idx % tiles_x;
        let ty = tile_idx / tiles_x;
        let x0 = tx * FINALIZE_TILE_SIZE;
        let y0 = ty * FINALIZE_TILE_SIZE;
        let x1 = (x0 + FINALIZE_TILE_SIZE).min(img_w);
        let y1 = (y0 + FINALIZE_TILE_SIZE).min(img_h);

        // Safety: each tile owns a disjoint set of pixel indices in
        // `out_interleaved`, so concurrent writes from different tasks never
        // alias the same byte.
        let out = unsafe { std::slice::from_raw_parts_mut(out_ptr.0, img_w * img_h * 3) };

        for y in y0..y1 {
            for x in x0..x1 {
                let i = y * img_w + x;
                let w = w_sum[i];
                let (lr, lg, lb) = if w == 0.0 {
                    (0.0, 0.0, 0.0)
                } else {
                    (acc_r[i] / w, acc_g[i] / w, acc_b[i] / w)
                };
                out[i * 3] = linear_to_srgb8_fast(lr);
                out[i * 3 + 1] = linear_to_srgb8_fast(lg);
                out[i * 3 + 2] = linear_to_srgb8_fast(lb);
            }
        }
    });
}

struct SendPtr(*mut u8);
// Safety: disjoint tile regions are the only thing ever written through this
// pointer from any given task; see `finalize_linear_to_srgb8`.
unsafe impl Send for SendPtr {}
unsafe impl Sync for SendPtr {}
