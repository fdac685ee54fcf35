//! Magic-Kernel-Sharp-2021 (MKS) separable subpixel resampling.
//!
//! Used only for sub-pixel translation of MRXS tiles prior to blended
//! accumulation, never for general scaling. Ported from
//! `mks_kernel.{h,cpp}` and `resample_mks.{h,cpp}` in the reference
//! implementation: an 11-tap (radius 5) kernel, LUT-backed at 2000
//! samples/unit, with symmetric-reflection boundary handling.

use std::sync::OnceLock;

/// Kernel half-width in samples: taps cover `[-5, +5]`.
pub const MKS_RADIUS: usize = 5;
/// Total tap count of the separable kernel.
pub const MKS_TAPS: usize = 2 * MKS_RADIUS + 1;
/// Samples per unit distance in the precomputed weight LUT.
const MKS_LUT_RES: f64 = 2000.0;
/// Kernel support: |x| beyond this evaluates to zero.
const MKS_SUPPORT: f64 = 4.5;

/// Piecewise-polynomial Magic-Kernel-Sharp-2021 weight at distance `x`.
fn magic_kernel_sharp_2021(x: f64) -> f64 {
    let ax = x.abs();
    if ax <= 0.5 {
        577.0 / 576.0 - (239.0 / 144.0) * x * x
    } else if ax <= 1.5 {
        (1.0 / 144.0) * (140.0 * x * x - 379.0 * ax + 239.0)
    } else if ax <= 2.5 {
        -(1.0 / 144.0) * (24.0 * x * x - 113.0 * ax + 130.0)
    } else if ax <= 3.5 {
        (1.0 / 144.0) * (4.0 * x * x - 27.0 * ax + 45.0)
    } else if ax <= 4.5 {
        -(1.0 / 1152.0) * (2.0 * ax - 9.0).powi(2)
    } else {
        0.0
    }
}

fn mks_lut() -> &'static Vec<f64> {
    static LUT: OnceLock<Vec<f64>> = OnceLock::new();
    LUT.get_or_init(|| {
        let len = (MKS_SUPPORT * MKS_LUT_RES) as usize + 2;
        (0..len)
            .map(|i| magic_kernel_sharp_2021(i as f64 / MKS_LUT_RES))
            .collect()
    })
}

fn mks_weight(x: f64) -> f64 {
    let ax = x.abs();
    if ax >= MKS_SUPPORT {
        return 0.0;
    }
    let lut = mks_lut();
    let idx = (ax * MKS_LUT_RES).round() as usize;
    lut[idx.min(lut.len() - 1)]
}

/// Evaluate the kernel at `t - frac` for `t in {-5, ..., +5}`.
pub fn build_mks_kernel(frac: f64) -> [f64; MKS_TAPS] {
    let mut weights = [0.0f64; MKS_TAPS];
    for (i, w) in weights.iter_mut().enumerate() {
        let t = i as f64 - MKS_RADIUS as f64;
        *w = mks_weight(t - frac);
    }
    weights
}

/// Symmetric-reflection boundary index for a 1-D axis of length `size`.
pub fn reflect_index(idx: i64, size: i64) -> i64 {
    if size <= 0 {
        return 0;
    }
    if size == 1 {
        return 0;
    }
    if idx >= 0 && idx < size {
        return idx;
    }
    // Fast path for the common case of a small overshoot (one kernel support
    // away from the edge, the only case subpixel resampling ever produces).
    if idx < 0 {
        let reflected = -idx - 1;
        if reflected < size {
            return reflected;
        }
    } else {
        let reflected = 2 * size - idx - 1;
        if reflected >= 0 {
            return reflected;
        }
    }
    // Rare far-out-of-bounds fallback: full period-(2*size) reflection.
    let period = 2 * size;
    let mut m = idx % period;
    if m < 0 {
        m += period;
    }
    if m < size {
        m
    } else {
        period - m - 1
    }
}

/// Apply the separable 11-tap MKS convolution to translate `src_linear_planar`
/// (w x h, 3 planes, each padded) by `(frac_x, frac_y)`, writing into
/// `dst_linear_planar` (same layout). If both fractional offsets are smaller
/// than `1e-12` in magnitude, this is a byte-exact (float-exact) copy.
pub fn resample_tile_subpixel(
    src_linear_planar: &[f32],
    w: usize,
    h: usize,
    frac_x: f64,
    frac_y: f64,
    dst_linear_planar: &mut [f32],
) {
    let plane_size = w * h;
    debug_assert!(src_linear_planar.len() >= plane_size * 3);
    debug_assert!(dst_linear_planar.len() >= plane_size * 3);

    if frac_x.abs() < 1e-12 && frac_y.abs() < 1e-12 {
        dst_linear_planar[..plane_size * 3].copy_from_slice(&src_linear_planar[..plane_size * 3]);
        return;
    }

    let kernel_x = build_mks_kernel(frac_x);
    let kernel_y = build_mks_kernel(frac_y);

    // Horizontal pass into a temporary buffer, then vertical pass into dst.
    let mut temp = vec![0.0f32; plane_size * 3];

    for plane in 0..3 {
        let src_plane = &src_linear_planar[plane * plane_size..plane * plane_size + plane_size];
        let temp_plane = &mut temp[plane * plane_size..plane * plane_size + plane_size];

        for y in 0..h {
            for x in 0..w {
                let mut acc = 0.0f64;
                for (tap, &kw) in kernel_x.iter().enumerate() {
                    let sx = x as i64 + tap as i64 - MKS_RADIUS as i64;
                    let rx = reflect_index(sx, w as i64) as usize;
                    acc += kw * src_plane[y * w + rx] as f64;
                }
                temp_plane[y * w + x] = acc as f32;
            }
        }
    }

    for plane in 0..3 {
        let temp_plane = &temp[plane * plane_size..plane * plane_size + plane_size];
        let dst_plane = &mut dst_linear_planar[plane * plane_size..plane * plane_size + plane_size];

        for y in 0..h {
            for x in 0..w {
                let mut acc = 0.0f64;
                for (tap, &kw) in kernel_y.iter().enumerate() {
                    let sy = y as i64 + tap as i64 - MKS_RADIUS as i64;
                    let ry = reflect_index(sy, h as i64) as usize;
                    acc += kw * temp_plane[ry * w + x] as f64;
                }
                dst_plane[y * w + x] = acc as f32;
            }
        }
    }
}

/// Minimum tile dimension for which subpixel resampling is attempted; below
/// this the 11-tap kernel would need more reflection than is meaningful.
/// Equal to `2 * MKS_RADIUS`.
pub const MIN_SUBPIXEL_TILE_DIM: usize = 2 * MKS_RADIUS;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_zero_frac_peaks_at_center() {
        let k = build_mks_kernel(0.0);
        assert!(k[MKS_RADIUS] > k[MKS_RADIUS - 1]);
        assert!(k[MKS_RADIUS] > k[MKS_RADIUS + 1]);
    }

    #[test]
    fn kernel_sums_close_to_one() {
        let k = build_mks_kernel(0.3);
        let sum: f64 = k.iter().sum();
        assert!((sum - 1.0).abs() < 0.02, "sum={sum}");
    }

    #[test]
    fn reflect_index_in_bounds_is_identity() {
        assert_eq!(reflect_index(3, 10), 3);
        assert_eq!(reflect_index(0, 10), 0);
        assert_eq!(reflect_index(9, 10), 9);
    }

    #[test]
    fn reflect_index_handles_small_overshoot() {
        assert_eq!(reflect_index(-1, 10), 0);
        assert_eq!(reflect_index(10, 10), 9);
        assert_eq!(reflect_index(-2, 10), 1);
    }

    #[test]
    fn reflect_index_size_one() {
        assert_eq!(reflect_index(5, 1), 0);
        assert_eq!(reflect_index(-5, 1), 0);
    }

    #[test]
    fn resample_identity_is_exact_copy() {
        let w = 12;
        let h = 12;
        let plane = w * h;
        let src: Vec<f32> = (0..plane * 3).map(|i| (i % 7) as f32 * 0.1).collect();
        let mut dst = vec![0.0f32; plane * 3];
        resample_tile_subpixel(&src, w, h, 0.0, 0.0, &mut dst);
        assert_eq!(src, dst);
    }

    #[test]
    fn resample_nonzero_frac_changes_output() {
        let w = 16;
        let h = 16;
        let plane = w * h;
        let mut src = vec![0.0f32; plane * 3];
        // A single bright pixel in the middle; after subpixel shift the
        // energy should spread rather than stay at one exact location.
        src[plane / 2] = 1.0;
        let mut dst = vec![0.0f32; plane * 3];
        resample_tile_subpixel(&src, w, h, 0.3, 0.0, &mut dst);
        assert_ne!(src, dst);
        // Energy should not vanish.
        let sum: f32 = dst[..plane].iter().sum();
        assert!(sum > 0.5);
    }
}
