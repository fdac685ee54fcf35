//! Weighted accumulation of a decoded, linear-RGB planar tile into a
//! writer's accumulator planes.
//!
//! Mirrors `AccumulateLinearTile` in the original implementation: the
//! intersection between the tile and the image bounds is computed once, and
//! the per-pixel loop walks only that intersection, so no per-pixel bounds
//! check is needed inside the hot loop.

/// Add `weight * pixel` to the matching position in the per-channel
/// accumulators and add `weight` to `w_sum`, for every pixel of
/// `linear_planar` that intersects `[0, img_w) x [0, img_h)` once translated
/// to `(base_x, base_y)`. Weight zero is permitted and contributes nothing.
/// The caller is expected to hold whatever mutex guards the four output
/// slices for the duration of this call.
#[allow(clippy::too_many_arguments)]
pub fn accumulate_linear_tile(
    linear_planar: &[f32],
    tile_w: usize,
    tile_h: usize,
    base_x: i64,
    base_y: i64,
    weight: f64,
    acc_r: &mut [f32],
    acc_g: &mut [f32],
    acc_b: &mut [f32],
    w_sum: &mut [f32],
    img_w: usize,
    img_h: usize,
) {
    if tile_w == 0 || tile_h == 0 || weight == 0.0 {
        return;
    }

    // Clip the tile's footprint against the image bounds once; the
    // per-pixel loop below then needs no bounds checks. `base_x`/`base_y`
    // may be negative when a tile only partially overlaps the image.
    let x0 = base_x.max(0);
    let y0 = base_y.max(0);
    let x1 = (base_x + tile_w as i64).min(img_w as i64);
    let y1 = (base_y + tile_h as i64).min(img_h as i64);
    if x1 <= x0 || y1 <= y0 {
        return;
    }
    let (x0, y0, x1, y1) = (x0 as u32, y0 as u32, x1 as u32, y1 as u32);

    let tile_plane_size = tile_w * tile_h;
    let weight = weight as f32;

    for y in y0..y1 {
        let src_y = (y as i64 - base_y) as usize;
        for x in x0..x1 {
            let src_x = (x as i64 - base_x) as usize;
            let src_idx = src_y * tile_w + src_x;
            let dst_idx = (y as usize) * img_w + (x as usize);

            acc_r[dst_idx] += weight * linear_planar[src_idx];
            acc_g[dst_idx] += weight * linear_planar[tile_plane_size + src_idx];
            acc_b[dst_idx] += weight * linear_planar[2 * tile_plane_size + src_idx];
            w_sum[dst_idx] += weight;
        }
    }
}
