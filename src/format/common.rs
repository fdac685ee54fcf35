//! Geometry shared by the per-format plan builders.
//!
//! Every built-in format reduces a requested region to the same three steps:
//! find which native tile-grid cells the region touches, clip each one to
//! the request, and express the result as a source/dest [`TileTransform`].
//! This module is that shared arithmetic so `svs.rs`, `qptiff.rs` and
//! `mrxs::reader` don't each reimplement it slightly differently.

use crate::model::{ImageCoordinate, Rect, RegionSpec, TileTransform};

/// Inclusive tile-index range `(first_x, last_x, first_y, last_y)` touched by
/// `region` on a grid of `tiles_x * tiles_y` cells of `tile_w * tile_h`
/// pixels. `None` if the region is empty or the grid has no tiles.
pub fn intersecting_tile_range(
    region: &RegionSpec,
    tile_w: u32,
    tile_h: u32,
    tiles_x: u32,
    tiles_y: u32,
) -> Option<(u32, u32, u32, u32)> {
    if region.size.width == 0 || region.size.height == 0 || tiles_x == 0 || tiles_y == 0 {
        return None;
    }
    let x0 = region.top_left.x;
    let y0 = region.top_left.y;
    let x1 = x0.saturating_add(region.size.width).saturating_sub(1);
    let y1 = y0.saturating_add(region.size.height).saturating_sub(1);

    let first_tx = (x0 / tile_w).min(tiles_x - 1);
    let first_ty = (y0 / tile_h).min(tiles_y - 1);
    let last_tx = (x1 / tile_w).min(tiles_x - 1);
    let last_ty = (y1 / tile_h).min(tiles_y - 1);
    Some((first_tx, last_tx, first_ty, last_ty))
}

/// Source (tile-local) / dest (output-local) rectangle pair for the portion
/// of tile `(tile_x, tile_y)` — sized `tile_w * tile_h` pixels, which may be a
/// partial edge tile smaller than the level's nominal tile size — that falls
/// inside `region`. `None` if the tile doesn't actually intersect the region.
pub fn tile_transform(
    region: &RegionSpec,
    tile_x: u32,
    tile_y: u32,
    nominal_tile_w: u32,
    nominal_tile_h: u32,
    tile_w: u32,
    tile_h: u32,
) -> Option<TileTransform> {
    let tile_rect = Rect::new(tile_x * nominal_tile_w, tile_y * nominal_tile_h, tile_w, tile_h);
    let region_rect = Rect::new(region.top_left.x, region.top_left.y, region.size.width, region.size.height);
    let overlap = tile_rect.intersect(&region_rect);
    if overlap.is_empty() {
        return None;
    }

    let source = Rect::new(overlap.x - tile_rect.x, overlap.y - tile_rect.y, overlap.width, overlap.height);
    let dest = Rect::new(
        overlap.x - region_rect.x,
        overlap.y - region_rect.y,
        overlap.width,
        overlap.height,
    );
    Some(TileTransform::identity(source, dest))
}

/// Clamp a requested top-left/size pair to `(level_w, level_h)`, the way
/// `model::clamp_region` does for the generic model type, but taking raw
/// fields since plan builders work level-by-level rather than through the
/// full `RegionSpec`/`ImageDimensions` pairing in every call site.
pub fn clamp_to_level(top_left: ImageCoordinate, size: (u32, u32), level_w: u32, level_h: u32) -> (ImageCoordinate, (u32, u32)) {
    let x = top_left.x.min(level_w);
    let y = top_left.y.min(level_h);
    let w = size.0.min(level_w.saturating_sub(x));
    let h = size.1.min(level_h.saturating_sub(y));
    (ImageCoordinate::new(x, y), (w, h))
}
