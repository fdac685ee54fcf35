//! Numerically-correct, SIMD-friendly pixel building blocks used by the
//! tile writer strategies.
//!
//! Every kernel here is side-effect-free except through its output buffers
//! and does not fail: callers pre-validate buffer sizes, and a zero-sized
//! rectangle is always a no-op. All kernel math is float32 (accumulation
//! intermediates use float64 in the MKS convolution for stability, then cast
//! back); clamping saturates rather than wraps.

pub mod accumulate;
pub mod copy;
pub mod fill;
pub mod mks;
pub mod srgb;

pub use accumulate::accumulate_linear_tile;
pub use copy::{copy_rect_general, copy_rect_rgb8_interleaved, copy_tile_planar};
pub use fill::{fill_gray8, fill_rgb8, fill_rgba8};
pub use mks::{build_mks_kernel, reflect_index, resample_tile_subpixel, MIN_SUBPIXEL_TILE_DIM, MKS_RADIUS};
pub use srgb::{
    finalize_linear_to_srgb8, gain_correction_linear_planar, linear_to_srgb8_fast,
    srgb8_to_linear, srgb8_to_linear_planar, GAIN_EPSILON, SIMD_PAD,
};
