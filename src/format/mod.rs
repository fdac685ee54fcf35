//! Format parsers for whole-slide image files.
//!
//! `tiff` is the shared generic TIFF/BigTIFF layer SVS and QPTIFF both build
//! on; `jpeg` handles the abbreviated JPEG streams those formats embed;
//! `common` is the tile-geometry arithmetic every plan builder needs.
//! `svs`, `qptiff`, and `mrxs` are the three built-in format readers.

mod common;
mod jpeg;
pub mod mrxs;
pub mod qptiff;
pub mod svs;
pub mod tiff;

pub use mrxs::MrxsReader;
pub use qptiff::QptiffReader;
pub use svs::SvsReader;
