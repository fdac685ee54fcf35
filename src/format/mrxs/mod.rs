//! MIRAX (MRXS) reader: `Slidedat.ini` sidecar parsing plus the blended,
//! sub-pixel tile composition it drives.

mod reader;
mod slidedat;

pub use reader::MrxsReader;
pub use slidedat::Slidedat;
