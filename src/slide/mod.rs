//! Slide abstraction layer.
//!
//! This module sits between the format-specific parsers and callers that
//! just want tiles:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           SlideReader trait              │
//! │  prepare_request / execute_plan /        │
//! │  read_region (format-agnostic interface)  │
//! └────────────────────┬────────────────────┘
//!                      │
//!          ┌───────────┼───────────┐
//!          ▼           ▼           ▼
//! ┌──────────────┐┌──────────┐┌──────────────┐
//! │  SvsReader   ││MrxsReader││ QptiffReader  │
//! └──────────────┘└──────────┘└──────────────┘
//! ```
//!
//! [`registry`] maps a file extension to the reader that opens it, so
//! callers that don't care about the distinction can go straight from a
//! path to a `Box<dyn SlideReader>`.

mod reader;
mod registry;

pub use reader::{ReaderState, SlideReader};
pub use registry::{
    global_registry, register_builtin_formats, Capabilities, FormatCapability, FormatDescriptor,
    PluginLoadContext, ReaderFactory, ReaderRegistry,
};
