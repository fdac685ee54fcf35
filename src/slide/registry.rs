//! Reader registry: maps a file extension to the built-in reader that opens it.
//!
//! Grounded on the format-plugin pattern each native reader uses to advertise
//! itself (capabilities, required codecs, a factory function) rather than on
//! any Rust precedent in this crate's history — the teacher crate detected
//! format by sniffing header bytes, but a registry of static descriptors is
//! the natural Rust shape for "one of a fixed set of pluggable format
//! readers, selected by extension."

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock};

use crate::cache::TileCache;
use crate::error::{Result, SlideError};
use crate::format::{MrxsReader, QptiffReader, SvsReader};
use crate::io::LocalFileReader;
use crate::slide::reader::SlideReader;

/// A single capability a format reader may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatCapability {
    Tiled,
    Pyramidal,
    Spectral,
    AssociatedImages,
    LabelLayers,
    Compressed,
    RandomAccess,
    Streaming,
}

/// A set of [`FormatCapability`] flags, packed into a `u32` bitset.
///
/// No `bitflags`-style crate appears anywhere in the retrieved pack, so this
/// stays a hand-rolled newtype rather than adding one for eight flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const fn empty() -> Self {
        Self(0)
    }

    fn bit(cap: FormatCapability) -> u32 {
        1 << (cap as u32)
    }

    pub fn with(mut self, cap: FormatCapability) -> Self {
        self.0 |= Self::bit(cap);
        self
    }

    pub fn set(&mut self, cap: FormatCapability) {
        self.0 |= Self::bit(cap);
    }

    pub fn contains(&self, cap: FormatCapability) -> bool {
        self.0 & Self::bit(cap) != 0
    }
}

/// A factory that opens a reader for a path, optionally sharing a tile cache.
pub type ReaderFactory = fn(Option<Arc<TileCache>>, &Path) -> Result<Box<dyn SlideReader>>;

/// Static description of one pluggable format reader.
#[derive(Clone)]
pub struct FormatDescriptor {
    pub primary_extension: String,
    pub aliases: Vec<String>,
    pub format_name: String,
    pub capabilities: Capabilities,
    pub version: String,
    /// Codec names (e.g. `"jpeg"`) this reader needs available to decode
    /// tiles. The registry skips registration rather than failing when a
    /// [`PluginLoadContext`] doesn't provide one.
    pub required_capabilities: Vec<String>,
    pub factory: ReaderFactory,
}

impl FormatDescriptor {
    /// Every extension this descriptor answers to, normalized (lowercase,
    /// leading dot), primary first.
    fn extensions(&self) -> impl Iterator<Item = String> + '_ {
        std::iter::once(self.primary_extension.clone()).chain(self.aliases.iter().cloned())
    }
}

fn normalize_extension(extension: &str) -> Result<String> {
    let trimmed = extension.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return Err(SlideError::invalid_argument("empty format extension"));
    }
    Ok(format!(".{}", trimmed.to_ascii_lowercase()))
}

/// Describes what a plugin-loading environment has available, so the
/// built-in initializer can skip readers whose dependencies are missing
/// rather than registering a reader that will fail on first use.
#[derive(Debug, Clone)]
pub struct PluginLoadContext {
    pub available_codecs: HashSet<String>,
    pub available_hardware: Vec<String>,
    pub version: String,
}

impl Default for PluginLoadContext {
    /// The `image` dependency in this crate is built with only the `jpeg`
    /// feature enabled, so that's the one codec every built-in reader can
    /// assume is present.
    fn default() -> Self {
        Self {
            available_codecs: HashSet::from(["jpeg".to_string()]),
            available_hardware: Vec::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl PluginLoadContext {
    fn satisfies(&self, descriptor: &FormatDescriptor) -> bool {
        descriptor
            .required_capabilities
            .iter()
            .all(|req| self.available_codecs.contains(req))
    }
}

/// Extension-keyed registry of format descriptors.
///
/// A process typically uses the single shared instance returned by
/// [`global_registry`], but the type is public so tests and embedders can
/// build an isolated one.
#[derive(Default)]
pub struct ReaderRegistry {
    by_extension: RwLock<HashMap<String, FormatDescriptor>>,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor under its primary extension and all aliases,
    /// overwriting any descriptor already registered for those extensions.
    pub fn register_format(&self, descriptor: FormatDescriptor) -> Result<()> {
        let mut extensions = Vec::new();
        for extension in descriptor.extensions() {
            extensions.push(normalize_extension(&extension)?);
        }
        let mut table = self.by_extension.write().expect("registry lock poisoned");
        for extension in extensions {
            table.insert(extension, descriptor.clone());
        }
        Ok(())
    }

    /// Register `descriptor` unless `context` is missing one of its required
    /// capabilities, in which case it's skipped with a warning.
    pub fn register_if_supported(&self, descriptor: FormatDescriptor, context: &PluginLoadContext) {
        if context.satisfies(&descriptor) {
            let _ = self.register_format(descriptor);
        } else {
            tracing::warn!(
                format = %descriptor.format_name,
                required = ?descriptor.required_capabilities,
                "skipping format registration: required capability unavailable",
            );
        }
    }

    pub fn get_format(&self, extension: &str) -> Option<FormatDescriptor> {
        let extension = normalize_extension(extension).ok()?;
        self.by_extension
            .read()
            .expect("registry lock poisoned")
            .get(&extension)
            .cloned()
    }

    pub fn supports_extension(&self, extension: &str) -> bool {
        self.get_format(extension).is_some()
    }

    pub fn supports_capability(&self, extension: &str, capability: FormatCapability) -> bool {
        self.get_format(extension)
            .is_some_and(|descriptor| descriptor.capabilities.contains(capability))
    }

    /// All registered descriptors, deduplicated by primary extension.
    pub fn list_formats(&self) -> Vec<FormatDescriptor> {
        let table = self.by_extension.read().expect("registry lock poisoned");
        let mut seen = HashSet::new();
        let mut formats = Vec::new();
        for descriptor in table.values() {
            if seen.insert(descriptor.primary_extension.clone()) {
                formats.push(descriptor.clone());
            }
        }
        formats
    }

    pub fn list_formats_by_capability(&self, capability: FormatCapability) -> Vec<FormatDescriptor> {
        self.list_formats()
            .into_iter()
            .filter(|descriptor| descriptor.capabilities.contains(capability))
            .collect()
    }

    pub fn get_supported_extensions(&self) -> Vec<String> {
        let table = self.by_extension.read().expect("registry lock poisoned");
        let mut extensions: Vec<String> = table.keys().cloned().collect();
        extensions.sort();
        extensions
    }

    /// Open `path` with the reader registered for its extension.
    pub fn create_reader(
        &self,
        path: &Path,
        cache: Option<Arc<TileCache>>,
    ) -> Result<Box<dyn SlideReader>> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| SlideError::invalid_argument(format!("no extension on path {}", path.display())))?;
        let descriptor = self
            .get_format(extension)
            .ok_or_else(|| SlideError::not_found(format!("no reader registered for extension .{extension}")))?;
        (descriptor.factory)(cache, path)
    }

    pub fn clear(&self) {
        self.by_extension.write().expect("registry lock poisoned").clear();
    }
}

fn open_svs(cache: Option<Arc<TileCache>>, path: &Path) -> Result<Box<dyn SlideReader>> {
    let reader = LocalFileReader::open(path).map_err(SlideError::from)?;
    let slide = SvsReader::open(reader)?;
    if let Some(cache) = cache {
        slide.set_cache(cache);
    }
    Ok(Box::new(slide))
}

fn open_qptiff(cache: Option<Arc<TileCache>>, path: &Path) -> Result<Box<dyn SlideReader>> {
    let reader = LocalFileReader::open(path).map_err(SlideError::from)?;
    let slide = QptiffReader::open(reader)?;
    if let Some(cache) = cache {
        slide.set_cache(cache);
    }
    Ok(Box::new(slide))
}

fn open_mrxs(cache: Option<Arc<TileCache>>, path: &Path) -> Result<Box<dyn SlideReader>> {
    let slide = MrxsReader::open_path(path)?;
    if let Some(cache) = cache {
        slide.set_cache(cache);
    }
    Ok(Box::new(slide))
}

fn builtin_descriptors() -> Vec<FormatDescriptor> {
    vec![
        FormatDescriptor {
            primary_extension: ".svs".to_string(),
            aliases: vec![".tif".to_string(), ".tiff".to_string()],
            format_name: "Aperio SVS".to_string(),
            capabilities: Capabilities::empty()
                .with(FormatCapability::Tiled)
                .with(FormatCapability::Pyramidal)
                .with(FormatCapability::AssociatedImages)
                .with(FormatCapability::LabelLayers)
                .with(FormatCapability::Compressed)
                .with(FormatCapability::RandomAccess),
            version: env!("CARGO_PKG_VERSION").to_string(),
            required_capabilities: vec!["jpeg".to_string()],
            factory: open_svs,
        },
        FormatDescriptor {
            primary_extension: ".qptiff".to_string(),
            aliases: Vec::new(),
            format_name: "PerkinElmer QPTIFF".to_string(),
            capabilities: Capabilities::empty()
                .with(FormatCapability::Tiled)
                .with(FormatCapability::Pyramidal)
                .with(FormatCapability::Spectral)
                .with(FormatCapability::RandomAccess),
            version: env!("CARGO_PKG_VERSION").to_string(),
            required_capabilities: Vec::new(),
            factory: open_qptiff,
        },
        FormatDescriptor {
            primary_extension: ".mrxs".to_string(),
            aliases: Vec::new(),
            format_name: "MIRAX".to_string(),
            capabilities: Capabilities::empty()
                .with(FormatCapability::Tiled)
                .with(FormatCapability::Pyramidal)
                .with(FormatCapability::AssociatedImages)
                .with(FormatCapability::Compressed)
                .with(FormatCapability::RandomAccess),
            version: env!("CARGO_PKG_VERSION").to_string(),
            required_capabilities: vec!["jpeg".to_string()],
            factory: open_mrxs,
        },
    ]
}

/// Populate `registry` with the three built-in format readers, skipping any
/// whose required codecs aren't present in `context`.
pub fn register_builtin_formats(registry: &ReaderRegistry, context: &PluginLoadContext) {
    for descriptor in builtin_descriptors() {
        registry.register_if_supported(descriptor, context);
    }
}

/// The process-wide registry, populated with the built-in formats on first
/// access using the default [`PluginLoadContext`].
pub fn global_registry() -> &'static ReaderRegistry {
    static INSTANCE: OnceLock<ReaderRegistry> = OnceLock::new();
    INSTANCE.get_or_init(|| {
        let registry = ReaderRegistry::new();
        register_builtin_formats(&registry, &PluginLoadContext::default());
        registry
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_factory(_cache: Option<Arc<TileCache>>, _path: &Path) -> Result<Box<dyn SlideReader>> {
        Err(SlideError::unimplemented("dummy"))
    }

    fn dummy_descriptor(extension: &str, required: Vec<&str>) -> FormatDescriptor {
        FormatDescriptor {
            primary_extension: extension.to_string(),
            aliases: Vec::new(),
            format_name: "Dummy".to_string(),
            capabilities: Capabilities::empty().with(FormatCapability::Tiled),
            version: "0.0.0".to_string(),
            required_capabilities: required.into_iter().map(str::to_string).collect(),
            factory: dummy_factory,
        }
    }

    #[test]
    fn capabilities_track_independent_flags() {
        let caps = Capabilities::empty()
            .with(FormatCapability::Tiled)
            .with(FormatCapability::Spectral);
        assert!(caps.contains(FormatCapability::Tiled));
        assert!(caps.contains(FormatCapability::Spectral));
        assert!(!caps.contains(FormatCapability::Streaming));
    }

    #[test]
    fn register_and_lookup_by_extension_and_alias() {
        let registry = ReaderRegistry::new();
        let mut descriptor = dummy_descriptor(".foo", vec![]);
        descriptor.aliases = vec![".bar".to_string()];
        registry.register_format(descriptor).unwrap();

        assert!(registry.supports_extension("foo"));
        assert!(registry.supports_extension(".FOO"));
        assert!(registry.supports_extension("bar"));
        assert!(!registry.supports_extension("baz"));
    }

    #[test]
    fn supports_capability_reflects_descriptor() {
        let registry = ReaderRegistry::new();
        registry.register_format(dummy_descriptor(".foo", vec![])).unwrap();
        assert!(registry.supports_capability(".foo", FormatCapability::Tiled));
        assert!(!registry.supports_capability(".foo", FormatCapability::Streaming));
    }

    #[test]
    fn register_if_supported_skips_missing_required_capability() {
        let registry = ReaderRegistry::new();
        let context = PluginLoadContext {
            available_codecs: HashSet::new(),
            available_hardware: Vec::new(),
            version: "0.0.0".to_string(),
        };
        registry.register_if_supported(dummy_descriptor(".foo", vec!["jpeg"]), &context);
        assert!(!registry.supports_extension(".foo"));
    }

    #[test]
    fn register_if_supported_accepts_satisfied_requirement() {
        let registry = ReaderRegistry::new();
        let context = PluginLoadContext {
            available_codecs: HashSet::from(["jpeg".to_string()]),
            available_hardware: Vec::new(),
            version: "0.0.0".to_string(),
        };
        registry.register_if_supported(dummy_descriptor(".foo", vec!["jpeg"]), &context);
        assert!(registry.supports_extension(".foo"));
    }

    #[test]
    fn create_reader_rejects_unknown_extension() {
        let registry = ReaderRegistry::new();
        let err = registry.create_reader(Path::new("slide.xyz"), None).unwrap_err();
        assert!(matches!(err, SlideError::NotFound { .. }));
    }

    #[test]
    fn global_registry_knows_builtin_formats() {
        let registry = global_registry();
        assert!(registry.supports_extension(".svs"));
        assert!(registry.supports_extension(".qptiff"));
        assert!(registry.supports_extension(".mrxs"));
    }

    #[test]
    fn list_formats_by_capability_filters() {
        let registry = ReaderRegistry::new();
        registry.register_format(dummy_descriptor(".foo", vec![])).unwrap();
        let spectral = registry.list_formats_by_capability(FormatCapability::Spectral);
        assert!(spectral.is_empty());
        let tiled = registry.list_formats_by_capability(FormatCapability::Tiled);
        assert_eq!(tiled.len(), 1);
    }
}
