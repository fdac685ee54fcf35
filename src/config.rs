//! Process-wide runtime tunables for an embedding application.
//!
//! This core library never requires a CLI or config file itself — every
//! tunable also has an environment-variable fallback so a bare `cargo run`
//! of a downstream binary works unconfigured. [`RuntimeConfig`] exists for
//! an embedder that wants to parse these from `std::env::args()` (or an
//! optional demonstration binary) the way the teacher's server parsed its
//! own `Config` with `clap`.

use clap::Parser;

use crate::cache::DEFAULT_CACHE_CAPACITY;

/// Thread count / cache tunables, parseable from CLI args or `WSI_`-prefixed
/// environment variables.
///
/// `threads` mirrors the plain `NUM_THREADS` variable read directly by
/// [`crate::runtime::global_pool`] (see §6 of the design doc): it is
/// duplicated here, under the `WSI_THREADS` name, only so an embedder that
/// already uses `RuntimeConfig` for its own CLI has one argument surface
/// rather than two. Reading `NUM_THREADS` itself still works regardless of
/// whether `RuntimeConfig` is used at all.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-tile-core")]
#[command(author, version, about = "Tile-read pipeline tunables", long_about = None)]
pub struct RuntimeConfig {
    /// Worker threads for the blended-finalize thread pool. 0 or unset means
    /// hardware concurrency.
    #[arg(long, default_value_t = 0, env = "WSI_THREADS")]
    pub threads: usize,

    /// Capacity, in tiles, of the process-wide tile cache.
    #[arg(long, default_value_t = DEFAULT_CACHE_CAPACITY, env = "WSI_CACHE_CAPACITY")]
    pub cache_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    /// Reject configurations that would make the cache unusable. Thread
    /// count has no invalid values: 0 is a legitimate "auto" sentinel.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_capacity == 0 {
            return Err("cache_capacity must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Apply `threads` as the `NUM_THREADS` environment variable so
    /// [`crate::runtime::global_pool`] picks it up on first access.
    ///
    /// Has no effect once the global pool has already been built; callers
    /// that want explicit control should call this before any tile read.
    pub fn apply_thread_count(&self) {
        if self.threads > 0 {
            std::env::set_var("NUM_THREADS", self.threads.to_string());
        }
    }
}
