//! Process-wide thread pool used for the blended strategy's finalize pass.
//!
//! Sized from the `NUM_THREADS` environment variable, OpenMP-style: unset,
//! empty, non-numeric or negative values fall back to rayon's own default
//! (hardware concurrency); `0` explicitly means the same thing; any other
//! positive integer is used verbatim. Parsed once, lazily, on first access.

use std::sync::OnceLock;

fn thread_count_from_env() -> usize {
    match std::env::var("NUM_THREADS") {
        Ok(raw) => raw.trim().parse::<i64>().ok().filter(|&v| v >= 0).unwrap_or(0) as usize,
        Err(_) => 0,
    }
}

/// Returns the process-wide rayon pool, built on first access.
pub fn global_pool() -> &'static rayon::ThreadPool {
    static POOL: OnceLock<rayon::ThreadPool> = OnceLock::new();
    POOL.get_or_init(|| {
        let threads = thread_count_from_env();
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("wsi-pool-{i}"));
        if threads > 0 {
            builder = builder.num_threads(threads);
        }
        builder
            .build()
            .expect("failed to build the global tile-finalize thread pool")
    })
}

/// Run `f` on the global pool and block for its result, matching the
/// reference implementation's "submit then wait" finalize pattern.
pub fn run_on_global_pool<R: Send>(f: impl FnOnce() -> R + Send) -> R {
    global_pool().install(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_count_from_env_missing_is_zero() {
        std::env::remove_var("NUM_THREADS");
        assert_eq!(thread_count_from_env(), 0);
    }

    #[test]
    fn thread_count_from_env_invalid_falls_back_to_zero() {
        std::env::set_var("NUM_THREADS", "not-a-number");
        assert_eq!(thread_count_from_env(), 0);
        std::env::set_var("NUM_THREADS", "-3");
        assert_eq!(thread_count_from_env(), 0);
        std::env::remove_var("NUM_THREADS");
    }

    #[test]
    fn thread_count_from_env_valid_value_parses() {
        std::env::set_var("NUM_THREADS", "4");
        assert_eq!(thread_count_from_env(), 4);
        std::env::remove_var("NUM_THREADS");
    }

    #[test]
    fn global_pool_runs_work() {
        let result = run_on_global_pool(|| 2 + 2);
        assert_eq!(result, 4);
    }
}
