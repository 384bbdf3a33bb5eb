pub mod navigation;

// ============================================================================
// Profiling Macros
// ============================================================================

/// Log a diagnostic every `$every` calls of a counter when `perf_stats` is enabled.
///
/// The counter is any expression yielding an integer (for example the number of
/// searches a pathfinder has served). With the feature disabled this expands to
/// an empty block and the arguments are not evaluated.
///
/// # Example
/// ```ignore
/// profile_log!(self.stats.searches, 100, "open cap now {}", self.stats.open_cap());
/// ```
#[macro_export]
#[cfg(feature = "perf_stats")]
macro_rules! profile_log {
    ($counter:expr, $every:expr, $($arg:tt)*) => {
        if $counter % $every == 0 {
            bevy::prelude::info!($($arg)*);
        }
    };
}

#[macro_export]
#[cfg(not(feature = "perf_stats"))]
macro_rules! profile_log {
    ($counter:expr, $every:expr, $($arg:tt)*) => {};
}
