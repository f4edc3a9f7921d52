#![forbid(unsafe_code)]

//! Zero-cost request-lifecycle tracing controlled by environment variable.
//!
//! Set `DGRID_DEBUG_TRACE=1` to print every request issue, supersession and
//! merge to stderr. When disabled (the default), each trace point is a single
//! static bool load.
//!
//! ```ignore
//! use dgrid_runtime::debug_trace;
//! debug_trace!("request {} issued at level {}", id, level);
//! ```

use std::sync::LazyLock;
use std::time::Instant;

static DEBUG_TRACE_ENABLED: LazyLock<bool> = LazyLock::new(|| {
    std::env::var("DGRID_DEBUG_TRACE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
});

static START_TIME: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Whether `DGRID_DEBUG_TRACE` enabled tracing.
#[inline]
pub fn is_enabled() -> bool {
    *DEBUG_TRACE_ENABLED
}

/// Milliseconds since the first trace call.
#[inline]
pub fn elapsed_ms() -> u64 {
    START_TIME.elapsed().as_millis() as u64
}

/// Print a timestamped line to stderr when tracing is enabled.
#[macro_export]
macro_rules! debug_trace {
    ($($arg:tt)*) => {
        if $crate::debug_trace::is_enabled() {
            eprintln!(
                "[DGRID {:>8}ms] {}",
                $crate::debug_trace::elapsed_ms(),
                format_args!($($arg)*)
            );
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_monotonic() {
        let _ = is_enabled();
        let t1 = elapsed_ms();
        let t2 = elapsed_ms();
        assert!(t2 >= t1);
    }

    #[test]
    fn macro_expands_in_expression_position() {
        let id = 7;
        debug_trace!("request {id} issued");
    }
}
