//! Thin logging facade over the `log` crate.
//!
//! The web-server siblings this engine was split out of ban third-party
//! dependencies and hand-roll a stderr writer here instead. That restriction
//! doesn't apply to a protocol engine meant to be embedded in other
//! applications: callers already have a `log` implementation installed (or
//! don't care), so we forward to the facade rather than fighting over who
//! owns stderr. The macro names and call sites are unchanged.

/// Emit an INFO level log entry.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        ::log::info!($($arg)*);
    };
}

/// Emit a WARN level log entry.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        ::log::warn!($($arg)*);
    };
}

/// Emit an ERROR level log entry.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        ::log::error!($($arg)*);
    };
}

/// Emit a DEBUG level log entry, used on the hot path (per-record decisions)
/// where INFO would be too noisy.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        ::log::debug!($($arg)*);
    };
}
