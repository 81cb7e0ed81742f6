//! Structured logging setup and the process-wide mutable log level.
//!
//! The level is modelled as a [`reload::Handle`] rather than a global
//! atomic cell: readers (the `tracing` dispatch machinery) stay lock-free,
//! writers (the `log_level` control command) are rare, and there is no
//! global singleton to smuggle the handle through — callers are handed one
//! explicitly at startup and thread it into the [`crate::dispatcher::Dispatcher`].

use std::str::FromStr;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, Registry};

/// A handle to the process-wide log level, safe to clone and share.
#[derive(Clone)]
pub struct LevelHandle(reload::Handle<LevelFilter, Registry>);

impl LevelHandle {
    /// Parses `level` as a standard level name and installs it atomically.
    /// A no-op, successfully, if the new level equals the current one.
    pub fn set(&self, level: &str) -> Result<(), String> {
        let level = LevelFilter::from_str(level).map_err(|_| format!("invalid log level: {level}"))?;
        self.0.reload(level).map_err(|err| err.to_string())
    }

    /// A handle backed by its own subscriber, for tests that only need to
    /// exercise `set` without asserting on formatted output.
    #[cfg(test)]
    pub fn for_testing() -> Self {
        let (filter, handle) = reload::Layer::new(LevelFilter::INFO);
        let _ = tracing_subscriber::registry().with(filter).try_init();
        LevelHandle(handle)
    }
}

/// Installs the global `tracing` subscriber with `initial_level` (falling
/// back to `info` if it does not parse) and returns a handle for later
/// runtime changes.
pub fn init(initial_level: &str) -> LevelHandle {
    let initial = LevelFilter::from_str(initial_level).unwrap_or(LevelFilter::INFO);
    let (filter, handle) = reload::Layer::new(initial);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();

    LevelHandle(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_rejects_unknown_level_names() {
        let handle = LevelHandle::for_testing();
        assert!(handle.set("not-a-level").is_err());
    }

    #[test]
    fn set_accepts_standard_level_names() {
        let handle = LevelHandle::for_testing();
        assert!(handle.set("debug").is_ok());
        assert!(handle.set("warn").is_ok());
    }
}
