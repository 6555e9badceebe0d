//! Configuration management for pouchstore
//!
//! Provides presets for the two operating modes (buffered and write-through)
//! and an overlay type for partial overrides. Resolution order is:
//! built-in default, then driver defaults, then caller overrides.
//! The effective configuration is frozen once the store is constructed.

use std::time::Duration;

/// Wrapper configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Maximum resident clean entries before eviction triggers.
    /// Zero disables caching of clean reads entirely.
    pub cache: usize,
    /// Interval between periodic flushes.
    /// Zero disables buffering: every mutation goes straight to the driver.
    pub write_interval: Duration,
    /// Whether values are JSON-serialized at the driver boundary.
    /// When false, values must be JSON strings and pass through raw.
    pub json: bool,
}

impl Config {
    /// Buffered mode: bounded read cache, writes coalesced every 100ms.
    pub fn buffered() -> Self {
        Self {
            cache: 1000,
            write_interval: Duration::from_millis(100),
            json: true,
        }
    }

    /// Write-through mode: no cache, no buffering. Every operation is a
    /// driver round-trip. Suitable for ephemeral backends.
    pub fn immediate() -> Self {
        Self {
            cache: 0,
            write_interval: Duration::ZERO,
            json: true,
        }
    }

    /// True when mutations bypass the buffer and hit the driver directly.
    pub fn is_write_through(&self) -> bool {
        self.write_interval.is_zero()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::buffered()
    }
}

/// Partial configuration supplied by the caller at store construction.
///
/// Unset fields fall back to the driver's defaults, then to the built-in
/// defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigOverrides {
    pub cache: Option<usize>,
    pub write_interval: Option<Duration>,
    pub json: Option<bool>,
}

impl ConfigOverrides {
    /// Resolve the effective configuration against a base.
    pub fn over(self, base: Config) -> Config {
        Config {
            cache: self.cache.unwrap_or(base.cache),
            write_interval: self.write_interval.unwrap_or(base.write_interval),
            json: self.json.unwrap_or(base.json),
        }
    }
}
