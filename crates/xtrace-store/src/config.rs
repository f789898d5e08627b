//! Store configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default staleness window after which an unused cached file handle is
/// eligible for eviction.
pub const DEFAULT_HANDLE_VALID_FOR: Duration = Duration::from_millis(500);

/// Default sleep interval for the index updater when no deltas are pending.
pub const DEFAULT_UPDATER_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for a [`crate::ReportStore`].
///
/// The root directory is the only required input; it must already exist and
/// be writable. Everything else has production defaults; tests shrink
/// `updater_interval` to quiesce quickly.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root of the report tree; also hosts the embedded metadata index.
    pub root: PathBuf,
    /// Staleness window for cached append handles.
    pub handle_valid_for: Duration,
    /// Updater sleep interval between empty drain attempts.
    pub updater_interval: Duration,
}

impl StoreConfig {
    /// Configuration with default tunables for the given root directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            handle_valid_for: DEFAULT_HANDLE_VALID_FOR,
            updater_interval: DEFAULT_UPDATER_INTERVAL,
        }
    }

    /// Override the handle staleness window.
    #[must_use]
    pub fn with_handle_valid_for(mut self, valid_for: Duration) -> Self {
        self.handle_valid_for = valid_for;
        self
    }

    /// Override the updater sleep interval.
    #[must_use]
    pub fn with_updater_interval(mut self, interval: Duration) -> Self {
        self.updater_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::new("/tmp/xtrace");
        assert_eq!(config.handle_valid_for, DEFAULT_HANDLE_VALID_FOR);
        assert_eq!(config.updater_interval, DEFAULT_UPDATER_INTERVAL);
        assert_eq!(config.root, PathBuf::from("/tmp/xtrace"));
    }

    #[test]
    fn test_builders_override() {
        let config = StoreConfig::new("/tmp/xtrace")
            .with_handle_valid_for(Duration::from_millis(20))
            .with_updater_interval(Duration::from_millis(50));
        assert_eq!(config.handle_valid_for, Duration::from_millis(20));
        assert_eq!(config.updater_interval, Duration::from_millis(50));
    }
}
