//! Utility functions and types

pub mod data_loader;
pub mod stats;

pub use data_loader::{DataLoader, DataSaver};

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Wall-clock timer for logging stage durations
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed milliseconds, logged at debug level
    pub fn finish(self) -> f64 {
        let ms = self.elapsed().as_secs_f64() * 1000.0;
        tracing::debug!(stage = %self.name, elapsed_ms = ms, "Stage finished");
        ms
    }
}

/// Write to a temporary sibling, then rename into place
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b.bin");
        write_atomic(&path, b"abc").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        assert!(!dir.path().join("a").join("b.bin.tmp").exists());
    }

    #[test]
    fn test_timer_reports_elapsed() {
        let timer = Timer::new("noop");
        assert!(timer.finish() >= 0.0);
    }
}
