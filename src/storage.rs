//! Recording storage
//!
//! Flash-backed store for finished recordings: bounded filenames with a
//! numeric sequence counter, a free-space gate sized against the partition
//! quota, and cleanup of abandoned files. Log-file rotation lives outside
//! this crate.

use crate::{FastrecError, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Maximum recording filename length, matching the device's fixed buffers
pub const MAX_FILENAME_LEN: usize = 32;

/// Filename validated against the device's length bound at construction
///
/// Replaces the firmware's fixed C string buffers: over-long names are an
/// error, never silently truncated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundedName(String);

impl BoundedName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(FastrecError::ConfigError("empty filename".into()));
        }
        if name.len() > MAX_FILENAME_LEN {
            return Err(FastrecError::ConfigError(format!(
                "filename '{}' exceeds {} characters",
                name, MAX_FILENAME_LEN
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BoundedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Directory-backed recording store with a partition quota
pub struct RecordingStore {
    root: PathBuf,
    /// Simulated partition size; free space is quota minus bytes used
    quota: u64,
    /// Next value of the numeric sequence counter
    next_seq: u32,
}

impl RecordingStore {
    /// Open a store rooted at `root`, creating the directory if needed
    ///
    /// Scans existing recordings to resume the sequence counter where the
    /// previous boot left off.
    pub fn open(root: impl Into<PathBuf>, quota: u64) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let mut max_seq = 0u32;
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if let Some(seq) = parse_seq(&entry.file_name().to_string_lossy()) {
                max_seq = max_seq.max(seq);
            }
        }
        debug!(root = %root.display(), next_seq = max_seq + 1, "recording store opened");

        Ok(Self {
            root,
            quota,
            next_seq: max_seq + 1,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bytes currently used by files under the store root
    pub fn used_space(&self) -> Result<u64> {
        let mut used = 0;
        for entry in fs::read_dir(&self.root)? {
            let meta = entry?.metadata()?;
            if meta.is_file() {
                used += meta.len();
            }
        }
        Ok(used)
    }

    /// Bytes still available under the partition quota
    pub fn free_space(&self) -> Result<u64> {
        Ok(self.quota.saturating_sub(self.used_space()?))
    }

    /// Check the free-space gate before a recording may start
    pub fn check_free_space(&self, required: u64) -> Result<()> {
        let available = self.free_space()?;
        if available < required {
            return Err(FastrecError::InsufficientSpace {
                required,
                available,
            });
        }
        Ok(())
    }

    /// Allocate the next recording filename
    ///
    /// Sequence-numbered by default; once the clock has been synchronized a
    /// timestamped name is used so recordings sort by wall time.
    pub fn next_recording_name(&mut self, synced_time: Option<DateTime<Utc>>) -> BoundedName {
        let name = match synced_time {
            Some(t) => format!("rec_{}.wav", t.format("%Y%m%d_%H%M%S")),
            None => format!("rec_{:04}.wav", self.next_seq),
        };
        self.next_seq += 1;
        // Both forms are well under the bound
        BoundedName::new(name).expect("generated name within bound")
    }

    /// Full path for a recording name
    pub fn path_for(&self, name: &BoundedName) -> PathBuf {
        self.root.join(name.as_str())
    }

    /// Remove a recording file, tolerating it already being gone
    pub fn remove(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = %path.display(), "failed to remove recording: {}", e);
                Err(e.into())
            }
        }
    }
}

fn parse_seq(name: &str) -> Option<u32> {
    name.strip_prefix("rec_")?
        .strip_suffix(".wav")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_bounded_name_limits() {
        assert!(BoundedName::new("rec_0001.wav").is_ok());
        assert!(BoundedName::new("").is_err());
        assert!(BoundedName::new("x".repeat(33)).is_err());
        assert!(BoundedName::new("x".repeat(32)).is_ok());
    }

    #[test]
    fn test_sequence_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordingStore::open(dir.path(), 1 << 20).unwrap();
        assert_eq!(store.next_recording_name(None).as_str(), "rec_0001.wav");
        assert_eq!(store.next_recording_name(None).as_str(), "rec_0002.wav");
    }

    #[test]
    fn test_sequence_resumes_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rec_0007.wav"), b"x").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), b"x").unwrap();

        let mut store = RecordingStore::open(dir.path(), 1 << 20).unwrap();
        assert_eq!(store.next_recording_name(None).as_str(), "rec_0008.wav");
    }

    #[test]
    fn test_timestamped_name_when_synced() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordingStore::open(dir.path(), 1 << 20).unwrap();
        let t = Utc.with_ymd_and_hms(2024, 5, 17, 12, 34, 56).unwrap();
        assert_eq!(
            store.next_recording_name(Some(t)).as_str(),
            "rec_20240517_123456.wav"
        );
    }

    #[test]
    fn test_free_space_gate() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordingStore::open(dir.path(), 1000).unwrap();
        assert!(store.check_free_space(500).is_ok());

        std::fs::write(dir.path().join("rec_0001.wav"), vec![0u8; 800]).unwrap();
        let err = store.check_free_space(500).unwrap_err();
        match err {
            FastrecError::InsufficientSpace {
                required,
                available,
            } => {
                assert_eq!(required, 500);
                assert_eq!(available, 200);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_remove_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordingStore::open(dir.path(), 1000).unwrap();
        assert!(store.remove(&dir.path().join("nope.wav")).is_ok());
    }
}
