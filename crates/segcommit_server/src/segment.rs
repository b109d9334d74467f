//! Building and storing segments on the server.

use crate::error::{ServerError, ServerResult};
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// A built, immutable segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentArtifact {
    segment_name: String,
    end_offset: u64,
    row_count: u64,
    data: Bytes,
}

impl SegmentArtifact {
    /// Creates an artifact.
    pub fn new(segment_name: impl Into<String>, end_offset: u64, row_count: u64, data: Bytes) -> Self {
        Self {
            segment_name: segment_name.into(),
            end_offset,
            row_count,
            data,
        }
    }

    /// Returns the segment name.
    pub fn segment_name(&self) -> &str {
        &self.segment_name
    }

    /// Returns the offset the segment ends at.
    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    /// Returns the number of rows.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Returns the segment bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Returns the size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Consumes the stream and turns consumed rows into segments.
pub trait SegmentBuilder: Send + Sync {
    /// Consumes until `target` and returns the offset actually reached.
    fn catch_up(&self, segment_name: &str, target: u64) -> ServerResult<u64>;

    /// Builds the segment covering everything up to `end_offset`.
    fn build(&self, segment_name: &str, end_offset: u64) -> ServerResult<SegmentArtifact>;
}

/// A builder producing deterministic synthetic segments.
///
/// Each offset is one row. Used by the simulator and in tests.
#[derive(Debug, Default)]
pub struct SyntheticSegmentBuilder {
    consumed: RwLock<HashMap<String, u64>>,
    build_delay: Duration,
    builds: AtomicU64,
    fail_builds: AtomicBool,
}

impl SyntheticSegmentBuilder {
    /// Creates a builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every build take at least `delay`.
    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = delay;
        self
    }

    /// Returns the offset consumed so far for a segment.
    pub fn consumed(&self, segment_name: &str) -> Option<u64> {
        self.consumed.read().get(segment_name).copied()
    }

    /// Returns the number of builds performed.
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::SeqCst)
    }

    /// Makes subsequent builds fail (for testing).
    pub fn set_fail_builds(&self, fail: bool) {
        self.fail_builds.store(fail, Ordering::SeqCst);
    }
}

impl SegmentBuilder for SyntheticSegmentBuilder {
    fn catch_up(&self, segment_name: &str, target: u64) -> ServerResult<u64> {
        let mut consumed = self.consumed.write();
        let reached = consumed.entry(segment_name.to_string()).or_insert(0);
        *reached = (*reached).max(target);
        Ok(*reached)
    }

    fn build(&self, segment_name: &str, end_offset: u64) -> ServerResult<SegmentArtifact> {
        if self.fail_builds.load(Ordering::SeqCst) {
            return Err(ServerError::Build(format!("{segment_name}: builder unavailable")));
        }
        if !self.build_delay.is_zero() {
            std::thread::sleep(self.build_delay);
        }

        let mut data = BytesMut::with_capacity(segment_name.len() + 16);
        data.put_slice(segment_name.as_bytes());
        data.put_u8(b'@');
        data.put_u64(end_offset);

        self.builds.fetch_add(1, Ordering::SeqCst);
        self.consumed
            .write()
            .insert(segment_name.to_string(), end_offset);
        Ok(SegmentArtifact::new(
            segment_name,
            end_offset,
            end_offset,
            data.freeze(),
        ))
    }
}

/// Where the server keeps built segments.
pub trait SegmentStore: Send + Sync {
    /// Returns the location used when the controller assigns none.
    fn local_location(&self, segment_name: &str) -> String;

    /// Writes an artifact to `location`.
    fn store(&self, location: &str, artifact: &SegmentArtifact) -> ServerResult<()>;

    /// Removes whatever is stored at `location`. Missing files are fine.
    fn remove(&self, location: &str) -> ServerResult<()>;
}

/// A segment store on a local directory.
///
/// Only the last path component of a location is used, so deep-store
/// locations like `s3://bucket/table/segment` land in the directory as
/// `segment`.
#[derive(Debug, Clone)]
pub struct LocalSegmentStore {
    root: PathBuf,
}

impl LocalSegmentStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> ServerResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| ServerError::Storage(format!("{}: {e}", root.display())))?;
        Ok(Self { root })
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the file a location maps to.
    pub fn local_path(&self, location: &str) -> PathBuf {
        let file = location
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(location);
        self.root.join(file)
    }
}

impl SegmentStore for LocalSegmentStore {
    fn local_location(&self, segment_name: &str) -> String {
        self.root.join(segment_name).display().to_string()
    }

    fn store(&self, location: &str, artifact: &SegmentArtifact) -> ServerResult<()> {
        let path = self.local_path(location);
        fs::write(&path, artifact.data())
            .map_err(|e| ServerError::Storage(format!("{}: {e}", path.display())))
    }

    fn remove(&self, location: &str) -> ServerResult<()> {
        let path = self.local_path(location);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ServerError::Storage(format!("{}: {e}", path.display()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SEGMENT: &str = "events__0__1__20240101T0000Z";

    #[test]
    fn synthetic_builds_are_deterministic() {
        let builder = SyntheticSegmentBuilder::new();
        let a = builder.build(SEGMENT, 100).unwrap();
        let b = builder.build(SEGMENT, 100).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.end_offset(), 100);
        assert_eq!(builder.builds(), 2);
        assert_ne!(a.data(), builder.build(SEGMENT, 101).unwrap().data());
    }

    #[test]
    fn catch_up_never_goes_backwards() {
        let builder = SyntheticSegmentBuilder::new();
        assert_eq!(builder.catch_up(SEGMENT, 50).unwrap(), 50);
        assert_eq!(builder.catch_up(SEGMENT, 40).unwrap(), 50);
        assert_eq!(builder.consumed(SEGMENT), Some(50));
    }

    #[test]
    fn failing_builds() {
        let builder = SyntheticSegmentBuilder::new();
        builder.set_fail_builds(true);
        assert!(matches!(
            builder.build(SEGMENT, 1),
            Err(ServerError::Build(_))
        ));
    }

    #[test]
    fn local_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = LocalSegmentStore::open(dir.path().join("segments")).unwrap();
        let artifact = SyntheticSegmentBuilder::new().build(SEGMENT, 7).unwrap();

        let location = store.local_location(SEGMENT);
        store.store(&location, &artifact).unwrap();
        let on_disk = fs::read(store.local_path(&location)).unwrap();
        assert_eq!(on_disk, artifact.data().to_vec());

        store.remove(&location).unwrap();
        assert!(!store.local_path(&location).exists());
        // Removing twice is fine.
        store.remove(&location).unwrap();
    }

    #[test]
    fn deep_store_locations_map_to_file_name() {
        let dir = tempdir().unwrap();
        let store = LocalSegmentStore::open(dir.path()).unwrap();
        assert_eq!(
            store.local_path("s3://bucket/events/seg.tmp.1"),
            dir.path().join("seg.tmp.1")
        );
    }
}
