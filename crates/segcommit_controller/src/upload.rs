//! Storage for segments uploaded through the controller.

use crate::error::{ControllerError, ControllerResult};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Stores segment files uploaded during a split commit.
///
/// The controller never holds a segment lock while calling into this trait.
pub trait SegmentUploadStore: Send + Sync {
    /// Stores `data` under `location`.
    fn put(&self, location: &str, data: Bytes) -> ControllerResult<()>;

    /// Removes an upload that will never be committed.
    fn delete(&self, location: &str) -> ControllerResult<()>;
}

/// An in-memory upload store.
#[derive(Debug, Default)]
pub struct MemoryUploadStore {
    objects: RwLock<HashMap<String, Bytes>>,
    fail_puts: AtomicBool,
}

impl MemoryUploadStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the object stored at `location`.
    pub fn get(&self, location: &str) -> Option<Bytes> {
        self.objects.read().get(location).cloned()
    }

    /// Returns the number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Makes subsequent puts fail (for testing).
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

impl SegmentUploadStore for MemoryUploadStore {
    fn put(&self, location: &str, data: Bytes) -> ControllerResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(ControllerError::Storage(format!(
                "upload to {location} rejected"
            )));
        }
        self.objects.write().insert(location.to_string(), data);
        Ok(())
    }

    fn delete(&self, location: &str) -> ControllerResult<()> {
        self.objects.write().remove(location);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let store = MemoryUploadStore::new();
        assert!(store.is_empty());

        store.put("seg.tmp.1", Bytes::from_static(b"abc")).unwrap();
        assert_eq!(store.get("seg.tmp.1").unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(store.len(), 1);

        store.delete("seg.tmp.1").unwrap();
        assert!(store.get("seg.tmp.1").is_none());
    }

    #[test]
    fn failing_puts() {
        let store = MemoryUploadStore::new();
        store.set_fail_puts(true);
        let err = store.put("x", Bytes::new()).unwrap_err();
        assert!(err.is_server_error());
        assert!(store.is_empty());
    }
}
