//! In-memory backend: a synchronized map from storage key to dense bytes.
//!
//! Useful for tests and for exercising the inline-execution path (a config
//! with a zero thread budget runs tasks on the caller's thread).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::backend::{Backend, BackendConfig};
use crate::error::{NdStoreError, Result};
use crate::fragment::{Fragment, FragmentStatus};

pub struct MemBackend {
    name: String,
    config: BackendConfig,
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemBackend {
    pub fn new(name: impl Into<String>, config: BackendConfig) -> MemBackend {
        MemBackend {
            name: name.into(),
            config,
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Number of stored fragment objects.
    pub fn object_count(&self) -> usize {
        self.objects.lock().map(|m| m.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.objects
            .lock()
            .map_err(|_| NdStoreError::Internal("object store lock poisoned"))
    }
}

impl Backend for MemBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn commit(&self, fragment: &mut Fragment) -> Result<()> {
        let payload = fragment.pack_dense()?.into_owned();
        self.lock()?.insert(fragment.storage_key(), payload);
        fragment.set_status(FragmentStatus::Persisted);
        Ok(())
    }

    fn retrieve(&self, fragment: &mut Fragment) -> Result<()> {
        let key = fragment.storage_key();
        let objects = self.lock()?;
        let Some(stored) = objects.get(&key) else {
            return Err(NdStoreError::Parse("fragment object missing"));
        };
        let buf = fragment.bytes_mut()?;
        if stored.len() != buf.len() {
            return Err(NdStoreError::Parse("fragment payload length mismatch"));
        }
        buf.copy_from_slice(stored);
        drop(objects);
        fragment.set_status(FragmentStatus::Loaded);
        Ok(())
    }

    fn mkfs(&self, enforce: bool) -> Result<()> {
        if enforce {
            self.lock()?.clear();
        }
        Ok(())
    }
}
