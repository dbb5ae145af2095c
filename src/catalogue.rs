//! The fragment catalogue: which stored fragments exist, where, and in what
//! commit order.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cube::Hypercube;
use crate::error::{NdStoreError, Result};
use crate::fragment::FragmentDescriptor;

/// Catalogue of persisted fragments, shared across requests.
///
/// Implementations must be internally synchronized: registration happens
/// from worker threads while lookups run on caller threads.
pub trait Catalogue: Send + Sync {
    /// Monotonic stamp handed to each write request; fragments registered
    /// with a higher sequence shadow lower ones where their regions overlap.
    fn next_seq(&self) -> u64;

    /// Record a committed fragment. A descriptor with identical extents for
    /// the same dataset replaces the existing entry (last commit wins).
    fn register(&self, descriptor: FragmentDescriptor) -> Result<()>;

    /// Every stored fragment of `dataset` whose extents intersect `region`.
    fn lookup_fragments(&self, dataset: &str, region: &Hypercube) -> Result<Vec<FragmentDescriptor>>;

    /// Format the catalogue; with `enforce` any existing content is dropped.
    fn mkfs(&self, enforce: bool) -> Result<()>;
}

/// In-memory catalogue, the default for tests and single-process use.
#[derive(Default)]
pub struct MemCatalogue {
    seq: AtomicU64,
    fragments: Mutex<HashMap<String, Vec<FragmentDescriptor>>>,
}

impl MemCatalogue {
    pub fn new() -> MemCatalogue {
        MemCatalogue::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<FragmentDescriptor>>>> {
        self.fragments
            .lock()
            .map_err(|_| NdStoreError::Internal("catalogue lock poisoned"))
    }
}

impl Catalogue for MemCatalogue {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn register(&self, descriptor: FragmentDescriptor) -> Result<()> {
        let mut map = self.lock()?;
        let entries = map.entry(descriptor.dataset.clone()).or_default();
        if let Some(existing) = entries
            .iter_mut()
            .find(|d| d.extends() == descriptor.extends())
        {
            *existing = descriptor;
        } else {
            entries.push(descriptor);
        }
        Ok(())
    }

    fn lookup_fragments(&self, dataset: &str, region: &Hypercube) -> Result<Vec<FragmentDescriptor>> {
        let map = self.lock()?;
        Ok(map
            .get(dataset)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|d| d.extends().intersect(region).is_some())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn mkfs(&self, enforce: bool) -> Result<()> {
        if enforce {
            self.lock()?.clear();
        }
        Ok(())
    }
}
