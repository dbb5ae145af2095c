//! The storage-backend abstraction consumed by the scheduler.

use crate::error::Result;
use crate::fragment::Fragment;
use crate::layout::split::FragmentationMethod;

/// Where a backend's data can be reached from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataAccessibility {
    /// Reachable from the local node only.
    Local,
    /// Reachable from every node.
    Global,
}

/// Static per-backend configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Upper bound on one fragment's dense byte size.
    pub max_fragment_size: usize,
    pub fragmentation_method: FragmentationMethod,
    /// Worker-thread budget per node; zero means inline execution on the
    /// caller's thread.
    pub max_threads_per_node: usize,
    /// Worker-thread budget across all nodes, applied when the backend is
    /// globally accessible.
    pub max_global_threads: usize,
    pub data_accessibility: DataAccessibility,
    /// Throughput assumed before any traffic has been observed. Only the
    /// relative magnitude across backends matters.
    pub estimated_throughput: f32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            max_fragment_size: 16 * 1024 * 1024,
            fragmentation_method: FragmentationMethod::Contiguous,
            max_threads_per_node: num_cpus::get(),
            max_global_threads: 64,
            data_accessibility: DataAccessibility::Global,
            estimated_throughput: 100.0,
        }
    }
}

/// A storage plug-in.
///
/// `commit` and `retrieve` are called concurrently from worker threads for
/// distinct fragments and must tolerate that. Known implementations are
/// enumerated at registration time; there is no inheritance tree.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn config(&self) -> &BackendConfig;

    /// Persist the fragment's bytes (laid out per its dataspace) together
    /// with enough metadata for a later retrieve of the same region.
    fn commit(&self, fragment: &mut Fragment) -> Result<()>;

    /// Load the fragment's bytes from storage into its buffer. The buffer is
    /// provided by the caller and holds the region dense row-major.
    fn retrieve(&self, fragment: &mut Fragment) -> Result<()>;

    /// Fast and non-blocking; the answer may be stale.
    fn estimate_throughput(&self) -> f32 {
        self.config().estimated_throughput
    }

    /// Format the backing store. With `enforce`, existing data is destroyed.
    fn mkfs(&self, _enforce: bool) -> Result<()> {
        Ok(())
    }
}
