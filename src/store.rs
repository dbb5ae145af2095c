//! The store context object: registered backends, the catalogue, and the
//! blocking public API.

use std::sync::Arc;

use crate::backend::{Backend, DataAccessibility};
use crate::catalogue::Catalogue;
use crate::cube::Hypercube;
use crate::dataset::Dataset;
use crate::error::{NdStoreError, Result};
use crate::pool::WorkerPool;
use crate::scheduler::{self, BackendHandle};
use crate::space::Dataspace;

/// Process geometry used to budget worker threads per backend.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub procs_per_node: usize,
    pub total_procs: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            procs_per_node: 1,
            total_procs: 1,
        }
    }
}

/// Explicit context for all scheduler entry points; construct one per
/// process (or per test) instead of relying on process-wide state.
pub struct Store {
    handles: Vec<BackendHandle>,
    catalogue: Arc<dyn Catalogue>,
    config: StoreConfig,
}

impl Store {
    pub fn new(config: StoreConfig, catalogue: Arc<dyn Catalogue>) -> Store {
        Store {
            handles: Vec::new(),
            catalogue,
            config,
        }
    }

    /// Register a backend and spin up its worker pool.
    ///
    /// The thread count is the per-node budget divided across local
    /// processes, additionally capped by the global budget for globally
    /// accessible backends. A resulting count of zero means the backend runs
    /// inline on caller threads.
    pub fn register_backend(&mut self, backend: Arc<dyn Backend>) -> Result<()> {
        if self
            .handles
            .iter()
            .any(|h| h.backend.name() == backend.name())
        {
            return Err(NdStoreError::InvalidArgument("duplicate backend name"));
        }

        let config = backend.config();
        let local = config
            .max_threads_per_node
            .div_ceil(self.config.procs_per_node.max(1));
        let threads = match config.data_accessibility {
            DataAccessibility::Global => local.min(
                config
                    .max_global_threads
                    .div_ceil(self.config.total_procs.max(1)),
            ),
            DataAccessibility::Local => local,
        };
        log::debug!(
            "using {} worker thread(s) for backend '{}'",
            threads,
            backend.name()
        );

        let pool = WorkerPool::new(Arc::clone(&backend), threads)?;
        self.handles.push(BackendHandle { backend, pool });
        Ok(())
    }

    pub fn catalogue(&self) -> &Arc<dyn Catalogue> {
        &self.catalogue
    }

    /// Write `buf`, interpreted through `space`, into the dataset. Blocks
    /// until every fragment has been committed; returns the first backend
    /// error if any fragment failed (fragments that committed stay in the
    /// catalogue).
    pub fn write_blocking(&self, dataset: &Dataset, buf: &[u8], space: &Dataspace) -> Result<()> {
        scheduler::write_request(&self.handles, &self.catalogue, dataset, buf, space)
    }

    /// Read the region described by `space` into `buf`. Blocks until the
    /// region is assembled; on success returns the pieces (if any) that no
    /// stored fragment covered and that were filled from the fill value.
    pub fn read_blocking(
        &self,
        dataset: &Dataset,
        buf: &mut [u8],
        space: &Dataspace,
    ) -> Result<Option<Vec<Hypercube>>> {
        scheduler::read_request(&self.handles, &self.catalogue, dataset, buf, space)
    }

    /// Format the catalogue and every backend whose accessibility matches
    /// `target`. The first failure is reported after all delegates ran.
    pub fn mkfs(&self, enforce: bool, target: DataAccessibility) -> Result<()> {
        let mut first_error = None;
        if let Err(e) = self.catalogue.mkfs(enforce)
            && first_error.is_none()
        {
            first_error = Some(e);
        }
        for handle in &self.handles {
            if handle.backend.config().data_accessibility != target {
                continue;
            }
            if let Err(e) = handle.backend.mkfs(enforce)
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
