pub mod backend;
pub mod backends;
pub mod catalogue;
pub mod copy;
pub mod cube;
pub mod dataset;
pub mod error;
pub mod fragment;
pub mod layout;
mod pool;
mod scheduler;
pub mod space;
pub mod store;
pub mod types;

pub use backend::{Backend, BackendConfig, DataAccessibility};
pub use backends::{MemBackend, MeteredBackend, PosixBackend};
pub use catalogue::{Catalogue, MemCatalogue};
pub use copy::{CopyPlan, copy_data};
pub use cube::{Hypercube, Range};
pub use dataset::Dataset;
pub use error::{NdStoreError, Result};
pub use fragment::{Fragment, FragmentDescriptor, FragmentStatus};
pub use layout::split::FragmentationMethod;
pub use space::Dataspace;
pub use store::{Store, StoreConfig};
pub use types::Dtype;
