//! Datasets: named typed logical hypercubes.

use crate::error::{NdStoreError, Result};
use crate::space::Dataspace;
use crate::types::Dtype;

/// A named, typed, N-dimensional logical array.
///
/// The dataspace fixes the dataset's extents; the optional fill value (one
/// element of the dataset's type, held as raw bytes) defines what a read
/// returns for indices never written.
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    space: Dataspace,
    fill_value: Option<Vec<u8>>,
}

impl Dataset {
    pub fn create(name: impl Into<String>, space: Dataspace) -> Result<Dataset> {
        let name = name.into();
        if name.is_empty() || name.contains('/') {
            return Err(NdStoreError::InvalidArgument(
                "dataset name must be non-empty and slash-free",
            ));
        }
        Ok(Dataset {
            name,
            space,
            fill_value: None,
        })
    }

    /// Attach a fill value; `element` must be exactly one element of the
    /// dataset's type.
    pub fn with_fill_value(mut self, element: &[u8]) -> Result<Dataset> {
        if element.len() != self.space.dtype().size() {
            return Err(NdStoreError::InvalidArgument(
                "fill value size does not match element type",
            ));
        }
        self.fill_value = Some(element.to_vec());
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dataspace(&self) -> &Dataspace {
        &self.space
    }

    pub fn dtype(&self) -> Dtype {
        self.space.dtype()
    }

    pub fn fill_value(&self) -> Option<&[u8]> {
        self.fill_value.as_deref()
    }
}
