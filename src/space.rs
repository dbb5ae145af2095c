//! Dataspaces: offset/size/stride descriptions of N-dimensional regions.
//!
//! A dataspace serves double duty: it names a logical region of a dataset's
//! index space, and it describes how that region is laid out in a flat
//! buffer. The buffer position of logical point `p` is
//! `sum((p[d] - offset[d]) * stride[d])` elements from the buffer start;
//! when no stride is set the layout is row-major contiguous over `size`.

use crate::cube::Hypercube;
use crate::error::{NdStoreError, Result};
use crate::types::Dtype;

#[derive(Debug, Clone, PartialEq)]
pub struct Dataspace {
    dtype: Dtype,
    size: Vec<i64>,
    offset: Vec<i64>,
    stride: Option<Vec<i64>>,
}

impl Dataspace {
    /// A zero-offset region of the given extents, row-major contiguous.
    pub fn new(dtype: Dtype, size: &[i64]) -> Result<Self> {
        if size.iter().any(|&s| s < 0) {
            return Err(NdStoreError::InvalidArgument("negative extent"));
        }
        Ok(Self {
            dtype,
            offset: vec![0; size.len()],
            size: size.to_vec(),
            stride: None,
        })
    }

    pub fn with_offset(mut self, offset: &[i64]) -> Result<Self> {
        if offset.len() != self.size.len() {
            return Err(NdStoreError::InvalidArgument(
                "offset dimensionality mismatch",
            ));
        }
        self.offset = offset.to_vec();
        Ok(self)
    }

    /// Override the element strides (signed, per dimension).
    pub fn with_stride(mut self, stride: &[i64]) -> Result<Self> {
        if stride.len() != self.size.len() {
            return Err(NdStoreError::InvalidArgument(
                "stride dimensionality mismatch",
            ));
        }
        self.stride = Some(stride.to_vec());
        Ok(self)
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn dims(&self) -> usize {
        self.size.len()
    }

    pub fn size(&self) -> &[i64] {
        &self.size
    }

    pub fn offset(&self) -> &[i64] {
        &self.offset
    }

    pub fn stride(&self) -> Option<&[i64]> {
        self.stride.as_deref()
    }

    pub fn element_count(&self) -> i64 {
        self.size.iter().product()
    }

    pub fn byte_size(&self) -> usize {
        self.element_count() as usize * self.dtype.size()
    }

    /// Row-major strides for the given extents: innermost 1, each outer
    /// dimension the product of everything inside it.
    pub fn row_major_strides(size: &[i64]) -> Vec<i64> {
        let n = size.len();
        let mut strides = vec![1i64; n];
        for d in (0..n.saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * size[d + 1];
        }
        strides
    }

    /// The explicit strides if set, else the row-major fill.
    pub fn effective_strides(&self) -> Vec<i64> {
        self.stride
            .clone()
            .unwrap_or_else(|| Self::row_major_strides(&self.size))
    }

    /// The logical region this space occupies.
    pub fn extends(&self) -> Hypercube {
        Hypercube::from_offset_size(&self.offset, &self.size)
    }

    /// Two dataspaces can copy into each other iff dims and type agree.
    pub fn is_copy_compatible(&self, other: &Dataspace) -> bool {
        self.dims() == other.dims() && self.dtype == other.dtype
    }

    /// Same dims/size/type, explicit row-major strides, zero offset.
    pub fn make_contiguous(&self) -> Dataspace {
        Dataspace {
            dtype: self.dtype,
            offset: vec![0; self.size.len()],
            stride: Some(Self::row_major_strides(&self.size)),
            size: self.size.clone(),
        }
    }

    /// Same region, dense row-major layout. This is the shape of a fragment
    /// as stored: offsets kept for overlap reasoning, strides dropped.
    pub fn dense_layout(&self) -> Dataspace {
        Dataspace {
            dtype: self.dtype,
            offset: self.offset.clone(),
            size: self.size.clone(),
            stride: None,
        }
    }

    /// Restrict to a sub-region, keeping this space's buffer layout.
    ///
    /// The strides are materialized so that the sub-space still addresses the
    /// parent buffer correctly even when the parent was implicit row-major.
    pub fn for_region(&self, region: &Hypercube) -> Result<Dataspace> {
        if region.dims() != self.dims() {
            return Err(NdStoreError::InvalidArgument(
                "region dimensionality mismatch",
            ));
        }
        if !self.extends().contains(region) {
            return Err(NdStoreError::InvalidArgument(
                "region not contained in dataspace",
            ));
        }
        Ok(Dataspace {
            dtype: self.dtype,
            size: region.size(),
            offset: region.offset(),
            stride: Some(self.effective_strides()),
        })
    }

    /// Restrict to `[offset, offset + size)`, keeping this space's layout.
    pub fn subspace(&self, size: &[i64], offset: &[i64]) -> Result<Dataspace> {
        if size.len() != self.dims() || offset.len() != self.dims() {
            return Err(NdStoreError::InvalidArgument(
                "subspace dimensionality mismatch",
            ));
        }
        self.for_region(&Hypercube::from_offset_size(offset, size))
    }

    /// Element offset of logical point `point` from the buffer start.
    pub fn element_offset(&self, point: &[i64]) -> i64 {
        let strides = self.effective_strides();
        point
            .iter()
            .zip(&self.offset)
            .zip(&strides)
            .map(|((&p, &o), &s)| (p - o) * s)
            .sum()
    }
}
