//! Fragments: addressable pieces of a dataset, and the descriptors the
//! catalogue keeps for them across requests.

use std::borrow::Cow;

use crate::copy::CopyPlan;
use crate::cube::Hypercube;
use crate::error::{NdStoreError, Result};
use crate::space::Dataspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentStatus {
    NotLoaded,
    Loaded,
    Persisted,
}

/// A raw span into the caller's buffer.
///
/// SAFETY contract: a `RawSpan` is only ever created by the scheduler from
/// the buffer of an in-flight blocking request. The caller is parked on the
/// request latch until every task referencing the span has completed, and
/// concurrent tasks of one request touch pairwise disjoint spans, so sending
/// the pointer to a worker thread cannot outlive or alias the borrow.
pub(crate) struct RawSpan {
    pub ptr: *mut u8,
    pub len: usize,
}

unsafe impl Send for RawSpan {}
unsafe impl Sync for RawSpan {}

enum FragmentBuf {
    /// No buffer attached; nothing to read or write yet.
    Unset,
    /// Borrowed from the caller's buffer for the duration of one request.
    Borrowed(RawSpan),
    /// Staging buffer owned by the fragment, freed on task completion.
    Owned(Vec<u8>),
}

/// A piece of a dataset bound to one backend.
///
/// The dataspace names the fragment's region within the dataset's index
/// space and how its bytes are laid out in the attached buffer. The backend
/// identity is fixed at construction and never reassigned.
pub struct Fragment {
    dataset: String,
    backend: String,
    space: Dataspace,
    buf: FragmentBuf,
    status: FragmentStatus,
}

impl Fragment {
    pub fn new(dataset: &str, backend: &str, space: Dataspace) -> Fragment {
        Fragment {
            dataset: dataset.to_string(),
            backend: backend.to_string(),
            space,
            buf: FragmentBuf::Unset,
            status: FragmentStatus::NotLoaded,
        }
    }

    /// A fragment carrying its own data, e.g. for seeding a backend directly.
    pub fn with_data(dataset: &str, backend: &str, space: Dataspace, data: Vec<u8>) -> Fragment {
        let mut fragment = Fragment::new(dataset, backend, space);
        fragment.buf = FragmentBuf::Owned(data);
        fragment.status = FragmentStatus::Loaded;
        fragment
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset
    }

    pub fn backend_id(&self) -> &str {
        &self.backend
    }

    pub fn space(&self) -> &Dataspace {
        &self.space
    }

    pub fn status(&self) -> FragmentStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: FragmentStatus) {
        self.status = status;
    }

    pub(crate) fn set_borrowed(&mut self, ptr: *mut u8, len: usize) {
        self.buf = FragmentBuf::Borrowed(RawSpan { ptr, len });
    }

    pub(crate) fn set_owned(&mut self, data: Vec<u8>) {
        self.buf = FragmentBuf::Owned(data);
    }

    /// Drop the buffer; borrowed spans simply detach.
    pub(crate) fn release_buf(&mut self) {
        self.buf = FragmentBuf::Unset;
    }

    /// The fragment's data, laid out per its dataspace.
    pub fn bytes(&self) -> Result<&[u8]> {
        match &self.buf {
            FragmentBuf::Unset => Err(NdStoreError::Internal("fragment has no buffer")),
            // SAFETY: per the RawSpan contract the span is valid for the
            // duration of the task borrowing this fragment.
            FragmentBuf::Borrowed(span) => {
                Ok(unsafe { std::slice::from_raw_parts(span.ptr, span.len) })
            }
            FragmentBuf::Owned(data) => Ok(data),
        }
    }

    /// Mutable view of the fragment's buffer, for backends to retrieve into.
    pub fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        match &mut self.buf {
            FragmentBuf::Unset => Err(NdStoreError::Internal("fragment has no buffer")),
            // SAFETY: see bytes(); spans of concurrent tasks are disjoint.
            FragmentBuf::Borrowed(span) => {
                Ok(unsafe { std::slice::from_raw_parts_mut(span.ptr, span.len) })
            }
            FragmentBuf::Owned(data) => Ok(data),
        }
    }

    /// The fragment's content in dense row-major order, for persisting.
    ///
    /// Borrows the attached buffer when the layout is already dense,
    /// otherwise gathers through the copy planner.
    pub fn pack_dense(&self) -> Result<Cow<'_, [u8]>> {
        let bytes = self.bytes()?;
        let dense = self.space.dense_layout();
        let plan = CopyPlan::new(&self.space, &dense)?;
        let byte_size = self.space.byte_size();
        if plan.is_single_chunk() && plan.src_entry() == 0 && plan.chunk_bytes() == byte_size {
            if bytes.len() < byte_size {
                return Err(NdStoreError::Internal("fragment buffer shorter than region"));
            }
            return Ok(Cow::Borrowed(&bytes[..byte_size]));
        }
        let mut packed = Vec::new();
        packed
            .try_reserve_exact(byte_size)
            .map_err(|_| NdStoreError::OutOfMemory(byte_size))?;
        packed.resize(byte_size, 0);
        plan.run(bytes, &mut packed)?;
        Ok(Cow::Owned(packed))
    }

    /// Deterministic storage key shared with the descriptor form.
    pub fn storage_key(&self) -> String {
        storage_key(&self.dataset, &self.space)
    }
}

/// What the catalogue persists about a fragment across requests: stable
/// identifiers instead of pointers, plus the stored layout (always dense
/// row-major over the fragment's extents).
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentDescriptor {
    pub dataset: String,
    pub backend: String,
    pub space: Dataspace,
    /// Catalogue commit sequence. Where stored regions overlap, a higher
    /// sequence shadows a lower one: the last successful commit wins.
    pub seq: u64,
}

impl FragmentDescriptor {
    pub fn extends(&self) -> Hypercube {
        self.space.extends()
    }

    pub fn storage_key(&self) -> String {
        storage_key(&self.dataset, &self.space)
    }
}

pub(crate) fn storage_key(dataset: &str, space: &Dataspace) -> String {
    let join = |vals: &[i64]| {
        vals.iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("x")
    };
    format!(
        "{}/{}__{}.frag",
        dataset,
        join(space.offset()),
        join(space.size())
    )
}
