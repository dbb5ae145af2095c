//! Strided-to-strided N-dimensional copy planning and execution.
//!
//! The planner reduces an arbitrary pair of overlapping dataspaces to one
//! memcpy-shaped chunk plus a small set of loop dimensions carrying
//! *relative* byte strides, so the executor's inner body is pointer
//! arithmetic only, independent of dimensionality.

use std::cmp::Reverse;

use crate::cube::Hypercube;
use crate::error::{NdStoreError, Result};
use crate::space::Dataspace;

#[derive(Debug, Clone)]
pub struct CopyPlan {
    overlap: Option<Hypercube>,
    chunk_bytes: usize,
    src_entry: isize,
    dst_entry: isize,
    /// Loop extents, outermost first. Empty means a single memcpy.
    sizes: Vec<i64>,
    /// Absolute byte strides per loop dimension (for span validation).
    src_strides: Vec<isize>,
    dst_strides: Vec<isize>,
    /// Relative byte strides: the innermost is absolute, every outer one has
    /// the inner dimension's full sweep subtracted, so a counter wrap plus
    /// one addition lands on the next slice.
    rel_src: Vec<isize>,
    rel_dst: Vec<isize>,
}

impl CopyPlan {
    /// Plan a copy of the overlap of `src` and `dst`.
    pub fn new(src: &Dataspace, dst: &Dataspace) -> Result<CopyPlan> {
        if !src.is_copy_compatible(dst) {
            return Err(NdStoreError::InvalidArgument(
                "copy requires matching dims and element type",
            ));
        }
        let Some(overlap) = src.extends().intersect(&dst.extends()) else {
            return Ok(CopyPlan::noop());
        };

        let n = src.dims();
        let esize = src.dtype().size() as i64;
        let s_str = src.effective_strides();
        let d_str = dst.effective_strides();
        let osize = overlap.size();
        let ooff = overlap.offset();

        // Fuse dimensions into a single memcpy chunk: a dimension joins the
        // chunk when both spaces step through it with the same stride and
        // that stride equals the chunk built so far. A negative stride means
        // the chunk's first byte lives in the dimension's last slice, which
        // becomes a one-time origin adjustment.
        let mut picked = vec![false; n];
        let mut chunk_elems: i64 = 1;
        let mut src_adj: i64 = 0;
        let mut dst_adj: i64 = 0;
        // A dimension the overlap crosses only once never iterates; treating
        // it as fused keeps it out of the loop set and out of fusing's way.
        for d in 0..n {
            if osize[d] == 1 {
                picked[d] = true;
            }
        }
        loop {
            let mut found = None;
            for d in (0..n).rev() {
                if !picked[d] && s_str[d] == d_str[d] && s_str[d].abs() == chunk_elems {
                    found = Some(d);
                    break;
                }
            }
            let Some(d) = found else { break };
            picked[d] = true;
            if s_str[d] < 0 {
                src_adj += (osize[d] - 1) * s_str[d];
                dst_adj += (osize[d] - 1) * d_str[d];
            }
            chunk_elems *= osize[d];
            // A partially-covered dimension still fuses, but nothing beyond
            // it can: the next dimension would stride across the gap.
            if osize[d] != src.size()[d] || osize[d] != dst.size()[d] {
                break;
            }
        }

        // Remaining dimensions iterate as loops, least-local outermost.
        let mut rest: Vec<usize> = (0..n).filter(|&d| !picked[d]).collect();
        rest.sort_by_key(|&d| Reverse(s_str[d].abs().min(d_str[d].abs())));

        let m = rest.len();
        let sizes: Vec<i64> = rest.iter().map(|&d| osize[d]).collect();
        let src_b: Vec<i64> = rest.iter().map(|&d| s_str[d] * esize).collect();
        let dst_b: Vec<i64> = rest.iter().map(|&d| d_str[d] * esize).collect();

        let mut rel_src = src_b.clone();
        let mut rel_dst = dst_b.clone();
        for i in 0..m.saturating_sub(1) {
            rel_src[i] -= sizes[i + 1] * src_b[i + 1];
            rel_dst[i] -= sizes[i + 1] * dst_b[i + 1];
        }

        let mut src_entry = src_adj;
        let mut dst_entry = dst_adj;
        for d in 0..n {
            src_entry += (ooff[d] - src.offset()[d]) * s_str[d];
            dst_entry += (ooff[d] - dst.offset()[d]) * d_str[d];
        }

        Ok(CopyPlan {
            overlap: Some(overlap),
            chunk_bytes: (chunk_elems * esize) as usize,
            src_entry: (src_entry * esize) as isize,
            dst_entry: (dst_entry * esize) as isize,
            sizes,
            src_strides: src_b.iter().map(|&v| v as isize).collect(),
            dst_strides: dst_b.iter().map(|&v| v as isize).collect(),
            rel_src: rel_src.iter().map(|&v| v as isize).collect(),
            rel_dst: rel_dst.iter().map(|&v| v as isize).collect(),
        })
    }

    fn noop() -> CopyPlan {
        CopyPlan {
            overlap: None,
            chunk_bytes: 0,
            src_entry: 0,
            dst_entry: 0,
            sizes: Vec::new(),
            src_strides: Vec::new(),
            dst_strides: Vec::new(),
            rel_src: Vec::new(),
            rel_dst: Vec::new(),
        }
    }

    /// True when the spaces do not overlap and there is nothing to copy.
    pub fn is_noop(&self) -> bool {
        self.overlap.is_none()
    }

    /// True when the whole copy collapsed into one memcpy.
    pub fn is_single_chunk(&self) -> bool {
        self.overlap.is_some() && self.sizes.is_empty()
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    pub fn src_entry(&self) -> isize {
        self.src_entry
    }

    pub fn dst_entry(&self) -> isize {
        self.dst_entry
    }

    pub fn overlap(&self) -> Option<&Hypercube> {
        self.overlap.as_ref()
    }

    /// Reachable byte offsets `[lo, hi)` relative to the source base pointer.
    pub fn src_span(&self) -> (isize, isize) {
        span(self.src_entry, &self.sizes, &self.src_strides, self.chunk_bytes)
    }

    /// Reachable byte offsets `[lo, hi)` relative to the destination base.
    pub fn dst_span(&self) -> (isize, isize) {
        span(self.dst_entry, &self.sizes, &self.dst_strides, self.chunk_bytes)
    }

    /// Execute against slices, validating both spans first.
    pub fn run(&self, src_buf: &[u8], dst_buf: &mut [u8]) -> Result<()> {
        if self.overlap.is_none() {
            return Ok(());
        }
        let (lo, hi) = self.src_span();
        if lo < 0 || hi as usize > src_buf.len() {
            return Err(NdStoreError::InvalidArgument(
                "source buffer too small for copy",
            ));
        }
        let (lo, hi) = self.dst_span();
        if lo < 0 || hi as usize > dst_buf.len() {
            return Err(NdStoreError::InvalidArgument(
                "destination buffer too small for copy",
            ));
        }
        // SAFETY: both spans were just checked against the slice bounds.
        unsafe { self.execute(src_buf.as_ptr(), dst_buf.as_mut_ptr()) };
        Ok(())
    }

    /// Counter walk over the loop dimensions, one chunk copy per innermost
    /// step. Each counter increment adds the dimension's relative stride; a
    /// wrap carries into the next outer dimension.
    ///
    /// # Safety
    ///
    /// `src` and `dst` must stay valid for every byte offset in `src_span()`
    /// / `dst_span()`, and the two regions must not overlap in memory.
    pub(crate) unsafe fn execute(&self, src: *const u8, dst: *mut u8) {
        if self.overlap.is_none() {
            return;
        }
        // Pointer arithmetic uses wrapping_offset throughout: the walk may
        // step one stride past the span after the final chunk, and that
        // pointer is never dereferenced.
        let mut s = src.wrapping_offset(self.src_entry);
        let mut d = dst.wrapping_offset(self.dst_entry);

        if self.sizes.is_empty() {
            // SAFETY: chunk_bytes is within both validated spans.
            unsafe { std::ptr::copy_nonoverlapping(s, d, self.chunk_bytes) };
            return;
        }

        let n = self.sizes.len();
        let mut counters = vec![0i64; n];
        loop {
            // SAFETY: every dereferenced counter state lies inside the spans.
            unsafe { std::ptr::copy_nonoverlapping(s, d, self.chunk_bytes) };
            let mut dim = n - 1;
            loop {
                s = s.wrapping_offset(self.rel_src[dim]);
                d = d.wrapping_offset(self.rel_dst[dim]);
                counters[dim] += 1;
                if counters[dim] < self.sizes[dim] {
                    break;
                }
                counters[dim] = 0;
                if dim == 0 {
                    return;
                }
                dim -= 1;
            }
        }
    }
}

fn span(entry: isize, sizes: &[i64], strides: &[isize], chunk: usize) -> (isize, isize) {
    let mut lo = entry;
    let mut hi = entry;
    for (&size, &stride) in sizes.iter().zip(strides) {
        let reach = (size - 1) as isize * stride;
        if reach < 0 {
            lo += reach;
        } else {
            hi += reach;
        }
    }
    (lo, hi + chunk as isize)
}

/// Copy the overlap of `src` into `dst`, interpreting each buffer through its
/// dataspace. Spaces without overlap are a no-op.
pub fn copy_data(
    src: &Dataspace,
    src_buf: &[u8],
    dst: &Dataspace,
    dst_buf: &mut [u8],
) -> Result<()> {
    CopyPlan::new(src, dst)?.run(src_buf, dst_buf)
}
