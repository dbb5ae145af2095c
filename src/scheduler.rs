//! The I/O scheduler: decomposes blocking read and write requests into
//! per-backend fragment tasks and reassembles read regions from whichever
//! stored fragments cover them.

use std::sync::Arc;

use crate::backend::Backend;
use crate::catalogue::Catalogue;
use crate::copy::{CopyPlan, copy_data};
use crate::cube::{
    CoverAssignment, Hypercube, NONREDUNDANT_SUBSET_CAP, nonredundant_subsets, subtract_all,
};
use crate::dataset::Dataset;
use crate::error::{NdStoreError, Result};
use crate::fragment::{Fragment, FragmentDescriptor, RawSpan};
use crate::layout::alloc::allocate_backends;
use crate::layout::split::recommend_split;
use crate::pool::{IoOp, IoTask, RequestStatus, TaskCallback, WorkerPool};
use crate::space::Dataspace;

/// A registered backend with its worker pool.
pub(crate) struct BackendHandle {
    pub backend: Arc<dyn Backend>,
    pub pool: WorkerPool,
}

/// Split a write across backends and fragments, dispatch, and wait.
pub(crate) fn write_request(
    handles: &[BackendHandle],
    catalogue: &Arc<dyn Catalogue>,
    dataset: &Dataset,
    buf: &[u8],
    space: &Dataspace,
) -> Result<()> {
    validate_request(handles, dataset, space, buf.len())?;
    if space.element_count() == 0 {
        return Ok(());
    }

    let weights: Vec<f32> = handles
        .iter()
        .map(|h| h.backend.estimate_throughput())
        .collect();
    let assignments = allocate_backends(space, &weights);

    let seq = catalogue.next_seq();
    let status = RequestStatus::new();
    let esize = space.dtype().size() as i64;
    // Write tasks only ever read through this pointer; the cast exists so
    // borrowed fragment spans have a single shape.
    let base = buf.as_ptr().cast_mut();

    // Build every task before submitting any: once a span into `buf` has
    // been handed to a pool this function must not return before wait().
    let mut tasks: Vec<(usize, IoTask)> = Vec::new();
    for (handle_idx, (handle, assignment)) in handles.iter().zip(&assignments).enumerate() {
        let Some(region) = assignment else { continue };
        let sub = space.for_region(region)?;
        let config = handle.backend.config();
        let cubes = recommend_split(&sub, config.max_fragment_size, config.fragmentation_method);
        for cube in cubes {
            if cube.is_empty() {
                continue;
            }
            let frag_space = space.for_region(&cube)?;
            let entry = space.element_offset(&cube.offset()) * esize;
            if entry < 0 {
                return Err(NdStoreError::Internal("fragment entry before buffer start"));
            }
            let len = borrowed_span_len(&frag_space);

            let mut fragment =
                Fragment::new(dataset.name(), handle.backend.name(), frag_space);
            // The span stays within `buf`: the cube is contained in the
            // validated user space, see the RawSpan contract.
            fragment.set_borrowed(base.wrapping_offset(entry as isize), len);

            let descriptor = FragmentDescriptor {
                dataset: dataset.name().to_string(),
                backend: handle.backend.name().to_string(),
                space: Dataspace::new(space.dtype(), &cube.size())?.with_offset(&cube.offset())?,
                seq,
            };
            let registry = Arc::clone(catalogue);
            let callback: TaskCallback =
                Box::new(move |_fragment: &mut Fragment| registry.register(descriptor));

            tasks.push((
                handle_idx,
                IoTask {
                    op: IoOp::Write,
                    fragment,
                    status: Arc::clone(&status),
                    callback: Some(callback),
                },
            ));
        }
    }

    log::debug!(
        "write '{}': {} fragment task(s) across {} backend(s)",
        dataset.name(),
        tasks.len(),
        assignments.iter().flatten().count()
    );
    for (handle_idx, task) in tasks {
        status.add_pending();
        handles[handle_idx].pool.submit(task);
    }
    status.wait()
}

/// Locate covering fragments, fill what nothing covers, dispatch retrieves,
/// gather into the user buffer, and wait.
pub(crate) fn read_request(
    handles: &[BackendHandle],
    catalogue: &Arc<dyn Catalogue>,
    dataset: &Dataset,
    buf: &mut [u8],
    space: &Dataspace,
) -> Result<Option<Vec<Hypercube>>> {
    validate_request(handles, dataset, space, buf.len())?;
    if space.element_count() == 0 {
        return Ok(None);
    }

    let region = space.extends();
    let candidates = catalogue.lookup_fragments(dataset.name(), &region)?;
    let retained = prune_candidates(&candidates, &region);
    log::debug!(
        "read '{}': {} candidate fragment(s), {} retained",
        dataset.name(),
        candidates.len(),
        retained.len()
    );

    // Coverage check happens before any buffer write so an uncoverable read
    // leaves the user buffer untouched.
    let claimed: Vec<Hypercube> = retained
        .iter()
        .flat_map(|(idx, _)| candidates[*idx].extends().intersect(&region))
        .collect();
    let uncovered = subtract_all(&region, &claimed);
    let fill_region = if uncovered.is_empty() {
        None
    } else {
        let Some(fill) = dataset.fill_value() else {
            return Err(NdStoreError::IncompleteData);
        };
        log::debug!(
            "read '{}': filling {} uncovered piece(s) from fill value",
            dataset.name(),
            uncovered.len()
        );
        for piece in &uncovered {
            let source = fill_source(space, piece)?;
            copy_data(&source, fill, space, buf)?;
        }
        Some(uncovered)
    };

    let status = RequestStatus::new();
    let base = buf.as_mut_ptr();
    let buf_len = buf.len();

    // Build every task before submitting any: once a span into `buf` has
    // been handed to a pool this function must not return before wait().
    let mut tasks: Vec<(usize, IoTask)> = Vec::new();
    for (idx, claims) in retained {
        let descriptor = &candidates[idx];
        let handle_idx = handles
            .iter()
            .position(|h| h.backend.name() == descriptor.backend)
            .ok_or(NdStoreError::Internal(
                "fragment references an unregistered backend",
            ))?;

        let stored = &descriptor.space;
        let frag_bytes = stored.byte_size();
        let mut fragment = Fragment::new(&descriptor.dataset, &descriptor.backend, stored.clone());

        // Direct-I/O shortcut: when the whole fragment is wanted and one
        // memcpy would place it, let the backend write straight into the
        // user buffer. The whole-fragment check is what keeps the span from
        // overshooting into neighbouring bytes.
        let whole = claims.len() == 1 && claims[0] == stored.extends();
        let mut direct = false;
        if whole {
            let plan = CopyPlan::new(stored, space)?;
            if plan.is_single_chunk() && plan.chunk_bytes() == frag_bytes {
                let entry = plan.dst_entry();
                if entry < 0 || entry as usize + frag_bytes > buf_len {
                    return Err(NdStoreError::Internal("direct span escapes user buffer"));
                }
                fragment.set_borrowed(base.wrapping_offset(entry), frag_bytes);
                direct = true;
            }
        }

        let callback: Option<TaskCallback> = if direct {
            None
        } else {
            let mut staging = Vec::new();
            staging
                .try_reserve_exact(frag_bytes)
                .map_err(|_| NdStoreError::OutOfMemory(frag_bytes))?;
            staging.resize(frag_bytes, 0);
            fragment.set_owned(staging);

            let user = RawSpan {
                ptr: base,
                len: buf_len,
            };
            let user_space = space.clone();
            Some(Box::new(move |fragment: &mut Fragment| {
                gather_claims(fragment, &claims, &user_space, &user)
            }))
        };

        tasks.push((
            handle_idx,
            IoTask {
                op: IoOp::Read,
                fragment,
                status: Arc::clone(&status),
                callback,
            },
        ));
    }

    for (handle_idx, task) in tasks {
        status.add_pending();
        handles[handle_idx].pool.submit(task);
    }
    status.wait()?;
    Ok(fill_region)
}

/// Reduce candidates to a minimal subset that still covers everything the
/// candidates cover, and assign each survivor the disjoint region pieces it
/// must deliver.
///
/// Commit sequence is a hard precedence: a fragment never claims region that
/// a strictly newer candidate covers, so the last successful commit wins.
/// Within one sequence the bounded enumeration tries a handful of claim
/// orders and keeps the alternative that reads the fewest bytes; it is
/// documented not to guarantee a global optimum.
fn prune_candidates(
    candidates: &[FragmentDescriptor],
    region: &Hypercube,
) -> Vec<(usize, Vec<Hypercube>)> {
    let mut bounded: Vec<usize> = (0..candidates.len())
        .filter(|&i| candidates[i].extends().intersect(region).is_some())
        .collect();
    if bounded.is_empty() {
        return Vec::new();
    }

    // Tiers by sequence, newest first; lookup order is kept within a tier.
    bounded.sort_by_key(|&i| std::cmp::Reverse(candidates[i].seq));
    let mut tiers: Vec<Vec<usize>> = Vec::new();
    for &i in &bounded {
        match tiers.last_mut() {
            Some(tier) if candidates[tier[0]].seq == candidates[i].seq => tier.push(i),
            _ => tiers.push(vec![i]),
        }
    }

    let cubes: Vec<Hypercube> = candidates.iter().map(FragmentDescriptor::extends).collect();
    let assignments = nonredundant_subsets(&cubes, &tiers, region, NONREDUNDANT_SUBSET_CAP);

    let mut best: Option<(i64, CoverAssignment)> = None;
    for assignment in assignments {
        let cost: i64 = assignment
            .members
            .iter()
            .map(|&i| candidates[i].space.element_count())
            .sum();
        if best.as_ref().is_none_or(|(c, _)| cost < *c) {
            best = Some((cost, assignment));
        }
    }

    match best {
        Some((_, assignment)) => assignment
            .members
            .into_iter()
            .zip(assignment.claims)
            .collect(),
        None => Vec::new(),
    }
}

/// Copy the claimed pieces of a retrieved fragment from its dense staging
/// buffer into the user buffer.
fn gather_claims(
    fragment: &Fragment,
    claims: &[Hypercube],
    user_space: &Dataspace,
    user: &RawSpan,
) -> Result<()> {
    let staging = fragment.bytes()?;
    let stored = fragment.space();
    let esize = stored.dtype().size() as i64;
    let strides = Dataspace::row_major_strides(stored.size());

    for piece in claims {
        // The piece addresses the staging buffer through the full fragment's
        // row-major strides, with the base advanced to the piece's origin.
        let entry: i64 = piece
            .offset()
            .iter()
            .zip(stored.offset())
            .zip(&strides)
            .map(|((&p, &o), &s)| (p - o) * s)
            .sum::<i64>()
            * esize;
        if entry < 0 {
            return Err(NdStoreError::Internal("claim precedes fragment origin"));
        }

        let source = Dataspace::new(stored.dtype(), &piece.size())?
            .with_offset(&piece.offset())?
            .with_stride(&strides)?;
        let plan = CopyPlan::new(&source, user_space)?;

        let (lo, hi) = plan.src_span();
        if lo < 0 || entry as usize + hi as usize > staging.len() {
            return Err(NdStoreError::Internal("gather escapes staging buffer"));
        }
        let (lo, hi) = plan.dst_span();
        if lo < 0 || hi as usize > user.len {
            return Err(NdStoreError::Internal("gather escapes user buffer"));
        }

        // SAFETY: both spans were just validated; claims of concurrent tasks
        // are pairwise disjoint, so no other worker touches these user bytes.
        unsafe { plan.execute(staging.as_ptr().add(entry as usize), user.ptr) };
    }
    Ok(())
}

/// Zero-stride source dataspace for fill-value broadcasts, sized from the
/// destination piece so the single fill element covers it exactly.
fn fill_source(user_space: &Dataspace, piece: &Hypercube) -> Result<Dataspace> {
    let zero = vec![0i64; piece.dims()];
    Dataspace::new(user_space.dtype(), &piece.size())?
        .with_offset(&piece.offset())?
        .with_stride(&zero)
}

/// Entry checks shared by both blocking paths. On failure nothing has been
/// dispatched and no byte of the user buffer has been touched.
fn validate_request(
    handles: &[BackendHandle],
    dataset: &Dataset,
    space: &Dataspace,
    buf_len: usize,
) -> Result<()> {
    if handles.is_empty() {
        return Err(NdStoreError::InvalidArgument("no backends registered"));
    }
    if space.dtype() != dataset.dtype() {
        return Err(NdStoreError::InvalidArgument(
            "dataspace element type does not match dataset",
        ));
    }
    if space.dims() != dataset.dataspace().dims() {
        return Err(NdStoreError::InvalidArgument(
            "dataspace dimensionality does not match dataset",
        ));
    }
    if space.element_count() == 0 {
        return Ok(());
    }
    if !dataset.dataspace().extends().contains(&space.extends()) {
        return Err(NdStoreError::InvalidArgument(
            "region exceeds dataset extents",
        ));
    }

    let esize = space.dtype().size() as i64;
    let strides = space.effective_strides();
    let mut lo = 0i64;
    let mut hi = 0i64;
    for (&size, &stride) in space.size().iter().zip(&strides) {
        let reach = (size - 1) * stride;
        if reach < 0 {
            lo += reach;
        } else {
            hi += reach;
        }
    }
    if lo < 0 {
        return Err(NdStoreError::InvalidArgument(
            "dataspace layout reaches before the buffer start",
        ));
    }
    if ((hi + 1) * esize) as usize > buf_len {
        return Err(NdStoreError::InvalidArgument(
            "buffer too small for dataspace",
        ));
    }
    Ok(())
}

/// Reachable byte length of a borrowed fragment span, measured from its
/// entry offset.
fn borrowed_span_len(space: &Dataspace) -> usize {
    let strides = space.effective_strides();
    let mut last = 0i64;
    for (&size, &stride) in space.size().iter().zip(&strides) {
        if size > 0 && stride > 0 {
            last += (size - 1) * stride;
        }
    }
    (last + 1) as usize * space.dtype().size()
}
