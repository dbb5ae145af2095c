//! Fragment split recommendations.
//!
//! Given a write region and a backend's fragment-size preference, recommend a
//! set of hypercubes to materialize as fragments. Both methods produce an
//! exact partition of the region: integer-division slice boundaries make the
//! cover gap-free and overlap-free by construction.

use crate::cube::{Hypercube, Range};
use crate::space::Dataspace;

/// How a backend prefers its fragments cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentationMethod {
    /// Roughly cubical fragments, balanced across all dimensions.
    Equalized,
    /// Split along the least-local axis only, preserving memory locality.
    Contiguous,
}

/// Recommend a set of fragment cubes for `space`, each at most
/// `max_fragment_bytes` large (one element per fragment at minimum).
pub fn recommend_split(
    space: &Dataspace,
    max_fragment_bytes: usize,
    method: FragmentationMethod,
) -> Vec<Hypercube> {
    match method {
        FragmentationMethod::Equalized => split_equalized(space, max_fragment_bytes),
        FragmentationMethod::Contiguous => split_contiguous(space, max_fragment_bytes),
    }
}

fn split_equalized(space: &Dataspace, max_fragment_bytes: usize) -> Vec<Hypercube> {
    let size = space.size();
    let offset = space.offset();
    let n = size.len();

    let k = size.iter().filter(|&&s| s > 1).count();
    if k == 0 {
        return vec![space.extends()];
    }

    // Target edge length so that a k-cube of it holds max_fragment_bytes.
    let max_elems = (max_fragment_bytes / space.dtype().size()).max(1);
    let target = (max_elems as f64).powf(1.0 / k as f64);

    let factors: Vec<i64> = size
        .iter()
        .map(|&s| {
            if s <= 1 {
                1
            } else {
                ((s as f64 / target).ceil() as i64).clamp(1, s)
            }
        })
        .collect();

    let mut cubes = Vec::new();
    odometer(&factors, |coords| {
        let ranges = (0..n)
            .map(|d| {
                let lo = offset[d] + coords[d] * size[d] / factors[d];
                let hi = offset[d] + (coords[d] + 1) * size[d] / factors[d];
                Range::new(lo, hi)
            })
            .collect();
        cubes.push(Hypercube::new(ranges));
    });
    cubes
}

fn split_contiguous(space: &Dataspace, max_fragment_bytes: usize) -> Vec<Hypercube> {
    if space.byte_size() <= max_fragment_bytes.max(1) {
        return vec![space.extends()];
    }

    let size = space.size();
    let offset = space.offset();
    let strides = space.effective_strides();
    let n = size.len();
    if n == 0 {
        return vec![space.extends()];
    }

    // Most-local dimension first.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&d| strides[d].abs());

    // Walk outward accumulating whole dimensions until the next one would
    // exceed the budget; that one becomes the split dimension.
    let mut inner_bytes = space.dtype().size();
    let mut split_pos = order.len() - 1;
    for (pos, &d) in order.iter().enumerate() {
        let next = inner_bytes.saturating_mul(size[d].max(1) as usize);
        if next > max_fragment_bytes {
            split_pos = pos;
            break;
        }
        inner_bytes = next;
    }
    let split_dim = order[split_pos];

    // Elements of the split dimension per fragment, then equal slices.
    let per_slice = (max_fragment_bytes / inner_bytes).max(1) as i64;
    let dim_size = size[split_dim];
    let slice_count = ((dim_size + per_slice - 1) / per_slice).max(1);

    // Odometer counts: outer dimensions one element per slab, the split
    // dimension its slice count, inner dimensions intact.
    let mut counts = vec![1i64; n];
    for &d in &order[split_pos + 1..] {
        counts[d] = size[d].max(1);
    }
    counts[split_dim] = slice_count;

    let mut cubes = Vec::new();
    odometer(&counts, |coords| {
        let ranges = (0..n)
            .map(|d| {
                if d == split_dim {
                    let lo = offset[d] + coords[d] * size[d] / slice_count;
                    let hi = offset[d] + (coords[d] + 1) * size[d] / slice_count;
                    Range::new(lo, hi)
                } else if counts[d] > 1 {
                    Range::new(offset[d] + coords[d], offset[d] + coords[d] + 1)
                } else {
                    Range::new(offset[d], offset[d] + size[d])
                }
            })
            .collect();
        cubes.push(Hypercube::new(ranges));
    });
    cubes
}

/// Visit every coordinate of the cartesian product `[0, counts[d])`.
fn odometer(counts: &[i64], mut visit: impl FnMut(&[i64])) {
    if counts.iter().any(|&c| c <= 0) {
        return;
    }
    let n = counts.len();
    if n == 0 {
        visit(&[]);
        return;
    }
    let mut coords = vec![0i64; n];
    loop {
        visit(&coords);
        let mut d = n - 1;
        loop {
            coords[d] += 1;
            if coords[d] < counts[d] {
                break;
            }
            coords[d] = 0;
            if d == 0 {
                return;
            }
            d -= 1;
        }
    }
}
