//! Throughput-weighted distribution of a write region across backends.

use crate::cube::{Hypercube, Range};
use crate::space::Dataspace;

/// Split `space` across backends proportionally to `weights`.
///
/// The split runs along the splittable dimension of maximum effective stride
/// (the outermost iterable axis), which keeps the per-backend fragment count
/// low. Backends whose share rounds to an empty interval get `None`. When no
/// dimension is splittable the whole region goes to the heaviest backend.
pub fn allocate_backends(space: &Dataspace, weights: &[f32]) -> Vec<Option<Hypercube>> {
    let extends = space.extends();
    if weights.is_empty() {
        return Vec::new();
    }
    if weights.len() == 1 {
        return vec![Some(extends)];
    }

    let size = space.size();
    let strides = space.effective_strides();

    // Splittable dimension of maximum |effective stride|; first wins on ties.
    let mut split_dim = None;
    for d in 0..size.len() {
        if size[d] > 1
            && split_dim.is_none_or(|best: usize| strides[d].abs() > strides[best].abs())
        {
            split_dim = Some(d);
        }
    }

    let Some(split_dim) = split_dim else {
        // Nothing to split: hand everything to the fastest backend.
        let mut best = 0;
        for (i, &w) in weights.iter().enumerate() {
            if w > weights[best] {
                best = i;
            }
        }
        return (0..weights.len())
            .map(|i| (i == best).then(|| extends.clone()))
            .collect();
    };

    let clamped: Vec<f64> = weights.iter().map(|&w| f64::from(w.max(0.0))).collect();
    let total: f64 = clamped.iter().sum();
    let uniform = 1.0 / weights.len() as f64;

    let range = extends.range(split_dim);
    let len = range.len() as f64;
    let mut bounds = Vec::with_capacity(weights.len() + 1);
    bounds.push(range.start);
    let mut cum = 0.0;
    for (i, &w) in clamped.iter().enumerate() {
        cum += if total > 0.0 { w / total } else { uniform };
        let b = if i + 1 == weights.len() {
            range.end
        } else {
            range.start + (cum * len).round() as i64
        };
        bounds.push(b.clamp(range.start, range.end));
    }

    (0..weights.len())
        .map(|i| {
            let r = Range::new(bounds[i].min(bounds[i + 1]), bounds[i + 1]);
            (!r.is_empty()).then(|| extends.with_range(split_dim, r))
        })
        .collect()
}
