//! Half-open integer hypercube algebra.
//!
//! Pure value-semantics building block for all region reasoning in the
//! scheduler: intersection, subtraction, coverage and the bounded
//! covering-subset enumeration used by redundancy pruning. Ranges are
//! half-open `[start, end)`; a range with `start == end` makes the whole
//! cube empty and empty cubes are dropped from sets.

/// One half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub start: i64,
    pub end: i64,
}

impl Range {
    pub fn new(start: i64, end: i64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn intersect(&self, other: &Range) -> Option<Range> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Range { start, end })
    }

    pub fn contains(&self, other: &Range) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// An N-dimensional half-open integer box.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hypercube {
    ranges: Vec<Range>,
}

impl Hypercube {
    pub fn new(ranges: Vec<Range>) -> Self {
        Self { ranges }
    }

    pub fn from_offset_size(offset: &[i64], size: &[i64]) -> Self {
        debug_assert_eq!(offset.len(), size.len());
        let ranges = offset
            .iter()
            .zip(size)
            .map(|(&o, &s)| Range::new(o, o + s))
            .collect();
        Self { ranges }
    }

    pub fn dims(&self) -> usize {
        self.ranges.len()
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn range(&self, dim: usize) -> Range {
        self.ranges[dim]
    }

    /// A copy with dimension `dim` replaced by `range`.
    pub fn with_range(&self, dim: usize, range: Range) -> Hypercube {
        let mut ranges = self.ranges.clone();
        ranges[dim] = range;
        Hypercube { ranges }
    }

    pub fn offset(&self) -> Vec<i64> {
        self.ranges.iter().map(|r| r.start).collect()
    }

    pub fn size(&self) -> Vec<i64> {
        self.ranges.iter().map(|r| r.len()).collect()
    }

    /// A 0-dimensional cube is a single point and therefore not empty.
    pub fn is_empty(&self) -> bool {
        self.ranges.iter().any(Range::is_empty)
    }

    pub fn element_count(&self) -> i64 {
        self.ranges.iter().map(Range::len).product()
    }

    pub fn intersect(&self, other: &Hypercube) -> Option<Hypercube> {
        debug_assert_eq!(self.dims(), other.dims());
        let ranges = self
            .ranges
            .iter()
            .zip(&other.ranges)
            .map(|(a, b)| a.intersect(b))
            .collect::<Option<Vec<_>>>()?;
        Some(Hypercube { ranges })
    }

    pub fn contains(&self, other: &Hypercube) -> bool {
        debug_assert_eq!(self.dims(), other.dims());
        self.ranges
            .iter()
            .zip(&other.ranges)
            .all(|(a, b)| a.contains(b))
    }

    /// `self` minus `other`, as a set of disjoint cubes.
    ///
    /// Classic axis sweep: per dimension peel off the slabs below and above
    /// the intersection, then clamp that dimension and continue inward.
    pub fn subtract(&self, other: &Hypercube) -> Vec<Hypercube> {
        let Some(inter) = self.intersect(other) else {
            return vec![self.clone()];
        };
        let mut pieces = Vec::new();
        let mut core = self.clone();
        for d in 0..self.dims() {
            let r = core.range(d);
            let i = inter.range(d);
            if r.start < i.start {
                pieces.push(core.with_range(d, Range::new(r.start, i.start)));
            }
            if i.end < r.end {
                pieces.push(core.with_range(d, Range::new(i.end, r.end)));
            }
            core = core.with_range(d, i);
        }
        pieces
    }
}

/// `region` minus the union of `cubes`, as a set of disjoint cubes.
pub fn subtract_all(region: &Hypercube, cubes: &[Hypercube]) -> Vec<Hypercube> {
    let mut remaining = vec![region.clone()];
    for cube in cubes {
        remaining = remaining.iter().flat_map(|r| r.subtract(cube)).collect();
        if remaining.is_empty() {
            break;
        }
    }
    remaining
}

/// Do `cubes` jointly cover all of `region`?
pub fn covers(cubes: &[Hypercube], region: &Hypercube) -> bool {
    subtract_all(region, cubes).is_empty()
}

/// How many covering-subset alternatives the enumerator examines at most.
///
/// A globally minimal cover is NP-hard; a small bounded enumeration is good
/// enough in practice and keeps the cost predictable.
pub const NONREDUNDANT_SUBSET_CAP: usize = 10;

/// One covering-subset candidate produced by [`nonredundant_subsets`].
#[derive(Debug, Clone)]
pub struct CoverAssignment {
    /// Indices into the input cube list, in claim order.
    pub members: Vec<usize>,
    /// For each member, the disjoint pieces of the region it is responsible
    /// for. Claims of different members never overlap and their union equals
    /// the part of `region` the whole input list covers.
    pub claims: Vec<Vec<Hypercube>>,
}

/// Enumerate up to `cap` non-redundant covering subsets of `cubes` against
/// `region`.
///
/// `tiers` partitions the cube indices into precedence classes: cubes in an
/// earlier tier always claim region before cubes in a later tier, and the
/// enumeration only permutes (rotates) cubes within a tier. A caller without
/// precedence requirements passes a single tier holding every index.
///
/// Every returned subset is non-redundant: each member holds a non-empty
/// claim no other member covers, so removing it would lose coverage.
pub fn nonredundant_subsets(
    cubes: &[Hypercube],
    tiers: &[Vec<usize>],
    region: &Hypercube,
    cap: usize,
) -> Vec<CoverAssignment> {
    let rotations = tiers
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(1)
        .clamp(1, cap.max(1));

    let mut out: Vec<CoverAssignment> = Vec::new();
    let mut seen: Vec<Vec<usize>> = Vec::new();

    for rot in 0..rotations {
        let mut claimed: Vec<Hypercube> = Vec::new();
        let mut members = Vec::new();
        let mut claims = Vec::new();

        for tier in tiers {
            for k in 0..tier.len() {
                let idx = tier[(k + rot) % tier.len()];
                let Some(bounded) = cubes[idx].intersect(region) else {
                    continue;
                };
                let pieces = subtract_all(&bounded, &claimed);
                if pieces.is_empty() {
                    continue;
                }
                claimed.push(bounded);
                members.push(idx);
                claims.push(pieces);
            }
        }

        let mut key = members.clone();
        key.sort_unstable();
        if !seen.contains(&key) {
            seen.push(key);
            out.push(CoverAssignment { members, claims });
        }
    }

    out
}
