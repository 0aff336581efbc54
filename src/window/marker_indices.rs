use std::sync::Arc;

/**
 * Per-window bidirectional map between reference marker indices and
 * target marker indices, plus the splice points at which adjacent
 * windows' outputs are joined.
 *
 * `targ_to_ref` is strictly increasing; `ref_to_targ[m]` is `-1` when
 * reference marker `m` is absent from the target. Splice points are the
 * midpoints of the leading and trailing overlap regions, computed in
 * reference coordinates and translated to target coordinates by
 * lower-bound search on `targ_to_ref`.
 */
#[derive(Clone, Debug)]
pub struct MarkerIndices {
    targ_to_ref: Arc<[u32]>,
    ref_to_targ: Arc<[i32]>,
    prev_splice: usize,
    next_splice: usize,
}

impl MarkerIndices {
    pub fn new(in_target: &[bool], prev_overlap: usize, next_overlap: usize) -> MarkerIndices {
        let n_ref = in_target.len();
        assert!(prev_overlap + next_overlap <= n_ref);
        let targ_to_ref: Vec<u32> = in_target
            .iter()
            .enumerate()
            .filter(|&(_, &t)| t)
            .map(|(m, _)| m as u32)
            .collect();
        let mut ref_to_targ = vec![-1i32; n_ref];
        for (j, &m) in targ_to_ref.iter().enumerate() {
            ref_to_targ[m as usize] = j as i32;
        }
        let prev_splice_ref = prev_overlap / 2;
        let next_splice_ref = (n_ref - next_overlap) + next_overlap / 2;
        let prev_splice = targ_to_ref.partition_point(|&r| (r as usize) < prev_splice_ref);
        let next_splice = targ_to_ref.partition_point(|&r| (r as usize) < next_splice_ref);
        MarkerIndices {
            targ_to_ref: targ_to_ref.into(),
            ref_to_targ: ref_to_targ.into(),
            prev_splice,
            next_splice,
        }
    }

    pub fn n_targ_markers(&self) -> usize {
        self.targ_to_ref.len()
    }

    pub fn n_ref_markers(&self) -> usize {
        self.ref_to_targ.len()
    }

    pub fn targ_to_ref(&self, j: usize) -> usize {
        self.targ_to_ref[j] as usize
    }

    pub fn targ_to_ref_slice(&self) -> &[u32] {
        &self.targ_to_ref
    }

    pub fn ref_to_targ(&self, m: usize) -> i32 {
        self.ref_to_targ[m]
    }

    /// First target marker emitted by this window.
    pub fn prev_splice(&self) -> usize {
        self.prev_splice
    }

    /// One past the last target marker emitted by this window.
    pub fn next_splice(&self) -> usize {
        self.next_splice
    }
}
