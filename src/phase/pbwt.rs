use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::phase::coded_steps::CodedSteps;
use crate::phase::ibs2::Ibs2;
use crate::phase::phase_haps::PhaseHaps;

/**
 * Durbin's positional Burrows-Wheeler prefix and divergence arrays,
 * generalised to the multi-symbol alphabet of coded steps.
 *
 * After a forward update through step `t`, `a` orders the haplotypes by
 * reversed step-sequence prefix and `d[i]` is the first step of the
 * match between `a[i-1]` and `a[i]`: the two step sequences agree
 * exactly on `[d[i], t]`. The entries `d[0]` and `d[n]` hold the
 * sentinel `t + 2`. The backward sweep mirrors this with `d[i]` the
 * last step of the match and sentinels `t - 2`.
 */
pub struct PbwtDivUpdater {
    n_haps: usize,
    a_buf: Vec<Vec<u32>>,
    d_buf: Vec<Vec<i32>>,
    p: Vec<i32>,
}

impl PbwtDivUpdater {
    pub fn new(n_haps: usize) -> PbwtDivUpdater {
        PbwtDivUpdater {
            n_haps,
            a_buf: Vec::new(),
            d_buf: Vec::new(),
            p: Vec::new(),
        }
    }

    fn ensure_capacity(&mut self, n_seq: usize) {
        while self.a_buf.len() < n_seq {
            self.a_buf.push(Vec::new());
            self.d_buf.push(Vec::new());
            self.p.push(0);
        }
    }

    /// One forward update at step `step`. `seq[h]` is haplotype `h`'s
    /// sequence id; `a` has length `n_haps` and `d` length `n_haps + 1`.
    pub fn fwd_update(&mut self, seq: &[u32], n_seq: usize, step: i32, a: &mut [u32], d: &mut [i32]) {
        debug_assert_eq!(a.len(), self.n_haps);
        debug_assert_eq!(d.len(), self.n_haps + 1);
        self.ensure_capacity(n_seq);
        for c in 0..n_seq {
            self.p[c] = step + 1;
            self.a_buf[c].clear();
            self.d_buf[c].clear();
        }
        for i in 0..self.n_haps {
            // d[0] never exceeds the step + 1 initialisation, so the
            // boundary entry needs no special case
            let di = d[i];
            for c in 0..n_seq {
                if di > self.p[c] {
                    self.p[c] = di;
                }
            }
            let c = seq[a[i] as usize] as usize;
            self.a_buf[c].push(a[i]);
            self.d_buf[c].push(self.p[c]);
            self.p[c] = 0;
        }
        let mut idx = 0;
        for c in 0..n_seq {
            for (&aa, &dd) in self.a_buf[c].iter().zip(self.d_buf[c].iter()) {
                a[idx] = aa;
                d[idx] = dd;
                idx += 1;
            }
        }
        d[0] = step + 2;
        d[self.n_haps] = step + 2;
    }

    /// One backward update at step `step` (steps processed in
    /// decreasing order).
    pub fn bwd_update(&mut self, seq: &[u32], n_seq: usize, step: i32, a: &mut [u32], d: &mut [i32]) {
        debug_assert_eq!(a.len(), self.n_haps);
        debug_assert_eq!(d.len(), self.n_haps + 1);
        self.ensure_capacity(n_seq);
        for c in 0..n_seq {
            self.p[c] = step - 1;
            self.a_buf[c].clear();
            self.d_buf[c].clear();
        }
        for i in 0..self.n_haps {
            let di = d[i];
            for c in 0..n_seq {
                if di < self.p[c] {
                    self.p[c] = di;
                }
            }
            let c = seq[a[i] as usize] as usize;
            self.a_buf[c].push(a[i]);
            self.d_buf[c].push(self.p[c]);
            self.p[c] = i32::MAX;
        }
        let mut idx = 0;
        for c in 0..n_seq {
            for (&aa, &dd) in self.a_buf[c].iter().zip(self.d_buf[c].iter()) {
                a[idx] = aa;
                d[idx] = dd;
                idx += 1;
            }
        }
        d[0] = step - 2;
        d[self.n_haps] = step - 2;
    }
}

/**
 * PBWT-based IBS neighbour selection. For every (target haplotype,
 * step), the forward and backward sweeps each select one random IBS
 * candidate from the haplotypes adjacent in the prefix array, skipping
 * the haplotype's own sample and any sample that is IBS2 with the
 * target at either endpoint of the step. Sweeps run over step batches
 * in parallel, each batch warmed by a buffer of steps outside it.
 */
pub struct PbwtPhaseIbs {
    fwd_match: Vec<i32>,
    bwd_match: Vec<i32>,
    n_targ_haps: usize,
}

impl PbwtPhaseIbs {
    pub fn new(
        haps: &PhaseHaps,
        steps: &CodedSteps,
        ibs2: &Ibs2,
        max_candidates: usize,
        buffer_steps: usize,
        seed: u64,
    ) -> PbwtPhaseIbs {
        let n_steps = steps.n_steps();
        let n_targ_haps = haps.n_targ_haps();
        let n_batches = n_steps.min(4 * rayon::current_num_threads()).max(1);
        let batch_bounds: Vec<(usize, usize)> = (0..n_batches)
            .map(|b| (b * n_steps / n_batches, (b + 1) * n_steps / n_batches))
            .collect();

        let fwd_rows: Vec<Vec<i32>> = batch_bounds
            .par_iter()
            .enumerate()
            .map(|(b, &(lo, hi))| {
                sweep(
                    haps,
                    steps,
                    ibs2,
                    max_candidates,
                    buffer_steps,
                    seed.wrapping_add(b as u64),
                    lo,
                    hi,
                    false,
                )
            })
            .collect();
        let bwd_rows: Vec<Vec<i32>> = batch_bounds
            .par_iter()
            .enumerate()
            .map(|(b, &(lo, hi))| {
                sweep(
                    haps,
                    steps,
                    ibs2,
                    max_candidates,
                    buffer_steps,
                    seed.wrapping_add(0x9e37_79b9).wrapping_add(b as u64),
                    lo,
                    hi,
                    true,
                )
            })
            .collect();

        let mut fwd_match = vec![-1i32; n_steps * n_targ_haps];
        let mut bwd_match = vec![-1i32; n_steps * n_targ_haps];
        for (b, &(lo, _)) in batch_bounds.iter().enumerate() {
            let f = &fwd_rows[b];
            let g = &bwd_rows[b];
            fwd_match[lo * n_targ_haps..lo * n_targ_haps + f.len()].copy_from_slice(f);
            bwd_match[lo * n_targ_haps..lo * n_targ_haps + g.len()].copy_from_slice(g);
        }
        PbwtPhaseIbs {
            fwd_match,
            bwd_match,
            n_targ_haps,
        }
    }

    /// Forward-sweep neighbour of `targ_hap` at `step`, or -1.
    pub fn fwd_match(&self, step: usize, targ_hap: usize) -> i32 {
        self.fwd_match[step * self.n_targ_haps + targ_hap]
    }

    /// Backward-sweep neighbour of `targ_hap` at `step`, or -1.
    pub fn bwd_match(&self, step: usize, targ_hap: usize) -> i32 {
        self.bwd_match[step * self.n_targ_haps + targ_hap]
    }
}

/// Runs one direction's sweep over the batch `[lo, hi)`, returning the
/// selected neighbour per (step in batch, target haplotype).
#[allow(clippy::too_many_arguments)]
fn sweep(
    haps: &PhaseHaps,
    steps: &CodedSteps,
    ibs2: &Ibs2,
    max_candidates: usize,
    buffer_steps: usize,
    seed: u64,
    lo: usize,
    hi: usize,
    backward: bool,
) -> Vec<i32> {
    let n_haps = haps.n_haps();
    let n_targ_haps = haps.n_targ_haps();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut upd = PbwtDivUpdater::new(n_haps);
    let mut a: Vec<u32> = (0..n_haps as u32).collect();
    let mut d: Vec<i32> = vec![0; n_haps + 1];
    let mut out = vec![-1i32; (hi - lo) * n_targ_haps];

    let sweep_steps: Vec<usize> = if backward {
        let warm_hi = (hi + buffer_steps).min(steps.n_steps());
        (lo..warm_hi).rev().collect()
    } else {
        let warm_lo = lo.saturating_sub(buffer_steps);
        (warm_lo..hi).collect()
    };
    if let Some(&first) = sweep_steps.first() {
        d.iter_mut().for_each(|x| *x = first as i32);
    }
    for &t in &sweep_steps {
        if backward {
            upd.bwd_update(steps.seq(t), steps.n_seq(t) as usize, t as i32, &mut a, &mut d);
        } else {
            upd.fwd_update(steps.seq(t), steps.n_seq(t) as usize, t as i32, &mut a, &mut d);
        }
        if t < lo || t >= hi {
            continue;
        }
        let row = (t - lo) * n_targ_haps;
        let step_first = steps.step_start(t) as u32;
        let step_last = (steps.step_end(t) - 1) as u32;
        for i in 0..n_haps {
            let hap = a[i] as usize;
            if hap >= n_targ_haps {
                continue;
            }
            let m = select_candidate(
                haps,
                ibs2,
                &a,
                &d,
                i,
                t as i32,
                max_candidates,
                step_first,
                step_last,
                backward,
                &mut rng,
            );
            out[row + hap] = m;
        }
    }
    out
}

/// Expands a half-open candidate window `[u, v)` outward from position
/// `i`, advancing the bound whose current match end is closer to the
/// step, then picks a random admissible candidate by circular scan.
#[allow(clippy::too_many_arguments)]
fn select_candidate(
    haps: &PhaseHaps,
    ibs2: &Ibs2,
    a: &[u32],
    d: &[i32],
    i: usize,
    step: i32,
    max_candidates: usize,
    step_first: u32,
    step_last: u32,
    backward: bool,
    rng: &mut StdRng,
) -> i32 {
    let n = a.len();
    let hap = a[i] as usize;
    let targ_sample = hap >> 1;
    let mut u = i;
    let mut v = i + 1;
    let mut u_div = d[i];
    let mut v_div = d[i + 1];
    if backward {
        while v - u < max_candidates && (u_div >= step || v_div >= step) {
            if u_div >= v_div && u > 0 {
                u -= 1;
                u_div = u_div.min(d[u]);
            } else if v < n && v_div >= step {
                v += 1;
                v_div = v_div.min(d[v]);
            } else if u > 0 && u_div >= step {
                u -= 1;
                u_div = u_div.min(d[u]);
            } else {
                break;
            }
        }
    } else {
        while v - u < max_candidates && (u_div <= step || v_div <= step) {
            if u_div <= v_div && u > 0 {
                u -= 1;
                u_div = u_div.max(d[u]);
            } else if v < n && v_div <= step {
                v += 1;
                v_div = v_div.max(d[v]);
            } else if u > 0 && u_div <= step {
                u -= 1;
                u_div = u_div.max(d[u]);
            } else {
                break;
            }
        }
    }

    let n_cand = v - u;
    if n_cand <= 1 {
        return -1;
    }
    let start = rng.gen_range(0..n_cand);
    for j in 0..n_cand {
        let cand = a[u + (start + j) % n_cand] as usize;
        if cand == hap {
            continue;
        }
        let cand_sample = cand >> 1;
        if cand_sample == targ_sample {
            continue;
        }
        if ibs2.are_ibs2(targ_sample, cand_sample as u32, step_first)
            || ibs2.are_ibs2(targ_sample, cand_sample as u32, step_last)
        {
            continue;
        }
        return cand as i32;
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Brute-force first step of the suffix match between two step
    /// sequences ending at `t`.
    fn match_start(seqs: &[Vec<u32>], h1: usize, h2: usize, t: usize) -> i32 {
        let mut s = t as i32 + 1;
        for k in (0..=t).rev() {
            if seqs[h1][k] != seqs[h2][k] {
                break;
            }
            s = k as i32;
        }
        s
    }

    #[test]
    fn fwd_divergence_matches_brute_force() {
        // 10 haplotypes, 5 steps, small alphabet
        let seqs: Vec<Vec<u32>> = (0..10)
            .map(|h| (0..5).map(|k| ((h * (k + 2) + k * k) % 3) as u32).collect())
            .collect();
        let n_haps = seqs.len();
        let mut upd = PbwtDivUpdater::new(n_haps);
        let mut a: Vec<u32> = (0..n_haps as u32).collect();
        let mut d: Vec<i32> = vec![0; n_haps + 1];
        for t in 0..5usize {
            let step_syms: Vec<u32> = (0..n_haps).map(|h| seqs[h][t]).collect();
            upd.fwd_update(&step_syms, 3, t as i32, &mut a, &mut d);
            // the suffix starting at a[i] matches the suffix at a[i-1]
            // exactly on steps [d[i], t]
            for i in 1..n_haps {
                let expect = match_start(&seqs, a[i - 1] as usize, a[i] as usize, t);
                assert_eq!(d[i], expect, "step {} position {}", t, i);
            }
            assert_eq!(d[0], t as i32 + 2);
            assert_eq!(d[n_haps], t as i32 + 2);
        }
    }

    #[test]
    fn bwd_divergence_matches_brute_force() {
        let seqs: Vec<Vec<u32>> = (0..8)
            .map(|h| (0..6).map(|k| ((h + k * (h + 1)) % 2) as u32).collect())
            .collect();
        let n_haps = seqs.len();
        let n_steps = 6usize;
        let match_end = |h1: usize, h2: usize, t: usize| -> i32 {
            let mut e = t as i32 - 1;
            for k in t..n_steps {
                if seqs[h1][k] != seqs[h2][k] {
                    break;
                }
                e = k as i32;
            }
            e
        };
        let mut upd = PbwtDivUpdater::new(n_haps);
        let mut a: Vec<u32> = (0..n_haps as u32).collect();
        let mut d: Vec<i32> = vec![(n_steps - 1) as i32; n_haps + 1];
        for t in (0..n_steps).rev() {
            let step_syms: Vec<u32> = (0..n_haps).map(|h| seqs[h][t]).collect();
            upd.bwd_update(&step_syms, 2, t as i32, &mut a, &mut d);
            for i in 1..n_haps {
                let expect = match_end(a[i - 1] as usize, a[i] as usize, t);
                assert_eq!(d[i], expect, "step {} position {}", t, i);
            }
        }
    }
}
