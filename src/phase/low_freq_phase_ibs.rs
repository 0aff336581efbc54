use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::phase::coded_steps::CodedSteps;
use crate::phase::fixed_phase_data::{CarrierList, FixedPhaseData};
use crate::phase::phase_haps::PhaseHaps;

/**
 * Best-match selection for haplotypes that share a low-frequency
 * variant. Each step is seeded with the per-allele carrier lists of the
 * low-frequency alleles at markers mapping into the step (both
 * haplotypes of each target carrier sample plus the exact reference
 * carrier haplotypes). Lists are repeatedly split by the coded sequence
 * at the following steps; a list stays alive while it holds at least
 * two haplotypes from distinct samples, and every target haplotype is
 * assigned a random distinct-sample partner from the last live list
 * that contained it.
 */
pub struct LowFreqPhaseIbs {
    matches: Vec<i32>,
    n_targ_haps: usize,
}

impl LowFreqPhaseIbs {
    pub fn new(
        fpd: &FixedPhaseData,
        haps: &PhaseHaps,
        steps: &CodedSteps,
        seed: u64,
    ) -> LowFreqPhaseIbs {
        let n_steps = steps.n_steps();
        let n_targ_haps = haps.n_targ_haps();

        let mut seeds: Vec<Vec<Vec<u32>>> = vec![Vec::new(); n_steps];
        for m in 0..fpd.n_targ_markers() {
            let hi = fpd.prev_hi_marker[m];
            let step = steps.step_of(hi);
            for (a, cl) in fpd.carriers[m].iter().enumerate() {
                let targ_carriers = match cl {
                    CarrierList::Carriers(list) if !list.is_empty() => list,
                    _ => continue,
                };
                let mut list: Vec<u32> = Vec::with_capacity(2 * targ_carriers.len());
                for &s in targ_carriers.iter() {
                    list.push(2 * s);
                    list.push(2 * s + 1);
                }
                if let Some(ref_gt) = &fpd.ref_gt {
                    if let Some(carriers) = ref_gt.rec(m).carriers(a) {
                        list.extend(carriers.iter().map(|&h| h + n_targ_haps as u32));
                    }
                }
                if is_alive(&list) {
                    seeds[step].push(list);
                }
            }
        }

        let rows: Vec<Vec<i32>> = (0..n_steps)
            .into_par_iter()
            .map(|k| {
                let mut row = vec![-1i32; n_targ_haps];
                if seeds[k].is_empty() {
                    return row;
                }
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(k as u64));
                for list in &seeds[k] {
                    refine_and_assign(list, k + 1, steps, n_targ_haps, &mut row, &mut rng);
                }
                row
            })
            .collect();

        let mut matches = vec![-1i32; n_steps * n_targ_haps];
        for (k, row) in rows.into_iter().enumerate() {
            matches[k * n_targ_haps..(k + 1) * n_targ_haps].copy_from_slice(&row);
        }
        LowFreqPhaseIbs {
            matches,
            n_targ_haps,
        }
    }

    /// Low-frequency best match of `targ_hap` at `step`, or -1.
    pub fn match_hap(&self, step: usize, targ_hap: usize) -> i32 {
        self.matches[step * self.n_targ_haps + targ_hap]
    }
}

/// At least two haplotypes from at least two distinct samples.
fn is_alive(list: &[u32]) -> bool {
    list.len() >= 2 && list.iter().any(|&h| h >> 1 != list[0] >> 1)
}

fn refine_and_assign(
    seed_list: &[u32],
    mut next_step: usize,
    steps: &CodedSteps,
    n_targ_haps: usize,
    row: &mut [i32],
    rng: &mut StdRng,
) {
    let mut alive: Vec<Vec<u32>> = vec![seed_list.to_vec()];
    while !alive.is_empty() && next_step < steps.n_steps() {
        let seq = steps.seq(next_step);
        let mut survivors = Vec::new();
        for parent in alive {
            let mut groups: FxHashMap<u32, Vec<u32>> = FxHashMap::default();
            for &h in &parent {
                groups.entry(seq[h as usize]).or_default().push(h);
            }
            let mut sub_lists: Vec<Vec<u32>> = Vec::new();
            let mut orphans: Vec<u32> = Vec::new();
            for (_, group) in groups {
                if is_alive(&group) {
                    sub_lists.push(group);
                } else {
                    orphans.extend(group);
                }
            }
            if sub_lists.is_empty() {
                // the split killed every branch: the parent was the
                // last live list for all of its haplotypes
                assign_all(&parent, n_targ_haps, row, rng);
                continue;
            }
            for h in orphans {
                assign_one(h, &parent, n_targ_haps, row, rng);
            }
            survivors.extend(sub_lists);
        }
        alive = survivors;
        next_step += 1;
    }
    for list in alive {
        assign_all(&list, n_targ_haps, row, rng);
    }
}

fn assign_all(list: &[u32], n_targ_haps: usize, row: &mut [i32], rng: &mut StdRng) {
    for &h in list {
        assign_one(h, list, n_targ_haps, row, rng);
    }
}

/// Picks a random haplotype in `list` from a different sample than `h`,
/// rotating on collision. First assignment wins.
fn assign_one(h: u32, list: &[u32], n_targ_haps: usize, row: &mut [i32], rng: &mut StdRng) {
    if h as usize >= n_targ_haps || row[h as usize] >= 0 {
        return;
    }
    let n = list.len();
    let start = rng.gen_range(0..n);
    for j in 0..n {
        let cand = list[(start + j) % n];
        if cand >> 1 != h >> 1 {
            row[h as usize] = cand as i32;
            return;
        }
    }
}
