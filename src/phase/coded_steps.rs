use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::phase::phase_haps::PhaseHaps;

/// Smallest number of steps used when a scale factor re-partitions the
/// high-frequency markers.
const MIN_SCALED_STEPS: usize = 40;

/**
 * Partitions the high-frequency markers into genetic-length steps and,
 * per step, assigns every haplotype an integer sequence id describing
 * its allele pattern across the step.
 *
 * Target haplotypes are coded first with incremental ids per
 * (current id, allele) pair; the reference sweep reuses the target
 * tables, and any pattern never observed in a target haplotype is
 * pooled under the reserved id 0.
 *
 * The first step boundary sits at a uniform random fraction of the
 * step length. A scale factor other than 1.0 re-partitions at
 * `step_cm / scale`, with a floor of 40 steps, so sweeps see
 * proportionally more, finer steps.
 */
pub struct CodedSteps {
    step_starts: Arc<[u32]>,
    hap_to_seq: Vec<Arc<[u32]>>,
    n_seqs: Arc<[u32]>,
    n_hi_markers: usize,
}

impl CodedSteps {
    pub fn new(
        haps: &PhaseHaps,
        hi_gen_pos: &[f64],
        step_cm: f64,
        step_scale: f64,
        seed: u64,
    ) -> CodedSteps {
        let n_hi = haps.n_hi_markers();
        debug_assert_eq!(hi_gen_pos.len(), n_hi);
        let mut rng = StdRng::seed_from_u64(seed);
        let eff_step = if step_scale == 1.0 {
            step_cm
        } else {
            step_cm / step_scale
        };
        let mut step_starts = step_starts(hi_gen_pos, eff_step, rng.gen::<f64>());
        if step_scale != 1.0 {
            let min_steps = MIN_SCALED_STEPS.min(n_hi);
            if step_starts.len() < min_steps {
                step_starts = even_starts(n_hi, min_steps);
            }
        }
        let n_steps = step_starts.len();

        let coded: Vec<(Arc<[u32]>, u32)> = (0..n_steps)
            .into_par_iter()
            .map(|k| {
                let start = step_starts[k] as usize;
                let end = if k + 1 < n_steps {
                    step_starts[k + 1] as usize
                } else {
                    n_hi
                };
                code_step(haps, start, end)
            })
            .collect();

        let mut hap_to_seq = Vec::with_capacity(n_steps);
        let mut n_seqs = Vec::with_capacity(n_steps);
        for (seq, n) in coded {
            hap_to_seq.push(seq);
            n_seqs.push(n);
        }
        CodedSteps {
            step_starts: step_starts.into(),
            hap_to_seq,
            n_seqs: n_seqs.into(),
            n_hi_markers: n_hi,
        }
    }

    pub fn n_steps(&self) -> usize {
        self.step_starts.len()
    }

    /// First high-frequency marker of step `k`.
    pub fn step_start(&self, k: usize) -> usize {
        self.step_starts[k] as usize
    }

    /// One past the last high-frequency marker of step `k`.
    pub fn step_end(&self, k: usize) -> usize {
        if k + 1 < self.step_starts.len() {
            self.step_starts[k + 1] as usize
        } else {
            self.n_hi_markers
        }
    }

    /// The step containing high-frequency marker `hi_m`.
    pub fn step_of(&self, hi_m: u32) -> usize {
        self.step_starts.partition_point(|&s| s <= hi_m) - 1
    }

    /// Sequence ids at step `k`, one per haplotype.
    pub fn seq(&self, k: usize) -> &[u32] {
        &self.hap_to_seq[k]
    }

    /// Number of sequence ids at step `k` (id 0 included).
    pub fn n_seq(&self, k: usize) -> u32 {
        self.n_seqs[k]
    }
}

fn step_starts(gen_pos: &[f64], step_cm: f64, first_frac: f64) -> Vec<u32> {
    let n = gen_pos.len();
    let mut starts = vec![0u32];
    let mut boundary = gen_pos[0] + first_frac * step_cm;
    for m in 1..n {
        if gen_pos[m] >= boundary {
            starts.push(m as u32);
            // advance past any empty steps
            while gen_pos[m] >= boundary {
                boundary += step_cm;
            }
        }
    }
    starts
}

fn even_starts(n_markers: usize, n_steps: usize) -> Vec<u32> {
    (0..n_steps)
        .map(|k| ((k * n_markers) / n_steps) as u32)
        .collect()
}

/// Codes one step: target haplotypes receive incremental ids starting
/// at 1; reference haplotypes fall to 0 as soon as their pattern leaves
/// the target-observed tables.
fn code_step(haps: &PhaseHaps, start: usize, end: usize) -> (Arc<[u32]>, u32) {
    let n_targ = haps.n_targ_haps();
    let n_haps = haps.n_haps();
    let mut seq = vec![1u32; n_haps];
    let mut next_id = 2u32; // only meaningful after the first marker
    let mut map: FxHashMap<(u32, i32), u32> = FxHashMap::default();
    for m in start..end {
        map.clear();
        next_id = 1;
        for h in 0..n_targ {
            let key = (seq[h], haps.allele(m, h));
            let id = match map.entry(key) {
                std::collections::hash_map::Entry::Occupied(e) => *e.get(),
                std::collections::hash_map::Entry::Vacant(v) => {
                    let id = next_id;
                    next_id += 1;
                    v.insert(id);
                    id
                }
            };
            seq[h] = id;
        }
        for h in n_targ..n_haps {
            if seq[h] == 0 {
                continue;
            }
            let key = (seq[h], haps.allele(m, h));
            seq[h] = map.get(&key).copied().unwrap_or(0);
        }
    }
    (seq.into(), next_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gt::RefGT;
    use crate::gt::RefGTRec;
    use crate::marker::chrom_ids::chrom_index;
    use crate::marker::{Marker, Markers};
    use crate::phase::est_phase::SamplePhase;
    use crate::samples::Samples;
    use std::sync::Arc;

    fn haps_from(targ: &[Vec<i32>], refr: &[Vec<i32>]) -> PhaseHaps {
        let n_markers = targ[0].len();
        let chrom = chrom_index("1");
        let markers = Markers::new(
            (0..n_markers)
                .map(|m| {
                    Marker::new(chrom, m as u32 + 1, ".", vec!["A".into(), "C".into()], None)
                        .unwrap()
                })
                .collect(),
        )
        .unwrap();
        let phases: Vec<SamplePhase> = targ
            .chunks(2)
            .map(|pair| SamplePhase {
                hap1: markers.alleles_to_bits(&pair[0]).into(),
                hap2: markers.alleles_to_bits(&pair[1]).into(),
                unphased: Arc::from(Vec::new()),
                missing: Arc::from(Vec::new()),
            })
            .collect();
        let ref_hi = if refr.is_empty() {
            None
        } else {
            let names: Vec<String> = (0..refr.len() / 2).map(|i| format!("cs_r{}", i)).collect();
            let samples = Samples::from_names(&names).unwrap();
            let recs = (0..n_markers)
                .map(|m| {
                    let alleles: Vec<i32> = refr.iter().map(|h| h[m]).collect();
                    RefGTRec::from_alleles(markers.marker(m).clone(), &alleles).unwrap()
                })
                .collect();
            Some(Arc::new(RefGT::new(samples, recs).unwrap()))
        };
        let hi_to_targ: Vec<u32> = (0..n_markers as u32).collect();
        PhaseHaps::new(markers, hi_to_targ.into(), phases.into(), ref_hi)
    }

    #[test]
    fn equal_patterns_share_ids_and_ref_only_pools_to_zero() {
        // two target samples (4 haps) and one reference sample (2 haps)
        let targ = vec![
            vec![0, 1, 0, 1],
            vec![0, 1, 0, 1],
            vec![1, 0, 1, 0],
            vec![0, 0, 0, 0],
        ];
        let refr = vec![
            vec![0, 1, 0, 1], // matches targets 0/1
            vec![1, 1, 1, 1], // pattern unseen in targets
        ];
        let haps = haps_from(&targ, &refr);
        let pos: Vec<f64> = (0..4).map(|m| m as f64 * 0.001).collect();
        // one step spanning all markers
        let steps = CodedSteps::new(&haps, &pos, 10.0, 1.0, 3);
        assert_eq!(steps.n_steps(), 1);
        let seq = steps.seq(0);
        assert_eq!(seq[0], seq[1]);
        assert_ne!(seq[0], seq[2]);
        assert_ne!(seq[0], seq[3]);
        assert_eq!(seq[4], seq[0]); // ref hap matching a target pattern
        assert_eq!(seq[5], 0); // reference-only pattern
        assert!(steps.n_seq(0) >= 4);
    }

    #[test]
    fn steps_cover_markers_in_order() {
        let targ = vec![vec![0; 100], vec![1; 100]];
        let haps = haps_from(&targ, &[]);
        let pos: Vec<f64> = (0..100).map(|m| m as f64 * 0.01).collect();
        let steps = CodedSteps::new(&haps, &pos, 0.1, 1.0, 11);
        assert!(steps.n_steps() > 1);
        assert_eq!(steps.step_start(0), 0);
        for k in 0..steps.n_steps() {
            assert!(steps.step_start(k) < steps.step_end(k));
            if k > 0 {
                assert_eq!(steps.step_end(k - 1), steps.step_start(k));
            }
            for m in steps.step_start(k)..steps.step_end(k) {
                assert_eq!(steps.step_of(m as u32), k);
            }
        }
        assert_eq!(steps.step_end(steps.n_steps() - 1), 100);
    }

    #[test]
    fn scale_factor_refines_steps() {
        let targ = vec![vec![0; 200], vec![1; 200]];
        let haps = haps_from(&targ, &[]);
        let pos: Vec<f64> = (0..200).map(|m| m as f64 * 0.01).collect();
        let coarse = CodedSteps::new(&haps, &pos, 0.2, 1.0, 5);
        let fine = CodedSteps::new(&haps, &pos, 0.2, 2.0, 5);
        assert!(fine.n_steps() > coarse.n_steps());
        assert!(fine.n_steps() >= MIN_SCALED_STEPS.min(200));
    }
}
