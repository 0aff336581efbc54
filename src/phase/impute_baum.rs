use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;

use crate::gt::GT;
use crate::phase::est_phase::{EstPhase, SamplePhase};
use crate::phase::hmm::transition;
use crate::phase::phase_data::PhaseData;
use crate::phase::phase_states::PhaseStates;

const STAGE2_SALT: u64 = 0xda94_2042_e4dd_58b5;

/// A low-frequency allele whose resolution must wait for the second
/// pass: some of its posterior mass sits on target haplotypes whose own
/// genotype at the marker is not yet determined.
pub struct PendingAllele {
    pub sample: u32,
    pub marker: u32,
    pub hap_bit: u8,
    pub buckets: Vec<f64>,
    pub partials: Vec<(u32, f64)>,
    /// The unordered heterozygote alleles, or `None` for a missing
    /// genotype (any allele admissible).
    pub restrict: Option<(u8, u8)>,
}

/// One sample's stage-2 result: resolved ordered alleles per
/// low-frequency site plus any deferrals for the second pass.
pub struct SampleImpute {
    pub sample: u32,
    pub sites: Vec<(u32, i32, i32)>,
    pub pending: Vec<PendingAllele>,
}

/**
 * Stage-2 haplotype completion. After stage 1 has phased every
 * high-frequency marker, each remaining low-frequency heterozygote or
 * missing allele is resolved by interpolating the haplotype's HMM state
 * posteriors between the enclosing high-frequency markers and reading
 * the referenced haplotypes' alleles at the site. Mass on haplotypes
 * whose allele cannot be observed yet accumulates in an unknown bucket;
 * when that bucket dominates, the allele is deferred to `HapImputer`'s
 * second pass against the final phased panel.
 */
pub struct ImputeBaum<'a> {
    pd: &'a PhaseData<'a>,
    states: PhaseStates,
    hap_idx: Array2<i32>,
    fwd: Vec<f32>,
    bwd: Vec<f32>,
    n_states: usize,
    bwd_rows: FxHashMap<u32, Vec<f32>>,
    post_rows: FxHashMap<u32, Vec<f32>>,
}

impl<'a> ImputeBaum<'a> {
    pub fn new(pd: &'a PhaseData<'a>) -> ImputeBaum<'a> {
        let n_hi = pd.fpd.n_hi_markers();
        ImputeBaum {
            pd,
            states: PhaseStates::new(pd.max_states, pd.min_steps, n_hi),
            hap_idx: Array2::zeros((n_hi, pd.max_states)),
            fwd: Vec::new(),
            bwd: Vec::new(),
            n_states: 0,
            bwd_rows: FxHashMap::default(),
            post_rows: FxHashMap::default(),
        }
    }

    pub fn impute_sample(&mut self, sample: usize, prev: &SamplePhase) -> SampleImpute {
        let fpd = self.pd.fpd;
        let mut out = SampleImpute {
            sample: sample as u32,
            sites: Vec::new(),
            pending: Vec::new(),
        };
        // low-frequency sites still unresolved after stage 1
        let het_sites: Vec<u32> = prev
            .unphased
            .iter()
            .copied()
            .filter(|&m| fpd.targ_to_hi[m as usize] < 0)
            .collect();
        let miss_sites: Vec<u32> = prev
            .missing
            .iter()
            .copied()
            .filter(|&m| fpd.targ_to_hi[m as usize] < 0)
            .collect();
        if het_sites.is_empty() && miss_sites.is_empty() {
            return out;
        }

        let mut needed: Vec<u32> = Vec::new();
        for &m in het_sites.iter().chain(miss_sites.iter()) {
            let a = fpd.prev_hi_marker[m as usize];
            needed.push(a);
            if (a as usize) + 1 < fpd.n_hi_markers() {
                needed.push(a + 1);
            }
        }
        needed.sort_unstable();
        needed.dedup();

        // first haplotype's chain decides heterozygote order and its
        // own missing allele
        self.run_chain(2 * sample, &needed);
        for &m in &het_sites {
            let (g1, g2) = (
                fpd.targ_gt.allele1(m as usize, sample),
                fpd.targ_gt.allele2(m as usize, sample),
            );
            let restrict = Some((g1.min(g2) as u8, g1.max(g2) as u8));
            let a1 = self.resolve(sample, m, 0, restrict, &mut out.pending);
            let (g1, g2) = (restrict.unwrap().0 as i32, restrict.unwrap().1 as i32);
            let a2 = if a1 == g1 { g2 } else { g1 };
            out.sites.push((m, a1, a2));
        }
        if !miss_sites.is_empty() {
            let mut firsts: Vec<(u32, i32)> = Vec::with_capacity(miss_sites.len());
            for &m in &miss_sites {
                firsts.push((m, self.resolve(sample, m, 0, None, &mut out.pending)));
            }
            // second haplotype's chain imputes its missing alleles
            self.run_chain(2 * sample + 1, &needed);
            for (m, a1) in firsts {
                let a2 = self.resolve(sample, m, 1, None, &mut out.pending);
                out.sites.push((m, a1, a2));
            }
        }
        out
    }

    /// Runs the forward-backward chain for one haplotype, caching state
    /// posteriors at the needed high-frequency markers.
    fn run_chain(&mut self, hap: usize, needed: &[u32]) {
        let pd = self.pd;
        let fpd = pd.fpd;
        let n_hi = fpd.n_hi_markers();
        let mut rng = StdRng::seed_from_u64(
            pd.seed.wrapping_add(STAGE2_SALT).wrapping_add(hap as u64),
        );
        self.n_states = self.states.hap_states(
            &pd.haps,
            &pd.coded_steps,
            &pd.pbwt,
            pd.low_freq.as_ref(),
            hap,
            &mut rng,
            &mut self.hap_idx,
        );
        let k = self.n_states;
        self.bwd_rows.clear();
        self.post_rows.clear();

        self.bwd.clear();
        self.bwd.resize(k, 1.0 / k as f32);
        let mut need_ptr = needed.len();
        for m in (0..n_hi).rev() {
            if need_ptr > 0 && needed[need_ptr - 1] as usize == m {
                self.bwd_rows.insert(m as u32, self.bwd.clone());
                need_ptr -= 1;
            }
            if m > 0 {
                let own = pd.haps.allele(m, hap);
                let mut sum = 0.0f32;
                for j in 0..k {
                    let state_al = pd.haps.allele(m, self.hap_idx[[m, j]] as usize);
                    self.bwd[j] *= pd.em(state_al == own);
                    sum += self.bwd[j];
                }
                transition(&mut self.bwd, sum, pd.p_recomb[m]);
            }
        }

        self.fwd.clear();
        self.fwd.resize(k, 1.0 / k as f32);
        let mut sum = 1.0f32;
        let mut need_ptr = 0usize;
        for m in 0..n_hi {
            if m > 0 {
                transition(&mut self.fwd, sum, pd.p_recomb[m]);
            }
            let own = pd.haps.allele(m, hap);
            sum = 0.0;
            for j in 0..k {
                let state_al = pd.haps.allele(m, self.hap_idx[[m, j]] as usize);
                self.fwd[j] *= pd.em(state_al == own);
                sum += self.fwd[j];
            }
            if need_ptr < needed.len() && needed[need_ptr] as usize == m {
                let bwd_row = &self.bwd_rows[&(m as u32)];
                let mut post: Vec<f32> = (0..k).map(|j| self.fwd[j] * bwd_row[j]).collect();
                let total: f32 = post.iter().sum();
                if total > 0.0 {
                    for p in post.iter_mut() {
                        *p /= total;
                    }
                }
                self.post_rows.insert(m as u32, post);
                need_ptr += 1;
            }
        }
    }

    /// Resolves one haplotype allele at a low-frequency marker from the
    /// interpolated state posteriors, deferring when the unknown bucket
    /// dominates.
    fn resolve(
        &mut self,
        sample: usize,
        marker: u32,
        hap_bit: u8,
        restrict: Option<(u8, u8)>,
        pending: &mut Vec<PendingAllele>,
    ) -> i32 {
        let pd = self.pd;
        let fpd = pd.fpd;
        let m = marker as usize;
        let a = fpd.prev_hi_marker[m] as usize;
        let w = fpd.prev_wt[m] as f64;
        let b = if a + 1 < fpd.n_hi_markers() { a + 1 } else { a };
        let post_a = &self.post_rows[&(a as u32)];
        let post_b = &self.post_rows[&(b as u32)];
        let n_targ_haps = fpd.n_targ_haps();
        let n_alleles = fpd.targ_gt.markers().marker(m).n_alleles();

        let mut buckets = vec![0.0f64; n_alleles];
        let mut unknown = 0.0f64;
        let mut partials: Vec<(u32, f64)> = Vec::new();
        for j in 0..self.n_states {
            let p = w * post_a[j] as f64 + (1.0 - w) * post_b[j] as f64;
            if p <= 0.0 {
                continue;
            }
            let state_hap = self.hap_idx[[a, j]] as usize;
            match observable_allele(fpd, m, state_hap, n_targ_haps) {
                Some(al) => buckets[al as usize] += p,
                None => {
                    unknown += p;
                    partials.push((state_hap as u32, p));
                }
            }
        }

        let chosen = argmax_allele(&buckets, restrict);
        if unknown > buckets[chosen as usize] {
            pending.push(PendingAllele {
                sample: sample as u32,
                marker,
                hap_bit,
                buckets,
                partials,
                restrict,
            });
        }
        chosen as i32
    }
}

/// The allele of `state_hap` at target marker `m` when it is already
/// determined: any reference haplotype, or a target haplotype whose
/// sample is homozygous and non-missing there.
fn observable_allele(
    fpd: &crate::phase::fixed_phase_data::FixedPhaseData,
    m: usize,
    state_hap: usize,
    n_targ_haps: usize,
) -> Option<i32> {
    if state_hap >= n_targ_haps {
        let r = fpd.ref_gt.as_ref().expect("reference state without panel");
        return Some(r.rec(m).allele(state_hap - n_targ_haps));
    }
    let s = state_hap >> 1;
    let (g1, g2) = (fpd.targ_gt.allele1(m, s), fpd.targ_gt.allele2(m, s));
    (g1 >= 0 && g1 == g2).then_some(g1)
}

fn argmax_allele(buckets: &[f64], restrict: Option<(u8, u8)>) -> u8 {
    match restrict {
        Some((x, y)) => {
            if buckets[y as usize] > buckets[x as usize] {
                y
            } else {
                x
            }
        }
        None => {
            let mut best = 0usize;
            for a in 1..buckets.len() {
                if buckets[a] > buckets[best] {
                    best = a;
                }
            }
            best as u8
        }
    }
}

/**
 * The second pass over deferred alleles: once every sample's stage-2
 * choices are committed, the previously unobservable state haplotypes
 * are readable in the final phased estimate, their mass is remapped
 * onto concrete alleles, and the argmax is re-taken.
 */
pub struct HapImputer {
    pending: Vec<PendingAllele>,
}

impl HapImputer {
    pub fn new(pending: Vec<PendingAllele>) -> HapImputer {
        HapImputer { pending }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn impute(self, est: &mut EstPhase) {
        let markers = est.markers().clone();
        for p in self.pending {
            let mut buckets = p.buckets.clone();
            for &(hap, mass) in &p.partials {
                let al = est.allele(p.marker as usize, hap as usize);
                buckets[al as usize] += mass;
            }
            let chosen = argmax_allele(&buckets, p.restrict) as i32;
            let s = p.sample as usize;
            let prev = est.phase(s);
            let mut bits1: Vec<u64> = prev.hap1.to_vec();
            let mut bits2: Vec<u64> = prev.hap2.to_vec();
            match p.restrict {
                Some((x, y)) => {
                    let other = if chosen == x as i32 { y as i32 } else { x as i32 };
                    let (b1, b2) = if p.hap_bit == 0 {
                        (chosen, other)
                    } else {
                        (other, chosen)
                    };
                    markers.set_allele(&mut bits1, p.marker as usize, b1);
                    markers.set_allele(&mut bits2, p.marker as usize, b2);
                }
                None => {
                    if p.hap_bit == 0 {
                        markers.set_allele(&mut bits1, p.marker as usize, chosen);
                    } else {
                        markers.set_allele(&mut bits2, p.marker as usize, chosen);
                    }
                }
            }
            let new = SamplePhase {
                hap1: bits1.into(),
                hap2: bits2.into(),
                unphased: prev.unphased.clone(),
                missing: prev.missing.clone(),
            };
            est.set_phase(s, new);
        }
    }
}
