use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;

use crate::gt::GT;
use crate::phase::est_phase::SamplePhase;
use crate::phase::hmm::transition;
use crate::phase::phase_data::PhaseData;
use crate::phase::phase_states::PhaseStates;

const SAMPLE_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

/**
 * The stage-1 per-sample phase update: a haploid Li-Stephens HMM over
 * the sample's composite reference states, run once backward and once
 * forward over the high-frequency markers.
 *
 * Three forward channels are kept. Channel 0 is phase-insensitive: it
 * emits on homozygous alleles and carries no information at
 * heterozygous or missing sites. Channels 1 and 2 branch from channel 0
 * at each unphased heterozygote and follow the two candidate phasings
 * across the current segment. At the segment's closing heterozygote the
 * four products of forward and saved backward channels decide whether
 * the haplotype labels swap; the swap state is tracked as a parity flag
 * and the saved backward channels are re-labelled under it. Missing
 * alleles are imputed between segments by combining the candidate
 * channels' emissions with the saved backward probabilities, with
 * haplotype roles respecting the current parity.
 *
 * A fraction of the lowest-confidence heterozygotes is left unphased
 * for the next iteration; the final iteration phases everything.
 */
pub struct PhaseBaum1<'a> {
    pd: &'a PhaseData<'a>,
    states: PhaseStates,
    al: Array2<u8>,
    n_states: usize,
    fwd0: Vec<f32>,
    fwd1: Vec<f32>,
    fwd2: Vec<f32>,
    bwd: Vec<f32>,
    saved1: FxHashMap<u32, Vec<f32>>,
    saved2: FxHashMap<u32, Vec<f32>>,
}

impl<'a> PhaseBaum1<'a> {
    pub fn new(pd: &'a PhaseData<'a>) -> PhaseBaum1<'a> {
        let n_hi = pd.fpd.n_hi_markers();
        PhaseBaum1 {
            pd,
            states: PhaseStates::new(pd.max_states, pd.min_steps, n_hi),
            al: Array2::zeros((n_hi, pd.max_states)),
            n_states: 0,
            fwd0: Vec::new(),
            fwd1: Vec::new(),
            fwd2: Vec::new(),
            bwd: Vec::new(),
            saved1: FxHashMap::default(),
            saved2: FxHashMap::default(),
        }
    }

    /// Computes the sample's updated phase from the start-of-iteration
    /// snapshot. Pure with respect to shared state: the result is
    /// committed by the driver at the iteration barrier.
    pub fn phase_sample(&mut self, sample: usize, prev: &SamplePhase) -> SamplePhase {
        let pd = self.pd;
        let fpd = pd.fpd;
        let markers = fpd.targ_gt.markers();
        let n_hi = fpd.n_hi_markers();

        let unph_hi: Vec<u32> = prev
            .unphased
            .iter()
            .filter_map(|&m| to_hi(&fpd.targ_to_hi, m))
            .collect();
        let miss_hi: Vec<u32> = prev
            .missing
            .iter()
            .filter_map(|&m| to_hi(&fpd.targ_to_hi, m))
            .collect();
        if unph_hi.is_empty() && miss_hi.is_empty() {
            return prev.clone();
        }

        // current estimate in high-frequency coordinates
        let mut h1: Vec<u8> = Vec::with_capacity(n_hi);
        let mut h2: Vec<u8> = Vec::with_capacity(n_hi);
        for &t in fpd.hi_to_targ.iter() {
            h1.push(markers.allele_from_bits(&prev.hap1, t as usize) as u8);
            h2.push(markers.allele_from_bits(&prev.hap2, t as usize) as u8);
        }

        let mut rng =
            StdRng::seed_from_u64(pd.seed.wrapping_add(SAMPLE_SALT).wrapping_add(sample as u64));
        self.n_states = self.states.pair_states(
            &pd.haps,
            &pd.coded_steps,
            &pd.pbwt,
            pd.low_freq.as_ref(),
            sample,
            &mut rng,
            &mut self.al,
        );

        self.run_backward(sample, &unph_hi, &miss_hi, &h1, &h2);
        let (swaps, lrs) = self.run_forward(sample, &unph_hi, &miss_hi, &mut h1, &mut h2);

        // resolve the parity trace into ordered haplotypes
        let mut c1 = h1;
        let mut c2 = h2;
        let mut parity = false;
        let mut ptr = 0usize;
        for m in 0..n_hi {
            if ptr < unph_hi.len() && unph_hi[ptr] as usize == m {
                parity ^= swaps[ptr];
                ptr += 1;
            }
            if parity {
                std::mem::swap(&mut c1[m], &mut c2[m]);
            }
        }

        let keep = hets_left_unphased(&unph_hi, &lrs, pd.it, pd.n_its);

        // write the high-frequency alleles back into full-marker bits
        let mut bits1: Vec<u64> = prev.hap1.to_vec();
        let mut bits2: Vec<u64> = prev.hap2.to_vec();
        for (h, &t) in fpd.hi_to_targ.iter().enumerate() {
            markers.set_allele(&mut bits1, t as usize, c1[h] as i32);
            markers.set_allele(&mut bits2, t as usize, c2[h] as i32);
        }

        // unphased list: kept high-frequency hets plus the untouched
        // low-frequency entries, in increasing marker order
        let mut unphased: Vec<u32> = prev
            .unphased
            .iter()
            .copied()
            .filter(|&m| fpd.targ_to_hi[m as usize] < 0)
            .collect();
        unphased.extend(keep.iter().map(|&h| fpd.hi_to_targ[h as usize]));
        unphased.sort_unstable();

        SamplePhase {
            hap1: bits1.into(),
            hap2: bits2.into(),
            unphased: unphased.into(),
            missing: prev.missing.clone(),
        }
    }

    /// Backward sweep with the phase-insensitive emission, saving the
    /// two allele-conditioned backward channels at every unphased
    /// heterozygote and missing site.
    fn run_backward(&mut self, sample: usize, unph_hi: &[u32], miss_hi: &[u32], h1: &[u8], h2: &[u8]) {
        let pd = self.pd;
        let fpd = pd.fpd;
        let n_hi = fpd.n_hi_markers();
        let k = self.n_states;
        self.bwd.clear();
        self.bwd.resize(k, 1.0 / k as f32);
        self.saved1.clear();
        self.saved2.clear();

        let mut u_ptr = unph_hi.len();
        let mut m_ptr = miss_hi.len();
        for m in (0..n_hi).rev() {
            let save_unph = u_ptr > 0 && unph_hi[u_ptr - 1] as usize == m;
            let save_miss = m_ptr > 0 && miss_hi[m_ptr - 1] as usize == m;
            if save_unph || save_miss {
                let row = self.al.row(m);
                let mut s1 = Vec::with_capacity(k);
                let mut s2 = Vec::with_capacity(k);
                for j in 0..k {
                    s1.push(self.bwd[j] * pd.em(row[j] == h1[m]));
                    s2.push(self.bwd[j] * pd.em(row[j] == h2[m]));
                }
                if save_miss {
                    // emission is uninformative at a missing site
                    s1 = self.bwd.clone();
                    s2 = s1.clone();
                    m_ptr -= 1;
                } else {
                    u_ptr -= 1;
                }
                self.saved1.insert(m as u32, s1);
                self.saved2.insert(m as u32, s2);
            }
            if m > 0 {
                let sum = self.fold_insensitive_emission(sample, m);
                transition(&mut self.bwd, sum, pd.p_recomb[m]);
            }
        }
    }

    /// Multiplies the backward vector by the phase-insensitive emission
    /// at marker `m` and returns the new sum.
    fn fold_insensitive_emission(&mut self, sample: usize, m: usize) -> f32 {
        let pd = self.pd;
        let (g1, g2) = (
            pd.fpd.targ_hi.allele1(m, sample),
            pd.fpd.targ_hi.allele2(m, sample),
        );
        if g1 < 0 || g2 < 0 || g1 != g2 {
            return self.bwd.iter().sum();
        }
        let row = self.al.row(m);
        let a = g1 as u8;
        let mut sum = 0.0f32;
        for j in 0..self.n_states {
            self.bwd[j] *= pd.em(row[j] == a);
            sum += self.bwd[j];
        }
        sum
    }

    /// Forward sweep: segment-by-segment phase decisions and
    /// missing-allele imputation. Returns the per-heterozygote swap
    /// decisions and likelihood ratios, and updates `h1`/`h2` in place
    /// at missing sites (in original label space).
    fn run_forward(
        &mut self,
        sample: usize,
        unph_hi: &[u32],
        miss_hi: &[u32],
        h1: &mut [u8],
        h2: &mut [u8],
    ) -> (Vec<bool>, Vec<f32>) {
        let pd = self.pd;
        let fpd = pd.fpd;
        let n_hi = fpd.n_hi_markers();
        let k = self.n_states;
        let init = 1.0 / k as f32;
        self.fwd0.clear();
        self.fwd0.resize(k, init);
        self.fwd1.clear();
        self.fwd1.resize(k, init);
        self.fwd2.clear();
        self.fwd2.resize(k, init);
        let (mut sum0, mut sum1, mut sum2) = (1.0f32, 1.0f32, 1.0f32);

        let mut parity = false;
        let mut swaps = Vec::with_capacity(unph_hi.len());
        let mut lrs = Vec::with_capacity(unph_hi.len());
        let mut u_ptr = 0usize;
        let mut m_ptr = 0usize;

        for m in 0..n_hi {
            if m > 0 {
                let p = pd.p_recomb[m];
                transition(&mut self.fwd0, sum0, p);
                transition(&mut self.fwd1, sum1, p);
                transition(&mut self.fwd2, sum2, p);
                sum0 = 1.0;
                sum1 = 1.0;
                sum2 = 1.0;
            }
            let is_unph = u_ptr < unph_hi.len() && unph_hi[u_ptr] as usize == m;
            let is_miss = m_ptr < miss_hi.len() && miss_hi[m_ptr] as usize == m;
            if is_unph {
                let m32 = m as u32;
                let (sc1, sc2) = if parity {
                    (&self.saved2[&m32], &self.saved1[&m32])
                } else {
                    (&self.saved1[&m32], &self.saved2[&m32])
                };
                let p11 = dot(&self.fwd1, sc1) as f64;
                let p12 = dot(&self.fwd1, sc2) as f64;
                let p21 = dot(&self.fwd2, sc1) as f64;
                let p22 = dot(&self.fwd2, sc2) as f64;
                let keep = p11 * p22;
                let flip = p12 * p21;
                let swap = keep < flip;
                let (hi, lo) = if keep >= flip { (keep, flip) } else { (flip, keep) };
                let lr = if lo > 0.0 { (hi / lo) as f32 } else { f32::MAX };
                swaps.push(swap);
                lrs.push(lr);
                if swap {
                    parity = !parity;
                }
                u_ptr += 1;

                // re-branch the candidate channels from the backbone
                self.fwd1.copy_from_slice(&self.fwd0);
                self.fwd2.copy_from_slice(&self.fwd0);
                let (a1, a2) = ordered(h1[m], h2[m], parity);
                sum1 = emit(&mut self.fwd1, &self.al, m, a1, pd.p_err);
                sum2 = emit(&mut self.fwd2, &self.al, m, a2, pd.p_err);
                // channel 0 is uninformative at a heterozygote
            } else if is_miss {
                let m32 = m as u32;
                let saved = &self.saved1[&m32];
                let n_alleles = fpd.hi_markers.marker(m).n_alleles();
                let a1 = impute_allele(&self.fwd1, &self.al, m, n_alleles, saved, pd.p_err);
                let a2 = impute_allele(&self.fwd2, &self.al, m, n_alleles, saved, pd.p_err);
                if parity {
                    h2[m] = a1;
                    h1[m] = a2;
                } else {
                    h1[m] = a1;
                    h2[m] = a2;
                }
                sum1 = emit(&mut self.fwd1, &self.al, m, a1, pd.p_err);
                sum2 = emit(&mut self.fwd2, &self.al, m, a2, pd.p_err);
                m_ptr += 1;
            } else {
                let (g1, g2) = (fpd.targ_hi.allele1(m, sample), fpd.targ_hi.allele2(m, sample));
                if g1 >= 0 && g1 == g2 {
                    sum0 = emit(&mut self.fwd0, &self.al, m, g1 as u8, pd.p_err);
                    sum1 = emit(&mut self.fwd1, &self.al, m, g1 as u8, pd.p_err);
                    sum2 = emit(&mut self.fwd2, &self.al, m, g1 as u8, pd.p_err);
                } else if g1 >= 0 && g2 >= 0 {
                    // previously phased heterozygote
                    let (a1, a2) = ordered(h1[m], h2[m], parity);
                    sum1 = emit(&mut self.fwd1, &self.al, m, a1, pd.p_err);
                    sum2 = emit(&mut self.fwd2, &self.al, m, a2, pd.p_err);
                }
            }
        }
        (swaps, lrs)
    }
}

fn to_hi(targ_to_hi: &[i32], m: u32) -> Option<u32> {
    let h = targ_to_hi[m as usize];
    (h >= 0).then_some(h as u32)
}

fn ordered(a1: u8, a2: u8, parity: bool) -> (u8, u8) {
    if parity {
        (a2, a1)
    } else {
        (a1, a2)
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Multiplies a channel by the emission for allele `a` at marker `m`
/// and returns the new sum.
fn emit(chain: &mut [f32], al: &ndarray::Array2<u8>, m: usize, a: u8, p_err: f32) -> f32 {
    let row = al.row(m);
    let hit = 1.0 - p_err;
    let mut sum = 0.0f32;
    for (j, p) in chain.iter_mut().enumerate() {
        *p *= if row[j] == a { hit } else { p_err };
        sum += *p;
    }
    sum
}

/// The allele maximising `sum_k fwd[k] * em(k, a) * saved_bwd[k]`.
fn impute_allele(
    fwd: &[f32],
    al: &ndarray::Array2<u8>,
    m: usize,
    n_alleles: usize,
    saved_bwd: &[f32],
    p_err: f32,
) -> u8 {
    let row = al.row(m);
    let hit = 1.0 - p_err;
    let mut best = 0u8;
    let mut best_score = f32::MIN;
    for a in 0..n_alleles as u8 {
        let mut score = 0.0f32;
        for j in 0..fwd.len() {
            let em = if row[j] == a { hit } else { p_err };
            score += fwd[j] * em * saved_bwd[j];
        }
        if score > best_score {
            best_score = score;
            best = a;
        }
    }
    best
}

/// Indices (into `unph_hi`) of the heterozygotes left unphased for the
/// next iteration: the lowest likelihood-ratio fraction
/// `n_unphased^(-1 / its_remaining)`, and none at the last iteration.
fn hets_left_unphased(unph_hi: &[u32], lrs: &[f32], it: usize, n_its: usize) -> Vec<u32> {
    let its_remaining = n_its - it - 1;
    if its_remaining == 0 || unph_hi.is_empty() {
        return Vec::new();
    }
    let n = unph_hi.len();
    let p_leave = (n as f64).powf(-1.0 / its_remaining as f64).min(1.0);
    let n_keep = (p_leave * n as f64).floor() as usize;
    if n_keep == 0 {
        return Vec::new();
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| lrs[a].partial_cmp(&lrs[b]).unwrap_or(std::cmp::Ordering::Equal));
    let mut keep: Vec<u32> = order[..n_keep].iter().map(|&i| unph_hi[i]).collect();
    keep.sort_unstable();
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn everything_phases_at_the_last_iteration() {
        let unph = vec![3u32, 7, 11];
        let lrs = vec![1.5, 1.1, 9.0];
        assert!(hets_left_unphased(&unph, &lrs, 17, 18).is_empty());
    }

    #[test]
    fn lowest_ratio_hets_stay_unphased() {
        let unph: Vec<u32> = (0..100).collect();
        let lrs: Vec<f32> = (0..100).map(|i| i as f32 + 1.0).collect();
        let keep = hets_left_unphased(&unph, &lrs, 10, 18);
        // p_leave = 100^(-1/7) ~ 0.518
        assert_eq!(keep.len(), 51);
        // the lowest-ratio hets are exactly the ones kept
        assert_eq!(keep, (0..51).collect::<Vec<u32>>());
    }

    #[test]
    fn keep_count_shrinks_with_remaining_iterations() {
        let unph: Vec<u32> = (0..100).collect();
        let lrs: Vec<f32> = (0..100).map(|i| 1.0 + i as f32).collect();
        let mut last = usize::MAX;
        for it in 0..18 {
            let keep = hets_left_unphased(&unph, &lrs, it, 18).len();
            assert!(keep <= last);
            last = keep;
        }
        assert_eq!(last, 0);
    }
}
