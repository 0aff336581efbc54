use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::phase::phase_data::PhaseData;
use crate::phase::phase_states::PhaseStates;

const REGRESS_SALT: u64 = 0xc4ce_b9fe_1a85_ec53;

/// Target total switch mass before the regression stops sampling.
fn sum_y_threshold(n_threads: usize) -> f64 {
    (5000.0 / n_threads as f64).max(200.0)
}

/// A least-squares accumulator for the recombination-factor slope.
/// Accumulation is in 64-bit doubles; merging two disjoint accumulators
/// yields the accumulator of the union.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecombRegress {
    n: u64,
    sx: f64,
    sy: f64,
    sxx: f64,
    sxy: f64,
}

impl RecombRegress {
    pub fn add(&mut self, x: f64, y: f64) {
        self.n += 1;
        self.sx += x;
        self.sy += y;
        self.sxx += x * x;
        self.sxy += x * y;
    }

    pub fn combine(&mut self, other: &RecombRegress) {
        self.n += other.n;
        self.sx += other.sx;
        self.sy += other.sy;
        self.sxx += other.sxx;
        self.sxy += other.sxy;
    }

    pub fn sum_y(&self) -> f64 {
        self.sy
    }

    /// The ordinary-least-squares slope, or `None` when the denominator
    /// vanishes.
    pub fn slope(&self) -> Option<f64> {
        if self.n < 2 {
            return None;
        }
        let n = self.n as f64;
        let denom = n * self.sxx - self.sx * self.sx;
        if denom == 0.0 {
            return None;
        }
        Some((n * self.sxy - self.sx * self.sy) / denom)
    }
}

/**
 * Re-estimates the recombination factor by regressing, over randomly
 * sampled target samples, the per-interval posterior switch mass
 * against genetic distance. For each sampled sample the
 * phase-insensitive genotype HMM is run forward and backward; at each
 * marker the point `(x, y)` with `x` the cM distance from the previous
 * marker and `y = h_factor * (den - part_numer) / den` is accumulated,
 * where `h_factor = K / (K - 1)` corrects for switches landing on the
 * same state. Samples are drawn until the total `y` mass exceeds
 * `max(5000 / n_threads, 200)`; accumulators merge in sample order, so
 * the fitted slope does not depend on thread scheduling.
 *
 * Returns the new factor only when the fitted slope is finite and
 * positive; otherwise the caller keeps the current factor.
 */
pub fn estimate_recomb_factor(pd: &PhaseData) -> Option<f32> {
    let n_samples = pd.fpd.n_targ_samples;
    let n_threads = rayon::current_num_threads().max(1);
    let threshold = sum_y_threshold(n_threads);

    let mut order: Vec<usize> = (0..n_samples).collect();
    let mut rng = StdRng::seed_from_u64(pd.seed ^ REGRESS_SALT);
    order.shuffle(&mut rng);

    let mut acc = RecombRegress::default();
    for chunk in order.chunks(n_threads) {
        let parts: Vec<RecombRegress> = chunk
            .par_iter()
            .map(|&s| sample_regress(pd, s))
            .collect();
        for part in &parts {
            acc.combine(part);
        }
        if acc.sum_y() > threshold {
            break;
        }
    }

    match acc.slope() {
        Some(beta) if beta.is_finite() && beta > 0.0 => {
            debug!(
                "recombination factor regression: {} points, slope {:.6}",
                acc.n, beta
            );
            Some(beta as f32)
        }
        _ => {
            info!("recombination factor regression produced no update");
            None
        }
    }
}

/// One sample's contribution: forward-backward over the genotype chain
/// with per-interval switch-mass observations.
fn sample_regress(pd: &PhaseData, sample: usize) -> RecombRegress {
    use crate::gt::GT;
    use crate::phase::hmm::transition;

    let fpd = pd.fpd;
    let n_hi = fpd.n_hi_markers();
    let mut states = PhaseStates::new(pd.max_states, pd.min_steps, n_hi);
    let mut al = Array2::<u8>::zeros((n_hi, pd.max_states));
    let mut rng =
        StdRng::seed_from_u64(pd.seed.wrapping_add(REGRESS_SALT).wrapping_add(sample as u64));
    let k = states.pair_states(
        &pd.haps,
        &pd.coded_steps,
        &pd.pbwt,
        pd.low_freq.as_ref(),
        sample,
        &mut rng,
        &mut al,
    );
    if k < 2 {
        return RecombRegress::default();
    }
    let h_factor = k as f64 / (k as f64 - 1.0);

    let em = |m: usize, j: usize| -> f32 {
        let (g1, g2) = (fpd.targ_hi.allele1(m, sample), fpd.targ_hi.allele2(m, sample));
        if g1 >= 0 && g1 == g2 {
            pd.em(al[[m, j]] == g1 as u8)
        } else {
            1.0
        }
    };

    // backward probabilities for every marker
    let mut bwd_all = Array2::<f32>::zeros((n_hi, k));
    let mut bwd = vec![1.0 / k as f32; k];
    for m in (0..n_hi).rev() {
        for j in 0..k {
            bwd_all[[m, j]] = bwd[j];
        }
        if m > 0 {
            let mut sum = 0.0f32;
            for (j, b) in bwd.iter_mut().enumerate() {
                *b *= em(m, j);
                sum += *b;
            }
            transition(&mut bwd, sum, pd.p_recomb[m]);
        }
    }

    let mut regress = RecombRegress::default();
    let mut fwd = vec![1.0 / k as f32; k];
    let mut sum = {
        let mut s = 0.0f32;
        for (j, f) in fwd.iter_mut().enumerate() {
            *f *= em(0, j);
            s += *f;
        }
        s
    };
    for m in 1..n_hi {
        let p = pd.p_recomb[m];
        let scale = (1.0 - p) / sum;
        let shift = p / k as f32;
        let mut den = 0.0f64;
        let mut part = 0.0f64;
        let mut new_sum = 0.0f32;
        for (j, f) in fwd.iter_mut().enumerate() {
            let stay = scale * *f;
            let e = em(m, j);
            let full = e * (stay + shift);
            let b = bwd_all[[m, j]] as f64;
            part += (e * stay) as f64 * b;
            den += full as f64 * b;
            *f = full;
            new_sum += full;
        }
        sum = new_sum;
        if den > 0.0 {
            let y = h_factor * (den - part) / den;
            regress.add(fpd.gen_dists_hi[m], y);
        }
    }
    regress
}
