/// Shared pieces of the Li-Stephens haploid HMM: the linear-rescaling
/// transition update and the default allele-mismatch probability.

/// Applies the recombination transition in place:
/// `p[k] = scale * p[k] + shift` with `scale = (1 - p_recomb) / sum`
/// and `shift = p_recomb / n_states`. When the incoming probabilities
/// sum to `sum`, the result sums to 1.
#[inline]
pub fn transition(probs: &mut [f32], sum: f32, p_recomb: f32) {
    let n = probs.len() as f32;
    let scale = (1.0 - p_recomb) / sum;
    let shift = p_recomb / n;
    for p in probs.iter_mut() {
        *p = scale * *p + shift;
    }
}

/// Per-marker recombination probability from the recombination factor
/// and a genetic distance in cM.
#[inline]
pub fn p_recomb(recomb_factor: f32, gen_dist_cm: f64) -> f32 {
    -(-(recomb_factor as f64) * gen_dist_cm).exp_m1() as f32
}

/// The Li-Stephens allele mismatch probability used when `err` is not
/// supplied: `theta / (2 (theta + n))` with `theta = 1 / (ln n + 0.5)`.
pub fn li_stephens_p_err(n_haps: usize) -> f32 {
    let n = n_haps as f64;
    let theta = 1.0 / (n.ln() + 0.5);
    (theta / (2.0 * (theta + n))) as f32
}

/// Initial recombination factor: `0.04 * ne / n_haps`.
pub fn init_recomb_factor(ne: f64, n_haps: usize) -> f32 {
    (0.04 * ne / n_haps as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn transition_preserves_unit_mass() {
        for n_states in [1usize, 7, 280] {
            let mut probs: Vec<f32> = (0..n_states).map(|k| (k + 1) as f32).collect();
            let sum: f32 = probs.iter().sum();
            // normalise the input to 1 and check the band afterwards
            for p in probs.iter_mut() {
                *p /= sum;
            }
            for p_rec in [0.0f32, 1e-6, 0.01, 0.5, 1.0] {
                let mut probs = probs.clone();
                transition(&mut probs, 1.0, p_rec);
                let out: f32 = probs.iter().sum();
                let eps = 1e-5 * n_states as f32;
                assert!((out - 1.0).abs() <= eps, "sum {} for K={}", out, n_states);
            }
        }
    }

    #[test]
    fn p_recomb_is_one_minus_exp() {
        assert_relative_eq!(p_recomb(2.0, 0.5), 1.0 - (-1.0f64).exp() as f32);
        assert_eq!(p_recomb(2.0, 0.0), 0.0);
    }

    #[test]
    fn default_p_err_is_small_and_positive() {
        let p = li_stephens_p_err(1000);
        assert!(p > 0.0 && p < 1e-3);
        assert!(li_stephens_p_err(10_000) < p);
    }
}
