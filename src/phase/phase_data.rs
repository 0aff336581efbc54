use std::sync::Arc;

use crate::phase::coded_steps::CodedSteps;
use crate::phase::est_phase::SamplePhase;
use crate::phase::fixed_phase_data::FixedPhaseData;
use crate::phase::hmm;
use crate::phase::low_freq_phase_ibs::LowFreqPhaseIbs;
use crate::phase::pbwt::PbwtPhaseIbs;
use crate::phase::phase_haps::PhaseHaps;

/// Engine knobs shared by every window. Defaults mirror the command
/// line defaults.
#[derive(Clone, Debug)]
pub struct PhaseConfig {
    pub burnin: usize,
    pub iterations: usize,
    pub phase_states: usize,
    pub phase_step: f64,
    pub step_scale: f64,
    pub buffer_cm: f64,
    pub err: Option<f32>,
    pub ne: f64,
    pub seed: i64,
}

impl Default for PhaseConfig {
    fn default() -> PhaseConfig {
        PhaseConfig {
            burnin: 6,
            iterations: 12,
            phase_states: 280,
            phase_step: 0.006,
            step_scale: 1.0,
            buffer_cm: 0.6,
            err: None,
            ne: 1e6,
            seed: -99999,
        }
    }
}

const BURNIN_CANDIDATES: usize = 100;
const MAX_PHASE_CANDIDATES: usize = 90;
const MIN_PHASE_CANDIDATES: usize = 5;

/// Base retirement age of a composite slot, in steps, before scaling.
const MIN_STEPS_BASE: f64 = 200.0;

const STEPS_SALT: u64 = 0x5851_f42d_4c95_7f2d;
const PBWT_SALT: u64 = 0x1405_7b7e_f767_814f;
const LOW_FREQ_SALT: u64 = 0x2545_f491_4f6c_dd1d;

/**
 * Everything one phasing iteration reads: the start-of-iteration
 * haplotype snapshot, the coded steps and PBWT neighbours computed from
 * it, the per-marker recombination probabilities for the current
 * recombination factor, and the annealed candidate counts.
 */
pub struct PhaseData<'a> {
    pub fpd: &'a FixedPhaseData,
    pub it: usize,
    pub n_its: usize,
    pub haps: PhaseHaps,
    pub coded_steps: CodedSteps,
    pub pbwt: PbwtPhaseIbs,
    pub low_freq: Option<LowFreqPhaseIbs>,
    pub p_recomb: Arc<[f32]>,
    pub recomb_factor: f32,
    pub p_err: f32,
    pub max_states: usize,
    pub min_steps: u32,
    pub seed: u64,
}

impl<'a> PhaseData<'a> {
    /**
     * Builds the iteration data from the current estimate snapshot.
     * `stage2` additionally computes the low-frequency best matches
     * used by the stage-2 state builder.
     */
    pub fn new(
        fpd: &'a FixedPhaseData,
        snapshot: Arc<[SamplePhase]>,
        cfg: &PhaseConfig,
        it: usize,
        recomb_factor: f32,
        seed: u64,
        stage2: bool,
    ) -> PhaseData<'a> {
        let haps = PhaseHaps::new(
            fpd.targ_gt.markers().clone(),
            fpd.hi_to_targ.clone(),
            snapshot,
            fpd.ref_hi.clone(),
        );
        let coded_steps = CodedSteps::new(
            &haps,
            &fpd.hi_gen_pos,
            cfg.phase_step,
            cfg.step_scale,
            seed ^ STEPS_SALT,
        );
        let buffer_steps = if cfg.phase_step > 0.0 {
            (cfg.buffer_cm / cfg.phase_step).ceil() as usize
        } else {
            0
        };
        let n_its = cfg.burnin + cfg.iterations;
        let max_candidates = max_candidates(it, cfg.burnin, n_its);
        let pbwt = PbwtPhaseIbs::new(
            &haps,
            &coded_steps,
            &fpd.ibs2,
            max_candidates,
            buffer_steps,
            seed ^ PBWT_SALT,
        );
        let low_freq = if stage2 {
            Some(LowFreqPhaseIbs::new(
                fpd,
                &haps,
                &coded_steps,
                seed ^ LOW_FREQ_SALT,
            ))
        } else {
            None
        };
        let p_err = cfg.err.unwrap_or_else(|| hmm::li_stephens_p_err(fpd.n_haps));
        let p_recomb = recomb_probs(&fpd.gen_dists_hi, recomb_factor);
        let min_steps = ((MIN_STEPS_BASE * cfg.step_scale).round() as u32).max(1);
        PhaseData {
            fpd,
            it,
            n_its,
            haps,
            coded_steps,
            pbwt,
            low_freq,
            p_recomb,
            recomb_factor,
            p_err,
            max_states: cfg.phase_states,
            min_steps,
            seed,
        }
    }

    /// Recomputes the per-marker recombination probabilities after a
    /// regression update of the recombination factor.
    pub fn set_recomb_factor(&mut self, recomb_factor: f32) {
        self.recomb_factor = recomb_factor;
        self.p_recomb = recomb_probs(&self.fpd.gen_dists_hi, recomb_factor);
    }

    #[inline]
    pub fn em(&self, matches: bool) -> f32 {
        if matches {
            1.0 - self.p_err
        } else {
            self.p_err
        }
    }
}

fn recomb_probs(gen_dists: &[f64], recomb_factor: f32) -> Arc<[f32]> {
    gen_dists
        .iter()
        .map(|&d| hmm::p_recomb(recomb_factor, d))
        .collect::<Vec<f32>>()
        .into()
}

/// The candidate count anneals from `BURNIN_CANDIDATES` during burn-in
/// through a linear ramp from `MAX_PHASE_CANDIDATES` at burn-in end to
/// `MIN_PHASE_CANDIDATES` at the final iteration.
fn max_candidates(it: usize, burnin: usize, n_its: usize) -> usize {
    if it < burnin {
        return BURNIN_CANDIDATES;
    }
    let post = n_its - burnin;
    if post <= 1 {
        return MIN_PHASE_CANDIDATES;
    }
    let frac = (it - burnin) as f64 / (post - 1) as f64;
    let v = MAX_PHASE_CANDIDATES as f64
        - frac * (MAX_PHASE_CANDIDATES - MIN_PHASE_CANDIDATES) as f64;
    v.round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_annealing() {
        let burnin = 6;
        let n_its = 18;
        for it in 0..burnin {
            assert_eq!(max_candidates(it, burnin, n_its), BURNIN_CANDIDATES);
        }
        assert_eq!(max_candidates(burnin, burnin, n_its), MAX_PHASE_CANDIDATES);
        assert_eq!(max_candidates(n_its - 1, burnin, n_its), MIN_PHASE_CANDIDATES);
        // strictly non-increasing after burn-in
        let mut last = usize::MAX;
        for it in burnin..n_its {
            let v = max_candidates(it, burnin, n_its);
            assert!(v <= last);
            last = v;
        }
    }
}
